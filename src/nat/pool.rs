//! External socket pool

use super::Socket;
use crate::{Error, Result};
use std::collections::BTreeSet;
use std::fmt;
use std::net::Ipv4Addr;
use tracing::{info, warn};

/// Free external sockets available for new sessions.
///
/// Built once from the cross product of the configured external addresses
/// and ports. A socket is in the free set iff no live session holds it.
#[derive(Debug, Clone)]
pub struct SocketPool {
    free: BTreeSet<Socket>,
    capacity: usize,
    addrs: BTreeSet<Ipv4Addr>,
    ports: BTreeSet<u16>,
}

impl SocketPool {
    pub fn new<A, P>(addrs: A, ports: P) -> Self
    where
        A: IntoIterator<Item = Ipv4Addr>,
        P: IntoIterator<Item = u16>,
    {
        let addrs: BTreeSet<Ipv4Addr> = addrs.into_iter().collect();
        let ports: BTreeSet<u16> = ports.into_iter().collect();

        let free: BTreeSet<Socket> = addrs
            .iter()
            .flat_map(|&addr| ports.iter().map(move |&port| Socket::new(addr, port)))
            .collect();
        let capacity = free.len();

        info!(
            "Socket pool initialized: {} addresses x {} ports = {} sockets",
            addrs.len(),
            ports.len(),
            capacity
        );

        Self {
            free,
            capacity,
            addrs,
            ports,
        }
    }

    /// Take the smallest free socket.
    pub fn issue(&mut self) -> Result<Socket> {
        self.free.pop_first().ok_or(Error::PoolExhausted {
            capacity: self.capacity,
        })
    }

    /// Return a socket to the free set.
    pub fn release(&mut self, socket: Socket) {
        if !self.belongs(&socket) {
            warn!("Ignoring release of foreign socket {}", socket);
            return;
        }
        if !self.free.insert(socket) {
            warn!("Socket {} released twice", socket);
        }
    }

    /// Whether the socket is part of this pool's address x port space
    pub fn belongs(&self, socket: &Socket) -> bool {
        self.addrs.contains(&socket.addr) && self.ports.contains(&socket.port)
    }

    pub fn is_free(&self, socket: &Socket) -> bool {
        self.free.contains(socket)
    }

    /// Number of free sockets
    pub fn free(&self) -> usize {
        self.free.len()
    }

    /// Total number of sockets, free or assigned
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn is_exhausted(&self) -> bool {
        self.free.is_empty()
    }
}

impl fmt::Display for SocketPool {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "pool {}/{} free [", self.free(), self.capacity)?;
        for (i, socket) in self.free.iter().enumerate() {
            if i > 0 {
                write!(f, ", ")?;
            }
            write!(f, "{}", socket)?;
        }
        write!(f, "]")
    }
}
