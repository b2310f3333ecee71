//! Translation boundary classification

use super::Socket;
use crate::{Error, Result};
use std::collections::BTreeSet;
use std::fmt;
use std::net::Ipv4Addr;
use std::str::FromStr;

/// IPv4 network in CIDR notation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Ipv4Cidr {
    addr: Ipv4Addr,
    prefix_len: u8,
}

impl Ipv4Cidr {
    pub fn new(addr: Ipv4Addr, prefix_len: u8) -> Result<Self> {
        if prefix_len > 32 {
            return Err(Error::Parse(format!("invalid prefix length /{}", prefix_len)));
        }
        Ok(Self {
            addr: Ipv4Addr::from(u32::from(addr) & Self::mask_of(prefix_len)),
            prefix_len,
        })
    }

    fn mask_of(prefix_len: u8) -> u32 {
        if prefix_len == 0 {
            0
        } else {
            u32::MAX << (32 - prefix_len)
        }
    }

    /// Network address (host bits cleared)
    pub fn network(&self) -> Ipv4Addr {
        self.addr
    }

    pub fn prefix_len(&self) -> u8 {
        self.prefix_len
    }

    pub fn contains(&self, ip: Ipv4Addr) -> bool {
        u32::from(ip) & Self::mask_of(self.prefix_len) == u32::from(self.addr)
    }
}

impl FromStr for Ipv4Cidr {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        let (addr, prefix) = s
            .split_once('/')
            .ok_or_else(|| Error::Parse(format!("CIDR '{}' missing prefix length", s)))?;
        let addr: Ipv4Addr = addr
            .parse()
            .map_err(|_| Error::Parse(format!("invalid IP: {}", addr)))?;
        let prefix_len: u8 = prefix
            .parse()
            .map_err(|_| Error::Parse(format!("invalid prefix: {}", prefix)))?;
        Self::new(addr, prefix_len)
    }
}

impl fmt::Display for Ipv4Cidr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.addr, self.prefix_len)
    }
}

/// Which way a flow crosses the boundary
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    /// Internal host to the outside; source gets translated
    Outgoing,
    /// Outside host to an external pool address; destination gets translated
    Incoming,
    /// Does not cross the boundary
    Local,
}

/// Internal networks on one side, external pool addresses on the other
#[derive(Debug, Clone)]
pub struct Boundary {
    internal_networks: Vec<Ipv4Cidr>,
    external_addrs: BTreeSet<Ipv4Addr>,
}

impl Boundary {
    pub fn new<I, E>(internal_networks: I, external_addrs: E) -> Self
    where
        I: IntoIterator<Item = Ipv4Cidr>,
        E: IntoIterator<Item = Ipv4Addr>,
    {
        Self {
            internal_networks: internal_networks.into_iter().collect(),
            external_addrs: external_addrs.into_iter().collect(),
        }
    }

    pub fn is_internal(&self, ip: Ipv4Addr) -> bool {
        self.internal_networks.iter().any(|net| net.contains(ip))
    }

    pub fn is_external(&self, ip: Ipv4Addr) -> bool {
        self.external_addrs.contains(&ip)
    }

    pub fn classify(&self, src: Socket, dst: Socket) -> Direction {
        let src_inside = self.is_internal(src.addr);
        let dst_inside = self.is_internal(dst.addr);

        if src_inside && !dst_inside {
            Direction::Outgoing
        } else if !src_inside && self.is_external(dst.addr) {
            Direction::Incoming
        } else {
            Direction::Local
        }
    }
}
