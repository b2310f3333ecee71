//! Address/port pair used on every side of the translation boundary

use crate::{Error, Result};
use std::fmt;
use std::net::{Ipv4Addr, SocketAddrV4};
use std::str::FromStr;

/// IPv4 address + port.
///
/// Ordered by address first, then port, so pools can be kept in ordered
/// sets and hand out the smallest free socket deterministically.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Socket {
    pub addr: Ipv4Addr,
    pub port: u16,
}

impl Socket {
    pub const fn new(addr: Ipv4Addr, port: u16) -> Self {
        Self { addr, port }
    }
}

impl fmt::Display for Socket {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.addr, self.port)
    }
}

impl FromStr for Socket {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        let (addr, port) = s
            .rsplit_once(':')
            .ok_or_else(|| Error::Parse(format!("socket '{}' missing ':port'", s)))?;
        let addr: Ipv4Addr = addr
            .parse()
            .map_err(|_| Error::Parse(format!("invalid IPv4 address '{}'", addr)))?;
        let port: u16 = port
            .parse()
            .map_err(|_| Error::Parse(format!("invalid port '{}'", port)))?;
        Ok(Self { addr, port })
    }
}

impl From<SocketAddrV4> for Socket {
    fn from(sa: SocketAddrV4) -> Self {
        Self::new(*sa.ip(), sa.port())
    }
}

impl From<Socket> for SocketAddrV4 {
    fn from(s: Socket) -> Self {
        SocketAddrV4::new(s.addr, s.port)
    }
}
