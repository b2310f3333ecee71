//! Address/port translation
//!
//! Socket pool, session table and the flow-level entry point that
//! classifies and rewrites flows crossing the translation boundary.

mod boundary;
mod pool;
mod processor;
mod session;
mod socket;

pub use boundary::{Boundary, Direction, Ipv4Cidr};
pub use pool::SocketPool;
pub use processor::{DropReason, FlowTuple, NatProcessor, NatProtocol, NatVerdict};
pub use session::{
    DEFAULT_IDLE_TIMEOUT_SECS, MappingStats, NatMappings, Session, SessionKey, SessionTable,
};
pub use socket::Socket;
