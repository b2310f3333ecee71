//! sdnat - session-based address/port translation
//!
//! The translation core of an SDN controller application: a pool of
//! external sockets, a session table that overloads them per
//! (internal socket, remote host), and the flow-level entry point that
//! decides whether a flow crosses the boundary and how to rewrite it.

pub mod config;
pub mod error;
pub mod event;
pub mod nat;
pub mod telemetry;

pub use error::{Error, Result};
