//! Flow translation entry point
//!
//! Classifies a flow against the [`Boundary`] and rewrites it through the
//! shared [`NatMappings`]. Packet parsing and rewriting on the wire is the
//! caller's job; this works on the address/port fields only.

use super::{Boundary, Direction, NatMappings, Socket};
use crate::telemetry::MetricsRegistry;
use std::fmt;
use std::sync::Arc;
use tracing::{debug, trace, warn};

/// Protocols with ports, the only ones that can be translated
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum NatProtocol {
    Tcp,
    Udp,
}

impl NatProtocol {
    pub fn from_u8(value: u8) -> Option<Self> {
        match value {
            6 => Some(NatProtocol::Tcp),
            17 => Some(NatProtocol::Udp),
            _ => None,
        }
    }

    pub fn as_u8(self) -> u8 {
        match self {
            NatProtocol::Tcp => 6,
            NatProtocol::Udp => 17,
        }
    }
}

impl fmt::Display for NatProtocol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            NatProtocol::Tcp => write!(f, "tcp"),
            NatProtocol::Udp => write!(f, "udp"),
        }
    }
}

/// Address/port fields of a flow's first packet
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct FlowTuple {
    pub src: Socket,
    pub dst: Socket,
    pub protocol: NatProtocol,
}

impl FlowTuple {
    pub fn new(src: Socket, dst: Socket, protocol: NatProtocol) -> Self {
        Self { src, dst, protocol }
    }
}

impl fmt::Display for FlowTuple {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {} -> {}", self.protocol, self.src, self.dst)
    }
}

/// Why a flow must be dropped
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DropReason {
    /// Outgoing flow needed a new session but no external socket is free
    PoolExhausted,
    /// Incoming flow matches no valid session
    NoMapping,
}

impl fmt::Display for DropReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DropReason::PoolExhausted => write!(f, "pool exhausted"),
            DropReason::NoMapping => write!(f, "no mapping"),
        }
    }
}

/// Result of NAT processing
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NatVerdict {
    /// Rewrite the flow to these fields
    Translated { flow: FlowTuple },
    /// Flow does not cross the boundary, forward unchanged
    PassThrough,
    /// Drop the packet
    Drop(DropReason),
    /// Protocol has no ports to translate
    Unsupported,
}

impl fmt::Display for NatVerdict {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            NatVerdict::Translated { flow } => write!(f, "translate {}", flow),
            NatVerdict::PassThrough => write!(f, "pass"),
            NatVerdict::Drop(reason) => write!(f, "drop ({})", reason),
            NatVerdict::Unsupported => write!(f, "unsupported"),
        }
    }
}

/// NAT processor combining boundary, session table and metrics
pub struct NatProcessor {
    boundary: Boundary,
    mappings: Arc<NatMappings>,
    metrics: Arc<MetricsRegistry>,
}

impl NatProcessor {
    pub fn new(
        boundary: Boundary,
        mappings: Arc<NatMappings>,
        metrics: Arc<MetricsRegistry>,
    ) -> Self {
        Self {
            boundary,
            mappings,
            metrics,
        }
    }

    pub fn mappings(&self) -> &Arc<NatMappings> {
        &self.mappings
    }

    pub fn metrics(&self) -> &Arc<MetricsRegistry> {
        &self.metrics
    }

    /// Process a flow identified by raw IP protocol number
    pub fn process_raw(&self, src: Socket, dst: Socket, ip_protocol: u8) -> NatVerdict {
        match NatProtocol::from_u8(ip_protocol) {
            Some(protocol) => self.process(&FlowTuple::new(src, dst, protocol)),
            None => {
                if self.boundary.classify(src, dst) == Direction::Local {
                    self.metrics.passthrough.inc();
                    return NatVerdict::PassThrough;
                }
                self.metrics.unsupported.inc();
                NatVerdict::Unsupported
            }
        }
    }

    pub fn process(&self, flow: &FlowTuple) -> NatVerdict {
        match self.boundary.classify(flow.src, flow.dst) {
            Direction::Outgoing => self.translate_outgoing(flow),
            Direction::Incoming => self.translate_incoming(flow),
            Direction::Local => {
                self.metrics.passthrough.inc();
                NatVerdict::PassThrough
            }
        }
    }

    /// Internal -> outside: rewrite the source
    fn translate_outgoing(&self, flow: &FlowTuple) -> NatVerdict {
        match self.mappings.process_outgoing(flow.src, flow.dst) {
            Ok(external) => {
                self.metrics.outgoing.record_translated();
                NatVerdict::Translated {
                    flow: FlowTuple {
                        src: external,
                        ..*flow
                    },
                }
            }
            // The table fails only when it cannot issue a socket
            Err(e) => {
                warn!("Dropping {}: {}", flow, e);
                self.metrics.outgoing.record_dropped();
                self.metrics.pool_exhausted.inc();
                NatVerdict::Drop(DropReason::PoolExhausted)
            }
        }
    }

    /// Outside -> external socket: rewrite the destination
    fn translate_incoming(&self, flow: &FlowTuple) -> NatVerdict {
        match self.mappings.process_incoming(flow.src, flow.dst) {
            Some(internal) => {
                self.metrics.incoming.record_translated();
                NatVerdict::Translated {
                    flow: FlowTuple {
                        dst: internal,
                        ..*flow
                    },
                }
            }
            None => {
                debug!("No mapping for {}", flow);
                self.metrics.incoming.record_dropped();
                self.metrics.no_mapping.inc();
                NatVerdict::Drop(DropReason::NoMapping)
            }
        }
    }

    /// Run periodic maintenance (sweep expired sessions)
    pub fn run_maintenance(&self) {
        let expired = self.mappings.sweep_expired();
        self.metrics.sessions_expired.add(expired as u64);

        let stats = self.mappings.stats();
        self.metrics.set_table_stats(&stats);

        if expired > 0 {
            debug!(
                "Swept {} expired sessions, {} active, {}/{} sockets free",
                expired, stats.sessions, stats.free_sockets, stats.capacity
            );
        }
        trace!("NAT table:\n{}", self.mappings.dump());
    }
}
