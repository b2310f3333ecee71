//! Translation metrics.
//!
//! Thread-safe counters for verdicts on each side of the boundary and
//! gauges mirroring the session table after each maintenance run.

use crate::nat::MappingStats;
use std::sync::atomic::{AtomicU64, Ordering};

/// Atomic counter for thread-safe increment operations.
#[derive(Debug, Default)]
pub struct Counter(AtomicU64);

impl Counter {
    /// Creates a new counter initialized to zero.
    pub fn new() -> Self {
        Self(AtomicU64::new(0))
    }

    /// Increments the counter by 1.
    pub fn inc(&self) {
        self.0.fetch_add(1, Ordering::Relaxed);
    }

    /// Adds a value to the counter.
    pub fn add(&self, val: u64) {
        self.0.fetch_add(val, Ordering::Relaxed);
    }

    /// Gets the current value of the counter.
    pub fn get(&self) -> u64 {
        self.0.load(Ordering::Relaxed)
    }
}

/// Verdict counts for one crossing direction.
#[derive(Debug, Default)]
pub struct DirectionStats {
    /// Flows rewritten.
    pub translated: Counter,
    /// Flows the caller was told to drop.
    pub dropped: Counter,
}

impl DirectionStats {
    pub fn record_translated(&self) {
        self.translated.inc();
    }

    pub fn record_dropped(&self) {
        self.dropped.inc();
    }
}

/// Global metrics registry for the translator.
#[derive(Debug, Default)]
pub struct MetricsRegistry {
    /// Internal -> outside flows.
    pub outgoing: DirectionStats,
    /// Outside -> external pool address flows.
    pub incoming: DirectionStats,

    // Drop reasons
    /// New session refused, no free external socket.
    pub pool_exhausted: Counter,
    /// Incoming flow without a valid session.
    pub no_mapping: Counter,

    /// Flows not crossing the boundary.
    pub passthrough: Counter,
    /// Flows of a protocol without ports.
    pub unsupported: Counter,
    /// Sessions removed by the periodic sweep.
    pub sessions_expired: Counter,

    // Gauges, refreshed by maintenance
    pub active_sessions: AtomicU64,
    pub free_sockets: AtomicU64,
    pub pool_capacity: AtomicU64,
}

impl MetricsRegistry {
    /// Creates a new metrics registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Updates the table gauges.
    pub fn set_table_stats(&self, stats: &MappingStats) {
        self.active_sessions
            .store(stats.sessions as u64, Ordering::Relaxed);
        self.free_sockets
            .store(stats.free_sockets as u64, Ordering::Relaxed);
        self.pool_capacity
            .store(stats.capacity as u64, Ordering::Relaxed);
    }

    /// Exports all metrics as key-value pairs.
    pub fn export(&self) -> Vec<(String, u64)> {
        vec![
            ("outgoing_translated".into(), self.outgoing.translated.get()),
            ("outgoing_dropped".into(), self.outgoing.dropped.get()),
            ("incoming_translated".into(), self.incoming.translated.get()),
            ("incoming_dropped".into(), self.incoming.dropped.get()),
            ("pool_exhausted".into(), self.pool_exhausted.get()),
            ("no_mapping".into(), self.no_mapping.get()),
            ("passthrough".into(), self.passthrough.get()),
            ("unsupported".into(), self.unsupported.get()),
            ("sessions_expired".into(), self.sessions_expired.get()),
            (
                "active_sessions".into(),
                self.active_sessions.load(Ordering::Relaxed),
            ),
            (
                "free_sockets".into(),
                self.free_sockets.load(Ordering::Relaxed),
            ),
            (
                "pool_capacity".into(),
                self.pool_capacity.load(Ordering::Relaxed),
            ),
        ]
    }
}
