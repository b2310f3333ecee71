//! NAT session table
//!
//! Maps (internal socket, remote address) to an external socket taken from
//! the [`SocketPool`]. All connections from one internal socket to one
//! remote host share the external socket; the remote ports seen on that
//! session are tracked individually and expire after the idle timeout.

use super::{Socket, SocketPool};
use crate::Result;
use std::collections::HashMap;
use std::fmt;
use std::net::Ipv4Addr;
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};
use tracing::debug;

/// Default idle timeout in seconds
pub const DEFAULT_IDLE_TIMEOUT_SECS: u64 = 15;

/// Session key: internal socket + remote address (remote port excluded)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SessionKey {
    pub internal: Socket,
    pub remote_addr: Ipv4Addr,
}

impl SessionKey {
    pub fn new(internal: Socket, remote_addr: Ipv4Addr) -> Self {
        Self {
            internal,
            remote_addr,
        }
    }
}

/// Session entry
#[derive(Debug, Clone)]
pub struct Session {
    /// Assigned external socket, fixed for the session's lifetime
    pub external: Socket,
    /// Remote port -> last outgoing activity
    activity: HashMap<u16, Instant>,
    /// Entry creation time (for debugging/logging)
    pub created_at: Instant,
}

impl Session {
    fn new(external: Socket, now: Instant) -> Self {
        Self {
            external,
            activity: HashMap::new(),
            created_at: now,
        }
    }

    fn touch(&mut self, remote_port: u16, now: Instant) {
        self.activity.insert(remote_port, now);
    }

    /// Drop expired records. Returns whether the session is still valid.
    fn prune(&mut self, now: Instant, timeout: Duration) -> bool {
        self.activity
            .retain(|_, last| now.saturating_duration_since(*last) < timeout);
        !self.activity.is_empty()
    }

    pub fn has_port(&self, remote_port: u16) -> bool {
        self.activity.contains_key(&remote_port)
    }

    /// Remote ports with a record, sorted
    pub fn ports(&self) -> Vec<u16> {
        let mut ports: Vec<u16> = self.activity.keys().copied().collect();
        ports.sort_unstable();
        ports
    }
}

/// Session table and the pool it allocates from.
///
/// Not synchronized; wrap in [`NatMappings`] to share between threads.
pub struct SessionTable {
    /// Key -> Session (outgoing lookup)
    sessions: HashMap<SessionKey, Session>,
    /// External socket -> Key (incoming lookup)
    by_external: HashMap<Socket, SessionKey>,
    pool: SocketPool,
    timeout: Duration,
}

impl SessionTable {
    pub fn new(pool: SocketPool, timeout: Duration) -> Self {
        Self {
            sessions: HashMap::new(),
            by_external: HashMap::new(),
            pool,
            timeout,
        }
    }

    /// Translate an outgoing flow, creating the session on first use.
    pub fn process_outgoing(&mut self, internal: Socket, remote: Socket) -> Result<Socket> {
        self.process_outgoing_at(internal, remote, Instant::now())
    }

    pub fn process_outgoing_at(
        &mut self,
        internal: Socket,
        remote: Socket,
        now: Instant,
    ) -> Result<Socket> {
        let key = SessionKey::new(internal, remote.addr);

        if let Some(session) = self.sessions.get_mut(&key) {
            if session.prune(now, self.timeout) {
                session.touch(remote.port, now);
                return Ok(session.external);
            }
            self.evict(&key);
        }

        // Nothing is recorded unless the pool can supply a socket
        let external = self.pool.issue()?;

        let mut session = Session::new(external, now);
        session.touch(remote.port, now);
        self.by_external.insert(external, key);
        self.sessions.insert(key, session);

        debug!(
            "New session {} -> {} via {} ({} free)",
            internal,
            remote.addr,
            external,
            self.pool.free()
        );

        Ok(external)
    }

    /// Find the internal socket for an incoming flow.
    ///
    /// Activity is not refreshed. A fully expired session found here is
    /// evicted and its socket returned to the pool.
    pub fn process_incoming(&mut self, remote: Socket, external: Socket) -> Option<Socket> {
        self.process_incoming_at(remote, external, Instant::now())
    }

    pub fn process_incoming_at(
        &mut self,
        remote: Socket,
        external: Socket,
        now: Instant,
    ) -> Option<Socket> {
        let key = *self.by_external.get(&external)?;
        let session = self.sessions.get_mut(&key)?;

        if !session.prune(now, self.timeout) {
            self.evict(&key);
            return None;
        }

        if key.remote_addr == remote.addr && session.has_port(remote.port) {
            Some(key.internal)
        } else {
            None
        }
    }

    /// Evict every session without an unexpired record.
    ///
    /// Returns the number of sessions removed.
    pub fn sweep_expired(&mut self) -> usize {
        self.sweep_expired_at(Instant::now())
    }

    pub fn sweep_expired_at(&mut self, now: Instant) -> usize {
        let timeout = self.timeout;
        let expired: Vec<SessionKey> = self
            .sessions
            .iter_mut()
            .filter_map(|(key, session)| (!session.prune(now, timeout)).then_some(*key))
            .collect();

        for key in &expired {
            self.evict(key);
        }

        expired.len()
    }

    /// Remove a session and give its socket back to the pool.
    fn evict(&mut self, key: &SessionKey) -> Option<Session> {
        let session = self.sessions.remove(key)?;
        self.by_external.remove(&session.external);
        self.pool.release(session.external);

        debug!(
            "Session {} -> {} expired, releasing {}",
            key.internal, key.remote_addr, session.external
        );

        Some(session)
    }

    pub fn get(&self, key: &SessionKey) -> Option<&Session> {
        self.sessions.get(key)
    }

    /// Internal side of the session holding an external socket
    pub fn owner_of(&self, external: &Socket) -> Option<SessionKey> {
        self.by_external.get(external).copied()
    }

    pub fn pool(&self) -> &SocketPool {
        &self.pool
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Get number of sessions (including expired ones not yet swept)
    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }

    pub fn stats(&self) -> MappingStats {
        MappingStats {
            sessions: self.sessions.len(),
            free_sockets: self.pool.free(),
            capacity: self.pool.capacity(),
        }
    }
}

impl fmt::Display for SessionTable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "{}", self.pool)?;
        writeln!(f, "sessions ({}):", self.sessions.len())?;

        let mut keys: Vec<&SessionKey> = self.sessions.keys().collect();
        keys.sort();
        for key in keys {
            let session = &self.sessions[key];
            writeln!(
                f,
                "  {} -> {} via {} ports {:?}",
                key.internal,
                key.remote_addr,
                session.external,
                session.ports()
            )?;
        }
        Ok(())
    }
}

/// Point-in-time table counters
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct MappingStats {
    pub sessions: usize,
    pub free_sockets: usize,
    pub capacity: usize,
}

/// Session table shared between the packet path and the sweep timer.
///
/// Every operation holds one table-wide lock for its whole duration, so a
/// socket is never seen issued without its session, or a session removed
/// without its socket released.
pub struct NatMappings {
    table: Mutex<SessionTable>,
}

impl NatMappings {
    pub fn new(table: SessionTable) -> Self {
        Self {
            table: Mutex::new(table),
        }
    }

    pub fn with_pool(pool: SocketPool, timeout: Duration) -> Self {
        Self::new(SessionTable::new(pool, timeout))
    }

    // Operations never leave the table half-updated, so a poisoned lock
    // still guards a consistent table.
    fn lock(&self) -> MutexGuard<'_, SessionTable> {
        self.table.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn process_outgoing(&self, internal: Socket, remote: Socket) -> Result<Socket> {
        self.lock().process_outgoing(internal, remote)
    }

    pub fn process_outgoing_at(
        &self,
        internal: Socket,
        remote: Socket,
        now: Instant,
    ) -> Result<Socket> {
        self.lock().process_outgoing_at(internal, remote, now)
    }

    pub fn process_incoming(&self, remote: Socket, external: Socket) -> Option<Socket> {
        self.lock().process_incoming(remote, external)
    }

    pub fn process_incoming_at(
        &self,
        remote: Socket,
        external: Socket,
        now: Instant,
    ) -> Option<Socket> {
        self.lock().process_incoming_at(remote, external, now)
    }

    pub fn sweep_expired(&self) -> usize {
        self.lock().sweep_expired()
    }

    pub fn sweep_expired_at(&self, now: Instant) -> usize {
        self.lock().sweep_expired_at(now)
    }

    pub fn stats(&self) -> MappingStats {
        self.lock().stats()
    }

    pub fn timeout(&self) -> Duration {
        self.lock().timeout()
    }

    /// Text dump of pool and sessions, for diagnostics only
    pub fn dump(&self) -> String {
        self.lock().to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Error;
    use std::collections::HashSet;

    const TIMEOUT: Duration = Duration::from_secs(DEFAULT_IDLE_TIMEOUT_SECS);

    fn sock(a: u8, b: u8, c: u8, d: u8, port: u16) -> Socket {
        Socket::new(Ipv4Addr::new(a, b, c, d), port)
    }

    fn make_table(ports: &[u16]) -> SessionTable {
        let pool = SocketPool::new([Ipv4Addr::new(10, 0, 0, 1)], ports.iter().copied());
        SessionTable::new(pool, TIMEOUT)
    }

    /// Index, primary map and pool agree with each other
    fn assert_consistent(table: &SessionTable) {
        assert_eq!(table.sessions.len(), table.by_external.len());

        let mut assigned = HashSet::new();
        for (key, session) in &table.sessions {
            assert!(assigned.insert(session.external), "socket shared");
            assert_eq!(table.by_external.get(&session.external), Some(key));
            assert!(!table.pool.is_free(&session.external));
        }
        assert_eq!(
            table.pool.free() + assigned.len(),
            table.pool.capacity(),
            "pool not conserved"
        );
    }

    #[test]
    fn test_new_table_empty() {
        let table = make_table(&[2000, 2001]);
        assert!(table.is_empty());
        assert_eq!(table.timeout(), TIMEOUT);
        assert_eq!(table.pool().free(), 2);
    }

    #[test]
    fn test_create_session() {
        let mut table = make_table(&[2000, 2001]);
        let t0 = Instant::now();

        let ext = table
            .process_outgoing_at(sock(192, 168, 0, 5, 9000), sock(8, 8, 8, 8, 80), t0)
            .unwrap();

        assert_eq!(ext, sock(10, 0, 0, 1, 2000));
        assert_eq!(table.len(), 1);
        assert_eq!(table.pool().free(), 1);
        let key = SessionKey::new(sock(192, 168, 0, 5, 9000), Ipv4Addr::new(8, 8, 8, 8));
        assert_eq!(table.get(&key).unwrap().ports(), vec![80]);
        assert_eq!(table.owner_of(&ext), Some(key));
        assert_consistent(&table);
    }

    #[test]
    fn test_same_remote_host_shares_socket() {
        let mut table = make_table(&[2000, 2001]);
        let t0 = Instant::now();
        let internal = sock(192, 168, 0, 5, 9000);

        let e1 = table
            .process_outgoing_at(internal, sock(8, 8, 8, 8, 80), t0)
            .unwrap();
        let e2 = table
            .process_outgoing_at(internal, sock(8, 8, 8, 8, 443), t0)
            .unwrap();

        assert_eq!(e1, e2);
        assert_eq!(table.len(), 1);
        assert_eq!(table.pool().free(), 1);
        assert_consistent(&table);
    }

    #[test]
    fn test_different_remote_hosts_isolated() {
        let mut table = make_table(&[2000, 2001]);
        let t0 = Instant::now();
        let internal = sock(192, 168, 0, 5, 9000);

        let e1 = table
            .process_outgoing_at(internal, sock(8, 8, 8, 8, 53), t0)
            .unwrap();
        let e2 = table
            .process_outgoing_at(internal, sock(8, 8, 4, 4, 53), t0)
            .unwrap();

        assert_ne!(e1, e2);
        assert_eq!(table.len(), 2);
        assert_consistent(&table);
    }

    #[test]
    fn test_different_internal_sockets_isolated() {
        let mut table = make_table(&[2000, 2001]);
        let t0 = Instant::now();
        let remote = sock(77, 37, 250, 168, 80);

        let e1 = table
            .process_outgoing_at(sock(192, 168, 1, 1, 9000), remote, t0)
            .unwrap();
        let e2 = table
            .process_outgoing_at(sock(192, 168, 1, 2, 9000), remote, t0)
            .unwrap();

        assert_ne!(e1, e2);
    }

    #[test]
    fn test_incoming_roundtrip() {
        let mut table = make_table(&[2000]);
        let t0 = Instant::now();
        let internal = sock(192, 168, 0, 5, 9000);
        let remote = sock(8, 8, 8, 8, 80);

        let ext = table.process_outgoing_at(internal, remote, t0).unwrap();
        assert_eq!(table.process_incoming_at(remote, ext, t0), Some(internal));
    }

    #[test]
    fn test_incoming_requires_matching_remote() {
        let mut table = make_table(&[2000]);
        let t0 = Instant::now();
        let internal = sock(192, 168, 0, 5, 9000);
        let ext = table
            .process_outgoing_at(internal, sock(8, 8, 8, 8, 80), t0)
            .unwrap();

        // Unknown remote port on a known host
        assert_eq!(
            table.process_incoming_at(sock(8, 8, 8, 8, 8080), ext, t0),
            None
        );
        // Other host
        assert_eq!(table.process_incoming_at(sock(1, 1, 1, 1, 80), ext, t0), None);
        // Socket not assigned
        assert_eq!(
            table.process_incoming_at(sock(8, 8, 8, 8, 80), sock(10, 0, 0, 1, 2999), t0),
            None
        );
        // Still there for the right peer
        assert_eq!(
            table.process_incoming_at(sock(8, 8, 8, 8, 80), ext, t0),
            Some(internal)
        );
    }

    #[test]
    fn test_incoming_does_not_refresh() {
        let mut table = make_table(&[2000]);
        let t0 = Instant::now();
        let internal = sock(192, 168, 0, 5, 9000);
        let remote = sock(8, 8, 8, 8, 80);
        let ext = table.process_outgoing_at(internal, remote, t0).unwrap();

        let t10 = t0 + Duration::from_secs(10);
        assert_eq!(table.process_incoming_at(remote, ext, t10), Some(internal));

        let t16 = t0 + Duration::from_secs(16);
        assert_eq!(table.process_incoming_at(remote, ext, t16), None);
    }

    #[test]
    fn test_incoming_evicts_expired_session() {
        let mut table = make_table(&[2000]);
        let t0 = Instant::now();
        let remote = sock(8, 8, 8, 8, 80);
        let ext = table
            .process_outgoing_at(sock(192, 168, 0, 5, 9000), remote, t0)
            .unwrap();

        let later = t0 + TIMEOUT;
        assert_eq!(table.process_incoming_at(remote, ext, later), None);
        assert!(table.is_empty());
        assert!(table.pool().is_free(&ext));
        assert_consistent(&table);
    }

    #[test]
    fn test_timeout_boundary() {
        let mut table = make_table(&[2000]);
        let t0 = Instant::now();
        let internal = sock(192, 168, 0, 5, 9000);
        let remote = sock(8, 8, 8, 8, 80);
        let ext = table.process_outgoing_at(internal, remote, t0).unwrap();

        let just_before = t0 + TIMEOUT - Duration::from_millis(1);
        assert_eq!(
            table.process_incoming_at(remote, ext, just_before),
            Some(internal)
        );
        assert_eq!(table.process_incoming_at(remote, ext, t0 + TIMEOUT), None);
    }

    #[test]
    fn test_per_port_expiry() {
        let mut table = make_table(&[2000]);
        let t0 = Instant::now();
        let internal = sock(192, 168, 0, 5, 9000);
        let ext = table
            .process_outgoing_at(internal, sock(8, 8, 8, 8, 80), t0)
            .unwrap();
        let t10 = t0 + Duration::from_secs(10);
        table
            .process_outgoing_at(internal, sock(8, 8, 8, 8, 443), t10)
            .unwrap();

        // Port 80 idle for 20s, port 443 for 10s
        let t20 = t0 + Duration::from_secs(20);
        assert_eq!(
            table.process_incoming_at(sock(8, 8, 8, 8, 80), ext, t20),
            None
        );
        assert_eq!(
            table.process_incoming_at(sock(8, 8, 8, 8, 443), ext, t20),
            Some(internal)
        );

        let key = SessionKey::new(internal, Ipv4Addr::new(8, 8, 8, 8));
        assert_eq!(table.get(&key).unwrap().ports(), vec![443]);
    }

    #[test]
    fn test_refresh_keeps_session_alive() {
        let mut table = make_table(&[2000]);
        let t0 = Instant::now();
        let internal = sock(192, 168, 0, 5, 9000);
        let remote = sock(8, 8, 8, 8, 80);

        let ext = table.process_outgoing_at(internal, remote, t0).unwrap();
        let t10 = t0 + Duration::from_secs(10);
        assert_eq!(table.process_outgoing_at(internal, remote, t10).unwrap(), ext);

        let t20 = t0 + Duration::from_secs(20);
        assert_eq!(table.sweep_expired_at(t20), 0);
        assert_eq!(table.process_incoming_at(remote, ext, t20), Some(internal));
    }

    #[test]
    fn test_outgoing_replaces_expired_session() {
        let mut table = make_table(&[2000, 2001]);
        let t0 = Instant::now();
        let internal = sock(192, 168, 0, 5, 9000);
        let remote = sock(8, 8, 8, 8, 80);
        let first = table.process_outgoing_at(internal, remote, t0).unwrap();

        let t30 = t0 + Duration::from_secs(30);
        let second = table.process_outgoing_at(internal, remote, t30).unwrap();

        // Old socket went back to the pool before the new one was issued
        assert_eq!(first, second);
        assert_eq!(table.len(), 1);
        assert_eq!(table.pool().free(), 1);
        assert_consistent(&table);
    }

    #[test]
    fn test_sweep_expired() {
        let mut table = make_table(&[2000, 2001, 2002]);
        let t0 = Instant::now();
        let t10 = t0 + Duration::from_secs(10);

        table
            .process_outgoing_at(sock(192, 168, 1, 1, 9000), sock(77, 37, 250, 168, 80), t0)
            .unwrap();
        table
            .process_outgoing_at(sock(192, 168, 1, 1, 9000), sock(77, 37, 250, 169, 80), t0)
            .unwrap();
        table
            .process_outgoing_at(sock(192, 168, 1, 2, 9000), sock(77, 37, 250, 168, 80), t10)
            .unwrap();
        assert_eq!(table.pool().free(), 0);

        let t20 = t0 + Duration::from_secs(20);
        assert_eq!(table.sweep_expired_at(t20), 2);
        assert_eq!(table.len(), 1);
        assert_eq!(table.pool().free(), 2);
        assert_consistent(&table);

        let t40 = t0 + Duration::from_secs(40);
        assert_eq!(table.sweep_expired_at(t40), 1);
        assert!(table.is_empty());
        assert_eq!(table.pool().free(), 3);
    }

    #[test]
    fn test_pool_exhausted_leaves_no_trace() {
        let mut table = make_table(&[2000]);
        let t0 = Instant::now();
        table
            .process_outgoing_at(sock(192, 168, 0, 5, 9000), sock(8, 8, 8, 8, 80), t0)
            .unwrap();

        let result =
            table.process_outgoing_at(sock(192, 168, 0, 5, 9000), sock(8, 8, 4, 4, 80), t0);
        assert!(matches!(result, Err(Error::PoolExhausted { capacity: 1 })));
        assert_eq!(table.len(), 1);
        assert_consistent(&table);

        // Existing sessions keep working while exhausted
        assert!(
            table
                .process_outgoing_at(sock(192, 168, 0, 5, 9000), sock(8, 8, 8, 8, 443), t0)
                .is_ok()
        );
    }

    #[test]
    fn test_empty_pool_rejects_everything() {
        let pool = SocketPool::new(Vec::new(), Vec::new());
        let mut table = SessionTable::new(pool, TIMEOUT);
        assert!(
            table
                .process_outgoing(sock(192, 168, 0, 5, 9000), sock(8, 8, 8, 8, 80))
                .is_err()
        );
        assert!(table.is_empty());
    }

    #[test]
    fn test_display_dump() {
        let mut table = make_table(&[2000, 2001]);
        let t0 = Instant::now();
        let internal = sock(192, 168, 0, 5, 9000);
        table
            .process_outgoing_at(internal, sock(8, 8, 8, 8, 443), t0)
            .unwrap();
        table
            .process_outgoing_at(internal, sock(8, 8, 8, 8, 80), t0)
            .unwrap();

        let dump = table.to_string();
        assert!(dump.contains("pool 1/2 free"));
        assert!(dump.contains("192.168.0.5:9000 -> 8.8.8.8 via 10.0.0.1:2000 ports [80, 443]"));
    }

    #[test]
    fn test_shared_mappings_stats() {
        let mappings = NatMappings::with_pool(
            SocketPool::new([Ipv4Addr::new(10, 0, 0, 1)], [2000, 2001]),
            TIMEOUT,
        );
        let t0 = Instant::now();
        mappings
            .process_outgoing_at(sock(192, 168, 0, 5, 9000), sock(8, 8, 8, 8, 80), t0)
            .unwrap();

        assert_eq!(
            mappings.stats(),
            MappingStats {
                sessions: 1,
                free_sockets: 1,
                capacity: 2,
            }
        );
        assert_eq!(mappings.sweep_expired_at(t0 + TIMEOUT), 1);
        assert_eq!(mappings.stats().free_sockets, 2);
    }
}
