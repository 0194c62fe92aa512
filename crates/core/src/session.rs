//! Session lifecycle management.
//!
//! A session is a live client connection with identity and a last-active
//! timestamp. It is created when a connection is accepted and destroyed by
//! the manager on idle timeout, by the manager at shutdown, or by the
//! per-connection loop when a decode/encode fails.
//!
//! ```text
//! accept          -> Live
//! idle > 30s      -> Closed   (sweeper, publishes SessionTerminated)
//! codec failure   -> Closed   (connection loop, publishes SessionTerminated)
//! shutdown        -> Closed   (terminate_all, 5s budget)
//! ```
//!
//! `last-active` is an atomic millisecond counter so readers never take the
//! manager lock and never observe a torn value. The sweeper snapshots idle
//! sessions under the lock, releases it, and only then closes connections
//! and publishes events — the lock-order discipline that keeps the
//! player-service back-edge deadlock free.

use std::collections::HashMap;
use std::fmt;
use std::net::SocketAddr;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use crossbeam_channel::{Sender, bounded, select, tick};
use parking_lot::Mutex;
use uuid::Uuid;

use crate::error::{Error, Result};
use crate::events::{Event, EventBus};
use crate::transport::{Conn, TransportKind};

/// Sessions idle longer than this are evicted by the sweeper.
pub const DEFAULT_IDLE_TIMEOUT: Duration = Duration::from_secs(30);
/// Sweep cadence.
pub const DEFAULT_CHECK_INTERVAL: Duration = Duration::from_secs(1);

/// A live client connection.
pub struct Session {
    id: Uuid,
    conn: Box<dyn Conn>,
    created: Instant,
    last_active_ms: AtomicU64,
    closed: AtomicBool,
}

impl Session {
    pub fn new(conn: Box<dyn Conn>) -> Self {
        Session {
            id: Uuid::new_v4(),
            conn,
            created: Instant::now(),
            last_active_ms: AtomicU64::new(0),
            closed: AtomicBool::new(false),
        }
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn conn(&self) -> &dyn Conn {
        self.conn.as_ref()
    }

    pub fn kind(&self) -> TransportKind {
        self.conn.kind()
    }

    pub fn peer_addr(&self) -> Option<SocketAddr> {
        self.conn.peer_addr()
    }

    /// Mark the session active now. `fetch_max` keeps the timestamp
    /// monotonic under concurrent refreshes.
    pub fn refresh(&self) {
        let elapsed_ms = self.created.elapsed().as_millis() as u64;
        self.last_active_ms.fetch_max(elapsed_ms, Ordering::AcqRel);
    }

    /// Time since the last successful round-trip (or since accept, if none).
    pub fn idle_for(&self) -> Duration {
        let elapsed_ms = self.created.elapsed().as_millis() as u64;
        let last = self.last_active_ms.load(Ordering::Acquire);
        Duration::from_millis(elapsed_ms.saturating_sub(last))
    }

    /// Close the underlying connection. Only the first caller performs the
    /// close; later calls are no-ops.
    pub fn close(&self) -> std::io::Result<()> {
        if self.closed.swap(true, Ordering::SeqCst) {
            return Ok(());
        }
        self.conn.shutdown()
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }
}

impl fmt::Debug for Session {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Session")
            .field("id", &self.id)
            .field("peer", &self.conn.peer_addr())
            .field("transport", &self.conn.kind())
            .finish()
    }
}

/// Thread-safe registry of live sessions.
pub struct SessionManager {
    sessions: Mutex<HashMap<Uuid, Arc<Session>>>,
    closed: AtomicBool,
    idle_timeout: Duration,
    check_interval: Duration,
}

impl SessionManager {
    pub fn new() -> Self {
        Self::with_timeouts(DEFAULT_IDLE_TIMEOUT, DEFAULT_CHECK_INTERVAL)
    }

    /// A manager with custom sweep timing (tests use short intervals).
    pub fn with_timeouts(idle_timeout: Duration, check_interval: Duration) -> Self {
        SessionManager {
            sessions: Mutex::new(HashMap::new()),
            closed: AtomicBool::new(false),
            idle_timeout,
            check_interval,
        }
    }

    /// Register a session. Fails once shutdown has begun.
    pub fn add(&self, session: Arc<Session>) -> Result<()> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(Error::ManagerClosed);
        }

        let total = {
            let mut sessions = self.sessions.lock();
            sessions.insert(session.id(), Arc::clone(&session));
            sessions.len()
        };
        tracing::debug!(session_id = %session.id(), total_sessions = total, "session added");
        Ok(())
    }

    pub fn get(&self, id: Uuid) -> Option<Arc<Session>> {
        self.sessions.lock().get(&id).cloned()
    }

    /// Remove a session and close its connection. Returns false if it was
    /// already gone; double-termination is a no-op. The connection is closed
    /// outside the manager lock.
    pub fn terminate(&self, session: &Arc<Session>) -> bool {
        let removed = self.sessions.lock().remove(&session.id()).is_some();
        if removed {
            if let Err(e) = session.close() {
                tracing::debug!(session_id = %session.id(), error = %e, "closing session connection");
            }
            tracing::debug!(session_id = %session.id(), "session terminated");
        }
        removed
    }

    /// Terminate every session within `deadline`. Close errors aggregate and
    /// do not short-circuit; only the deadline does. No further sessions can
    /// be added afterwards.
    pub fn terminate_all(&self, deadline: Duration) -> Result<()> {
        self.closed.store(true, Ordering::SeqCst);
        let start = Instant::now();

        let drained: Vec<Arc<Session>> = {
            let mut sessions = self.sessions.lock();
            sessions.drain().map(|(_, s)| s).collect()
        };

        let total = drained.len();
        let mut closed = 0;
        for session in drained.iter() {
            if start.elapsed() > deadline {
                tracing::warn!(closed, total, "session drain deadline exceeded");
                return Err(Error::Drain { closed, total });
            }
            match session.close() {
                Ok(()) => closed += 1,
                Err(e) => {
                    tracing::debug!(session_id = %session.id(), error = %e, "closing session connection")
                }
            }
        }

        if closed < total {
            return Err(Error::Drain { closed, total });
        }
        Ok(())
    }

    pub fn count(&self) -> usize {
        self.sessions.lock().len()
    }

    /// Live connections on one transport, for the status snapshot.
    pub fn count_kind(&self, kind: TransportKind) -> usize {
        self.sessions.lock().values().filter(|s| s.kind() == kind).count()
    }

    /// One sweep pass: snapshot idle sessions, release the lock, then
    /// terminate and publish.
    pub fn sweep(&self, bus: &EventBus) {
        let expired: Vec<Arc<Session>> = self
            .sessions
            .lock()
            .values()
            .filter(|s| s.idle_for() >= self.idle_timeout)
            .cloned()
            .collect();

        for session in expired {
            if self.terminate(&session) {
                tracing::info!(
                    session_id = %session.id(),
                    idle = ?session.idle_for(),
                    "session evicted after idle timeout"
                );
                bus.publish(&Event::SessionTerminated(session));
            }
        }
    }

    /// Start the periodic idle sweeper.
    pub fn spawn_sweeper(self: &Arc<Self>, bus: Arc<EventBus>) -> Sweeper {
        let manager = Arc::clone(self);
        let (stop_tx, stop_rx) = bounded::<()>(1);
        let ticker = tick(self.check_interval);

        let handle = thread::spawn(move || {
            loop {
                select! {
                    recv(stop_rx) -> _ => break,
                    recv(ticker) -> _ => manager.sweep(&bus),
                }
            }
            tracing::debug!("session sweeper stopped");
        });

        Sweeper { stop_tx, handle }
    }
}

impl Default for SessionManager {
    fn default() -> Self {
        Self::new()
    }
}

/// Handle to the running sweeper thread.
pub struct Sweeper {
    stop_tx: Sender<()>,
    handle: JoinHandle<()>,
}

impl Sweeper {
    /// Stop the sweep loop and wait for it to exit.
    pub fn stop(self) {
        let _ = self.stop_tx.send(());
        let _ = self.handle.join();
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::AtomicUsize;

    use super::*;

    struct NullConn {
        closes: AtomicUsize,
    }

    impl NullConn {
        fn new() -> Self {
            NullConn { closes: AtomicUsize::new(0) }
        }
    }

    impl Conn for NullConn {
        fn read(&self, _buf: &mut [u8]) -> std::io::Result<usize> {
            Ok(0)
        }
        fn write_all(&self, _buf: &[u8]) -> std::io::Result<()> {
            Ok(())
        }
        fn shutdown(&self) -> std::io::Result<()> {
            self.closes.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
        fn peer_addr(&self) -> Option<SocketAddr> {
            None
        }
        fn kind(&self) -> TransportKind {
            TransportKind::Tcp
        }
    }

    fn new_session() -> Arc<Session> {
        Arc::new(Session::new(Box::new(NullConn::new())))
    }

    #[test]
    fn refresh_is_monotonic() {
        let session = new_session();
        session.refresh();
        let idle = session.idle_for();
        thread::sleep(Duration::from_millis(20));
        assert!(session.idle_for() >= idle);
        session.refresh();
        assert!(session.idle_for() < Duration::from_millis(20));
    }

    #[test]
    fn terminate_closes_exactly_once() {
        let manager = SessionManager::new();
        let session = new_session();
        manager.add(Arc::clone(&session)).unwrap();
        assert_eq!(manager.count(), 1);

        assert!(manager.terminate(&session));
        assert!(session.is_closed());
        assert!(!manager.terminate(&session));
        assert_eq!(manager.count(), 0);

        // close() again stays a no-op
        session.close().unwrap();
    }

    #[test]
    fn add_fails_after_terminate_all() {
        let manager = SessionManager::new();
        let session = new_session();
        manager.add(Arc::clone(&session)).unwrap();

        manager.terminate_all(Duration::from_secs(1)).unwrap();
        assert!(session.is_closed());
        assert!(matches!(manager.add(new_session()), Err(Error::ManagerClosed)));
        assert_eq!(manager.count(), 0);
    }

    #[test]
    fn sweep_evicts_idle_sessions_and_publishes() {
        let manager = Arc::new(SessionManager::with_timeouts(
            Duration::from_millis(50),
            Duration::from_millis(10),
        ));
        let bus = Arc::new(EventBus::new());
        let evicted = Arc::new(Mutex::new(Vec::new()));
        let log = Arc::clone(&evicted);
        bus.subscribe(move |Event::SessionTerminated(s)| log.lock().push(s.id()));

        let idle = new_session();
        let busy = new_session();
        manager.add(Arc::clone(&idle)).unwrap();
        manager.add(Arc::clone(&busy)).unwrap();

        let sweeper = manager.spawn_sweeper(Arc::clone(&bus));
        let deadline = Instant::now() + Duration::from_secs(5);
        while manager.get(idle.id()).is_some() && Instant::now() < deadline {
            busy.refresh();
            thread::sleep(Duration::from_millis(5));
        }
        sweeper.stop();

        assert!(manager.get(idle.id()).is_none(), "idle session not evicted");
        assert!(manager.get(busy.id()).is_some(), "busy session evicted");
        assert!(idle.is_closed());
        assert_eq!(evicted.lock().as_slice(), &[idle.id()]);
    }

    #[test]
    fn count_by_transport_kind() {
        let manager = SessionManager::new();
        manager.add(new_session()).unwrap();
        manager.add(new_session()).unwrap();
        assert_eq!(manager.count_kind(TransportKind::Tcp), 2);
        assert_eq!(manager.count_kind(TransportKind::Datagram), 0);
    }
}
