//! Connection acceptor and per-connection message loop.
//!
//! One server drives one listener. The accept loop polls the listener with
//! stop-flag checks between attempts and spawns an independent thread per
//! connection. Each connection thread owns the session for its lifetime:
//!
//! 1. Create a session, register it with the manager.
//! 2. Loop: decode a frame, run the middleware chain, encode the response,
//!    refresh the session's last-active timestamp.
//! 3. Any decode or encode failure breaks the loop.
//! 4. On exit, terminate the session (idempotent) and publish
//!    `SessionTerminated` if this thread actually removed it.
//!
//! Within one connection requests are strictly sequential, giving FIFO
//! request/response pairing per session. Across connections there is no
//! ordering.

use std::io;
use std::net::SocketAddr;
use std::sync::Arc;
use std::sync::atomic::{AtomicU8, Ordering};
use std::thread;
use std::time::Duration;

use crate::error::{Error, Result};
use crate::events::{Event, EventBus};
use crate::middleware::{Context, Handler};
use crate::proto::Message;
use crate::proto::codec::Codec;
use crate::session::{Session, SessionManager};
use crate::transport::{ConnReader, ConnWriter, Listener, POLL_INTERVAL, TransportKind};

/// Budget for terminating every live session during close.
pub const SHUTDOWN_DRAIN_TIMEOUT: Duration = Duration::from_secs(5);

const STATE_INITIAL: u8 = 0;
const STATE_STARTED: u8 = 1;
const STATE_STOPPED: u8 = 2;

/// A game protocol server bound to a single listener.
///
/// State machine: `Initial -> Started -> Stopped`; stopped is terminal.
/// Calling [`close`](Self::close) before [`serve`](Self::serve) makes a
/// later `serve` fail with [`Error::Closed`].
pub struct Server {
    listener: Box<dyn Listener>,
    handler: Handler,
    codec: Arc<Codec>,
    sessions: Arc<SessionManager>,
    bus: Arc<EventBus>,
    state: AtomicU8,
}

impl Server {
    pub fn new(
        listener: Box<dyn Listener>,
        handler: Handler,
        codec: Arc<Codec>,
        sessions: Arc<SessionManager>,
        bus: Arc<EventBus>,
    ) -> Self {
        Server { listener, handler, codec, sessions, bus, state: AtomicU8::new(STATE_INITIAL) }
    }

    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    pub fn kind(&self) -> TransportKind {
        self.listener.kind()
    }

    /// Run the accept loop on the calling thread until [`close`](Self::close).
    pub fn serve(&self) -> Result<()> {
        match self.state.compare_exchange(
            STATE_INITIAL,
            STATE_STARTED,
            Ordering::SeqCst,
            Ordering::SeqCst,
        ) {
            Ok(_) => {}
            Err(STATE_STOPPED) => return Err(Error::Closed),
            Err(_) => return Err(Error::AlreadyStarted),
        }

        tracing::info!(
            addr = ?self.listener.local_addr().ok(),
            transport = self.listener.kind().name(),
            "server listening"
        );

        while self.state.load(Ordering::SeqCst) == STATE_STARTED {
            match self.listener.accept() {
                Ok(conn) => {
                    let handler = Arc::clone(&self.handler);
                    let codec = Arc::clone(&self.codec);
                    let sessions = Arc::clone(&self.sessions);
                    let bus = Arc::clone(&self.bus);
                    thread::spawn(move || handle_connection(conn, handler, codec, sessions, bus));
                }
                Err(ref e) if e.kind() == io::ErrorKind::WouldBlock => {
                    thread::sleep(POLL_INTERVAL);
                }
                Err(e) => {
                    // a failed accept while stopping is expected; anything
                    // else is logged and the loop keeps serving
                    if self.state.load(Ordering::SeqCst) == STATE_STARTED {
                        tracing::warn!(error = %e, "accept error");
                        thread::sleep(POLL_INTERVAL);
                    } else {
                        break;
                    }
                }
            }
        }

        tracing::debug!(transport = self.listener.kind().name(), "accept loop exited");
        Ok(())
    }

    /// Stop accepting, close the listener, and terminate every session with
    /// a [`SHUTDOWN_DRAIN_TIMEOUT`] deadline. Idempotent.
    pub fn close(&self) -> Result<()> {
        if self.state.swap(STATE_STOPPED, Ordering::SeqCst) == STATE_STOPPED {
            return Ok(());
        }

        self.listener.shutdown();
        self.sessions.terminate_all(SHUTDOWN_DRAIN_TIMEOUT)
    }
}

type ConnBox = Box<dyn crate::transport::Conn>;

fn handle_connection(
    conn: ConnBox,
    handler: Handler,
    codec: Arc<Codec>,
    sessions: Arc<SessionManager>,
    bus: Arc<EventBus>,
) {
    let session = Arc::new(Session::new(conn));
    if sessions.add(Arc::clone(&session)).is_err() {
        // shutdown already began
        let _ = session.close();
        return;
    }

    tracing::debug!(
        session_id = %session.id(),
        peer = ?session.peer_addr(),
        transport = session.kind().name(),
        "client connected"
    );

    let reason = connection_loop(&session, &handler, &codec);

    if sessions.terminate(&session) {
        bus.publish(&Event::SessionTerminated(Arc::clone(&session)));
    }

    tracing::debug!(session_id = %session.id(), reason, "client disconnected");
}

/// Request/response loop. Returns the reason for exiting.
fn connection_loop(session: &Arc<Session>, handler: &Handler, codec: &Codec) -> &'static str {
    loop {
        let msg = match codec.decode(&mut ConnReader(session.conn())) {
            Ok(msg) => msg,
            Err(Error::Io(ref e)) if e.kind() == io::ErrorKind::UnexpectedEof => {
                return "connection closed by peer";
            }
            Err(e) => {
                tracing::debug!(session_id = %session.id(), error = %e, "decode failed");
                return "decode error";
            }
        };

        let msg_type = msg.msg_type;
        let ctx = Context::new(Arc::clone(session));
        let response = match handler(ctx, msg) {
            Ok(response) => response,
            Err(status) => Message::from_status_error(msg_type, &status),
        };

        if let Err(e) = codec.encode(&response, &mut ConnWriter(session.conn())) {
            tracing::debug!(session_id = %session.id(), error = %e, "encode failed");
            return "encode error";
        }

        session.refresh();
    }
}
