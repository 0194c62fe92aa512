//! Reliable, ordered byte streams over UDP.
//!
//! Conversations are identified by a `(peer address, conversation id)` pair,
//! KCP style. Each segment is `[conv: u32 BE][cmd: u8][seq: u32 BE][payload]`
//! with three commands:
//!
//! - `PUSH` — payload bytes at sequence `seq`; retransmitted until acked.
//! - `ACK`  — cumulative: `seq` is the next sequence the sender expects.
//! - `FIN`  — the peer closed the conversation. Not retransmitted; a lost
//!   FIN is recovered by the retry cap and the session idle sweep.
//!
//! A single demultiplexing thread per listener owns the socket read side and
//! the reorder state; it also runs retransmit housekeeping on the
//! [`POLL_INTERVAL`] cadence. Writers stamp sequence numbers and transmit
//! directly on the shared socket.
//!
//! The stream a conversation presents is indistinguishable from TCP to the
//! framing codec above it.

use std::collections::{BTreeMap, HashMap, VecDeque};
use std::io;
use std::net::{SocketAddr, ToSocketAddrs, UdpSocket};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;
use std::time::{Duration, Instant};

use crossbeam_channel::{Receiver, RecvTimeoutError, Sender, unbounded};
use parking_lot::Mutex;
use rand::RngExt;

use crate::error::{Error, Result};
use crate::transport::{Conn, Listener, POLL_INTERVAL, TransportKind, normalize_endpoint};

const CMD_PUSH: u8 = 1;
const CMD_ACK: u8 = 2;
const CMD_FIN: u8 = 3;

const HEADER_LEN: usize = 9;
/// Segment payload bound, conservatively under the common 1500-byte MTU.
const MAX_SEGMENT_PAYLOAD: usize = 1200;
const MAX_DATAGRAM: usize = 2048;

const RESEND_TIMEOUT: Duration = Duration::from_millis(250);
const MAX_RETRIES: u32 = 20;
/// Bound on buffered out-of-order segments per conversation.
const MAX_PENDING_SEGMENTS: usize = 1024;

fn parse_segment(buf: &[u8]) -> Option<(u32, u8, u32, &[u8])> {
    if buf.len() < HEADER_LEN {
        return None;
    }
    let conv = u32::from_be_bytes([buf[0], buf[1], buf[2], buf[3]]);
    let cmd = buf[4];
    let seq = u32::from_be_bytes([buf[5], buf[6], buf[7], buf[8]]);
    Some((conv, cmd, seq, &buf[HEADER_LEN..]))
}

fn would_block(e: &io::Error) -> bool {
    matches!(e.kind(), io::ErrorKind::WouldBlock | io::ErrorKind::TimedOut)
}

struct PendingSegment {
    payload: Vec<u8>,
    last_sent: Instant,
    retries: u32,
}

#[derive(Default)]
struct SendState {
    next_seq: u32,
    unacked: BTreeMap<u32, PendingSegment>,
}

/// Send-side conversation state, shared between the writer and the
/// housekeeping thread.
struct ConvShared {
    socket: Arc<UdpSocket>,
    peer: SocketAddr,
    conv: u32,
    send: Mutex<SendState>,
    closed: AtomicBool,
}

impl ConvShared {
    fn new(socket: Arc<UdpSocket>, peer: SocketAddr, conv: u32) -> Self {
        ConvShared {
            socket,
            peer,
            conv,
            send: Mutex::new(SendState::default()),
            closed: AtomicBool::new(false),
        }
    }

    fn send_segment(&self, cmd: u8, seq: u32, payload: &[u8]) -> io::Result<()> {
        let mut frame = Vec::with_capacity(HEADER_LEN + payload.len());
        frame.extend_from_slice(&self.conv.to_be_bytes());
        frame.push(cmd);
        frame.extend_from_slice(&seq.to_be_bytes());
        frame.extend_from_slice(payload);
        self.socket.send_to(&frame, self.peer)?;
        Ok(())
    }

    /// Transmit one payload segment and track it until acked.
    fn push(&self, payload: &[u8]) -> io::Result<()> {
        if self.is_closed() {
            return Err(io::Error::new(io::ErrorKind::BrokenPipe, "conversation closed"));
        }

        let mut send = self.send.lock();
        let seq = send.next_seq;
        send.next_seq = send.next_seq.wrapping_add(1);
        self.send_segment(CMD_PUSH, seq, payload)?;
        send.unacked.insert(
            seq,
            PendingSegment { payload: payload.to_vec(), last_sent: Instant::now(), retries: 0 },
        );
        Ok(())
    }

    /// Cumulative ack: the peer has everything below `next_expected`.
    fn acknowledge(&self, next_expected: u32) {
        self.send.lock().unacked.retain(|&seq, _| seq >= next_expected);
    }

    /// Resend overdue segments. Returns false once the retry cap is hit and
    /// the conversation should be abandoned.
    fn retransmit_due(&self, now: Instant) -> bool {
        let mut send = self.send.lock();
        for (seq, pending) in send.unacked.iter_mut() {
            if now.duration_since(pending.last_sent) < RESEND_TIMEOUT {
                continue;
            }
            if pending.retries >= MAX_RETRIES {
                return false;
            }
            if let Err(e) = self.send_segment(CMD_PUSH, *seq, &pending.payload) {
                tracing::trace!(seq, error = %e, "datagram retransmit failed");
            }
            pending.last_sent = now;
            pending.retries += 1;
        }
        true
    }

    /// Returns true on the first close.
    fn close(&self) -> bool {
        !self.closed.swap(true, Ordering::SeqCst)
    }

    fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }
}

#[derive(Default)]
struct RecvState {
    next_seq: u32,
    pending: BTreeMap<u32, Vec<u8>>,
}

/// Receive-side conversation state, owned by the socket reader thread.
struct ConvEntry {
    shared: Arc<ConvShared>,
    recv: RecvState,
    deliver: Sender<Vec<u8>>,
}

impl ConvEntry {
    /// Build both halves of a conversation: the reader-thread entry and the
    /// public connection handle.
    fn open(socket: Arc<UdpSocket>, peer: SocketAddr, conv: u32) -> (DatagramConn, ConvEntry) {
        let shared = Arc::new(ConvShared::new(socket, peer, conv));
        let (deliver, incoming) = unbounded();
        let conn = DatagramConn {
            shared: Arc::clone(&shared),
            incoming,
            buffered: Mutex::new(VecDeque::new()),
        };
        (conn, ConvEntry { shared, recv: RecvState::default(), deliver })
    }

    fn handle_push(&mut self, seq: u32, payload: &[u8]) {
        // the in-order segment is always accepted so a full reorder buffer
        // can drain; out-of-order ones are bounded
        let in_order = seq == self.recv.next_seq;
        if (in_order || (seq > self.recv.next_seq && self.recv.pending.len() < MAX_PENDING_SEGMENTS))
            && !self.recv.pending.contains_key(&seq)
        {
            self.recv.pending.insert(seq, payload.to_vec());
        }

        while let Some(data) = self.recv.pending.remove(&self.recv.next_seq) {
            let _ = self.deliver.send(data);
            self.recv.next_seq = self.recv.next_seq.wrapping_add(1);
        }

        let next = self.recv.next_seq;
        if let Err(e) = self.shared.send_segment(CMD_ACK, next, &[]) {
            tracing::trace!(error = %e, "datagram ack send failed");
        }
    }
}

/// One reliable-ordered conversation, usable as a [`Conn`] stream.
pub struct DatagramConn {
    shared: Arc<ConvShared>,
    incoming: Receiver<Vec<u8>>,
    buffered: Mutex<VecDeque<u8>>,
}

impl DatagramConn {
    /// Client-side constructor: open a conversation with a remote listener
    /// on an ephemeral local socket.
    pub fn connect(endpoint: &str) -> Result<Self> {
        let endpoint = normalize_endpoint(endpoint);
        let peer = endpoint
            .to_socket_addrs()?
            .next()
            .ok_or_else(|| Error::Config(format!("endpoint resolves to no address: {endpoint}")))?;

        let bind_addr = if peer.is_ipv4() { "0.0.0.0:0" } else { "[::]:0" };
        let socket = UdpSocket::bind(bind_addr)?;
        socket.set_read_timeout(Some(POLL_INTERVAL))?;
        let socket = Arc::new(socket);

        let conv = rand::rng().random::<u32>();
        let (conn, entry) = ConvEntry::open(Arc::clone(&socket), peer, conv);
        thread::spawn(move || run_client(socket, entry));
        Ok(conn)
    }
}

impl Conn for DatagramConn {
    fn read(&self, buf: &mut [u8]) -> io::Result<usize> {
        let mut buffered = self.buffered.lock();
        while buffered.is_empty() {
            match self.incoming.recv_timeout(POLL_INTERVAL) {
                Ok(chunk) => buffered.extend(chunk),
                Err(RecvTimeoutError::Timeout) => {
                    if self.shared.is_closed() {
                        return Ok(0);
                    }
                }
                Err(RecvTimeoutError::Disconnected) => return Ok(0),
            }
        }

        let n = buf.len().min(buffered.len());
        for (dst, byte) in buf.iter_mut().zip(buffered.drain(..n)) {
            *dst = byte;
        }
        Ok(n)
    }

    fn write_all(&self, buf: &[u8]) -> io::Result<()> {
        for chunk in buf.chunks(MAX_SEGMENT_PAYLOAD) {
            self.shared.push(chunk)?;
        }
        Ok(())
    }

    fn shutdown(&self) -> io::Result<()> {
        if self.shared.close() {
            let _ = self.shared.send_segment(CMD_FIN, 0, &[]);
        }
        Ok(())
    }

    fn peer_addr(&self) -> Option<SocketAddr> {
        Some(self.shared.peer)
    }

    fn kind(&self) -> TransportKind {
        TransportKind::Datagram
    }
}

/// UDP listener demultiplexing conversations onto [`DatagramConn`] streams.
pub struct DatagramTransport {
    local: SocketAddr,
    accepted: Receiver<DatagramConn>,
    stopped: Arc<AtomicBool>,
}

impl DatagramTransport {
    pub fn bind(endpoint: &str) -> Result<Self> {
        let socket = UdpSocket::bind(normalize_endpoint(endpoint))?;
        socket.set_read_timeout(Some(POLL_INTERVAL))?;
        let local = socket.local_addr()?;
        let socket = Arc::new(socket);

        let (accept_tx, accepted) = unbounded();
        let stopped = Arc::new(AtomicBool::new(false));
        let flag = Arc::clone(&stopped);
        thread::spawn(move || run_listener(socket, accept_tx, flag));

        Ok(DatagramTransport { local, accepted, stopped })
    }
}

impl Listener for DatagramTransport {
    fn accept(&self) -> io::Result<Box<dyn Conn>> {
        if self.stopped.load(Ordering::SeqCst) {
            return Err(io::Error::new(io::ErrorKind::NotConnected, "listener closed"));
        }

        match self.accepted.recv_timeout(POLL_INTERVAL) {
            Ok(conn) => Ok(Box::new(conn)),
            Err(RecvTimeoutError::Timeout) => {
                Err(io::Error::new(io::ErrorKind::WouldBlock, "no conversation pending"))
            }
            Err(RecvTimeoutError::Disconnected) => {
                Err(io::Error::new(io::ErrorKind::NotConnected, "listener closed"))
            }
        }
    }

    fn local_addr(&self) -> io::Result<SocketAddr> {
        Ok(self.local)
    }

    fn kind(&self) -> TransportKind {
        TransportKind::Datagram
    }

    fn shutdown(&self) {
        self.stopped.store(true, Ordering::SeqCst);
    }
}

fn run_listener(
    socket: Arc<UdpSocket>,
    accept_tx: Sender<DatagramConn>,
    stopped: Arc<AtomicBool>,
) {
    let mut convs: HashMap<(SocketAddr, u32), ConvEntry> = HashMap::new();
    let mut buf = vec![0u8; MAX_DATAGRAM];
    let mut last_housekeeping = Instant::now();

    while !stopped.load(Ordering::SeqCst) {
        match socket.recv_from(&mut buf) {
            Ok((n, from)) => {
                if let Some((conv, cmd, seq, payload)) = parse_segment(&buf[..n]) {
                    dispatch(&mut convs, &accept_tx, &socket, from, conv, cmd, seq, payload);
                }
            }
            Err(e) if would_block(&e) => {}
            Err(e) => tracing::debug!(error = %e, "datagram socket receive error"),
        }

        if last_housekeeping.elapsed() >= POLL_INTERVAL {
            housekeeping(&mut convs);
            last_housekeeping = Instant::now();
        }
    }
    // Dropping the conversation table closes every delivery channel, which
    // readers observe as end-of-stream.
}

#[allow(clippy::too_many_arguments)]
fn dispatch(
    convs: &mut HashMap<(SocketAddr, u32), ConvEntry>,
    accept_tx: &Sender<DatagramConn>,
    socket: &Arc<UdpSocket>,
    from: SocketAddr,
    conv: u32,
    cmd: u8,
    seq: u32,
    payload: &[u8],
) {
    let key = (from, conv);
    match cmd {
        CMD_PUSH => {
            let entry = convs.entry(key).or_insert_with(|| {
                let (conn, entry) = ConvEntry::open(Arc::clone(socket), from, conv);
                let _ = accept_tx.send(conn);
                tracing::debug!(peer = %from, conv, "datagram conversation opened");
                entry
            });
            entry.handle_push(seq, payload);
        }
        CMD_ACK => {
            if let Some(entry) = convs.get(&key) {
                entry.shared.acknowledge(seq);
            }
        }
        CMD_FIN => {
            if let Some(entry) = convs.remove(&key) {
                entry.shared.close();
                tracing::debug!(peer = %from, conv, "datagram conversation closed by peer");
            }
        }
        _ => {}
    }
}

fn housekeeping(convs: &mut HashMap<(SocketAddr, u32), ConvEntry>) {
    let now = Instant::now();
    convs.retain(|(peer, conv), entry| {
        if entry.shared.is_closed() {
            return false;
        }
        if !entry.shared.retransmit_due(now) {
            tracing::debug!(peer = %peer, conv, "datagram conversation timed out");
            entry.shared.close();
            return false;
        }
        true
    });
}

fn run_client(socket: Arc<UdpSocket>, mut entry: ConvEntry) {
    let mut buf = vec![0u8; MAX_DATAGRAM];
    let mut last_housekeeping = Instant::now();

    while !entry.shared.is_closed() {
        match socket.recv_from(&mut buf) {
            Ok((n, from)) if from == entry.shared.peer => {
                if let Some((conv, cmd, seq, payload)) = parse_segment(&buf[..n]) {
                    if conv != entry.shared.conv {
                        continue;
                    }
                    match cmd {
                        CMD_PUSH => entry.handle_push(seq, payload),
                        CMD_ACK => entry.shared.acknowledge(seq),
                        CMD_FIN => {
                            entry.shared.close();
                            return;
                        }
                        _ => {}
                    }
                }
            }
            Ok(_) => {}
            Err(e) if would_block(&e) => {}
            Err(_) => break,
        }

        if last_housekeeping.elapsed() >= POLL_INTERVAL {
            if !entry.shared.retransmit_due(Instant::now()) {
                entry.shared.close();
                return;
            }
            last_housekeeping = Instant::now();
        }
    }
}

#[cfg(test)]
mod tests {
    use std::io::Read;
    use std::time::Duration;

    use super::*;
    use crate::transport::ConnReader;

    fn accept_blocking(transport: &DatagramTransport) -> Box<dyn Conn> {
        let deadline = Instant::now() + Duration::from_secs(5);
        loop {
            match transport.accept() {
                Ok(conn) => return conn,
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => {
                    assert!(Instant::now() < deadline, "accept timed out");
                }
                Err(e) => panic!("accept: {e}"),
            }
        }
    }

    #[test]
    fn round_trip() {
        let transport = DatagramTransport::bind("127.0.0.1:0").unwrap();
        let addr = transport.local_addr().unwrap();

        let client = DatagramConn::connect(&addr.to_string()).unwrap();
        client.write_all(b"hello").unwrap();

        let server = accept_blocking(&transport);
        let mut buf = [0u8; 5];
        ConnReader(server.as_ref()).read_exact(&mut buf).unwrap();
        assert_eq!(&buf, b"hello");

        server.write_all(b"world").unwrap();
        ConnReader(&client).read_exact(&mut buf).unwrap();
        assert_eq!(&buf, b"world");

        transport.shutdown();
    }

    #[test]
    fn large_payload_is_fragmented_and_reassembled() {
        let transport = DatagramTransport::bind("127.0.0.1:0").unwrap();
        let addr = transport.local_addr().unwrap();

        let payload: Vec<u8> = (0..5000u32).map(|i| (i % 251) as u8).collect();
        let client = DatagramConn::connect(&addr.to_string()).unwrap();
        client.write_all(&payload).unwrap();

        let server = accept_blocking(&transport);
        let mut got = vec![0u8; payload.len()];
        ConnReader(server.as_ref()).read_exact(&mut got).unwrap();
        assert_eq!(got, payload);

        transport.shutdown();
    }

    #[test]
    fn shutdown_reaches_the_peer_as_eof() {
        let transport = DatagramTransport::bind("127.0.0.1:0").unwrap();
        let addr = transport.local_addr().unwrap();

        let client = DatagramConn::connect(&addr.to_string()).unwrap();
        client.write_all(b"x").unwrap();
        let server = accept_blocking(&transport);
        let mut buf = [0u8; 1];
        assert_eq!(server.read(&mut buf).unwrap(), 1);

        client.shutdown().unwrap();
        let deadline = Instant::now() + Duration::from_secs(5);
        loop {
            match server.read(&mut buf) {
                Ok(0) => break,
                Ok(_) => {}
                Err(e) => panic!("read: {e}"),
            }
            assert!(Instant::now() < deadline, "no EOF after peer shutdown");
        }

        transport.shutdown();
    }

    #[test]
    fn write_after_shutdown_fails() {
        let transport = DatagramTransport::bind("127.0.0.1:0").unwrap();
        let addr = transport.local_addr().unwrap();
        let client = DatagramConn::connect(&addr.to_string()).unwrap();
        client.shutdown().unwrap();
        assert!(client.write_all(b"late").is_err());
        transport.shutdown();
    }
}
