use std::io::{self, Read, Write};
use std::net::{self, Shutdown, SocketAddr};
use std::sync::atomic::{AtomicBool, Ordering};

use crate::error::Result;
use crate::transport::{Conn, Listener, TransportKind, normalize_endpoint};

/// Non-blocking TCP listener.
///
/// The listener socket stays non-blocking so the accept loop can interleave
/// stop-flag checks; accepted streams are switched back to blocking mode for
/// the per-connection loop.
pub struct TcpTransport {
    listener: net::TcpListener,
    stopped: AtomicBool,
}

impl TcpTransport {
    pub fn bind(endpoint: &str) -> Result<Self> {
        let listener = net::TcpListener::bind(normalize_endpoint(endpoint))?;
        listener.set_nonblocking(true)?;
        Ok(TcpTransport { listener, stopped: AtomicBool::new(false) })
    }
}

impl Listener for TcpTransport {
    fn accept(&self) -> io::Result<Box<dyn Conn>> {
        if self.stopped.load(Ordering::SeqCst) {
            return Err(io::Error::new(io::ErrorKind::NotConnected, "listener closed"));
        }

        let (stream, peer) = self.listener.accept()?;
        stream.set_nonblocking(false)?;
        let _ = stream.set_nodelay(true);
        Ok(Box::new(TcpConn { stream, peer }))
    }

    fn local_addr(&self) -> io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    fn kind(&self) -> TransportKind {
        TransportKind::Tcp
    }

    fn shutdown(&self) {
        self.stopped.store(true, Ordering::SeqCst);
    }
}

/// An accepted TCP connection.
pub struct TcpConn {
    stream: net::TcpStream,
    peer: SocketAddr,
}

impl Conn for TcpConn {
    fn read(&self, buf: &mut [u8]) -> io::Result<usize> {
        (&self.stream).read(buf)
    }

    fn write_all(&self, buf: &[u8]) -> io::Result<()> {
        (&self.stream).write_all(buf)
    }

    fn shutdown(&self) -> io::Result<()> {
        match self.stream.shutdown(Shutdown::Both) {
            // already closed by the peer
            Err(e) if e.kind() == io::ErrorKind::NotConnected => Ok(()),
            other => other,
        }
    }

    fn peer_addr(&self) -> Option<SocketAddr> {
        Some(self.peer)
    }

    fn kind(&self) -> TransportKind {
        TransportKind::Tcp
    }
}
