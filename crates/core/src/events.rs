//! In-process publish/subscribe.
//!
//! Delivery is synchronous on the publisher's thread; subscribers must be
//! cheap or hand work off themselves. Subscribers are registered at startup
//! and live for the process lifetime. The bus is injected into the
//! components that need it so tests can build a fresh one per case.

use std::sync::Arc;

use parking_lot::RwLock;

use crate::session::Session;

/// Events published on the bus.
#[derive(Clone)]
pub enum Event {
    /// A session was removed from the manager and its connection closed.
    /// Closes the loop from transport-level eviction to player eviction.
    SessionTerminated(Arc<Session>),
}

type Subscriber = Box<dyn Fn(&Event) + Send + Sync>;

#[derive(Default)]
pub struct EventBus {
    subscribers: RwLock<Vec<Subscriber>>,
}

impl EventBus {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn subscribe(&self, subscriber: impl Fn(&Event) + Send + Sync + 'static) {
        self.subscribers.write().push(Box::new(subscriber));
    }

    pub fn publish(&self, event: &Event) {
        for subscriber in self.subscribers.read().iter() {
            subscriber(event);
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use super::*;
    use crate::session::Session;
    use crate::transport::{Conn, TransportKind};

    struct NullConn;

    impl Conn for NullConn {
        fn read(&self, _buf: &mut [u8]) -> std::io::Result<usize> {
            Ok(0)
        }
        fn write_all(&self, _buf: &[u8]) -> std::io::Result<()> {
            Ok(())
        }
        fn shutdown(&self) -> std::io::Result<()> {
            Ok(())
        }
        fn peer_addr(&self) -> Option<std::net::SocketAddr> {
            None
        }
        fn kind(&self) -> TransportKind {
            TransportKind::Tcp
        }
    }

    #[test]
    fn every_subscriber_sees_the_event() {
        let bus = EventBus::new();
        let seen = Arc::new(AtomicUsize::new(0));
        for _ in 0..3 {
            let seen = Arc::clone(&seen);
            bus.subscribe(move |Event::SessionTerminated(_)| {
                seen.fetch_add(1, Ordering::SeqCst);
            });
        }

        let session = Arc::new(Session::new(Box::new(NullConn)));
        bus.publish(&Event::SessionTerminated(session));
        assert_eq!(seen.load(Ordering::SeqCst), 3);
    }
}
