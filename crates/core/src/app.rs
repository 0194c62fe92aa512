//! Application wiring and graceful shutdown.
//!
//! Construction order: event bus and metrics registry, session manager,
//! services (the player service subscribes to session termination here),
//! middleware chain around the command dispatcher, then one server per
//! transport and the HTTP status server.
//!
//! Shutdown order: stop the sweeper, close both listeners (terminating all
//! sessions within the 5-second budget), stop the HTTP server, join the
//! serve threads.

use std::sync::Arc;
use std::thread::{self, JoinHandle};

use parking_lot::Mutex;
use signal_hook::consts::TERM_SIGNALS;
use signal_hook::iterator::Signals;

use crate::command::Executor;
use crate::config::Config;
use crate::error::Result;
use crate::events::EventBus;
use crate::metrics::RpcMetrics;
use crate::middleware::{authenticator, chain, logger, metrics, panic_recover, validator};
use crate::monicker::FakerNameGenerator;
use crate::proto::codec::Codec;
use crate::rest::RestServer;
use crate::server::Server;
use crate::service::ServiceFactory;
use crate::session::{SessionManager, Sweeper};
use crate::transport::{DatagramTransport, TcpTransport};

/// The assembled server process: both game listeners, the HTTP status
/// surface, the session sweeper, and their shared state.
pub struct Application {
    sessions: Arc<SessionManager>,
    services: Arc<ServiceFactory>,
    tcp_server: Arc<Server>,
    udp_server: Arc<Server>,
    rest_server: Arc<RestServer>,
    bus: Arc<EventBus>,
    sweeper: Mutex<Option<Sweeper>>,
    threads: Mutex<Vec<JoinHandle<()>>>,
}

impl Application {
    pub fn new(config: Config) -> Result<Self> {
        let config = Arc::new(config);
        let bus = Arc::new(EventBus::new());
        let metrics_registry = Arc::new(RpcMetrics::new());
        let sessions = Arc::new(SessionManager::new());

        let services = ServiceFactory::new(
            Arc::clone(&config),
            Arc::clone(&sessions),
            Arc::clone(&metrics_registry),
            &bus,
            Box::new(FakerNameGenerator),
        );

        let executor = Executor::new(Arc::clone(&config), Arc::clone(&services));
        let handler = chain(
            executor.handler(),
            vec![
                panic_recover(),
                logger(),
                validator(),
                authenticator(Arc::clone(&services.player)),
                metrics(Arc::clone(&metrics_registry)),
            ],
        );

        let codec = Arc::new(Codec::new());
        let tcp_server = Arc::new(Server::new(
            Box::new(TcpTransport::bind(&config.server.tcp_endpoint)?),
            Arc::clone(&handler),
            Arc::clone(&codec),
            Arc::clone(&sessions),
            Arc::clone(&bus),
        ));
        let udp_server = Arc::new(Server::new(
            Box::new(DatagramTransport::bind(&config.server.udp_endpoint)?),
            handler,
            codec,
            Arc::clone(&sessions),
            Arc::clone(&bus),
        ));

        let rest_server = Arc::new(RestServer::bind(
            &config.server.http_endpoint,
            Arc::clone(&services.auxiliary),
        )?);

        Ok(Application {
            sessions,
            services,
            tcp_server,
            udp_server,
            rest_server,
            bus,
            sweeper: Mutex::new(None),
            threads: Mutex::new(Vec::new()),
        })
    }

    /// Start the sweeper and all serve threads; returns immediately.
    pub fn start(&self) {
        *self.sweeper.lock() = Some(self.sessions.spawn_sweeper(Arc::clone(&self.bus)));

        let mut threads = self.threads.lock();
        for server in [&self.tcp_server, &self.udp_server] {
            let server = Arc::clone(server);
            threads.push(thread::spawn(move || {
                if let Err(e) = server.serve() {
                    tracing::error!(transport = server.kind().name(), error = %e, "server exited");
                }
            }));
        }

        let rest_server = Arc::clone(&self.rest_server);
        threads.push(thread::spawn(move || rest_server.serve()));
    }

    /// Start everything and block until SIGTERM/SIGINT, then drain.
    pub fn run(&self) -> Result<()> {
        self.start();

        let mut signals = Signals::new(TERM_SIGNALS)?;
        if let Some(signal) = signals.forever().next() {
            tracing::info!(signal, "termination signal received, shutting down");
        }

        self.close();
        Ok(())
    }

    /// Graceful shutdown. Safe to call more than once.
    pub fn close(&self) {
        if let Some(sweeper) = self.sweeper.lock().take() {
            sweeper.stop();
        }

        for server in [&self.tcp_server, &self.udp_server] {
            if let Err(e) = server.close() {
                tracing::warn!(transport = server.kind().name(), error = %e, "close incomplete");
            }
        }
        self.rest_server.close();

        for handle in self.threads.lock().drain(..) {
            let _ = handle.join();
        }
        tracing::info!("application stopped");
    }

    pub fn services(&self) -> &Arc<ServiceFactory> {
        &self.services
    }

    pub fn sessions(&self) -> &Arc<SessionManager> {
        &self.sessions
    }

    pub fn tcp_addr(&self) -> std::io::Result<std::net::SocketAddr> {
        self.tcp_server.local_addr()
    }

    pub fn udp_addr(&self) -> std::io::Result<std::net::SocketAddr> {
        self.udp_server.local_addr()
    }

    pub fn rest_addr(&self) -> Option<std::net::SocketAddr> {
        self.rest_server.local_addr()
    }
}
