//! Read-only HTTP status surface.
//!
//! Two GET endpoints backed entirely by [`AuxiliaryService`] projections:
//!
//! - `/status`  — server status snapshot as JSON.
//! - `/metrics` — per-key RPC metric map as JSON.

use std::io::Cursor;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use serde::Serialize;
use tiny_http::{Header, Method, Request, Response};

use crate::error::{Error, Result};
use crate::service::{AuxiliaryService, ServerStatus};
use crate::transport::normalize_endpoint;

const RECV_POLL: Duration = Duration::from_millis(100);

pub struct RestServer {
    server: tiny_http::Server,
    auxiliary: Arc<AuxiliaryService>,
    stopped: AtomicBool,
}

impl RestServer {
    pub fn bind(endpoint: &str, auxiliary: Arc<AuxiliaryService>) -> Result<Self> {
        let server = tiny_http::Server::http(normalize_endpoint(endpoint))
            .map_err(|e| Error::Config(format!("failed to bind http endpoint: {e}")))?;
        Ok(RestServer { server, auxiliary, stopped: AtomicBool::new(false) })
    }

    pub fn local_addr(&self) -> Option<std::net::SocketAddr> {
        self.server.server_addr().to_ip()
    }

    /// Serve requests on the calling thread until [`close`](Self::close).
    pub fn serve(&self) {
        tracing::info!(addr = ?self.local_addr(), "http status server listening");

        while !self.stopped.load(Ordering::SeqCst) {
            match self.server.recv_timeout(RECV_POLL) {
                Ok(Some(request)) => self.handle(request),
                Ok(None) => {}
                Err(e) => {
                    if !self.stopped.load(Ordering::SeqCst) {
                        tracing::warn!(error = %e, "http receive error");
                    }
                }
            }
        }
        tracing::debug!("http status server stopped");
    }

    pub fn close(&self) {
        self.stopped.store(true, Ordering::SeqCst);
    }

    fn handle(&self, request: Request) {
        let response = match (request.method(), request.url()) {
            (&Method::Get, "/status") => {
                json_response(&StatusPayload::from(self.auxiliary.collect_server_status()))
            }
            (&Method::Get, "/metrics") => {
                json_response(&self.auxiliary.gather_all_rpc_rate_metrics())
            }
            _ => Response::from_data(b"not found".to_vec()).with_status_code(404),
        };

        if let Err(e) = request.respond(response) {
            tracing::debug!(error = %e, "http respond failed");
        }
    }
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct StatusPayload {
    server_name: String,
    uptime: String,
    online_players: usize,
    total_connections: usize,
}

impl From<ServerStatus> for StatusPayload {
    fn from(status: ServerStatus) -> Self {
        StatusPayload {
            server_name: status.server_name,
            uptime: humantime::format_duration(Duration::from_secs(status.uptime.as_secs()))
                .to_string(),
            online_players: status.online_players,
            total_connections: status.total_connections,
        }
    }
}

fn json_response<T: Serialize>(value: &T) -> Response<Cursor<Vec<u8>>> {
    let body = serde_json::to_vec(value).unwrap_or_default();
    let mut response = Response::from_data(body);
    if let Ok(header) = Header::from_bytes(&b"Content-Type"[..], &b"application/json"[..]) {
        response.add_header(header);
    }
    response
}

#[cfg(test)]
mod tests {
    use std::io::{Read, Write};
    use std::net::TcpStream;
    use std::thread;

    use super::*;
    use crate::config::Config;
    use crate::events::EventBus;
    use crate::metrics::RpcMetrics;
    use crate::monicker::FakerNameGenerator;
    use crate::proto::MessageType;
    use crate::service::ServiceFactory;
    use crate::session::SessionManager;

    fn http_get(addr: std::net::SocketAddr, path: &str) -> String {
        let mut stream = TcpStream::connect(addr).unwrap();
        stream.set_read_timeout(Some(Duration::from_secs(2))).unwrap();
        write!(stream, "GET {path} HTTP/1.1\r\nHost: localhost\r\nConnection: close\r\n\r\n")
            .unwrap();
        let mut body = String::new();
        let _ = stream.read_to_string(&mut body);
        body
    }

    #[test]
    fn status_and_metrics_endpoints() {
        let config = Arc::new(Config::default());
        let sessions = Arc::new(SessionManager::new());
        let bus = EventBus::new();
        let metrics = Arc::new(RpcMetrics::new());
        metrics.observe(MessageType::Info, true, Duration::from_millis(2));
        let services = ServiceFactory::new(
            config,
            sessions,
            Arc::clone(&metrics),
            &bus,
            Box::new(FakerNameGenerator),
        );

        let server = Arc::new(RestServer::bind("127.0.0.1:0", services.auxiliary.clone()).unwrap());
        let addr = server.local_addr().unwrap();
        let background = Arc::clone(&server);
        let handle = thread::spawn(move || background.serve());

        let status = http_get(addr, "/status");
        assert!(status.contains("200"), "unexpected response: {status}");
        assert!(status.contains("\"serverName\":\"cgo_game_server\""));
        assert!(status.contains("\"onlinePlayers\":0"));

        let metrics_body = http_get(addr, "/metrics");
        assert!(metrics_body.contains("rpc.rate.overall Sample Count"));
        assert!(metrics_body.contains("rpc.rate.INFO.success Sample Count"));

        let missing = http_get(addr, "/nope");
        assert!(missing.contains("404"));

        server.close();
        handle.join().unwrap();
    }
}
