//! Read-only operational projections: server status and metric snapshots.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::config::Config;
use crate::metrics::{OVERALL_RATE_KEY, RpcMetrics, TimerSnapshot};
use crate::monicker::{Culture, MonickerGenerator, Sex};
use crate::service::player::PlayerService;
use crate::session::SessionManager;
use crate::transport::TransportKind;

/// Point-in-time operational snapshot.
#[derive(Debug, Clone)]
pub struct ServerStatus {
    pub server_name: String,
    pub uptime: Duration,
    pub online_players: usize,
    pub total_connections: usize,
}

pub struct AuxiliaryService {
    config: Arc<Config>,
    players: Arc<PlayerService>,
    sessions: Arc<SessionManager>,
    metrics: Arc<RpcMetrics>,
    generator: Box<dyn MonickerGenerator>,
    started_at: Instant,
}

impl AuxiliaryService {
    pub fn new(
        config: Arc<Config>,
        players: Arc<PlayerService>,
        sessions: Arc<SessionManager>,
        metrics: Arc<RpcMetrics>,
        generator: Box<dyn MonickerGenerator>,
    ) -> Arc<Self> {
        Arc::new(AuxiliaryService {
            config,
            players,
            sessions,
            metrics,
            generator,
            started_at: Instant::now(),
        })
    }

    pub fn collect_server_status(&self) -> ServerStatus {
        ServerStatus {
            server_name: self.config.server.name.clone(),
            uptime: self.started_at.elapsed(),
            online_players: self.players.count(),
            total_connections: self.sessions.count(),
        }
    }

    /// Live connection counts per transport.
    pub fn transport_connections(&self) -> (usize, usize) {
        (
            self.sessions.count_kind(TransportKind::Tcp),
            self.sessions.count_kind(TransportKind::Datagram),
        )
    }

    /// Formatted snapshot of the aggregate RPC timer.
    pub fn gather_overall_rpc_rate_metrics(&self) -> BTreeMap<String, String> {
        let mut out = BTreeMap::new();
        format_timer(OVERALL_RATE_KEY, &self.metrics.overall(), &mut out);
        out
    }

    /// Formatted snapshot of every registered RPC timer.
    pub fn gather_all_rpc_rate_metrics(&self) -> BTreeMap<String, String> {
        let mut out = BTreeMap::new();
        self.metrics.each(|key, snapshot| format_timer(key, snapshot, &mut out));
        out
    }

    /// Random nickname for the given wire-encoded sex and culture. Values
    /// are validated upstream; out-of-range ones fall back to the defaults.
    pub fn generate_nickname(&self, sex: i32, culture: i32) -> String {
        let sex = Sex::from_i32(sex).unwrap_or(Sex::Male);
        let culture = Culture::from_i32(culture).unwrap_or(Culture::American);
        self.generator.generate(sex, culture)
    }
}

fn format_timer(key: &str, snapshot: &TimerSnapshot, out: &mut BTreeMap<String, String>) {
    out.insert(format!("{key} Sample Count"), snapshot.count.to_string());

    out.insert(format!("{key} m1 TPS"), format!("{:.2}", snapshot.m1_rate));
    out.insert(format!("{key} m5 TPS"), format!("{:.2}", snapshot.m5_rate));
    out.insert(format!("{key} m15 TPS"), format!("{:.2}", snapshot.m15_rate));

    out.insert(format!("{key} Min Latency"), format!("{:.2}", snapshot.min_ms));
    out.insert(format!("{key} Mean Latency"), format!("{:.2}", snapshot.mean_ms));
    out.insert(format!("{key} Max Latency"), format!("{:.2}", snapshot.max_ms));
    out.insert(format!("{key} p50 Latency"), format!("{:.2}", snapshot.p50_ms));
    out.insert(format!("{key} p75 Latency"), format!("{:.2}", snapshot.p75_ms));
    out.insert(format!("{key} p90 Latency"), format!("{:.2}", snapshot.p90_ms));
    out.insert(format!("{key} p99 Latency"), format!("{:.2}", snapshot.p99_ms));
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;
    use crate::monicker::FakerNameGenerator;
    use crate::proto::MessageType;

    fn fixture() -> Arc<AuxiliaryService> {
        let config = Arc::new(Config::default());
        let sessions = Arc::new(SessionManager::new());
        let players = PlayerService::new("helloworld".to_string(), Arc::clone(&sessions));
        let metrics = Arc::new(RpcMetrics::new());
        AuxiliaryService::new(config, players, sessions, metrics, Box::new(FakerNameGenerator))
    }

    #[test]
    fn status_reflects_config_and_counts() {
        let aux = fixture();
        let status = aux.collect_server_status();
        assert_eq!(status.server_name, "cgo_game_server");
        assert_eq!(status.online_players, 0);
        assert_eq!(status.total_connections, 0);
    }

    #[test]
    fn overall_metrics_use_the_original_key_strings() {
        let aux = fixture();
        aux.metrics.observe(MessageType::Info, true, Duration::from_millis(5));

        let map = aux.gather_overall_rpc_rate_metrics();
        assert_eq!(map.get("rpc.rate.overall Sample Count").map(String::as_str), Some("1"));
        for suffix in
            ["m1 TPS", "m5 TPS", "m15 TPS", "Min Latency", "Mean Latency", "Max Latency",
             "p50 Latency", "p75 Latency", "p90 Latency", "p99 Latency"]
        {
            assert!(map.contains_key(&format!("rpc.rate.overall {suffix}")), "missing {suffix}");
        }
    }

    #[test]
    fn all_metrics_cover_every_key() {
        let aux = fixture();
        aux.metrics.observe(MessageType::Login, true, Duration::from_millis(1));
        aux.metrics.observe(MessageType::Login, false, Duration::from_millis(1));

        let map = aux.gather_all_rpc_rate_metrics();
        assert!(map.contains_key("rpc.rate.LOGIN.success Sample Count"));
        assert!(map.contains_key("rpc.rate.LOGIN.error Sample Count"));
        assert!(map.contains_key("rpc.rate.overall Sample Count"));
    }

    #[test]
    fn nickname_generation_is_non_empty() {
        let aux = fixture();
        assert!(!aux.generate_nickname(0, 0).is_empty());
        assert!(!aux.generate_nickname(1, 17).is_empty());
    }
}
