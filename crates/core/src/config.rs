//! Server configuration.
//!
//! Values come from three layers, later ones winning: struct defaults, an
//! optional YAML file, and `CGS_*` environment variables. An environment
//! name is the dotted config key upper-cased with dots as underscores
//! (`CGS_LOG_LEVEL` overrides `log.level`, `CGS_SERVER_TCPENDPOINT`
//! overrides `server.tcpEndpoint`).

use std::fs;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::Result;

/// Environment variable prefix for overrides.
pub const ENV_PREFIX: &str = "CGS_";

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct ServerConfig {
    /// Advertised server name.
    pub name: String,
    /// Shared login secret; there is no per-user credential store.
    pub password: String,
    pub tcp_endpoint: String,
    pub udp_endpoint: String,
    pub http_endpoint: String,
    pub max_player_capacity: usize,
    pub max_connection_capacity: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        ServerConfig {
            name: "cgo_game_server".to_string(),
            password: "helloworld".to_string(),
            tcp_endpoint: ":8765".to_string(),
            udp_endpoint: ":8765".to_string(),
            http_endpoint: ":8787".to_string(),
            max_player_capacity: 10000,
            max_connection_capacity: 15000,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct LogConfig {
    pub level: String,
    pub force_color: bool,
}

impl Default for LogConfig {
    fn default() -> Self {
        LogConfig { level: "info".to_string(), force_color: true }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub server: ServerConfig,
    pub log: LogConfig,
}

impl Config {
    /// Load configuration: defaults, then the YAML file (if given), then
    /// process environment overrides.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut config = match path {
            Some(path) => serde_yaml::from_str(&fs::read_to_string(path)?)?,
            None => Config::default(),
        };
        config.apply_env_overrides(std::env::vars());
        Ok(config)
    }

    /// Apply `CGS_*` overrides from an explicit variable iterator (tests
    /// pass their own instead of touching process state).
    pub fn apply_env_overrides(&mut self, vars: impl Iterator<Item = (String, String)>) {
        for (name, value) in vars {
            let Some(key) = name.strip_prefix(ENV_PREFIX) else {
                continue;
            };

            match key {
                "SERVER_NAME" => self.server.name = value,
                "SERVER_PASSWORD" => self.server.password = value,
                "SERVER_TCPENDPOINT" => self.server.tcp_endpoint = value,
                "SERVER_UDPENDPOINT" => self.server.udp_endpoint = value,
                "SERVER_HTTPENDPOINT" => self.server.http_endpoint = value,
                "SERVER_MAXPLAYERCAPACITY" => match value.parse() {
                    Ok(parsed) => self.server.max_player_capacity = parsed,
                    Err(_) => tracing::warn!(%name, %value, "ignoring unparsable override"),
                },
                "SERVER_MAXCONNECTIONCAPACITY" => match value.parse() {
                    Ok(parsed) => self.server.max_connection_capacity = parsed,
                    Err(_) => tracing::warn!(%name, %value, "ignoring unparsable override"),
                },
                "LOG_LEVEL" => self.log.level = value,
                "LOG_FORCECOLOR" => match value.parse() {
                    Ok(parsed) => self.log.force_color = parsed,
                    Err(_) => tracing::warn!(%name, %value, "ignoring unparsable override"),
                },
                _ => tracing::debug!(%name, "unrecognized config override"),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults() {
        let config = Config::default();
        assert_eq!(config.server.name, "cgo_game_server");
        assert_eq!(config.server.password, "helloworld");
        assert_eq!(config.server.tcp_endpoint, ":8765");
        assert_eq!(config.server.udp_endpoint, ":8765");
        assert_eq!(config.server.http_endpoint, ":8787");
        assert_eq!(config.server.max_player_capacity, 10000);
        assert_eq!(config.server.max_connection_capacity, 15000);
        assert_eq!(config.log.level, "info");
        assert!(config.log.force_color);
    }

    #[test]
    fn yaml_uses_camel_case_keys() {
        let yaml = r#"
server:
  name: arena
  tcpEndpoint: "127.0.0.1:9000"
  maxPlayerCapacity: 50
log:
  level: debug
  forceColor: false
"#;
        let config: Config = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(config.server.name, "arena");
        assert_eq!(config.server.tcp_endpoint, "127.0.0.1:9000");
        assert_eq!(config.server.max_player_capacity, 50);
        // untouched keys keep their defaults
        assert_eq!(config.server.password, "helloworld");
        assert_eq!(config.log.level, "debug");
        assert!(!config.log.force_color);
    }

    #[test]
    fn env_overrides_win() {
        let mut config = Config::default();
        let vars = vec![
            ("CGS_LOG_LEVEL".to_string(), "debug".to_string()),
            ("CGS_SERVER_PASSWORD".to_string(), "sesame".to_string()),
            ("CGS_SERVER_MAXPLAYERCAPACITY".to_string(), "42".to_string()),
            ("UNRELATED".to_string(), "x".to_string()),
        ];
        config.apply_env_overrides(vars.into_iter());

        assert_eq!(config.log.level, "debug");
        assert_eq!(config.server.password, "sesame");
        assert_eq!(config.server.max_player_capacity, 42);
    }

    #[test]
    fn unparsable_override_is_ignored() {
        let mut config = Config::default();
        config.apply_env_overrides(
            vec![("CGS_SERVER_MAXPLAYERCAPACITY".to_string(), "lots".to_string())].into_iter(),
        );
        assert_eq!(config.server.max_player_capacity, 10000);
    }
}
