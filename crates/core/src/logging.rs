//! Logger initialization from [`LogConfig`](crate::config::LogConfig).

use tracing_subscriber::filter::LevelFilter;

use crate::config::LogConfig;
use crate::error::{Error, Result};

/// Install the global tracing subscriber. Call once, before any server
/// threads start.
pub fn init(config: &LogConfig) -> Result<()> {
    let level = parse_level(&config.level)?;
    tracing_subscriber::fmt()
        .with_max_level(level)
        .with_ansi(config.force_color)
        .try_init()
        .map_err(|e| Error::Config(format!("failed to install logger: {e}")))
}

fn parse_level(level: &str) -> Result<LevelFilter> {
    match level.to_ascii_lowercase().as_str() {
        "off" => Ok(LevelFilter::OFF),
        "error" => Ok(LevelFilter::ERROR),
        "warn" | "warning" => Ok(LevelFilter::WARN),
        "info" => Ok(LevelFilter::INFO),
        "debug" => Ok(LevelFilter::DEBUG),
        "trace" => Ok(LevelFilter::TRACE),
        other => Err(Error::Config(format!("invalid log level: {other}"))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn level_parsing() {
        assert_eq!(parse_level("info").unwrap(), LevelFilter::INFO);
        assert_eq!(parse_level("DEBUG").unwrap(), LevelFilter::DEBUG);
        assert_eq!(parse_level("warning").unwrap(), LevelFilter::WARN);
        assert!(parse_level("loud").is_err());
    }
}
