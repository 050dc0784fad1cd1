use clap::{Parser, ValueEnum};
use lib_common::routing::HubConfig;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Where mirrored hub state goes.
#[derive(ValueEnum, Deserialize, Serialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum SinkKind {
    None,
    Redis,
    Memory,
}

#[derive(Parser, Deserialize, Serialize, Debug, Clone, Default)]
#[clap(about = "Multi-tenant relay hub for robot and dashboard clients", version)]
#[serde(rename_all = "camelCase")]
pub struct Config {
    #[clap(long, env = "RELAY_PORT", help = "Port for WebSocket client connections.")]
    pub port: Option<u16>,

    #[clap(long, env = "RELAY_UDP_PORT", help = "Port for datagram clients. Datagram transport is off when unset.")]
    pub udp_port: Option<u16>,

    #[clap(long, env = "RELAY_CONFIG_PATH", help = "Path to the JSON configuration file.")]
    pub config_path: Option<PathBuf>,

    #[clap(long, env = "RELAY_LOG_DIR", help = "Directory for log files.")]
    pub log_dir: Option<PathBuf>,

    #[clap(long, env = "RELAY_LOG_LEVEL", help = "Logging level (trace, debug, info, warn, error).")]
    pub log_level: Option<String>,

    #[clap(long, value_enum, env = "RELAY_SINK", help = "State mirror: none, redis or memory.")]
    pub sink: Option<SinkKind>,

    #[clap(long, env = "RELAY_REDIS_URL", help = "Redis URL used by the redis state mirror.")]
    pub redis_url: Option<String>,

    #[clap(long, env = "RELAY_SINK_QUEUE_DEPTH", help = "Mirror commands buffered before best-effort writes are dropped.")]
    pub sink_queue_depth: Option<usize>,

    #[clap(long, env = "RELAY_DATAGRAM_IDLE_TIMEOUT_MS", help = "Milliseconds without traffic before a datagram client is dropped.")]
    pub datagram_idle_timeout_ms: Option<u64>,

    #[clap(long, env = "RELAY_OUTBOUND_QUEUE_DEPTH", help = "Capacity of each destination's outbound queue.")]
    pub outbound_queue_depth: Option<usize>,

    #[clap(long, env = "RELAY_INBOUND_QUEUE_DEPTH", help = "Capacity of each source's inbound queue.")]
    pub inbound_queue_depth: Option<usize>,

    #[clap(long, env = "RELAY_HEARTBEAT_INTERVAL_MS", help = "Idle milliseconds before a keep-alive frame is written.")]
    pub heartbeat_interval_ms: Option<u64>,

    #[clap(long, env = "RELAY_INGEST_RATE_THRESHOLD", help = "Accepted envelopes per topic between ingest rate log lines.")]
    pub ingest_rate_threshold: Option<u64>,

    #[clap(long, env = "RELAY_DELIVERY_RATE_THRESHOLD", help = "Frames per destination between delivery rate updates.")]
    pub delivery_rate_threshold: Option<u64>,

    #[clap(long, env = "RELAY_READ_RATE_THRESHOLD", help = "Frames per source between read rate updates.")]
    pub read_rate_threshold: Option<u64>,

    #[clap(long, env = "RELAY_BROADCAST_PREFIX", help = "Name prefix of clients that receive every message.")]
    pub broadcast_prefix: Option<String>,
}

impl Config {
    // Merge two Config structs, where 'other' overrides 'self' for Some values
    fn merge(self, other: Config) -> Config {
        Config {
            port: other.port.or(self.port),
            udp_port: other.udp_port.or(self.udp_port),
            config_path: other.config_path.or(self.config_path),
            log_dir: other.log_dir.or(self.log_dir),
            log_level: other.log_level.or(self.log_level),
            sink: other.sink.or(self.sink),
            redis_url: other.redis_url.or(self.redis_url),
            sink_queue_depth: other.sink_queue_depth.or(self.sink_queue_depth),
            datagram_idle_timeout_ms: other.datagram_idle_timeout_ms.or(self.datagram_idle_timeout_ms),
            outbound_queue_depth: other.outbound_queue_depth.or(self.outbound_queue_depth),
            inbound_queue_depth: other.inbound_queue_depth.or(self.inbound_queue_depth),
            heartbeat_interval_ms: other.heartbeat_interval_ms.or(self.heartbeat_interval_ms),
            ingest_rate_threshold: other.ingest_rate_threshold.or(self.ingest_rate_threshold),
            delivery_rate_threshold: other.delivery_rate_threshold.or(self.delivery_rate_threshold),
            read_rate_threshold: other.read_rate_threshold.or(self.read_rate_threshold),
            broadcast_prefix: other.broadcast_prefix.or(self.broadcast_prefix),
        }
    }

    pub fn defaults() -> Config {
        let hub = HubConfig::default();
        Config {
            port: Some(50000),
            log_dir: Some(PathBuf::from("./logs")),
            log_level: Some("info".to_string()),
            sink: Some(SinkKind::None),
            redis_url: Some("redis://127.0.0.1/".to_string()),
            sink_queue_depth: Some(1024),
            datagram_idle_timeout_ms: Some(30_000),
            outbound_queue_depth: Some(hub.outbound_queue_depth),
            inbound_queue_depth: Some(hub.inbound_queue_depth),
            heartbeat_interval_ms: Some(hub.heartbeat_interval_ms),
            ingest_rate_threshold: Some(hub.ingest_rate_threshold),
            delivery_rate_threshold: Some(hub.delivery_rate_threshold),
            read_rate_threshold: Some(hub.read_rate_threshold),
            broadcast_prefix: Some(hub.broadcast_prefix),
            ..Default::default()
        }
    }

    /// Routing tunables, with anything unset left at its default.
    pub fn hub_config(&self) -> HubConfig {
        let base = HubConfig::default();
        HubConfig {
            outbound_queue_depth: self.outbound_queue_depth.unwrap_or(base.outbound_queue_depth),
            inbound_queue_depth: self.inbound_queue_depth.unwrap_or(base.inbound_queue_depth),
            heartbeat_interval_ms: self.heartbeat_interval_ms.unwrap_or(base.heartbeat_interval_ms),
            ingest_rate_threshold: self.ingest_rate_threshold.unwrap_or(base.ingest_rate_threshold),
            delivery_rate_threshold: self
                .delivery_rate_threshold
                .unwrap_or(base.delivery_rate_threshold),
            read_rate_threshold: self.read_rate_threshold.unwrap_or(base.read_rate_threshold),
            broadcast_prefix: self.broadcast_prefix.clone().unwrap_or(base.broadcast_prefix),
            description_topic: base.description_topic,
        }
    }

    pub fn datagram_idle_timeout(&self) -> Duration {
        Duration::from_millis(self.datagram_idle_timeout_ms.unwrap_or(30_000))
    }
}

/// Reads a JSON config file, or `None` (with a warning) when it is missing or invalid.
fn read_config_file(path: &Path) -> Option<Config> {
    if !path.exists() {
        tracing::info!(
            "Config file not found at {}. Using defaults and environment/CLI variables.",
            path.display()
        );
        return None;
    }
    let text = match fs::read_to_string(path) {
        Ok(text) => text,
        Err(e) => {
            tracing::warn!("Failed to read config file {}: {}", path.display(), e);
            return None;
        }
    };
    match serde_json::from_str::<Config>(&text) {
        Ok(config) => Some(config),
        Err(e) => {
            tracing::warn!("Failed to parse config file {}: {}", path.display(), e);
            None
        }
    }
}

/// Builds the effective configuration: defaults, then the JSON file, then
/// environment variables and CLI flags.
pub fn load_config_from(cli: Config) -> Config {
    // 1. Load defaults
    let mut current_config = Config::defaults();

    // 2. Load from config file (server_relay.conf) if present.
    let config_file_path = cli
        .config_path
        .clone()
        .unwrap_or_else(|| PathBuf::from("server_relay.conf"));
    if let Some(file_config) = read_config_file(&config_file_path) {
        current_config = current_config.merge(file_config);
    }

    // 3. Override with environment variables and CLI arguments
    current_config.merge(cli)
}

pub fn load_config() -> Config {
    load_config_from(Config::parse())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn file_overrides_defaults_and_cli_overrides_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(
            file,
            r#"{{"port": 6000, "udpPort": 6001, "sink": "memory", "heartbeatIntervalMs": 250}}"#
        )
        .unwrap();

        let cli = Config {
            config_path: Some(file.path().to_path_buf()),
            port: Some(7000),
            ..Default::default()
        };
        let config = load_config_from(cli);

        assert_eq!(config.port, Some(7000));
        assert_eq!(config.udp_port, Some(6001));
        assert_eq!(config.sink, Some(SinkKind::Memory));
        assert_eq!(config.log_level.as_deref(), Some("info"));

        let hub = config.hub_config();
        assert_eq!(hub.heartbeat_interval_ms, 250);
        assert_eq!(hub.outbound_queue_depth, 2);
        assert_eq!(hub.broadcast_prefix, "canopy_leaflet_");
    }

    #[test]
    fn invalid_file_falls_back_to_defaults() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, "not json").unwrap();

        let config = load_config_from(Config {
            config_path: Some(file.path().to_path_buf()),
            ..Default::default()
        });
        assert_eq!(config.port, Some(50000));
        assert_eq!(config.udp_port, None);
        assert_eq!(config.datagram_idle_timeout(), Duration::from_secs(30));
    }

    #[test]
    fn cli_flags_parse() {
        let cli = Config::try_parse_from([
            "server_relay",
            "--port",
            "9100",
            "--sink",
            "redis",
            "--broadcast-prefix",
            "agg_",
        ])
        .unwrap();
        assert_eq!(cli.port, Some(9100));
        assert_eq!(cli.sink, Some(SinkKind::Redis));
        assert_eq!(cli.hub_config().broadcast_prefix, "agg_");
    }
}
