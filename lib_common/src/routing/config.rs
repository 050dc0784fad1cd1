//! Tunables shared by every connection the hub serves.

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Name prefix that marks an aggregator ("leaflet") client.
pub const DEFAULT_BROADCAST_PREFIX: &str = "canopy_leaflet_";

/// Sub-topic whose payload updates a client's description.
pub const DESCRIPTION_TOPIC: &str = "description";

/// # Hub Configuration
///
/// Every field has a default, so a partial JSON object (or none at all) is a
/// valid configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct HubConfig {
    /// Capacity of each destination's outbound queue.
    pub outbound_queue_depth: usize,
    /// Capacity of each source connection's inbound queue.
    pub inbound_queue_depth: usize,
    /// Idle time after which a writer emits a keep-alive frame.
    pub heartbeat_interval_ms: u64,
    /// Accepted envelopes per topic between ingest rate reports.
    pub ingest_rate_threshold: u64,
    /// Frames written per destination between delivery rate reports.
    pub delivery_rate_threshold: u64,
    /// Frames read per source connection between read rate reports.
    pub read_rate_threshold: u64,
    pub broadcast_prefix: String,
    pub description_topic: String,
}

impl Default for HubConfig {
    fn default() -> Self {
        Self {
            outbound_queue_depth: 2,
            inbound_queue_depth: 2,
            heartbeat_interval_ms: 500,
            ingest_rate_threshold: 100,
            delivery_rate_threshold: 20,
            read_rate_threshold: 20,
            broadcast_prefix: DEFAULT_BROADCAST_PREFIX.to_string(),
            description_topic: DESCRIPTION_TOPIC.to_string(),
        }
    }
}

impl HubConfig {
    pub fn heartbeat_interval(&self) -> Duration {
        Duration::from_millis(self.heartbeat_interval_ms.max(1))
    }

    /// Whether `name` belongs to a broadcast-class client.
    pub fn is_broadcast(&self, name: &str) -> bool {
        !self.broadcast_prefix.is_empty() && name.starts_with(&self.broadcast_prefix)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn partial_json_keeps_defaults() {
        let cfg: HubConfig = serde_json::from_str(r#"{"heartbeat_interval_ms": 250}"#).unwrap();
        assert_eq!(cfg.heartbeat_interval(), Duration::from_millis(250));
        assert_eq!(cfg.outbound_queue_depth, 2);
        assert_eq!(cfg.broadcast_prefix, "canopy_leaflet_");
    }

    #[test]
    fn broadcast_prefix_detection() {
        let cfg = HubConfig::default();
        assert!(cfg.is_broadcast("canopy_leaflet_dash"));
        assert!(!cfg.is_broadcast("robotA"));

        let none = HubConfig {
            broadcast_prefix: String::new(),
            ..HubConfig::default()
        };
        assert!(!none.is_broadcast("anything"));
    }
}
