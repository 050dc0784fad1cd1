//! # Client Handle
//!
//! The registry's view of one destination client: its identity, the metadata
//! other connections may update, and the sending half of its bounded outbound
//! queue. The receiving half belongs to exactly one writer task (see
//! `delivery`), so the queue is many-writer, single-reader.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError, RwLock};

use bytes::Bytes;
use tokio::sync::mpsc::{self, error::TrySendError};
use tokio_util::sync::CancellationToken;

/// A raw packet queued for one destination, tagged with the sending client so
/// delivery rates can be attributed to the (source, destination) edge.
#[derive(Debug, Clone)]
pub struct OutboundItem {
    pub source: String,
    pub frame: Bytes,
}

/// Result of a non-blocking enqueue attempt. Neither `Full` nor `Closed` is an
/// error: delivery is best-effort.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EnqueueOutcome {
    Queued,
    /// The queue was at capacity; the item was dropped and counted.
    Full,
    /// The client is being torn down; the item was discarded.
    Closed,
}

#[derive(Debug)]
pub struct Client {
    namespace: String,
    name: String,
    description: RwLock<String>,
    last_type: RwLock<String>,
    outbound: mpsc::Sender<OutboundItem>,
    drops: AtomicU64,
    /// Latest delivery rate (Hz) per source client.
    edge_rates: Mutex<HashMap<String, f64>>,
    closed: CancellationToken,
}

impl Client {
    /// Creates a client and its outbound queue. The receiver must be handed to
    /// the writer task for this client.
    pub fn new(
        namespace: impl Into<String>,
        name: impl Into<String>,
        queue_depth: usize,
    ) -> (Arc<Self>, mpsc::Receiver<OutboundItem>) {
        let (tx, rx) = mpsc::channel(queue_depth.max(1));
        let client = Arc::new(Self {
            namespace: namespace.into(),
            name: name.into(),
            description: RwLock::new(String::new()),
            last_type: RwLock::new(String::new()),
            outbound: tx,
            drops: AtomicU64::new(0),
            edge_rates: Mutex::new(HashMap::new()),
            closed: CancellationToken::new(),
        });
        (client, rx)
    }

    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Non-blocking enqueue. Never waits for the writer.
    pub fn enqueue(&self, item: OutboundItem) -> EnqueueOutcome {
        if self.closed.is_cancelled() {
            return EnqueueOutcome::Closed;
        }
        match self.outbound.try_send(item) {
            Ok(()) => EnqueueOutcome::Queued,
            Err(TrySendError::Full(_)) => {
                self.drops.fetch_add(1, Ordering::Relaxed);
                EnqueueOutcome::Full
            }
            Err(TrySendError::Closed(_)) => EnqueueOutcome::Closed,
        }
    }

    /// Marks the client closed. Its writer stops and later enqueues are
    /// discarded. Idempotent.
    pub fn close(&self) {
        self.closed.cancel();
    }

    pub fn is_closed(&self) -> bool {
        self.closed.is_cancelled()
    }

    /// Token cancelled when the client is closed.
    pub fn closed_token(&self) -> &CancellationToken {
        &self.closed
    }

    pub fn description(&self) -> String {
        self.description
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn set_description(&self, description: impl Into<String>) {
        *self
            .description
            .write()
            .unwrap_or_else(PoisonError::into_inner) = description.into();
    }

    /// Type tag of the last envelope this client sent and the hub accepted.
    pub fn last_type(&self) -> String {
        self.last_type
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn set_last_type(&self, msg_type: impl Into<String>) {
        *self.last_type.write().unwrap_or_else(PoisonError::into_inner) = msg_type.into();
    }

    /// Items dropped because the outbound queue was full.
    pub fn drops(&self) -> u64 {
        self.drops.load(Ordering::Relaxed)
    }

    pub fn record_edge_rate(&self, source: &str, rate: f64) {
        self.edge_rates
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(source.to_string(), rate);
    }

    /// Snapshot of the latest delivery rate per source client.
    pub fn edge_rates(&self) -> HashMap<String, f64> {
        self.edge_rates
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn item(n: u8) -> OutboundItem {
        OutboundItem {
            source: "robotA".into(),
            frame: Bytes::from(vec![n]),
        }
    }

    #[test]
    fn full_queue_drops_without_blocking() {
        let (client, mut rx) = Client::new("t1", "robotB", 2);

        assert_eq!(client.enqueue(item(1)), EnqueueOutcome::Queued);
        assert_eq!(client.enqueue(item(2)), EnqueueOutcome::Queued);
        assert_eq!(client.enqueue(item(3)), EnqueueOutcome::Full);
        assert_eq!(client.enqueue(item(4)), EnqueueOutcome::Full);
        assert_eq!(client.drops(), 2);

        assert_eq!(rx.try_recv().unwrap().frame[0], 1);
        assert_eq!(client.enqueue(item(5)), EnqueueOutcome::Queued);
    }

    #[test]
    fn closed_client_discards() {
        let (client, rx) = Client::new("t1", "robotB", 2);
        client.close();
        assert_eq!(client.enqueue(item(1)), EnqueueOutcome::Closed);
        assert_eq!(client.drops(), 0);

        let (client, rx2) = Client::new("t1", "robotC", 2);
        drop(rx2);
        assert_eq!(client.enqueue(item(1)), EnqueueOutcome::Closed);
        drop(rx);
    }

    #[test]
    fn metadata_is_shared() {
        let (client, _rx) = Client::new("t1", "robotB", 1);
        client.set_description("front camera");
        client.set_last_type("sensor_msgs/Image");
        client.record_edge_rate("robotA", 12.5);

        assert_eq!(client.description(), "front camera");
        assert_eq!(client.last_type(), "sensor_msgs/Image");
        assert_eq!(client.edge_rates().get("robotA"), Some(&12.5));
    }
}
