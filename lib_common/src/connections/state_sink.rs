//! # State Sink
//!
//! The narrow capability the routing core uses to mirror client state.
//!
//! Every call made on the routing path is best-effort: the sink may drop the
//! command rather than make a processor or writer wait. Only teardown and
//! shutdown cleanup use `submit_blocking`. Sink failures never travel back to
//! the caller.

use std::sync::Arc;

use async_trait::async_trait;

/// A single mirrored mutation. Keys are scoped by namespace.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SinkCommand {
    RecordField {
        namespace: String,
        key: String,
        value: String,
    },
    RemoveField {
        namespace: String,
        key: String,
    },
    AddToSet {
        namespace: String,
        set_key: String,
        member: String,
    },
    RemoveFromSet {
        namespace: String,
        set_key: String,
        member: String,
    },
}

/// Shared handle passed to every connection task.
pub type SharedSink = Arc<dyn StateSink>;

/// Store key for `key` inside `namespace`.
pub fn storage_key(namespace: &str, key: &str) -> String {
    format!("{}:{}", namespace, key)
}

#[async_trait]
pub trait StateSink: Send + Sync {
    /// Queues a command if there is room; drops it otherwise.
    fn submit(&self, command: SinkCommand);

    /// Waits until the command is queued. Teardown and shutdown only.
    async fn submit_blocking(&self, command: SinkCommand);

    /// Flushes what is queued and releases the backing connection.
    async fn close(&self);

    fn record_field(&self, namespace: &str, key: &str, value: String) {
        self.submit(SinkCommand::RecordField {
            namespace: namespace.to_string(),
            key: key.to_string(),
            value,
        });
    }

    fn remove_field(&self, namespace: &str, key: &str) {
        self.submit(SinkCommand::RemoveField {
            namespace: namespace.to_string(),
            key: key.to_string(),
        });
    }

    fn add_to_set(&self, namespace: &str, set_key: &str, member: &str) {
        self.submit(SinkCommand::AddToSet {
            namespace: namespace.to_string(),
            set_key: set_key.to_string(),
            member: member.to_string(),
        });
    }

    fn remove_from_set(&self, namespace: &str, set_key: &str, member: &str) {
        self.submit(SinkCommand::RemoveFromSet {
            namespace: namespace.to_string(),
            set_key: set_key.to_string(),
            member: member.to_string(),
        });
    }
}

/// Sink used when no store is configured.
#[derive(Debug, Default, Clone, Copy)]
pub struct NullSink;

#[async_trait]
impl StateSink for NullSink {
    fn submit(&self, _command: SinkCommand) {}

    async fn submit_blocking(&self, _command: SinkCommand) {}

    async fn close(&self) {}
}
