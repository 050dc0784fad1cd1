//! # Redis Cache Implementation
//!
//! Mirrors hub state into Redis. Commands are pushed onto a bounded queue and
//! executed in order by one writer task that owns a `ConnectionManager`, so
//! callers on the routing path never touch the network.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, PoisonError};

use async_trait::async_trait;
use redis::aio::ConnectionManager;
use redis::{Client, Cmd};
use thiserror::Error;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use super::state_sink::{storage_key, SinkCommand, StateSink};

/// Failures while setting up the Redis sink.
#[derive(Debug, Error)]
pub enum SinkError {
    #[error("Failed to connect to redis: {0}")]
    Connection(#[from] redis::RedisError),
}

/// A handler for Redis state mirroring.
pub struct RedisSink {
    /// Sending half of the command queue; `None` once closed.
    tx: Mutex<Option<mpsc::Sender<SinkCommand>>>,
    /// The writer task draining the queue.
    worker: Mutex<Option<JoinHandle<()>>>,
    /// Commands dropped because the queue was full or closed.
    dropped: AtomicU64,
}

impl RedisSink {
    /// Opens the connection and starts the writer task.
    ///
    /// # Arguments
    /// * `url` - The redis URL (e.g., "redis://127.0.0.1/").
    /// * `queue_depth` - Commands buffered before best-effort writes are dropped.
    pub async fn connect(url: &str, queue_depth: usize) -> Result<Self, SinkError> {
        let client = Client::open(url)?;
        let conn = client.get_connection_manager().await?;

        let (tx, rx) = mpsc::channel(queue_depth.max(1));
        let worker = tokio::spawn(run_writer(conn, rx));
        tracing::info!(url = %url, "Redis state sink connected");

        Ok(Self {
            tx: Mutex::new(Some(tx)),
            worker: Mutex::new(Some(worker)),
            dropped: AtomicU64::new(0),
        })
    }

    /// Number of best-effort commands that never reached Redis.
    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }

    fn sender(&self) -> Option<mpsc::Sender<SinkCommand>> {
        self.tx
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

#[async_trait]
impl StateSink for RedisSink {
    fn submit(&self, command: SinkCommand) {
        let guard = self.tx.lock().unwrap_or_else(PoisonError::into_inner);
        let queued = match guard.as_ref() {
            Some(tx) => tx.try_send(command).is_ok(),
            None => false,
        };
        if !queued {
            self.dropped.fetch_add(1, Ordering::Relaxed);
        }
    }

    async fn submit_blocking(&self, command: SinkCommand) {
        if let Some(tx) = self.sender() {
            if tx.send(command).await.is_err() {
                self.dropped.fetch_add(1, Ordering::Relaxed);
            }
        }
    }

    async fn close(&self) {
        // Dropping the last sender lets the writer drain and exit.
        self.tx.lock().unwrap_or_else(PoisonError::into_inner).take();
        let worker = self
            .worker
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(worker) = worker {
            let _ = worker.await;
        }
        tracing::info!(dropped = self.dropped(), "Redis state sink closed");
    }
}

/// Builds the Redis command for a mirrored mutation.
pub fn to_redis_cmd(command: &SinkCommand) -> Cmd {
    match command {
        SinkCommand::RecordField {
            namespace,
            key,
            value,
        } => {
            let mut cmd = redis::cmd("SET");
            cmd.arg(storage_key(namespace, key)).arg(value);
            cmd
        }
        SinkCommand::RemoveField { namespace, key } => {
            let mut cmd = redis::cmd("DEL");
            cmd.arg(storage_key(namespace, key));
            cmd
        }
        SinkCommand::AddToSet {
            namespace,
            set_key,
            member,
        } => {
            let mut cmd = redis::cmd("SADD");
            cmd.arg(storage_key(namespace, set_key)).arg(member);
            cmd
        }
        SinkCommand::RemoveFromSet {
            namespace,
            set_key,
            member,
        } => {
            let mut cmd = redis::cmd("SREM");
            cmd.arg(storage_key(namespace, set_key)).arg(member);
            cmd
        }
    }
}

async fn run_writer(mut conn: ConnectionManager, mut rx: mpsc::Receiver<SinkCommand>) {
    while let Some(command) = rx.recv().await {
        if let Err(e) = to_redis_cmd(&command).query_async::<()>(&mut conn).await {
            tracing::warn!(error = %e, ?command, "Redis state mirror write failed");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn commands_map_to_namespaced_keys() {
        let set = to_redis_cmd(&SinkCommand::RecordField {
            namespace: "tenant".into(),
            key: "clients:robotB:description".into(),
            value: "front camera".into(),
        });
        let args: Vec<Vec<u8>> = set
            .args_iter()
            .filter_map(|a| match a {
                redis::Arg::Simple(bytes) => Some(bytes.to_vec()),
                _ => None,
            })
            .collect();
        assert_eq!(
            args,
            vec![
                b"SET".to_vec(),
                b"tenant:clients:robotB:description".to_vec(),
                b"front camera".to_vec(),
            ]
        );

        let srem = to_redis_cmd(&SinkCommand::RemoveFromSet {
            namespace: "tenant".into(),
            set_key: "clients:list".into(),
            member: "robotB".into(),
        });
        let args: Vec<Vec<u8>> = srem
            .args_iter()
            .filter_map(|a| match a {
                redis::Arg::Simple(bytes) => Some(bytes.to_vec()),
                _ => None,
            })
            .collect();
        assert_eq!(
            args,
            vec![
                b"SREM".to_vec(),
                b"tenant:clients:list".to_vec(),
                b"robotB".to_vec(),
            ]
        );
    }
}
