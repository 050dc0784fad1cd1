//! # Connection Abstraction
//!
//! The two capabilities every transport provides to the routing core. The
//! duplex (WebSocket) and datagram (UDP) adapters implement them; the
//! processor, session and delivery loops are written once against them.

use async_trait::async_trait;
use bytes::Bytes;
use thiserror::Error;

/// Failure of the underlying connection. Always fatal to that connection.
#[derive(Debug, Error)]
pub enum TransportError {
    #[error("read failed: {0}")]
    Read(String),

    #[error("write failed: {0}")]
    Write(String),

    #[error("connection closed")]
    Closed,
}

#[async_trait]
pub trait FrameReader: Send {
    /// Next inbound frame. `Ok(None)` means the peer closed cleanly.
    async fn read_frame(&mut self) -> Result<Option<Bytes>, TransportError>;
}

#[async_trait]
pub trait FrameWriter: Send {
    async fn write_frame(&mut self, frame: Bytes) -> Result<(), TransportError>;

    /// Best-effort shutdown of the write side.
    async fn close(&mut self);
}

/// Who a connection claims to be.
///
/// `topic` is the topic path a duplex source connection was opened on (empty
/// for datagram peers). It only shapes the key under which the connection's
/// state is mirrored.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ConnectionIdentity {
    pub namespace: String,
    pub name: String,
    pub topic: String,
}

impl ConnectionIdentity {
    pub fn new(namespace: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            namespace: namespace.into(),
            name: name.into(),
            topic: String::new(),
        }
    }

    pub fn with_topic(mut self, topic: impl Into<String>) -> Self {
        self.topic = topic.into();
        self
    }

    /// Member of `clients:list` for this connection's mirrored state.
    pub fn mirror_member(&self) -> String {
        if self.topic.is_empty() {
            self.name.clone()
        } else {
            format!("{}/{}", self.name, self.topic)
        }
    }
}
