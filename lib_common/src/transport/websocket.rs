//! # WebSocket Transport
//!
//! Duplex adapter built on axum. The request path carries the identity:
//! `/<namespace>/<name>/<topic segments...>`. A path ending in `receiving`
//! opens a destination (outbound only); any other path opens a source whose
//! frames run through the client processor, each read acknowledged with one
//! byte.

use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        Path, State,
    },
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::get,
    Router,
};
use bytes::Bytes;
use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use thiserror::Error;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;

use async_trait::async_trait;

use crate::routing::{
    open_destination, run_destination, run_source, ConnectionIdentity, FrameReader, FrameWriter,
    RelayContext, TransportError,
};

/// Last path segment that marks an outbound-only connection.
pub const RECEIVING_SUFFIX: &str = "receiving";

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PathError {
    #[error("request path has no namespace segment")]
    MissingNamespace,

    #[error("request path has no client name segment")]
    MissingName,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    /// Sends data into the hub.
    Source,
    /// Only receives frames routed to it.
    Destination,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectionPath {
    pub identity: ConnectionIdentity,
    pub role: Role,
}

impl ConnectionPath {
    /// Parses a request path, with or without its leading `/`.
    pub fn parse(path: &str) -> Result<Self, PathError> {
        let mut segments = path.trim_start_matches('/').split('/');

        let namespace = segments
            .next()
            .filter(|s| !s.is_empty())
            .ok_or(PathError::MissingNamespace)?;
        let name = segments
            .next()
            .filter(|s| !s.is_empty())
            .ok_or(PathError::MissingName)?;

        let rest: Vec<&str> = segments.collect();
        let identity = ConnectionIdentity::new(namespace, name);
        if rest.last() == Some(&RECEIVING_SUFFIX) {
            return Ok(Self {
                identity,
                role: Role::Destination,
            });
        }
        Ok(Self {
            identity: identity.with_topic(rest.join("/")),
            role: Role::Source,
        })
    }
}

/// Routes: `/health` and every other path as a WebSocket endpoint.
pub fn router(ctx: RelayContext) -> Router {
    Router::new()
        .route("/health", get(health_handler))
        .route("/{*path}", get(ws_handler))
        .with_state(ctx)
}

/// Serves the router on `listener` until `shutdown` is cancelled.
pub async fn serve(
    listener: TcpListener,
    ctx: RelayContext,
    shutdown: CancellationToken,
) -> std::io::Result<()> {
    tracing::info!(addr = ?listener.local_addr().ok(), "WebSocket transport listening");
    axum::serve(listener, router(ctx))
        .with_graceful_shutdown(async move {
            shutdown.cancelled().await;
            tracing::info!("WebSocket transport shutting down");
        })
        .await
}

async fn health_handler() -> impl IntoResponse {
    (StatusCode::OK, "OK")
}

async fn ws_handler(
    ws: WebSocketUpgrade,
    Path(path): Path<String>,
    State(ctx): State<RelayContext>,
) -> Response {
    match ConnectionPath::parse(&path) {
        Ok(conn) => ws
            .on_upgrade(move |socket| handle_socket(socket, conn, ctx))
            .into_response(),
        Err(e) => {
            tracing::debug!(path = %path, error = %e, "Rejected connection path");
            (StatusCode::BAD_REQUEST, e.to_string()).into_response()
        }
    }
}

async fn handle_socket(socket: WebSocket, conn: ConnectionPath, ctx: RelayContext) {
    let (sink, stream) = socket.split();
    let writer = WsWriter { sink };

    match conn.role {
        Role::Source => {
            // Failures are logged by the session loop.
            let _ = run_source(ctx, conn.identity, WsReader { stream }, writer).await;
        }
        Role::Destination => {
            let (client, rx) = open_destination(&ctx, &conn.identity);

            // Nothing meaningful arrives on a receiving connection; the read
            // side only tells us when the peer goes away.
            let watcher = tokio::spawn({
                let client = client.clone();
                let mut reader = WsReader { stream };
                async move {
                    while let Ok(Some(_)) = reader.read_frame().await {}
                    client.close();
                }
            });
            let _ = run_destination(&ctx, client, rx, writer).await;
            watcher.abort();
        }
    }
}

pub struct WsReader {
    stream: SplitStream<WebSocket>,
}

#[async_trait]
impl FrameReader for WsReader {
    async fn read_frame(&mut self) -> Result<Option<Bytes>, TransportError> {
        loop {
            match self.stream.next().await {
                None | Some(Ok(Message::Close(_))) => return Ok(None),
                Some(Err(e)) => return Err(TransportError::Read(e.to_string())),
                Some(Ok(Message::Binary(data))) => return Ok(Some(data)),
                Some(Ok(Message::Text(text))) => {
                    return Ok(Some(Bytes::copy_from_slice(text.as_str().as_bytes())))
                }
                // Pings are answered by axum.
                Some(Ok(_)) => continue,
            }
        }
    }
}

pub struct WsWriter {
    sink: SplitSink<WebSocket, Message>,
}

#[async_trait]
impl FrameWriter for WsWriter {
    async fn write_frame(&mut self, frame: Bytes) -> Result<(), TransportError> {
        self.sink
            .send(Message::Binary(frame))
            .await
            .map_err(|e| TransportError::Write(e.to_string()))
    }

    async fn close(&mut self) {
        let _ = self.sink.close().await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn source_path_keeps_topic() {
        let conn = ConnectionPath::parse("/t1/robotA/camera/image").unwrap();
        assert_eq!(conn.role, Role::Source);
        assert_eq!(conn.identity.namespace, "t1");
        assert_eq!(conn.identity.name, "robotA");
        assert_eq!(conn.identity.topic, "camera/image");
    }

    #[test]
    fn receiving_suffix_marks_destination() {
        let conn = ConnectionPath::parse("t1/robotB/receiving").unwrap();
        assert_eq!(conn.role, Role::Destination);
        assert_eq!(conn.identity.mirror_member(), "robotB");

        let conn = ConnectionPath::parse("/t1/robotB/any/topic/receiving").unwrap();
        assert_eq!(conn.role, Role::Destination);
    }

    #[test]
    fn bare_identity_is_a_source() {
        let conn = ConnectionPath::parse("/t1/robotA").unwrap();
        assert_eq!(conn.role, Role::Source);
        assert_eq!(conn.identity.topic, "");
    }

    #[test]
    fn missing_segments_are_rejected() {
        assert_eq!(ConnectionPath::parse("/"), Err(PathError::MissingNamespace));
        assert_eq!(ConnectionPath::parse("/t1"), Err(PathError::MissingName));
        assert_eq!(ConnectionPath::parse("/t1//receiving"), Err(PathError::MissingName));
    }
}
