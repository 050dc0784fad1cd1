//! # Datagram Transport
//!
//! Connectionless adapter over one UDP socket.
//!
//! ## Protocol
//! 1.  A peer announces itself with the plaintext datagram
//!     `CONNECT:<namespace>:<name>`; the hub answers `HANDSHAKE`.
//! 2.  The first handshake for a (namespace, name) registers a destination
//!     client and starts its processor. A repeated handshake only moves the
//!     session to the sender's current endpoint; queues and rate trackers are
//!     kept.
//! 3.  Every other datagram from a known endpoint is a frame for that
//!     session's inbound queue (dropped when full). Datagrams from unknown
//!     endpoints are ignored.
//! 4.  UDP has no disconnect, so a session with no inbound traffic for the
//!     idle timeout is torn down. So is a session whose destination was
//!     closed, for example by a newer registration under the same name.
//!
//! One task owns the socket's receive side and every session map, so the
//! maps need no locking. Writers send through the shared socket. Nothing on
//! the receive loop waits on the state sink: announcements are best-effort
//! and teardowns run on their own tasks.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::{Arc, PoisonError, RwLock};
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use thiserror::Error;
use tokio::net::{ToSocketAddrs, UdpSocket};
use tokio::task::{JoinHandle, JoinSet};
use tokio::time::{interval, Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;

use crate::routing::mirror::retire_source;
use crate::routing::{
    open_destination, run_destination, spawn_source, Client, ConnectionIdentity, FrameWriter,
    InboundQueue, ReadMeter, RelayContext, SessionStats, TransportError,
};

pub const HANDSHAKE_PREFIX: &[u8] = b"CONNECT:";
pub const HANDSHAKE_REPLY: &[u8] = b"HANDSHAKE";

/// Largest datagram the receive loop accepts.
const MAX_DATAGRAM: usize = 65_536;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum HandshakeError {
    #[error("handshake is not valid UTF-8")]
    NotUtf8,

    #[error("handshake must be CONNECT:<namespace>:<name>")]
    Malformed,

    #[error("handshake has an empty namespace or name")]
    EmptyField,
}

/// Parses a handshake datagram. `Ok(None)` means the datagram is not a
/// handshake at all.
pub fn parse_handshake(datagram: &[u8]) -> Result<Option<ConnectionIdentity>, HandshakeError> {
    let Some(body) = datagram.strip_prefix(HANDSHAKE_PREFIX) else {
        return Ok(None);
    };
    let body = std::str::from_utf8(body).map_err(|_| HandshakeError::NotUtf8)?;
    let body = body.trim_end_matches(['\r', '\n', '\0']);

    let (namespace, name) = body.split_once(':').ok_or(HandshakeError::Malformed)?;
    if namespace.is_empty() || name.is_empty() {
        return Err(HandshakeError::EmptyField);
    }
    Ok(Some(ConnectionIdentity::new(namespace, name)))
}

type SessionKey = (String, String);

struct PeerSession {
    identity: ConnectionIdentity,
    peer: Arc<RwLock<SocketAddr>>,
    client: Arc<Client>,
    inbound: InboundQueue,
    meter: ReadMeter,
    last_seen: Instant,
    processor: JoinHandle<SessionStats>,
    writer: JoinHandle<Result<(), TransportError>>,
}

pub struct DatagramServer {
    socket: Arc<UdpSocket>,
    ctx: RelayContext,
    idle_timeout: Duration,
    sessions: HashMap<SessionKey, PeerSession>,
    by_addr: HashMap<SocketAddr, SessionKey>,
    /// Session teardowns in flight. They run off the receive loop.
    teardowns: JoinSet<()>,
}

impl DatagramServer {
    pub async fn bind(
        addr: impl ToSocketAddrs,
        ctx: RelayContext,
        idle_timeout: Duration,
    ) -> std::io::Result<Self> {
        let socket = UdpSocket::bind(addr).await?;
        Ok(Self {
            socket: Arc::new(socket),
            ctx,
            idle_timeout,
            sessions: HashMap::new(),
            by_addr: HashMap::new(),
            teardowns: JoinSet::new(),
        })
    }

    pub fn local_addr(&self) -> std::io::Result<SocketAddr> {
        self.socket.local_addr()
    }

    /// Receive loop. Returns once `shutdown` is cancelled and every session
    /// has been torn down.
    pub async fn run(mut self, shutdown: CancellationToken) {
        tracing::info!(addr = ?self.socket.local_addr().ok(), "Datagram transport listening");

        let reap_every = (self.idle_timeout / 2).max(Duration::from_millis(50));
        let mut reaper = interval(reap_every);
        reaper.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut buf = vec![0u8; MAX_DATAGRAM];

        loop {
            tokio::select! {
                _ = shutdown.cancelled() => break,
                _ = reaper.tick() => self.reap(),
                received = self.socket.recv_from(&mut buf) => match received {
                    Ok((len, addr)) => self.on_datagram(&buf[..len], addr).await,
                    Err(e) => tracing::warn!(error = %e, "Datagram receive failed"),
                },
            }
        }

        let keys: Vec<SessionKey> = self.sessions.keys().cloned().collect();
        for key in keys {
            self.end_session(&key, "shutdown", true);
        }
        while self.teardowns.join_next().await.is_some() {}
        tracing::info!("Datagram transport stopped");
    }

    async fn on_datagram(&mut self, data: &[u8], addr: SocketAddr) {
        match parse_handshake(data) {
            Ok(Some(identity)) => self.on_handshake(identity, addr).await,
            Err(e) => tracing::debug!(peer = %addr, error = %e, "Rejected handshake"),
            Ok(None) => {
                let Some(session) = self.by_addr.get(&addr).and_then(|k| self.sessions.get_mut(k))
                else {
                    tracing::debug!(peer = %addr, "Datagram from unknown endpoint");
                    return;
                };
                session.last_seen = Instant::now();
                session.inbound.push(Bytes::copy_from_slice(data));
                let member = session.identity.mirror_member();
                session
                    .meter
                    .observe(&self.ctx, &session.identity.namespace, &member);
            }
        }
    }

    /// Attaches the peer, then acknowledges with `HANDSHAKE`. The reply is
    /// sent only once the peer is registered.
    async fn on_handshake(&mut self, identity: ConnectionIdentity, addr: SocketAddr) {
        self.attach(identity, addr);
        if let Err(e) = self.socket.send_to(HANDSHAKE_REPLY, addr).await {
            tracing::warn!(peer = %addr, error = %e, "Handshake reply failed");
        }
    }

    /// # Attach
    ///
    /// ## Workflow
    /// 1.  Known, still-live session: point it at `addr`.
    /// 2.  Otherwise retire any dead session under this name and start a new
    ///     one: destination client, writer task, processor task.
    ///
    /// Never waits on the state sink or on another session's teardown.
    fn attach(&mut self, identity: ConnectionIdentity, addr: SocketAddr) {
        let key: SessionKey = (identity.namespace.clone(), identity.name.clone());
        if let Some(session) = self.sessions.get_mut(&key) {
            if !session.client.is_closed() {
                let previous = std::mem::replace(
                    &mut *session.peer.write().unwrap_or_else(PoisonError::into_inner),
                    addr,
                );
                session.last_seen = Instant::now();
                if previous != addr {
                    self.by_addr.remove(&previous);
                    self.by_addr.insert(addr, key);
                    tracing::info!(
                        namespace = %identity.namespace,
                        client = %identity.name,
                        peer = %addr,
                        "Datagram client moved endpoint"
                    );
                }
                return;
            }
            // The new session mirrors under the same keys.
            self.end_session(&key, "replaced", false);
        }

        // The endpoint may still belong to a session under another name.
        if let Some(old_key) = self.by_addr.get(&addr).cloned() {
            self.end_session(&old_key, "endpoint reused", true);
        }

        let peer = Arc::new(RwLock::new(addr));
        let (client, rx) = open_destination(&self.ctx, &identity);
        let writer = tokio::spawn({
            let ctx = self.ctx.clone();
            let client = client.clone();
            let writer = UdpFrameWriter {
                socket: self.socket.clone(),
                peer: peer.clone(),
            };
            async move { run_destination(&ctx, client, rx, writer).await }
        });
        let (inbound, processor) = spawn_source(self.ctx.clone(), identity.clone());

        tracing::info!(
            namespace = %identity.namespace,
            client = %identity.name,
            peer = %addr,
            "Datagram client connected"
        );
        self.by_addr.insert(addr, key.clone());
        self.sessions.insert(
            key,
            PeerSession {
                identity,
                peer,
                client,
                inbound,
                meter: ReadMeter::new(self.ctx.config.read_rate_threshold),
                last_seen: Instant::now(),
                processor,
                writer,
            },
        );
    }

    fn reap(&mut self) {
        while self.teardowns.try_join_next().is_some() {}

        let expired: Vec<SessionKey> = self
            .sessions
            .iter()
            .filter(|(_, s)| s.client.is_closed() || s.last_seen.elapsed() >= self.idle_timeout)
            .map(|(k, _)| k.clone())
            .collect();
        for key in expired {
            self.end_session(&key, "idle", true);
        }
    }

    /// Detaches the session from the receive loop at once, then finishes
    /// its teardown on a separate task: stop the writer, drain the
    /// processor and, when `retire` is set, remove the mirrored source keys.
    fn end_session(&mut self, key: &SessionKey, reason: &'static str, retire: bool) {
        let Some(session) = self.sessions.remove(key) else {
            return;
        };
        let addr = *session.peer.read().unwrap_or_else(PoisonError::into_inner);
        if self.by_addr.get(&addr) == Some(key) {
            self.by_addr.remove(&addr);
        }
        session.client.close();

        let sink = self.ctx.sink.clone();
        self.teardowns.spawn(async move {
            let PeerSession {
                identity,
                inbound,
                meter,
                processor,
                writer,
                ..
            } = session;
            let _ = writer.await;
            drop(inbound);
            let stats = processor.await.unwrap_or_default();
            if retire {
                retire_source(sink.as_ref(), &identity.namespace, &identity.mirror_member()).await;
            }

            tracing::info!(
                namespace = %identity.namespace,
                client = %identity.name,
                reason,
                accepted = stats.accepted,
                rejected = stats.rejected,
                read_rate = meter.rate(),
                "Datagram client disconnected"
            );
        });
    }
}

/// Sends frames to a peer's current endpoint through the shared socket.
pub struct UdpFrameWriter {
    socket: Arc<UdpSocket>,
    peer: Arc<RwLock<SocketAddr>>,
}

#[async_trait]
impl FrameWriter for UdpFrameWriter {
    async fn write_frame(&mut self, frame: Bytes) -> Result<(), TransportError> {
        let addr = *self.peer.read().unwrap_or_else(PoisonError::into_inner);
        self.socket
            .send_to(&frame, addr)
            .await
            .map(|_| ())
            .map_err(|e| TransportError::Write(e.to_string()))
    }

    async fn close(&mut self) {}
}
