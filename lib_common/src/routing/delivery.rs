//! # Outbound Delivery
//!
//! One writer task per destination client. It drains the client's bounded
//! queue into the transport, keeps idle connections alive with heartbeat
//! frames, and measures the delivery rate of every (source, destination)
//! edge.
//!
//! ## Lifecycle
//! 1.  `open_destination` registers the client and mirrors it.
//! 2.  `run_destination` runs the writer until the client is closed or a
//!     write fails, then tears down: the client leaves the registry (unless a
//!     newer registration already replaced it) and its mirrored keys are
//!     removed.

use std::collections::HashMap;
use std::sync::Arc;

use bytes::Bytes;
use tokio::sync::mpsc;

use super::client::{Client, OutboundItem};
use super::connection::{ConnectionIdentity, FrameWriter, TransportError};
use super::context::RelayContext;
use super::heartbeat::{Heartbeat, HEARTBEAT_FRAME};
use super::mirror::{announce_destination, edge_rate_key, retire_destination};
use super::rate::RateTracker;

/// Registers a destination client for `identity` and mirrors it.
pub fn open_destination(
    ctx: &RelayContext,
    identity: &ConnectionIdentity,
) -> (Arc<Client>, mpsc::Receiver<OutboundItem>) {
    let (client, rx) = Client::new(
        identity.namespace.as_str(),
        identity.name.as_str(),
        ctx.config.outbound_queue_depth,
    );
    ctx.hub.register(Arc::clone(&client));
    announce_destination(ctx.sink.as_ref(), &client);
    tracing::info!(
        namespace = %identity.namespace,
        client = %identity.name,
        "Destination registered"
    );
    (client, rx)
}

/// Runs the writer for `client`, then tears it down.
pub async fn run_destination<W: FrameWriter>(
    ctx: &RelayContext,
    client: Arc<Client>,
    rx: mpsc::Receiver<OutboundItem>,
    writer: W,
) -> Result<(), TransportError> {
    let result = run_writer(ctx, &client, rx, writer).await;
    if let Err(e) = &result {
        tracing::warn!(
            namespace = %client.namespace(),
            client = %client.name(),
            error = %e,
            "Destination write failed"
        );
    }

    if ctx.hub.unregister(&client) {
        retire_destination(ctx.sink.as_ref(), &client).await;
    }
    tracing::info!(
        namespace = %client.namespace(),
        client = %client.name(),
        drops = client.drops(),
        "Destination closed"
    );
    result
}

/// # Writer Loop
///
/// Exits with `Ok` once the client is closed, or with the first write error.
pub async fn run_writer<W: FrameWriter>(
    ctx: &RelayContext,
    client: &Client,
    mut rx: mpsc::Receiver<OutboundItem>,
    mut writer: W,
) -> Result<(), TransportError> {
    let threshold = ctx.config.delivery_rate_threshold;
    let mut heartbeat = Heartbeat::new(ctx.config.heartbeat_interval());
    let mut rates: HashMap<String, RateTracker> = HashMap::new();
    let closed = client.closed_token().clone();

    let result = loop {
        tokio::select! {
            biased;
            _ = closed.cancelled() => break Ok(()),
            item = rx.recv() => {
                let Some(OutboundItem { source, frame }) = item else { break Ok(()) };
                if let Err(e) = writer.write_frame(frame).await {
                    break Err(e);
                }
                heartbeat.reset();

                let tracker = rates
                    .entry(source.clone())
                    .or_insert_with(|| RateTracker::new(threshold));
                if let Some(sample) = tracker.observe() {
                    client.record_edge_rate(&source, sample.rate);
                    ctx.sink.record_field(
                        client.namespace(),
                        &edge_rate_key(client.name(), &source),
                        sample.rate.to_string(),
                    );
                }
            }
            _ = heartbeat.tick() => {
                if let Err(e) = writer.write_frame(Bytes::from_static(HEARTBEAT_FRAME)).await {
                    break Err(e);
                }
            }
        }
    };
    writer.close().await;
    result
}
