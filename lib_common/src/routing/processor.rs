//! # Client Processor
//!
//! The per-connection state machine run on every inbound packet.
//!
//! ## Workflow (per packet)
//! 1.  Decode the frame. Failures drop the packet.
//! 2.  Reject envelopes whose sender or secret differ from the connection's.
//! 3.  Count the packet toward the per-topic ingest rate. At most
//!     `INGEST_TOPIC_LIMIT` topics are tracked per connection; past that the
//!     trackers start over.
//! 4.  Reject envelopes whose stamp is older than the last accepted one.
//!     Equal stamps are accepted.
//! 5.  Record the stamp and type. On the description sub-topic, update the
//!     description of the client named by topic segment 1; a payload that
//!     does not decode is logged and delivery goes ahead.
//! 6.  Add every broadcast-class client to the destinations, resolve, and
//!     enqueue the *original* frame to each resolved client once.
//! 7.  Mirror the accepted envelope to the state sink, best-effort.
//!
//! Rejections are returned as `ProcessError` so callers can count them; none
//! of them affect the connection.

use std::collections::HashMap;

use bytes::Bytes;
use thiserror::Error;

use crate::codec::{self, DecodeError, Envelope};

use super::client::{EnqueueOutcome, OutboundItem};
use super::connection::ConnectionIdentity;
use super::context::RelayContext;
use super::mirror::client_key;
use super::rate::RateTracker;

const INGEST_TOPIC_LIMIT: usize = 256;

#[derive(Debug, Error)]
pub enum ProcessError {
    #[error(transparent)]
    Decode(#[from] DecodeError),

    #[error("envelope from {claimed:?} does not match connection {expected:?}")]
    IdentityMismatch { claimed: String, expected: String },

    #[error("stamp {stamp} is older than last accepted stamp {last}")]
    OutOfOrder { stamp: f64, last: f64 },
}

/// What happened to one accepted envelope.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Delivery {
    /// Resolved destination names, in resolution order.
    pub destinations: Vec<String>,
    pub queued: usize,
    /// Destinations whose queue was full.
    pub dropped: usize,
}

pub struct ClientProcessor {
    ctx: RelayContext,
    identity: ConnectionIdentity,
    mirror_member: String,
    last_accepted_stamp: f64,
    last_type: String,
    ingest_rates: HashMap<String, RateTracker>,
}

impl ClientProcessor {
    pub fn new(ctx: RelayContext, identity: ConnectionIdentity) -> Self {
        let mirror_member = identity.mirror_member();
        Self {
            ctx,
            identity,
            mirror_member,
            last_accepted_stamp: 0.0,
            last_type: String::new(),
            ingest_rates: HashMap::new(),
        }
    }

    pub fn identity(&self) -> &ConnectionIdentity {
        &self.identity
    }

    pub fn last_accepted_stamp(&self) -> f64 {
        self.last_accepted_stamp
    }

    pub fn last_type(&self) -> &str {
        &self.last_type
    }

    pub fn process(&mut self, frame: &Bytes) -> Result<Delivery, ProcessError> {
        let envelope = codec::decode(frame)?;

        // --- Phase 1: Validate ---
        if envelope.from != self.identity.name || envelope.shared_secret != self.identity.namespace {
            return Err(ProcessError::IdentityMismatch {
                claimed: envelope.from,
                expected: self.identity.name.clone(),
            });
        }
        self.observe_ingest(&envelope);
        if envelope.stamp.is_nan() || envelope.stamp < self.last_accepted_stamp {
            return Err(ProcessError::OutOfOrder {
                stamp: envelope.stamp,
                last: self.last_accepted_stamp,
            });
        }

        // --- Phase 2: Accept ---
        self.last_accepted_stamp = envelope.stamp;
        self.last_type.clone_from(&envelope.msg_type);
        if let Some(me) = self.ctx.hub.lookup(&self.identity.namespace, &self.identity.name) {
            me.set_last_type(envelope.msg_type.as_str());
        }
        if envelope.sub_topic() == self.ctx.config.description_topic {
            self.apply_description(&envelope);
        }

        // --- Phase 3: Resolve and fan out ---
        let namespace = &self.identity.namespace;
        let snapshot = self.ctx.hub.snapshot(namespace);
        let mut requested = envelope.to.clone();
        requested.extend(
            snapshot
                .iter()
                .filter(|c| self.ctx.config.is_broadcast(c.name()))
                .map(|c| c.name().to_string()),
        );
        let targets = self
            .ctx
            .resolver
            .resolve_among(&snapshot, &requested, &envelope.from);

        let mut delivery = Delivery::default();
        for target in &targets {
            delivery.destinations.push(target.name().to_string());
            let item = OutboundItem {
                source: self.identity.name.clone(),
                frame: frame.clone(),
            };
            match target.enqueue(item) {
                EnqueueOutcome::Queued => delivery.queued += 1,
                EnqueueOutcome::Full => {
                    delivery.dropped += 1;
                    tracing::debug!(
                        namespace = %namespace,
                        client = %target.name(),
                        from = %envelope.from,
                        "Outbound queue full, dropping frame"
                    );
                }
                EnqueueOutcome::Closed => {}
            }
        }

        self.mirror(&envelope, &delivery.destinations);
        Ok(delivery)
    }

    fn observe_ingest(&mut self, envelope: &Envelope) {
        let threshold = self.ctx.config.ingest_rate_threshold;
        if self.ingest_rates.len() >= INGEST_TOPIC_LIMIT
            && !self.ingest_rates.contains_key(&envelope.topic)
        {
            self.ingest_rates.clear();
        }
        let tracker = self
            .ingest_rates
            .entry(envelope.topic.clone())
            .or_insert_with(|| RateTracker::new(threshold));
        if let Some(sample) = tracker.observe() {
            tracing::info!(
                topic = %envelope.topic,
                from = %envelope.from,
                rate = sample.rate,
                "Client frequency"
            );
        }
    }

    fn apply_description(&self, envelope: &Envelope) {
        let Some(origin) = envelope.origin_client() else {
            return;
        };
        let description = match envelope.description() {
            Ok(d) => d,
            Err(e) => {
                tracing::debug!(topic = %envelope.topic, error = %e, "Undecodable description payload");
                return;
            }
        };
        let namespace = &self.identity.namespace;
        if self.ctx.hub.set_description(namespace, origin, &description.data) {
            self.ctx
                .sink
                .record_field(namespace, &client_key(origin, "description"), description.data);
        }
    }

    fn mirror(&self, envelope: &Envelope, destinations: &[String]) {
        let sink = &self.ctx.sink;
        let ns = &self.identity.namespace;
        let member = &self.mirror_member;
        sink.record_field(ns, &client_key(member, "to"), destinations.join(" "));
        sink.record_field(ns, &client_key(member, "from"), envelope.from.clone());
        sink.record_field(ns, &client_key(member, "topic"), envelope.topic.clone());
        sink.record_field(ns, &client_key(member, "type"), envelope.msg_type.clone());
        sink.record_field(ns, &client_key(member, "stamp"), envelope.stamp.to_string());
        sink.record_field(ns, &client_key(member, "msg"), envelope.msg_text().to_string());
        sink.record_field(ns, &client_key(member, "privateKey"), envelope.shared_secret.clone());
    }
}
