//! # Source Session
//!
//! Transport-agnostic plumbing for connections that send data into the hub.
//!
//! Duplex sources (`run_source`) run the `ClientProcessor` inside their own
//! read loop and acknowledge each frame only after it has been processed, so
//! the peer is paced by the hub.
//!
//! Datagram sources have no acknowledgement. They get a bounded inbound queue
//! feeding one processor task (`spawn_source`); the transport pushes without
//! waiting and a full queue drops the frame. Read rates are measured where
//! frames are read, before queueing.

use std::sync::atomic::{AtomicU64, Ordering};

use bytes::Bytes;
use tokio::sync::mpsc::{self, error::TrySendError};
use tokio::task::JoinHandle;

use super::client::EnqueueOutcome;
use super::connection::{ConnectionIdentity, FrameReader, FrameWriter, TransportError};
use super::context::RelayContext;
use super::mirror::{announce_source, client_key, retire_source};
use super::processor::{ClientProcessor, ProcessError};
use super::rate::RateTracker;

/// The single byte written back after every frame a duplex source sends.
pub const ACK_FRAME: &[u8] = &[0];

/// Totals reported when a processor task ends.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SessionStats {
    pub accepted: u64,
    pub rejected: u64,
    pub undecodable: u64,
}

/// Producer side of a source's inbound queue.
#[derive(Debug)]
pub struct InboundQueue {
    tx: mpsc::Sender<Bytes>,
    dropped: AtomicU64,
}

impl InboundQueue {
    /// Non-blocking push.
    pub fn push(&self, frame: Bytes) -> EnqueueOutcome {
        match self.tx.try_send(frame) {
            Ok(()) => EnqueueOutcome::Queued,
            Err(TrySendError::Full(_)) => {
                self.dropped.fetch_add(1, Ordering::Relaxed);
                EnqueueOutcome::Full
            }
            Err(TrySendError::Closed(_)) => EnqueueOutcome::Closed,
        }
    }

    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }
}

/// Starts the processor task for a source. The task ends once the returned
/// queue is dropped and everything already queued has been processed.
pub fn spawn_source(
    ctx: RelayContext,
    identity: ConnectionIdentity,
) -> (InboundQueue, JoinHandle<SessionStats>) {
    let (tx, rx) = mpsc::channel(ctx.config.inbound_queue_depth.max(1));
    let processor = ClientProcessor::new(ctx, identity);
    let handle = tokio::spawn(run_processor(processor, rx));
    (
        InboundQueue {
            tx,
            dropped: AtomicU64::new(0),
        },
        handle,
    )
}

async fn run_processor(mut processor: ClientProcessor, mut rx: mpsc::Receiver<Bytes>) -> SessionStats {
    let mut stats = SessionStats::default();
    while let Some(frame) = rx.recv().await {
        stats.process(&mut processor, &frame);
    }
    stats
}

impl SessionStats {
    /// Runs one frame through `processor` and counts the outcome.
    fn process(&mut self, processor: &mut ClientProcessor, frame: &Bytes) {
        match processor.process(frame) {
            Ok(_) => self.accepted += 1,
            Err(ProcessError::Decode(e)) => {
                self.undecodable += 1;
                tracing::debug!(client = %processor.identity().name, error = %e, "Dropping undecodable packet");
            }
            Err(e) => {
                self.rejected += 1;
                tracing::debug!(client = %processor.identity().name, reason = %e, "Dropping packet");
            }
        }
    }
}

/// Read-rate meter for one source connection.
pub struct ReadMeter {
    tracker: RateTracker,
    rate: f64,
}

impl ReadMeter {
    pub fn new(threshold: u64) -> Self {
        Self {
            tracker: RateTracker::new(threshold),
            rate: 0.0,
        }
    }

    /// Counts one read; mirrors the rate whenever a window closes.
    pub fn observe(&mut self, ctx: &RelayContext, namespace: &str, member: &str) {
        if let Some(sample) = self.tracker.observe() {
            self.rate = sample.rate;
            ctx.sink
                .record_field(namespace, &client_key(member, "freq"), sample.rate.to_string());
        }
    }

    /// Latest read rate in Hz; zero until the first window closes.
    pub fn rate(&self) -> f64 {
        self.rate
    }
}

/// # Duplex Source Loop
///
/// ## Workflow
/// 1.  Mirror the source.
/// 2.  For every frame read: count the read, run it through the processor,
///     then write the one-byte acknowledgement.
/// 3.  On clean close or any transport error: remove the mirrored keys and
///     report the transport result.
///
/// No frame is dropped for lack of queue space; a slow processor slows the
/// acknowledgements instead.
pub async fn run_source<R, W>(
    ctx: RelayContext,
    identity: ConnectionIdentity,
    mut reader: R,
    mut acker: W,
) -> Result<SessionStats, TransportError>
where
    R: FrameReader,
    W: FrameWriter,
{
    let namespace = identity.namespace.clone();
    let member = identity.mirror_member();
    announce_source(ctx.sink.as_ref(), &namespace, &member);
    tracing::info!(namespace = %namespace, client = %member, "Source connected");

    let mut processor = ClientProcessor::new(ctx.clone(), identity);
    let mut meter = ReadMeter::new(ctx.config.read_rate_threshold);
    let mut stats = SessionStats::default();

    let result = loop {
        let frame = match reader.read_frame().await {
            Ok(Some(frame)) => frame,
            Ok(None) => break Ok(()),
            Err(e) => break Err(e),
        };
        meter.observe(&ctx, &namespace, &member);
        stats.process(&mut processor, &frame);
        if let Err(e) = acker.write_frame(Bytes::from_static(ACK_FRAME)).await {
            break Err(e);
        }
    };
    acker.close().await;
    retire_source(ctx.sink.as_ref(), &namespace, &member).await;

    match &result {
        Ok(()) => tracing::info!(
            namespace = %namespace,
            client = %member,
            accepted = stats.accepted,
            rejected = stats.rejected,
            undecodable = stats.undecodable,
            "Source disconnected"
        ),
        Err(e) => tracing::warn!(
            namespace = %namespace,
            client = %member,
            error = %e,
            "Source connection failed"
        ),
    }
    result.map(|()| stats)
}

#[cfg(test)]
mod tests {
    use std::collections::VecDeque;
    use std::sync::Arc;

    use async_trait::async_trait;
    use serde_json::value::RawValue;

    use super::*;
    use crate::codec::{self, Envelope};
    use crate::connections::MemorySink;
    use crate::routing::client::Client;
    use crate::routing::config::HubConfig;
    use crate::routing::mirror::CLIENT_LIST_KEY;

    struct ScriptedReader {
        frames: VecDeque<Result<Bytes, TransportError>>,
    }

    #[async_trait]
    impl FrameReader for ScriptedReader {
        async fn read_frame(&mut self) -> Result<Option<Bytes>, TransportError> {
            match self.frames.pop_front() {
                Some(Ok(frame)) => Ok(Some(frame)),
                Some(Err(e)) => Err(e),
                None => Ok(None),
            }
        }
    }

    #[derive(Default)]
    struct CountingAcker {
        acks: Arc<AtomicU64>,
    }

    #[async_trait]
    impl FrameWriter for CountingAcker {
        async fn write_frame(&mut self, frame: Bytes) -> Result<(), TransportError> {
            assert_eq!(frame.as_ref(), ACK_FRAME);
            self.acks.fetch_add(1, Ordering::Relaxed);
            Ok(())
        }

        async fn close(&mut self) {}
    }

    fn frame(stamp: f64) -> Bytes {
        let env = Envelope {
            to: vec!["robotB".into()],
            from: "robotA".into(),
            topic: "/robotA/odom".into(),
            msg_type: "nav_msgs/Odometry".into(),
            stamp,
            msg: Some(RawValue::from_string("{}".into()).unwrap()),
            shared_secret: "t1".into(),
        };
        Bytes::from(codec::encode(&env, [0; 4]).unwrap())
    }

    #[tokio::test]
    async fn processes_in_order_and_acks_every_read() {
        let sink = Arc::new(MemorySink::new());
        let ctx = RelayContext::new(HubConfig::default(), sink.clone());
        let (b, mut rx) = Client::new("t1", "robotB", 16);
        ctx.hub.register(b);

        let reader = ScriptedReader {
            frames: [1.0, 2.0, 1.5, 3.0]
                .into_iter()
                .map(|s| Ok(frame(s)))
                .chain(std::iter::once(Ok(Bytes::from_static(b"\0\0\0\0junk"))))
                .collect(),
        };
        let acker = CountingAcker::default();
        let acks = acker.acks.clone();
        let identity = ConnectionIdentity::new("t1", "robotA").with_topic("odom");

        let stats = run_source(ctx, identity, reader, acker).await.unwrap();
        assert_eq!(acks.load(Ordering::Relaxed), 5);
        assert_eq!(
            stats,
            SessionStats {
                accepted: 3,
                rejected: 1,
                undecodable: 1
            }
        );

        let mut delivered = 0;
        while rx.try_recv().is_ok() {
            delivered += 1;
        }
        assert_eq!(delivered, 3);
        assert!(sink.members("t1", CLIENT_LIST_KEY).is_empty());
        assert!(sink.field_keys("t1").is_empty());
    }

    #[tokio::test]
    async fn acknowledged_burst_is_fully_processed() {
        let ctx = RelayContext::new(HubConfig::default(), Arc::new(MemorySink::new()));
        assert_eq!(ctx.config.inbound_queue_depth, 2);
        let (b, mut rx) = Client::new("t1", "robotB", 16);
        ctx.hub.register(b);

        let reader = ScriptedReader {
            frames: (1..=10u8).map(|s| Ok(frame(f64::from(s)))).collect(),
        };
        let acker = CountingAcker::default();
        let acks = acker.acks.clone();

        let stats = run_source(ctx, ConnectionIdentity::new("t1", "robotA"), reader, acker)
            .await
            .unwrap();
        assert_eq!(acks.load(Ordering::Relaxed), 10);
        assert_eq!(stats.accepted, 10);

        let mut stamps = Vec::new();
        while let Ok(item) = rx.try_recv() {
            stamps.push(codec::decode(&item.frame).unwrap().stamp);
        }
        assert_eq!(stamps, (1..=10u8).map(f64::from).collect::<Vec<_>>());
    }

    #[tokio::test]
    async fn read_error_is_reported_after_cleanup() {
        let sink = Arc::new(MemorySink::new());
        let ctx = RelayContext::new(HubConfig::default(), sink.clone());
        let reader = ScriptedReader {
            frames: VecDeque::from([Ok(frame(1.0)), Err(TransportError::Read("reset".into()))]),
        };

        let result = run_source(ctx, ConnectionIdentity::new("t1", "robotA"), reader, CountingAcker::default()).await;
        assert!(matches!(result, Err(TransportError::Read(_))));
        assert!(sink.members("t1", CLIENT_LIST_KEY).is_empty());
    }

    #[test]
    fn full_inbound_queue_drops() {
        let (tx, _rx) = mpsc::channel(1);
        let queue = InboundQueue {
            tx,
            dropped: AtomicU64::new(0),
        };
        assert_eq!(queue.push(Bytes::from_static(b"a")), EnqueueOutcome::Queued);
        assert_eq!(queue.push(Bytes::from_static(b"b")), EnqueueOutcome::Full);
        assert_eq!(queue.dropped(), 1);
    }

    #[test]
    fn read_meter_reports_after_threshold() {
        let ctx = RelayContext::standalone();
        let mut meter = ReadMeter::new(3);
        meter.observe(&ctx, "t1", "robotA");
        meter.observe(&ctx, "t1", "robotA");
        assert_eq!(meter.rate(), 0.0);
        meter.observe(&ctx, "t1", "robotA");
        assert!(meter.rate() > 0.0);
    }
}
