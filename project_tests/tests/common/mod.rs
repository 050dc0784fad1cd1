#![allow(dead_code)]

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use lib_common::codec::{self, Envelope};
use lib_common::connections::MemorySink;
use lib_common::routing::{HubConfig, RelayContext};
use lib_common::transport::websocket;
use serde_json::value::RawValue;
use tokio::net::{TcpListener, TcpStream};
use tokio::time::{sleep, timeout, Instant};
use tokio_tungstenite::tungstenite::protocol::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use tokio_util::sync::CancellationToken;

pub type Ws = WebSocketStream<MaybeTlsStream<TcpStream>>;
pub type WsRead = SplitStream<Ws>;
pub type WsWrite = SplitSink<Ws, Message>;

/// Queues deep enough that nothing is dropped while a test bursts frames.
pub fn roomy_config() -> HubConfig {
    HubConfig {
        outbound_queue_depth: 32,
        inbound_queue_depth: 32,
        ..HubConfig::default()
    }
}

pub struct TestHub {
    pub addr: SocketAddr,
    pub ctx: RelayContext,
    pub sink: Arc<MemorySink>,
    pub shutdown: CancellationToken,
}

impl TestHub {
    pub async fn start(config: HubConfig) -> Self {
        let sink = Arc::new(MemorySink::new());
        let ctx = RelayContext::new(config, sink.clone());
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let shutdown = CancellationToken::new();
        tokio::spawn(websocket::serve(listener, ctx.clone(), shutdown.clone()));
        Self {
            addr,
            ctx,
            sink,
            shutdown,
        }
    }

    pub fn url(&self, path: &str) -> String {
        format!("ws://{}{}", self.addr, path)
    }

    pub async fn connect(&self, path: &str) -> (WsWrite, WsRead) {
        let (ws, _) = connect_async(self.url(path)).await.unwrap();
        ws.split()
    }

    /// Connects `/<ns>/<name>/receiving` and waits until the hub has it.
    pub async fn receiver(&self, namespace: &str, name: &str) -> (WsWrite, WsRead) {
        let pair = self.connect(&format!("/{namespace}/{name}/receiving")).await;
        let hub = self.ctx.hub.clone();
        let (ns, n) = (namespace.to_string(), name.to_string());
        wait_until(move || hub.lookup(&ns, &n).is_some()).await;
        pair
    }
}

impl Drop for TestHub {
    fn drop(&mut self) {
        self.shutdown.cancel();
    }
}

pub fn envelope(from: &str, to: &[&str], topic: &str, stamp: f64, msg: &str) -> Envelope {
    Envelope {
        to: to.iter().map(|s| s.to_string()).collect(),
        from: from.to_string(),
        topic: topic.to_string(),
        msg_type: "std_msgs/String".to_string(),
        stamp,
        msg: Some(RawValue::from_string(msg.to_string()).unwrap()),
        shared_secret: "t1".to_string(),
    }
}

pub fn frame(from: &str, to: &[&str], topic: &str, stamp: f64) -> Vec<u8> {
    codec::encode(&envelope(from, to, topic, stamp, r#"{"data":"x"}"#), [0; 4]).unwrap()
}

/// Sends a frame on a source connection and waits for its one-byte ack.
pub async fn send_and_ack(write: &mut WsWrite, read: &mut WsRead, frame: Vec<u8>) {
    write.send(Message::binary(frame)).await.unwrap();
    let ack = timeout(Duration::from_secs(2), read.next())
        .await
        .expect("ack in time")
        .unwrap()
        .unwrap();
    assert_eq!(ack.into_data().as_ref(), &[0u8]);
}

/// Next non-heartbeat binary frame, or `None` if nothing arrives in `wait`.
pub async fn next_data(read: &mut WsRead, wait: Duration) -> Option<Vec<u8>> {
    let deadline = Instant::now() + wait;
    loop {
        let remaining = deadline.checked_duration_since(Instant::now())?;
        match timeout(remaining, read.next()).await {
            Ok(Some(Ok(Message::Binary(data)))) if data.len() > 1 => return Some(data.to_vec()),
            Ok(Some(Ok(_))) => continue,
            _ => return None,
        }
    }
}

pub async fn wait_until(mut check: impl FnMut() -> bool) {
    let deadline = Instant::now() + Duration::from_secs(5);
    while !check() {
        assert!(Instant::now() < deadline, "condition not reached in time");
        sleep(Duration::from_millis(10)).await;
    }
}
