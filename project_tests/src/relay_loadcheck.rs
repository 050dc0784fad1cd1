use anyhow::{Context, Result};
use chrono::Utc;
use clap::Parser;
use futures_util::{SinkExt, StreamExt};
use lib_common::codec::{self, Envelope};
use serde_json::value::RawValue;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};
use tokio::time::{interval, sleep};
use tokio_tungstenite::{connect_async, tungstenite::protocol::Message};

#[derive(Parser, Debug)]
#[clap(author, version, about = "Sends stamped envelopes through a relay hub and reports what arrives", long_about = None)]
struct Args {
    /// Base WebSocket URL of the hub
    #[clap(long, default_value = "ws://127.0.0.1:50000")]
    url: String,

    /// Tenant namespace (also the shared secret)
    #[clap(long, default_value = "loadcheck")]
    namespace: String,

    #[clap(long, default_value = "check_sender")]
    sender: String,

    #[clap(long, default_value = "check_receiver")]
    receiver: String,

    /// Topic path below the sender name
    #[clap(long, default_value = "loadcheck/data")]
    topic: String,

    /// Messages per second
    #[clap(long, default_value_t = 20)]
    rate: u32,

    /// Number of messages to send
    #[clap(long, default_value_t = 200)]
    count: u64,
}

#[derive(Default)]
struct Counters {
    data: AtomicU64,
    heartbeats: AtomicU64,
    undecodable: AtomicU64,
    acks: AtomicU64,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    let counters = Arc::new(Counters::default());

    // Receiver first, so it is registered before the first message.
    let receiver_url = format!("{}/{}/{}/receiving", args.url, args.namespace, args.receiver);
    println!("Connecting receiver to {}...", receiver_url);
    let (receiver_ws, _) = connect_async(&receiver_url)
        .await
        .with_context(|| format!("connecting receiver to {receiver_url}"))?;
    let (_receiver_write, mut receiver_read) = receiver_ws.split();

    let receiver_counters = Arc::clone(&counters);
    let receiver_task = tokio::spawn(async move {
        while let Some(Ok(msg)) = receiver_read.next().await {
            if let Message::Binary(data) = msg {
                if data.len() == 1 {
                    receiver_counters.heartbeats.fetch_add(1, Ordering::Relaxed);
                } else if codec::decode(&data).is_ok() {
                    receiver_counters.data.fetch_add(1, Ordering::Relaxed);
                } else {
                    receiver_counters.undecodable.fetch_add(1, Ordering::Relaxed);
                }
            }
        }
    });

    let sender_url = format!("{}/{}/{}/{}", args.url, args.namespace, args.sender, args.topic);
    println!("Connecting sender to {}...", sender_url);
    let (sender_ws, _) = connect_async(&sender_url)
        .await
        .with_context(|| format!("connecting sender to {sender_url}"))?;
    let (mut sender_write, mut sender_read) = sender_ws.split();

    let ack_counters = Arc::clone(&counters);
    let ack_task = tokio::spawn(async move {
        while let Some(Ok(msg)) = sender_read.next().await {
            if matches!(msg, Message::Binary(_)) {
                ack_counters.acks.fetch_add(1, Ordering::Relaxed);
            }
        }
    });

    sleep(Duration::from_millis(200)).await;

    let period = Duration::from_secs_f64(1.0 / f64::from(args.rate.max(1)));
    let mut ticker = interval(period);
    let started = Instant::now();
    for seq in 0..args.count {
        ticker.tick().await;
        let envelope = Envelope {
            to: vec![args.receiver.clone()],
            from: args.sender.clone(),
            topic: format!("/{}/{}", args.sender, args.topic),
            msg_type: "std_msgs/String".to_string(),
            stamp: Utc::now().timestamp_micros() as f64 / 1e6,
            msg: Some(RawValue::from_string(format!(r#"{{"data":"loadcheck {seq}"}}"#))?),
            shared_secret: args.namespace.clone(),
        };
        let frame = codec::encode(&envelope, [0; 4])?;
        sender_write
            .send(Message::binary(frame))
            .await
            .context("sending envelope")?;
    }
    let elapsed = started.elapsed();

    // Let the last frames arrive, then report.
    sleep(Duration::from_secs(1)).await;
    let _ = sender_write.close().await;
    ack_task.abort();
    receiver_task.abort();

    let data = counters.data.load(Ordering::Relaxed);
    println!("\n----- Loadcheck Summary -----");
    println!("Sent: {} in {:.2}s ({:.1} msg/s)", args.count, elapsed.as_secs_f64(), args.count as f64 / elapsed.as_secs_f64());
    println!("Acks: {}", counters.acks.load(Ordering::Relaxed));
    println!("Received: {} ({:.1}% of sent)", data, 100.0 * data as f64 / args.count.max(1) as f64);
    println!("Heartbeats: {}", counters.heartbeats.load(Ordering::Relaxed));
    println!("Undecodable: {}", counters.undecodable.load(Ordering::Relaxed));
    println!("-------------------------\n");
    Ok(())
}
