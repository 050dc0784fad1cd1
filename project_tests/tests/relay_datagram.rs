mod common;

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use common::{TestHub, frame, next_data, roomy_config, wait_until};
use lib_common::codec;
use lib_common::connections::NullSink;
use lib_common::routing::{HubConfig, RelayContext};
use lib_common::transport::{DatagramServer, HANDSHAKE_REPLY};
use tokio::net::UdpSocket;
use tokio::time::timeout;
use tokio_util::sync::CancellationToken;

const WAIT: Duration = Duration::from_secs(2);

async fn start_udp(ctx: RelayContext, idle: Duration) -> (SocketAddr, CancellationToken) {
    let server = DatagramServer::bind("127.0.0.1:0", ctx, idle).await.unwrap();
    let addr = server.local_addr().unwrap();
    let shutdown = CancellationToken::new();
    tokio::spawn(server.run(shutdown.clone()));
    (addr, shutdown)
}

async fn handshake(hub: SocketAddr, namespace: &str, name: &str) -> UdpSocket {
    let socket = UdpSocket::bind("127.0.0.1:0").await.unwrap();
    socket
        .send_to(format!("CONNECT:{namespace}:{name}").as_bytes(), hub)
        .await
        .unwrap();
    let mut buf = [0u8; 64];
    let (n, _) = timeout(WAIT, socket.recv_from(&mut buf)).await.unwrap().unwrap();
    assert_eq!(&buf[..n], HANDSHAKE_REPLY);
    socket
}

/// Next datagram longer than a heartbeat.
async fn next_datagram(socket: &UdpSocket, wait: Duration) -> Option<Vec<u8>> {
    let mut buf = vec![0u8; 65_536];
    loop {
        match timeout(wait, socket.recv_from(&mut buf)).await {
            Ok(Ok((n, _))) if n > 1 => return Some(buf[..n].to_vec()),
            Ok(Ok(_)) => continue,
            _ => return None,
        }
    }
}

#[tokio::test]
async fn datagram_peers_exchange_frames() {
    let ctx = RelayContext::new(roomy_config(), Arc::new(NullSink));
    let (hub, shutdown) = start_udp(ctx.clone(), Duration::from_secs(30)).await;

    let a = handshake(hub, "t1", "robotA").await;
    let b = handshake(hub, "t1", "robotB").await;

    for stamp in [1.0, 2.0, 1.5, 3.0] {
        a.send_to(&frame("robotA", &["robotB"], "/robotA/odom", stamp), hub)
            .await
            .unwrap();
    }

    let mut stamps = Vec::new();
    while stamps.len() < 3 {
        let data = next_datagram(&b, WAIT).await.expect("frame for robotB");
        stamps.push(codec::decode(&data).unwrap().stamp);
    }
    assert_eq!(stamps, vec![1.0, 2.0, 3.0]);
    assert!(next_datagram(&b, Duration::from_millis(300)).await.is_none());

    let robot_a = ctx.hub.lookup("t1", "robotA").unwrap();
    wait_until(move || robot_a.last_type() == "std_msgs/String").await;
    shutdown.cancel();
}

#[tokio::test]
async fn repeated_handshake_moves_endpoint() {
    let ctx = RelayContext::new(roomy_config(), Arc::new(NullSink));
    let (hub, shutdown) = start_udp(ctx.clone(), Duration::from_secs(30)).await;

    let a = handshake(hub, "t1", "robotA").await;
    let old_b = handshake(hub, "t1", "robotB").await;
    let registered = ctx.hub.lookup("t1", "robotB").unwrap();
    let new_b = handshake(hub, "t1", "robotB").await;

    // Same client handle, new endpoint.
    assert!(Arc::ptr_eq(&registered, &ctx.hub.lookup("t1", "robotB").unwrap()));

    a.send_to(&frame("robotA", &["robotB"], "/robotA/odom", 1.0), hub)
        .await
        .unwrap();
    assert!(next_datagram(&new_b, WAIT).await.is_some());
    assert!(next_datagram(&old_b, Duration::from_millis(300)).await.is_none());

    // The old endpoint is no longer a known sender.
    old_b
        .send_to(&frame("robotB", &["robotA"], "/robotB/odom", 1.0), hub)
        .await
        .unwrap();
    assert!(next_datagram(&a, Duration::from_millis(300)).await.is_none());
    shutdown.cancel();
}

#[tokio::test]
async fn idle_datagram_client_expires() {
    let ctx = RelayContext::new(HubConfig::default(), Arc::new(NullSink));
    let (hub, shutdown) = start_udp(ctx.clone(), Duration::from_millis(200)).await;

    let _a = handshake(hub, "t1", "robotA").await;
    assert!(ctx.hub.lookup("t1", "robotA").is_some());

    let watch = ctx.clone();
    wait_until(move || watch.hub.lookup("t1", "robotA").is_none()).await;
    shutdown.cancel();
}

#[tokio::test]
async fn datagram_sender_reaches_websocket_receiver() {
    let hub = TestHub::start(roomy_config()).await;
    let (udp, shutdown) = start_udp(hub.ctx.clone(), Duration::from_secs(30)).await;
    let (_w, mut rx) = hub.receiver("t1", "canopy_leaflet_dash").await;

    let a = handshake(udp, "t1", "robotA").await;
    let raw = frame("robotA", &[], "/robotA/odom", 1.0);
    a.send_to(&raw, udp).await.unwrap();

    assert_eq!(next_data(&mut rx, WAIT).await, Some(raw));
    shutdown.cancel();
}
