//! # Relay Hub Server
//!
//! Runs the multi-tenant relay hub: WebSocket clients on the HTTP port, and
//! optionally datagram clients on a UDP port, both routed through one shared
//! `lib_common::routing` core.
//!
//! ## Startup
//! 1.  Load `.env`, then the configuration (defaults < JSON file < env/CLI).
//! 2.  Install console + rolling JSON file logging.
//! 3.  Connect the configured state mirror (Redis, memory or none).
//! 4.  Start the transports and wait for Ctrl-C / SIGTERM.
//!
//! ## Shutdown
//! Stop accepting, close every destination so writer tasks finish their
//! teardown, clear each namespace's client list in the mirror, then flush the
//! mirror.

use anyhow::{Context, Result};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;

use lib_common::connections::{MemorySink, NullSink, RedisSink, SharedSink};
use lib_common::routing::mirror::clear_client_list;
use lib_common::routing::RelayContext;
use lib_common::transport::{datagram::DatagramServer, websocket};

mod relay_logic;
use relay_logic::config::{self, Config, SinkKind};
use relay_logic::{logger, shutdown};

async fn connect_sink(config: &Config) -> Result<SharedSink> {
    let sink: SharedSink = match config.sink.unwrap_or(SinkKind::None) {
        SinkKind::None => Arc::new(NullSink),
        SinkKind::Memory => Arc::new(MemorySink::new()),
        SinkKind::Redis => {
            let url = config.redis_url.as_deref().unwrap_or("redis://127.0.0.1/");
            let depth = config.sink_queue_depth.unwrap_or(1024);
            Arc::new(
                RedisSink::connect(url, depth)
                    .await
                    .with_context(|| format!("connecting state mirror at {url}"))?,
            )
        }
    };
    Ok(sink)
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();

    let config = config::load_config();
    let log_dir = config.log_dir.clone().unwrap_or_else(|| "./logs".into());
    let log_level = config.log_level.clone().unwrap_or_else(|| "info".to_string());
    let _log_guard = logger::setup_logging(&log_dir, &log_level, "server_relay")?;
    tracing::info!(?config, "Configuration loaded");

    let sink = connect_sink(&config).await?;
    let ctx = RelayContext::new(config.hub_config(), sink);
    let shutdown_token = CancellationToken::new();

    // --- Phase 1: Transports ---
    let http_addr = SocketAddr::from(([0, 0, 0, 0], config.port.unwrap_or(50000)));
    let listener = TcpListener::bind(http_addr)
        .await
        .with_context(|| format!("binding WebSocket listener on {http_addr}"))?;
    let ws_handle = tokio::spawn(websocket::serve(
        listener,
        ctx.clone(),
        shutdown_token.clone(),
    ));

    let udp_handle = match config.udp_port {
        Some(port) => {
            let udp_addr = SocketAddr::from(([0, 0, 0, 0], port));
            let server = DatagramServer::bind(udp_addr, ctx.clone(), config.datagram_idle_timeout())
                .await
                .with_context(|| format!("binding datagram socket on {udp_addr}"))?;
            Some(tokio::spawn(server.run(shutdown_token.clone())))
        }
        None => None,
    };

    // --- Phase 2: Wait for shutdown signal ---
    shutdown::wait_for_signal().await;
    shutdown_token.cancel();

    // --- Phase 3: Drain ---
    // Teardowns prune namespaces as they empty.
    let namespaces = ctx.hub.namespaces();
    ctx.hub.close_all();
    match ws_handle.await {
        Ok(Ok(())) => {}
        Ok(Err(e)) => tracing::warn!("WebSocket transport ended with error: {}", e),
        Err(e) => tracing::warn!("WebSocket transport task failed: {}", e),
    }
    if let Some(handle) = udp_handle {
        if let Err(e) = handle.await {
            tracing::warn!("Datagram transport task failed: {}", e);
        }
    }

    for namespace in &namespaces {
        clear_client_list(ctx.sink.as_ref(), namespace).await;
    }
    ctx.sink.close().await;

    tracing::info!("Shutdown complete.");
    Ok(())
}
