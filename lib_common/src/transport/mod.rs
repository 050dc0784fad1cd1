//! # Transport Module
//!
//! Thin adapters that turn network connections into routing-core inputs and
//! outputs. Both implement the `FrameReader` / `FrameWriter` capabilities
//! from `routing::connection`; validation, resolution and delivery are never
//! duplicated here.
//!
//! - **`websocket`**: duplex connections addressed by request path (axum).
//! - **`datagram`**: UDP peers with a plaintext handshake.

pub mod datagram;
pub mod websocket;

pub use crate::routing::{ConnectionIdentity, FrameReader, FrameWriter, TransportError};
pub use datagram::{parse_handshake, DatagramServer, HandshakeError, HANDSHAKE_REPLY};
pub use websocket::{router, serve, ConnectionPath, PathError, Role};
