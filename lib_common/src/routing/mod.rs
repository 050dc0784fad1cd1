//! # Routing Module
//!
//! The transport-independent core of the hub.
//!
//! ## Components (leaves first):
//!
//! - **`rate`**: windowed event-rate counter.
//! - **`client`** / **`registry`**: destination handles and the per-namespace
//!   `Hub` that owns them.
//! - **`resolver`**: maps requested names and patterns to live clients.
//! - **`processor`**: per-connection validation, triage and fan-out.
//! - **`delivery`** / **`heartbeat`**: per-destination writer loop with
//!   keep-alive frames and edge rate measurement.
//! - **`session`**: inbound queue and read loop shared by source connections.
//! - **`connection`**: the reader/writer capabilities transports implement.
//! - **`mirror`**: key layout of the mirrored state.

pub mod client;
pub mod config;
pub mod connection;
pub mod context;
pub mod delivery;
pub mod heartbeat;
pub mod mirror;
pub mod processor;
pub mod rate;
pub mod registry;
pub mod resolver;
pub mod session;

pub use client::{Client, EnqueueOutcome, OutboundItem};
pub use config::{HubConfig, DEFAULT_BROADCAST_PREFIX, DESCRIPTION_TOPIC};
pub use connection::{ConnectionIdentity, FrameReader, FrameWriter, TransportError};
pub use context::RelayContext;
pub use delivery::{open_destination, run_destination, run_writer};
pub use heartbeat::{Heartbeat, HEARTBEAT_FRAME};
pub use processor::{ClientProcessor, Delivery, ProcessError};
pub use rate::{RateSample, RateTracker};
pub use registry::Hub;
pub use resolver::{PatternMatcher, RegexCache, Resolver};
pub use session::{run_source, spawn_source, InboundQueue, ReadMeter, SessionStats, ACK_FRAME};
