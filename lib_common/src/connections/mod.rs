//! # Connections Module
//!
//! This module handles the write-only mirror of hub state into an
//! observability store. The routing core only sees the `StateSink`
//! capability; the backing store is chosen by the server at startup.

/// The `StateSink` capability, the command vocabulary and the no-op sink.
pub mod state_sink;

/// Redis-backed sink with a single writer task.
pub mod cache_redis;

/// In-process sink, used for the `memory` sink kind and in tests.
pub mod memory_sink;

pub use cache_redis::{RedisSink, SinkError};
pub use memory_sink::MemorySink;
pub use state_sink::{storage_key, NullSink, SharedSink, SinkCommand, StateSink};
