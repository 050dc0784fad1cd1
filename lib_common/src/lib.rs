//! # lib_common
//!
//! Shared library behind the relay hub. Clients (robots and dashboards) connect
//! under a tenant namespace and exchange compressed, timestamped,
//! topic-addressed envelopes; the hub resolves destinations, enforces
//! per-sender ordering and fans the original packet out to every resolved
//! recipient at most once.
//!
//! Each folder is gated behind a cargo feature of the same name so servers and
//! tools only compile what they use:
//!
//! - **`codec`**: wire framing and the `Envelope` record.
//! - **`routing`**: the shared registry, destination resolver, per-connection
//!   processor, outbound delivery with heartbeats, and rate tracking.
//! - **`connections`**: the write-only state mirror (Redis, in-memory, null).
//! - **`transport`**: WebSocket and UDP adapters over the routing core.

#![forbid(unsafe_code)]
#![warn(rust_2018_idioms, unused_qualifications)]

#[cfg(feature = "codec")]
pub mod codec;

#[cfg(feature = "connections")]
pub mod connections;

#[cfg(feature = "routing")]
pub mod routing;

#[cfg(feature = "transport")]
pub mod transport;
