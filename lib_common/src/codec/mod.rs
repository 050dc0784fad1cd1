//! # Codec Module
//!
//! Wire framing shared by every transport:
//!
//! ```text
//! [4-byte opaque header][zlib-compressed JSON envelope]
//! ```
//!
//! The hub never re-encodes what it relays; decoding exists only so the
//! routing core can read the addressing fields. Encoding is provided for
//! clients, tools and tests.

/// The `Envelope` record and the `decode` / `encode` pair.
pub mod envelope;

pub use envelope::{
    decode, decode_with_limit, encode, DecodeError, Description, Envelope, FRAME_HEADER_LEN,
    MAX_ENVELOPE_LEN,
};
