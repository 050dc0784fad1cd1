//! # Envelope Codec
//!
//! Decodes a framed packet into the `Envelope` the routing core inspects.
//!
//! ## Steps (in this order):
//! 1.  Skip the fixed 4-byte transport header. It is opaque to the hub.
//! 2.  Inflate the remainder as a zlib (DEFLATE) stream, up to
//!     `MAX_ENVELOPE_LEN` bytes.
//! 3.  Parse the inflated bytes as a JSON envelope.
//!
//! The codec holds no state and can be called from any task concurrently.
//! A failure at any step yields a `DecodeError`; callers drop the packet and
//! keep the connection.

use std::io::{Read, Write};

use flate2::read::ZlibDecoder;
use flate2::write::ZlibEncoder;
use flate2::Compression;
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::value::RawValue;
use thiserror::Error;

/// Length of the opaque header in front of every compressed envelope.
pub const FRAME_HEADER_LEN: usize = 4;

/// Largest inflated envelope the codec accepts.
pub const MAX_ENVELOPE_LEN: usize = 16 * 1024 * 1024;

/// Why a packet could not be turned into an `Envelope`.
#[derive(Debug, Error)]
pub enum DecodeError {
    #[error("frame of {0} bytes is shorter than the 4-byte header")]
    Truncated(usize),

    #[error("envelope inflates past the {0}-byte limit")]
    TooLarge(usize),

    #[error("zlib decompression failed: {0}")]
    Decompress(#[source] std::io::Error),

    #[error("envelope is not valid JSON: {0}")]
    Parse(#[from] serde_json::Error),
}

/// # Envelope
///
/// The decoded logical message. Field names follow the wire spelling; the
/// capitalised spellings older clients emit are accepted as aliases.
///
/// `msg` stays raw: the hub interprets it only for the description sub-topic,
/// and never re-serializes it on the forwarding path.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Envelope {
    /// Destination names or regular expressions, in request order.
    #[serde(default, alias = "To", deserialize_with = "null_as_empty")]
    pub to: Vec<String>,
    /// Claimed sender name.
    #[serde(default, alias = "From")]
    pub from: String,
    /// Slash-delimited topic. Segment 1 names the originating client, the
    /// last segment names the sub-topic.
    #[serde(default, alias = "Topic")]
    pub topic: String,
    /// Free-form type tag.
    #[serde(rename = "type", default, alias = "Type")]
    pub msg_type: String,
    /// Sender timestamp; must never decrease on one connection.
    #[serde(default, alias = "Stamp")]
    pub stamp: f64,
    /// Opaque payload.
    #[serde(default, alias = "Msg", skip_serializing_if = "Option::is_none")]
    pub msg: Option<Box<RawValue>>,
    /// Tenant credential carried on every message.
    #[serde(
        rename = "sharedSecret",
        default,
        alias = "PrivateKey",
        alias = "privateKey"
    )]
    pub shared_secret: String,
}

impl PartialEq for Envelope {
    fn eq(&self, other: &Self) -> bool {
        self.to == other.to
            && self.from == other.from
            && self.topic == other.topic
            && self.msg_type == other.msg_type
            && self.stamp.to_bits() == other.stamp.to_bits()
            && self.msg.as_deref().map(RawValue::get) == other.msg.as_deref().map(RawValue::get)
            && self.shared_secret == other.shared_secret
    }
}

/// Payload of a description sub-topic message.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct Description {
    #[serde(default, alias = "Data")]
    pub data: String,
}

impl Envelope {
    /// Last `/`-separated segment of the topic.
    pub fn sub_topic(&self) -> &str {
        self.topic.rsplit('/').next().unwrap_or_default()
    }

    /// Segment 1 of the topic, i.e. the client the topic belongs to.
    /// `"/robotB/camera/description"` yields `robotB`.
    pub fn origin_client(&self) -> Option<&str> {
        self.topic.split('/').nth(1)
    }

    /// Parses `msg` as a `Description`. A missing payload is a parse error.
    pub fn description(&self) -> Result<Description, serde_json::Error> {
        let raw = self.msg.as_deref().map(RawValue::get).unwrap_or("null");
        serde_json::from_str(raw)
    }

    /// Raw JSON text of `msg`, or `null` when absent.
    pub fn msg_text(&self) -> &str {
        self.msg.as_deref().map(RawValue::get).unwrap_or("null")
    }
}

fn null_as_empty<'de, D>(deserializer: D) -> Result<Vec<String>, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(Option::<Vec<String>>::deserialize(deserializer)?.unwrap_or_default())
}

/// Decodes one framed packet. See the module docs for the exact steps.
pub fn decode(frame: &[u8]) -> Result<Envelope, DecodeError> {
    decode_with_limit(frame, MAX_ENVELOPE_LEN)
}

/// `decode` with an explicit cap on the inflated size. Inflation stops as
/// soon as the cap is passed.
pub fn decode_with_limit(frame: &[u8], max_len: usize) -> Result<Envelope, DecodeError> {
    if frame.len() < FRAME_HEADER_LEN {
        return Err(DecodeError::Truncated(frame.len()));
    }

    let mut inflated = Vec::new();
    ZlibDecoder::new(&frame[FRAME_HEADER_LEN..])
        .take(max_len as u64 + 1)
        .read_to_end(&mut inflated)
        .map_err(DecodeError::Decompress)?;
    if inflated.len() > max_len {
        return Err(DecodeError::TooLarge(max_len));
    }

    Ok(serde_json::from_slice(&inflated)?)
}

/// Frames an envelope the way clients put it on the wire.
pub fn encode(envelope: &Envelope, header: [u8; FRAME_HEADER_LEN]) -> std::io::Result<Vec<u8>> {
    let body = serde_json::to_vec(envelope)?;

    let mut frame = Vec::with_capacity(FRAME_HEADER_LEN + body.len());
    frame.extend_from_slice(&header);

    let mut encoder = ZlibEncoder::new(frame, Compression::default());
    encoder.write_all(&body)?;
    encoder.finish()
}
