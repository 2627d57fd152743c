//! Codec module - serialization/deserialization for headers and bodies.
//!
//! Two value codecs are available, selected per session by name:
//!
//! - [`MsgpackCodec`] - MessagePack using `rmp-serde` (the default)
//! - [`JsonCodec`] - JSON using `serde_json`
//!
//! # Design
//!
//! Codecs are implemented as marker structs with static methods; the
//! session-level choice is a [`CodecKind`] enum looked up from the
//! `CodecType` string in the preamble. The framing discipline around a codec
//! lives in [`crate::wire`].
//!
//! # Example
//!
//! ```
//! use geerpc::codec::CodecKind;
//!
//! let kind = CodecKind::from_name("msgpack").unwrap();
//! let encoded = kind.encode(&"hello").unwrap();
//! let decoded: String = kind.decode(&encoded).unwrap();
//! assert_eq!(decoded, "hello");
//! ```

mod json;
mod msgpack;

pub use json::JsonCodec;
pub use msgpack::MsgpackCodec;

use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::error::{Result, RpcError};

/// Session-negotiated value codec.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CodecKind {
    /// MessagePack via `rmp-serde` (struct-as-map format).
    Msgpack,
    /// JSON via `serde_json`.
    Json,
}

impl CodecKind {
    /// Codec used when the preamble leaves `CodecType` empty.
    pub const DEFAULT: CodecKind = CodecKind::Msgpack;

    /// Look up a codec by its wire name.
    ///
    /// The empty string selects the default; unknown names are a fatal
    /// session error.
    pub fn from_name(name: &str) -> Result<CodecKind> {
        match name {
            "" => Ok(CodecKind::DEFAULT),
            "msgpack" => Ok(CodecKind::Msgpack),
            "json" => Ok(CodecKind::Json),
            other => Err(RpcError::CodecUnknown(other.to_string())),
        }
    }

    /// The wire name of this codec.
    pub fn name(&self) -> &'static str {
        match self {
            CodecKind::Msgpack => "msgpack",
            CodecKind::Json => "json",
        }
    }

    /// Encode a value under this codec.
    pub fn encode<T: Serialize>(&self, value: &T) -> Result<Vec<u8>> {
        match self {
            CodecKind::Msgpack => MsgpackCodec::encode(value),
            CodecKind::Json => JsonCodec::encode(value),
        }
    }

    /// Decode a value under this codec.
    pub fn decode<T: DeserializeOwned>(&self, bytes: &[u8]) -> Result<T> {
        match self {
            CodecKind::Msgpack => MsgpackCodec::decode(bytes),
            CodecKind::Json => JsonCodec::decode(bytes),
        }
    }
}
