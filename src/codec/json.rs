//! JSON codec using `serde_json`.
//!
//! Slower and larger on the wire than MessagePack, but human-readable;
//! useful when the peer is a script or a debugging proxy.

use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::error::{Result, RpcError};

/// JSON codec for headers and call payloads.
pub struct JsonCodec;

impl JsonCodec {
    /// Encode a value to JSON bytes.
    #[inline]
    pub fn encode<T: Serialize>(value: &T) -> Result<Vec<u8>> {
        serde_json::to_vec(value).map_err(|e| RpcError::Encode(e.to_string()))
    }

    /// Decode JSON bytes to a value.
    #[inline]
    pub fn decode<T: DeserializeOwned>(bytes: &[u8]) -> Result<T> {
        serde_json::from_slice(bytes).map_err(|e| RpcError::Decode(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::{Deserialize, Serialize};

    #[derive(Serialize, Deserialize, PartialEq, Debug)]
    struct Point {
        x: i32,
        y: i32,
    }

    #[test]
    fn test_encode_decode_struct() {
        let original = Point { x: 3, y: -4 };
        let encoded = JsonCodec::encode(&original).unwrap();
        let decoded: Point = JsonCodec::decode(&encoded).unwrap();
        assert_eq!(decoded, original);
    }

    #[test]
    fn test_decode_error_on_invalid_data() {
        let result: Result<Point> = JsonCodec::decode(b"{not json");
        assert!(matches!(result, Err(RpcError::Decode(_))));
    }
}
