//! MsgPack codec using `rmp-serde`.
//!
//! Uses `to_vec_named` so structs serialize as maps (with field names)
//! rather than positional arrays. Field-name maps keep the two peers
//! decoupled from field order, which matters because argument and reply
//! shapes are declared independently on each side of a call.

use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::error::{Result, RpcError};

/// MessagePack codec for headers and call payloads.
pub struct MsgpackCodec;

impl MsgpackCodec {
    /// Encode a value to MsgPack bytes (struct-as-map format).
    #[inline]
    pub fn encode<T: Serialize>(value: &T) -> Result<Vec<u8>> {
        rmp_serde::to_vec_named(value).map_err(|e| RpcError::Encode(e.to_string()))
    }

    /// Decode MsgPack bytes to a value.
    #[inline]
    pub fn decode<T: DeserializeOwned>(bytes: &[u8]) -> Result<T> {
        rmp_serde::from_slice(bytes).map_err(|e| RpcError::Decode(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::{Deserialize, Serialize};

    #[derive(Serialize, Deserialize, PartialEq, Debug)]
    struct TestStruct {
        id: u32,
        name: String,
        active: bool,
    }

    #[test]
    fn test_encode_decode_struct() {
        let original = TestStruct {
            id: 42,
            name: "test".to_string(),
            active: true,
        };

        let encoded = MsgpackCodec::encode(&original).unwrap();
        let decoded: TestStruct = MsgpackCodec::decode(&encoded).unwrap();

        assert_eq!(decoded, original);
    }

    #[test]
    fn test_structs_serialize_as_maps() {
        let test = TestStruct {
            id: 1,
            name: "x".to_string(),
            active: false,
        };

        let encoded = MsgpackCodec::encode(&test).unwrap();

        // fixmap marker is 0x8X; fixarray (positional) would be 0x9X
        assert_eq!(
            encoded[0] & 0xF0,
            0x80,
            "Expected map format (0x8X), got {:02X}",
            encoded[0]
        );
    }

    #[test]
    fn test_decode_error_on_invalid_data() {
        let invalid = b"not valid msgpack";
        let result: Result<TestStruct> = MsgpackCodec::decode(invalid);
        assert!(matches!(result, Err(RpcError::Decode(_))));
    }

    #[test]
    fn test_encode_decode_primitives() {
        let n: i64 = 12345;
        let encoded = MsgpackCodec::encode(&n).unwrap();
        let decoded: i64 = MsgpackCodec::decode(&encoded).unwrap();
        assert_eq!(decoded, n);

        let s = "hello world";
        let encoded = MsgpackCodec::encode(&s).unwrap();
        let decoded: String = MsgpackCodec::decode(&encoded).unwrap();
        assert_eq!(decoded, s);
    }
}
