//! Session options - the negotiation preamble.
//!
//! A client opens every session by writing one [`SessionOptions`] value as a
//! single JSON line on the raw connection, before any framed traffic. The
//! server validates the magic number and selects a codec by name; only then
//! does the connection switch to `(Header, Body)` frames.
//!
//! Timeout fields travel as integer nanoseconds, so a zero value cleanly
//! means "disabled" on both ends.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::codec::CodecKind;

/// Magic number every session preamble must carry.
pub const MAGIC_NUMBER: u64 = 0x123456;

/// Per-session options sent by the client before any framed traffic.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionOptions {
    /// Must equal [`MAGIC_NUMBER`]; anything else aborts the session.
    #[serde(rename = "MagicNumber")]
    pub magic: u64,

    /// Codec name (see [`CodecKind::from_name`]). Empty selects the default.
    #[serde(rename = "CodecType", default)]
    pub codec_type: String,

    /// Limit on establishing the session; zero disables the timer.
    #[serde(rename = "ConnectTimeOut", with = "duration_nanos", default)]
    pub connect_timeout: Duration,

    /// Per-request handling limit applied by the server; zero disables it.
    #[serde(rename = "HandleTimeOut", with = "duration_nanos", default)]
    pub handle_timeout: Duration,
}

impl Default for SessionOptions {
    fn default() -> Self {
        Self {
            magic: MAGIC_NUMBER,
            codec_type: CodecKind::DEFAULT.name().to_string(),
            connect_timeout: Duration::ZERO,
            handle_timeout: Duration::ZERO,
        }
    }
}

impl SessionOptions {
    /// Options with a specific codec.
    pub fn with_codec(kind: CodecKind) -> Self {
        Self {
            codec_type: kind.name().to_string(),
            ..Self::default()
        }
    }
}

/// Durations as integer nanoseconds on the wire.
mod duration_nanos {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(d: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(d.as_nanos() as u64)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        let nanos = u64::deserialize(deserializer)?;
        Ok(Duration::from_nanos(nanos))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_options_carry_magic() {
        let opt = SessionOptions::default();
        assert_eq!(opt.magic, MAGIC_NUMBER);
        assert_eq!(opt.codec_type, "msgpack");
        assert!(opt.connect_timeout.is_zero());
        assert!(opt.handle_timeout.is_zero());
    }

    #[test]
    fn test_wire_field_names() {
        let mut opt = SessionOptions::default();
        opt.handle_timeout = Duration::from_millis(50);
        let json = serde_json::to_value(&opt).unwrap();

        assert_eq!(json["MagicNumber"], 0x123456);
        assert_eq!(json["CodecType"], "msgpack");
        assert_eq!(json["ConnectTimeOut"], 0);
        // 50ms as integer nanoseconds
        assert_eq!(json["HandleTimeOut"], 50_000_000u64);
    }

    #[test]
    fn test_roundtrip_preserves_durations() {
        let opt = SessionOptions {
            magic: MAGIC_NUMBER,
            codec_type: "json".to_string(),
            connect_timeout: Duration::from_secs(3),
            handle_timeout: Duration::from_millis(250),
        };

        let line = serde_json::to_string(&opt).unwrap();
        let parsed: SessionOptions = serde_json::from_str(&line).unwrap();

        assert_eq!(parsed.magic, opt.magic);
        assert_eq!(parsed.codec_type, "json");
        assert_eq!(parsed.connect_timeout, Duration::from_secs(3));
        assert_eq!(parsed.handle_timeout, Duration::from_millis(250));
    }

    #[test]
    fn test_missing_optional_fields_default() {
        // A minimal hand-written preamble still parses.
        let parsed: SessionOptions = serde_json::from_str(r#"{"MagicNumber": 1193046}"#).unwrap();
        assert_eq!(parsed.magic, MAGIC_NUMBER);
        assert!(parsed.codec_type.is_empty());
        assert!(parsed.handle_timeout.is_zero());
    }
}
