//! Wire framing - `(Header, Body)` pairs as length-prefixed units.
//!
//! After the session preamble, all traffic in both directions is a sequence
//! of frames. A frame is two *units* written back-to-back: the encoded
//! header, then the encoded body. Each unit is a `u32` big-endian length
//! prefix followed by that many payload bytes:
//!
//! ```text
//! ┌──────────┬─────────────┬──────────┬───────────┐
//! │ Len (BE) │ Header      │ Len (BE) │ Body      │
//! │ 4 bytes  │ Len bytes   │ 4 bytes  │ Len bytes │
//! └──────────┴─────────────┴──────────┴───────────┘
//! ```
//!
//! **Framing invariant**: after every successful [`FrameReader::read_header`]
//! the peer has transmitted a body unit, and the caller MUST consume it via
//! [`FrameReader::read_body`] before the next header - even when the header
//! carries an error or no pending call matches. Discarding a body is simply
//! dropping the returned bytes.

use bytes::Bytes;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, BufReader};

use crate::codec::CodecKind;
use crate::error::{Result, RpcError};

/// Default maximum unit size (16 MiB). Bounds hostile length prefixes.
pub const DEFAULT_MAX_FRAME_SIZE: u32 = 16 * 1024 * 1024;

/// Frame header correlating a request with its reply.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Header {
    /// `"<Service>.<Method>"`.
    pub service_method: String,
    /// Per-connection monotonically increasing request identifier.
    pub seq: u64,
    /// Empty on success; a non-empty string is the authoritative failure
    /// signal on the wire.
    pub err: String,
}

impl Header {
    /// A request header for `service_method` with the given seq.
    pub fn request(service_method: &str, seq: u64) -> Self {
        Self {
            service_method: service_method.to_string(),
            seq,
            err: String::new(),
        }
    }
}

/// Reading half of a framed connection.
///
/// Owns the buffered read half; the session preamble (and, for HTTP
/// sessions, the CONNECT exchange) is read through the same buffer before
/// this type takes over, so no bytes are lost to buffering.
pub struct FrameReader<R> {
    reader: BufReader<R>,
    kind: CodecKind,
    max_frame: u32,
}

impl<R: AsyncRead + Unpin> FrameReader<R> {
    /// Wrap an already-buffered reader.
    pub fn new(reader: BufReader<R>, kind: CodecKind) -> Self {
        Self {
            reader,
            kind,
            max_frame: DEFAULT_MAX_FRAME_SIZE,
        }
    }

    /// The codec this reader decodes under.
    pub fn kind(&self) -> CodecKind {
        self.kind
    }

    /// Read one length-prefixed unit.
    async fn read_unit(&mut self) -> Result<Bytes> {
        let mut len_buf = [0u8; 4];
        self.reader.read_exact(&mut len_buf).await?;
        let len = u32::from_be_bytes(len_buf);
        if len > self.max_frame {
            return Err(RpcError::FrameTooLarge(len));
        }
        let mut buf = vec![0u8; len as usize];
        self.reader.read_exact(&mut buf).await?;
        Ok(Bytes::from(buf))
    }

    /// Read and decode exactly one header.
    pub async fn read_header(&mut self) -> Result<Header> {
        let bytes = self.read_unit().await?;
        self.kind.decode(&bytes)
    }

    /// Read exactly one body unit, returning the raw bytes.
    ///
    /// Must be called once after every successful [`read_header`], even on
    /// error paths; dropping the returned bytes is the discard case.
    ///
    /// [`read_header`]: FrameReader::read_header
    pub async fn read_body(&mut self) -> Result<Bytes> {
        self.read_unit().await
    }

    /// Decode previously read body bytes into a typed value.
    pub fn decode_body<T: DeserializeOwned>(&self, bytes: &[u8]) -> Result<T> {
        self.kind.decode(bytes)
    }
}

/// Writing half of a framed connection.
///
/// Callers serialize access with a send mutex; a single `write_frame`
/// therefore always puts header and body contiguously on the wire.
pub struct FrameWriter<W> {
    writer: W,
    kind: CodecKind,
}

impl<W: AsyncWrite + Unpin> FrameWriter<W> {
    pub fn new(writer: W, kind: CodecKind) -> Self {
        Self { writer, kind }
    }

    /// Serialize and write one `(header, body)` frame, then flush.
    pub async fn write_frame<B: Serialize>(&mut self, header: &Header, body: &B) -> Result<()> {
        let body_bytes = self.kind.encode(body)?;
        self.write_frame_raw(header, &body_bytes).await
    }

    /// Write one frame whose body is already encoded.
    pub async fn write_frame_raw(&mut self, header: &Header, body: &[u8]) -> Result<()> {
        let header_bytes = self.kind.encode(header)?;

        // Assemble the full frame so a single write keeps the units adjacent.
        let mut buf = Vec::with_capacity(8 + header_bytes.len() + body.len());
        buf.extend_from_slice(&(header_bytes.len() as u32).to_be_bytes());
        buf.extend_from_slice(&header_bytes);
        buf.extend_from_slice(&(body.len() as u32).to_be_bytes());
        buf.extend_from_slice(body);

        self.writer.write_all(&buf).await?;
        self.writer.flush().await?;
        Ok(())
    }

    /// Shut down the write half, signalling EOF to the peer.
    pub async fn shutdown(&mut self) -> Result<()> {
        self.writer.shutdown().await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::duplex;

    fn pair(kind: CodecKind) -> (FrameWriter<tokio::io::DuplexStream>, FrameReader<tokio::io::DuplexStream>) {
        let (a, b) = duplex(64 * 1024);
        (FrameWriter::new(a, kind), FrameReader::new(BufReader::new(b), kind))
    }

    #[tokio::test]
    async fn test_header_body_roundtrip() {
        let (mut writer, mut reader) = pair(CodecKind::Msgpack);

        let header = Header::request("Foo.Sum", 7);
        writer.write_frame(&header, &"payload").await.unwrap();

        let got = reader.read_header().await.unwrap();
        assert_eq!(got, header);

        let body = reader.read_body().await.unwrap();
        let decoded: String = reader.decode_body(&body).unwrap();
        assert_eq!(decoded, "payload");
    }

    #[tokio::test]
    async fn test_every_header_is_followed_by_a_body() {
        let (mut writer, mut reader) = pair(CodecKind::Msgpack);

        // Three frames back-to-back; the reader must alternate strictly.
        for seq in 0..3u64 {
            writer
                .write_frame(&Header::request("Echo.Say", seq), &seq)
                .await
                .unwrap();
        }

        for seq in 0..3u64 {
            let header = reader.read_header().await.unwrap();
            assert_eq!(header.seq, seq);
            // Discarding is just dropping the bytes.
            let _ = reader.read_body().await.unwrap();
        }
    }

    #[tokio::test]
    async fn test_discarded_body_keeps_stream_parseable() {
        let (mut writer, mut reader) = pair(CodecKind::Json);

        writer
            .write_frame(&Header::request("A.B", 1), &vec![1u8; 512])
            .await
            .unwrap();
        writer.write_frame(&Header::request("C.D", 2), &42i64).await.unwrap();

        let _ = reader.read_header().await.unwrap();
        drop(reader.read_body().await.unwrap());

        let header = reader.read_header().await.unwrap();
        assert_eq!(header.service_method, "C.D");
        let body = reader.read_body().await.unwrap();
        let value: i64 = reader.decode_body(&body).unwrap();
        assert_eq!(value, 42);
    }

    #[tokio::test]
    async fn test_error_header_crosses_the_wire() {
        let (mut writer, mut reader) = pair(CodecKind::Msgpack);

        let mut header = Header::request("Foo.Sum", 3);
        header.err = "rpc server: can't find method Sum".to_string();
        writer.write_frame(&header, &()).await.unwrap();

        let got = reader.read_header().await.unwrap();
        assert_eq!(got.err, "rpc server: can't find method Sum");
        let _ = reader.read_body().await.unwrap();
    }

    #[tokio::test]
    async fn test_oversized_length_prefix_rejected() {
        let (a, b) = duplex(1024);
        let mut reader = FrameReader::new(BufReader::new(b), CodecKind::Msgpack);

        let mut a = a;
        a.write_all(&u32::MAX.to_be_bytes()).await.unwrap();

        let err = reader.read_header().await.unwrap_err();
        assert!(matches!(err, RpcError::FrameTooLarge(_)));
    }

    #[tokio::test]
    async fn test_eof_is_detectable() {
        let (writer, b) = pair_halves();
        drop(writer);

        let mut reader = FrameReader::new(BufReader::new(b), CodecKind::Msgpack);
        let err = reader.read_header().await.unwrap_err();
        assert!(err.is_eof());
    }

    fn pair_halves() -> (tokio::io::DuplexStream, tokio::io::DuplexStream) {
        duplex(1024)
    }
}
