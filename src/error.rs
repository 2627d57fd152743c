//! Error types for geerpc.

use thiserror::Error;

/// Main error type for all RPC operations.
#[derive(Debug, Error)]
pub enum RpcError {
    /// I/O error on the underlying connection.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Negotiated codec name is not registered.
    #[error("unsupported codec type: {0}")]
    CodecUnknown(String),

    /// Session preamble carried the wrong magic number.
    #[error("invalid magic number: {0:#x}")]
    MagicMismatch(u64),

    /// `service_method` did not split into exactly `Service.Method`.
    #[error("the format of serviceMethod is wrong")]
    BadMethodName,

    /// The named service is not registered on this server.
    #[error("rpc server: can't find service {0}")]
    ServiceNotFound(String),

    /// The service exists but has no such method.
    #[error("rpc server: can't find method {0}")]
    MethodNotFound(String),

    /// Value serialization failed.
    #[error("encode error: {0}")]
    Encode(String),

    /// Header or body deserialization failed.
    #[error("decode error: {0}")]
    Decode(String),

    /// The invoked method returned an error; crosses the wire as `header.err`.
    #[error("{0}")]
    User(String),

    /// A non-empty `header.err` observed by the client.
    #[error("{0}")]
    Remote(String),

    /// Connect timer fired before the session was established.
    #[error("rpc client: {0} timeout")]
    Timeout(&'static str),

    /// Client is closing or shut down.
    #[error("the conn is closed")]
    ConnectionClosed,

    /// Caller cancelled the in-flight call.
    #[error("rpc client: call failed: {0}")]
    Cancelled(String),

    /// The connection died with calls still pending.
    #[error("rpc client: connection terminated: {0}")]
    Terminated(String),

    /// Discovery has no servers to hand out.
    #[error("rpc discovery: no available servers")]
    DiscoveryEmpty,

    /// Address did not match `protocol@addr`.
    #[error("rpc client err: wrong format '{0}', expect protocol@addr")]
    BadAddress(String),

    /// Transport name is not `tcp` or `unix`.
    #[error("unsupported protocol: {0}")]
    BadProtocol(String),

    /// HTTP exchange failed (CONNECT upgrade, registry refresh, heartbeat).
    #[error("http error: {0}")]
    Http(String),

    /// A frame length prefix exceeded the configured maximum.
    #[error("frame of {0} bytes exceeds maximum frame size")]
    FrameTooLarge(u32),
}

/// Result type alias using RpcError.
pub type Result<T> = std::result::Result<T, RpcError>;

impl RpcError {
    /// True when the error is an end-of-stream condition rather than a fault.
    pub fn is_eof(&self) -> bool {
        matches!(self, RpcError::Io(e) if e.kind() == std::io::ErrorKind::UnexpectedEof)
    }
}
