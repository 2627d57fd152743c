//! Transport abstraction over TCP and Unix domain sockets.
//!
//! Both the server's acceptor and the client's dialer pick a transport by
//! name at runtime (`"tcp"` or `"unix"`), so connections are a small enum
//! with `AsyncRead`/`AsyncWrite` pass-through rather than a generic
//! parameter that would infect every client-facing type.
//!
//! # Example
//!
//! ```ignore
//! use geerpc::transport::{connect, Listener};
//!
//! let listener = Listener::bind("unix", "/tmp/geerpc.sock").await?;
//! let stream = connect("unix", "/tmp/geerpc.sock").await?;
//! ```

use std::pin::Pin;
use std::task::{Context, Poll};

use tokio::io::{AsyncRead, AsyncWrite, ReadBuf};
use tokio::net::{TcpListener, TcpStream};
#[cfg(unix)]
use tokio::net::{UnixListener, UnixStream};

use crate::error::{Result, RpcError};

/// A connected byte stream over one of the supported transports.
#[derive(Debug)]
pub enum Stream {
    Tcp(TcpStream),
    #[cfg(unix)]
    Unix(UnixStream),
}

impl AsyncRead for Stream {
    fn poll_read(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<std::io::Result<()>> {
        match &mut *self {
            Stream::Tcp(s) => Pin::new(s).poll_read(cx, buf),
            #[cfg(unix)]
            Stream::Unix(s) => Pin::new(s).poll_read(cx, buf),
        }
    }
}

impl AsyncWrite for Stream {
    fn poll_write(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<std::io::Result<usize>> {
        match &mut *self {
            Stream::Tcp(s) => Pin::new(s).poll_write(cx, buf),
            #[cfg(unix)]
            Stream::Unix(s) => Pin::new(s).poll_write(cx, buf),
        }
    }

    fn poll_flush(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<std::io::Result<()>> {
        match &mut *self {
            Stream::Tcp(s) => Pin::new(s).poll_flush(cx),
            #[cfg(unix)]
            Stream::Unix(s) => Pin::new(s).poll_flush(cx),
        }
    }

    fn poll_shutdown(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<std::io::Result<()>> {
        match &mut *self {
            Stream::Tcp(s) => Pin::new(s).poll_shutdown(cx),
            #[cfg(unix)]
            Stream::Unix(s) => Pin::new(s).poll_shutdown(cx),
        }
    }
}

/// A bound listener over one of the supported transports.
pub enum Listener {
    Tcp(TcpListener),
    #[cfg(unix)]
    Unix(UnixListener),
}

impl Listener {
    /// Bind a listener on the named transport.
    ///
    /// For `"unix"`, a stale socket file at the path is removed first.
    pub async fn bind(proto: &str, addr: &str) -> Result<Listener> {
        match proto {
            "tcp" => Ok(Listener::Tcp(TcpListener::bind(addr).await?)),
            #[cfg(unix)]
            "unix" => {
                if std::path::Path::new(addr).exists() {
                    std::fs::remove_file(addr)?;
                }
                Ok(Listener::Unix(UnixListener::bind(addr)?))
            }
            other => Err(RpcError::BadProtocol(other.to_string())),
        }
    }

    /// Accept a single connection.
    pub async fn accept(&self) -> Result<Stream> {
        match self {
            Listener::Tcp(l) => {
                let (stream, _addr) = l.accept().await?;
                Ok(Stream::Tcp(stream))
            }
            #[cfg(unix)]
            Listener::Unix(l) => {
                let (stream, _addr) = l.accept().await?;
                Ok(Stream::Unix(stream))
            }
        }
    }

    /// The bound address, as a display string.
    pub fn local_addr(&self) -> Result<String> {
        match self {
            Listener::Tcp(l) => Ok(l.local_addr()?.to_string()),
            #[cfg(unix)]
            Listener::Unix(l) => Ok(l
                .local_addr()?
                .as_pathname()
                .map(|p| p.display().to_string())
                .unwrap_or_default()),
        }
    }
}

/// Connect to `addr` over the named transport.
pub async fn connect(proto: &str, addr: &str) -> Result<Stream> {
    match proto {
        "tcp" => Ok(Stream::Tcp(TcpStream::connect(addr).await?)),
        #[cfg(unix)]
        "unix" => Ok(Stream::Unix(UnixStream::connect(addr).await?)),
        other => Err(RpcError::BadProtocol(other.to_string())),
    }
}
