//! Server - accept connections, negotiate sessions, dispatch requests.
//!
//! Each accepted connection gets its own task. After the JSON-line preamble
//! is validated (magic number, codec), the connection switches to framed
//! traffic: the read loop decodes `(Header, Body)` pairs, resolves
//! `Service.Method`, and spawns one handler task per request. All responses
//! funnel through a per-connection send mutex so header and body of a
//! response are always contiguous on the wire.
//!
//! The server also exposes an HTTP front: `CONNECT` upgrades the raw stream
//! into an RPC session, `GET /debug/rpc` serves an HTML summary of
//! registered services, anything else is answered with `405`.
//!
//! # Example
//!
//! ```ignore
//! use geerpc::{Server, Service};
//! use geerpc::transport::Listener;
//! use std::sync::Arc;
//!
//! let server = Arc::new(Server::new());
//! server.register(Service::builder("Foo").method("Sum", sum).build());
//! let listener = Listener::bind("tcp", "127.0.0.1:9999").await?;
//! server.accept(listener).await?;
//! ```

mod debug;

use std::collections::HashMap;
use std::sync::{Arc, RwLock};
use std::time::Duration;

use bytes::Bytes;
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncWrite, AsyncWriteExt, BufReader, ReadHalf, WriteHalf};
use tokio::sync::Mutex;
use tokio::task::JoinSet;

use crate::codec::CodecKind;
use crate::error::{Result, RpcError};
use crate::option::{SessionOptions, MAGIC_NUMBER};
use crate::service::Service;
use crate::transport::{Listener, Stream};
use crate::wire::{FrameReader, FrameWriter, Header};

/// Path a client CONNECTs to on an HTTP-fronted server.
pub const DEFAULT_RPC_PATH: &str = "/_rpc_";

/// Path of the HTML debug page.
pub const DEFAULT_DEBUG_PATH: &str = "/debug/rpc";

/// Status portion of the CONNECT success line, shared with the client.
pub(crate) const CONNECTED: &str = "200 Connected to Gee RPC";

/// An RPC server hosting a set of registered services.
pub struct Server {
    /// Many concurrent lookups from request handlers, rare writes from
    /// registration.
    services: RwLock<HashMap<String, Arc<Service>>>,
}

impl Default for Server {
    fn default() -> Self {
        Self::new()
    }
}

impl Server {
    pub fn new() -> Server {
        Server {
            services: RwLock::new(HashMap::new()),
        }
    }

    /// Register a service. The first registration under a name wins.
    pub fn register(&self, service: Service) {
        let mut services = self.services.write().unwrap();
        services
            .entry(service.name().to_string())
            .or_insert_with(|| Arc::new(service));
    }

    /// Split `"<Service>.<Method>"` and resolve both halves.
    fn find_service(&self, service_method: &str) -> Result<(Arc<Service>, String)> {
        let mut parts = service_method.split('.');
        let (service_name, method_name) = match (parts.next(), parts.next(), parts.next()) {
            (Some(s), Some(m), None) => (s, m),
            _ => return Err(RpcError::BadMethodName),
        };

        let services = self.services.read().unwrap();
        let service = services
            .get(service_name)
            .cloned()
            .ok_or_else(|| RpcError::ServiceNotFound(service_name.to_string()))?;
        if service.method(method_name).is_none() {
            return Err(RpcError::MethodNotFound(method_name.to_string()));
        }
        Ok((service, method_name.to_string()))
    }

    /// Registered services, sorted by name (debug page).
    fn services_snapshot(&self) -> Vec<Arc<Service>> {
        let services = self.services.read().unwrap();
        let mut snapshot: Vec<_> = services.values().cloned().collect();
        snapshot.sort_by(|a, b| a.name().cmp(b.name()));
        snapshot
    }

    /// Accept raw RPC connections forever, one task per connection.
    pub async fn accept(self: Arc<Self>, listener: Listener) -> Result<()> {
        loop {
            let stream = listener.accept().await?;
            let server = self.clone();
            tokio::spawn(async move {
                if let Err(e) = server.serve_conn(stream).await {
                    tracing::warn!(error = %e, "session rejected");
                }
            });
        }
    }

    /// Serve one raw connection: preamble, then the request loop.
    pub async fn serve_conn(self: Arc<Self>, stream: Stream) -> Result<()> {
        let (read_half, write_half) = tokio::io::split(stream);
        self.serve_session(BufReader::new(read_half), write_half)
            .await
    }

    /// Accept HTTP connections forever: CONNECT upgrades, debug page, 405.
    pub async fn serve_http(self: Arc<Self>, listener: Listener) -> Result<()> {
        loop {
            let stream = listener.accept().await?;
            let server = self.clone();
            tokio::spawn(async move { server.serve_http_conn(stream).await });
        }
    }

    async fn serve_http_conn(self: Arc<Self>, stream: Stream) {
        let (read_half, write_half) = tokio::io::split(stream);
        let mut reader = BufReader::new(read_half);
        let mut writer = write_half;

        let mut request_line = String::new();
        match reader.read_line(&mut request_line).await {
            Ok(0) | Err(_) => return,
            Ok(_) => {}
        }
        // Drain request headers up to the blank line.
        loop {
            let mut line = String::new();
            match reader.read_line(&mut line).await {
                Ok(0) | Err(_) => return,
                Ok(_) if line == "\r\n" || line == "\n" => break,
                Ok(_) => {}
            }
        }

        let mut parts = request_line.split_whitespace();
        let method = parts.next().unwrap_or("");
        let path = parts.next().unwrap_or("");

        match (method, path) {
            ("CONNECT", _) => {
                // Status line goes straight onto the hijacked stream; the
                // same bytes the client's dial matches against.
                let sent = writer
                    .write_all(format!("HTTP/1.0 {CONNECTED}\n\n").as_bytes())
                    .await
                    .is_ok()
                    && writer.flush().await.is_ok();
                if sent {
                    if let Err(e) = self.serve_session(reader, writer).await {
                        tracing::warn!(error = %e, "upgraded session rejected");
                    }
                }
            }
            ("GET", path) if path == DEFAULT_DEBUG_PATH => {
                let page = debug::render(&self.services_snapshot());
                let _ = write_http_response(
                    &mut writer,
                    "200 OK",
                    "text/html; charset=utf-8",
                    page.as_bytes(),
                )
                .await;
            }
            _ => {
                let _ = write_http_response(
                    &mut writer,
                    "405 Method Not Allowed",
                    "text/plain; charset=utf-8",
                    b"405 must CONNECT\n",
                )
                .await;
            }
        }
    }

    /// Negotiate the session preamble, then run the request loop.
    async fn serve_session<S>(
        self: Arc<Self>,
        mut reader: BufReader<ReadHalf<S>>,
        writer: WriteHalf<S>,
    ) -> Result<()>
    where
        S: AsyncRead + AsyncWrite + Send + 'static,
    {
        let mut line = String::new();
        if reader.read_line(&mut line).await? == 0 {
            tracing::debug!("connection closed before session preamble");
            return Ok(());
        }

        let options: SessionOptions =
            serde_json::from_str(line.trim()).map_err(|e| RpcError::Decode(e.to_string()))?;
        if options.magic != MAGIC_NUMBER {
            return Err(RpcError::MagicMismatch(options.magic));
        }
        let kind = CodecKind::from_name(&options.codec_type)?;

        self.serve_codec(
            FrameReader::new(reader, kind),
            FrameWriter::new(writer, kind),
            options.handle_timeout,
        )
        .await;
        Ok(())
    }

    /// The request loop: read frames, resolve, dispatch; drain on exit.
    async fn serve_codec<S>(
        self: Arc<Self>,
        mut reader: FrameReader<ReadHalf<S>>,
        writer: FrameWriter<WriteHalf<S>>,
        handle_timeout: Duration,
    ) where
        S: AsyncRead + AsyncWrite + Send + 'static,
    {
        let kind = reader.kind();
        let writer = Arc::new(Mutex::new(writer));
        let mut handlers = JoinSet::new();

        loop {
            let header = match reader.read_header().await {
                Ok(header) => header,
                Err(e) => {
                    // Header failures are fatal: framing is lost.
                    if e.is_eof() {
                        tracing::debug!("client closed the connection");
                    } else {
                        tracing::warn!(error = %e, "failed to read request header");
                    }
                    break;
                }
            };
            // The body unit must be consumed before anything else is
            // decided, or the stream desynchronizes.
            let body = match reader.read_body().await {
                Ok(body) => body,
                Err(e) => {
                    tracing::warn!(error = %e, "failed to read request body");
                    break;
                }
            };

            match self.find_service(&header.service_method) {
                Err(e) => {
                    let mut response = header;
                    response.err = e.to_string();
                    send_response(&writer, &response, &invalid_body(kind)).await;
                }
                Ok((service, method_name)) => {
                    handlers.spawn(handle_request(
                        service,
                        method_name,
                        kind,
                        header,
                        body,
                        writer.clone(),
                        handle_timeout,
                    ));
                }
            }
        }

        // Drain in-flight requests before closing the connection.
        while handlers.join_next().await.is_some() {}
        let _ = writer.lock().await.shutdown().await;
    }
}

/// Placeholder body accompanying error responses.
fn invalid_body(kind: CodecKind) -> Vec<u8> {
    kind.encode(&()).unwrap_or_default()
}

/// Run one request and write exactly one response for its seq.
async fn handle_request<S>(
    service: Arc<Service>,
    method: String,
    kind: CodecKind,
    mut header: Header,
    body: Bytes,
    writer: Arc<Mutex<FrameWriter<WriteHalf<S>>>>,
    timeout: Duration,
) where
    S: AsyncRead + AsyncWrite + Send + 'static,
{
    let invocation = tokio::spawn(async move { service.call(&method, kind, body).await });

    let outcome = if timeout.is_zero() {
        Some(invocation.await)
    } else {
        tokio::select! {
            res = invocation => Some(res),
            _ = tokio::time::sleep(timeout) => None,
        }
    };

    match outcome {
        None => {
            // The invocation keeps running detached, but this task is the
            // sole responder for the seq, so its late result is never
            // written.
            header.err = format!("rpc server: request handle timeout: expect within {timeout:?}");
            send_response(&writer, &header, &invalid_body(kind)).await;
        }
        Some(Ok(Ok(reply))) => {
            send_response(&writer, &header, &reply).await;
        }
        Some(Ok(Err(e))) => {
            header.err = e.to_string();
            send_response(&writer, &header, &invalid_body(kind)).await;
        }
        Some(Err(join_err)) => {
            header.err = format!("rpc server: handler panicked: {join_err}");
            send_response(&writer, &header, &invalid_body(kind)).await;
        }
    }
}

/// Write one response under the connection's send mutex.
async fn send_response<S>(
    writer: &Mutex<FrameWriter<WriteHalf<S>>>,
    header: &Header,
    body: &[u8],
) where
    S: AsyncRead + AsyncWrite + Send + 'static,
{
    let mut writer = writer.lock().await;
    if let Err(e) = writer.write_frame_raw(header, body).await {
        tracing::error!(seq = header.seq, error = %e, "failed to write response");
    }
}

/// Minimal HTTP/1.0 response for the debug page and 405 replies.
async fn write_http_response<W: AsyncWrite + Unpin>(
    writer: &mut W,
    status: &str,
    content_type: &str,
    body: &[u8],
) -> Result<()> {
    let head = format!(
        "HTTP/1.0 {status}\r\nContent-Type: {content_type}\r\nContent-Length: {}\r\n\r\n",
        body.len()
    );
    writer.write_all(head.as_bytes()).await?;
    writer.write_all(body).await?;
    writer.flush().await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::{Deserialize, Serialize};

    #[derive(Serialize, Deserialize)]
    struct Args {
        num1: i64,
        num2: i64,
    }

    fn server_with_foo() -> Server {
        let server = Server::new();
        server.register(
            Service::builder("Foo")
                .method("Sum", |args: Args| async move {
                    Ok::<i64, String>(args.num1 + args.num2)
                })
                .build(),
        );
        server
    }

    #[test]
    fn test_find_service_resolves_both_halves() {
        let server = server_with_foo();
        let (service, method) = server.find_service("Foo.Sum").unwrap();
        assert_eq!(service.name(), "Foo");
        assert_eq!(method, "Sum");
    }

    #[test]
    fn test_find_service_requires_exactly_one_dot() {
        let server = server_with_foo();
        assert!(matches!(
            server.find_service("Foo").unwrap_err(),
            RpcError::BadMethodName
        ));
        assert!(matches!(
            server.find_service("Foo.Sum.Extra").unwrap_err(),
            RpcError::BadMethodName
        ));
    }

    #[test]
    fn test_find_service_unknown_service_and_method() {
        let server = server_with_foo();
        assert!(matches!(
            server.find_service("Bar.Sum").unwrap_err(),
            RpcError::ServiceNotFound(name) if name == "Bar"
        ));
        assert!(matches!(
            server.find_service("Foo.Mul").unwrap_err(),
            RpcError::MethodNotFound(name) if name == "Mul"
        ));
    }

    #[test]
    fn test_first_registration_wins() {
        let server = server_with_foo();
        // A second "Foo" with different methods must not replace the first.
        server.register(Service::builder("Foo").build());
        assert!(server.find_service("Foo.Sum").is_ok());
    }

    #[test]
    fn test_bad_method_name_error_text() {
        let server = server_with_foo();
        let err = server.find_service("Foo").unwrap_err();
        assert_eq!(err.to_string(), "the format of serviceMethod is wrong");
    }

    async fn negotiate(preamble: &str) -> Result<()> {
        let server = Arc::new(server_with_foo());
        let (mut client_side, server_side) = tokio::io::duplex(1024);
        let (read_half, write_half) = tokio::io::split(server_side);

        client_side.write_all(preamble.as_bytes()).await.unwrap();
        drop(client_side);
        server
            .serve_session(BufReader::new(read_half), write_half)
            .await
    }

    #[tokio::test]
    async fn test_magic_mismatch_rejects_session() {
        let err = negotiate("{\"MagicNumber\": 1}\n").await.unwrap_err();
        assert!(matches!(err, RpcError::MagicMismatch(1)));
    }

    #[tokio::test]
    async fn test_unknown_codec_rejects_session() {
        let err = negotiate("{\"MagicNumber\": 1193046, \"CodecType\": \"gob\"}\n")
            .await
            .unwrap_err();
        assert!(matches!(err, RpcError::CodecUnknown(name) if name == "gob"));
    }

    #[tokio::test]
    async fn test_garbled_preamble_rejects_session() {
        let err = negotiate("not json at all\n").await.unwrap_err();
        assert!(matches!(err, RpcError::Decode(_)));
    }

    #[tokio::test]
    async fn test_eof_before_preamble_is_clean() {
        assert!(negotiate("").await.is_ok());
    }
}
