//! Client - one connection, many concurrent calls.
//!
//! A [`Client`] owns a single negotiated session and multiplexes calls over
//! it. Sends are serialized by a send mutex; one spawned receive loop reads
//! replies and matches them against the pending-call map by `seq`. Each call
//! completes exactly once through a oneshot channel, whether it succeeds,
//! fails remotely, fails to decode, or the connection dies underneath it.
//!
//! # Lifecycle
//!
//! 1. [`dial`]/[`dial_http`]/[`x_dial`] connect and write the session
//!    preamble, racing against `connect_timeout`
//! 2. [`Client::go`] registers a call and writes its frame
//! 3. The receive loop completes the call when the matching reply arrives
//! 4. On any receive error every pending call is failed and the client is
//!    shut down
//!
//! # Example
//!
//! ```ignore
//! let client = geerpc::client::dial("tcp", "127.0.0.1:9999", SessionOptions::default()).await?;
//! let reply: i64 = client.go("Foo.Sum", &args).await.recv().await?;
//! ```

use std::collections::HashMap;
use std::sync::{Arc, Mutex as StdMutex};

use bytes::Bytes;
use serde::de::DeserializeOwned;
use serde::Serialize;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader, ReadHalf, WriteHalf};
use tokio::sync::{oneshot, Mutex};
use tokio_util::sync::CancellationToken;

use crate::codec::CodecKind;
use crate::error::{Result, RpcError};
use crate::option::SessionOptions;
use crate::server::{CONNECTED, DEFAULT_RPC_PATH};
use crate::transport::{self, Stream};
use crate::wire::{FrameReader, FrameWriter, Header};

/// Completion payload delivered to a [`Call`]: raw reply bytes or an error.
type Outcome = Result<Bytes>;

/// One outstanding request.
///
/// Returned by [`Client::go`]; await [`Call::recv`] to obtain the typed
/// reply. The call is completed exactly once, even if the connection dies.
pub struct Call {
    /// `"<Service>.<Method>"` this call addresses.
    pub service_method: String,
    /// Seq assigned at send time; `0` if the call never made it onto the wire.
    pub seq: u64,
    kind: CodecKind,
    done: oneshot::Receiver<Outcome>,
}

impl Call {
    /// Wait for completion and decode the reply.
    ///
    /// The reply holder is untouched by failure: on any error path this
    /// returns `Err` and no partial value.
    pub async fn recv<R: DeserializeOwned>(self) -> Result<R> {
        match self.done.await {
            Ok(Ok(bytes)) => self.kind.decode(&bytes),
            Ok(Err(e)) => Err(e),
            // The sender only disappears if the client was dropped wholesale.
            Err(_) => Err(RpcError::ConnectionClosed),
        }
    }
}

struct ClientState {
    next_seq: u64,
    pending: HashMap<u64, oneshot::Sender<Outcome>>,
    closing: bool,
    shutdown: bool,
}

impl ClientState {
    fn new() -> Self {
        Self {
            next_seq: 1,
            pending: HashMap::new(),
            closing: false,
            shutdown: false,
        }
    }

    fn is_valid(&self) -> bool {
        !self.closing && !self.shutdown
    }
}

struct ClientInner {
    kind: CodecKind,
    /// Send mutex; serializes every frame write.
    writer: Mutex<FrameWriter<WriteHalf<Stream>>>,
    /// Guards seq assignment, the pending map and the closing/shutdown flags.
    state: StdMutex<ClientState>,
}

/// A multiplexing RPC client over one connection.
///
/// Cheap to clone; all clones share the connection and pending map.
#[derive(Clone)]
pub struct Client {
    inner: Arc<ClientInner>,
}

impl std::fmt::Debug for Client {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Client").finish_non_exhaustive()
    }
}

impl Client {
    /// True while the client is neither closing nor shut down.
    pub fn is_valid(&self) -> bool {
        self.inner.state.lock().unwrap().is_valid()
    }

    /// Close the client, shutting down the write half of the connection.
    ///
    /// In-flight calls are completed by the receive loop when the peer
    /// finishes or the connection drops.
    pub async fn close(&self) -> Result<()> {
        {
            let mut state = self.inner.state.lock().unwrap();
            if !state.is_valid() {
                return Err(RpcError::ConnectionClosed);
            }
            state.closing = true;
        }
        let mut writer = self.inner.writer.lock().await;
        writer.shutdown().await
    }

    /// Start a call asynchronously.
    ///
    /// Registers the call (assigning its seq) and writes the request frame.
    /// Errors never escape here; they complete the returned [`Call`], so a
    /// caller that fires and forgets still cannot desynchronize the wire.
    pub async fn go<A: Serialize>(&self, service_method: &str, args: &A) -> Call {
        let kind = self.inner.kind;
        let (tx, rx) = oneshot::channel();
        let mut call = Call {
            service_method: service_method.to_string(),
            seq: 0,
            kind,
            done: rx,
        };

        let body = match kind.encode(args) {
            Ok(b) => b,
            Err(e) => {
                let _ = tx.send(Err(e));
                return call;
            }
        };

        // Lock order: send mutex first, state mutex second.
        let mut writer = self.inner.writer.lock().await;
        let seq = {
            let mut state = self.inner.state.lock().unwrap();
            if !state.is_valid() {
                drop(state);
                let _ = tx.send(Err(RpcError::ConnectionClosed));
                return call;
            }
            let seq = state.next_seq;
            state.next_seq += 1;
            state.pending.insert(seq, tx);
            seq
        };
        call.seq = seq;

        let header = Header::request(service_method, seq);
        if let Err(e) = writer.write_frame_raw(&header, &body).await {
            // The peer may still be healthy; shutdown is the receive loop's
            // decision. Fail only this call.
            tracing::debug!(seq, error = %e, "request write failed");
            if let Some(tx) = self.inner.state.lock().unwrap().pending.remove(&seq) {
                let _ = tx.send(Err(e));
            }
        }
        call
    }

    /// Call synchronously, racing completion against `ctx` cancellation.
    ///
    /// Cancellation unblocks the caller with [`RpcError::Cancelled`] but
    /// does not retract the request: the pending entry is reaped when the
    /// reply eventually arrives (and is discarded) or the connection dies.
    pub async fn call<A, R>(
        &self,
        ctx: &CancellationToken,
        service_method: &str,
        args: &A,
    ) -> Result<R>
    where
        A: Serialize,
        R: DeserializeOwned,
    {
        let call = self.go(service_method, args).await;
        tokio::select! {
            res = call.recv::<R>() => res,
            _ = ctx.cancelled() => Err(RpcError::Cancelled("context cancelled".to_string())),
        }
    }

    async fn new_session(stream: Stream, options: SessionOptions) -> Result<Client> {
        Self::handshake(stream, options, false).await
    }

    async fn new_http_session(stream: Stream, options: SessionOptions) -> Result<Client> {
        Self::handshake(stream, options, true).await
    }

    async fn handshake(stream: Stream, options: SessionOptions, http: bool) -> Result<Client> {
        let kind = CodecKind::from_name(&options.codec_type)?;
        let (read_half, write_half) = tokio::io::split(stream);
        let mut reader = BufReader::new(read_half);
        let mut writer = write_half;

        if http {
            http_handshake(&mut reader, &mut writer).await?;
        }

        // Session preamble: one JSON line before any framed traffic.
        let mut line =
            serde_json::to_vec(&options).map_err(|e| RpcError::Encode(e.to_string()))?;
        line.push(b'\n');
        writer.write_all(&line).await?;
        writer.flush().await?;

        let inner = Arc::new(ClientInner {
            kind,
            writer: Mutex::new(FrameWriter::new(writer, kind)),
            state: StdMutex::new(ClientState::new()),
        });
        tokio::spawn(receive_loop(inner.clone(), FrameReader::new(reader, kind)));
        Ok(Client { inner })
    }
}

/// The per-connection receive loop: match replies to pending calls.
async fn receive_loop(inner: Arc<ClientInner>, mut reader: FrameReader<ReadHalf<Stream>>) {
    let cause = loop {
        let header = match reader.read_header().await {
            Ok(h) => h,
            Err(e) => break e,
        };
        // The body unit is consumed unconditionally; framing survives error
        // headers and replies nobody is waiting for.
        let body = match reader.read_body().await {
            Ok(b) => b,
            Err(e) => break e,
        };

        let pending = inner.state.lock().unwrap().pending.remove(&header.seq);
        match pending {
            None => {
                tracing::debug!(seq = header.seq, "reply without a pending call, discarded");
            }
            Some(tx) => {
                let outcome = if header.err.is_empty() {
                    Ok(body)
                } else {
                    Err(RpcError::Remote(header.err))
                };
                let _ = tx.send(outcome);
            }
        }
    };

    if cause.is_eof() {
        tracing::debug!("connection closed by peer");
    } else {
        tracing::warn!(error = %cause, "receive loop failed");
    }
    terminate(&inner, &cause).await;
}

/// Fail every pending call and mark the client shut down.
async fn terminate(inner: &ClientInner, cause: &RpcError) {
    // Same lock order as the send path: send mutex, then state.
    let _writer = inner.writer.lock().await;
    let mut state = inner.state.lock().unwrap();
    state.shutdown = true;
    let msg = cause.to_string();
    for (_, tx) in state.pending.drain() {
        let _ = tx.send(Err(RpcError::Terminated(msg.clone())));
    }
}

/// CONNECT exchange for HTTP-fronted servers.
async fn http_handshake(
    reader: &mut BufReader<ReadHalf<Stream>>,
    writer: &mut WriteHalf<Stream>,
) -> Result<()> {
    writer
        .write_all(format!("CONNECT {DEFAULT_RPC_PATH} HTTP/1.0\r\n\r\n").as_bytes())
        .await?;
    writer.flush().await?;

    let mut status = String::new();
    reader.read_line(&mut status).await?;
    let status = status.trim_end();
    if status != format!("HTTP/1.0 {CONNECTED}") {
        return Err(RpcError::Http(format!("unexpected HTTP response: {status}")));
    }
    // Blank line terminating the response head.
    let mut blank = String::new();
    reader.read_line(&mut blank).await?;
    Ok(())
}

/// Dial a server over a named transport (`"tcp"`, `"unix"`).
pub async fn dial(proto: &str, addr: &str, options: SessionOptions) -> Result<Client> {
    let proto = proto.to_string();
    let addr = addr.to_string();
    dial_timeout(options, move |options| async move {
        let stream = transport::connect(&proto, &addr).await?;
        Client::new_session(stream, options).await
    })
    .await
}

/// Dial an HTTP-fronted server: TCP connect, then the CONNECT upgrade.
pub async fn dial_http(addr: &str, options: SessionOptions) -> Result<Client> {
    let addr = addr.to_string();
    dial_timeout(options, move |options| async move {
        let stream = transport::connect("tcp", &addr).await?;
        Client::new_http_session(stream, options).await
    })
    .await
}

/// Dial `"<proto>@<address>"`: `http@…` upgrades over TCP, anything else is
/// a raw dial over `<proto>`.
pub async fn x_dial(rpc_addr: &str, options: SessionOptions) -> Result<Client> {
    let (proto, addr) = rpc_addr
        .split_once('@')
        .ok_or_else(|| RpcError::BadAddress(rpc_addr.to_string()))?;
    match proto {
        "http" => dial_http(addr, options).await,
        proto => dial(proto, addr, options).await,
    }
}

/// Run a dial future, racing it against `connect_timeout` (zero disables).
///
/// The constructor runs in its own task; if the timer wins, the task is
/// aborted so a connection it may have opened is dropped and closed.
async fn dial_timeout<F, Fut>(options: SessionOptions, connect: F) -> Result<Client>
where
    F: FnOnce(SessionOptions) -> Fut,
    Fut: std::future::Future<Output = Result<Client>> + Send + 'static,
{
    let timeout = options.connect_timeout;
    let mut handle = tokio::spawn(connect(options));

    if timeout.is_zero() {
        return handle
            .await
            .map_err(|e| RpcError::Io(std::io::Error::other(e)))?;
    }

    tokio::select! {
        res = &mut handle => res.map_err(|e| RpcError::Io(std::io::Error::other(e)))?,
        _ = tokio::time::sleep(timeout) => {
            handle.abort();
            Err(RpcError::Timeout("connect"))
        }
    }
}
