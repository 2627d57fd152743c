//! # geerpc
//!
//! A small RPC runtime: expose typed procedure endpoints over TCP or Unix
//! sockets, call them with request/reply semantics, per-request timeouts,
//! concurrent multiplexing over a single connection, service discovery and
//! load balancing.
//!
//! ## Architecture
//!
//! - **Session preamble** (JSON line): magic number + codec negotiation
//! - **Data plane**: length-prefixed `(Header, Body)` frames under the
//!   negotiated codec, both directions
//! - **Discovery + XClient**: a pooled client over a refreshed server set
//!   with unicast and broadcast call patterns
//!
//! ## Example
//!
//! ```ignore
//! use geerpc::{Server, Service, SessionOptions};
//! use geerpc::transport::Listener;
//! use serde::{Deserialize, Serialize};
//! use std::sync::Arc;
//!
//! #[derive(Serialize, Deserialize)]
//! struct Args { num1: i64, num2: i64 }
//!
//! #[tokio::main]
//! async fn main() -> geerpc::Result<()> {
//!     let server = Arc::new(Server::new());
//!     server.register(
//!         Service::builder("Foo")
//!             .method("Sum", |args: Args| async move {
//!                 Ok::<i64, String>(args.num1 + args.num2)
//!             })
//!             .build(),
//!     );
//!     let listener = Listener::bind("tcp", "127.0.0.1:9999").await?;
//!     tokio::spawn(server.accept(listener));
//!
//!     let client = geerpc::client::dial("tcp", "127.0.0.1:9999", SessionOptions::default()).await?;
//!     let sum: i64 = client.go("Foo.Sum", &Args { num1: 1, num2: 3 }).await.recv().await?;
//!     assert_eq!(sum, 4);
//!     Ok(())
//! }
//! ```

pub mod client;
pub mod codec;
pub mod error;
pub mod option;
pub mod registry;
pub mod server;
pub mod service;
pub mod transport;
pub mod wire;
pub mod xclient;

pub use client::{Call, Client};
pub use codec::CodecKind;
pub use error::{Result, RpcError};
pub use option::{SessionOptions, MAGIC_NUMBER};
pub use registry::Registry;
pub use server::Server;
pub use service::{Service, ServiceBuilder};
pub use xclient::{Discovery, MultiServerDiscovery, RegistryDiscovery, SelectMode, XClient};
