//! Registry - a heartbeat-based server registry over HTTP.
//!
//! Servers announce themselves by POSTing a heartbeat; clients (via
//! [`crate::RegistryDiscovery`]) GET the set of addresses whose last
//! heartbeat is still within the liveness timeout. Expired entries are
//! pruned on query.
//!
//! Wire contract, served at [`DEFAULT_REGISTRY_PATH`]:
//!
//! - `GET` → `200` with header `X-RPC-Servers: <addr1>,<addr2>,…` (sorted
//!   ascending)
//! - `POST` with header `X-RPC-Server: <addr>` → `200`; missing header
//!   → `500`
//! - any other method → `405`
//!
//! # Example
//!
//! ```ignore
//! use geerpc::Registry;
//! use std::sync::Arc;
//!
//! let registry = Arc::new(Registry::default());
//! let listener = tokio::net::TcpListener::bind("0.0.0.0:9999").await?;
//! axum::serve(listener, registry.router()).await?;
//! ```

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use axum::extract::State;
use axum::http::{HeaderMap, StatusCode};
use axum::response::IntoResponse;
use axum::routing::get;
use axum::Router;

use crate::error::{Result, RpcError};

/// Default path the registry is served at.
pub const DEFAULT_REGISTRY_PATH: &str = "/_rpc_/registry";

/// Default liveness timeout for registered servers.
pub const DEFAULT_REGISTRY_TIMEOUT: Duration = Duration::from_secs(5 * 60);

/// Tracks live server addresses by their last heartbeat time.
pub struct Registry {
    timeout: Duration,
    servers: Mutex<HashMap<String, Instant>>,
}

impl Default for Registry {
    fn default() -> Self {
        Self::new(DEFAULT_REGISTRY_TIMEOUT)
    }
}

impl Registry {
    /// A registry that considers a server dead `timeout` after its last
    /// heartbeat. A zero timeout disables expiry.
    pub fn new(timeout: Duration) -> Registry {
        Registry {
            timeout,
            servers: Mutex::new(HashMap::new()),
        }
    }

    /// Record a heartbeat for `addr`, inserting it if new.
    pub fn put_server(&self, addr: &str) {
        let mut servers = self.servers.lock().unwrap();
        servers.insert(addr.to_string(), Instant::now());
    }

    /// Addresses within the liveness timeout, sorted ascending.
    /// Expired entries are removed.
    pub fn alive_servers(&self) -> Vec<String> {
        let mut servers = self.servers.lock().unwrap();
        if !self.timeout.is_zero() {
            let timeout = self.timeout;
            servers.retain(|_, last_beat| last_beat.elapsed() < timeout);
        }
        let mut alive: Vec<String> = servers.keys().cloned().collect();
        alive.sort();
        alive
    }

    /// The registry's HTTP façade, mounted at [`DEFAULT_REGISTRY_PATH`].
    pub fn router(self: Arc<Self>) -> Router {
        Router::new()
            .route(
                DEFAULT_REGISTRY_PATH,
                get(list_servers).post(register_server),
            )
            .with_state(self)
    }
}

async fn list_servers(State(registry): State<Arc<Registry>>) -> impl IntoResponse {
    let alive = registry.alive_servers().join(",");
    ([("X-RPC-Servers", alive)], StatusCode::OK)
}

async fn register_server(
    State(registry): State<Arc<Registry>>,
    headers: HeaderMap,
) -> StatusCode {
    match headers
        .get("X-RPC-Server")
        .and_then(|v| v.to_str().ok())
        .filter(|addr| !addr.is_empty())
    {
        Some(addr) => {
            registry.put_server(addr);
            StatusCode::OK
        }
        None => {
            tracing::warn!("heartbeat without X-RPC-Server header");
            StatusCode::INTERNAL_SERVER_ERROR
        }
    }
}

/// Headroom between the registry timeout and the default heartbeat period.
const HEARTBEAT_GAP: Duration = Duration::from_secs(60);

/// Send heartbeats for `addr` to `registry_url` until one fails.
///
/// A zero `period` defaults to the registry timeout minus one minute. The
/// first beat is sent immediately; callers usually spawn this.
pub async fn heartbeat(registry_url: &str, addr: &str, period: Duration) {
    let period = if period.is_zero() {
        DEFAULT_REGISTRY_TIMEOUT - HEARTBEAT_GAP
    } else {
        period
    };

    let client = reqwest::Client::new();
    loop {
        if let Err(e) = send_heartbeat(&client, registry_url, addr).await {
            tracing::warn!(addr, error = %e, "heartbeat failed, stopping");
            return;
        }
        tokio::time::sleep(period).await;
    }
}

async fn send_heartbeat(client: &reqwest::Client, registry_url: &str, addr: &str) -> Result<()> {
    tracing::debug!(addr, registry = registry_url, "sending heartbeat");
    client
        .post(registry_url)
        .header("X-RPC-Server", addr)
        .send()
        .await
        .map_err(|e| RpcError::Http(e.to_string()))?;
    Ok(())
}
