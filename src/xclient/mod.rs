//! XClient - a pooled, discovery-aware client.
//!
//! Maintains one [`Client`] per server address, dialing lazily and replacing
//! clients whose connection has died. Supports unicast calls through a
//! selection mode and broadcast calls that fan out to every known server.
//!
//! # Example
//!
//! ```ignore
//! use geerpc::{MultiServerDiscovery, SelectMode, SessionOptions, XClient};
//! use tokio_util::sync::CancellationToken;
//!
//! let discovery = MultiServerDiscovery::new(vec![
//!     "tcp@127.0.0.1:9001".to_string(),
//!     "tcp@127.0.0.1:9002".to_string(),
//! ]);
//! let xclient = XClient::new(discovery, SelectMode::RoundRobin, SessionOptions::default());
//! let ctx = CancellationToken::new();
//! let sum: i64 = xclient.call(&ctx, "Foo.Sum", &args).await?;
//! ```

mod discovery;

pub use discovery::{
    Discovery, MultiServerDiscovery, RegistryDiscovery, SelectMode, DEFAULT_UPDATE_TIMEOUT,
};

use std::collections::HashMap;
use std::sync::Mutex as StdMutex;

use serde::de::DeserializeOwned;
use serde::Serialize;
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;

use crate::client::{self, Client};
use crate::error::{Result, RpcError};
use crate::option::SessionOptions;

struct BroadcastState<R> {
    first_err: Option<RpcError>,
    reply: Option<R>,
}

/// A load-balanced client over a discovered server set.
pub struct XClient<D: Discovery> {
    discovery: D,
    mode: SelectMode,
    options: SessionOptions,
    /// Held across `x_dial` on purpose: at most one concurrent dial per
    /// address, so a broadcast fan-out opens one connection per backend,
    /// not one per in-flight task.
    clients: Mutex<HashMap<String, Client>>,
}

impl<D: Discovery> XClient<D> {
    pub fn new(discovery: D, mode: SelectMode, options: SessionOptions) -> Self {
        Self {
            discovery,
            mode,
            options,
            clients: Mutex::new(HashMap::new()),
        }
    }

    /// The discovery backing this client.
    pub fn discovery(&self) -> &D {
        &self.discovery
    }

    /// Close and drop every pooled client.
    pub async fn close(&self) {
        let mut clients = self.clients.lock().await;
        for (_, client) in clients.drain() {
            let _ = client.close().await;
        }
    }

    /// Return a healthy pooled client for `rpc_addr`, dialing if needed.
    async fn dial_cached(&self, rpc_addr: &str) -> Result<Client> {
        let mut clients = self.clients.lock().await;

        if let Some(existing) = clients.get(rpc_addr) {
            if existing.is_valid() {
                return Ok(existing.clone());
            }
        }
        // Entry is stale (or absent): close whatever was there and redial.
        if let Some(stale) = clients.remove(rpc_addr) {
            let _ = stale.close().await;
        }

        let client = client::x_dial(rpc_addr, self.options.clone()).await?;
        clients.insert(rpc_addr.to_string(), client.clone());
        Ok(client)
    }

    async fn call_addr<A, R>(
        &self,
        ctx: &CancellationToken,
        rpc_addr: &str,
        service_method: &str,
        args: &A,
    ) -> Result<R>
    where
        A: Serialize,
        R: DeserializeOwned,
    {
        let client = self.dial_cached(rpc_addr).await?;
        client.call(ctx, service_method, args).await
    }

    /// Unicast: ask discovery for one address under the selection mode,
    /// then delegate to its client.
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
        let rpc_addr = self.discovery.get(self.mode).await?;
        self.call_addr(ctx, &rpc_addr, service_method, args).await
    }

    /// Broadcast: invoke on every known server concurrently.
    ///
    /// The first error cancels the remaining in-flight calls and is
    /// recorded; the first success's reply is kept. Returns an error only
    /// when no backend succeeded.
    pub async fn broadcast<A, R>(
        &self,
        ctx: &CancellationToken,
        service_method: &str,
        args: &A,
    ) -> Result<R>
    where
        A: Serialize + Sync,
        R: DeserializeOwned,
    {
        let rpc_addrs = self.discovery.get_all().await?;
        if rpc_addrs.is_empty() {
            return Err(RpcError::DiscoveryEmpty);
        }

        let child = ctx.child_token();
        let state = StdMutex::new(BroadcastState::<R> {
            first_err: None,
            reply: None,
        });

        futures::future::join_all(rpc_addrs.iter().map(|rpc_addr| {
            let child = child.clone();
            let state = &state;
            async move {
                let res: Result<R> = self
                    .call_addr(&child, rpc_addr, service_method, args)
                    .await;
                let mut state = state.lock().unwrap();
                match res {
                    Err(e) => {
                        if state.first_err.is_none() {
                            state.first_err = Some(e);
                            child.cancel();
                        }
                    }
                    Ok(reply) => {
                        if state.reply.is_none() {
                            state.reply = Some(reply);
                        }
                    }
                }
            }
        }))
        .await;
        child.cancel();

        let state = state.into_inner().unwrap();
        match state.reply {
            Some(reply) => Ok(reply),
            None => Err(state.first_err.unwrap_or(RpcError::DiscoveryEmpty)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_call_with_empty_discovery_errors() {
        let xclient = XClient::new(
            MultiServerDiscovery::new(Vec::new()),
            SelectMode::Random,
            SessionOptions::default(),
        );
        let ctx = CancellationToken::new();
        let err = xclient.call::<(), i64>(&ctx, "Foo.Sum", &()).await.unwrap_err();
        assert!(matches!(err, RpcError::DiscoveryEmpty));
    }

    #[tokio::test]
    async fn test_broadcast_with_empty_discovery_errors() {
        let xclient = XClient::new(
            MultiServerDiscovery::new(Vec::new()),
            SelectMode::RoundRobin,
            SessionOptions::default(),
        );
        let ctx = CancellationToken::new();
        let err = xclient
            .broadcast::<(), i64>(&ctx, "Foo.Sum", &())
            .await
            .unwrap_err();
        assert!(matches!(err, RpcError::DiscoveryEmpty));
    }
}
