//! Discovery - maintain a set of known server addresses and pick one.
//!
//! Two variants behind one contract: [`MultiServerDiscovery`] holds a
//! hand-managed static set, [`RegistryDiscovery`] refreshes the set from a
//! heartbeat registry's HTTP endpoint, at most once per refresh window.

use std::sync::Mutex as StdMutex;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use rand::Rng;
use tokio::sync::Mutex;

use crate::error::{Result, RpcError};

/// How an address is picked from the set.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SelectMode {
    /// Uniformly at random.
    Random,
    /// Rotating index modulo the set size.
    RoundRobin,
}

/// Source of candidate server addresses.
#[async_trait]
pub trait Discovery: Send + Sync {
    /// Reload from the authoritative source, if there is one.
    async fn refresh(&self) -> Result<()>;

    /// Replace the address set.
    async fn update(&self, servers: Vec<String>) -> Result<()>;

    /// Pick one address under `mode`.
    async fn get(&self, mode: SelectMode) -> Result<String>;

    /// Snapshot of the current set.
    async fn get_all(&self) -> Result<Vec<String>>;
}

struct MultiState {
    servers: Vec<String>,
    index: usize,
}

/// Discovery over a hand-managed server list.
pub struct MultiServerDiscovery {
    state: StdMutex<MultiState>,
}

impl MultiServerDiscovery {
    /// Discovery seeded with `servers`.
    ///
    /// The round-robin index starts at a random position so multiple
    /// processes don't all hammer the first server.
    pub fn new(servers: Vec<String>) -> Self {
        let index = rand::thread_rng().gen_range(0..1usize << 31);
        Self {
            state: StdMutex::new(MultiState { servers, index }),
        }
    }
}

#[async_trait]
impl Discovery for MultiServerDiscovery {
    async fn refresh(&self) -> Result<()> {
        Ok(())
    }

    async fn update(&self, servers: Vec<String>) -> Result<()> {
        self.state.lock().unwrap().servers = servers;
        Ok(())
    }

    async fn get(&self, mode: SelectMode) -> Result<String> {
        let mut state = self.state.lock().unwrap();
        let n = state.servers.len();
        if n == 0 {
            return Err(RpcError::DiscoveryEmpty);
        }
        match mode {
            SelectMode::Random => {
                let i = rand::thread_rng().gen_range(0..n);
                Ok(state.servers[i].clone())
            }
            SelectMode::RoundRobin => {
                let server = state.servers[state.index % n].clone();
                state.index = (state.index + 1) % n;
                Ok(server)
            }
        }
    }

    async fn get_all(&self) -> Result<Vec<String>> {
        Ok(self.state.lock().unwrap().servers.clone())
    }
}

/// Refresh window applied when none is configured.
pub const DEFAULT_UPDATE_TIMEOUT: Duration = Duration::from_secs(10);

/// Discovery backed by a heartbeat registry.
///
/// Every `get`/`get_all` refreshes first; a refresh inside the timeout
/// window is a no-op, otherwise the registry is queried and the set
/// atomically replaced.
pub struct RegistryDiscovery {
    inner: MultiServerDiscovery,
    registry: String,
    timeout: Duration,
    /// Also serializes concurrent refreshes, so the registry sees at most
    /// one query per window.
    last_update: Mutex<Option<Instant>>,
    http: reqwest::Client,
}

impl RegistryDiscovery {
    /// Discovery refreshing from `registry` (a full URL) every `timeout`.
    /// A zero timeout selects [`DEFAULT_UPDATE_TIMEOUT`].
    pub fn new(registry: &str, timeout: Duration) -> Self {
        let timeout = if timeout.is_zero() {
            DEFAULT_UPDATE_TIMEOUT
        } else {
            timeout
        };
        Self {
            inner: MultiServerDiscovery::new(Vec::new()),
            registry: registry.to_string(),
            timeout,
            last_update: Mutex::new(None),
            http: reqwest::Client::new(),
        }
    }
}

#[async_trait]
impl Discovery for RegistryDiscovery {
    async fn refresh(&self) -> Result<()> {
        let mut last = self.last_update.lock().await;
        if last.is_some_and(|t| t.elapsed() < self.timeout) {
            return Ok(());
        }

        tracing::debug!(registry = %self.registry, "refreshing servers from registry");
        let response = self
            .http
            .get(&self.registry)
            .send()
            .await
            .map_err(|e| RpcError::Http(e.to_string()))?;
        let servers = response
            .headers()
            .get("X-RPC-Servers")
            .and_then(|v| v.to_str().ok())
            .unwrap_or("")
            .split(',')
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(str::to_string)
            .collect();

        self.inner.update(servers).await?;
        *last = Some(Instant::now());
        Ok(())
    }

    async fn update(&self, servers: Vec<String>) -> Result<()> {
        let mut last = self.last_update.lock().await;
        self.inner.update(servers).await?;
        *last = Some(Instant::now());
        Ok(())
    }

    async fn get(&self, mode: SelectMode) -> Result<String> {
        self.refresh().await?;
        self.inner.get(mode).await
    }

    async fn get_all(&self) -> Result<Vec<String>> {
        self.refresh().await?;
        self.inner.get_all().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn servers(n: usize) -> Vec<String> {
        (0..n).map(|i| format!("tcp@127.0.0.1:{}", 9000 + i)).collect()
    }

    #[tokio::test]
    async fn test_empty_set_errors() {
        let d = MultiServerDiscovery::new(Vec::new());
        assert!(matches!(
            d.get(SelectMode::Random).await.unwrap_err(),
            RpcError::DiscoveryEmpty
        ));
    }

    #[tokio::test]
    async fn test_random_picks_members() {
        let d = MultiServerDiscovery::new(servers(3));
        for _ in 0..20 {
            let picked = d.get(SelectMode::Random).await.unwrap();
            assert!(servers(3).contains(&picked));
        }
    }

    #[tokio::test]
    async fn test_round_robin_fairness() {
        let n = 3;
        let m = 10;
        let d = MultiServerDiscovery::new(servers(n));

        let mut counts: HashMap<String, usize> = HashMap::new();
        for _ in 0..m {
            let picked = d.get(SelectMode::RoundRobin).await.unwrap();
            *counts.entry(picked).or_default() += 1;
        }

        // Every address chosen floor(m/n) or ceil(m/n) times.
        for addr in servers(n) {
            let count = counts.get(&addr).copied().unwrap_or(0);
            assert!(
                count == m / n || count == m / n + 1,
                "{addr} chosen {count} times"
            );
        }
    }

    #[tokio::test]
    async fn test_update_replaces_set() {
        let d = MultiServerDiscovery::new(servers(2));
        d.update(vec!["tcp@10.0.0.1:1".to_string()]).await.unwrap();
        assert_eq!(d.get_all().await.unwrap(), vec!["tcp@10.0.0.1:1"]);
    }

    #[tokio::test]
    async fn test_registry_discovery_refresh_window() {
        // With a long window and a stamped update, get_all must not touch
        // the (unreachable) registry URL.
        let d = RegistryDiscovery::new("http://127.0.0.1:1/registry", Duration::from_secs(60));
        d.update(servers(2)).await.unwrap();
        assert_eq!(d.get_all().await.unwrap(), servers(2));
    }

    #[tokio::test]
    async fn test_registry_discovery_refresh_failure_propagates() {
        // Expired window and nothing listening: refresh must error.
        let d = RegistryDiscovery::new("http://127.0.0.1:1/registry", Duration::from_millis(1));
        tokio::time::sleep(Duration::from_millis(5)).await;
        assert!(matches!(
            d.get_all().await.unwrap_err(),
            RpcError::Http(_)
        ));
    }
}
