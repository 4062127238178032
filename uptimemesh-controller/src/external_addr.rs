//! The background refresher for the controller's externally observed
//! hostname/IP (spec §5): a single type owning its own lock, rather than a
//! bare `static` scattered across callers (spec §9's "global mutable
//! state" design note).
//!
//! There is no outbound "what's my address" call here — the controller has
//! no vantage point on its own external address except what its peers
//! report back. Every agent connection already carries a resolved
//! `remote_ip` (spec §4.1 step 4); this cache just remembers the most
//! recent one and expires it after a TTL so a stale entry from a single
//! unusual peer doesn't linger forever.

use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::RwLock;

#[derive(Debug, Clone)]
struct Observation {
    address: String,
    observed_at: Instant,
}

#[derive(Clone)]
pub struct ExternalAddressCache {
    inner: Arc<RwLock<Option<Observation>>>,
    ttl: Duration,
}

impl ExternalAddressCache {
    pub fn new(ttl: Duration) -> Self {
        Self { inner: Arc::new(RwLock::new(None)), ttl }
    }

    /// Records the most recently observed external address for this
    /// controller, as seen from one agent's connection.
    pub async fn record(&self, address: impl Into<String>) {
        *self.inner.write().await = Some(Observation { address: address.into(), observed_at: Instant::now() });
    }

    /// The current address, or `None` if nothing has been observed yet or
    /// the last observation is older than the TTL.
    pub async fn get(&self) -> Option<String> {
        let guard = self.inner.read().await;
        guard.as_ref().filter(|obs| obs.observed_at.elapsed() < self.ttl).map(|obs| obs.address.clone())
    }

    /// Periodically evicts an observation once it has aged past the TTL,
    /// so `get()` never has to special-case a just-expired entry kept
    /// around by a caller that never calls `record` again.
    pub async fn run_refresher(self, cancel: tokio_util::sync::CancellationToken) {
        let mut ticker = tokio::time::interval(self.ttl / 2);
        loop {
            tokio::select! {
                _ = cancel.cancelled() => return,
                _ = ticker.tick() => {
                    let mut guard = self.inner.write().await;
                    if guard.as_ref().is_some_and(|obs| obs.observed_at.elapsed() >= self.ttl) {
                        *guard = None;
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn records_and_returns_the_latest_observation() {
        let cache = ExternalAddressCache::new(Duration::from_secs(300));
        assert_eq!(cache.get().await, None);
        cache.record("203.0.113.9").await;
        assert_eq!(cache.get().await, Some("203.0.113.9".to_string()));
        cache.record("203.0.113.10").await;
        assert_eq!(cache.get().await, Some("203.0.113.10".to_string()));
    }

    #[tokio::test]
    async fn expired_observation_is_not_returned() {
        let cache = ExternalAddressCache::new(Duration::from_millis(10));
        cache.record("203.0.113.9").await;
        tokio::time::sleep(Duration::from_millis(30)).await;
        assert_eq!(cache.get().await, None);
    }

    #[tokio::test]
    async fn refresher_evicts_a_stale_entry_in_place() {
        let cache = ExternalAddressCache::new(Duration::from_millis(20));
        cache.record("203.0.113.9").await;
        let cancel = tokio_util::sync::CancellationToken::new();
        let handle = tokio::spawn(cache.clone().run_refresher(cancel.clone()));

        tokio::time::sleep(Duration::from_millis(60)).await;
        assert!(cache.inner.read().await.is_none());

        cancel.cancel();
        handle.await.unwrap();
    }
}
