//! In-memory cache backend.
//!
//! Per-instance only: rate limiting, cached responses and alert markers
//! held here are not visible to other gateway instances. Deployments with
//! more than one instance configure Redis instead.

use std::time::{Duration, Instant};

use async_trait::async_trait;
use dashmap::DashMap;
use tokio_util::task::TaskTracker;

use super::{error::CacheResult, traits::Cache};

const JANITOR_INTERVAL: Duration = Duration::from_secs(60);

struct Entry {
    data: Vec<u8>,
    expires_at: Option<Instant>,
}

impl Entry {
    fn new(data: Vec<u8>, ttl: Duration) -> Self {
        Self {
            data,
            expires_at: (!ttl.is_zero()).then(|| Instant::now() + ttl),
        }
    }

    fn is_expired(&self) -> bool {
        self.expires_at.is_some_and(|exp| Instant::now() > exp)
    }
}

#[derive(Default)]
pub struct MemoryCache {
    data: DashMap<String, Entry>,
}

impl MemoryCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Evict every expired entry, returning how many were removed.
    ///
    /// Reads already treat expired entries as misses; sweeping only
    /// reclaims their memory.
    fn sweep(&self) -> usize {
        let before = self.data.len();
        self.data.retain(|_, entry| !entry.is_expired());
        before - self.data.len()
    }

    /// Spawn the janitor task that sweeps expired entries every 60 seconds.
    pub fn spawn_janitor(self: &std::sync::Arc<Self>, tracker: &TaskTracker) {
        let cache = std::sync::Arc::clone(self);
        tracker.spawn(async move {
            let mut tick = tokio::time::interval(JANITOR_INTERVAL);
            tick.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                tick.tick().await;
                let evicted = cache.sweep();
                if evicted > 0 {
                    tracing::debug!(evicted, "memory cache janitor evicted expired entries");
                }
            }
        });
    }

    #[cfg(test)]
    fn len(&self) -> usize {
        self.data.len()
    }
}

#[async_trait]
impl Cache for MemoryCache {
    async fn get_bytes(&self, key: &str) -> CacheResult<Option<Vec<u8>>> {
        if let Some(entry) = self.data.get(key) {
            if entry.is_expired() {
                drop(entry);
                self.data.remove(key);
                return Ok(None);
            }
            return Ok(Some(entry.data.clone()));
        }
        Ok(None)
    }

    async fn set_bytes(&self, key: &str, value: &[u8], ttl: Duration) -> CacheResult<()> {
        self.data.insert(key.to_string(), Entry::new(value.to_vec(), ttl));
        Ok(())
    }

    async fn set_nx(&self, key: &str, value: &[u8], ttl: Duration) -> CacheResult<bool> {
        use dashmap::mapref::entry::Entry as MapEntry;

        match self.data.entry(key.to_string()) {
            MapEntry::Occupied(mut occupied) => {
                if occupied.get().is_expired() {
                    occupied.insert(Entry::new(value.to_vec(), ttl));
                    Ok(true)
                } else {
                    Ok(false)
                }
            }
            MapEntry::Vacant(vacant) => {
                vacant.insert(Entry::new(value.to_vec(), ttl));
                Ok(true)
            }
        }
    }

    async fn delete(&self, key: &str) -> CacheResult<()> {
        self.data.remove(key);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn set_get_round_trip() {
        let cache = MemoryCache::new();
        cache.set_bytes("k", b"value", Duration::from_secs(60)).await.unwrap();
        assert_eq!(cache.get_bytes("k").await.unwrap(), Some(b"value".to_vec()));
        assert_eq!(cache.get_bytes("missing").await.unwrap(), None);
    }

    #[tokio::test]
    async fn expired_entry_reads_as_miss() {
        let cache = MemoryCache::new();
        cache.set_bytes("k", b"v", Duration::from_millis(10)).await.unwrap();
        tokio::time::sleep(Duration::from_millis(30)).await;
        assert_eq!(cache.get_bytes("k").await.unwrap(), None);
        // The expired read also reclaims the slot.
        assert_eq!(cache.len(), 0);
    }

    #[tokio::test]
    async fn zero_ttl_means_no_expiry() {
        let cache = MemoryCache::new();
        cache.set_bytes("k", b"v", Duration::ZERO).await.unwrap();
        assert!(cache.get_bytes("k").await.unwrap().is_some());
    }

    #[tokio::test]
    async fn set_nx_first_writer_wins() {
        let cache = MemoryCache::new();
        assert!(cache.set_nx("k", b"first", Duration::from_secs(60)).await.unwrap());
        assert!(!cache.set_nx("k", b"second", Duration::from_secs(60)).await.unwrap());
        assert_eq!(cache.get_bytes("k").await.unwrap(), Some(b"first".to_vec()));
    }

    #[tokio::test]
    async fn set_nx_succeeds_over_expired_entry() {
        let cache = MemoryCache::new();
        cache.set_bytes("k", b"old", Duration::from_millis(10)).await.unwrap();
        tokio::time::sleep(Duration::from_millis(30)).await;
        assert!(cache.set_nx("k", b"new", Duration::from_secs(60)).await.unwrap());
    }

    #[tokio::test]
    async fn sweep_reclaims_only_expired_entries() {
        let cache = MemoryCache::new();
        cache.set_bytes("stale", b"v", Duration::from_millis(10)).await.unwrap();
        cache.set_bytes("fresh", b"v", Duration::from_secs(60)).await.unwrap();
        tokio::time::sleep(Duration::from_millis(30)).await;

        assert_eq!(cache.sweep(), 1);
        assert_eq!(cache.len(), 1);
        assert!(cache.get_bytes("fresh").await.unwrap().is_some());
    }
}
