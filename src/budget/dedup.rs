//! Alert deduplication.
//!
//! Guarantees at most one emission per (tenant, level) per window. The
//! local variant tracks the most recent level per tenant in-process; the
//! marker variant stores one create-if-absent key per (tenant, level) in
//! the shared cache, so the first gateway instance to create the marker
//! wins and every other instance suppresses.

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use uuid::Uuid;

use crate::cache::Cache;

use super::AlertLevel;

#[async_trait]
pub trait AlertDeduper: Send + Sync {
    /// Whether an alert of this level should be emitted for this tenant.
    /// A `true` return marks the pair as emitted.
    async fn should_alert(&self, tenant_id: Uuid, level: AlertLevel) -> bool;

    /// Forget every marker for a tenant, re-arming all levels.
    async fn clear(&self, tenant_id: Uuid);
}

/// In-process deduplication: remembers the most recent level per tenant
/// and suppresses only exact repeats.
#[derive(Default)]
pub struct LocalDeduper {
    last_level: Mutex<HashMap<Uuid, AlertLevel>>,
}

impl LocalDeduper {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl AlertDeduper for LocalDeduper {
    async fn should_alert(&self, tenant_id: Uuid, level: AlertLevel) -> bool {
        let mut last_level = self.last_level.lock();
        // The decision and the marker update share one critical section so
        // two racing callers cannot both see "unmarked".
        match last_level.insert(tenant_id, level) {
            Some(previous) => previous != level,
            None => true,
        }
    }

    async fn clear(&self, tenant_id: Uuid) {
        self.last_level.lock().remove(&tenant_id);
    }
}

/// Marker-based deduplication over a [`Cache`].
///
/// Backed by the shared store this coordinates across instances: the
/// create-if-absent write is atomic, so exactly one concurrent caller
/// observes `true`. Markers expire with the deduplication window. Store
/// errors fail open — a duplicate alert beats a missed one.
pub struct MarkerDeduper {
    cache: std::sync::Arc<dyn Cache>,
    window: Duration,
}

impl MarkerDeduper {
    pub fn new(cache: std::sync::Arc<dyn Cache>, window: Duration) -> Self {
        Self { cache, window }
    }

    fn key(tenant_id: Uuid, level: AlertLevel) -> String {
        format!("alert:{}:{}", tenant_id, level.as_str())
    }
}

#[async_trait]
impl AlertDeduper for MarkerDeduper {
    async fn should_alert(&self, tenant_id: Uuid, level: AlertLevel) -> bool {
        match self
            .cache
            .set_nx(&Self::key(tenant_id, level), b"1", self.window)
            .await
        {
            Ok(created) => created,
            Err(e) => {
                tracing::warn!(tenant_id = %tenant_id, error = %e, "alert dedup store failed, emitting anyway");
                true
            }
        }
    }

    async fn clear(&self, tenant_id: Uuid) {
        // The level set is closed, so clearing enumerates it instead of
        // scanning the store.
        for level in AlertLevel::ALL {
            if let Err(e) = self.cache.delete(&Self::key(tenant_id, level)).await {
                tracing::warn!(tenant_id = %tenant_id, error = %e, "failed to clear alert marker");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::cache::MemoryCache;

    #[tokio::test]
    async fn local_suppresses_repeats_of_same_level() {
        let dedup = LocalDeduper::new();
        let tenant = Uuid::new_v4();

        assert!(dedup.should_alert(tenant, AlertLevel::Warning).await);
        assert!(!dedup.should_alert(tenant, AlertLevel::Warning).await);
        // A different level is a different alert.
        assert!(dedup.should_alert(tenant, AlertLevel::Critical).await);
        assert!(!dedup.should_alert(tenant, AlertLevel::Critical).await);
    }

    #[tokio::test]
    async fn local_clear_re_arms() {
        let dedup = LocalDeduper::new();
        let tenant = Uuid::new_v4();

        assert!(dedup.should_alert(tenant, AlertLevel::Warning).await);
        dedup.clear(tenant).await;
        assert!(dedup.should_alert(tenant, AlertLevel::Warning).await);
    }

    #[tokio::test]
    async fn marker_first_emitter_wins() {
        let dedup = MarkerDeduper::new(Arc::new(MemoryCache::new()), Duration::from_secs(3600));
        let tenant = Uuid::new_v4();

        assert!(dedup.should_alert(tenant, AlertLevel::Warning).await);
        assert!(!dedup.should_alert(tenant, AlertLevel::Warning).await);
        assert!(dedup.should_alert(tenant, AlertLevel::Exceeded).await);
    }

    #[tokio::test]
    async fn marker_expires_with_window() {
        let dedup = MarkerDeduper::new(Arc::new(MemoryCache::new()), Duration::from_millis(10));
        let tenant = Uuid::new_v4();

        assert!(dedup.should_alert(tenant, AlertLevel::Warning).await);
        tokio::time::sleep(Duration::from_millis(30)).await;
        assert!(dedup.should_alert(tenant, AlertLevel::Warning).await);
    }

    #[tokio::test]
    async fn marker_clear_removes_every_level() {
        let dedup = MarkerDeduper::new(Arc::new(MemoryCache::new()), Duration::from_secs(3600));
        let tenant = Uuid::new_v4();

        for level in AlertLevel::ALL {
            assert!(dedup.should_alert(tenant, level).await);
        }
        dedup.clear(tenant).await;
        for level in AlertLevel::ALL {
            assert!(dedup.should_alert(tenant, level).await);
        }
    }

    #[tokio::test]
    async fn concurrent_markers_emit_exactly_once() {
        let dedup = Arc::new(MarkerDeduper::new(
            Arc::new(MemoryCache::new()),
            Duration::from_secs(3600),
        ));
        let tenant = Uuid::new_v4();

        let mut handles = Vec::new();
        for _ in 0..32 {
            let dedup = Arc::clone(&dedup);
            handles.push(tokio::spawn(async move {
                dedup.should_alert(tenant, AlertLevel::Critical).await
            }));
        }

        let mut emitted = 0;
        for handle in handles {
            if handle.await.unwrap() {
                emitted += 1;
            }
        }
        assert_eq!(emitted, 1);
    }
}
