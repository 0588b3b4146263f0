//! Response caching for chat completions.
//!
//! Cache failures never fail a request: read errors degrade to a miss,
//! write errors to a warning log. Duplicate concurrent fills for the same
//! key are permitted; entries are only written for deterministic requests,
//! so concurrent fills are semantically equal.

use std::{sync::Arc, time::Duration};

use crate::api_types::{ChatRequest, ChatResponse};

use super::{fingerprint::request_fingerprint, traits::{Cache, CacheExt}};

/// Outcome of a cache lookup.
#[derive(Debug)]
pub enum CacheLookup {
    Hit(ChatResponse),
    Miss,
}

pub struct ResponseCache {
    cache: Arc<dyn Cache>,
    ttl: Duration,
}

impl ResponseCache {
    pub fn new(cache: Arc<dyn Cache>, ttl: Duration) -> Self {
        Self { cache, ttl }
    }

    /// Look up a previously cached response for this request.
    pub async fn lookup(&self, request: &ChatRequest) -> CacheLookup {
        let Some(key) = request_fingerprint(request) else {
            return CacheLookup::Miss;
        };

        match self.cache.get_json::<ChatResponse>(&key).await {
            Ok(Some(response)) => {
                tracing::debug!(cache_key = %key, "response cache hit");
                CacheLookup::Hit(response)
            }
            Ok(None) => CacheLookup::Miss,
            Err(e) => {
                tracing::warn!(cache_key = %key, error = %e, "response cache read failed, treating as miss");
                CacheLookup::Miss
            }
        }
    }

    /// Store a response under the request's fingerprint, best-effort.
    ///
    /// The stored copy carries no gateway annotation; each hit is
    /// re-annotated for the request it serves.
    pub async fn store(&self, request: &ChatRequest, response: &ChatResponse) {
        let Some(key) = request_fingerprint(request) else {
            return;
        };

        let mut cacheable = response.clone();
        cacheable.x_gateway = None;

        if let Err(e) = self.cache.set_json(&key, &cacheable, self.ttl).await {
            tracing::warn!(cache_key = %key, error = %e, "failed to cache response");
        } else {
            tracing::debug!(cache_key = %key, ttl_secs = self.ttl.as_secs(), "response cached");
        }
    }
}
