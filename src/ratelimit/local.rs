//! Mutex-protected fixed-window limiter for single-instance deployments.

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use uuid::Uuid;

use super::{RateLimitDecision, RateLimitError, RateLimiter};

struct Window {
    reset_at: DateTime<Utc>,
    count: u32,
}

pub struct LocalRateLimiter {
    window: Duration,
    windows: Mutex<HashMap<Uuid, Window>>,
}

impl LocalRateLimiter {
    pub fn new(window: Duration) -> Self {
        Self {
            window,
            windows: Mutex::new(HashMap::new()),
        }
    }
}

#[async_trait]
impl RateLimiter for LocalRateLimiter {
    async fn admit(
        &self,
        tenant_id: Uuid,
        limit: u32,
    ) -> Result<RateLimitDecision, RateLimitError> {
        let now = Utc::now();
        let window =
            chrono::Duration::from_std(self.window).unwrap_or_else(|_| chrono::Duration::seconds(60));

        let mut windows = self.windows.lock();
        let entry = windows.entry(tenant_id).or_insert_with(|| Window {
            reset_at: now + window,
            count: 0,
        });

        // The window rotates lazily: the first admission at or past the
        // reset instant opens a fresh one anchored on that instant.
        if now >= entry.reset_at {
            entry.reset_at = now + window;
            entry.count = 0;
        }

        if limit == 0 || entry.count >= limit {
            return Ok(RateLimitDecision {
                allowed: false,
                limit,
                remaining: 0,
                reset_at: entry.reset_at,
            });
        }

        entry.count += 1;
        Ok(RateLimitDecision {
            allowed: true,
            limit,
            remaining: limit - entry.count,
            reset_at: entry.reset_at,
        })
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;

    fn limiter(window_ms: u64) -> LocalRateLimiter {
        LocalRateLimiter::new(Duration::from_millis(window_ms))
    }

    #[tokio::test]
    async fn admits_up_to_limit_then_denies() {
        let limiter = limiter(60_000);
        let tenant = Uuid::new_v4();

        for i in 0..3u32 {
            let decision = limiter.admit(tenant, 3).await.unwrap();
            assert!(decision.allowed);
            assert_eq!(decision.remaining, 3 - (i + 1));
        }

        let denied = limiter.admit(tenant, 3).await.unwrap();
        assert!(!denied.allowed);
        assert_eq!(denied.remaining, 0);

        // Denial must not consume quota: the counter stays at the limit.
        let denied_again = limiter.admit(tenant, 3).await.unwrap();
        assert!(!denied_again.allowed);
    }

    #[tokio::test]
    async fn zero_limit_denies_unconditionally() {
        let limiter = limiter(60_000);
        let decision = limiter.admit(Uuid::new_v4(), 0).await.unwrap();
        assert!(!decision.allowed);
        assert_eq!(decision.remaining, 0);
    }

    #[tokio::test]
    async fn window_rotates_after_expiry() {
        let limiter = limiter(20);
        let tenant = Uuid::new_v4();

        assert!(limiter.admit(tenant, 1).await.unwrap().allowed);
        assert!(!limiter.admit(tenant, 1).await.unwrap().allowed);

        tokio::time::sleep(Duration::from_millis(40)).await;
        let fresh = limiter.admit(tenant, 1).await.unwrap();
        assert!(fresh.allowed, "new window admits again");
    }

    #[tokio::test]
    async fn tenants_are_isolated() {
        let limiter = limiter(60_000);
        let a = Uuid::new_v4();
        let b = Uuid::new_v4();

        assert!(limiter.admit(a, 1).await.unwrap().allowed);
        assert!(!limiter.admit(a, 1).await.unwrap().allowed);
        assert!(limiter.admit(b, 1).await.unwrap().allowed);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 8)]
    async fn concurrent_burst_admits_exactly_the_limit() {
        let limiter = Arc::new(limiter(60_000));
        let tenant = Uuid::new_v4();
        let limit = 50u32;

        let mut handles = Vec::new();
        for _ in 0..200 {
            let limiter = Arc::clone(&limiter);
            handles.push(tokio::spawn(async move {
                limiter.admit(tenant, limit).await.unwrap().allowed
            }));
        }

        let mut admitted = 0;
        for handle in handles {
            if handle.await.unwrap() {
                admitted += 1;
            }
        }
        assert_eq!(admitted, limit);
    }
}
