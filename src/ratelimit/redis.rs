//! Shared rate limiter over a Redis sorted set.
//!
//! One sorted set per tenant holds the admission instants of the current
//! window. The whole admission — trim, count, conditional insert, expiry
//! refresh — is a single Lua script, so its effect is atomic with respect
//! to every other gateway instance hitting the same store.

use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use uuid::Uuid;

use super::{RateLimitDecision, RateLimitError, RateLimiter};

/// Returns `{allowed, count_after}`. The clock is the Redis server's
/// (`TIME`), so every instance trims against the same notion of "now".
const ADMIT_SCRIPT: &str = r#"
local key = KEYS[1]
local limit = tonumber(ARGV[1])
local window_ms = tonumber(ARGV[2])
local member = ARGV[3]

local t = redis.call('TIME')
local now_ms = t[1] * 1000 + math.floor(t[2] / 1000)

redis.call('ZREMRANGEBYSCORE', key, 0, now_ms - window_ms)

local count = redis.call('ZCARD', key)
if count >= limit then
    return {0, count}
end

redis.call('ZADD', key, now_ms, member)
redis.call('PEXPIRE', key, window_ms)
return {1, count + 1}
"#;

pub struct RedisRateLimiter {
    client: redis::Client,
    window: Duration,
    admit_script: redis::Script,
}

impl RedisRateLimiter {
    pub fn connect(url: &str, window: Duration) -> Result<Self, RateLimitError> {
        let client = redis::Client::open(url).map_err(|e| RateLimitError::Store(e.to_string()))?;
        Ok(Self {
            client,
            window,
            admit_script: redis::Script::new(ADMIT_SCRIPT),
        })
    }

    fn key(tenant_id: Uuid) -> String {
        format!("pl:ratelimit:{tenant_id}")
    }
}

#[async_trait]
impl RateLimiter for RedisRateLimiter {
    async fn admit(
        &self,
        tenant_id: Uuid,
        limit: u32,
    ) -> Result<RateLimitDecision, RateLimitError> {
        let window = chrono::Duration::from_std(self.window)
            .unwrap_or_else(|_| chrono::Duration::seconds(60));
        let reset_at = Utc::now() + window;

        // A zero limit never admits; skip the store round trip.
        if limit == 0 {
            return Ok(RateLimitDecision {
                allowed: false,
                limit,
                remaining: 0,
                reset_at,
            });
        }

        let mut conn = self
            .client
            .get_multiplexed_async_connection()
            .await
            .map_err(|e| RateLimitError::Store(e.to_string()))?;

        let (allowed, count): (i64, i64) = self
            .admit_script
            .key(Self::key(tenant_id))
            .arg(limit)
            .arg(self.window.as_millis() as u64)
            .arg(Uuid::new_v4().to_string())
            .invoke_async(&mut conn)
            .await
            .map_err(|e| RateLimitError::Store(e.to_string()))?;

        let remaining = i64::from(limit).saturating_sub(count).max(0) as u32;
        Ok(RateLimitDecision {
            allowed: allowed == 1,
            limit,
            remaining,
            reset_at,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn key_layout_is_per_tenant() {
        let id = Uuid::nil();
        assert_eq!(
            RedisRateLimiter::key(id),
            "pl:ratelimit:00000000-0000-0000-0000-000000000000"
        );
    }

    #[test]
    fn admit_script_denies_without_inserting() {
        // The script must read the cardinality before inserting, so a
        // denied admission leaves the window untouched.
        let insert_pos = ADMIT_SCRIPT.find("ZADD").expect("script inserts");
        let check_pos = ADMIT_SCRIPT.find("ZCARD").expect("script counts");
        assert!(check_pos < insert_pos);
        assert!(ADMIT_SCRIPT.contains("ZREMRANGEBYSCORE"));
        assert!(ADMIT_SCRIPT.contains("PEXPIRE"));
    }
}
