//! Shared circuit breaker over Redis.
//!
//! Four keys per provider (`state`, `failures`, `successes`,
//! `last_failure_ms`) and one Lua script per operation, so a transition is
//! never observed half-applied by another instance. Time comparisons use
//! the Redis server clock (`TIME`): all instances age an open circuit
//! against the same clock, and gateway/store skew only shifts the
//! open-timeout horizon.
//!
//! A store outage must not wedge traffic: every operation fails open —
//! `admit` answers ok, records are dropped with a warning.

use std::sync::Arc;

use async_trait::async_trait;

use crate::config::CircuitBreakerConfig;

use super::{BreakerError, CircuitBreaker, CircuitState};

/// KEYS: state, last_failure_ms, successes. ARGV: open_timeout_ms.
/// Returns `{admitted, retry_after_ms}`.
const ADMIT_SCRIPT: &str = r#"
local state = redis.call('GET', KEYS[1]) or 'closed'
if state ~= 'open' then
    return {1, 0}
end

local last = tonumber(redis.call('GET', KEYS[2]) or '0')
local timeout_ms = tonumber(ARGV[1])
local t = redis.call('TIME')
local now_ms = t[1] * 1000 + math.floor(t[2] / 1000)

if now_ms >= last + timeout_ms then
    redis.call('SET', KEYS[1], 'half_open')
    redis.call('SET', KEYS[3], '0')
    return {1, 0}
end
return {0, last + timeout_ms - now_ms}
"#;

/// KEYS: state, failures, successes. ARGV: success_threshold.
const SUCCESS_SCRIPT: &str = r#"
local state = redis.call('GET', KEYS[1]) or 'closed'
if state == 'closed' then
    redis.call('SET', KEYS[2], '0')
    return 'closed'
end
if state == 'half_open' then
    local successes = redis.call('INCR', KEYS[3])
    if successes >= tonumber(ARGV[1]) then
        redis.call('SET', KEYS[1], 'closed')
        redis.call('SET', KEYS[2], '0')
        redis.call('SET', KEYS[3], '0')
        return 'closed'
    end
    return 'half_open'
end
return state
"#;

/// KEYS: state, failures, successes, last_failure_ms.
/// ARGV: failure_threshold.
const FAILURE_SCRIPT: &str = r#"
local t = redis.call('TIME')
local now_ms = t[1] * 1000 + math.floor(t[2] / 1000)
redis.call('SET', KEYS[4], now_ms)

local state = redis.call('GET', KEYS[1]) or 'closed'
if state == 'half_open' then
    redis.call('SET', KEYS[1], 'open')
    redis.call('SET', KEYS[2], '0')
    redis.call('SET', KEYS[3], '0')
    return 'open'
end
if state == 'closed' then
    local failures = redis.call('INCR', KEYS[2])
    if failures >= tonumber(ARGV[1]) then
        redis.call('SET', KEYS[1], 'open')
        redis.call('SET', KEYS[2], '0')
        return 'open'
    end
    return 'closed'
end
return 'open'
"#;

pub struct RedisBreaker {
    provider: Arc<str>,
    client: redis::Client,
    config: CircuitBreakerConfig,
    admit_script: redis::Script,
    success_script: redis::Script,
    failure_script: redis::Script,
}

impl RedisBreaker {
    pub fn new(
        provider: impl Into<Arc<str>>,
        client: redis::Client,
        config: CircuitBreakerConfig,
    ) -> Self {
        Self {
            provider: provider.into(),
            client,
            config,
            admit_script: redis::Script::new(ADMIT_SCRIPT),
            success_script: redis::Script::new(SUCCESS_SCRIPT),
            failure_script: redis::Script::new(FAILURE_SCRIPT),
        }
    }

    fn key(&self, field: &str) -> String {
        format!("pl:breaker:{}:{}", self.provider, field)
    }

    async fn connection(&self) -> Result<redis::aio::MultiplexedConnection, redis::RedisError> {
        self.client.get_multiplexed_async_connection().await
    }
}

#[async_trait]
impl CircuitBreaker for RedisBreaker {
    async fn admit(&self) -> Result<(), BreakerError> {
        let mut conn = match self.connection().await {
            Ok(conn) => conn,
            Err(e) => {
                tracing::warn!(provider = %self.provider, error = %e, "breaker store unavailable, failing open");
                return Ok(());
            }
        };

        let result: Result<(i64, i64), redis::RedisError> = self
            .admit_script
            .key(self.key("state"))
            .key(self.key("last_failure_ms"))
            .key(self.key("successes"))
            .arg(self.config.open_timeout.as_millis() as u64)
            .invoke_async(&mut conn)
            .await;

        match result {
            Ok((1, _)) => Ok(()),
            Ok((_, retry_after_ms)) => Err(BreakerError::Open {
                provider: Arc::clone(&self.provider),
                retry_after_secs: (retry_after_ms.max(0) as u64) / 1000,
            }),
            Err(e) => {
                tracing::warn!(provider = %self.provider, error = %e, "breaker admit script failed, failing open");
                Ok(())
            }
        }
    }

    async fn record_success(&self) {
        let Ok(mut conn) = self.connection().await else {
            tracing::warn!(provider = %self.provider, "breaker store unavailable, success not recorded");
            return;
        };

        let result: Result<String, redis::RedisError> = self
            .success_script
            .key(self.key("state"))
            .key(self.key("failures"))
            .key(self.key("successes"))
            .arg(self.config.success_threshold)
            .invoke_async(&mut conn)
            .await;

        match result {
            Ok(state) if state == "closed" => {}
            Ok(state) => {
                tracing::debug!(provider = %self.provider, state, "breaker probe success recorded")
            }
            Err(e) => {
                tracing::warn!(provider = %self.provider, error = %e, "breaker success script failed")
            }
        }
    }

    async fn record_failure(&self) {
        let Ok(mut conn) = self.connection().await else {
            tracing::warn!(provider = %self.provider, "breaker store unavailable, failure not recorded");
            return;
        };

        let result: Result<String, redis::RedisError> = self
            .failure_script
            .key(self.key("state"))
            .key(self.key("failures"))
            .key(self.key("successes"))
            .key(self.key("last_failure_ms"))
            .arg(self.config.failure_threshold)
            .invoke_async(&mut conn)
            .await;

        match result {
            Ok(state) if state == "open" => {
                tracing::warn!(provider = %self.provider, "circuit breaker opened");
            }
            Ok(_) => {}
            Err(e) => {
                tracing::warn!(provider = %self.provider, error = %e, "breaker failure script failed")
            }
        }
    }

    async fn state(&self) -> CircuitState {
        let Ok(mut conn) = self.connection().await else {
            return CircuitState::Closed;
        };

        let state: Option<String> = redis::cmd("GET")
            .arg(self.key("state"))
            .query_async(&mut conn)
            .await
            .unwrap_or(None);

        match state.as_deref() {
            Some("open") => CircuitState::Open,
            Some("half_open") => CircuitState::HalfOpen,
            _ => CircuitState::Closed,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn key_layout_is_per_provider() {
        let client = redis::Client::open("redis://127.0.0.1/").unwrap();
        let breaker = RedisBreaker::new("openai", client, CircuitBreakerConfig::default());
        assert_eq!(breaker.key("state"), "pl:breaker:openai:state");
        assert_eq!(breaker.key("failures"), "pl:breaker:openai:failures");
    }

    #[test]
    fn scripts_cover_every_transition() {
        // Closed → Open and HalfOpen → Open happen on failure.
        assert!(FAILURE_SCRIPT.contains("'open'"));
        // Open → HalfOpen happens on admit after the timeout.
        assert!(ADMIT_SCRIPT.contains("half_open"));
        // HalfOpen → Closed happens on enough successes.
        assert!(SUCCESS_SCRIPT.contains("'closed'"));
        // All time comparisons use the store's clock.
        assert!(ADMIT_SCRIPT.contains("TIME"));
        assert!(FAILURE_SCRIPT.contains("TIME"));
    }
}
