//! Per-provider circuit breakers.
//!
//! One breaker per backend keeps a failing provider from being hammered:
//! after `failure_threshold` consecutive failures the breaker opens and
//! rejects admissions until `open_timeout` has passed, then lets probe
//! traffic through (half-open) and closes again after
//! `success_threshold` successes.
//!
//! Two conforming implementations sit behind one trait: a lock-free local
//! breaker, and a Redis-backed variant whose transitions run as single
//! server-side scripts so that many gateway instances share one view of a
//! provider's health.

mod local;
#[cfg(feature = "redis")]
mod redis;

pub use local::LocalBreaker;
#[cfg(feature = "redis")]
pub use redis::RedisBreaker;

use std::sync::Arc;

use async_trait::async_trait;
use serde::Serialize;
use thiserror::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CircuitState {
    /// Normal operation; failures are being counted.
    Closed,
    /// Tripped; admissions are rejected until the open timeout elapses.
    Open,
    /// Probing recovery; admits, but any failure reopens.
    HalfOpen,
}

impl CircuitState {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Closed => "closed",
            Self::Open => "open",
            Self::HalfOpen => "half_open",
        }
    }
}

#[derive(Debug, Error)]
pub enum BreakerError {
    #[error("circuit open for provider '{provider}', retry in {retry_after_secs}s")]
    Open {
        provider: Arc<str>,
        retry_after_secs: u64,
    },
}

/// Breaker contract.
///
/// `admit` both gates traffic and performs the Open → HalfOpen transition
/// when the open timeout has elapsed. Success/failure recording is a
/// separate call made after the backend call resolves.
#[async_trait]
pub trait CircuitBreaker: Send + Sync {
    async fn admit(&self) -> Result<(), BreakerError>;
    async fn record_success(&self);
    async fn record_failure(&self);
    async fn state(&self) -> CircuitState;
}

/// Provider-id → breaker, built once at startup.
pub struct BreakerRegistry {
    breakers: Vec<(String, Arc<dyn CircuitBreaker>)>,
}

impl BreakerRegistry {
    pub fn new(breakers: Vec<(String, Arc<dyn CircuitBreaker>)>) -> Self {
        Self { breakers }
    }

    pub fn get(&self, provider_id: &str) -> Option<Arc<dyn CircuitBreaker>> {
        self.breakers
            .iter()
            .find(|(id, _)| id == provider_id)
            .map(|(_, b)| Arc::clone(b))
    }

    pub async fn states(&self) -> Vec<(String, CircuitState)> {
        let mut states = Vec::with_capacity(self.breakers.len());
        for (id, breaker) in &self.breakers {
            states.push((id.clone(), breaker.state().await));
        }
        states
    }
}
