//! Per-tenant request rate limiting.
//!
//! One contract, two conforming backends: an in-process fixed-window map
//! for single-instance deployments, and a Redis sorted-set variant whose
//! admission runs as a single server-side script so concurrent gateways
//! never admit past the limit together.

mod local;
#[cfg(feature = "redis")]
mod redis;

pub use local::LocalRateLimiter;
#[cfg(feature = "redis")]
pub use redis::RedisRateLimiter;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use thiserror::Error;
use uuid::Uuid;

#[derive(Debug, Error)]
pub enum RateLimitError {
    #[error("rate limit store unavailable: {0}")]
    Store(String),
}

/// Outcome of one admission attempt.
#[derive(Debug, Clone)]
pub struct RateLimitDecision {
    pub allowed: bool,
    pub limit: u32,
    /// Admissions left in the window after this decision; never negative.
    pub remaining: u32,
    /// When the current window rolls over.
    pub reset_at: DateTime<Utc>,
}

/// Admission contract. A denied admission never consumes quota.
#[async_trait]
pub trait RateLimiter: Send + Sync {
    async fn admit(&self, tenant_id: Uuid, limit: u32) -> Result<RateLimitDecision, RateLimitError>;
}
