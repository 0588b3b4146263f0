//! Append-only usage accounting.
//!
//! One record per served request; aggregation is a sum over records with
//! `created_at` at or after the start of the UTC calendar month. Records
//! are never mutated, and a failed append never fails the request that
//! produced it.

mod memory;
#[cfg(feature = "postgres")]
mod postgres;

pub use memory::MemoryLedger;
#[cfg(feature = "postgres")]
pub use postgres::PostgresLedger;

use async_trait::async_trait;
use chrono::{DateTime, Datelike, TimeZone, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

#[derive(Debug, Error)]
pub enum LedgerError {
    #[error("ledger unavailable: {0}")]
    Unavailable(String),
}

pub type LedgerResult<T> = Result<T, LedgerError>;

/// One request's cost accounting.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UsageRecord {
    pub tenant_id: Uuid,
    pub request_id: String,
    pub model: String,
    pub provider: String,
    pub input_tokens: i64,
    pub output_tokens: i64,
    pub cost_microcents: i64,
    pub created_at: DateTime<Utc>,
}

#[async_trait]
pub trait UsageLedger: Send + Sync {
    /// Append one record. Appending the same request id twice is a no-op
    /// for durable backends.
    async fn record(&self, record: UsageRecord) -> LedgerResult<()>;

    /// Sum of `cost_microcents` over records with `created_at >= since`.
    async fn aggregate(&self, tenant_id: Uuid, since: DateTime<Utc>) -> LedgerResult<i64>;

    /// Raw records for a tenant since the given instant, oldest first.
    async fn list(&self, tenant_id: Uuid, since: DateTime<Utc>) -> LedgerResult<Vec<UsageRecord>>;

    /// Number of records for a tenant since the given instant.
    async fn count(&self, tenant_id: Uuid, since: DateTime<Utc>) -> LedgerResult<i64>;
}

/// Midnight UTC on the first of the current month.
pub fn start_of_month(now: DateTime<Utc>) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(now.year(), now.month(), 1, 0, 0, 0)
        .single()
        .unwrap_or(now)
}
