//! Postgres-backed usage ledger.
//!
//! The table is keyed by request id (so replayed appends are no-ops) with
//! a secondary index on `(tenant_id, created_at)` for the monthly
//! aggregation path.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{PgPool, Row};
use uuid::Uuid;

use super::{LedgerError, LedgerResult, UsageLedger, UsageRecord};

pub struct PostgresLedger {
    pool: PgPool,
}

impl PostgresLedger {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub async fn ensure_schema(&self) -> LedgerResult<()> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS usage_records (
                request_id TEXT PRIMARY KEY,
                tenant_id UUID NOT NULL,
                model TEXT NOT NULL,
                provider TEXT NOT NULL,
                input_tokens BIGINT NOT NULL,
                output_tokens BIGINT NOT NULL,
                cost_microcents BIGINT NOT NULL,
                created_at TIMESTAMPTZ NOT NULL
            )
            "#,
        )
        .execute(&self.pool)
        .await
        .map_err(to_ledger_error)?;

        sqlx::query(
            "CREATE INDEX IF NOT EXISTS usage_records_tenant_created_idx \
             ON usage_records (tenant_id, created_at)",
        )
        .execute(&self.pool)
        .await
        .map_err(to_ledger_error)?;

        Ok(())
    }
}

fn to_ledger_error(err: sqlx::Error) -> LedgerError {
    LedgerError::Unavailable(err.to_string())
}

#[async_trait]
impl UsageLedger for PostgresLedger {
    async fn record(&self, record: UsageRecord) -> LedgerResult<()> {
        sqlx::query(
            r#"
            INSERT INTO usage_records
                (request_id, tenant_id, model, provider,
                 input_tokens, output_tokens, cost_microcents, created_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
            ON CONFLICT (request_id) DO NOTHING
            "#,
        )
        .bind(&record.request_id)
        .bind(record.tenant_id)
        .bind(&record.model)
        .bind(&record.provider)
        .bind(record.input_tokens)
        .bind(record.output_tokens)
        .bind(record.cost_microcents)
        .bind(record.created_at)
        .execute(&self.pool)
        .await
        .map_err(to_ledger_error)?;
        Ok(())
    }

    async fn aggregate(&self, tenant_id: Uuid, since: DateTime<Utc>) -> LedgerResult<i64> {
        let row = sqlx::query(
            "SELECT COALESCE(SUM(cost_microcents), 0)::BIGINT AS total \
             FROM usage_records WHERE tenant_id = $1 AND created_at >= $2",
        )
        .bind(tenant_id)
        .bind(since)
        .fetch_one(&self.pool)
        .await
        .map_err(to_ledger_error)?;
        Ok(row.get("total"))
    }

    async fn list(&self, tenant_id: Uuid, since: DateTime<Utc>) -> LedgerResult<Vec<UsageRecord>> {
        let rows = sqlx::query(
            "SELECT request_id, tenant_id, model, provider, \
                    input_tokens, output_tokens, cost_microcents, created_at \
             FROM usage_records \
             WHERE tenant_id = $1 AND created_at >= $2 \
             ORDER BY created_at",
        )
        .bind(tenant_id)
        .bind(since)
        .fetch_all(&self.pool)
        .await
        .map_err(to_ledger_error)?;

        Ok(rows
            .into_iter()
            .map(|row| UsageRecord {
                request_id: row.get("request_id"),
                tenant_id: row.get("tenant_id"),
                model: row.get("model"),
                provider: row.get("provider"),
                input_tokens: row.get("input_tokens"),
                output_tokens: row.get("output_tokens"),
                cost_microcents: row.get("cost_microcents"),
                created_at: row.get("created_at"),
            })
            .collect())
    }

    async fn count(&self, tenant_id: Uuid, since: DateTime<Utc>) -> LedgerResult<i64> {
        let row = sqlx::query(
            "SELECT COUNT(*)::BIGINT AS total \
             FROM usage_records WHERE tenant_id = $1 AND created_at >= $2",
        )
        .bind(tenant_id)
        .bind(since)
        .fetch_one(&self.pool)
        .await
        .map_err(to_ledger_error)?;
        Ok(row.get("total"))
    }
}
