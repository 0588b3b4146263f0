//! Postgres-backed tenant directory.

use async_trait::async_trait;
use chrono::Utc;
use sqlx::{PgPool, Row, postgres::PgRow};
use uuid::Uuid;

use super::{NewTenant, StoreError, StoreResult, Tenant, TenantStore, TenantUpdate};

pub struct PostgresTenantStore {
    pool: PgPool,
}

impl PostgresTenantStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Create the tenants table and its credential index if missing.
    pub async fn ensure_schema(&self) -> StoreResult<()> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS tenants (
                id UUID PRIMARY KEY,
                name TEXT NOT NULL,
                key_hash TEXT NOT NULL UNIQUE,
                rate_limit BIGINT NOT NULL,
                monthly_budget_microcents BIGINT NOT NULL,
                allowed_models TEXT[],
                preferred_provider TEXT,
                fallback_providers TEXT[] NOT NULL DEFAULT '{}',
                enabled BOOLEAN NOT NULL DEFAULT TRUE,
                created_at TIMESTAMPTZ NOT NULL,
                updated_at TIMESTAMPTZ NOT NULL
            )
            "#,
        )
        .execute(&self.pool)
        .await
        .map_err(to_store_error)?;

        sqlx::query("CREATE INDEX IF NOT EXISTS tenants_key_hash_idx ON tenants (key_hash)")
            .execute(&self.pool)
            .await
            .map_err(to_store_error)?;

        Ok(())
    }
}

fn to_store_error(err: sqlx::Error) -> StoreError {
    match err {
        sqlx::Error::RowNotFound => StoreError::NotFound,
        sqlx::Error::Database(db) if db.is_unique_violation() => StoreError::Conflict,
        other => StoreError::Unavailable(other.to_string()),
    }
}

fn tenant_from_row(row: &PgRow) -> Tenant {
    Tenant {
        id: row.get("id"),
        name: row.get("name"),
        key_hash: row.get("key_hash"),
        rate_limit: row.get::<i64, _>("rate_limit") as u32,
        monthly_budget_microcents: row.get("monthly_budget_microcents"),
        allowed_models: row.get("allowed_models"),
        preferred_provider: row.get("preferred_provider"),
        fallback_providers: row.get("fallback_providers"),
        enabled: row.get("enabled"),
        created_at: row.get("created_at"),
        updated_at: row.get("updated_at"),
    }
}

const TENANT_COLUMNS: &str = "id, name, key_hash, rate_limit, monthly_budget_microcents, \
     allowed_models, preferred_provider, fallback_providers, enabled, created_at, updated_at";

#[async_trait]
impl TenantStore for PostgresTenantStore {
    async fn find_by_credential(&self, credential: &str) -> StoreResult<Tenant> {
        let hash = super::hash_credential(credential);
        let query = format!(
            "SELECT {TENANT_COLUMNS} FROM tenants WHERE key_hash = $1 AND enabled = TRUE"
        );
        let row = sqlx::query(&query)
            .bind(hash)
            .fetch_optional(&self.pool)
            .await
            .map_err(to_store_error)?
            .ok_or(StoreError::NotFound)?;
        Ok(tenant_from_row(&row))
    }

    async fn get(&self, id: Uuid) -> StoreResult<Tenant> {
        let query = format!("SELECT {TENANT_COLUMNS} FROM tenants WHERE id = $1");
        let row = sqlx::query(&query)
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .map_err(to_store_error)?
            .ok_or(StoreError::NotFound)?;
        Ok(tenant_from_row(&row))
    }

    async fn list(&self) -> StoreResult<Vec<Tenant>> {
        let query = format!("SELECT {TENANT_COLUMNS} FROM tenants ORDER BY created_at");
        let rows = sqlx::query(&query)
            .fetch_all(&self.pool)
            .await
            .map_err(to_store_error)?;
        Ok(rows.iter().map(tenant_from_row).collect())
    }

    async fn create(&self, new: NewTenant) -> StoreResult<Tenant> {
        let now = Utc::now();
        let id = Uuid::new_v4();
        let query = format!(
            r#"
            INSERT INTO tenants
                (id, name, key_hash, rate_limit, monthly_budget_microcents,
                 allowed_models, preferred_provider, fallback_providers,
                 enabled, created_at, updated_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, TRUE, $9, $9)
            RETURNING {TENANT_COLUMNS}
            "#
        );
        let row = sqlx::query(&query)
            .bind(id)
            .bind(&new.name)
            .bind(&new.key_hash)
            .bind(new.rate_limit as i64)
            .bind(new.monthly_budget_microcents)
            .bind(&new.allowed_models)
            .bind(&new.preferred_provider)
            .bind(&new.fallback_providers)
            .bind(now)
            .fetch_one(&self.pool)
            .await
            .map_err(to_store_error)?;
        Ok(tenant_from_row(&row))
    }

    async fn update(&self, id: Uuid, update: TenantUpdate) -> StoreResult<Tenant> {
        // Read-modify-write keeps the partial-update logic in one place;
        // the directory is administration-path only, so contention is nil.
        let mut tenant = self.get(id).await?;
        super::apply_update(&mut tenant, update);

        let query = format!(
            r#"
            UPDATE tenants SET
                name = $2,
                rate_limit = $3,
                monthly_budget_microcents = $4,
                allowed_models = $5,
                preferred_provider = $6,
                fallback_providers = $7,
                enabled = $8,
                updated_at = $9
            WHERE id = $1
            RETURNING {TENANT_COLUMNS}
            "#
        );
        let row = sqlx::query(&query)
            .bind(id)
            .bind(&tenant.name)
            .bind(tenant.rate_limit as i64)
            .bind(tenant.monthly_budget_microcents)
            .bind(&tenant.allowed_models)
            .bind(&tenant.preferred_provider)
            .bind(&tenant.fallback_providers)
            .bind(tenant.enabled)
            .bind(tenant.updated_at)
            .fetch_optional(&self.pool)
            .await
            .map_err(to_store_error)?
            .ok_or(StoreError::NotFound)?;
        Ok(tenant_from_row(&row))
    }

    async fn delete(&self, id: Uuid) -> StoreResult<()> {
        let result = sqlx::query("DELETE FROM tenants WHERE id = $1")
            .bind(id)
            .execute(&self.pool)
            .await
            .map_err(to_store_error)?;
        if result.rows_affected() == 0 {
            return Err(StoreError::NotFound);
        }
        Ok(())
    }
}
