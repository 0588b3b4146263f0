//! Tenant directory: the authenticated principals to whom quota, budget
//! and usage are attributed.
//!
//! Credentials are stored only as a one-way SHA-256 hash indexed for
//! lookup; the plaintext never reaches storage. Tenants are created and
//! modified through the store interface only — the request path is
//! strictly read-only.

mod credential;
mod memory;
#[cfg(feature = "postgres")]
mod postgres;

use chrono::{DateTime, Utc};
pub use credential::{generate_credential, hash_credential, verify_credential, CREDENTIAL_PREFIX};
pub use memory::MemoryTenantStore;
#[cfg(feature = "postgres")]
pub use postgres::PostgresTenantStore;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("not found")]
    NotFound,

    #[error("already exists")]
    Conflict,

    #[error("store unavailable: {0}")]
    Unavailable(String),
}

pub type StoreResult<T> = Result<T, StoreError>;

/// An authenticated principal.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Tenant {
    pub id: Uuid,
    pub name: String,
    /// SHA-256 hex digest of the tenant's credential.
    pub key_hash: String,
    /// Requests admitted per one-minute window.
    pub rate_limit: u32,
    /// Monthly budget in microcents; 0 means unlimited.
    pub monthly_budget_microcents: i64,
    /// When present and non-empty, only these models may be requested.
    pub allowed_models: Option<Vec<String>>,
    pub preferred_provider: Option<String>,
    pub fallback_providers: Vec<String>,
    pub enabled: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Tenant {
    /// Whether this tenant may request the given model.
    pub fn allows_model(&self, model: &str) -> bool {
        match &self.allowed_models {
            Some(allowed) if !allowed.is_empty() => allowed.iter().any(|m| m == model),
            _ => true,
        }
    }
}

/// Fields accepted when creating a tenant.
#[derive(Debug, Clone)]
pub struct NewTenant {
    pub name: String,
    pub key_hash: String,
    pub rate_limit: u32,
    pub monthly_budget_microcents: i64,
    pub allowed_models: Option<Vec<String>>,
    pub preferred_provider: Option<String>,
    pub fallback_providers: Vec<String>,
}

/// Mutable fields of an existing tenant; `None` leaves a field unchanged.
#[derive(Debug, Clone, Default)]
pub struct TenantUpdate {
    pub name: Option<String>,
    pub rate_limit: Option<u32>,
    pub monthly_budget_microcents: Option<i64>,
    pub allowed_models: Option<Option<Vec<String>>>,
    pub preferred_provider: Option<Option<String>>,
    pub fallback_providers: Option<Vec<String>>,
    pub enabled: Option<bool>,
}

#[async_trait]
pub trait TenantStore: Send + Sync {
    /// Resolve a presented credential to an enabled tenant.
    ///
    /// The credential is hashed before lookup; `NotFound` covers unknown
    /// hashes and disabled tenants alike, and callers on the request path
    /// translate it to 401.
    async fn find_by_credential(&self, credential: &str) -> StoreResult<Tenant>;

    async fn get(&self, id: Uuid) -> StoreResult<Tenant>;

    async fn list(&self) -> StoreResult<Vec<Tenant>>;

    async fn create(&self, tenant: NewTenant) -> StoreResult<Tenant>;

    async fn update(&self, id: Uuid, update: TenantUpdate) -> StoreResult<Tenant>;

    async fn delete(&self, id: Uuid) -> StoreResult<()>;
}

pub(crate) fn apply_update(tenant: &mut Tenant, update: TenantUpdate) {
    if let Some(name) = update.name {
        tenant.name = name;
    }
    if let Some(rate_limit) = update.rate_limit {
        tenant.rate_limit = rate_limit;
    }
    if let Some(budget) = update.monthly_budget_microcents {
        tenant.monthly_budget_microcents = budget;
    }
    if let Some(allowed) = update.allowed_models {
        tenant.allowed_models = allowed;
    }
    if let Some(preferred) = update.preferred_provider {
        tenant.preferred_provider = preferred;
    }
    if let Some(fallbacks) = update.fallback_providers {
        tenant.fallback_providers = fallbacks;
    }
    if let Some(enabled) = update.enabled {
        tenant.enabled = enabled;
    }
    tenant.updated_at = Utc::now();
}

#[cfg(test)]
pub(crate) fn test_tenant(name: &str, credential: &str) -> NewTenant {
    NewTenant {
        name: name.to_string(),
        key_hash: hash_credential(credential),
        rate_limit: 100,
        monthly_budget_microcents: 0,
        allowed_models: None,
        preferred_provider: None,
        fallback_providers: Vec::new(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn allow_list_semantics() {
        let mut tenant = Tenant {
            id: Uuid::new_v4(),
            name: "t".into(),
            key_hash: String::new(),
            rate_limit: 10,
            monthly_budget_microcents: 0,
            allowed_models: None,
            preferred_provider: None,
            fallback_providers: vec![],
            enabled: true,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        };

        assert!(tenant.allows_model("gpt-4"));

        tenant.allowed_models = Some(vec![]);
        assert!(tenant.allows_model("gpt-4"), "empty list means no restriction");

        tenant.allowed_models = Some(vec!["gpt-4".into()]);
        assert!(tenant.allows_model("gpt-4"));
        assert!(!tenant.allows_model("claude-3-opus"));
    }
}
