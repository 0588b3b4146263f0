//! In-memory tenant directory.
//!
//! Suitable for a single instance or tests; multi-instance deployments use
//! the Postgres-backed store so every gateway sees one directory.

use async_trait::async_trait;
use chrono::Utc;
use dashmap::DashMap;
use uuid::Uuid;

use super::{
    apply_update, hash_credential, NewTenant, StoreError, StoreResult, Tenant, TenantStore,
    TenantUpdate,
};

#[derive(Default)]
pub struct MemoryTenantStore {
    tenants: DashMap<Uuid, Tenant>,
    /// key_hash → tenant id, kept in lockstep with `tenants`.
    by_hash: DashMap<String, Uuid>,
}

impl MemoryTenantStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl TenantStore for MemoryTenantStore {
    async fn find_by_credential(&self, credential: &str) -> StoreResult<Tenant> {
        let hash = hash_credential(credential);
        let id = *self.by_hash.get(&hash).ok_or(StoreError::NotFound)?;
        let tenant = self.tenants.get(&id).ok_or(StoreError::NotFound)?;
        if !tenant.enabled {
            return Err(StoreError::NotFound);
        }
        Ok(tenant.clone())
    }

    async fn get(&self, id: Uuid) -> StoreResult<Tenant> {
        self.tenants
            .get(&id)
            .map(|t| t.clone())
            .ok_or(StoreError::NotFound)
    }

    async fn list(&self) -> StoreResult<Vec<Tenant>> {
        let mut tenants: Vec<Tenant> = self.tenants.iter().map(|t| t.clone()).collect();
        tenants.sort_by_key(|t| t.created_at);
        Ok(tenants)
    }

    async fn create(&self, new: NewTenant) -> StoreResult<Tenant> {
        if self.by_hash.contains_key(&new.key_hash) {
            return Err(StoreError::Conflict);
        }

        let now = Utc::now();
        let tenant = Tenant {
            id: Uuid::new_v4(),
            name: new.name,
            key_hash: new.key_hash,
            rate_limit: new.rate_limit,
            monthly_budget_microcents: new.monthly_budget_microcents,
            allowed_models: new.allowed_models,
            preferred_provider: new.preferred_provider,
            fallback_providers: new.fallback_providers,
            enabled: true,
            created_at: now,
            updated_at: now,
        };

        self.by_hash.insert(tenant.key_hash.clone(), tenant.id);
        self.tenants.insert(tenant.id, tenant.clone());
        Ok(tenant)
    }

    async fn update(&self, id: Uuid, update: TenantUpdate) -> StoreResult<Tenant> {
        let mut entry = self.tenants.get_mut(&id).ok_or(StoreError::NotFound)?;
        apply_update(&mut entry, update);
        Ok(entry.clone())
    }

    async fn delete(&self, id: Uuid) -> StoreResult<()> {
        let (_, tenant) = self.tenants.remove(&id).ok_or(StoreError::NotFound)?;
        self.by_hash.remove(&tenant.key_hash);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tenants::test_tenant;

    #[tokio::test]
    async fn credential_lookup_round_trip() {
        let store = MemoryTenantStore::new();
        let created = store.create(test_tenant("acme", "pl_live_abc")).await.unwrap();

        let found = store.find_by_credential("pl_live_abc").await.unwrap();
        assert_eq!(found.id, created.id);

        assert!(matches!(
            store.find_by_credential("pl_live_other").await,
            Err(StoreError::NotFound)
        ));
    }

    #[tokio::test]
    async fn disabled_tenant_does_not_resolve() {
        let store = MemoryTenantStore::new();
        let created = store.create(test_tenant("acme", "pl_live_abc")).await.unwrap();

        store
            .update(
                created.id,
                TenantUpdate {
                    enabled: Some(false),
                    ..Default::default()
                },
            )
            .await
            .unwrap();

        assert!(matches!(
            store.find_by_credential("pl_live_abc").await,
            Err(StoreError::NotFound)
        ));
        // Direct lookup by id still works for administration.
        assert!(store.get(created.id).await.is_ok());
    }

    #[tokio::test]
    async fn duplicate_credential_conflicts() {
        let store = MemoryTenantStore::new();
        store.create(test_tenant("a", "pl_live_abc")).await.unwrap();
        assert!(matches!(
            store.create(test_tenant("b", "pl_live_abc")).await,
            Err(StoreError::Conflict)
        ));
    }

    #[tokio::test]
    async fn delete_removes_credential_index() {
        let store = MemoryTenantStore::new();
        let created = store.create(test_tenant("acme", "pl_live_abc")).await.unwrap();
        store.delete(created.id).await.unwrap();
        assert!(matches!(
            store.find_by_credential("pl_live_abc").await,
            Err(StoreError::NotFound)
        ));
    }
}
