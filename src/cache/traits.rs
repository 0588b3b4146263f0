use std::time::Duration;

use async_trait::async_trait;

use super::error::{CacheError, CacheResult};

/// Byte-level cache contract shared by the in-memory and Redis backends.
///
/// Holders of the trait never branch on which backend is in use; the
/// choice is made once at startup from configuration.
#[async_trait]
pub trait Cache: Send + Sync {
    /// Get raw bytes. Expired entries read as `None`.
    async fn get_bytes(&self, key: &str) -> CacheResult<Option<Vec<u8>>>;

    /// Set raw bytes with a TTL. A zero TTL stores without expiry.
    async fn set_bytes(&self, key: &str, value: &[u8], ttl: Duration) -> CacheResult<()>;

    /// Set only if the key is absent (atomic create-if-absent).
    /// Returns true when the value was written.
    async fn set_nx(&self, key: &str, value: &[u8], ttl: Duration) -> CacheResult<bool>;

    /// Delete a key. Deleting a missing key is not an error.
    async fn delete(&self, key: &str) -> CacheResult<()>;
}

/// JSON convenience layer over [`Cache`].
pub trait CacheExt: Cache {
    async fn get_json<T: serde::de::DeserializeOwned>(&self, key: &str) -> CacheResult<Option<T>> {
        match self.get_bytes(key).await? {
            Some(bytes) => {
                let value = serde_json::from_slice(&bytes)
                    .map_err(|e| CacheError::Deserialization(e.to_string()))?;
                Ok(Some(value))
            }
            None => Ok(None),
        }
    }

    async fn set_json<T: serde::Serialize>(
        &self,
        key: &str,
        value: &T,
        ttl: Duration,
    ) -> CacheResult<()> {
        let bytes =
            serde_json::to_vec(value).map_err(|e| CacheError::Serialization(e.to_string()))?;
        self.set_bytes(key, &bytes, ttl).await
    }
}

impl<T: Cache + ?Sized> CacheExt for T {}
