mod error;
mod fingerprint;
mod memory;
#[cfg(feature = "redis")]
mod redis;
mod response_cache;
mod traits;

pub use error::{CacheError, CacheResult};
pub use fingerprint::request_fingerprint;
pub use memory::MemoryCache;
#[cfg(feature = "redis")]
pub use redis::RedisCache;
pub use response_cache::{CacheLookup, ResponseCache};
pub use traits::{Cache, CacheExt};
