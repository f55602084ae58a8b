//! Cache collaborator for the job history read model.
//!
//! Writers only invalidate; the gateway's history query reads through it.

pub mod config;
pub mod memory;
pub mod redis_cache;

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use pipeline_core::Result;

pub use config::*;
pub use memory::MokaCache;
pub use redis_cache::RedisCache;

#[async_trait]
pub trait HistoryCache: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<String>>;

    async fn set(&self, key: &str, value: String, ttl: Duration) -> Result<()>;

    /// Remove `key`. Removing a missing key succeeds.
    async fn invalidate(&self, key: &str) -> Result<()>;
}

/// Build the configured backend.
pub async fn build_cache(config: &CacheConfig) -> Result<Arc<dyn HistoryCache>> {
    Ok(match config.backend {
        CacheBackend::Redis => Arc::new(RedisCache::connect(config).await?),
        CacheBackend::Memory => Arc::new(MokaCache::new(config.history_ttl())),
    })
}
