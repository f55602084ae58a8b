//! In-process backend for single-process deployments and tests.

use std::time::Duration;

use async_trait::async_trait;
use moka::future::Cache;
use pipeline_core::Result;

use crate::HistoryCache;

const MAX_CAPACITY: u64 = 1_000;

/// Moka cache with a fixed time-to-live for every entry.
#[derive(Clone)]
pub struct MokaCache {
    inner: Cache<String, String>,
}

impl MokaCache {
    pub fn new(ttl: Duration) -> Self {
        Self {
            inner: Cache::builder()
                .max_capacity(MAX_CAPACITY)
                .time_to_live(ttl)
                .build(),
        }
    }
}

#[async_trait]
impl HistoryCache for MokaCache {
    async fn get(&self, key: &str) -> Result<Option<String>> {
        Ok(self.inner.get(key).await)
    }

    async fn set(&self, key: &str, value: String, _ttl: Duration) -> Result<()> {
        self.inner.insert(key.to_string(), value).await;
        Ok(())
    }

    async fn invalidate(&self, key: &str) -> Result<()> {
        self.inner.invalidate(key).await;
        Ok(())
    }
}
