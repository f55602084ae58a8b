//! Cache configuration.

use std::time::Duration;

use pipeline_core::limits::HISTORY_CACHE_TTL_SECS;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CacheBackend {
    Redis,
    Memory,
}

/// Cache configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheConfig {
    #[serde(default = "default_backend")]
    pub backend: CacheBackend,
    /// Redis URL
    #[serde(default = "default_url")]
    pub url: String,
    /// Prefix applied to every key
    #[serde(default)]
    pub key_prefix: String,
    /// Lifetime of the cached history
    #[serde(default = "default_history_ttl_secs")]
    pub history_ttl_secs: u64,
}

fn default_backend() -> CacheBackend {
    CacheBackend::Redis
}

fn default_url() -> String {
    "redis://localhost:6379".to_string()
}

fn default_history_ttl_secs() -> u64 {
    HISTORY_CACHE_TTL_SECS
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            backend: default_backend(),
            url: default_url(),
            key_prefix: String::new(),
            history_ttl_secs: default_history_ttl_secs(),
        }
    }
}

impl CacheConfig {
    pub fn history_ttl(&self) -> Duration {
        Duration::from_secs(self.history_ttl_secs)
    }
}
