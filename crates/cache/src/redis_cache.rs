//! Redis backend.

use std::time::Duration;

use async_trait::async_trait;
use pipeline_core::{Error, Result};
use redis::aio::ConnectionManager;
use redis::AsyncCommands;
use tracing::{debug, info};

use crate::config::CacheConfig;
use crate::HistoryCache;

/// Redis cache over a reconnecting connection manager.
#[derive(Clone)]
pub struct RedisCache {
    connection: ConnectionManager,
    key_prefix: String,
}

impl RedisCache {
    pub async fn connect(config: &CacheConfig) -> Result<Self> {
        let client = redis::Client::open(config.url.as_str())
            .map_err(|e| Error::cache(format!("invalid redis url: {e}")))?;
        let connection = ConnectionManager::new(client)
            .await
            .map_err(|e| Error::cache(format!("connect: {e}")))?;

        info!("Connected to cache");
        Ok(Self {
            connection,
            key_prefix: config.key_prefix.clone(),
        })
    }

    fn key(&self, key: &str) -> String {
        format!("{}{}", self.key_prefix, key)
    }
}

#[async_trait]
impl HistoryCache for RedisCache {
    async fn get(&self, key: &str) -> Result<Option<String>> {
        let mut conn = self.connection.clone();
        conn.get(self.key(key))
            .await
            .map_err(|e| Error::cache(format!("get {key}: {e}")))
    }

    async fn set(&self, key: &str, value: String, ttl: Duration) -> Result<()> {
        let mut conn = self.connection.clone();
        conn.set_ex::<_, _, ()>(self.key(key), value, ttl.as_secs().max(1))
            .await
            .map_err(|e| Error::cache(format!("set {key}: {e}")))
    }

    async fn invalidate(&self, key: &str) -> Result<()> {
        let mut conn = self.connection.clone();
        let removed: i64 = conn
            .del(self.key(key))
            .await
            .map_err(|e| Error::cache(format!("del {key}: {e}")))?;
        debug!(key = %key, removed, "Cache entry invalidated");
        Ok(())
    }
}
