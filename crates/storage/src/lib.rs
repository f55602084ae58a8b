//! File storage collaborator.
//!
//! Files are stored once by the gateway and retrieved by the processing
//! worker through an opaque key.

pub mod config;
pub mod local;
pub mod seaweedfs;

use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use pipeline_core::Result;

pub use config::*;
pub use local::LocalFileStore;
pub use seaweedfs::SeaweedFsStore;

/// Store and retrieve uploaded files by opaque key.
#[async_trait]
pub trait FileStore: Send + Sync {
    /// Store a file and return its key.
    async fn store(&self, file_name: &str, content: Bytes) -> Result<String>;

    /// Retrieve the full content stored under `file_key`.
    async fn retrieve(&self, file_key: &str) -> Result<Bytes>;
}

/// Build the configured backend.
pub fn build_file_store(config: &FileStorageConfig) -> Result<Arc<dyn FileStore>> {
    Ok(match config.backend {
        StorageBackend::SeaweedFs => Arc::new(SeaweedFsStore::new(config)?),
        StorageBackend::Local => Arc::new(LocalFileStore::new(&config.local_root)),
    })
}
