//! File storage configuration.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StorageBackend {
    #[serde(alias = "seaweed")]
    SeaweedFs,
    Local,
}

/// File storage configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FileStorageConfig {
    #[serde(default = "default_backend")]
    pub backend: StorageBackend,
    /// SeaweedFS master, used to assign file ids
    #[serde(default = "default_master_url")]
    pub master_url: String,
    /// SeaweedFS volume server, used to download by file id
    #[serde(default = "default_volume_url")]
    pub volume_url: String,
    /// Root directory of the local backend
    #[serde(default = "default_local_root")]
    pub local_root: String,
    /// HTTP timeout in seconds
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

fn default_backend() -> StorageBackend {
    StorageBackend::SeaweedFs
}

fn default_master_url() -> String {
    "http://localhost:9333".to_string()
}

fn default_volume_url() -> String {
    "http://localhost:8080".to_string()
}

fn default_local_root() -> String {
    "./uploads".to_string()
}

fn default_timeout_secs() -> u64 {
    30
}

impl Default for FileStorageConfig {
    fn default() -> Self {
        Self {
            backend: default_backend(),
            master_url: default_master_url(),
            volume_url: default_volume_url(),
            local_root: default_local_root(),
            timeout_secs: default_timeout_secs(),
        }
    }
}
