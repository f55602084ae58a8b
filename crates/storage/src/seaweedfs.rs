//! SeaweedFS backend.
//!
//! Upload: `GET {master}/dir/assign` returns a file id and a volume server,
//! then the file is posted as multipart to `http://{url}/{fid}`.
//! Download: `GET {volume_url}/{fid}`.

use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use pipeline_core::{Error, Result};
use reqwest::multipart::{Form, Part};
use reqwest::Client;
use serde::Deserialize;
use tracing::debug;

use crate::config::FileStorageConfig;
use crate::FileStore;

#[derive(Debug, Deserialize)]
pub(crate) struct AssignResponse {
    #[serde(default)]
    pub fid: String,
    #[serde(default)]
    pub url: String,
    #[serde(default, rename = "publicUrl")]
    pub public_url: String,
    #[serde(default)]
    pub error: Option<String>,
}

impl AssignResponse {
    /// Volume server address for the upload, with a scheme.
    pub(crate) fn upload_url(&self) -> Result<String> {
        if let Some(error) = self.error.as_deref().filter(|e| !e.is_empty()) {
            return Err(Error::file_storage(format!("assign failed: {error}")));
        }
        if self.fid.is_empty() || self.url.is_empty() {
            return Err(Error::file_storage("Fallo al obtener la clave de SeaweedFS Master."));
        }
        let host = self.url.trim_end_matches('/');
        if host.starts_with("http://") || host.starts_with("https://") {
            Ok(format!("{host}/{}", self.fid))
        } else {
            Ok(format!("http://{host}/{}", self.fid))
        }
    }
}

/// HTTP client for a SeaweedFS master and volume server.
#[derive(Debug, Clone)]
pub struct SeaweedFsStore {
    client: Client,
    master_url: String,
    volume_url: String,
}

impl SeaweedFsStore {
    pub fn new(config: &FileStorageConfig) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| Error::file_storage(format!("build http client: {e}")))?;

        Ok(Self {
            client,
            master_url: config.master_url.trim_end_matches('/').to_string(),
            volume_url: config.volume_url.trim_end_matches('/').to_string(),
        })
    }

    async fn assign(&self) -> Result<AssignResponse> {
        self.client
            .get(format!("{}/dir/assign", self.master_url))
            .send()
            .await
            .and_then(|r| r.error_for_status())
            .map_err(|e| Error::file_storage(format!("assign: {e}")))?
            .json::<AssignResponse>()
            .await
            .map_err(|e| Error::file_storage(format!("assign response: {e}")))
    }
}

#[async_trait]
impl FileStore for SeaweedFsStore {
    async fn store(&self, file_name: &str, content: Bytes) -> Result<String> {
        let assigned = self.assign().await?;
        let upload_url = assigned.upload_url()?;
        let size = content.len();

        let part = Part::bytes(content.to_vec()).file_name(file_name.to_string());
        let form = Form::new().part("file", part);

        self.client
            .post(&upload_url)
            .multipart(form)
            .send()
            .await
            .and_then(|r| r.error_for_status())
            .map_err(|e| Error::file_storage(format!("upload to {upload_url}: {e}")))?;

        debug!(
            fid = %assigned.fid,
            public_url = %assigned.public_url,
            bytes = size,
            "File stored in SeaweedFS"
        );
        Ok(assigned.fid)
    }

    async fn retrieve(&self, file_key: &str) -> Result<Bytes> {
        let url = format!("{}/{}", self.volume_url, file_key);
        self.client
            .get(&url)
            .send()
            .await
            .and_then(|r| r.error_for_status())
            .map_err(|e| Error::file_storage(format!("download {file_key}: {e}")))?
            .bytes()
            .await
            .map_err(|e| Error::file_storage(format!("read {file_key}: {e}")))
    }
}
