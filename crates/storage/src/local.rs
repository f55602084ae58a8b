//! Local directory backend.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use bytes::Bytes;
use pipeline_core::{Error, Result};
use tracing::debug;
use uuid::Uuid;

use crate::FileStore;

/// Stores files as `<root>/<uuid>.<ext>`; the key is the file name.
#[derive(Debug, Clone)]
pub struct LocalFileStore {
    root: PathBuf,
}

impl LocalFileStore {
    pub fn new(root: impl AsRef<Path>) -> Self {
        Self {
            root: root.as_ref().to_path_buf(),
        }
    }

    fn path_for(&self, file_key: &str) -> Result<PathBuf> {
        let valid = !file_key.is_empty()
            && !file_key.contains(['/', '\\'])
            && file_key != "."
            && file_key != "..";
        if !valid {
            return Err(Error::file_storage(format!("invalid file key '{file_key}'")));
        }
        Ok(self.root.join(file_key))
    }
}

/// New key for an upload, keeping the original extension.
pub fn generate_key(file_name: &str) -> String {
    let extension = Path::new(file_name)
        .extension()
        .and_then(|ext| ext.to_str())
        .filter(|ext| ext.chars().all(|c| c.is_ascii_alphanumeric()))
        .map(|ext| ext.to_ascii_lowercase());

    match extension {
        Some(ext) => format!("{}.{}", Uuid::new_v4(), ext),
        None => Uuid::new_v4().to_string(),
    }
}

#[async_trait]
impl FileStore for LocalFileStore {
    async fn store(&self, file_name: &str, content: Bytes) -> Result<String> {
        tokio::fs::create_dir_all(&self.root)
            .await
            .map_err(|e| Error::file_storage(format!("create {}: {e}", self.root.display())))?;

        let key = generate_key(file_name);
        let path = self.path_for(&key)?;
        tokio::fs::write(&path, &content)
            .await
            .map_err(|e| Error::file_storage(format!("write {}: {e}", path.display())))?;

        debug!(file_key = %key, bytes = content.len(), "File stored locally");
        Ok(key)
    }

    async fn retrieve(&self, file_key: &str) -> Result<Bytes> {
        let path = self.path_for(file_key)?;
        let content = tokio::fs::read(&path).await.map_err(|e| {
            Error::file_storage(format!(
                "No se encontró el archivo con clave {file_key} en {}: {e}",
                self.root.display()
            ))
        })?;
        Ok(Bytes::from(content))
    }
}
