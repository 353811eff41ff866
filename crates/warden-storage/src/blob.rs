//! Filesystem-backed blob store for rule documents.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use tracing::debug;

use crate::error::{StorageError, StorageResult};
use crate::traits::BlobStore;

const DOCUMENT_EXTENSIONS: &[&str] = &["yaml", "yml"];

/// Serves every `.yaml`/`.yml` file under a directory as a blob.
///
/// Keys are paths relative to the root, with `/` separators.
#[derive(Debug, Clone)]
pub struct FsBlobStore {
    root: PathBuf,
}

impl FsBlobStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    async fn collect(&self, dir: PathBuf, keys: &mut Vec<String>) -> StorageResult<()> {
        let mut pending = vec![dir];
        while let Some(dir) = pending.pop() {
            let mut entries = tokio::fs::read_dir(&dir)
                .await
                .map_err(|e| blob_error(&dir.display().to_string(), e))?;
            while let Some(entry) = entries
                .next_entry()
                .await
                .map_err(|e| blob_error(&dir.display().to_string(), e))?
            {
                let path = entry.path();
                let file_type = entry
                    .file_type()
                    .await
                    .map_err(|e| blob_error(&path.display().to_string(), e))?;
                if file_type.is_dir() {
                    pending.push(path);
                } else if is_document(&path) {
                    if let Ok(relative) = path.strip_prefix(&self.root) {
                        let key: Vec<String> = relative
                            .components()
                            .map(|c| c.as_os_str().to_string_lossy().into_owned())
                            .collect();
                        keys.push(key.join("/"));
                    }
                }
            }
        }
        Ok(())
    }
}

fn is_document(path: &Path) -> bool {
    path.extension()
        .and_then(|ext| ext.to_str())
        .is_some_and(|ext| DOCUMENT_EXTENSIONS.contains(&ext))
}

fn blob_error(key: &str, err: std::io::Error) -> StorageError {
    StorageError::BlobError {
        key: key.to_string(),
        message: err.to_string(),
    }
}

#[async_trait]
impl BlobStore for FsBlobStore {
    async fn list(&self) -> StorageResult<Vec<String>> {
        let mut keys = Vec::new();
        self.collect(self.root.clone(), &mut keys).await?;
        keys.sort();
        debug!(root = %self.root.display(), count = keys.len(), "listed rule documents");
        Ok(keys)
    }

    async fn read(&self, key: &str) -> StorageResult<Vec<u8>> {
        if key.split('/').any(|segment| segment == "..") {
            return Err(StorageError::InvalidInput {
                message: format!("blob key '{key}' escapes the store root"),
            });
        }
        tokio::fs::read(self.root.join(key)).await.map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                StorageError::not_found("blob", key)
            } else {
                blob_error(key, e)
            }
        })
    }
}
