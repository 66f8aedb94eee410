/*!
Local filesystem object store.
*/

use async_trait::async_trait;
use std::path::{Path, PathBuf};
use tracing::debug;

use super::{ObjectStoreClient, PutRequest};
use crate::{Result, SpoolError};

/// Object store that writes each upload as a file under a root directory
///
/// Keys map to relative paths (`<root>/<prefix>/<date>/<timestamp>`), so the
/// layout mirrors what the same sink would produce in a bucket. Visibility has
/// no meaning here and is ignored.
///
/// # Example
/// ```rust
/// use spool_core::store::LocalObjectStore;
///
/// let store = LocalObjectStore::new("/var/spool/objects");
/// assert!(store.root().ends_with("objects"));
/// ```
#[derive(Debug, Clone)]
pub struct LocalObjectStore {
    root: PathBuf,
}

impl LocalObjectStore {
    pub fn new<P: AsRef<Path>>(root: P) -> Self {
        Self {
            root: root.as_ref().to_path_buf(),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Resolve the file path of an object key
    pub fn object_path(&self, key: &str) -> PathBuf {
        self.root.join(key.trim_start_matches('/'))
    }
}

#[async_trait]
impl ObjectStoreClient for LocalObjectStore {
    async fn put(&self, request: PutRequest) -> Result<()> {
        let path = self.object_path(&request.key);

        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await.map_err(|e| {
                SpoolError::upload(format!(
                    "Failed to create directory {}: {}",
                    parent.display(),
                    e
                ))
            })?;
        }

        tokio::fs::write(&path, &request.body).await.map_err(|e| {
            SpoolError::upload(format!("Failed to write object {}: {}", path.display(), e))
        })?;

        debug!(
            path = %path.display(),
            size = request.body.len(),
            content_type = %request.content_type,
            "Wrote object to local store"
        );
        Ok(())
    }
}
