/*!
Durable on-disk staging for records that have not been uploaded yet.
*/

use bytes::Bytes;
use std::fs::{self, File, OpenOptions};
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};
use tracing::debug;

use crate::config::SinkConfig;
use crate::{Result, SpoolError};

/// Append-only staging file for one destination.
///
/// The file is raw concatenated record bytes, never compressed. It only grows
/// between [`append`](DiskStage::append) calls and shrinks only through
/// [`clear`](DiskStage::clear), which is called after a confirmed upload.
///
/// # Example
/// ```rust
/// use spool_core::DiskStage;
///
/// let dir = std::env::temp_dir().join("spool-doc-stage");
/// let stage = DiskStage::for_destination(&dir, "logs", "app/web");
/// assert!(stage.path().ends_with("logs_app_web"));
/// ```
#[derive(Debug, Clone)]
pub struct DiskStage {
    path: PathBuf,
}

impl DiskStage {
    /// Stage at an explicit file path
    pub fn new<P: AsRef<Path>>(path: P) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
        }
    }

    /// Stage for a (bucket, prefix) destination under `buffer_path`
    pub fn for_destination<P: AsRef<Path>>(buffer_path: P, bucket: &str, prefix: &str) -> Self {
        Self::new(
            buffer_path
                .as_ref()
                .join(format!("{}{}", bucket, prefix.replace('/', "_"))),
        )
    }

    pub fn from_config(config: &SinkConfig) -> Self {
        Self::new(config.staging_file_path())
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Create the staging directory and file if they do not exist yet
    pub fn ensure_ready(&self) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() && !parent.exists() {
                fs::create_dir_all(parent).map_err(|e| {
                    SpoolError::staging(format!(
                        "Failed to create staging directory {}: {}",
                        parent.display(),
                        e
                    ))
                })?;
            }
        }
        self.open_append().map(|_| ())
    }

    /// Append bytes and sync them to disk
    pub fn append(&self, data: &[u8]) -> Result<()> {
        if data.is_empty() {
            return Ok(());
        }
        let mut file = self.open_append()?;
        file.write_all(data).map_err(|e| {
            SpoolError::staging(format!(
                "Failed to append {} bytes to {}: {}",
                data.len(),
                self.path.display(),
                e
            ))
        })?;
        file.sync_data().map_err(|e| {
            SpoolError::staging(format!("Failed to sync {}: {}", self.path.display(), e))
        })?;

        debug!(path = %self.path.display(), size = data.len(), "Appended to staging file");
        Ok(())
    }

    /// Read the whole staging file; a missing file reads as empty
    pub fn read_all(&self) -> Result<Bytes> {
        match fs::read(&self.path) {
            Ok(data) => Ok(Bytes::from(data)),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(Bytes::new()),
            Err(e) => Err(SpoolError::staging(format!(
                "Failed to read staging file {}: {}",
                self.path.display(),
                e
            ))),
        }
    }

    /// Remove the staging file; a missing file is not an error
    pub fn clear(&self) -> Result<()> {
        match fs::remove_file(&self.path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
            Err(e) => Err(SpoolError::staging(format!(
                "Failed to remove staging file {}: {}",
                self.path.display(),
                e
            ))),
        }
    }

    /// Current staged size in bytes
    pub fn len(&self) -> Result<u64> {
        match fs::metadata(&self.path) {
            Ok(meta) => Ok(meta.len()),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(0),
            Err(e) => Err(SpoolError::staging(format!(
                "Failed to stat staging file {}: {}",
                self.path.display(),
                e
            ))),
        }
    }

    pub fn is_empty(&self) -> Result<bool> {
        Ok(self.len()? == 0)
    }

    fn open_append(&self) -> Result<File> {
        OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .map_err(|e| {
                SpoolError::staging(format!(
                    "Failed to open staging file {}: {}",
                    self.path.display(),
                    e
                ))
            })
    }
}
