//! Configuration for a Spool sink
//!
//! A sink is identified by its destination (bucket + key prefix). The same
//! destination always maps to the same staging file under `buffer_path`, so a
//! restarted process with an unchanged configuration resumes where the
//! previous one stopped.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

use crate::store::Visibility;
use crate::{Result, SpoolError};

/// Configuration structure for one sink destination
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SinkConfig {
    /// Bucket (or container) receiving the uploaded batches
    pub bucket: String,
    /// Key prefix; objects land under `<prefix>/<date>/<timestamp>`
    #[serde(default)]
    pub prefix: String,
    /// Region for the object store client (optional, defaults to environment)
    #[serde(default)]
    pub region: Option<String>,
    /// Gzip batches before upload
    #[serde(default)]
    pub compression: bool,
    /// Gzip level, 0-9
    #[serde(default = "default_compression_level")]
    pub compression_level: u32,
    /// Directory holding the staging file
    #[serde(default = "default_buffer_path")]
    pub buffer_path: PathBuf,
    /// In-memory byte count above which records are drained to disk
    #[serde(default = "default_chunk_size")]
    pub chunk_size: usize,
    /// Seconds between timer-driven flushes
    #[serde(default = "default_flush_interval_secs")]
    pub flush_interval_secs: u64,
    /// Depth of the command queue between the event loop and the upload worker
    #[serde(default = "default_queue_depth")]
    pub queue_depth: usize,
    /// Hard cap on in-memory bytes; records beyond it are dropped and counted
    #[serde(default = "default_max_buffered_bytes")]
    pub max_buffered_bytes: usize,
    /// Visibility applied to uploaded objects
    #[serde(default)]
    pub visibility: Visibility,
    /// How long shutdown waits for the final flush
    #[serde(default = "default_shutdown_timeout_secs")]
    pub shutdown_timeout_secs: u64,
}

fn default_compression_level() -> u32 {
    6
}

fn default_buffer_path() -> PathBuf {
    PathBuf::from("./spool-buffer")
}

fn default_chunk_size() -> usize {
    1024 * 1024
}

fn default_flush_interval_secs() -> u64 {
    60
}

fn default_queue_depth() -> usize {
    16
}

fn default_max_buffered_bytes() -> usize {
    64 * 1024 * 1024
}

fn default_shutdown_timeout_secs() -> u64 {
    30
}

impl SinkConfig {
    /// Create a configuration for the given bucket and prefix with defaults
    pub fn new(bucket: impl Into<String>, prefix: impl Into<String>) -> Self {
        SinkConfig {
            bucket: bucket.into(),
            prefix: prefix.into(),
            region: None,
            compression: false,
            compression_level: default_compression_level(),
            buffer_path: default_buffer_path(),
            chunk_size: default_chunk_size(),
            flush_interval_secs: default_flush_interval_secs(),
            queue_depth: default_queue_depth(),
            max_buffered_bytes: default_max_buffered_bytes(),
            visibility: Visibility::default(),
            shutdown_timeout_secs: default_shutdown_timeout_secs(),
        }
    }

    /// Parse a destination URI of the form `s3://bucket/prefix/path`
    ///
    /// The prefix may be empty (`s3://bucket`).
    pub fn from_uri(uri: &str) -> Result<SinkConfig> {
        let rest = uri.strip_prefix("s3://").ok_or_else(|| {
            SpoolError::config(format!("Unsupported destination URI '{uri}': expected s3://"))
        })?;

        let (bucket, prefix) = match rest.split_once('/') {
            Some((bucket, prefix)) => (bucket, prefix.trim_end_matches('/')),
            None => (rest, ""),
        };
        if bucket.is_empty() {
            return Err(SpoolError::config("Invalid S3 URI: missing bucket name"));
        }

        Ok(SinkConfig::new(bucket, prefix))
    }

    /// Load a configuration serialized as JSON
    pub fn from_json(json: &str) -> Result<SinkConfig> {
        let config: SinkConfig = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    /// Builder-style setter for the staging directory
    pub fn with_buffer_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.buffer_path = path.into();
        self
    }

    /// Builder-style setter for the in-memory chunk limit.
    ///
    /// Raises `max_buffered_bytes` to twice the chunk when it would not leave
    /// room for one waiting chunk plus the one filling up.
    pub fn with_chunk_size(mut self, chunk_size: usize) -> Self {
        self.chunk_size = chunk_size;
        if self.max_buffered_bytes <= chunk_size {
            self.max_buffered_bytes = chunk_size.saturating_mul(2);
        }
        self
    }

    /// Builder-style setter for compression
    pub fn with_compression(mut self, enabled: bool) -> Self {
        self.compression = enabled;
        self
    }

    pub fn flush_interval(&self) -> Duration {
        Duration::from_secs(self.flush_interval_secs)
    }

    pub fn shutdown_timeout(&self) -> Duration {
        Duration::from_secs(self.shutdown_timeout_secs)
    }

    /// Path of the staging file for this destination.
    ///
    /// `<buffer_path>/<bucket><prefix with "/" replaced by "_">`
    pub fn staging_file_path(&self) -> PathBuf {
        self.buffer_path
            .join(format!("{}{}", self.bucket, self.prefix.replace('/', "_")))
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<()> {
        if self.bucket.trim().is_empty() {
            return Err(SpoolError::config("A bucket name is required"));
        }
        if self.flush_interval_secs == 0 {
            return Err(SpoolError::config(
                "Flush interval must be greater than zero",
            ));
        }
        if self.chunk_size == 0 {
            return Err(SpoolError::config("Chunk size must be greater than zero"));
        }
        if self.queue_depth == 0 {
            return Err(SpoolError::config("Queue depth must be greater than zero"));
        }
        if self.compression_level > 9 {
            return Err(SpoolError::config(format!(
                "Compression level {} is out of range (0-9)",
                self.compression_level
            )));
        }
        if self.max_buffered_bytes <= self.chunk_size {
            return Err(SpoolError::config(
                "max_buffered_bytes must be greater than chunk_size",
            ));
        }
        Ok(())
    }
}
