/*!
Upload coordinator: one logical flush from pending bytes to a stored object.

The coordinator owns the staging file. A flush appends the pending bytes to
it, reads the whole file back, wraps it for upload, PUTs it and removes the
staging file only once the store confirmed the write. Any failure leaves the
staging file as it was, and the next trigger retries with whatever has
accumulated by then; there is no separate retry loop.
*/

use bytes::Bytes;
use chrono::{DateTime, Local, TimeZone};
use sha2::{Digest, Sha256};
use std::time::Instant;
use tracing::{debug, info, warn};

use crate::compression::{self, CompressionAdapter};
use crate::config::SinkConfig;
use crate::observability::SinkMetrics;
use crate::stage::DiskStage;
use crate::store::{ObjectStoreClient, PutRequest, Visibility};
use crate::Result;

/// Build the object key for a batch flushed at `at`.
///
/// `<prefix>/<YYYY-MM-DD>/<YYYYMMDDhhmmss><suffix>`. Slashes around the prefix
/// are trimmed; an empty prefix yields `<YYYY-MM-DD>/<YYYYMMDDhhmmss><suffix>`.
/// Two flushes within the same second produce the same key.
pub fn destination_key<Tz>(prefix: &str, at: &DateTime<Tz>, suffix: &str) -> String
where
    Tz: TimeZone,
    Tz::Offset: std::fmt::Display,
{
    let date = at.format("%Y-%m-%d");
    let stamp = at.format("%Y%m%d%H%M%S");
    let prefix = prefix.trim_matches('/');
    if prefix.is_empty() {
        format!("{date}/{stamp}{suffix}")
    } else {
        format!("{prefix}/{date}/{stamp}{suffix}")
    }
}

/// Details of a confirmed upload
#[derive(Debug, Clone, PartialEq)]
pub struct FlushReport {
    pub key: String,
    /// Uncompressed batch size, as read from the staging file
    pub staged_bytes: usize,
    /// Size of the uploaded body
    pub uploaded_bytes: usize,
    pub content_type: String,
    /// SHA-256 of the uncompressed batch
    pub sha256: String,
}

/// Result of one flush attempt that did not fail
#[derive(Debug, Clone, PartialEq)]
pub enum FlushOutcome {
    /// Nothing was buffered or staged
    Empty,
    Uploaded(FlushReport),
}

/// Orchestrates stage → read → compress → put → clear
pub struct UploadCoordinator<C: ObjectStoreClient> {
    stage: DiskStage,
    compressor: Box<dyn CompressionAdapter>,
    client: C,
    prefix: String,
    visibility: Visibility,
    metrics: SinkMetrics,
    // Bytes whose staging append failed; prepended to the next append
    unstaged: Vec<u8>,
}

impl<C: ObjectStoreClient> UploadCoordinator<C> {
    pub fn new(config: &SinkConfig, client: C, metrics: SinkMetrics) -> Self {
        Self {
            stage: DiskStage::from_config(config),
            compressor: compression::adapter_for(config.compression, config.compression_level),
            client,
            prefix: config.prefix.clone(),
            visibility: config.visibility,
            metrics,
            unstaged: Vec::new(),
        }
    }

    pub fn stage(&self) -> &DiskStage {
        &self.stage
    }

    /// Bytes held in memory because their staging append failed
    pub fn unstaged_len(&self) -> usize {
        self.unstaged.len()
    }

    /// Report data left in the staging file by a previous process.
    ///
    /// Nothing is uploaded here; resumed bytes ship with the next flush.
    pub fn recover(&self) -> Result<u64> {
        let staged = self.stage.len()?;
        self.metrics.staged_bytes.set(staged as i64);
        if staged > 0 {
            info!(
                path = %self.stage.path().display(),
                staged_bytes = staged,
                "Resuming staged data from a previous run"
            );
        }
        Ok(staged)
    }

    /// Append drained bytes to the staging file.
    ///
    /// On failure the bytes are kept and retried in front of the next append,
    /// so a failed disk write never loses drained records.
    pub fn stage_bytes(&mut self, chunk: Bytes) -> Result<()> {
        let pending = if self.unstaged.is_empty() {
            chunk
        } else {
            self.unstaged.extend_from_slice(&chunk);
            Bytes::from(std::mem::take(&mut self.unstaged))
        };
        if pending.is_empty() {
            return Ok(());
        }

        let appended = self
            .stage
            .ensure_ready()
            .and_then(|_| self.stage.append(&pending));
        match appended {
            Ok(()) => {
                self.metrics.staged_bytes.add(pending.len() as i64);
                Ok(())
            }
            Err(e) => {
                self.metrics.staging_errors_total.inc();
                warn!(
                    path = %self.stage.path().display(),
                    held_bytes = pending.len(),
                    error = %e,
                    "Staging append failed, holding bytes for the next attempt"
                );
                self.unstaged = Vec::from(pending);
                Err(e)
            }
        }
    }

    /// Run one flush with the bytes just drained from memory.
    ///
    /// Returns [`FlushOutcome::Empty`] when memory and disk were both empty.
    /// On error the staging file is unchanged apart from the pending append.
    pub async fn flush(&mut self, pending: Bytes) -> Result<FlushOutcome> {
        match self.try_flush(pending).await {
            Ok(outcome) => Ok(outcome),
            Err(e) => {
                self.metrics.flush_failures_total.inc();
                Err(e)
            }
        }
    }

    async fn try_flush(&mut self, pending: Bytes) -> Result<FlushOutcome> {
        self.stage_bytes(pending)?;

        let batch = self.stage.read_all()?;
        if batch.is_empty() {
            self.metrics.empty_flushes_total.inc();
            debug!(path = %self.stage.path().display(), "Nothing staged, skipping flush");
            return Ok(FlushOutcome::Empty);
        }

        let staged_bytes = batch.len();
        let sha256 = format!("{:x}", Sha256::digest(&batch));
        let envelope = compression::wrap(self.compressor.as_ref(), batch)?;
        let key = destination_key(&self.prefix, &Local::now(), envelope.suffix);
        let uploaded_bytes = envelope.body.len();

        let request = PutRequest {
            key: key.clone(),
            body: envelope.body,
            content_type: envelope.content_type.to_string(),
            visibility: self.visibility,
        };

        let started = Instant::now();
        let result = self.client.put(request).await;
        self.metrics.record_upload_latency(started.elapsed());
        result?;

        if let Err(e) = self.stage.clear() {
            // Already uploaded; the leftover file is shipped again next time.
            self.metrics.staging_errors_total.inc();
            warn!(key = %key, error = %e, "Uploaded batch but could not remove staging file");
        } else {
            self.metrics.staged_bytes.set(0);
        }

        self.metrics.flushes_total.inc();
        self.metrics.uploaded_bytes_total.inc_by(staged_bytes as u64);
        info!(
            key = %key,
            staged_bytes = staged_bytes,
            uploaded_bytes = uploaded_bytes,
            compression = self.compressor.algorithm_name(),
            "Uploaded batch"
        );

        Ok(FlushOutcome::Uploaded(FlushReport {
            key,
            staged_bytes,
            uploaded_bytes,
            content_type: envelope.content_type.to_string(),
            sha256,
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::compression::GzipCompressor;
    use crate::store::{MemoryObjectStore, MockObjectStoreClient};
    use crate::SpoolError;
    use chrono::Utc;
    use tempfile::TempDir;

    fn config(dir: &TempDir) -> SinkConfig {
        SinkConfig::new("bucket", "logs/app").with_buffer_path(dir.path())
    }

    fn coordinator<C: ObjectStoreClient>(
        config: &SinkConfig,
        client: C,
    ) -> UploadCoordinator<C> {
        UploadCoordinator::new(config, client, SinkMetrics::new().unwrap())
    }

    #[test]
    fn test_destination_key_format() {
        let at = Utc.with_ymd_and_hms(2024, 5, 1, 9, 3, 7).unwrap();
        assert_eq!(
            destination_key("logs/app", &at, ""),
            "logs/app/2024-05-01/20240501090307"
        );
        assert_eq!(
            destination_key("/logs/app/", &at, ".gz"),
            "logs/app/2024-05-01/20240501090307.gz"
        );
        assert_eq!(destination_key("", &at, ""), "2024-05-01/20240501090307");
    }

    #[test]
    fn test_same_second_keys_collide() {
        let at = Utc.with_ymd_and_hms(2024, 5, 1, 9, 3, 7).unwrap();
        let later = at + chrono::Duration::milliseconds(400);
        assert_eq!(
            destination_key("p", &at, ""),
            destination_key("p", &later, "")
        );
    }

    #[tokio::test]
    async fn test_plain_upload_of_staged_batch() {
        let dir = TempDir::new().unwrap();
        let config = config(&dir);

        let mut client = MockObjectStoreClient::new();
        client
            .expect_put()
            .times(1)
            .withf(|request| {
                request.body.len() == 1500
                    && request.content_type == "text/plain"
                    && request.visibility == Visibility::PublicRead
                    && request.key.starts_with("logs/app/")
                    && !request.key.ends_with(".gz")
            })
            .returning(|_| Ok(()));

        let mut coordinator = coordinator(&config, client);
        coordinator.stage_bytes(Bytes::from(vec![b'a'; 1500])).unwrap();

        let outcome = coordinator.flush(Bytes::new()).await.unwrap();
        match outcome {
            FlushOutcome::Uploaded(report) => {
                assert_eq!(report.staged_bytes, 1500);
                assert_eq!(report.uploaded_bytes, 1500);
                assert_eq!(report.content_type, "text/plain");
                assert_eq!(report.sha256.len(), 64);
            }
            FlushOutcome::Empty => panic!("Expected an upload"),
        }
        assert!(!coordinator.stage().path().exists());
    }

    #[tokio::test]
    async fn test_failed_put_keeps_staging_file() {
        let dir = TempDir::new().unwrap();
        let config = config(&dir);

        let mut client = MockObjectStoreClient::new();
        client
            .expect_put()
            .times(1)
            .returning(|_| Err(SpoolError::upload("connection reset by peer")));

        let mut coordinator = coordinator(&config, client);
        coordinator.stage_bytes(Bytes::from(vec![b'x'; 1500])).unwrap();
        let before = coordinator.stage().read_all().unwrap();

        let result = coordinator.flush(Bytes::new()).await;
        assert!(matches!(result, Err(SpoolError::Upload(_))));
        assert_eq!(coordinator.stage().read_all().unwrap(), before);
        assert_eq!(coordinator.metrics.flush_failures_total.get(), 1);
    }

    #[tokio::test]
    async fn test_retry_after_failure_uploads_grown_batch() {
        let dir = TempDir::new().unwrap();
        let config = config(&dir);
        let store = MemoryObjectStore::new();
        let mut coordinator = coordinator(&config, store.clone());

        coordinator.stage_bytes(Bytes::from(vec![b'1'; 1500])).unwrap();
        store.fail_next(1);
        assert!(coordinator.flush(Bytes::new()).await.is_err());
        assert_eq!(coordinator.stage().len().unwrap(), 1500);

        coordinator.flush(Bytes::from(vec![b'2'; 200])).await.unwrap();

        let puts = store.puts();
        assert_eq!(puts.len(), 1);
        assert_eq!(puts[0].body.len(), 1700);
        assert_eq!(&puts[0].body[1500..], &[b'2'; 200][..]);
    }

    #[tokio::test]
    async fn test_empty_flush_is_noop() {
        let dir = TempDir::new().unwrap();
        let config = config(&dir);

        let mut client = MockObjectStoreClient::new();
        client.expect_put().never();

        let mut coordinator = coordinator(&config, client);
        let outcome = coordinator.flush(Bytes::new()).await.unwrap();
        assert_eq!(outcome, FlushOutcome::Empty);
        assert!(!coordinator.stage().path().exists());
        assert_eq!(coordinator.metrics.empty_flushes_total.get(), 1);
    }

    #[tokio::test]
    async fn test_compressed_upload_round_trips() {
        let dir = TempDir::new().unwrap();
        let config = config(&dir).with_compression(true);
        let store = MemoryObjectStore::new();
        let mut coordinator = coordinator(&config, store.clone());

        let records = b"{\"level\":\"info\",\"msg\":\"started\"}\n".repeat(40);
        coordinator.flush(Bytes::from(records.clone())).await.unwrap();

        let put = &store.puts()[0];
        assert_eq!(put.content_type, "multipart/x-gzip");
        assert!(put.key.ends_with(".gz"));
        let decompressed = GzipCompressor::new().decompress(&put.body).unwrap();
        assert_eq!(decompressed, records);
    }

    #[tokio::test]
    async fn test_staging_failure_holds_bytes_until_append_succeeds() {
        let dir = TempDir::new().unwrap();
        let blocker = dir.path().join("blocked");
        // A regular file where the staging directory should be makes appends fail.
        std::fs::write(&blocker, b"").unwrap();
        let config = SinkConfig::new("bucket", "p").with_buffer_path(&blocker);
        let store = MemoryObjectStore::new();
        let mut coordinator = coordinator(&config, store.clone());

        let result = coordinator.flush(Bytes::from_static(b"first ")).await;
        assert!(matches!(result, Err(SpoolError::Staging(_))));
        assert_eq!(coordinator.unstaged_len(), 6);
        assert_eq!(coordinator.metrics.staging_errors_total.get(), 1);

        std::fs::remove_file(&blocker).unwrap();
        coordinator.flush(Bytes::from_static(b"second")).await.unwrap();

        assert_eq!(coordinator.unstaged_len(), 0);
        assert_eq!(&store.puts()[0].body[..], b"first second");
    }

    #[test]
    fn test_recover_reports_previous_run() {
        let dir = TempDir::new().unwrap();
        let config = config(&dir);
        let previous = DiskStage::from_config(&config);
        previous.ensure_ready().unwrap();
        previous.append(&[0u8; 321]).unwrap();

        let coordinator = coordinator(&config, MemoryObjectStore::new());
        assert_eq!(coordinator.recover().unwrap(), 321);
        assert_eq!(coordinator.metrics.staged_bytes.get(), 321);
    }
}
