/*!
The sink: an ingestion event loop plus an upload worker.

The event loop owns the memory buffer and the flush scheduler. It multiplexes
the record source and the flush timer with `tokio::select!` and never awaits
upload I/O. Everything touching the staging file or the object store runs on
a worker task that owns the [`UploadCoordinator`], fed through a bounded
command queue. Commands are processed in order, so bytes reach the staging
file in arrival order.

When the queue is full the drained bytes go back into the memory buffer. While
they wait there, records that would take the buffer past `max_buffered_bytes`
are dropped. Both are counted in [`SinkMetrics`]. If the worker dies, `run`
stops with [`SpoolError::QueueClosed`].

Shutdown starts when the record source closes: the remaining buffer is sent as
a final flush and the worker gets `shutdown_timeout` to finish. An upload still
running after that is abandoned. Its batch stays in the staging file and ships
on the next start, but bytes held in worker memory after a staging failure are
lost.
*/

use async_trait::async_trait;
use bytes::Bytes;
use futures::{Stream, StreamExt};
use std::time::Instant;
use tokio::sync::mpsc::{self, error::TrySendError};
use tracing::{debug, error, info, warn};

use crate::buffer::MemoryBuffer;
use crate::config::SinkConfig;
use crate::coordinator::{FlushOutcome, UploadCoordinator};
use crate::observability::SinkMetrics;
use crate::scheduler::{FlushDecision, FlushScheduler, FlushTimer};
use crate::store::ObjectStoreClient;
use crate::{Result, SpoolError};

/// Ordered source of records; `None` means the source closed
#[async_trait]
pub trait RecordSource: Send {
    async fn next_record(&mut self) -> Option<Bytes>;
}

#[async_trait]
impl RecordSource for mpsc::Receiver<Bytes> {
    async fn next_record(&mut self) -> Option<Bytes> {
        self.recv().await
    }
}

/// Adapts any `Stream` of records into a [`RecordSource`]
pub struct StreamSource<S>(pub S);

#[async_trait]
impl<S> RecordSource for StreamSource<S>
where
    S: Stream<Item = Bytes> + Unpin + Send,
{
    async fn next_record(&mut self) -> Option<Bytes> {
        self.0.next().await
    }
}

/// Work handed from the event loop to the upload worker
#[derive(Debug)]
enum Command {
    /// Append drained bytes to the staging file
    Stage(Bytes),
    /// Append drained bytes, then upload everything staged
    Flush(Bytes),
}

impl Command {
    fn into_bytes(self) -> Bytes {
        match self {
            Command::Stage(bytes) | Command::Flush(bytes) => bytes,
        }
    }
}

/// Totals for one sink run
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SinkReport {
    pub records: u64,
    pub ingested_bytes: u64,
    pub dropped_records: u64,
    pub flushes: u64,
    pub failed_flushes: u64,
    pub coalesced_ticks: u64,
    pub uploaded_bytes: u64,
}

impl SinkReport {
    fn from_metrics(metrics: &SinkMetrics) -> Self {
        Self {
            records: metrics.records_total.get(),
            ingested_bytes: metrics.ingested_bytes_total.get(),
            dropped_records: metrics.dropped_records_total.get(),
            flushes: metrics.flushes_total.get(),
            failed_flushes: metrics.flush_failures_total.get(),
            coalesced_ticks: metrics.coalesced_ticks_total.get(),
            uploaded_bytes: metrics.uploaded_bytes_total.get(),
        }
    }
}

/// A durable batched upload sink for one destination
///
/// # Example
/// ```rust,no_run
/// use bytes::Bytes;
/// use spool_core::{IntervalTimer, MemoryObjectStore, SinkConfig, SpoolSink};
/// use tokio::sync::mpsc;
///
/// # async fn run() -> spool_core::Result<()> {
/// let config = SinkConfig::new("logs", "app/web").with_buffer_path("/var/spool");
/// let timer = IntervalTimer::new(config.flush_interval())?;
/// let sink = SpoolSink::new(config, MemoryObjectStore::new())?;
///
/// let (records, source) = mpsc::channel(1024);
/// let running = tokio::spawn(sink.run(source, timer));
/// records.send(Bytes::from_static(b"hello\n")).await.ok();
/// drop(records);
/// let report = running.await.expect("sink task")?;
/// println!("uploaded {} bytes", report.uploaded_bytes);
/// # Ok(())
/// # }
/// ```
pub struct SpoolSink<C: ObjectStoreClient> {
    config: SinkConfig,
    client: C,
    metrics: SinkMetrics,
}

impl<C: ObjectStoreClient + 'static> SpoolSink<C> {
    /// Create a sink; the configuration is validated here
    pub fn new(config: SinkConfig, client: C) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            config,
            client,
            metrics: SinkMetrics::new()?,
        })
    }

    pub fn config(&self) -> &SinkConfig {
        &self.config
    }

    /// Counters shared with the running sink
    pub fn metrics(&self) -> SinkMetrics {
        self.metrics.clone()
    }

    /// Upload whatever is staged right now, without ingesting anything
    pub async fn flush_now(self) -> Result<FlushOutcome> {
        let mut coordinator = UploadCoordinator::new(&self.config, self.client, self.metrics);
        coordinator.recover()?;
        coordinator.flush(Bytes::new()).await
    }

    /// Run until `records` closes, then flush and stop
    pub async fn run<R, T>(self, mut records: R, mut timer: T) -> Result<SinkReport>
    where
        R: RecordSource,
        T: FlushTimer,
    {
        let SpoolSink {
            config,
            client,
            metrics,
        } = self;

        let (commands, queue) = mpsc::channel(config.queue_depth);
        let (completions, mut completed) = mpsc::channel(config.queue_depth + 1);
        let coordinator = UploadCoordinator::new(&config, client, metrics.clone());
        let mut worker = tokio::spawn(upload_worker(coordinator, queue, completions));

        info!(
            bucket = %config.bucket,
            prefix = %config.prefix,
            staging = %config.staging_file_path().display(),
            chunk_size = config.chunk_size,
            flush_interval_secs = config.flush_interval_secs,
            compression = config.compression,
            "Starting spool sink"
        );

        let mut event_loop = EventLoop {
            buffer: MemoryBuffer::new(),
            scheduler: FlushScheduler::new(config.chunk_size),
            commands,
            metrics: metrics.clone(),
            max_buffered_bytes: config.max_buffered_bytes,
            backlogged: false,
            dropping: false,
        };

        loop {
            tokio::select! {
                record = records.next_record() => match record {
                    Some(record) => event_loop.ingest(record),
                    None => break,
                },
                completion = completed.recv() => match completion {
                    Some(_) => event_loop.scheduler.flush_finished(),
                    None => {
                        // Completions only close early when the worker died.
                        let joined = (&mut worker).await;
                        error!(
                            lost_bytes = event_loop.buffer.len(),
                            panicked = joined.is_err(),
                            staging = %config.staging_file_path().display(),
                            "Upload worker stopped unexpectedly, shutting down sink"
                        );
                        return Err(SpoolError::QueueClosed);
                    }
                },
                _ = timer.fire() => event_loop.tick(),
            }
        }

        info!(
            buffered_bytes = event_loop.buffer.len(),
            "Record source closed, running final flush"
        );

        let deadline = Instant::now() + config.shutdown_timeout();
        let EventLoop {
            mut buffer,
            commands,
            ..
        } = event_loop;
        let pending = buffer.drain();
        let pending_len = pending.len();
        let queued = tokio::time::timeout(
            config.shutdown_timeout(),
            commands.send(Command::Flush(pending)),
        )
        .await;
        match queued {
            Ok(Ok(())) => {}
            Ok(Err(_)) => warn!(
                lost_bytes = pending_len,
                "Upload worker stopped before the final flush"
            ),
            Err(_) => warn!(
                lost_bytes = pending_len,
                "Timed out queueing the final flush"
            ),
        }
        drop(commands);

        let remaining = deadline.saturating_duration_since(Instant::now());
        match tokio::time::timeout(remaining, &mut worker).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => {
                error!(error = %e, "Upload worker failed");
                return Err(SpoolError::QueueClosed);
            }
            Err(_) => {
                worker.abort();
                warn!(
                    staging = %config.staging_file_path().display(),
                    "Shutdown timeout reached; in-flight upload abandoned, staged data kept for the next start"
                );
            }
        }

        let report = SinkReport::from_metrics(&metrics);
        info!(
            records = report.records,
            dropped_records = report.dropped_records,
            flushes = report.flushes,
            failed_flushes = report.failed_flushes,
            "Spool sink stopped"
        );
        Ok(report)
    }
}

struct EventLoop {
    buffer: MemoryBuffer,
    scheduler: FlushScheduler,
    commands: mpsc::Sender<Command>,
    metrics: SinkMetrics,
    max_buffered_bytes: usize,
    // Set while the buffer holds bytes the queue refused; only then does the cap apply
    backlogged: bool,
    // Set while records are being dropped, so the warning fires once per episode
    dropping: bool,
}

impl EventLoop {
    fn ingest(&mut self, record: Bytes) {
        if self.backlogged && self.buffer.len() + record.len() > self.max_buffered_bytes {
            self.metrics.dropped_records_total.inc();
            if !self.dropping {
                self.dropping = true;
                warn!(
                    buffered_bytes = self.buffer.len(),
                    max_buffered_bytes = self.max_buffered_bytes,
                    "Memory buffer full, dropping records"
                );
            }
            return;
        }
        if self.dropping {
            self.dropping = false;
            info!(
                dropped_records = self.metrics.dropped_records_total.get(),
                "Memory buffer accepting records again"
            );
        }

        if let Err(e) = self.buffer.append(&record) {
            self.metrics.buffer_errors_total.inc();
            self.metrics.dropped_records_total.inc();
            warn!(error = %e, size = record.len(), "Unable to buffer record, dropping it");
            return;
        }
        self.metrics.records_total.inc();
        self.metrics.ingested_bytes_total.inc_by(record.len() as u64);

        if self.scheduler.record_appended(self.buffer.len()) == FlushDecision::Drain {
            let chunk = self.buffer.drain();
            debug!(size = chunk.len(), "Chunk limit crossed, draining to staging");
            self.hand_off(Command::Stage(chunk));
        }
    }

    fn tick(&mut self) {
        match self.scheduler.timer_fired() {
            FlushDecision::Flush => {
                let pending = self.buffer.drain();
                debug!(pending_bytes = pending.len(), "Flush timer fired");
                if !self.hand_off(Command::Flush(pending)) {
                    self.scheduler.flush_finished();
                }
            }
            FlushDecision::Coalesced => {
                self.metrics.coalesced_ticks_total.inc();
                debug!("Flush still in flight, skipping this tick");
            }
            FlushDecision::Idle | FlushDecision::Drain => {}
        }
    }

    /// Queue a command for the worker; on refusal the bytes go back to memory
    fn hand_off(&mut self, command: Command) -> bool {
        match self.commands.try_send(command) {
            Ok(()) => {
                self.backlogged = false;
                true
            }
            Err(TrySendError::Full(command)) => {
                self.metrics.queue_full_total.inc();
                debug!("Upload queue full, keeping bytes in memory");
                self.buffer.restore(command.into_bytes());
                self.backlogged = true;
                false
            }
            Err(TrySendError::Closed(command)) => {
                error!("Upload worker is gone, keeping bytes in memory");
                self.buffer.restore(command.into_bytes());
                self.backlogged = true;
                false
            }
        }
    }
}

async fn upload_worker<C: ObjectStoreClient>(
    mut coordinator: UploadCoordinator<C>,
    mut queue: mpsc::Receiver<Command>,
    completions: mpsc::Sender<Result<FlushOutcome>>,
) {
    if let Err(e) = coordinator.recover() {
        warn!(error = %e, "Unable to inspect staging file at startup");
    }

    while let Some(command) = queue.recv().await {
        match command {
            Command::Stage(chunk) => {
                // Failures are logged and counted by the coordinator; the bytes stay held.
                let _ = coordinator.stage_bytes(chunk);
            }
            Command::Flush(pending) => {
                let result = coordinator.flush(pending).await;
                if let Err(e) = &result {
                    warn!(
                        error = %e,
                        retryable = e.is_retryable(),
                        "Unable to upload payload, staged data kept for the next flush"
                    );
                }
                let _ = completions.send(result).await;
            }
        }
    }

    if coordinator.unstaged_len() > 0 {
        error!(
            lost_bytes = coordinator.unstaged_len(),
            "Bytes that could not be staged are dropped at shutdown"
        );
    }
    debug!("Upload worker stopped");
}
