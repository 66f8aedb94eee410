/*!
# Spool Core

Durable batched upload sink for append-only record streams.

Records arrive on an ordered source and are accumulated in memory. Crossing
the chunk limit moves them to a local staging file; a periodic timer uploads
the staged batch (optionally gzip-compressed) to an object store under a
time-derived key, then clears the staging file. Staged data survives crashes
and upload failures and is shipped on the next successful flush.

Delivery is at-least-once: a crash between upload confirmation and clearing
the staging file uploads the same bytes again under a new key.

## Architecture

- [`MemoryBuffer`] and [`FlushScheduler`] live on the sink's event loop
- [`UploadCoordinator`] owns the [`DiskStage`] and runs on an upload worker
- [`ObjectStoreClient`] is the storage seam (S3, local filesystem, in-memory)
- [`compression`] wraps batches as gzip or plain text

## Usage

```rust,no_run
use bytes::Bytes;
use spool_core::{IntervalTimer, LocalObjectStore, SinkConfig, SpoolSink};
use tokio::sync::mpsc;

# async fn run() -> spool_core::Result<()> {
let config = SinkConfig::new("logs", "app/web")
    .with_buffer_path("/var/spool")
    .with_compression(true);
let timer = IntervalTimer::new(config.flush_interval())?;
let sink = SpoolSink::new(config, LocalObjectStore::new("/srv/objects"))?;

let (records, source) = mpsc::channel::<Bytes>(1024);
let running = tokio::spawn(sink.run(source, timer));
records.send(Bytes::from_static(b"GET /index.html 200\n")).await.ok();
drop(records);
running.await.expect("sink task")?;
# Ok(())
# }
```
*/

pub mod buffer;
pub mod compression;
pub mod config;
pub mod coordinator;
pub mod error;
pub mod observability;
pub mod scheduler;
pub mod sink;
pub mod stage;
pub mod store;


pub use buffer::MemoryBuffer;
pub use compression::{CompressionAdapter, GzipCompressor, NoCompression};
pub use config::SinkConfig;
pub use coordinator::{destination_key, FlushOutcome, FlushReport, UploadCoordinator};
pub use error::{Result, SpoolError};
pub use observability::{init_observability, SinkMetrics};
pub use scheduler::{FlushDecision, FlushScheduler, FlushTimer, IntervalTimer};
pub use sink::{RecordSource, SinkReport, SpoolSink, StreamSource};
pub use stage::DiskStage;
#[cfg(feature = "s3")]
pub use store::S3ObjectStore;
pub use store::{LocalObjectStore, MemoryObjectStore, ObjectStoreClient, PutRequest, Visibility};
