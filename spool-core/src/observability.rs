/*!
Observability for Spool sinks.

- Structured logging setup (`tracing-subscriber`, JSON or plain output)
- Per-sink Prometheus counters. Every failure the sink swallows to keep the
  host running is counted here, so tests and operators can assert on it.
*/

use prometheus::{
    Encoder, Histogram, HistogramOpts, IntCounter, IntGauge, Registry, TextEncoder,
};
use std::time::Duration;
use tracing::subscriber::set_global_default;
use tracing_subscriber::filter::Directive;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::{EnvFilter, Registry as TracingRegistry};

use crate::{Result, SpoolError};

/// Counters for one sink instance
///
/// Each sink owns its own registry; clones share the underlying counters.
#[derive(Clone, Debug)]
pub struct SinkMetrics {
    pub records_total: IntCounter,
    pub ingested_bytes_total: IntCounter,
    pub dropped_records_total: IntCounter,
    pub buffer_errors_total: IntCounter,
    pub staging_errors_total: IntCounter,
    pub queue_full_total: IntCounter,
    pub coalesced_ticks_total: IntCounter,
    pub flushes_total: IntCounter,
    pub empty_flushes_total: IntCounter,
    pub flush_failures_total: IntCounter,
    pub uploaded_bytes_total: IntCounter,
    pub staged_bytes: IntGauge,
    pub upload_latency_seconds: Histogram,

    registry: Registry,
}

fn counter(registry: &Registry, name: &str, help: &str) -> Result<IntCounter> {
    let counter = IntCounter::new(name, help)
        .map_err(|e| SpoolError::config(format!("Failed to create {name} metric: {e}")))?;
    registry
        .register(Box::new(counter.clone()))
        .map_err(|e| SpoolError::config(format!("Failed to register {name}: {e}")))?;
    Ok(counter)
}

impl SinkMetrics {
    pub fn new() -> Result<Self> {
        let registry = Registry::new();

        let staged_bytes = IntGauge::new(
            "spool_staged_bytes",
            "Bytes currently held in the staging file",
        )
        .map_err(|e| SpoolError::config(format!("Failed to create staged_bytes metric: {e}")))?;
        registry
            .register(Box::new(staged_bytes.clone()))
            .map_err(|e| SpoolError::config(format!("Failed to register staged_bytes: {e}")))?;

        let upload_latency_seconds = Histogram::with_opts(HistogramOpts::new(
            "spool_upload_latency_seconds",
            "Duration of object store uploads in seconds",
        ))
        .map_err(|e| {
            SpoolError::config(format!("Failed to create upload_latency_seconds metric: {e}"))
        })?;
        registry
            .register(Box::new(upload_latency_seconds.clone()))
            .map_err(|e| {
                SpoolError::config(format!("Failed to register upload_latency_seconds: {e}"))
            })?;

        Ok(Self {
            records_total: counter(&registry, "spool_records_total", "Records accepted")?,
            ingested_bytes_total: counter(
                &registry,
                "spool_ingested_bytes_total",
                "Record bytes accepted",
            )?,
            dropped_records_total: counter(
                &registry,
                "spool_dropped_records_total",
                "Records dropped by the buffer limit or an append failure",
            )?,
            buffer_errors_total: counter(
                &registry,
                "spool_buffer_errors_total",
                "In-memory buffer append failures",
            )?,
            staging_errors_total: counter(
                &registry,
                "spool_staging_errors_total",
                "Staging file I/O failures",
            )?,
            queue_full_total: counter(
                &registry,
                "spool_queue_full_total",
                "Hand-offs refused because the upload queue was full",
            )?,
            coalesced_ticks_total: counter(
                &registry,
                "spool_coalesced_ticks_total",
                "Timer ticks skipped because a flush was in flight",
            )?,
            flushes_total: counter(&registry, "spool_flushes_total", "Successful uploads")?,
            empty_flushes_total: counter(
                &registry,
                "spool_empty_flushes_total",
                "Flushes with nothing to upload",
            )?,
            flush_failures_total: counter(
                &registry,
                "spool_flush_failures_total",
                "Flushes aborted by a staging, compression or upload error",
            )?,
            uploaded_bytes_total: counter(
                &registry,
                "spool_uploaded_bytes_total",
                "Uncompressed bytes confirmed uploaded",
            )?,
            staged_bytes,
            upload_latency_seconds,
            registry,
        })
    }

    pub fn record_upload_latency(&self, duration: Duration) {
        self.upload_latency_seconds.observe(duration.as_secs_f64());
    }

    /// Gather metrics in Prometheus text format
    pub fn gather(&self) -> Result<String> {
        let encoder = TextEncoder::new();
        let metric_families = self.registry.gather();
        let mut buffer = Vec::new();

        encoder
            .encode(&metric_families, &mut buffer)
            .map_err(|e| SpoolError::config(format!("Failed to encode metrics: {e}")))?;

        String::from_utf8(buffer)
            .map_err(|e| SpoolError::config(format!("Failed to convert metrics to string: {e}")))
    }
}

/// Install the global tracing subscriber
///
/// `RUST_LOG` is honoured; without it the `spool_core` target logs at info.
pub fn init_observability(json_output: bool) -> Result<()> {
    let directive: Directive = "spool_core=info"
        .parse()
        .map_err(|e| SpoolError::config(format!("Invalid log directive: {e}")))?;
    let filter = EnvFilter::from_default_env().add_directive(directive);

    let result = if json_output {
        let fmt_layer = tracing_subscriber::fmt::layer()
            .json()
            .with_target(false)
            .with_current_span(false);
        set_global_default(TracingRegistry::default().with(filter).with(fmt_layer))
    } else {
        let fmt_layer = tracing_subscriber::fmt::layer().with_target(false);
        set_global_default(TracingRegistry::default().with(filter).with(fmt_layer))
    };

    result.map_err(|e| {
        SpoolError::config(format!("Failed to set global tracing subscriber: {e}"))
    })?;

    tracing::info!("Spool observability initialized");
    Ok(())
}
