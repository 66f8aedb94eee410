/*!
Spool CLI - runs the batched upload sink from the command line.

`spool run` reads newline-delimited records from stdin and ships them to S3 or
a local directory. `spool status` and `spool flush` inspect and drain the
staging file of a destination, e.g. after an outage.
*/

use bytes::Bytes;
use clap::{Parser, Subcommand, ValueEnum};
use serde::Serialize;
use spool_core::{
    init_observability, DiskStage, FlushOutcome, IntervalTimer, LocalObjectStore,
    ObjectStoreClient, SinkConfig, SinkReport, SpoolSink, Visibility,
};
use std::path::PathBuf;
use tabled::{Table, Tabled};
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::mpsc;
use tracing::{info, warn};

#[derive(Parser)]
#[command(name = "spool")]
#[command(about = "Durable batched uploads of record streams to object storage")]
#[command(version)]
struct Cli {
    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Emit logs as JSON
    #[arg(long, global = true)]
    json_logs: bool,

    /// Where uploaded objects go
    #[arg(short, long, global = true, value_enum, default_value = "s3")]
    target: TargetType,

    /// Destination as s3://bucket/prefix
    #[arg(long, global = true, env = "SPOOL_DESTINATION")]
    destination: Option<String>,

    /// Bucket name (ignored when --destination or --config is given)
    #[arg(short, long, global = true, env = "SPOOL_BUCKET")]
    bucket: Option<String>,

    /// Key prefix for uploaded objects
    #[arg(short, long, global = true, env = "SPOOL_PREFIX", default_value = "")]
    prefix: String,

    /// AWS region for the S3 target
    #[arg(long, global = true, env = "AWS_REGION")]
    region: Option<String>,

    /// Directory holding the staging file
    #[arg(long, global = true, env = "SPOOL_BUFFER_PATH")]
    buffer_path: Option<PathBuf>,

    /// Root directory for the local target
    #[arg(long, global = true, env = "SPOOL_LOCAL_ROOT", default_value = "./spool-objects")]
    local_root: PathBuf,

    /// JSON configuration file; replaces the destination flags
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(ValueEnum, Clone, Copy, Debug)]
enum TargetType {
    S3,
    Local,
}

#[derive(Subcommand)]
enum Commands {
    /// Ship stdin lines until EOF or Ctrl-C
    Run {
        /// Gzip batches before upload
        #[arg(long)]
        compress: bool,
        /// Seconds between uploads
        #[arg(long)]
        flush_interval: Option<u64>,
        /// Bytes buffered in memory before moving to disk
        #[arg(long)]
        chunk_size: Option<usize>,
        /// Upload objects without public read access
        #[arg(long)]
        private: bool,
    },
    /// Show the staging file for the destination
    Status {
        /// Print JSON instead of a table
        #[arg(long)]
        json: bool,
    },
    /// Upload whatever is staged right now
    Flush {
        /// Gzip the batch before upload
        #[arg(long)]
        compress: bool,
    },
}

#[derive(Tabled)]
struct Row {
    #[tabled(rename = "Field")]
    field: &'static str,
    #[tabled(rename = "Value")]
    value: String,
}

impl Row {
    fn new(field: &'static str, value: impl ToString) -> Self {
        Self {
            field,
            value: value.to_string(),
        }
    }
}

#[derive(Serialize)]
struct StagingStatus {
    bucket: String,
    prefix: String,
    staging_path: String,
    staged_bytes: u64,
}

#[tokio::main]
async fn main() -> Result<(), anyhow::Error> {
    let cli = Cli::parse();

    if cli.json_logs {
        init_observability(true)?;
    } else {
        init_logging(cli.verbose);
    }

    let mut config = create_sink_config(&cli)?;

    match cli.command {
        Commands::Run {
            compress,
            flush_interval,
            chunk_size,
            private,
        } => {
            config.compression |= compress;
            if let Some(secs) = flush_interval {
                config.flush_interval_secs = secs;
            }
            if let Some(size) = chunk_size {
                config = config.with_chunk_size(size);
            }
            if private {
                config.visibility = Visibility::Private;
            }
            config.validate()?;
            let client = create_client(&cli, &config).await?;
            run_sink(config, client).await?
        }
        Commands::Status { json } => show_status(&config, json)?,
        Commands::Flush { compress } => {
            config.compression |= compress;
            let client = create_client(&cli, &config).await?;
            flush_staged(config, client).await?
        }
    }

    Ok(())
}

fn init_logging(verbose: bool) {
    let filter = if verbose {
        tracing_subscriber::EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("debug"))
    } else {
        tracing_subscriber::EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"))
    };

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();
}

fn create_sink_config(cli: &Cli) -> Result<SinkConfig, anyhow::Error> {
    let mut config = if let Some(path) = &cli.config {
        let json = std::fs::read_to_string(path)?;
        return Ok(SinkConfig::from_json(&json)?);
    } else if let Some(uri) = &cli.destination {
        SinkConfig::from_uri(uri)?
    } else {
        let bucket = cli
            .bucket
            .clone()
            .ok_or_else(|| anyhow::anyhow!("A bucket is required (--bucket or SPOOL_BUCKET)"))?;
        SinkConfig::new(bucket, cli.prefix.clone())
    };

    config.region = cli.region.clone();
    if let Some(path) = &cli.buffer_path {
        config.buffer_path = path.clone();
    }
    config.validate()?;
    Ok(config)
}

async fn create_client(
    cli: &Cli,
    config: &SinkConfig,
) -> Result<Box<dyn ObjectStoreClient>, anyhow::Error> {
    match cli.target {
        TargetType::Local => {
            info!(root = %cli.local_root.display(), "Uploading to local directory");
            Ok(Box::new(LocalObjectStore::new(&cli.local_root)))
        }
        TargetType::S3 => {
            #[cfg(feature = "s3")]
            {
                let store =
                    spool_core::S3ObjectStore::new(config.bucket.clone(), config.region.clone())
                        .await?;
                Ok(Box::new(store))
            }
            #[cfg(not(feature = "s3"))]
            {
                let _ = config;
                Err(anyhow::anyhow!("S3 support not enabled"))
            }
        }
    }
}

async fn run_sink(
    config: SinkConfig,
    client: Box<dyn ObjectStoreClient>,
) -> Result<(), anyhow::Error> {
    let sink = SpoolSink::new(config, client)?;
    let timer = IntervalTimer::new(sink.config().flush_interval())?;

    let (records, source) = mpsc::channel(1024);
    let reader = tokio::spawn(read_stdin(records));

    let report = sink.run(source, timer).await?;
    if let Err(e) = reader.await {
        warn!(error = %e, "stdin reader failed");
    }

    print_report(&report);
    Ok(())
}

/// Forward stdin lines, newline included, until EOF or Ctrl-C
async fn read_stdin(records: mpsc::Sender<Bytes>) {
    let mut stdin = BufReader::new(tokio::io::stdin());
    let shutdown = tokio::signal::ctrl_c();
    tokio::pin!(shutdown);

    loop {
        let mut line = Vec::new();
        tokio::select! {
            read = stdin.read_until(b'\n', &mut line) => match read {
                Ok(0) => break,
                Ok(_) => {
                    if records.send(Bytes::from(line)).await.is_err() {
                        break;
                    }
                }
                Err(e) => {
                    warn!(error = %e, "Failed to read stdin");
                    break;
                }
            },
            _ = &mut shutdown => {
                info!("Interrupted, shutting down");
                break;
            }
        }
    }
}

fn print_report(report: &SinkReport) {
    let rows = vec![
        Row::new("Records", report.records),
        Row::new("Ingested", format_size(report.ingested_bytes)),
        Row::new("Dropped records", report.dropped_records),
        Row::new("Uploads", report.flushes),
        Row::new("Failed uploads", report.failed_flushes),
        Row::new("Coalesced ticks", report.coalesced_ticks),
        Row::new("Uploaded", format_size(report.uploaded_bytes)),
    ];
    println!("{}", Table::new(rows));
}

fn show_status(config: &SinkConfig, json: bool) -> Result<(), anyhow::Error> {
    let stage = DiskStage::from_config(config);
    let status = StagingStatus {
        bucket: config.bucket.clone(),
        prefix: config.prefix.clone(),
        staging_path: stage.path().display().to_string(),
        staged_bytes: stage.len()?,
    };

    if json {
        println!("{}", serde_json::to_string_pretty(&status)?);
        return Ok(());
    }

    let rows = vec![
        Row::new("Bucket", &status.bucket),
        Row::new("Prefix", &status.prefix),
        Row::new("Staging file", &status.staging_path),
        Row::new("Staged", format_size(status.staged_bytes)),
    ];
    println!("{}", Table::new(rows));
    Ok(())
}

async fn flush_staged(
    config: SinkConfig,
    client: Box<dyn ObjectStoreClient>,
) -> Result<(), anyhow::Error> {
    let sink = SpoolSink::new(config, client)?;
    match sink.flush_now().await? {
        FlushOutcome::Empty => println!("Nothing staged"),
        FlushOutcome::Uploaded(report) => {
            let rows = vec![
                Row::new("Key", &report.key),
                Row::new("Staged", format_size(report.staged_bytes as u64)),
                Row::new("Uploaded", format_size(report.uploaded_bytes as u64)),
                Row::new("Content type", &report.content_type),
                Row::new("SHA-256", &report.sha256),
            ];
            println!("{}", Table::new(rows));
        }
    }
    Ok(())
}

fn format_size(bytes: u64) -> String {
    const UNITS: &[&str] = &["B", "KB", "MB", "GB", "TB"];
    let mut size = bytes as f64;
    let mut unit_index = 0;

    while size >= 1024.0 && unit_index < UNITS.len() - 1 {
        size /= 1024.0;
        unit_index += 1;
    }

    if unit_index == 0 {
        format!("{} {}", bytes, UNITS[unit_index])
    } else {
        format!("{:.1} {}", size, UNITS[unit_index])
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_size() {
        assert_eq!(format_size(512), "512 B");
        assert_eq!(format_size(1536), "1.5 KB");
        assert_eq!(format_size(3 * 1024 * 1024), "3.0 MB");
    }

    #[test]
    fn test_config_from_destination() {
        let cli = Cli::parse_from(["spool", "--destination", "s3://logs/app/web", "status"]);
        let config = create_sink_config(&cli).unwrap();
        assert_eq!(config.bucket, "logs");
        assert_eq!(config.prefix, "app/web");
    }

    #[test]
    fn test_config_requires_bucket() {
        let cli = Cli::parse_from(["spool", "--bucket", "", "status"]);
        assert!(create_sink_config(&cli).is_err());
    }

    #[tokio::test]
    async fn test_run_rejects_zero_flush_interval() {
        let mut config = SinkConfig::new("logs", "app");
        config.flush_interval_secs = 0;
        let client: Box<dyn ObjectStoreClient> =
            Box::new(LocalObjectStore::new(std::env::temp_dir().join("spool-cli-test")));

        let err = run_sink(config, client).await.unwrap_err();
        assert!(err.to_string().contains("Flush interval must be greater than zero"));
    }

    #[test]
    fn test_run_flags() {
        let cli = Cli::parse_from([
            "spool",
            "--target",
            "local",
            "--bucket",
            "logs",
            "run",
            "--compress",
            "--flush-interval",
            "5",
        ]);
        assert!(matches!(cli.target, TargetType::Local));
        match cli.command {
            Commands::Run {
                compress,
                flush_interval,
                ..
            } => {
                assert!(compress);
                assert_eq!(flush_interval, Some(5));
            }
            _ => panic!("Expected run command"),
        }
    }
}
