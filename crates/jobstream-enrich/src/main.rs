//! Jobstream Enrich - summary stream consumer and enricher

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use jobstream_common::logging::{init_logging, LogConfig, LogLevel};
use jobstream_common::types::BatchId;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::signal;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use jobstream_enrich::checkpoint::{CheckpointStore, FileCheckpointStore};
use jobstream_enrich::config::{parse_partitions, PipelineConfig, StorageBackend};
use jobstream_enrich::pipeline::EnrichmentService;
use jobstream_enrich::stream::{read_summaries_file, JsonlPartitionLog};
use jobstream_enrich::writer::{BatchReader, LocalObjectStore, ObjectStore, S3ObjectStore};

#[derive(Parser, Debug)]
#[command(name = "jobstream-enrich")]
#[command(author, version, about = "Job summary stream enrichment")]
struct Cli {
    #[command(subcommand)]
    command: Command,

    /// Verbose output
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Consume partitions, enrich summaries and commit batches
    Run {
        /// Comma-separated partition list, e.g. 0,1,2
        #[arg(short, long)]
        partitions: Option<String>,

        /// Keep polling for new summaries instead of stopping at end of log
        #[arg(short, long)]
        follow: bool,
    },

    /// Append summaries from a JSON or JSON-lines file to a partition log
    Publish {
        #[arg(short, long)]
        partition: u32,

        #[arg(short, long)]
        input: PathBuf,
    },

    /// Print the durable checkpoint of a partition
    Checkpoint {
        #[arg(short, long)]
        partition: u32,
    },

    /// Check whether a batch is durable
    Verify {
        /// e.g. partition-0000/batch-00000000000000000000-00000000000000000499
        #[arg(short, long)]
        batch_id: String,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let log_level = if cli.verbose {
        LogLevel::Debug
    } else {
        LogLevel::Info
    };

    let log_config = LogConfig::builder()
        .level(log_level)
        .log_file_prefix("jobstream-enrich".to_string())
        .filter_directives("jobstream_enrich=debug,jobstream_common=info".to_string())
        .build();

    // Environment variables take precedence
    let log_config = log_config.merge_env()?;
    let _guard = init_logging(&log_config)?;

    let mut config = PipelineConfig::from_env()?;

    match cli.command {
        Command::Run { partitions, follow } => {
            if let Some(partitions) = partitions {
                config.stream.partitions = parse_partitions(&partitions)?;
            }
            config.stream.follow |= follow;
            config.validate()?;
            run(config).await
        },
        Command::Publish { partition, input } => {
            let summaries = read_summaries_file(&input, partition)
                .await
                .with_context(|| format!("Failed to read {}", input.display()))?;
            let log = JsonlPartitionLog::new(&config.stream.dir);
            let positions = log.append(partition, &summaries).await?;
            info!(
                partition,
                published = positions.len(),
                first = ?positions.first(),
                last = ?positions.last(),
                "Summaries published"
            );
            Ok(())
        },
        Command::Checkpoint { partition } => {
            let store = FileCheckpointStore::new(&config.checkpoint.dir);
            match store.current(partition).await? {
                Some(position) => println!("partition {partition}: {position}"),
                None => println!("partition {partition}: no checkpoint"),
            }
            Ok(())
        },
        Command::Verify { batch_id } => {
            let id: BatchId = batch_id.parse()?;
            let store: Arc<dyn ObjectStore> = match &config.storage.backend {
                StorageBackend::Local { root } => Arc::new(LocalObjectStore::new(root)),
                StorageBackend::S3(s3) => Arc::new(S3ObjectStore::new(s3)),
            };
            let reader = BatchReader::new(store, config.storage.prefix.clone());
            match reader.load(&id).await? {
                Some(batch) => println!(
                    "{id}: durable, {} records, {} malformed, records sha256 {}",
                    batch.records.len(),
                    batch.manifest.malformed_records,
                    batch.manifest.records.sha256
                ),
                None => println!("{id}: not durable"),
            }
            Ok(())
        },
    }
}

async fn run(config: PipelineConfig) -> Result<()> {
    info!(
        partitions = ?config.stream.partitions,
        follow = config.stream.follow,
        "Starting enrichment"
    );

    let service = EnrichmentService::build(&config).await?;
    let cancel = CancellationToken::new();

    let shutdown = cancel.clone();
    tokio::spawn(async move {
        shutdown_signal().await;
        shutdown.cancel();
    });

    let mut failed = 0;
    for result in service.run(&config.stream.partitions, cancel).await {
        match result {
            Ok(report) => info!(
                partition = report.partition,
                batches = report.batches_committed,
                records = report.records_written,
                malformed = report.malformed_dropped,
                checkpoint = ?report.last_checkpoint,
                cancelled = report.cancelled,
                "Partition done"
            ),
            Err(e) => {
                error!(error = %e, "Partition failed");
                failed += 1;
            },
        }
    }

    if failed > 0 {
        anyhow::bail!("{failed} partition(s) failed");
    }
    info!("Enrichment complete");
    Ok(())
}

/// Resolves on Ctrl+C or SIGTERM
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!("Failed to install Ctrl+C handler: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            },
            Err(e) => {
                error!("Failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            },
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => warn!("Received Ctrl+C, cancelling"),
        _ = terminate => warn!("Received terminate signal, cancelling"),
    }
}
