//! Per-partition orchestration
//!
//! ```text
//! StreamReader ──mpsc──▶ correlate (buffered) ──▶ merge ──▶ BatchAccumulator
//!                                                               │ sealed
//!                                        checkpoint ◀── writer ◀┘
//! ```
//!
//! Resolution runs concurrently up to the configured limit, but results come
//! back in `ingest_seq` order and every merge and sealing decision happens on
//! this single task. The checkpoint only moves after the writer has confirmed
//! the batch durable.

use futures::{Stream, StreamExt};
use std::sync::Arc;
use tokio::task::JoinSet;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument, warn};

use jobstream_common::types::{JobDetailRecord, JobSummaryRecord};

use crate::batch::{BatchAccumulator, SealReason, SealedBatch};
use crate::checkpoint::{CheckpointStore, FileCheckpointStore};
use crate::config::{BatchConfig, PipelineConfig, StorageBackend};
use crate::correlate::{CorrelationEngine, DetailPool, Normalizer};
use crate::error::{PipelineError, SourceError};
use crate::merge;
use crate::metrics;
use crate::resolver::HttpDetailResolver;
use crate::stream::{JsonlPartitionLog, ReaderOptions, StreamEvent, StreamReader, SummarySource};
use crate::writer::{BatchReader, BatchWriter, LocalObjectStore, ObjectStore, S3ObjectStore};

/// Knobs of a single partition pipeline
#[derive(Debug, Clone)]
pub struct PipelineSettings {
    pub batch: BatchConfig,
    pub reader: ReaderOptions,
    pub channel_capacity: usize,
    /// Resolver calls in flight per partition
    pub concurrency: usize,
}

impl From<&PipelineConfig> for PipelineSettings {
    fn from(config: &PipelineConfig) -> Self {
        Self {
            batch: config.batch.clone(),
            reader: ReaderOptions::from(&config.stream),
            channel_capacity: config.stream.channel_capacity,
            concurrency: config.resolver.concurrency,
        }
    }
}

/// Outcome of one partition run
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PartitionReport {
    pub partition: u32,
    pub batches_committed: usize,
    pub records_written: usize,
    pub malformed_dropped: u64,
    pub last_checkpoint: Option<u64>,
    pub cancelled: bool,
}

enum Stage {
    Resolved(JobSummaryRecord, JobDetailRecord),
    Malformed { ingest_seq: u64, reason: String },
    Idle,
    SourceFailed(SourceError),
}

pub struct PartitionPipeline {
    partition: u32,
    source: Arc<dyn SummarySource>,
    engine: CorrelationEngine,
    writer: Arc<BatchWriter>,
    checkpoints: Arc<dyn CheckpointStore>,
    settings: PipelineSettings,
}

impl PartitionPipeline {
    pub fn new(
        partition: u32,
        source: Arc<dyn SummarySource>,
        engine: CorrelationEngine,
        writer: Arc<BatchWriter>,
        checkpoints: Arc<dyn CheckpointStore>,
        settings: PipelineSettings,
    ) -> Self {
        Self {
            partition,
            source,
            engine,
            writer,
            checkpoints,
            settings,
        }
    }

    /// Consume the partition from its checkpoint until end of stream (or
    /// forever in follow mode) or until `cancel` fires.
    ///
    /// On cancellation the open batch is discarded and the checkpoint stays
    /// where the last durable batch left it.
    #[instrument(skip_all, fields(partition = self.partition))]
    pub async fn run(self, cancel: CancellationToken) -> Result<PartitionReport, PipelineError> {
        let resume_after = self.checkpoints.current(self.partition).await?;
        info!(resume_after = ?resume_after, "Starting partition pipeline");

        let mut report = PartitionReport {
            partition: self.partition,
            last_checkpoint: resume_after,
            ..Default::default()
        };

        let realign_end = self.durable_span_past(resume_after).await?;

        let reader_cancel = cancel.child_token();
        let reader = StreamReader::new(
            Arc::clone(&self.source),
            self.partition,
            resume_after,
            self.settings.reader.clone(),
        );
        let (events, reader_handle) =
            reader.spawn(self.settings.channel_capacity, reader_cancel.clone());

        let engine = self.engine.clone();
        let stages = events
            .map(move |event| {
                let engine = engine.clone();
                async move {
                    match event {
                        Ok(StreamEvent::Record(summary)) => {
                            // No resolver call for a record that can never merge
                            if let Err(e) = merge::validate(&summary) {
                                return Stage::Malformed {
                                    ingest_seq: summary.ingest_seq,
                                    reason: e.to_string(),
                                };
                            }
                            let detail = engine.correlate(&summary).await;
                            Stage::Resolved(summary, detail)
                        },
                        Ok(StreamEvent::Malformed { ingest_seq, reason }) => {
                            Stage::Malformed { ingest_seq, reason }
                        },
                        Ok(StreamEvent::Idle) => Stage::Idle,
                        Err(e) => Stage::SourceFailed(e),
                    }
                }
            })
            .buffered(self.settings.concurrency.max(1));

        let outcome = self.drive(stages, realign_end, &cancel, &mut report).await;

        reader_cancel.cancel();
        let joined = reader_handle.await;

        outcome?;
        joined.map_err(|e| PipelineError::Task(format!("stream reader: {e}")))?;

        info!(
            batches = report.batches_committed,
            records = report.records_written,
            malformed = report.malformed_dropped,
            checkpoint = ?report.last_checkpoint,
            cancelled = report.cancelled,
            "Partition pipeline finished"
        );
        Ok(report)
    }

    /// End of a batch already durable at the resume position.
    ///
    /// A crash between a confirmed write and the checkpoint advance leaves
    /// such a batch behind. Replaying it with different seal boundaries would
    /// list the same positions twice, so the first batch of this run is
    /// forced onto the same span and its write overwrites the old one.
    async fn durable_span_past(&self, resume_after: Option<u64>) -> Result<Option<u64>, PipelineError> {
        let reader = BatchReader::new(Arc::clone(self.writer.store()), self.writer.prefix());
        let next_seq = resume_after.map_or(0, |seq| seq + 1);

        let existing = reader.durable_starting_at(self.partition, next_seq).await?;
        if let Some(id) = &existing {
            warn!(batch_id = %id, "Durable batch found past the checkpoint, replaying onto its span");
        }
        Ok(existing.map(|id| id.end_seq))
    }

    async fn drive(
        &self,
        stages: impl Stream<Item = Stage>,
        realign_end: Option<u64>,
        cancel: &CancellationToken,
        report: &mut PartitionReport,
    ) -> Result<(), PipelineError> {
        let mut stages = std::pin::pin!(stages);
        let mut batch = BatchAccumulator::new(self.partition, &self.settings.batch);
        if let Some(end_seq) = realign_end {
            batch.realign_to(end_seq);
        }

        loop {
            let deadline = batch.deadline();
            let stage = tokio::select! {
                biased;
                _ = cancel.cancelled() => {
                    if !batch.is_empty() {
                        info!(pending = batch.len(), "Cancelled, discarding open batch");
                    }
                    report.cancelled = true;
                    return Ok(());
                },
                _ = wait_until(deadline) => {
                    if let Some(sealed) = batch.seal(SealReason::Window) {
                        self.commit(sealed, report).await?;
                    }
                    continue;
                },
                stage = stages.next() => stage,
            };

            match stage {
                Some(Stage::Resolved(summary, detail)) => match merge::merge(&summary, &detail) {
                    Ok(record) => {
                        if let Some(sealed) = batch.push(record) {
                            self.commit(sealed, report).await?;
                        }
                    },
                    Err(e) => {
                        warn!(seq = summary.ingest_seq, error = %e, "Dropping malformed record");
                        report.malformed_dropped += 1;
                        if let Some(sealed) = batch.push_malformed(summary.ingest_seq) {
                            self.commit(sealed, report).await?;
                        }
                    },
                },
                Some(Stage::Malformed { ingest_seq, reason }) => {
                    warn!(seq = ingest_seq, reason = %reason, "Dropping malformed record");
                    report.malformed_dropped += 1;
                    if let Some(sealed) = batch.push_malformed(ingest_seq) {
                        self.commit(sealed, report).await?;
                    }
                },
                Some(Stage::Idle) => {
                    if let Some(sealed) = batch.seal(SealReason::Idle) {
                        self.commit(sealed, report).await?;
                    }
                },
                Some(Stage::SourceFailed(e)) => return Err(e.into()),
                None => {
                    if let Some(sealed) = batch.seal(SealReason::EndOfStream) {
                        self.commit(sealed, report).await?;
                    }
                    if !batch.is_empty() {
                        debug!("Trailing malformed positions left for the next batch");
                    }
                    return Ok(());
                },
            }
        }
    }

    /// Write-before-checkpoint: metrics, durable write, then advance
    async fn commit(&self, batch: SealedBatch, report: &mut PartitionReport) -> Result<(), PipelineError> {
        let metrics = metrics::compute(&batch)?;

        let receipt = self
            .writer
            .write(&batch, &metrics)
            .await
            .map_err(|source| PipelineError::WriteFatal {
                batch_id: batch.id,
                source,
            })?;

        self.checkpoints
            .advance(self.partition, batch.id.end_seq)
            .await?;

        report.batches_committed += 1;
        report.records_written += batch.records.len();
        report.last_checkpoint = Some(batch.id.end_seq);

        info!(
            batch_id = %batch.id,
            records = batch.records.len(),
            malformed = batch.malformed,
            reason = batch.reason.as_str(),
            attempts = receipt.attempts,
            "Batch committed"
        );
        Ok(())
    }
}

async fn wait_until(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => tokio::time::sleep_until(deadline).await,
        None => std::future::pending().await,
    }
}

/// Runs one independent pipeline per partition over shared components
#[derive(Clone)]
pub struct EnrichmentService {
    source: Arc<dyn SummarySource>,
    engine: CorrelationEngine,
    writer: Arc<BatchWriter>,
    checkpoints: Arc<dyn CheckpointStore>,
    settings: PipelineSettings,
}

impl EnrichmentService {
    pub fn from_parts(
        source: Arc<dyn SummarySource>,
        engine: CorrelationEngine,
        writer: Arc<BatchWriter>,
        checkpoints: Arc<dyn CheckpointStore>,
        settings: PipelineSettings,
    ) -> Self {
        Self {
            source,
            engine,
            writer,
            checkpoints,
            settings,
        }
    }

    /// Wire the production components described by `config`
    pub async fn build(config: &PipelineConfig) -> anyhow::Result<Self> {
        let source: Arc<dyn SummarySource> = Arc::new(JsonlPartitionLog::new(&config.stream.dir));

        let normalizer = Arc::new(Normalizer::new(&config.correlation.noise_tokens));
        let pool = match &config.correlation.detail_pool {
            Some(path) => {
                let pool = DetailPool::load_jsonl(path, &normalizer).await?;
                info!(path = %path.display(), candidates = pool.len(), "Detail pool loaded");
                pool
            },
            None => DetailPool::empty(),
        };

        let resolver = Arc::new(HttpDetailResolver::new(&config.resolver)?);
        let engine = CorrelationEngine::new(
            resolver,
            Arc::new(pool),
            normalizer,
            config.resolver.retry,
            config.resolver.timeout,
        );

        let store: Arc<dyn ObjectStore> = match &config.storage.backend {
            StorageBackend::Local { root } => Arc::new(LocalObjectStore::new(root)),
            StorageBackend::S3(s3) => Arc::new(S3ObjectStore::new(s3)),
        };
        let writer = Arc::new(BatchWriter::new(store, config.storage.prefix.clone(), &config.writer));
        let checkpoints: Arc<dyn CheckpointStore> =
            Arc::new(FileCheckpointStore::new(&config.checkpoint.dir));

        Ok(Self::from_parts(
            source,
            engine,
            writer,
            checkpoints,
            PipelineSettings::from(config),
        ))
    }

    pub fn checkpoints(&self) -> &Arc<dyn CheckpointStore> {
        &self.checkpoints
    }

    pub fn pipeline(&self, partition: u32) -> PartitionPipeline {
        PartitionPipeline::new(
            partition,
            Arc::clone(&self.source),
            self.engine.clone(),
            Arc::clone(&self.writer),
            Arc::clone(&self.checkpoints),
            self.settings.clone(),
        )
    }

    /// Run every partition to completion. A failing partition does not stop
    /// the others; results are ordered by partition where known.
    pub async fn run(
        &self,
        partitions: &[u32],
        cancel: CancellationToken,
    ) -> Vec<Result<PartitionReport, PipelineError>> {
        let mut tasks = JoinSet::new();
        for &partition in partitions {
            let pipeline = self.pipeline(partition);
            let cancel = cancel.clone();
            tasks.spawn(async move { (partition, pipeline.run(cancel).await) });
        }

        let mut finished = Vec::with_capacity(partitions.len());
        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok((partition, Ok(report))) => finished.push((partition, Ok(report))),
                Ok((partition, Err(e))) => {
                    error!(partition, error = %e, "Partition pipeline failed");
                    finished.push((partition, Err(e)));
                },
                Err(e) => {
                    error!(error = %e, "Partition task aborted");
                    finished.push((u32::MAX, Err(PipelineError::Task(e.to_string()))));
                },
            }
        }

        finished.sort_by_key(|(partition, _)| *partition);
        finished.into_iter().map(|(_, result)| result).collect()
    }
}
