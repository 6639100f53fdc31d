//! Batch output: atomic, idempotent persistence of a sealed batch
//!
//! Every batch owns the key prefix `<prefix>/<batchId>/`:
//!
//! ```text
//! enriched/partition-0000/batch-00000000000000000000-00000000000000000499/
//!   records.parquet
//!   metrics.json
//!   _manifest.json      <- commit marker, written last
//! ```
//!
//! The manifest records the SHA-256 and size of both artifacts. A batch is
//! durable only when its manifest exists and both artifacts match it; a reader
//! treats anything else as "not yet written". The batch id is derived from
//! the position span, so a retried write overwrites the same keys.

pub mod codec;
pub mod s3;
pub mod store;

use bytes::Bytes;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tracing::{debug, error, info, instrument};

use jobstream_common::checksum::ArtifactDigest;
use jobstream_common::types::{BatchId, EnrichedJobRecord, MetricsDocument};

use crate::batch::SealedBatch;
use crate::config::WriterConfig;
use crate::error::{ReadError, WriteError};
use crate::retry::{retry_with_backoff, RetryPolicy};

pub use s3::S3ObjectStore;
pub use store::{LocalObjectStore, MemoryObjectStore, ObjectStore};

pub const RECORDS_FILE: &str = "records.parquet";
pub const METRICS_FILE: &str = "metrics.json";
pub const MANIFEST_FILE: &str = "_manifest.json";

const MANIFEST_FORMAT_VERSION: u32 = 1;

/// Commit marker of a durable batch
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BatchManifest {
    pub format_version: u32,
    pub batch_id: String,
    pub partition: u32,
    pub start_seq: u64,
    pub end_seq: u64,
    pub record_count: usize,
    pub malformed_records: u64,
    pub records: ArtifactDigest,
    pub metrics: ArtifactDigest,
}

/// Proof that a batch is durable
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WriteReceipt {
    pub batch_id: BatchId,
    pub manifest_key: String,
    pub records: ArtifactDigest,
    pub metrics: ArtifactDigest,
    pub attempts: u32,
}

/// Key of a batch artifact under `prefix`
pub fn artifact_key(prefix: &str, batch_id: &BatchId, file: &str) -> String {
    let prefix = prefix.trim_matches('/');
    if prefix.is_empty() {
        format!("{batch_id}/{file}")
    } else {
        format!("{prefix}/{batch_id}/{file}")
    }
}

struct EncodedBatch {
    records: Bytes,
    metrics: Bytes,
    manifest: Bytes,
    manifest_doc: BatchManifest,
}

fn encode(batch: &SealedBatch, metrics: &MetricsDocument) -> Result<EncodedBatch, WriteError> {
    let records = codec::encode_records(&batch.records)?;
    let metrics = Bytes::from(serde_json::to_vec_pretty(metrics)?);

    let manifest_doc = BatchManifest {
        format_version: MANIFEST_FORMAT_VERSION,
        batch_id: batch.id.to_string(),
        partition: batch.id.partition,
        start_seq: batch.id.start_seq,
        end_seq: batch.id.end_seq,
        record_count: batch.records.len(),
        malformed_records: batch.malformed,
        records: ArtifactDigest::of(&records),
        metrics: ArtifactDigest::of(&metrics),
    };
    let manifest = Bytes::from(serde_json::to_vec_pretty(&manifest_doc)?);

    Ok(EncodedBatch {
        records,
        metrics,
        manifest,
        manifest_doc,
    })
}

pub struct BatchWriter {
    store: Arc<dyn ObjectStore>,
    prefix: String,
    retry: RetryPolicy,
    timeout: Duration,
    partition_locks: Mutex<HashMap<u32, Arc<tokio::sync::Mutex<()>>>>,
}

impl BatchWriter {
    pub fn new(store: Arc<dyn ObjectStore>, prefix: impl Into<String>, config: &WriterConfig) -> Self {
        Self {
            store,
            prefix: prefix.into(),
            retry: config.retry,
            timeout: config.timeout,
            partition_locks: Mutex::new(HashMap::new()),
        }
    }

    pub fn store(&self) -> &Arc<dyn ObjectStore> {
        &self.store
    }

    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    fn partition_lock(&self, partition: u32) -> Arc<tokio::sync::Mutex<()>> {
        let mut locks = self.partition_locks.lock().unwrap_or_else(|e| e.into_inner());
        Arc::clone(locks.entry(partition).or_default())
    }

    /// Persist both artifacts and the manifest, returning only once all three
    /// have been read back and verified.
    #[instrument(skip_all, fields(batch_id = %batch.id, records = batch.records.len()))]
    pub async fn write(
        &self,
        batch: &SealedBatch,
        metrics: &MetricsDocument,
    ) -> Result<WriteReceipt, WriteError> {
        let encoded = encode(batch, metrics)?;

        let lock = self.partition_lock(batch.id.partition);
        let _guard = lock.lock().await;

        let encoded = &encoded;
        let timeout = self.timeout;
        let outcome = retry_with_backoff(
            &self.retry,
            "write_batch",
            |e: &WriteError| !matches!(e, WriteError::Encode(_)),
            move |_| async move {
                match tokio::time::timeout(timeout, self.write_once(&batch.id, encoded)).await {
                    Ok(result) => result,
                    Err(_) => Err(WriteError::Timeout(timeout)),
                }
            },
        )
        .await;

        match outcome.result {
            Ok(manifest_key) => {
                info!(
                    manifest = %manifest_key,
                    attempts = outcome.attempts,
                    bytes = encoded.records.len() + encoded.metrics.len(),
                    "Batch durable"
                );
                Ok(WriteReceipt {
                    batch_id: batch.id,
                    manifest_key,
                    records: encoded.manifest_doc.records.clone(),
                    metrics: encoded.manifest_doc.metrics.clone(),
                    attempts: outcome.attempts,
                })
            },
            Err(last) => {
                error!(attempts = outcome.attempts, error = %last, "Giving up on batch write");
                Err(WriteError::Exhausted {
                    batch_id: batch.id,
                    attempts: outcome.attempts,
                    last: Box::new(last),
                })
            },
        }
    }

    async fn write_once(&self, batch_id: &BatchId, encoded: &EncodedBatch) -> Result<String, WriteError> {
        let records_key = artifact_key(&self.prefix, batch_id, RECORDS_FILE);
        let metrics_key = artifact_key(&self.prefix, batch_id, METRICS_FILE);
        let manifest_key = artifact_key(&self.prefix, batch_id, MANIFEST_FILE);

        self.put_verified(&records_key, &encoded.records).await?;
        self.put_verified(&metrics_key, &encoded.metrics).await?;
        self.put_verified(&manifest_key, &encoded.manifest).await?;

        Ok(manifest_key)
    }

    async fn put_verified(&self, key: &str, data: &Bytes) -> Result<(), WriteError> {
        self.store.put(key, data.clone()).await?;

        let stored = self.store.get(key).await?.ok_or_else(|| WriteError::Verification {
            key: key.to_string(),
            reason: "object missing after write".to_string(),
        })?;
        ArtifactDigest::of(data)
            .verify(&stored)
            .map_err(|e| WriteError::Verification {
                key: key.to_string(),
                reason: e.to_string(),
            })?;

        debug!(key, bytes = data.len(), "Artifact verified");
        Ok(())
    }
}

/// A batch loaded back from storage
#[derive(Debug, Clone, PartialEq)]
pub struct DurableBatch {
    pub manifest: BatchManifest,
    pub records: Vec<EnrichedJobRecord>,
    pub metrics: MetricsDocument,
}

/// Read side of the batch layout
pub struct BatchReader {
    store: Arc<dyn ObjectStore>,
    prefix: String,
}

impl BatchReader {
    pub fn new(store: Arc<dyn ObjectStore>, prefix: impl Into<String>) -> Self {
        Self {
            store,
            prefix: prefix.into(),
        }
    }

    pub async fn manifest(&self, batch_id: &BatchId) -> Result<Option<BatchManifest>, ReadError> {
        let key = artifact_key(&self.prefix, batch_id, MANIFEST_FILE);
        match self.store.get(&key).await? {
            Some(data) => Ok(Some(serde_json::from_slice(&data)?)),
            None => Ok(None),
        }
    }

    /// Manifest plus both artifact payloads, if all present and matching
    async fn verified_artifacts(
        &self,
        batch_id: &BatchId,
    ) -> Result<Option<(BatchManifest, Bytes, Bytes)>, ReadError> {
        let Some(manifest) = self.manifest(batch_id).await? else {
            return Ok(None);
        };

        let mut payloads = Vec::with_capacity(2);
        for (file, digest) in [(RECORDS_FILE, &manifest.records), (METRICS_FILE, &manifest.metrics)] {
            let key = artifact_key(&self.prefix, batch_id, file);
            let Some(data) = self.store.get(&key).await? else {
                debug!(key = %key, "Artifact missing, batch not durable");
                return Ok(None);
            };
            if let Err(e) = digest.verify(&data) {
                debug!(key = %key, error = %e, "Artifact does not match manifest, batch not durable");
                return Ok(None);
            }
            payloads.push(data);
        }

        let metrics = payloads.pop().unwrap_or_default();
        let records = payloads.pop().unwrap_or_default();
        Ok(Some((manifest, records, metrics)))
    }

    pub async fn is_durable(&self, batch_id: &BatchId) -> Result<bool, ReadError> {
        Ok(self.verified_artifacts(batch_id).await?.is_some())
    }

    /// Load a batch; `None` unless it is durable
    pub async fn load(&self, batch_id: &BatchId) -> Result<Option<DurableBatch>, ReadError> {
        let Some((manifest, records, metrics)) = self.verified_artifacts(batch_id).await? else {
            return Ok(None);
        };

        Ok(Some(DurableBatch {
            manifest,
            records: codec::decode_records(records)?,
            metrics: serde_json::from_slice(&metrics)?,
        }))
    }

    /// Ids of every batch of `partition` that has a manifest, durable or not
    async fn manifest_ids(&self, partition: u32) -> Result<Vec<BatchId>, ReadError> {
        let partition_prefix = BatchId::partition_prefix(partition);
        let list_prefix = match self.prefix.trim_matches('/') {
            "" => format!("{partition_prefix}/"),
            prefix => format!("{prefix}/{partition_prefix}/"),
        };

        let suffix = format!("/{MANIFEST_FILE}");
        Ok(self
            .store
            .list(&list_prefix)
            .await?
            .iter()
            .filter_map(|key| {
                key.strip_prefix(&list_prefix)
                    .and_then(|rest| rest.strip_suffix(&suffix))
                    .and_then(|batch| format!("{partition_prefix}/{batch}").parse::<BatchId>().ok())
            })
            .collect())
    }

    /// Durable batches of a partition in position order
    pub async fn list_durable(&self, partition: u32) -> Result<Vec<BatchId>, ReadError> {
        let mut ids = Vec::new();
        for id in self.manifest_ids(partition).await? {
            if self.is_durable(&id).await? {
                ids.push(id);
            }
        }

        ids.sort();
        Ok(ids)
    }

    /// The durable batch of `partition` whose span opens at `start_seq`
    pub async fn durable_starting_at(
        &self,
        partition: u32,
        start_seq: u64,
    ) -> Result<Option<BatchId>, ReadError> {
        let mut candidates: Vec<BatchId> = self
            .manifest_ids(partition)
            .await?
            .into_iter()
            .filter(|id| id.start_seq == start_seq)
            .collect();
        // Prefer the widest span if an earlier run left more than one
        candidates.sort_by(|a, b| b.end_seq.cmp(&a.end_seq));

        for id in candidates {
            if self.is_durable(&id).await? {
                return Ok(Some(id));
            }
        }
        Ok(None)
    }
}
