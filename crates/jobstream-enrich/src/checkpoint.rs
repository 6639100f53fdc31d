//! Durable per-partition checkpoint positions
//!
//! The checkpoint is the last `ingest_seq` whose batch has been confirmed
//! durable. It never moves backwards.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Mutex;
use tokio::io::AsyncWriteExt;
use tracing::{debug, error, instrument};

use crate::error::CheckpointError;

#[async_trait]
pub trait CheckpointStore: Send + Sync {
    /// Last durable position, `None` if the partition was never committed
    async fn current(&self, partition: u32) -> Result<Option<u64>, CheckpointError>;

    /// Record `position` as durable. Lower than current is `NonMonotonic`
    /// and leaves the stored state untouched; equal is a no-op.
    async fn advance(&self, partition: u32, position: u64) -> Result<(), CheckpointError>;
}

fn check_monotonic(
    partition: u32,
    current: Option<u64>,
    requested: u64,
) -> Result<(), CheckpointError> {
    match current {
        Some(current) if requested < current => {
            error!(partition, current, requested, "Refusing to move checkpoint backwards");
            Err(CheckpointError::NonMonotonic {
                partition,
                current,
                requested,
            })
        },
        _ => Ok(()),
    }
}

/// On-disk checkpoint document
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct CheckpointDocument {
    partition: u32,
    position: u64,
    updated_at: DateTime<Utc>,
}

/// One `partition-<n>.json` per partition, replaced atomically
#[derive(Debug)]
pub struct FileCheckpointStore {
    dir: PathBuf,
    write_lock: tokio::sync::Mutex<()>,
}

impl FileCheckpointStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self {
            dir: dir.into(),
            write_lock: tokio::sync::Mutex::new(()),
        }
    }

    fn path(&self, partition: u32) -> PathBuf {
        self.dir.join(format!("partition-{partition}.json"))
    }

    async fn read(&self, partition: u32) -> Result<Option<u64>, CheckpointError> {
        match tokio::fs::read(self.path(partition)).await {
            Ok(bytes) => {
                let doc: CheckpointDocument = serde_json::from_slice(&bytes)?;
                Ok(Some(doc.position))
            },
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }
}

#[async_trait]
impl CheckpointStore for FileCheckpointStore {
    async fn current(&self, partition: u32) -> Result<Option<u64>, CheckpointError> {
        self.read(partition).await
    }

    #[instrument(skip(self))]
    async fn advance(&self, partition: u32, position: u64) -> Result<(), CheckpointError> {
        let _guard = self.write_lock.lock().await;

        let current = self.read(partition).await?;
        check_monotonic(partition, current, position)?;
        if current == Some(position) {
            return Ok(());
        }

        tokio::fs::create_dir_all(&self.dir).await?;
        let doc = CheckpointDocument {
            partition,
            position,
            updated_at: Utc::now(),
        };
        let bytes = serde_json::to_vec_pretty(&doc)?;

        let target = self.path(partition);
        let tmp = target.with_extension("json.tmp");
        let mut file = tokio::fs::File::create(&tmp).await?;
        file.write_all(&bytes).await?;
        file.sync_all().await?;
        drop(file);
        tokio::fs::rename(&tmp, &target).await?;

        debug!(partition, position, "Checkpoint advanced");
        Ok(())
    }
}

#[derive(Debug, Default)]
pub struct MemoryCheckpointStore {
    positions: Mutex<HashMap<u32, u64>>,
}

impl MemoryCheckpointStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl CheckpointStore for MemoryCheckpointStore {
    async fn current(&self, partition: u32) -> Result<Option<u64>, CheckpointError> {
        let positions = self.positions.lock().unwrap_or_else(|e| e.into_inner());
        Ok(positions.get(&partition).copied())
    }

    async fn advance(&self, partition: u32, position: u64) -> Result<(), CheckpointError> {
        let mut positions = self.positions.lock().unwrap_or_else(|e| e.into_inner());
        check_monotonic(partition, positions.get(&partition).copied(), position)?;
        positions.insert(partition, position);
        Ok(())
    }
}
