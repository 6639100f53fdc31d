//! Error taxonomy for the enrichment pipeline
//!
//! Per-record failures (resolver, malformed input) never abort a batch; they
//! downgrade a single record. Per-batch failures (writes) abort only that
//! batch's commit. A non-monotonic checkpoint is a bug and stops the run.

use std::time::Duration;
use thiserror::Error;

use jobstream_common::types::BatchId;
use jobstream_common::JobstreamError;

/// Failure reported by a detail resolver for a single call
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ResolverError {
    #[error("Resolver unavailable: {0}")]
    Unavailable(String),

    #[error("Resolver timed out after {0:?}")]
    Timeout(Duration),

    #[error("Detail not found: {0}")]
    NotFound(String),
}

impl ResolverError {
    /// Unavailable and Timeout are worth retrying; NotFound is terminal
    pub fn is_transient(&self) -> bool {
        matches!(self, ResolverError::Unavailable(_) | ResolverError::Timeout(_))
    }
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum MergeError {
    #[error("Malformed record at seq {ingest_seq}: {reason}")]
    MalformedRecord { ingest_seq: u64, reason: String },
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum MetricsError {
    #[error("Cannot compute metrics for an empty batch")]
    EmptyBatch,
}

#[derive(Error, Debug)]
pub enum SourceError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Failed to decode record at partition {partition} line {line}: {source}")]
    Decode {
        partition: u32,
        line: u64,
        #[source]
        source: serde_json::Error,
    },

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Object store backend error: {0}")]
    Backend(String),
}

/// Failure to persist a batch's artifacts (the WriteFailure class)
#[derive(Error, Debug)]
pub enum WriteError {
    #[error("Object store error: {0}")]
    Store(#[from] StoreError),

    #[error("Failed to encode batch artifacts: {0}")]
    Encode(String),

    #[error("Artifact verification failed for {key}: {reason}")]
    Verification { key: String, reason: String },

    #[error("Write timed out after {0:?}")]
    Timeout(Duration),

    #[error("Giving up on batch {batch_id} after {attempts} attempts: {last}")]
    Exhausted {
        batch_id: BatchId,
        attempts: u32,
        last: Box<WriteError>,
    },
}

impl From<arrow::error::ArrowError> for WriteError {
    fn from(err: arrow::error::ArrowError) -> Self {
        WriteError::Encode(err.to_string())
    }
}

impl From<parquet::errors::ParquetError> for WriteError {
    fn from(err: parquet::errors::ParquetError) -> Self {
        WriteError::Encode(err.to_string())
    }
}

impl From<serde_json::Error> for WriteError {
    fn from(err: serde_json::Error) -> Self {
        WriteError::Encode(err.to_string())
    }
}

#[derive(Error, Debug)]
pub enum ReadError {
    #[error("Object store error: {0}")]
    Store(#[from] StoreError),

    #[error("Failed to decode batch artifact: {0}")]
    Decode(String),

    #[error(transparent)]
    Common(#[from] JobstreamError),
}

impl From<arrow::error::ArrowError> for ReadError {
    fn from(err: arrow::error::ArrowError) -> Self {
        ReadError::Decode(err.to_string())
    }
}

impl From<parquet::errors::ParquetError> for ReadError {
    fn from(err: parquet::errors::ParquetError) -> Self {
        ReadError::Decode(err.to_string())
    }
}

impl From<serde_json::Error> for ReadError {
    fn from(err: serde_json::Error) -> Self {
        ReadError::Decode(err.to_string())
    }
}

#[derive(Error, Debug)]
pub enum CheckpointError {
    #[error("Non-monotonic checkpoint for partition {partition}: current {current}, requested {requested}")]
    NonMonotonic {
        partition: u32,
        current: u64,
        requested: u64,
    },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Run-level failure of one partition pipeline
#[derive(Error, Debug)]
pub enum PipelineError {
    #[error("Stream source failed: {0}")]
    Source(#[from] SourceError),

    #[error("Metrics failed: {0}")]
    Metrics(#[from] MetricsError),

    #[error("Batch {batch_id} could not be made durable: {source}")]
    WriteFatal {
        batch_id: BatchId,
        #[source]
        source: WriteError,
    },

    #[error("Checkpoint failed: {0}")]
    Checkpoint(#[from] CheckpointError),

    #[error("Failed to inspect durable batches: {0}")]
    Read(#[from] ReadError),

    #[error("Pipeline task failed: {0}")]
    Task(String),
}
