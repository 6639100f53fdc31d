//! Jobstream Common Library
//!
//! Shared types, utilities, and error handling for the jobstream workspace.
//!
//! # Overview
//!
//! - **Types**: job summary/detail/enriched records, metrics and batch identifiers
//! - **Checksums**: SHA-256 digests used to confirm persisted batch artifacts
//! - **Logging**: `tracing` subscriber bootstrap shared by every binary
//! - **Error Handling**: common error and result types
//!
//! # Example
//!
//! ```no_run
//! use jobstream_common::checksum::ArtifactDigest;
//! use jobstream_common::types::BatchId;
//!
//! let id = BatchId::new(0, 10, 42);
//! let digest = ArtifactDigest::of(b"payload");
//! println!("{id}: {}", digest.sha256);
//! ```

#![deny(clippy::unwrap_used, clippy::expect_used)]

pub mod checksum;
pub mod error;
pub mod logging;
pub mod types;

// Re-export commonly used types
pub use error::{JobstreamError, Result};
pub use types::{
    BatchId, EnrichedJobRecord, JobCategory, JobDetailRecord, JobSummaryRecord, Metric,
    MetricScope, MetricsDocument, ResolutionStatus, SeniorityLevel,
};
