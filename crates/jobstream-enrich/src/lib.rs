//! Jobstream Enrich Library
//!
//! Consumes job-summary records from a partitioned log, correlates each one
//! with its full job description, and commits enriched batches plus derived
//! metrics as checksummed artifacts before advancing a per-partition
//! checkpoint.
//!
//! # Components
//!
//! - **stream**: partition log sources and the checkpointed reader
//! - **correlate**: key normalization, detail pool and the correlation engine
//! - **resolver**: detail resolvers (HTTP page scraper)
//! - **merge** / **profile**: enriched records and derived job profiles
//! - **batch** / **metrics**: batch sealing and metric computation
//! - **writer**: Parquet + JSON artifacts on local disk or S3, with manifests
//! - **checkpoint**: durable, monotonic per-partition positions
//! - **pipeline**: per-partition orchestration and the multi-partition service
//!
//! # Example
//!
//! ```no_run
//! use jobstream_enrich::{config::PipelineConfig, pipeline::EnrichmentService};
//! use tokio_util::sync::CancellationToken;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let config = PipelineConfig::from_env()?;
//!     let service = EnrichmentService::build(&config).await?;
//!     for result in service.run(&config.stream.partitions, CancellationToken::new()).await {
//!         println!("{:?}", result?);
//!     }
//!     Ok(())
//! }
//! ```

#![deny(clippy::unwrap_used, clippy::expect_used)]

pub mod batch;
pub mod checkpoint;
pub mod config;
pub mod correlate;
pub mod error;
pub mod merge;
pub mod metrics;
pub mod pipeline;
pub mod profile;
pub mod resolver;
pub mod retry;
pub mod stream;
pub mod writer;

pub use checkpoint::{CheckpointStore, FileCheckpointStore, MemoryCheckpointStore};
pub use config::PipelineConfig;
pub use correlate::CorrelationEngine;
pub use error::{PipelineError, ResolverError, WriteError};
pub use pipeline::{EnrichmentService, PartitionPipeline, PartitionReport, PipelineSettings};
pub use resolver::{DetailResolver, HttpDetailResolver};
pub use retry::RetryPolicy;
pub use writer::{BatchReader, BatchWriter, ObjectStore};
