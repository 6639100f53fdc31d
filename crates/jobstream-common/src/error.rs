//! Error types shared across jobstream crates

use thiserror::Error;

/// Result type alias for common operations
pub type Result<T> = std::result::Result<T, JobstreamError>;

/// Main error type for shared jobstream functionality
#[derive(Error, Debug)]
pub enum JobstreamError {
    #[error("Checksum mismatch: expected {expected}, got {actual}")]
    ChecksumMismatch { expected: String, actual: String },

    #[error("Invalid batch id: {0}")]
    InvalidBatchId(String),

    #[error("Parse error: {0}")]
    Parse(String),
}
