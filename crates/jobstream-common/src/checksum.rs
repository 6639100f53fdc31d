//! Checksum utilities for batch artifact verification
//!
//! Every artifact the batch writer persists is digested before upload and
//! re-digested after it is read back. Only a matching pair counts as durable.

use crate::error::{JobstreamError, Result};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

/// Hex-encoded SHA-256 of an in-memory buffer
pub fn sha256_hex(data: &[u8]) -> String {
    hex::encode(Sha256::digest(data))
}

/// Digest and size of one persisted artifact
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArtifactDigest {
    pub sha256: String,
    pub size: u64,
}

impl ArtifactDigest {
    pub fn of(data: &[u8]) -> Self {
        Self {
            sha256: sha256_hex(data),
            size: data.len() as u64,
        }
    }

    /// Check that `data` is exactly the artifact this digest describes
    pub fn verify(&self, data: &[u8]) -> Result<()> {
        let actual = Self::of(data);
        if actual.size != self.size || actual.sha256 != self.sha256 {
            return Err(JobstreamError::ChecksumMismatch {
                expected: format!("{} ({} bytes)", self.sha256, self.size),
                actual: format!("{} ({} bytes)", actual.sha256, actual.size),
            });
        }
        Ok(())
    }
}
