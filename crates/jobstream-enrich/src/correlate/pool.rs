//! Static pool of known detail records, indexed by normalized key

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::Path;
use tracing::info;

use super::normalize::{NormalizedKey, Normalizer};
use crate::error::SourceError;

/// A previously scraped detail page that summaries without a link can match
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DetailCandidate {
    pub reference: String,
    pub title: String,
    #[serde(default)]
    pub company: String,
    #[serde(default)]
    pub location: String,
    #[serde(default)]
    pub posted_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub fetched_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub requirements: Vec<String>,
    #[serde(default)]
    pub responsibilities: Vec<String>,
}

impl DetailCandidate {
    /// When this detail was captured; content-derived so repeated runs agree
    pub fn resolved_at(&self) -> DateTime<Utc> {
        self.fetched_at
            .or(self.posted_at)
            .unwrap_or(DateTime::<Utc>::UNIX_EPOCH)
    }
}

/// Immutable after construction; shared by every partition pipeline
#[derive(Debug, Default)]
pub struct DetailPool {
    index: HashMap<NormalizedKey, Vec<DetailCandidate>>,
    len: usize,
}

impl DetailPool {
    pub fn empty() -> Self {
        Self::default()
    }

    /// Index candidates; a reference listed twice is kept once (first wins)
    pub fn from_candidates(
        candidates: impl IntoIterator<Item = DetailCandidate>,
        normalizer: &Normalizer,
    ) -> Self {
        let mut index: HashMap<NormalizedKey, Vec<DetailCandidate>> = HashMap::new();
        let mut len = 0;

        for candidate in candidates {
            let key = normalizer.key(&candidate.title, &candidate.company, &candidate.location);
            let bucket = index.entry(key).or_default();
            if bucket.iter().any(|c| c.reference == candidate.reference) {
                continue;
            }
            bucket.push(candidate);
            len += 1;
        }

        Self { index, len }
    }

    /// Load a JSON-lines detail feed
    pub async fn load_jsonl(path: &Path, normalizer: &Normalizer) -> Result<Self, SourceError> {
        let content = tokio::fs::read_to_string(path).await?;
        let candidates = content
            .lines()
            .enumerate()
            .filter(|(_, line)| !line.trim().is_empty())
            .map(|(line, text)| {
                serde_json::from_str::<DetailCandidate>(text).map_err(|source| SourceError::Decode {
                    partition: 0,
                    line: line as u64 + 1,
                    source,
                })
            })
            .collect::<Result<Vec<_>, _>>()?;

        let pool = Self::from_candidates(candidates, normalizer);
        info!(path = %path.display(), candidates = pool.len(), keys = pool.index.len(), "Loaded detail pool");
        Ok(pool)
    }

    pub fn lookup(&self, key: &NormalizedKey) -> &[DetailCandidate] {
        self.index.get(key).map_or(&[], Vec::as_slice)
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }
}
