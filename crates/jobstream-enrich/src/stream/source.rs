//! Partitioned append-only summary logs
//!
//! The log assigns positions: a record's `ingest_seq` is its 0-based index in
//! its partition, whatever the producer wrote into the field.

use async_trait::async_trait;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use tokio::io::AsyncWriteExt;
use tracing::{debug, instrument, warn};

use jobstream_common::types::JobSummaryRecord;

use crate::error::SourceError;

/// One position in a partition log
#[derive(Debug, Clone, PartialEq)]
pub enum LogEntry {
    Summary(JobSummaryRecord),
    /// A line that could not be decoded; it still occupies its position
    Undecodable { ingest_seq: u64, reason: String },
}

impl LogEntry {
    pub fn ingest_seq(&self) -> u64 {
        match self {
            LogEntry::Summary(summary) => summary.ingest_seq,
            LogEntry::Undecodable { ingest_seq, .. } => *ingest_seq,
        }
    }
}

/// Read side of the bus: an ordered, partitioned, append-only log
#[async_trait]
pub trait SummarySource: Send + Sync {
    /// Up to `max` entries with `ingest_seq > after`, in ascending order
    async fn fetch(
        &self,
        partition: u32,
        after: Option<u64>,
        max: usize,
    ) -> Result<Vec<LogEntry>, SourceError>;
}

fn first_wanted(after: Option<u64>) -> u64 {
    after.map_or(0, |seq| seq.saturating_add(1))
}

// ============================================================================
// JSON-lines log on disk
// ============================================================================

/// One `partition-<n>.jsonl` file per partition under a directory
#[derive(Debug)]
pub struct JsonlPartitionLog {
    dir: PathBuf,
    append_lock: tokio::sync::Mutex<()>,
}

impl JsonlPartitionLog {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self {
            dir: dir.into(),
            append_lock: tokio::sync::Mutex::new(()),
        }
    }

    pub fn partition_path(&self, partition: u32) -> PathBuf {
        self.dir.join(format!("partition-{partition}.jsonl"))
    }

    /// Publish summaries to the end of a partition, returning their positions
    #[instrument(skip(self, records), fields(count = records.len()))]
    pub async fn append(
        &self,
        partition: u32,
        records: &[JobSummaryRecord],
    ) -> Result<Vec<u64>, SourceError> {
        let _guard = self.append_lock.lock().await;
        tokio::fs::create_dir_all(&self.dir).await?;

        let path = self.partition_path(partition);
        let content = match tokio::fs::read_to_string(&path).await {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => String::new(),
            Err(e) => return Err(e.into()),
        };

        let mut buf = Vec::new();
        // A torn final line is closed off and keeps its position as an
        // undecodable entry; new records start on a line of their own.
        if !content.is_empty() && !content.ends_with('\n') {
            warn!(partition, path = %path.display(), "Terminating partial last line before append");
            buf.push(b'\n');
        }
        let existing = content.lines().count() as u64;

        let mut positions = Vec::with_capacity(records.len());
        for (offset, record) in records.iter().enumerate() {
            let seq = existing + offset as u64;
            let mut record = record.clone();
            record.ingest_seq = seq;
            serde_json::to_writer(&mut buf, &record)?;
            buf.push(b'\n');
            positions.push(seq);
        }

        let mut file = tokio::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .await?;
        file.write_all(&buf).await?;
        file.sync_all().await?;

        debug!(partition, first = existing, count = records.len(), "Appended summaries");
        Ok(positions)
    }
}

#[async_trait]
impl SummarySource for JsonlPartitionLog {
    async fn fetch(
        &self,
        partition: u32,
        after: Option<u64>,
        max: usize,
    ) -> Result<Vec<LogEntry>, SourceError> {
        let content = match tokio::fs::read_to_string(self.partition_path(partition)).await {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };

        // A final line without its newline may still be mid-append
        let complete = match content.rfind('\n') {
            Some(end) => &content[..=end],
            None => "",
        };

        let start = first_wanted(after);
        let entries = complete
            .lines()
            .enumerate()
            .map(|(line, text)| (line as u64, text))
            .skip_while(|(seq, _)| *seq < start)
            .take(max)
            .map(|(seq, text)| decode_line(seq, text))
            .collect();

        Ok(entries)
    }
}

fn decode_line(seq: u64, text: &str) -> LogEntry {
    if text.trim().is_empty() {
        return LogEntry::Undecodable {
            ingest_seq: seq,
            reason: "empty line".to_string(),
        };
    }

    match serde_json::from_str::<JobSummaryRecord>(text) {
        Ok(mut summary) => {
            summary.ingest_seq = seq;
            LogEntry::Summary(summary)
        },
        Err(e) => LogEntry::Undecodable {
            ingest_seq: seq,
            reason: e.to_string(),
        },
    }
}

/// Read summaries to publish from a JSON array file or a JSON-lines file
pub async fn read_summaries_file(
    path: &Path,
    partition: u32,
) -> Result<Vec<JobSummaryRecord>, SourceError> {
    let content = tokio::fs::read_to_string(path).await?;

    if content.trim_start().starts_with('[') {
        return Ok(serde_json::from_str(&content)?);
    }

    content
        .lines()
        .enumerate()
        .filter(|(_, text)| !text.trim().is_empty())
        .map(|(line, text)| {
            serde_json::from_str(text).map_err(|source| SourceError::Decode {
                partition,
                line: line as u64 + 1,
                source,
            })
        })
        .collect()
}

// ============================================================================
// In-memory log
// ============================================================================

#[derive(Debug, Default)]
pub struct MemoryLog {
    partitions: Mutex<HashMap<u32, Vec<LogEntry>>>,
}

impl MemoryLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn append(&self, partition: u32, records: impl IntoIterator<Item = JobSummaryRecord>) -> Vec<u64> {
        let mut partitions = self.partitions.lock().unwrap_or_else(|e| e.into_inner());
        let log = partitions.entry(partition).or_default();
        records
            .into_iter()
            .map(|mut record| {
                let seq = log.len() as u64;
                record.ingest_seq = seq;
                log.push(LogEntry::Summary(record));
                seq
            })
            .collect()
    }

    /// Append a position that cannot be decoded
    pub fn append_undecodable(&self, partition: u32, reason: impl Into<String>) -> u64 {
        let mut partitions = self.partitions.lock().unwrap_or_else(|e| e.into_inner());
        let log = partitions.entry(partition).or_default();
        let seq = log.len() as u64;
        log.push(LogEntry::Undecodable {
            ingest_seq: seq,
            reason: reason.into(),
        });
        seq
    }

    pub fn len(&self, partition: u32) -> usize {
        let partitions = self.partitions.lock().unwrap_or_else(|e| e.into_inner());
        partitions.get(&partition).map_or(0, Vec::len)
    }

    pub fn is_empty(&self, partition: u32) -> bool {
        self.len(partition) == 0
    }
}

#[async_trait]
impl SummarySource for MemoryLog {
    async fn fetch(
        &self,
        partition: u32,
        after: Option<u64>,
        max: usize,
    ) -> Result<Vec<LogEntry>, SourceError> {
        let partitions = self.partitions.lock().unwrap_or_else(|e| e.into_inner());
        let start = first_wanted(after);
        Ok(partitions
            .get(&partition)
            .map(|log| {
                log.iter()
                    .skip(usize::try_from(start).unwrap_or(usize::MAX))
                    .take(max)
                    .cloned()
                    .collect()
            })
            .unwrap_or_default())
    }
}
