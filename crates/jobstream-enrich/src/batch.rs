//! Batch accumulation between two checkpoint positions

use std::time::Duration;
use tokio::time::Instant;
use tracing::debug;

use jobstream_common::types::{BatchId, EnrichedJobRecord};

use crate::config::BatchConfig;

/// A closed batch: every position in `id`'s span was consumed, and every
/// decodable one is in `records` in `ingest_seq` order.
#[derive(Debug, Clone, PartialEq)]
pub struct SealedBatch {
    pub id: BatchId,
    pub records: Vec<EnrichedJobRecord>,
    /// Positions in the span dropped as malformed
    pub malformed: u64,
    pub reason: SealReason,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SealReason {
    Size,
    Window,
    Idle,
    EndOfStream,
    /// Closed at the end of a batch already durable past the checkpoint
    Realigned,
}

impl SealReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            SealReason::Size => "size",
            SealReason::Window => "window",
            SealReason::Idle => "idle",
            SealReason::EndOfStream => "end_of_stream",
            SealReason::Realigned => "realigned",
        }
    }
}

#[derive(Debug)]
pub struct BatchAccumulator {
    partition: u32,
    max_records: usize,
    window: Duration,
    records: Vec<EnrichedJobRecord>,
    span: Option<(u64, u64)>,
    malformed: u64,
    opened_at: Option<Instant>,
    realign_end: Option<u64>,
}

impl BatchAccumulator {
    pub fn new(partition: u32, config: &BatchConfig) -> Self {
        Self {
            partition,
            max_records: config.max_records.max(1),
            window: config.window,
            records: Vec::new(),
            span: None,
            malformed: 0,
            opened_at: None,
            realign_end: None,
        }
    }

    /// Force the next batch to end exactly at `end_seq`.
    ///
    /// Used when a batch starting at the resume position is already durable
    /// but the checkpoint never moved past it: the replayed batch must get the
    /// same id so its write overwrites the existing artifacts. Size, window
    /// and idle sealing are suspended until `end_seq` is consumed.
    pub fn realign_to(&mut self, end_seq: u64) {
        self.realign_end = Some(end_seq);
    }

    fn consume(&mut self, seq: u64) {
        self.span = match self.span {
            None => Some((seq, seq)),
            Some((start, end)) => {
                debug_assert!(seq > end, "positions must arrive in ingest order");
                Some((start, end.max(seq)))
            },
        };
    }

    /// Add an enriched record; returns the sealed batch once it is full
    pub fn push(&mut self, record: EnrichedJobRecord) -> Option<SealedBatch> {
        let seq = record.ingest_seq;
        self.consume(seq);
        self.records.push(record);
        // The window opens with the first enriched record
        self.opened_at.get_or_insert_with(Instant::now);

        if self.realign_end.is_some() {
            return self.seal_if_realigned(seq);
        }
        if self.records.len() >= self.max_records {
            self.seal(SealReason::Size)
        } else {
            None
        }
    }

    /// Account for a dropped position so the span stays contiguous. Only a
    /// realigned batch can be sealed by a malformed position.
    pub fn push_malformed(&mut self, seq: u64) -> Option<SealedBatch> {
        self.consume(seq);
        self.malformed += 1;
        self.seal_if_realigned(seq)
    }

    fn seal_if_realigned(&mut self, seq: u64) -> Option<SealedBatch> {
        match self.realign_end {
            Some(end) if seq >= end => {
                self.realign_end = None;
                self.seal(SealReason::Realigned)
            },
            _ => None,
        }
    }

    /// When the open batch must be sealed; `None` while nothing can be sealed
    pub fn deadline(&self) -> Option<Instant> {
        if self.records.is_empty() || self.realign_end.is_some() {
            return None;
        }
        self.opened_at.map(|opened| opened + self.window)
    }

    pub fn is_empty(&self) -> bool {
        self.span.is_none()
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    /// Close the open batch. A span holding no enriched records stays open:
    /// its malformed positions are folded into the next batch.
    pub fn seal(&mut self, reason: SealReason) -> Option<SealedBatch> {
        if self.records.is_empty() {
            return None;
        }
        if self.realign_end.is_some() && reason != SealReason::Realigned {
            return None;
        }
        let (start, end) = self.span.take()?;

        let batch = SealedBatch {
            id: BatchId::new(self.partition, start, end),
            records: std::mem::take(&mut self.records),
            malformed: std::mem::take(&mut self.malformed),
            reason,
        };
        self.opened_at = None;

        debug!(
            partition = self.partition,
            batch_id = %batch.id,
            records = batch.records.len(),
            malformed = batch.malformed,
            reason = reason.as_str(),
            "Batch sealed"
        );
        Some(batch)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use jobstream_common::types::{JobCategory, ResolutionStatus, SeniorityLevel};

    fn record(seq: u64) -> EnrichedJobRecord {
        EnrichedJobRecord {
            source_id: String::new(),
            title: format!("Job {seq}"),
            company: String::new(),
            location: String::new(),
            posted_at: None,
            detail_ref: None,
            ingest_seq: seq,
            description: String::new(),
            requirements: Vec::new(),
            responsibilities: Vec::new(),
            resolution_status: ResolutionStatus::Resolved,
            resolved_at: None,
            matched_ref: None,
            candidate_refs: Vec::new(),
            low_confidence: false,
            failure_reason: None,
            category: JobCategory::Other,
            seniority_level: SeniorityLevel::Mid,
            complexity_score: 0,
        }
    }

    fn accumulator(max_records: usize) -> BatchAccumulator {
        BatchAccumulator::new(
            1,
            &BatchConfig {
                max_records,
                window: Duration::from_secs(60),
            },
        )
    }

    #[test]
    fn test_seals_at_max_records() {
        let mut acc = accumulator(3);
        assert!(acc.push(record(0)).is_none());
        assert!(acc.push(record(1)).is_none());
        let batch = acc.push(record(2)).unwrap();
        assert_eq!(batch.id, BatchId::new(1, 0, 2));
        assert_eq!(batch.reason, SealReason::Size);
        assert!(acc.is_empty());
    }

    #[test]
    fn test_malformed_positions_extend_span() {
        let mut acc = accumulator(10);
        assert!(acc.push_malformed(4).is_none());
        acc.push(record(5));
        assert!(acc.push_malformed(6).is_none());
        let batch = acc.seal(SealReason::Idle).unwrap();
        assert_eq!(batch.id, BatchId::new(1, 4, 6));
        assert_eq!(batch.records.len(), 1);
        assert_eq!(batch.malformed, 2);
    }

    #[test]
    fn test_span_without_records_is_never_sealed() {
        let mut acc = accumulator(10);
        assert!(acc.seal(SealReason::EndOfStream).is_none());

        assert!(acc.push_malformed(0).is_none());
        assert!(acc.push_malformed(1).is_none());
        assert!(acc.seal(SealReason::Idle).is_none());
        assert!(acc.deadline().is_none());
        assert!(!acc.is_empty());

        acc.push(record(2));
        let batch = acc.seal(SealReason::EndOfStream).unwrap();
        assert_eq!(batch.id, BatchId::new(1, 0, 2));
    }

    #[tokio::test(start_paused = true)]
    async fn test_deadline_counts_from_first_record() {
        let mut acc = accumulator(10);
        let start = Instant::now();
        acc.push(record(0));
        tokio::time::advance(Duration::from_secs(5)).await;
        acc.push(record(1));
        assert_eq!(acc.deadline(), Some(start + Duration::from_secs(60)));
    }

    #[tokio::test(start_paused = true)]
    async fn test_window_ignores_leading_malformed_positions() {
        let mut acc = accumulator(10);
        assert!(acc.push_malformed(0).is_none());
        tokio::time::advance(Duration::from_secs(120)).await;

        let first_record = Instant::now();
        acc.push(record(1));
        assert_eq!(acc.deadline(), Some(first_record + Duration::from_secs(60)));
    }

    #[test]
    fn test_realigned_batch_ignores_size_and_idle() {
        let mut acc = accumulator(2);
        acc.realign_to(4);

        assert!(acc.push(record(0)).is_none());
        assert!(acc.push(record(1)).is_none());
        assert!(acc.push(record(2)).is_none());
        assert!(acc.seal(SealReason::Idle).is_none());
        assert!(acc.deadline().is_none());

        assert!(acc.push(record(3)).is_none());
        let batch = acc.push_malformed(4).unwrap();
        assert_eq!(batch.id, BatchId::new(1, 0, 4));
        assert_eq!(batch.reason, SealReason::Realigned);
        assert_eq!(batch.records.len(), 4);
        assert_eq!(batch.malformed, 1);

        // Back to size sealing afterwards
        assert!(acc.push(record(5)).is_none());
        assert_eq!(acc.push(record(6)).unwrap().id, BatchId::new(1, 5, 6));
    }
}
