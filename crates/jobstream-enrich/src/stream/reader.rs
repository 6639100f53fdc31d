//! Checkpointed reader over one partition

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_stream::wrappers::ReceiverStream;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use jobstream_common::types::JobSummaryRecord;

use super::source::{LogEntry, SummarySource};
use crate::config::StreamConfig;
use crate::error::SourceError;

/// What the reader hands to the pipeline
#[derive(Debug, Clone, PartialEq)]
pub enum StreamEvent {
    Record(JobSummaryRecord),
    /// Position whose payload could not be decoded
    Malformed { ingest_seq: u64, reason: String },
    /// Nothing arrived for the idle timeout
    Idle,
}

#[derive(Debug, Clone)]
pub struct ReaderOptions {
    pub fetch_size: usize,
    pub poll_interval: Duration,
    pub idle_timeout: Duration,
    pub follow: bool,
}

impl From<&StreamConfig> for ReaderOptions {
    fn from(config: &StreamConfig) -> Self {
        Self {
            fetch_size: config.fetch_size,
            poll_interval: config.poll_interval,
            idle_timeout: config.idle_timeout,
            follow: config.follow,
        }
    }
}

/// Lazy sequence of summaries for one partition, starting after the
/// last durable checkpoint.
pub struct StreamReader {
    source: Arc<dyn SummarySource>,
    partition: u32,
    position: Option<u64>,
    buffer: VecDeque<LogEntry>,
    options: ReaderOptions,
    last_activity: Instant,
    idle_reported: bool,
}

impl StreamReader {
    pub fn new(
        source: Arc<dyn SummarySource>,
        partition: u32,
        resume_after: Option<u64>,
        options: ReaderOptions,
    ) -> Self {
        Self {
            source,
            partition,
            position: resume_after,
            buffer: VecDeque::new(),
            options,
            last_activity: Instant::now(),
            idle_reported: false,
        }
    }

    /// Last position handed out
    pub fn position(&self) -> Option<u64> {
        self.position
    }

    /// Next event, or `None` once the log is exhausted and not following
    pub async fn next(&mut self) -> Result<Option<StreamEvent>, SourceError> {
        loop {
            while let Some(entry) = self.buffer.pop_front() {
                let seq = entry.ingest_seq();
                if self.position.is_some_and(|p| seq <= p) {
                    warn!(partition = self.partition, seq, "Skipping already delivered position");
                    continue;
                }

                self.position = Some(seq);
                self.last_activity = Instant::now();
                self.idle_reported = false;

                return Ok(Some(match entry {
                    LogEntry::Summary(summary) => StreamEvent::Record(summary),
                    LogEntry::Undecodable { ingest_seq, reason } => {
                        StreamEvent::Malformed { ingest_seq, reason }
                    },
                }));
            }

            let fetched = self
                .source
                .fetch(self.partition, self.position, self.options.fetch_size)
                .await?;
            if !fetched.is_empty() {
                debug!(partition = self.partition, count = fetched.len(), "Fetched summaries");
                self.buffer.extend(fetched);
                continue;
            }

            if !self.options.follow {
                return Ok(None);
            }

            if !self.idle_reported && self.last_activity.elapsed() >= self.options.idle_timeout {
                self.idle_reported = true;
                return Ok(Some(StreamEvent::Idle));
            }

            tokio::time::sleep(self.options.poll_interval).await;
        }
    }

    /// Run the reader on its own task, feeding a bounded channel.
    ///
    /// A full channel blocks the reader, so a slow consumer throttles reads.
    pub fn spawn(
        mut self,
        capacity: usize,
        cancel: CancellationToken,
    ) -> (ReceiverStream<Result<StreamEvent, SourceError>>, JoinHandle<()>) {
        let (tx, rx) = mpsc::channel(capacity.max(1));

        let handle = tokio::spawn(async move {
            loop {
                let next = tokio::select! {
                    _ = cancel.cancelled() => break,
                    next = self.next() => next,
                };

                let (item, done) = match next {
                    Ok(Some(event)) => (Ok(event), false),
                    Ok(None) => break,
                    Err(e) => (Err(e), true),
                };

                let sent = tokio::select! {
                    _ = cancel.cancelled() => break,
                    sent = tx.send(item) => sent,
                };
                if sent.is_err() || done {
                    break;
                }
            }
            debug!(partition = self.partition, position = ?self.position, "Stream reader stopped");
        });

        (ReceiverStream::new(rx), handle)
    }
}
