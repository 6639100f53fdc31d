//! Domain types shared by the enrichment pipeline and the batch readers

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::error::JobstreamError;

// ============================================================================
// Stream Records
// ============================================================================

/// A job listing as first scraped from the careers index page.
///
/// Field aliases accept the producer's original payload shape
/// (`position_title`, `job_url`).
///
/// # Examples
///
/// ```rust
/// use jobstream_common::types::JobSummaryRecord;
///
/// let summary: JobSummaryRecord = serde_json::from_str(
///     r#"{"position_title": "Data Engineer", "job_url": "https://example.com/data-engineer/"}"#,
/// ).unwrap();
/// assert_eq!(summary.title, "Data Engineer");
/// assert_eq!(summary.detail_ref(), Some("https://example.com/data-engineer/"));
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JobSummaryRecord {
    /// Provider-assigned id, empty when the listing carried none
    #[serde(default)]
    pub source_id: String,

    #[serde(alias = "position_title")]
    pub title: String,

    #[serde(default)]
    pub company: String,

    #[serde(default)]
    pub location: String,

    #[serde(default)]
    pub posted_at: Option<DateTime<Utc>>,

    /// URL of the full description page
    #[serde(default, alias = "job_url")]
    pub detail_ref: Option<String>,

    /// Position in the partition log, assigned by the log on read
    #[serde(default)]
    pub ingest_seq: u64,
}

impl JobSummaryRecord {
    /// Detail reference, treating a blank string as absent
    pub fn detail_ref(&self) -> Option<&str> {
        self.detail_ref
            .as_deref()
            .map(str::trim)
            .filter(|r| !r.is_empty())
    }

    /// Stable reference used in metrics documents
    pub fn record_ref(&self) -> String {
        if self.source_id.trim().is_empty() {
            format!("seq-{}", self.ingest_seq)
        } else {
            self.source_id.clone()
        }
    }
}

/// Terminal outcome of correlating a summary with its full description
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ResolutionStatus {
    Resolved,
    NotFound,
    Ambiguous,
    Failed,
}

impl ResolutionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ResolutionStatus::Resolved => "Resolved",
            ResolutionStatus::NotFound => "NotFound",
            ResolutionStatus::Ambiguous => "Ambiguous",
            ResolutionStatus::Failed => "Failed",
        }
    }
}

impl fmt::Display for ResolutionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ResolutionStatus {
    type Err = JobstreamError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "Resolved" => Ok(ResolutionStatus::Resolved),
            "NotFound" => Ok(ResolutionStatus::NotFound),
            "Ambiguous" => Ok(ResolutionStatus::Ambiguous),
            "Failed" => Ok(ResolutionStatus::Failed),
            other => Err(JobstreamError::Parse(format!(
                "unknown resolution status: {other}"
            ))),
        }
    }
}

/// Outcome of resolving one summary against the detail source.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JobDetailRecord {
    /// Page text; empty unless resolved
    pub description: String,

    /// Extracted requirement bullet points, in page order
    pub requirements: Vec<String>,

    /// Extracted responsibility bullet points, in page order
    pub responsibilities: Vec<String>,

    pub resolved_at: Option<DateTime<Utc>>,

    pub resolution_status: ResolutionStatus,

    /// Reference the description was taken from (or the suggested pick when ambiguous)
    pub matched_ref: Option<String>,

    /// Every colliding candidate, ordered by the tie-break; empty unless ambiguous
    pub candidate_refs: Vec<String>,

    /// Set when `matched_ref` is only a heuristic suggestion
    pub low_confidence: bool,

    /// Resolver calls made for this record
    pub attempts: u32,

    pub failure_reason: Option<String>,
}

impl JobDetailRecord {
    pub fn resolved(
        reference: Option<String>,
        description: String,
        requirements: Vec<String>,
        responsibilities: Vec<String>,
        resolved_at: DateTime<Utc>,
        attempts: u32,
    ) -> Self {
        Self {
            description,
            requirements,
            responsibilities,
            resolved_at: Some(resolved_at),
            resolution_status: ResolutionStatus::Resolved,
            matched_ref: reference,
            candidate_refs: Vec::new(),
            low_confidence: false,
            attempts,
            failure_reason: None,
        }
    }

    pub fn ambiguous(candidate_refs: Vec<String>) -> Self {
        Self {
            description: String::new(),
            requirements: Vec::new(),
            responsibilities: Vec::new(),
            resolved_at: None,
            resolution_status: ResolutionStatus::Ambiguous,
            matched_ref: candidate_refs.first().cloned(),
            candidate_refs,
            low_confidence: true,
            attempts: 0,
            failure_reason: None,
        }
    }

    pub fn not_found(reason: impl Into<String>, attempts: u32) -> Self {
        Self::unresolved(ResolutionStatus::NotFound, reason.into(), attempts)
    }

    pub fn failed(reason: impl Into<String>, attempts: u32) -> Self {
        Self::unresolved(ResolutionStatus::Failed, reason.into(), attempts)
    }

    fn unresolved(status: ResolutionStatus, reason: String, attempts: u32) -> Self {
        Self {
            description: String::new(),
            requirements: Vec::new(),
            responsibilities: Vec::new(),
            resolved_at: None,
            resolution_status: status,
            matched_ref: None,
            candidate_refs: Vec::new(),
            low_confidence: false,
            attempts,
            failure_reason: Some(reason),
        }
    }
}

// ============================================================================
// Job Profile
// ============================================================================

/// Broad functional area of a position
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum JobCategory {
    Engineering,
    Product,
    Design,
    Operations,
    Other,
}

impl JobCategory {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobCategory::Engineering => "Engineering",
            JobCategory::Product => "Product",
            JobCategory::Design => "Design",
            JobCategory::Operations => "Operations",
            JobCategory::Other => "Other",
        }
    }
}

impl FromStr for JobCategory {
    type Err = JobstreamError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "Engineering" => Ok(JobCategory::Engineering),
            "Product" => Ok(JobCategory::Product),
            "Design" => Ok(JobCategory::Design),
            "Operations" => Ok(JobCategory::Operations),
            "Other" => Ok(JobCategory::Other),
            other => Err(JobstreamError::Parse(format!("unknown job category: {other}"))),
        }
    }
}

/// Seniority inferred from title and description
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SeniorityLevel {
    Junior,
    Mid,
    Senior,
    Lead,
}

impl SeniorityLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            SeniorityLevel::Junior => "Junior",
            SeniorityLevel::Mid => "Mid",
            SeniorityLevel::Senior => "Senior",
            SeniorityLevel::Lead => "Lead",
        }
    }
}

impl FromStr for SeniorityLevel {
    type Err = JobstreamError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "Junior" => Ok(SeniorityLevel::Junior),
            "Mid" => Ok(SeniorityLevel::Mid),
            "Senior" => Ok(SeniorityLevel::Senior),
            "Lead" => Ok(SeniorityLevel::Lead),
            other => Err(JobstreamError::Parse(format!(
                "unknown seniority level: {other}"
            ))),
        }
    }
}

/// Summary merged with its detail outcome and derived profile.
///
/// Identity fields always come from the summary; detail fields are additive.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EnrichedJobRecord {
    pub source_id: String,
    pub title: String,
    pub company: String,
    pub location: String,
    pub posted_at: Option<DateTime<Utc>>,
    pub detail_ref: Option<String>,
    pub ingest_seq: u64,

    pub description: String,
    pub requirements: Vec<String>,
    pub responsibilities: Vec<String>,
    pub resolution_status: ResolutionStatus,
    pub resolved_at: Option<DateTime<Utc>>,
    pub matched_ref: Option<String>,
    pub candidate_refs: Vec<String>,
    pub low_confidence: bool,
    /// Why the detail could not be resolved; `None` for resolved and
    /// ambiguous records
    pub failure_reason: Option<String>,

    pub category: JobCategory,
    pub seniority_level: SeniorityLevel,
    pub complexity_score: u8,
}

impl EnrichedJobRecord {
    pub fn record_ref(&self) -> String {
        if self.source_id.trim().is_empty() {
            format!("seq-{}", self.ingest_seq)
        } else {
            self.source_id.clone()
        }
    }
}

// ============================================================================
// Metrics
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MetricScope {
    Batch,
    Record,
}

/// A derived measurement over a sealed batch or one of its records
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Metric {
    pub name: String,
    pub value: f64,
    pub scope: MetricScope,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub record_ref: Option<String>,
}

impl Metric {
    pub fn batch(name: impl Into<String>, value: f64) -> Self {
        Self {
            name: name.into(),
            value,
            scope: MetricScope::Batch,
            record_ref: None,
        }
    }

    pub fn record(name: impl Into<String>, value: f64, record_ref: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            value,
            scope: MetricScope::Record,
            record_ref: Some(record_ref.into()),
        }
    }
}

/// The `metrics.json` artifact written next to each batch's records
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MetricsDocument {
    pub batch_id: String,
    pub generated_at: DateTime<Utc>,
    pub metrics: Vec<Metric>,
}

impl MetricsDocument {
    /// Look up a batch-scoped metric by name
    pub fn batch_metric(&self, name: &str) -> Option<f64> {
        self.metrics
            .iter()
            .find(|m| m.scope == MetricScope::Batch && m.name == name)
            .map(|m| m.value)
    }
}

// ============================================================================
// Batch Identity
// ============================================================================

/// Deterministic identity of a batch: its partition and inclusive seq span.
///
/// Rendered as `partition-0003/batch-00000000000000000010-00000000000000000042`
/// so object keys sort in stream order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct BatchId {
    pub partition: u32,
    pub start_seq: u64,
    pub end_seq: u64,
}

impl BatchId {
    pub fn new(partition: u32, start_seq: u64, end_seq: u64) -> Self {
        Self {
            partition,
            start_seq,
            end_seq,
        }
    }

    /// Key prefix shared by every batch of a partition
    pub fn partition_prefix(partition: u32) -> String {
        format!("partition-{partition:04}")
    }
}

impl fmt::Display for BatchId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}/batch-{:020}-{:020}",
            Self::partition_prefix(self.partition),
            self.start_seq,
            self.end_seq
        )
    }
}

impl FromStr for BatchId {
    type Err = JobstreamError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = || JobstreamError::InvalidBatchId(s.to_string());

        let (partition, batch) = s.split_once('/').ok_or_else(invalid)?;
        let partition = partition
            .strip_prefix("partition-")
            .and_then(|p| p.parse().ok())
            .ok_or_else(invalid)?;
        let (start, end) = batch
            .strip_prefix("batch-")
            .and_then(|b| b.split_once('-'))
            .ok_or_else(invalid)?;
        let start_seq: u64 = start.parse().map_err(|_| invalid())?;
        let end_seq: u64 = end.parse().map_err(|_| invalid())?;

        if end_seq < start_seq {
            return Err(invalid());
        }

        Ok(Self::new(partition, start_seq, end_seq))
    }
}
