//! Metrics derived from a sealed batch
//!
//! Everything in the document is a function of the batch contents, including
//! `generatedAt`, so writing the same batch twice yields the same bytes.

use chrono::{DateTime, Utc};

use jobstream_common::types::{Metric, MetricsDocument, ResolutionStatus};

use crate::batch::SealedBatch;
use crate::error::MetricsError;

pub const RESOLUTION_RATE: &str = "resolution_rate";
pub const AMBIGUOUS_RATE: &str = "ambiguous_rate";
pub const FAILED_RATE: &str = "failed_rate";
pub const NOT_FOUND_RATE: &str = "not_found_rate";
pub const AVG_REQUIREMENTS_PER_RECORD: &str = "avg_requirements_per_record";
pub const AVG_COMPLEXITY_SCORE: &str = "avg_complexity_score";
pub const RECORD_COUNT: &str = "record_count";
pub const MALFORMED_RECORDS: &str = "malformed_records";
pub const REQUIREMENT_COUNT: &str = "requirement_count";
pub const COMPLEXITY_SCORE: &str = "complexity_score";

pub fn compute(batch: &SealedBatch) -> Result<MetricsDocument, MetricsError> {
    let records = &batch.records;
    if records.is_empty() {
        return Err(MetricsError::EmptyBatch);
    }

    let total = records.len() as f64;
    let count = |status: ResolutionStatus| {
        records
            .iter()
            .filter(|r| r.resolution_status == status)
            .count()
    };
    let rate = |status: ResolutionStatus| count(status) as f64 / total;

    let resolved: Vec<_> = records
        .iter()
        .filter(|r| r.resolution_status == ResolutionStatus::Resolved)
        .collect();
    let avg_requirements = if resolved.is_empty() {
        0.0
    } else {
        resolved.iter().map(|r| r.requirements.len()).sum::<usize>() as f64 / resolved.len() as f64
    };
    let avg_complexity =
        records.iter().map(|r| f64::from(r.complexity_score)).sum::<f64>() / total;

    let mut metrics = vec![
        Metric::batch(RESOLUTION_RATE, rate(ResolutionStatus::Resolved)),
        Metric::batch(AMBIGUOUS_RATE, rate(ResolutionStatus::Ambiguous)),
        Metric::batch(FAILED_RATE, rate(ResolutionStatus::Failed)),
        Metric::batch(NOT_FOUND_RATE, rate(ResolutionStatus::NotFound)),
        Metric::batch(AVG_REQUIREMENTS_PER_RECORD, avg_requirements),
        Metric::batch(AVG_COMPLEXITY_SCORE, avg_complexity),
        Metric::batch(RECORD_COUNT, total),
        Metric::batch(MALFORMED_RECORDS, batch.malformed as f64),
    ];

    for record in records {
        let record_ref = record.record_ref();
        metrics.push(Metric::record(
            REQUIREMENT_COUNT,
            record.requirements.len() as f64,
            record_ref.clone(),
        ));
        metrics.push(Metric::record(
            COMPLEXITY_SCORE,
            f64::from(record.complexity_score),
            record_ref,
        ));
    }

    Ok(MetricsDocument {
        batch_id: batch.id.to_string(),
        generated_at: generated_at(batch),
        metrics,
    })
}

/// Latest resolution time, else latest posting time, else the epoch
fn generated_at(batch: &SealedBatch) -> DateTime<Utc> {
    let latest_resolved = batch.records.iter().filter_map(|r| r.resolved_at).max();
    let latest_posted = batch.records.iter().filter_map(|r| r.posted_at).max();
    latest_resolved
        .or(latest_posted)
        .unwrap_or(DateTime::<Utc>::UNIX_EPOCH)
}
