//! Merge a summary with its detail outcome
//!
//! Pure and deterministic: identity fields come from the summary, detail
//! fields are added on top, and the job profile is derived from both.

use jobstream_common::types::{EnrichedJobRecord, JobDetailRecord, JobSummaryRecord};

use crate::error::MergeError;
use crate::profile::JobProfile;

/// Reject summaries that cannot identify a job
pub fn validate(summary: &JobSummaryRecord) -> Result<(), MergeError> {
    if summary.title.trim().is_empty() {
        return Err(MergeError::MalformedRecord {
            ingest_seq: summary.ingest_seq,
            reason: "title is empty".to_string(),
        });
    }
    Ok(())
}

pub fn merge(
    summary: &JobSummaryRecord,
    detail: &JobDetailRecord,
) -> Result<EnrichedJobRecord, MergeError> {
    validate(summary)?;

    let profile = JobProfile::derive(&summary.title, &detail.description, &detail.requirements);

    Ok(EnrichedJobRecord {
        source_id: summary.source_id.clone(),
        title: summary.title.clone(),
        company: summary.company.clone(),
        location: summary.location.clone(),
        posted_at: summary.posted_at,
        detail_ref: summary.detail_ref().map(str::to_string),
        ingest_seq: summary.ingest_seq,

        description: detail.description.clone(),
        requirements: detail.requirements.clone(),
        responsibilities: detail.responsibilities.clone(),
        resolution_status: detail.resolution_status,
        resolved_at: detail.resolved_at,
        matched_ref: detail.matched_ref.clone(),
        candidate_refs: detail.candidate_refs.clone(),
        low_confidence: detail.low_confidence,
        failure_reason: detail.failure_reason.clone(),

        category: profile.category,
        seniority_level: profile.seniority_level,
        complexity_score: profile.complexity_score,
    })
}
