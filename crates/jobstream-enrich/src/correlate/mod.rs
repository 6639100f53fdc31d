//! Correlation engine: one detail outcome per summary
//!
//! Resolution order:
//!
//! 1. A summary with a `detail_ref` is resolved directly; the link is
//!    authoritative and no matching happens.
//! 2. Otherwise the normalized key is looked up in the detail pool. One hit
//!    resolves. Several distinct hits make the record `Ambiguous`: every
//!    candidate is kept and the best-ranked one is only a suggestion.
//! 3. With no pool hit the resolver is asked to derive the page from the
//!    title and company.
//!
//! Resolver calls are bounded by a timeout and retried with backoff while the
//! error is transient. The engine never fails: callers branch on the status.

pub mod normalize;
pub mod pool;

use std::cmp::Reverse;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, instrument, warn};

use jobstream_common::types::{JobDetailRecord, JobSummaryRecord};

use crate::error::ResolverError;
use crate::resolver::{DetailRequest, DetailResolver};
use crate::retry::{retry_with_backoff, RetryPolicy};

pub use normalize::{NormalizedKey, Normalizer, DEFAULT_NOISE_TOKENS};
pub use pool::{DetailCandidate, DetailPool};

#[derive(Clone)]
pub struct CorrelationEngine {
    resolver: Arc<dyn DetailResolver>,
    pool: Arc<DetailPool>,
    normalizer: Arc<Normalizer>,
    retry: RetryPolicy,
    timeout: Duration,
}

impl CorrelationEngine {
    pub fn new(
        resolver: Arc<dyn DetailResolver>,
        pool: Arc<DetailPool>,
        normalizer: Arc<Normalizer>,
        retry: RetryPolicy,
        timeout: Duration,
    ) -> Self {
        Self {
            resolver,
            pool,
            normalizer,
            retry,
            timeout,
        }
    }

    pub fn normalizer(&self) -> &Normalizer {
        &self.normalizer
    }

    #[instrument(skip_all, fields(seq = summary.ingest_seq))]
    pub async fn correlate(&self, summary: &JobSummaryRecord) -> JobDetailRecord {
        if let Some(reference) = summary.detail_ref() {
            let request = DetailRequest::by_reference(reference, &summary.title, &summary.company);
            return self.resolve_remote(request).await;
        }

        let key = self
            .normalizer
            .key(&summary.title, &summary.company, &summary.location);
        let candidates = self.pool.lookup(&key);

        match candidates {
            [] => {
                debug!(title = %key.title, "No pool match, deriving detail page from title");
                self.resolve_remote(DetailRequest::by_hints(&summary.title, &summary.company))
                    .await
            },
            [only] => JobDetailRecord::resolved(
                Some(only.reference.clone()),
                only.description.clone(),
                only.requirements.clone(),
                only.responsibilities.clone(),
                only.resolved_at(),
                0,
            ),
            many => {
                let ranked = rank_candidates(&summary.title, many);
                let detail = JobDetailRecord::ambiguous(ranked);
                warn!(
                    title = %summary.title,
                    candidates = detail.candidate_refs.len(),
                    suggested = ?detail.matched_ref,
                    "Ambiguous match, suggestion is low confidence"
                );
                detail
            },
        }
    }

    async fn resolve_remote(&self, request: DetailRequest) -> JobDetailRecord {
        let resolver = &self.resolver;
        let request = &request;
        let timeout = self.timeout;

        let outcome = retry_with_backoff(
            &self.retry,
            "resolve_detail",
            ResolverError::is_transient,
            move |_| async move {
                match tokio::time::timeout(timeout, resolver.resolve(request)).await {
                    Ok(result) => result,
                    Err(_) => Err(ResolverError::Timeout(timeout)),
                }
            },
        )
        .await;

        match outcome.result {
            Ok(detail) => JobDetailRecord::resolved(
                Some(detail.reference),
                detail.description,
                detail.requirements,
                detail.responsibilities,
                detail.fetched_at,
                outcome.attempts,
            ),
            Err(ResolverError::NotFound(reason)) => {
                debug!(reason = %reason, "Detail page not found");
                JobDetailRecord::not_found(reason, outcome.attempts)
            },
            Err(err) => {
                warn!(attempts = outcome.attempts, error = %err, "Giving up on detail resolution");
                JobDetailRecord::failed(err.to_string(), outcome.attempts)
            },
        }
    }
}

/// Order colliding candidates: closest raw title first, then most recently
/// posted, then by reference so the order is total.
pub fn rank_candidates(title: &str, candidates: &[DetailCandidate]) -> Vec<String> {
    let mut ranked: Vec<&DetailCandidate> = candidates.iter().collect();
    ranked.sort_by_key(|c| {
        (
            strsim::levenshtein(title, &c.title),
            Reverse(c.posted_at),
            c.reference.as_str(),
        )
    });
    ranked.into_iter().map(|c| c.reference.clone()).collect()
}
