//! Correlation outcomes for pool matches, collisions and flaky resolvers

mod common;

use std::sync::Arc;

use common::{candidate, engine, fetched_at, pool, summary, Script, ScriptedResolver};
use jobstream_common::types::ResolutionStatus;

#[tokio::test]
async fn test_discipline_word_keeps_roles_distinct() {
    let resolver = Arc::new(ScriptedResolver::new());
    let engine = engine(
        resolver.clone(),
        pool(vec![
            candidate("https://acme/jobs/software-engineer/", "Software Engineer"),
            candidate("https://acme/jobs/software-engineer-backend/", "Software Engineer - Backend"),
        ]),
    );

    let detail = engine.correlate(&summary("Software Engineer", None)).await;

    assert_eq!(detail.resolution_status, ResolutionStatus::Resolved);
    assert_eq!(detail.matched_ref.as_deref(), Some("https://acme/jobs/software-engineer/"));
    assert!(detail.candidate_refs.is_empty());
    assert!(!detail.low_confidence);
    assert_eq!(detail.description, "About the Software Engineer role");
    assert_eq!(resolver.total_calls(), 0);
}

#[tokio::test]
async fn test_identical_keys_are_ambiguous() {
    let resolver = Arc::new(ScriptedResolver::new());
    let engine = engine(
        resolver.clone(),
        pool(vec![
            candidate("https://acme/jobs/b/", "Software Engineer (Remote)"),
            candidate("https://acme/jobs/a/", "Senior Software Engineer"),
        ]),
    );

    let detail = engine.correlate(&summary("Software Engineer", None)).await;

    assert_eq!(detail.resolution_status, ResolutionStatus::Ambiguous);
    assert_eq!(detail.candidate_refs, vec!["https://acme/jobs/a/", "https://acme/jobs/b/"]);
    assert_eq!(detail.matched_ref.as_deref(), Some("https://acme/jobs/a/"));
    assert!(detail.low_confidence);
    assert!(detail.description.is_empty());
    assert_eq!(resolver.total_calls(), 0);
}

#[tokio::test]
async fn test_matching_is_deterministic() {
    let engine = engine(
        Arc::new(ScriptedResolver::new()),
        pool(vec![
            candidate("https://acme/jobs/x/", "Data Engineer"),
            candidate("https://acme/jobs/y/", "Data Engineer, Remote"),
            candidate("https://acme/jobs/z/", "Jr Data Engineer"),
        ]),
    );

    let first = engine.correlate(&summary("Data Engineer", None)).await;
    for _ in 0..5 {
        assert_eq!(engine.correlate(&summary("Data Engineer", None)).await, first);
    }
}

#[tokio::test(start_paused = true)]
async fn test_three_timeouts_then_success() {
    let reference = "https://acme/jobs/flaky/";
    let resolver = Arc::new(ScriptedResolver::new().script(reference, Script::SlowThenOk(3)));
    let engine = engine(resolver.clone(), Arc::new(Default::default()));

    let detail = engine.correlate(&summary("Backend Engineer", Some(reference))).await;

    assert_eq!(detail.resolution_status, ResolutionStatus::Resolved);
    assert_eq!(detail.attempts, 4);
    assert_eq!(resolver.calls(reference), 4);
    assert_eq!(detail.resolved_at, Some(fetched_at()));
}

#[tokio::test(start_paused = true)]
async fn test_four_timeouts_exhaust_retries() {
    let reference = "https://acme/jobs/dead/";
    let resolver = Arc::new(ScriptedResolver::new().script(reference, Script::SlowThenOk(4)));
    let engine = engine(resolver.clone(), Arc::new(Default::default()));

    let detail = engine.correlate(&summary("Backend Engineer", Some(reference))).await;

    assert_eq!(detail.resolution_status, ResolutionStatus::Failed);
    assert_eq!(resolver.calls(reference), 4);
    assert!(detail.failure_reason.is_some());
}
