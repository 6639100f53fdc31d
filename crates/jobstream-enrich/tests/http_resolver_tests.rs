//! HttpDetailResolver against a mock careers site

use std::sync::Arc;
use std::time::Duration;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use jobstream_common::types::{JobSummaryRecord, ResolutionStatus};
use jobstream_enrich::config::ResolverConfig;
use jobstream_enrich::correlate::{CorrelationEngine, DetailPool, Normalizer};
use jobstream_enrich::error::ResolverError;
use jobstream_enrich::resolver::{DetailRequest, DetailResolver, HttpDetailResolver};
use jobstream_enrich::retry::RetryPolicy;

const PAGE: &str = r#"
<html><body>
  <h1>Senior Rust Engineer</h1>
  <p>Join the platform team.</p>
  <div class="careers-text-block__desc">
    <ul><li>Design streaming services</li></ul>
  </div>
  <div class="career-text-block__wrp--data--requirements">
    <ul><li>5+ years of experience</li><li>Async Rust</li></ul>
  </div>
</body></html>
"#;

fn config(server: &MockServer) -> ResolverConfig {
    ResolverConfig {
        base_url: format!("{}/positions/", server.uri()),
        timeout: Duration::from_secs(5),
        retry: RetryPolicy::new(3, Duration::from_millis(10), Duration::from_millis(50)),
        rate_limit: Duration::ZERO,
        concurrency: 2,
        user_agent: "jobstream-enrich-test".to_string(),
    }
}

fn engine(config: &ResolverConfig) -> CorrelationEngine {
    CorrelationEngine::new(
        Arc::new(HttpDetailResolver::new(config).unwrap()),
        Arc::new(DetailPool::empty()),
        Arc::new(Normalizer::default()),
        config.retry,
        config.timeout,
    )
}

fn summary(title: &str, detail_ref: Option<String>) -> JobSummaryRecord {
    JobSummaryRecord {
        source_id: "42".to_string(),
        title: title.to_string(),
        company: "Acme".to_string(),
        location: "Remote".to_string(),
        posted_at: None,
        detail_ref,
        ingest_seq: 0,
    }
}

#[tokio::test]
async fn test_fetches_and_parses_detail_page() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/positions/senior-rust-engineer/"))
        .respond_with(ResponseTemplate::new(200).set_body_string(PAGE))
        .expect(1)
        .mount(&server)
        .await;

    let resolver = HttpDetailResolver::new(&config(&server)).unwrap();
    let detail = resolver
        .resolve(&DetailRequest::by_hints("Senior Rust Engineer", "Acme"))
        .await
        .unwrap();

    assert_eq!(detail.reference, format!("{}/positions/senior-rust-engineer/", server.uri()));
    assert_eq!(detail.title, "Senior Rust Engineer");
    assert_eq!(detail.requirements, vec!["5+ years of experience", "Async Rust"]);
    assert_eq!(detail.responsibilities, vec!["Design streaming services"]);
    assert!(detail.description.contains("Join the platform team."));
}

#[tokio::test]
async fn test_missing_page_is_not_found_without_retry() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/jobs/gone/"))
        .respond_with(ResponseTemplate::new(404))
        .expect(1)
        .mount(&server)
        .await;

    let config = config(&server);
    let resolver = HttpDetailResolver::new(&config).unwrap();
    let err = resolver
        .resolve(&DetailRequest::by_reference(format!("{}/jobs/gone/", server.uri()), "Gone", "Acme"))
        .await
        .unwrap_err();
    assert!(matches!(err, ResolverError::NotFound(_)));

    let detail = engine(&config)
        .correlate(&summary("Gone", Some(format!("{}/jobs/gone/", server.uri()))))
        .await;
    assert_eq!(detail.resolution_status, ResolutionStatus::NotFound);
    assert_eq!(detail.attempts, 1);
}

#[tokio::test]
async fn test_server_errors_are_retried_until_success() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/jobs/7/"))
        .respond_with(ResponseTemplate::new(503))
        .up_to_n_times(2)
        .expect(2)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/jobs/7/"))
        .respond_with(ResponseTemplate::new(200).set_body_string(PAGE))
        .expect(1)
        .mount(&server)
        .await;

    let config = config(&server);
    let detail = engine(&config)
        .correlate(&summary("Senior Rust Engineer", Some(format!("{}/jobs/7/", server.uri()))))
        .await;

    assert_eq!(detail.resolution_status, ResolutionStatus::Resolved);
    assert_eq!(detail.attempts, 3);
    assert_eq!(detail.requirements.len(), 2);
}

#[tokio::test]
async fn test_slow_server_times_out() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/jobs/slow/"))
        .respond_with(ResponseTemplate::new(200).set_delay(Duration::from_secs(2)))
        .mount(&server)
        .await;

    let mut config = config(&server);
    config.timeout = Duration::from_millis(200);
    let resolver = HttpDetailResolver::new(&config).unwrap();

    let err = resolver
        .resolve(&DetailRequest::by_reference(format!("{}/jobs/slow/", server.uri()), "Slow", "Acme"))
        .await
        .unwrap_err();
    assert!(err.is_transient());
}
