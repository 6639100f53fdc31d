//! End-to-end behaviour of the enrichment pipeline over in-memory seams

mod common;

use bytes::Bytes;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

use common::{candidate, pool, settings, summary, CrashingCheckpointStore, Harness, Script, ScriptedResolver, PREFIX};
use jobstream_common::types::{BatchId, ResolutionStatus};
use jobstream_enrich::checkpoint::CheckpointStore;
use jobstream_enrich::correlate::DetailPool;
use jobstream_enrich::error::{PipelineError, WriteError};
use jobstream_enrich::metrics::{AMBIGUOUS_RATE, FAILED_RATE, RECORD_COUNT, RESOLUTION_RATE};
use jobstream_enrich::writer::{BatchReader, ObjectStore};

fn empty_pool() -> Arc<DetailPool> {
    Arc::new(DetailPool::empty())
}

async fn snapshot(harness: &Harness) -> Vec<(String, Bytes)> {
    let mut objects = Vec::new();
    for key in harness.store.keys() {
        let data = harness.store.get(&key).await.unwrap().unwrap();
        objects.push((key, data));
    }
    objects
}

#[tokio::test(start_paused = true)]
async fn test_resolution_rate_over_mixed_batch() {
    let harness = Harness::new(ScriptedResolver::new().script("https://acme/jobs/down/", Script::Unavailable));

    let mut summaries = Vec::new();
    for i in 0..7 {
        summaries.push(summary("Platform Engineer", Some(&format!("https://acme/jobs/{i}/"))));
    }
    summaries.insert(3, summary("Data Engineer", None));
    summaries.insert(6, summary("Data Engineer", None));
    summaries.push(summary("Site Reliability Engineer", Some("https://acme/jobs/down/")));
    harness.log.append(0, summaries);

    let pool = pool(vec![
        candidate("https://acme/jobs/de-1/", "Data Engineer"),
        candidate("https://acme/jobs/de-2/", "Senior Data Engineer"),
    ]);
    let report = harness
        .service(pool, settings(10, false))
        .pipeline(0)
        .run(CancellationToken::new())
        .await
        .unwrap();
    assert_eq!(report.batches_committed, 1);
    assert_eq!(report.records_written, 10);

    let reader = BatchReader::new(harness.store.clone(), PREFIX);
    let ids = reader.list_durable(0).await.unwrap();
    let batch = reader.load(&ids[0]).await.unwrap().unwrap();

    assert_eq!(batch.metrics.batch_metric(RESOLUTION_RATE), Some(0.7));
    assert_eq!(batch.metrics.batch_metric(AMBIGUOUS_RATE), Some(0.2));
    assert_eq!(batch.metrics.batch_metric(FAILED_RATE), Some(0.1));
    assert_eq!(batch.metrics.batch_metric(RECORD_COUNT), Some(10.0));

    let ambiguous = &batch.records[3];
    assert_eq!(ambiguous.resolution_status, ResolutionStatus::Ambiguous);
    assert_eq!(
        ambiguous.candidate_refs,
        vec!["https://acme/jobs/de-1/", "https://acme/jobs/de-2/"]
    );
    assert!(ambiguous.low_confidence);

    // The outage is retried to exhaustion: first attempt plus three retries
    assert_eq!(harness.resolver.calls("https://acme/jobs/down/"), 4);
    assert_eq!(batch.records[9].resolution_status, ResolutionStatus::Failed);
    assert!(batch.records[9].failure_reason.is_some());
    assert_eq!(batch.records[0].failure_reason, None);
}

#[tokio::test]
async fn test_crash_before_checkpoint_rewrites_identical_artifacts() {
    let harness = Harness::new(ScriptedResolver::new());
    harness.log.append(
        0,
        (0..4).map(|i| summary("Backend Engineer", Some(&format!("https://acme/jobs/{i}/")))),
    );

    let crashing = Arc::new(CrashingCheckpointStore::new(harness.checkpoints.clone()));
    let err = harness
        .service_with_checkpoints(empty_pool(), settings(10, false), crashing)
        .pipeline(0)
        .run(CancellationToken::new())
        .await
        .unwrap_err();
    assert!(matches!(err, PipelineError::Checkpoint(_)));
    assert_eq!(harness.checkpoints.current(0).await.unwrap(), None);

    let before = snapshot(&harness).await;
    assert_eq!(before.len(), 3);

    let report = harness
        .service(empty_pool(), settings(10, false))
        .pipeline(0)
        .run(CancellationToken::new())
        .await
        .unwrap();
    assert_eq!(report.records_written, 4);
    assert_eq!(harness.checkpoints.current(0).await.unwrap(), Some(3));

    let after = snapshot(&harness).await;
    assert_eq!(after, before);
    assert_eq!(harness.store.put_count(), 6);
}

#[tokio::test]
async fn test_replay_after_crash_reuses_durable_span() {
    let harness = Harness::new(ScriptedResolver::new());
    harness.log.append(
        0,
        (0..4).map(|i| summary("Backend Engineer", Some(&format!("https://acme/jobs/{i}/")))),
    );

    let crashing = Arc::new(CrashingCheckpointStore::new(harness.checkpoints.clone()));
    harness
        .service_with_checkpoints(empty_pool(), settings(10, false), crashing)
        .pipeline(0)
        .run(CancellationToken::new())
        .await
        .unwrap_err();
    let before = snapshot(&harness).await;

    // More records land before the restart; with a smaller size limit the
    // replay would naturally seal at different boundaries
    harness.log.append(
        0,
        (4..6).map(|i| summary("Backend Engineer", Some(&format!("https://acme/jobs/{i}/")))),
    );
    let report = harness
        .service(empty_pool(), settings(2, false))
        .pipeline(0)
        .run(CancellationToken::new())
        .await
        .unwrap();
    assert_eq!(report.batches_committed, 2);
    assert_eq!(report.records_written, 6);
    assert_eq!(harness.checkpoints.current(0).await.unwrap(), Some(5));

    let reader = BatchReader::new(harness.store.clone(), PREFIX);
    let ids = reader.list_durable(0).await.unwrap();
    assert_eq!(ids, vec![BatchId::new(0, 0, 3), BatchId::new(0, 4, 5)]);

    let mut seqs = Vec::new();
    for id in &ids {
        let batch = reader.load(id).await.unwrap().unwrap();
        seqs.extend(batch.records.iter().map(|r| r.ingest_seq));
    }
    assert_eq!(seqs, (0..6).collect::<Vec<_>>());

    let after = snapshot(&harness).await;
    for object in &before {
        assert!(after.contains(object), "{} changed on replay", object.0);
    }
}

#[tokio::test(start_paused = true)]
async fn test_output_preserves_ingest_order_under_concurrency() {
    let mut resolver = ScriptedResolver::new();
    for i in 0..10u64 {
        let reference = format!("https://acme/jobs/{i}/");
        resolver = resolver.latency(&reference, Duration::from_millis((10 - i) * 100));
    }
    let harness = Harness::new(resolver);
    harness.log.append(
        0,
        (0..10).map(|i| summary("Backend Engineer", Some(&format!("https://acme/jobs/{i}/")))),
    );

    let report = harness
        .service(empty_pool(), settings(3, false))
        .pipeline(0)
        .run(CancellationToken::new())
        .await
        .unwrap();
    assert_eq!(report.batches_committed, 4);

    let reader = BatchReader::new(harness.store.clone(), PREFIX);
    let mut seqs = Vec::new();
    for id in reader.list_durable(0).await.unwrap() {
        let batch = reader.load(&id).await.unwrap().unwrap();
        assert_eq!(batch.manifest.start_seq, batch.records[0].ingest_seq);
        seqs.extend(batch.records.iter().map(|r| r.ingest_seq));
    }
    assert_eq!(seqs, (0..10).collect::<Vec<_>>());
}

#[tokio::test(start_paused = true)]
async fn test_cancel_discards_open_batch_and_keeps_checkpoint() {
    let harness = Harness::new(ScriptedResolver::new());
    harness.log.append(
        0,
        (0..3).map(|i| summary("QA Engineer", Some(&format!("https://acme/jobs/{i}/")))),
    );

    let cancel = CancellationToken::new();
    let pipeline = harness.service(empty_pool(), settings(10, true)).pipeline(0);
    let handle = tokio::spawn(pipeline.run(cancel.clone()));

    tokio::time::sleep(Duration::from_secs(5)).await;
    cancel.cancel();
    let report = handle.await.unwrap().unwrap();

    assert!(report.cancelled);
    assert_eq!(report.batches_committed, 0);
    assert_eq!(harness.checkpoints.current(0).await.unwrap(), None);
    assert!(harness.store.keys().is_empty());

    // Restart picks the same records up again
    let report = harness
        .service(empty_pool(), settings(10, false))
        .pipeline(0)
        .run(CancellationToken::new())
        .await
        .unwrap();
    assert_eq!(report.records_written, 3);
    assert_eq!(harness.checkpoints.current(0).await.unwrap(), Some(2));
}

#[tokio::test(start_paused = true)]
async fn test_window_seals_while_records_keep_arriving() {
    let harness = Harness::new(ScriptedResolver::new());
    let mut follow = settings(100, true);
    follow.batch.window = Duration::from_secs(10);

    let cancel = CancellationToken::new();
    let pipeline = harness.service(empty_pool(), follow).pipeline(0);
    let handle = tokio::spawn(pipeline.run(cancel.clone()));

    // One record every 3s: the window opened at t=0 closes at t=10 with four
    // records, the next opens at t=12 and closes at t=22
    for i in 0..8 {
        harness
            .log
            .append(0, vec![summary("Support Engineer", Some(&format!("https://acme/jobs/{i}/")))]);
        tokio::time::sleep(Duration::from_secs(3)).await;
    }
    tokio::time::sleep(Duration::from_secs(16)).await;
    cancel.cancel();
    let report = handle.await.unwrap().unwrap();

    assert!(report.cancelled);
    assert_eq!(report.batches_committed, 2);
    assert_eq!(harness.checkpoints.current(0).await.unwrap(), Some(7));
    assert_eq!(
        BatchReader::new(harness.store.clone(), PREFIX).list_durable(0).await.unwrap(),
        vec![BatchId::new(0, 0, 3), BatchId::new(0, 4, 7)]
    );
}

#[tokio::test(start_paused = true)]
async fn test_idle_partition_seals_open_batch_in_follow_mode() {
    let harness = Harness::new(ScriptedResolver::new());
    harness.log.append(
        0,
        (0..3).map(|i| summary("Data Analyst", Some(&format!("https://acme/jobs/{i}/")))),
    );

    let cancel = CancellationToken::new();
    let pipeline = harness.service(empty_pool(), settings(10, true)).pipeline(0);
    let handle = tokio::spawn(pipeline.run(cancel.clone()));

    // Idle timeout is 60s, the batch window 300s
    tokio::time::sleep(Duration::from_secs(30)).await;
    assert_eq!(harness.checkpoints.current(0).await.unwrap(), None);
    tokio::time::sleep(Duration::from_secs(40)).await;
    assert_eq!(harness.checkpoints.current(0).await.unwrap(), Some(2));

    // Activity re-arms the idle seal
    harness.log.append(0, vec![summary("Data Analyst", Some("https://acme/jobs/3/"))]);
    tokio::time::sleep(Duration::from_secs(70)).await;
    cancel.cancel();
    let report = handle.await.unwrap().unwrap();

    assert_eq!(report.batches_committed, 2);
    assert_eq!(report.last_checkpoint, Some(3));
    assert_eq!(
        BatchReader::new(harness.store.clone(), PREFIX).list_durable(0).await.unwrap(),
        vec![BatchId::new(0, 0, 2), BatchId::new(0, 3, 3)]
    );
}

#[tokio::test(start_paused = true)]
async fn test_cancel_aborts_in_flight_resolver_call() {
    let harness = Harness::new(ScriptedResolver::new().script("https://acme/jobs/slow/", Script::SlowThenOk(10)));
    harness.log.append(
        0,
        vec![
            summary("Frontend Engineer", Some("https://acme/jobs/0/")),
            summary("Frontend Engineer", Some("https://acme/jobs/slow/")),
        ],
    );

    let cancel = CancellationToken::new();
    let pipeline = harness.service(empty_pool(), settings(10, true)).pipeline(0);
    let handle = tokio::spawn(pipeline.run(cancel.clone()));

    // The slow call is pending well inside its 5s attempt timeout
    tokio::time::sleep(Duration::from_secs(1)).await;
    assert_eq!(harness.resolver.calls("https://acme/jobs/slow/"), 1);

    let cancelled_at = tokio::time::Instant::now();
    cancel.cancel();
    let report = tokio::time::timeout(Duration::from_millis(100), handle)
        .await
        .expect("pipeline did not stop promptly")
        .unwrap()
        .unwrap();

    assert!(report.cancelled);
    assert!(cancelled_at.elapsed() < Duration::from_millis(100));
    assert_eq!(harness.resolver.calls("https://acme/jobs/slow/"), 1);
    assert_eq!(report.batches_committed, 0);
    assert_eq!(harness.checkpoints.current(0).await.unwrap(), None);
    assert!(harness.store.keys().is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_write_exhaustion_withholds_checkpoint() {
    let harness = Harness::new(ScriptedResolver::new());
    harness.log.append(
        0,
        (0..2).map(|i| summary("Designer", Some(&format!("https://acme/jobs/{i}/")))),
    );
    harness.store.fail_next_puts(1_000);

    let err = harness
        .service(empty_pool(), settings(10, false))
        .pipeline(0)
        .run(CancellationToken::new())
        .await
        .unwrap_err();

    match err {
        PipelineError::WriteFatal { batch_id, source } => {
            assert_eq!((batch_id.start_seq, batch_id.end_seq), (0, 1));
            assert!(matches!(source, WriteError::Exhausted { attempts: 3, .. }));
        },
        other => panic!("unexpected error: {other}"),
    }
    assert_eq!(harness.checkpoints.current(0).await.unwrap(), None);
    assert!(BatchReader::new(harness.store.clone(), PREFIX)
        .list_durable(0)
        .await
        .unwrap()
        .is_empty());
}

#[tokio::test]
async fn test_undecodable_positions_are_counted_not_fatal() {
    let harness = Harness::new(ScriptedResolver::new());
    harness.log.append(0, vec![summary("Data Analyst", Some("https://acme/jobs/0/"))]);
    harness.log.append_undecodable(0, "expected value at line 1 column 1");
    harness.log.append(0, vec![summary("Data Analyst", Some("https://acme/jobs/2/"))]);

    let report = harness
        .service(empty_pool(), settings(10, false))
        .pipeline(0)
        .run(CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(report.records_written, 2);
    assert_eq!(report.malformed_dropped, 1);
    assert_eq!(report.last_checkpoint, Some(2));
}

#[tokio::test]
async fn test_partitions_run_independently() {
    let harness = Harness::new(ScriptedResolver::new().script("https://acme/jobs/p1/", Script::NotFound));
    harness.log.append(0, vec![summary("Engineer", Some("https://acme/jobs/p0/"))]);
    harness.log.append(1, vec![summary("Engineer", Some("https://acme/jobs/p1/"))]);

    let results = harness
        .service(empty_pool(), settings(10, false))
        .run(&[1, 0], CancellationToken::new())
        .await;

    let reports: Vec<_> = results.into_iter().map(|r| r.unwrap()).collect();
    assert_eq!(reports.iter().map(|r| r.partition).collect::<Vec<_>>(), vec![0, 1]);
    assert_eq!(harness.checkpoints.current(0).await.unwrap(), Some(0));
    assert_eq!(harness.checkpoints.current(1).await.unwrap(), Some(0));

    let reader = BatchReader::new(harness.store.clone(), PREFIX);
    let id = reader.list_durable(1).await.unwrap()[0];
    let batch = reader.load(&id).await.unwrap().unwrap();
    assert_eq!(batch.records[0].resolution_status, ResolutionStatus::NotFound);
    assert!(batch.records[0].failure_reason.is_some());
    assert_eq!(harness.resolver.calls("https://acme/jobs/p1/"), 1);
}
