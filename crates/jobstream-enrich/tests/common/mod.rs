//! Shared fixtures for jobstream-enrich integration tests
//!
//! Every seam is backed by its in-memory implementation; the resolver is
//! scripted per reference so tests control timeouts, outages and misses.

#![allow(dead_code)]

use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use jobstream_common::types::JobSummaryRecord;
use jobstream_enrich::checkpoint::{CheckpointStore, MemoryCheckpointStore};
use jobstream_enrich::config::{BatchConfig, WriterConfig};
use jobstream_enrich::correlate::{CorrelationEngine, DetailCandidate, DetailPool, Normalizer};
use jobstream_enrich::error::{CheckpointError, ResolverError};
use jobstream_enrich::pipeline::{EnrichmentService, PipelineSettings};
use jobstream_enrich::resolver::{DetailRequest, DetailResolver, ResolvedDetail};
use jobstream_enrich::retry::RetryPolicy;
use jobstream_enrich::stream::{MemoryLog, ReaderOptions};
use jobstream_enrich::writer::{BatchWriter, MemoryObjectStore};

pub const PREFIX: &str = "enriched";

pub fn fetched_at() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2026, 3, 1, 12, 0, 0).unwrap()
}

pub fn summary(title: &str, detail_ref: Option<&str>) -> JobSummaryRecord {
    JobSummaryRecord {
        source_id: String::new(),
        title: title.to_string(),
        company: "Acme".to_string(),
        location: "Berlin".to_string(),
        posted_at: None,
        detail_ref: detail_ref.map(str::to_string),
        ingest_seq: 0,
    }
}

pub fn candidate(reference: &str, title: &str) -> DetailCandidate {
    DetailCandidate {
        reference: reference.to_string(),
        title: title.to_string(),
        company: "Acme".to_string(),
        location: "Berlin".to_string(),
        posted_at: None,
        fetched_at: Some(fetched_at()),
        description: format!("About the {title} role"),
        requirements: vec!["Rust".to_string(), "SQL".to_string()],
        responsibilities: Vec::new(),
    }
}

pub fn pool(candidates: Vec<DetailCandidate>) -> Arc<DetailPool> {
    Arc::new(DetailPool::from_candidates(candidates, &Normalizer::default()))
}

/// How the scripted resolver answers a reference
#[derive(Debug, Clone)]
pub enum Script {
    /// Sleep past the engine timeout this many times, then answer
    SlowThenOk(u32),
    /// Fail with a transient error on every call
    Unavailable,
    NotFound,
}

/// Answers every reference with a deterministic page unless scripted otherwise
#[derive(Default)]
pub struct ScriptedResolver {
    scripts: HashMap<String, Script>,
    calls: Mutex<HashMap<String, u32>>,
    /// Per-reference latency, used to make completions arrive out of order
    latency: HashMap<String, Duration>,
}

impl ScriptedResolver {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn script(mut self, reference: &str, script: Script) -> Self {
        self.scripts.insert(reference.to_string(), script);
        self
    }

    pub fn latency(mut self, reference: &str, latency: Duration) -> Self {
        self.latency.insert(reference.to_string(), latency);
        self
    }

    pub fn calls(&self, reference: &str) -> u32 {
        self.calls.lock().unwrap().get(reference).copied().unwrap_or(0)
    }

    pub fn total_calls(&self) -> u32 {
        self.calls.lock().unwrap().values().sum()
    }
}

#[async_trait]
impl DetailResolver for ScriptedResolver {
    async fn resolve(&self, request: &DetailRequest) -> Result<ResolvedDetail, ResolverError> {
        let reference = request
            .reference
            .clone()
            .unwrap_or_else(|| format!("derived:{}", request.title_hint));

        let call = {
            let mut calls = self.calls.lock().unwrap();
            let count = calls.entry(reference.clone()).or_default();
            *count += 1;
            *count
        };

        if let Some(latency) = self.latency.get(&reference) {
            tokio::time::sleep(*latency).await;
        }

        match self.scripts.get(&reference) {
            Some(Script::SlowThenOk(slow)) if call <= *slow => {
                tokio::time::sleep(Duration::from_secs(3600)).await;
            },
            Some(Script::Unavailable) => {
                return Err(ResolverError::Unavailable(format!("{reference} returned 503")));
            },
            Some(Script::NotFound) => return Err(ResolverError::NotFound(reference)),
            _ => {},
        }

        Ok(ResolvedDetail {
            reference: reference.clone(),
            title: request.title_hint.clone(),
            description: format!("Senior {} building distributed systems", request.title_hint),
            requirements: vec!["5+ years of Rust".to_string(), "Kubernetes".to_string()],
            responsibilities: vec!["Own services".to_string()],
            fetched_at: fetched_at(),
        })
    }
}

/// Checkpoint store whose next `advance` fails, simulating a crash between
/// a durable write and the checkpoint update
pub struct CrashingCheckpointStore {
    inner: Arc<MemoryCheckpointStore>,
    crash_next: Mutex<bool>,
}

impl CrashingCheckpointStore {
    pub fn new(inner: Arc<MemoryCheckpointStore>) -> Self {
        Self {
            inner,
            crash_next: Mutex::new(true),
        }
    }
}

#[async_trait]
impl CheckpointStore for CrashingCheckpointStore {
    async fn current(&self, partition: u32) -> Result<Option<u64>, CheckpointError> {
        self.inner.current(partition).await
    }

    async fn advance(&self, partition: u32, position: u64) -> Result<(), CheckpointError> {
        let crash = std::mem::replace(&mut *self.crash_next.lock().unwrap(), false);
        if crash {
            return Err(CheckpointError::Io(std::io::Error::other("process killed")));
        }
        self.inner.advance(partition, position).await
    }
}

pub fn engine(resolver: Arc<dyn DetailResolver>, pool: Arc<DetailPool>) -> CorrelationEngine {
    CorrelationEngine::new(
        resolver,
        pool,
        Arc::new(Normalizer::default()),
        RetryPolicy::new(3, Duration::from_millis(100), Duration::from_secs(1)),
        Duration::from_secs(5),
    )
}

pub fn writer(store: Arc<MemoryObjectStore>, max_retries: u32) -> Arc<BatchWriter> {
    Arc::new(BatchWriter::new(
        store,
        PREFIX,
        &WriterConfig {
            retry: RetryPolicy::new(max_retries, Duration::from_millis(50), Duration::from_millis(200)),
            timeout: Duration::from_secs(10),
        },
    ))
}

pub fn settings(max_records: usize, follow: bool) -> PipelineSettings {
    PipelineSettings {
        batch: BatchConfig {
            max_records,
            window: Duration::from_secs(300),
        },
        reader: ReaderOptions {
            fetch_size: 8,
            poll_interval: Duration::from_millis(100),
            idle_timeout: Duration::from_secs(60),
            follow,
        },
        channel_capacity: 4,
        concurrency: 4,
    }
}

/// Service over in-memory parts
pub struct Harness {
    pub log: Arc<MemoryLog>,
    pub store: Arc<MemoryObjectStore>,
    pub checkpoints: Arc<MemoryCheckpointStore>,
    pub resolver: Arc<ScriptedResolver>,
}

impl Harness {
    pub fn new(resolver: ScriptedResolver) -> Self {
        Self {
            log: Arc::new(MemoryLog::new()),
            store: Arc::new(MemoryObjectStore::new()),
            checkpoints: Arc::new(MemoryCheckpointStore::new()),
            resolver: Arc::new(resolver),
        }
    }

    pub fn service(&self, pool: Arc<DetailPool>, settings: PipelineSettings) -> EnrichmentService {
        self.service_with_checkpoints(pool, settings, self.checkpoints.clone())
    }

    pub fn service_with_checkpoints(
        &self,
        pool: Arc<DetailPool>,
        settings: PipelineSettings,
        checkpoints: Arc<dyn CheckpointStore>,
    ) -> EnrichmentService {
        EnrichmentService::from_parts(
            self.log.clone(),
            engine(self.resolver.clone(), pool),
            writer(self.store.clone(), 2),
            checkpoints,
            settings,
        )
    }
}
