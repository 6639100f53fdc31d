//! Pipeline configuration
//!
//! Loaded from the environment (after reading `.env`) with the defaults below.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use crate::correlate::normalize::DEFAULT_NOISE_TOKENS;
use crate::retry::RetryPolicy;

// ============================================================================
// Configuration Constants
// ============================================================================

/// Default directory holding the partition logs.
pub const DEFAULT_STREAM_DIR: &str = "./data/stream";

/// Default partitions consumed by `run`.
pub const DEFAULT_PARTITIONS: &str = "0";

/// Default interval between polls of an exhausted partition in follow mode.
pub const DEFAULT_POLL_INTERVAL_MS: u64 = 500;

/// Default time without new records before the open batch is sealed early.
pub const DEFAULT_IDLE_TIMEOUT_SECS: u64 = 30;

/// Default capacity of the bounded queue between reader and resolution stage.
pub const DEFAULT_CHANNEL_CAPACITY: usize = 256;

/// Default number of records fetched from the log per poll.
pub const DEFAULT_FETCH_SIZE: usize = 100;

/// Default number of enriched records that seals a batch.
pub const DEFAULT_BATCH_MAX_RECORDS: usize = 500;

/// Default batch time window in seconds.
pub const DEFAULT_BATCH_WINDOW_SECS: u64 = 300;

/// Default base URL used to derive a detail page from a title.
pub const DEFAULT_RESOLVER_BASE_URL: &str = "http://localhost:8080/positions/";

/// Default per-call resolver timeout in seconds.
pub const DEFAULT_RESOLVER_TIMEOUT_SECS: u64 = 30;

/// Default resolver retries after the first attempt.
pub const DEFAULT_RESOLVER_MAX_RETRIES: u32 = 3;

/// Default first resolver backoff in seconds.
pub const DEFAULT_RESOLVER_BACKOFF_BASE_SECS: u64 = 2;

/// Default resolver backoff ceiling in seconds.
pub const DEFAULT_RESOLVER_BACKOFF_MAX_SECS: u64 = 10;

/// Default politeness delay before each detail page request, in milliseconds.
pub const DEFAULT_RESOLVER_RATE_LIMIT_MS: u64 = 1000;

/// Default number of concurrent resolver calls per partition.
pub const DEFAULT_RESOLVER_CONCURRENCY: usize = 4;

/// Default User-Agent sent with detail page requests.
pub const DEFAULT_RESOLVER_USER_AGENT: &str = "jobstream-enrich/0.1";

/// Default write retries after the first attempt.
pub const DEFAULT_WRITER_MAX_RETRIES: u32 = 3;

/// Default first write backoff in milliseconds.
pub const DEFAULT_WRITER_BACKOFF_BASE_MS: u64 = 500;

/// Default write backoff ceiling in seconds.
pub const DEFAULT_WRITER_BACKOFF_MAX_SECS: u64 = 10;

/// Default timeout for writing one batch's artifacts, in seconds.
pub const DEFAULT_WRITER_TIMEOUT_SECS: u64 = 60;

/// Default root of the local object store.
pub const DEFAULT_STORAGE_ROOT: &str = "./data/output";

/// Default key prefix for batch artifacts.
pub const DEFAULT_STORAGE_PREFIX: &str = "enriched";

/// Default directory for checkpoint documents.
pub const DEFAULT_CHECKPOINT_DIR: &str = "./data/checkpoints";

/// Complete configuration of an enrichment run
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineConfig {
    pub stream: StreamConfig,
    pub batch: BatchConfig,
    pub resolver: ResolverConfig,
    pub correlation: CorrelationConfig,
    pub writer: WriterConfig,
    pub storage: StorageConfig,
    pub checkpoint: CheckpointConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StreamConfig {
    pub dir: PathBuf,
    pub partitions: Vec<u32>,
    /// Keep polling after the log is exhausted instead of finishing the run
    pub follow: bool,
    pub poll_interval: Duration,
    pub idle_timeout: Duration,
    pub channel_capacity: usize,
    pub fetch_size: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BatchConfig {
    pub max_records: usize,
    pub window: Duration,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResolverConfig {
    pub base_url: String,
    pub timeout: Duration,
    pub retry: RetryPolicy,
    pub rate_limit: Duration,
    pub concurrency: usize,
    pub user_agent: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CorrelationConfig {
    pub noise_tokens: Vec<String>,
    /// Optional JSON-lines feed of known detail records
    pub detail_pool: Option<PathBuf>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WriterConfig {
    pub retry: RetryPolicy,
    pub timeout: Duration,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    pub backend: StorageBackend,
    pub prefix: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum StorageBackend {
    Local { root: PathBuf },
    S3(S3Config),
}

/// S3-compatible bucket settings (AWS or MinIO)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct S3Config {
    pub endpoint: Option<String>,
    pub region: String,
    pub bucket: String,
    pub access_key: String,
    pub secret_key: String,
    pub path_style: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CheckpointConfig {
    pub dir: PathBuf,
}

impl PipelineConfig {
    /// Load configuration from `.env`, the environment, and defaults
    pub fn from_env() -> anyhow::Result<Self> {
        dotenvy::dotenv().ok();

        let backend = match env_string("STORAGE_BACKEND", "local").as_str() {
            "local" => StorageBackend::Local {
                root: PathBuf::from(env_string("STORAGE_ROOT", DEFAULT_STORAGE_ROOT)),
            },
            "s3" => StorageBackend::S3(S3Config::from_env()),
            other => anyhow::bail!("Unknown STORAGE_BACKEND '{}' (expected local or s3)", other),
        };

        let config = Self {
            stream: StreamConfig {
                dir: PathBuf::from(env_string("STREAM_DIR", DEFAULT_STREAM_DIR)),
                partitions: parse_partitions(&env_string("STREAM_PARTITIONS", DEFAULT_PARTITIONS))?,
                follow: env_parse("STREAM_FOLLOW", false),
                poll_interval: Duration::from_millis(env_parse(
                    "STREAM_POLL_INTERVAL_MS",
                    DEFAULT_POLL_INTERVAL_MS,
                )),
                idle_timeout: Duration::from_secs(env_parse(
                    "STREAM_IDLE_TIMEOUT_SECS",
                    DEFAULT_IDLE_TIMEOUT_SECS,
                )),
                channel_capacity: env_parse("STREAM_CHANNEL_CAPACITY", DEFAULT_CHANNEL_CAPACITY),
                fetch_size: env_parse("STREAM_FETCH_SIZE", DEFAULT_FETCH_SIZE),
            },
            batch: BatchConfig {
                max_records: env_parse("BATCH_MAX_RECORDS", DEFAULT_BATCH_MAX_RECORDS),
                window: Duration::from_secs(env_parse("BATCH_WINDOW_SECS", DEFAULT_BATCH_WINDOW_SECS)),
            },
            resolver: ResolverConfig {
                base_url: env_string("RESOLVER_BASE_URL", DEFAULT_RESOLVER_BASE_URL),
                timeout: Duration::from_secs(env_parse(
                    "RESOLVER_TIMEOUT_SECS",
                    DEFAULT_RESOLVER_TIMEOUT_SECS,
                )),
                retry: RetryPolicy::new(
                    env_parse("RESOLVER_MAX_RETRIES", DEFAULT_RESOLVER_MAX_RETRIES),
                    Duration::from_secs(env_parse(
                        "RESOLVER_BACKOFF_BASE_SECS",
                        DEFAULT_RESOLVER_BACKOFF_BASE_SECS,
                    )),
                    Duration::from_secs(env_parse(
                        "RESOLVER_BACKOFF_MAX_SECS",
                        DEFAULT_RESOLVER_BACKOFF_MAX_SECS,
                    )),
                ),
                rate_limit: Duration::from_millis(env_parse(
                    "RESOLVER_RATE_LIMIT_MS",
                    DEFAULT_RESOLVER_RATE_LIMIT_MS,
                )),
                concurrency: env_parse("RESOLVER_CONCURRENCY", DEFAULT_RESOLVER_CONCURRENCY),
                user_agent: env_string("RESOLVER_USER_AGENT", DEFAULT_RESOLVER_USER_AGENT),
            },
            correlation: CorrelationConfig {
                noise_tokens: std::env::var("CORRELATION_NOISE_TOKENS")
                    .map(|s| {
                        s.split(',')
                            .map(|t| t.trim().to_lowercase())
                            .filter(|t| !t.is_empty())
                            .collect()
                    })
                    .unwrap_or_else(|_| default_noise_tokens()),
                detail_pool: std::env::var("CORRELATION_DETAIL_POOL").ok().map(PathBuf::from),
            },
            writer: WriterConfig {
                retry: RetryPolicy::new(
                    env_parse("WRITER_MAX_RETRIES", DEFAULT_WRITER_MAX_RETRIES),
                    Duration::from_millis(env_parse(
                        "WRITER_BACKOFF_BASE_MS",
                        DEFAULT_WRITER_BACKOFF_BASE_MS,
                    )),
                    Duration::from_secs(env_parse(
                        "WRITER_BACKOFF_MAX_SECS",
                        DEFAULT_WRITER_BACKOFF_MAX_SECS,
                    )),
                ),
                timeout: Duration::from_secs(env_parse(
                    "WRITER_TIMEOUT_SECS",
                    DEFAULT_WRITER_TIMEOUT_SECS,
                )),
            },
            storage: StorageConfig {
                backend,
                prefix: env_string("STORAGE_PREFIX", DEFAULT_STORAGE_PREFIX),
            },
            checkpoint: CheckpointConfig {
                dir: PathBuf::from(env_string("CHECKPOINT_DIR", DEFAULT_CHECKPOINT_DIR)),
            },
        };

        config.validate()?;

        Ok(config)
    }

    /// Validate configuration
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.stream.partitions.is_empty() {
            anyhow::bail!("At least one partition must be configured");
        }

        if self.stream.channel_capacity == 0 {
            anyhow::bail!("Stream channel capacity must be greater than 0");
        }

        if self.stream.fetch_size == 0 {
            anyhow::bail!("Stream fetch size must be greater than 0");
        }

        if self.batch.max_records == 0 {
            anyhow::bail!("Batch max_records must be greater than 0");
        }

        if self.batch.window.is_zero() {
            anyhow::bail!("Batch window must be greater than 0");
        }

        if self.resolver.concurrency == 0 {
            anyhow::bail!("Resolver concurrency must be greater than 0");
        }

        if self.resolver.timeout.is_zero() || self.writer.timeout.is_zero() {
            anyhow::bail!("Resolver and writer timeouts must be greater than 0");
        }

        if self.resolver.retry.base_delay > self.resolver.retry.max_delay {
            anyhow::bail!(
                "Resolver backoff base ({:?}) cannot exceed its ceiling ({:?})",
                self.resolver.retry.base_delay,
                self.resolver.retry.max_delay
            );
        }

        if let StorageBackend::S3(s3) = &self.storage.backend {
            if s3.bucket.is_empty() {
                anyhow::bail!("S3 bucket cannot be empty");
            }
        }

        if self.storage.prefix.contains("..") {
            anyhow::bail!("Storage prefix cannot contain '..'");
        }

        Ok(())
    }
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            stream: StreamConfig {
                dir: PathBuf::from(DEFAULT_STREAM_DIR),
                partitions: vec![0],
                follow: false,
                poll_interval: Duration::from_millis(DEFAULT_POLL_INTERVAL_MS),
                idle_timeout: Duration::from_secs(DEFAULT_IDLE_TIMEOUT_SECS),
                channel_capacity: DEFAULT_CHANNEL_CAPACITY,
                fetch_size: DEFAULT_FETCH_SIZE,
            },
            batch: BatchConfig {
                max_records: DEFAULT_BATCH_MAX_RECORDS,
                window: Duration::from_secs(DEFAULT_BATCH_WINDOW_SECS),
            },
            resolver: ResolverConfig {
                base_url: DEFAULT_RESOLVER_BASE_URL.to_string(),
                timeout: Duration::from_secs(DEFAULT_RESOLVER_TIMEOUT_SECS),
                retry: RetryPolicy::new(
                    DEFAULT_RESOLVER_MAX_RETRIES,
                    Duration::from_secs(DEFAULT_RESOLVER_BACKOFF_BASE_SECS),
                    Duration::from_secs(DEFAULT_RESOLVER_BACKOFF_MAX_SECS),
                ),
                rate_limit: Duration::from_millis(DEFAULT_RESOLVER_RATE_LIMIT_MS),
                concurrency: DEFAULT_RESOLVER_CONCURRENCY,
                user_agent: DEFAULT_RESOLVER_USER_AGENT.to_string(),
            },
            correlation: CorrelationConfig {
                noise_tokens: default_noise_tokens(),
                detail_pool: None,
            },
            writer: WriterConfig {
                retry: RetryPolicy::new(
                    DEFAULT_WRITER_MAX_RETRIES,
                    Duration::from_millis(DEFAULT_WRITER_BACKOFF_BASE_MS),
                    Duration::from_secs(DEFAULT_WRITER_BACKOFF_MAX_SECS),
                ),
                timeout: Duration::from_secs(DEFAULT_WRITER_TIMEOUT_SECS),
            },
            storage: StorageConfig {
                backend: StorageBackend::Local {
                    root: PathBuf::from(DEFAULT_STORAGE_ROOT),
                },
                prefix: DEFAULT_STORAGE_PREFIX.to_string(),
            },
            checkpoint: CheckpointConfig {
                dir: PathBuf::from(DEFAULT_CHECKPOINT_DIR),
            },
        }
    }
}

impl S3Config {
    pub fn from_env() -> Self {
        Self {
            endpoint: std::env::var("S3_ENDPOINT").ok(),
            region: env_string("S3_REGION", "us-east-1"),
            bucket: env_string("S3_BUCKET", "jobstream-data"),
            access_key: std::env::var("S3_ACCESS_KEY")
                .or_else(|_| std::env::var("AWS_ACCESS_KEY_ID"))
                .unwrap_or_else(|_| "minioadmin".to_string()),
            secret_key: std::env::var("S3_SECRET_KEY")
                .or_else(|_| std::env::var("AWS_SECRET_ACCESS_KEY"))
                .unwrap_or_else(|_| "minioadmin".to_string()),
            path_style: env_parse("S3_PATH_STYLE", false),
        }
    }

    pub fn for_minio(endpoint: impl Into<String>, bucket: impl Into<String>) -> Self {
        Self {
            endpoint: Some(endpoint.into()),
            region: "us-east-1".to_string(),
            bucket: bucket.into(),
            access_key: "minioadmin".to_string(),
            secret_key: "minioadmin".to_string(),
            path_style: true,
        }
    }
}

/// Parse a comma-separated partition list such as `0,1,3`
pub fn parse_partitions(value: &str) -> anyhow::Result<Vec<u32>> {
    let mut partitions = Vec::new();
    for part in value.split(',').map(str::trim).filter(|p| !p.is_empty()) {
        let partition: u32 = part
            .parse()
            .map_err(|_| anyhow::anyhow!("Invalid partition '{}'", part))?;
        if !partitions.contains(&partition) {
            partitions.push(partition);
        }
    }
    Ok(partitions)
}

fn default_noise_tokens() -> Vec<String> {
    DEFAULT_NOISE_TOKENS.iter().map(|t| t.to_string()).collect()
}

fn env_string(key: &str, default: &str) -> String {
    std::env::var(key).unwrap_or_else(|_| default.to_string())
}

fn env_parse<T: FromStr>(key: &str, default: T) -> T {
    std::env::var(key)
        .ok()
        .and_then(|s| s.parse().ok())
        .unwrap_or(default)
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_is_valid() {
        let config = PipelineConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.resolver.retry.max_attempts(), 4);
    }

    #[test]
    fn test_validate_rejects_zero_batch_size() {
        let mut config = PipelineConfig::default();
        config.batch.max_records = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validate_rejects_inverted_backoff() {
        let mut config = PipelineConfig::default();
        config.resolver.retry.base_delay = Duration::from_secs(20);
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_parse_partitions() {
        assert_eq!(parse_partitions("0, 2,2,1").unwrap(), vec![0, 2, 1]);
        assert!(parse_partitions("").unwrap().is_empty());
        assert!(parse_partitions("0,x").is_err());
    }

    #[test]
    fn test_for_minio() {
        let s3 = S3Config::for_minio("http://localhost:9000", "test-bucket");
        assert_eq!(s3.endpoint.as_deref(), Some("http://localhost:9000"));
        assert!(s3.path_style);
    }
}
