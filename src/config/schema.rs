//! Configuration schema definitions.
//!
//! This module defines the complete configuration structure for the client.
//! All types derive Serde traits for deserialization from config files.

use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Root configuration for the document-store client.
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
#[serde(default)]
pub struct ClientConfig {
    /// HTTP transport settings (timeouts, compression, pooling).
    pub http: HttpConfig,

    /// Response cache settings.
    pub cache: CacheConfig,

    /// Replication / failover settings.
    pub replication: ReplicationConfig,

    /// Authentication retry settings.
    pub retries: RetryConfig,

    /// Lazy operation batching settings.
    pub lazy: LazyConfig,

    /// Observability settings.
    pub observability: ObservabilityConfig,
}

/// HTTP transport configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct HttpConfig {
    /// Default per-call timeout in seconds.
    pub request_timeout_secs: u64,

    /// Timeout for calls marked as long-running (bulk operations).
    pub long_request_timeout_secs: u64,

    /// Idle pooled connections kept per host.
    pub max_idle_per_host: usize,

    /// Never gzip request bodies.
    pub disable_request_compression: bool,

    /// Ask the server to evaluate multi-get sub-requests in parallel.
    pub use_parallel_multi_get: bool,
}

impl HttpConfig {
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    pub fn long_request_timeout(&self) -> Duration {
        Duration::from_secs(self.long_request_timeout_secs)
    }
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            request_timeout_secs: 100,
            long_request_timeout_secs: 6 * 3600,
            max_idle_per_host: 10,
            disable_request_compression: false,
            use_parallel_multi_get: false,
        }
    }
}

/// Response cache configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct CacheConfig {
    /// Maximum number of cached responses before LRU eviction.
    pub max_entries: usize,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self { max_entries: 2048 }
    }
}

/// How the client is allowed to use replicas when the primary fails.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum FailoverBehavior {
    /// Never fail over; every call goes to the primary.
    FailImmediately,
    /// Reads may go to replicas, writes fail on the primary only.
    #[default]
    AllowReadsFromSecondaries,
    /// Reads and writes may both go to replicas.
    AllowReadsFromSecondariesAndWritesToSecondaries,
}

/// A statically configured replica.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq, Eq)]
pub struct DestinationConfig {
    /// Server URL of the replica.
    pub url: String,

    /// Database on that server, appended as `/databases/<name>`.
    #[serde(default)]
    pub database: Option<String>,

    /// Accept writes on this replica even when the failover behavior is read-only.
    #[serde(default)]
    pub allow_writes: bool,
}

/// Replication and failover configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ReplicationConfig {
    pub failover_behavior: FailoverBehavior,

    /// Spread reads across the primary and every replica.
    pub read_from_all_servers: bool,

    /// Seconds before a failing destination is probed again.
    pub reprobe_interval_secs: u64,

    /// Minimum seconds between two topology downloads.
    pub topology_refresh_secs: u64,

    /// Directory for the persisted topology; persistence is off when unset.
    pub local_cache_dir: Option<PathBuf>,

    /// Replicas in priority order.
    pub destinations: Vec<DestinationConfig>,
}

impl ReplicationConfig {
    pub fn reprobe_interval(&self) -> Duration {
        Duration::from_secs(self.reprobe_interval_secs)
    }

    pub fn topology_refresh(&self) -> Duration {
        Duration::from_secs(self.topology_refresh_secs)
    }
}

impl Default for ReplicationConfig {
    fn default() -> Self {
        Self {
            failover_behavior: FailoverBehavior::default(),
            read_from_all_servers: false,
            reprobe_interval_secs: 300,
            topology_refresh_secs: 300,
            local_cache_dir: None,
            destinations: Vec::new(),
        }
    }
}

/// Authentication retry configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct RetryConfig {
    /// Total attempts per logical call, the first one included.
    pub max_attempts: u32,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self { max_attempts: 3 }
    }
}

/// Lazy operation configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct LazyConfig {
    /// Individual re-executions allowed for an operation that asks for a retry.
    pub max_individual_retries: u32,
}

impl Default for LazyConfig {
    fn default() -> Self {
        Self {
            max_individual_retries: 1,
        }
    }
}

/// Observability configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ObservabilityConfig {
    /// Log level (trace, debug, info, warn, error).
    pub log_level: String,

    /// Emit JSON log lines instead of the human-readable format.
    pub json: bool,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            json: false,
        }
    }
}
