//! Queue Listener Configuration
//!
//! TOML-based configuration with environment variable override support.
//! Every field has a default, so an empty file (or no file) is valid.

use ql_common::{ContainerSettings, DeletionPolicy, QueueSettings, WorkerPoolSettings};
use serde::{Deserialize, Deserializer, Serialize};
use std::collections::HashSet;
use std::path::Path;
use std::time::Duration;
use thiserror::Error;

mod loader;

pub use loader::ConfigLoader;

/// SQS accepts at most 10 messages per receive call
pub const SQS_MAX_BATCH_SIZE: usize = 10;

/// Configuration error types
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    ReadError(#[from] std::io::Error),

    #[error("Failed to parse TOML: {0}")]
    ParseError(#[from] toml::de::Error),

    #[error("Invalid configuration: {0}")]
    ValidationError(String),
}

/// Root listener configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ListenerConfig {
    pub sqs: SqsConfig,
    pub container: ContainerConfig,
    pub defaults: QueueDefaults,
    pub queues: Vec<QueueConfig>,

    /// Use the in-process memory broker instead of SQS
    pub dev_mode: bool,
}

/// SQS client configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SqsConfig {
    pub region: String,
    /// Custom endpoint, e.g. LocalStack or ElasticMQ
    pub endpoint_url: Option<String>,
    /// Create queues that do not exist on first resolution
    pub auto_create_queues: bool,
}

impl Default for SqsConfig {
    fn default() -> Self {
        Self {
            region: "us-east-1".to_string(),
            endpoint_url: None,
            auto_create_queues: false,
        }
    }
}

/// Container tuning
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ContainerConfig {
    pub backoff_time_ms: u64,
    pub queue_stop_timeout_ms: u64,
    pub min_slot_wait_ms: u64,
    /// Pause after an empty receive on queues without a long-poll wait
    pub empty_poll_delay_ms: u64,
    /// Start all queues once the container is initialized
    pub auto_startup: bool,
    pub pool_shutdown_timeout_ms: u64,
    pub base_workers_per_queue: usize,
    pub max_workers: Option<usize>,
}

impl Default for ContainerConfig {
    fn default() -> Self {
        Self {
            backoff_time_ms: 10_000,
            queue_stop_timeout_ms: 10_000,
            min_slot_wait_ms: 1_000,
            empty_poll_delay_ms: 100,
            auto_startup: true,
            pool_shutdown_timeout_ms: 30_000,
            base_workers_per_queue: 2,
            max_workers: None,
        }
    }
}

/// Values applied to queues that do not override them
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct QueueDefaults {
    pub max_batch_size: usize,
    pub visibility_timeout_secs: Option<u64>,
    pub wait_time_secs: Option<u64>,
    pub deletion_policy: DeletionPolicy,
}

impl Default for QueueDefaults {
    fn default() -> Self {
        Self {
            max_batch_size: ql_common::DEFAULT_MAX_BATCH_SIZE,
            visibility_timeout_secs: None,
            wait_time_secs: None,
            deletion_policy: DeletionPolicy::OnSuccess,
        }
    }
}

/// A statically registered queue
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct QueueConfig {
    #[serde(deserialize_with = "trimmed")]
    pub name: String,
    pub max_batch_size: Option<usize>,
    pub visibility_timeout_secs: Option<u64>,
    pub wait_time_secs: Option<u64>,
    pub deletion_policy: Option<DeletionPolicy>,
    pub wake_threshold: Option<usize>,
}

impl QueueConfig {
    pub fn named(name: impl Into<String>) -> Self {
        Self {
            name: name.into().trim().to_string(),
            ..Default::default()
        }
    }
}

impl ListenerConfig {
    /// Load configuration from a TOML file
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        Self::from_toml(&content)
    }

    pub fn from_toml(content: &str) -> Result<Self, ConfigError> {
        let config: ListenerConfig = toml::from_str(content)?;
        Ok(config)
    }

    /// Load configuration with environment variable override
    pub fn load() -> Result<Self, ConfigError> {
        ConfigLoader::new().load()
    }

    /// Resolve a queue entry against the defaults
    pub fn queue_settings(&self, queue: &QueueConfig) -> QueueSettings {
        let defaults = &self.defaults;
        let visibility = queue.visibility_timeout_secs.or(defaults.visibility_timeout_secs);
        let wait = queue.wait_time_secs.or(defaults.wait_time_secs);

        QueueSettings {
            max_batch_size: queue.max_batch_size.unwrap_or(defaults.max_batch_size),
            visibility_timeout: visibility.map(Duration::from_secs),
            wait_time: wait.map(Duration::from_secs),
            deletion_policy: queue.deletion_policy.unwrap_or(defaults.deletion_policy),
            wake_threshold: queue.wake_threshold,
        }
    }

    pub fn container_settings(&self) -> ContainerSettings {
        let c = &self.container;
        ContainerSettings {
            backoff_time: Duration::from_millis(c.backoff_time_ms),
            queue_stop_timeout: Duration::from_millis(c.queue_stop_timeout_ms),
            min_slot_wait: Duration::from_millis(c.min_slot_wait_ms),
            empty_poll_delay: Duration::from_millis(c.empty_poll_delay_ms),
            pool: WorkerPoolSettings {
                base_workers_per_queue: c.base_workers_per_queue,
                max_workers: c.max_workers,
                shutdown_timeout: Duration::from_millis(c.pool_shutdown_timeout_ms),
            },
        }
    }

    /// Check invariants that hold for every broker
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.container.base_workers_per_queue == 0 {
            return Err(ConfigError::ValidationError(
                "container.base_workers_per_queue must be at least 1".to_string(),
            ));
        }
        if self.container.max_workers == Some(0) {
            return Err(ConfigError::ValidationError(
                "container.max_workers must be at least 1".to_string(),
            ));
        }

        let mut seen = HashSet::new();
        for queue in &self.queues {
            let name = queue.name.trim();
            if name.is_empty() {
                return Err(ConfigError::ValidationError("queue name must not be empty".to_string()));
            }
            if !seen.insert(name) {
                return Err(ConfigError::ValidationError(format!("duplicate queue name: {}", name)));
            }

            let settings = self.queue_settings(queue);
            if settings.max_batch_size == 0 {
                return Err(ConfigError::ValidationError(format!(
                    "queue {}: max_batch_size must be at least 1",
                    name
                )));
            }
            if let Some(threshold) = settings.wake_threshold {
                if threshold == 0 || threshold > settings.max_batch_size {
                    return Err(ConfigError::ValidationError(format!(
                        "queue {}: wake_threshold must be between 1 and {}",
                        name, settings.max_batch_size
                    )));
                }
            }
        }

        Ok(())
    }

    /// Additional limits imposed by SQS
    pub fn validate_for_sqs(&self) -> Result<(), ConfigError> {
        self.validate()?;
        for queue in &self.queues {
            let batch = self.queue_settings(queue).max_batch_size;
            if batch > SQS_MAX_BATCH_SIZE {
                return Err(ConfigError::ValidationError(format!(
                    "queue {}: max_batch_size {} exceeds the SQS limit of {}",
                    queue.name, batch, SQS_MAX_BATCH_SIZE
                )));
            }
        }
        Ok(())
    }

    /// Generate an example TOML configuration
    pub fn example_toml() -> String {
        r#"# Queue Listener Configuration
# Environment variables (QL_*) override these settings

dev_mode = false

[sqs]
region = "us-east-1"
# endpoint_url = "http://localhost:4566"
auto_create_queues = false

[container]
backoff_time_ms = 10000
queue_stop_timeout_ms = 10000
min_slot_wait_ms = 1000
empty_poll_delay_ms = 100
auto_startup = true
pool_shutdown_timeout_ms = 30000
base_workers_per_queue = 2
# max_workers = 40

[defaults]
max_batch_size = 10
# visibility_timeout_secs = 30
wait_time_secs = 20
deletion_policy = "ON_SUCCESS"  # ON_SUCCESS, ALWAYS, NO_REDRIVE, NEVER

[[queues]]
name = "orders"

[[queues]]
name = "notifications"
max_batch_size = 5
deletion_policy = "NO_REDRIVE"
"#
        .to_string()
    }
}

fn trimmed<'de, D: Deserializer<'de>>(deserializer: D) -> Result<String, D::Error> {
    Ok(String::deserialize(deserializer)?.trim().to_string())
}
