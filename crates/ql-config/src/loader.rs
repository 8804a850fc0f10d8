//! Configuration loader with file and environment variable support

use crate::{ConfigError, ListenerConfig, QueueConfig};
use std::env;
use std::path::PathBuf;
use tracing::{info, warn};

/// Standard config file search paths
const CONFIG_PATHS: &[&str] = &[
    "config.toml",
    "listener.toml",
    "./config/listener.toml",
    "/etc/ql-listener/config.toml",
];

/// Configuration loader
pub struct ConfigLoader {
    config_path: Option<PathBuf>,
}

impl ConfigLoader {
    /// Create a new configuration loader
    pub fn new() -> Self {
        Self { config_path: None }
    }

    /// Create a loader with a specific config file path
    pub fn with_path<P: Into<PathBuf>>(path: P) -> Self {
        Self {
            config_path: Some(path.into()),
        }
    }

    /// Load configuration from file (if found) with environment variable overrides
    pub fn load(&self) -> Result<ListenerConfig, ConfigError> {
        self.load_with(|key| env::var(key).ok())
    }

    /// Load using `lookup` in place of the process environment
    pub fn load_with<F>(&self, lookup: F) -> Result<ListenerConfig, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = ListenerConfig::default();

        if let Some(path) = self.find_config_file(&lookup) {
            info!(?path, "Loading configuration from file");
            config = ListenerConfig::from_file(&path)?;
        }

        apply_overrides(&mut config, &lookup);
        config.validate()?;

        Ok(config)
    }

    fn find_config_file<F>(&self, lookup: &F) -> Option<PathBuf>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(path) = &self.config_path {
            if path.exists() {
                return Some(path.clone());
            }
            warn!(?path, "Configured path does not exist, searching defaults");
        }

        if let Some(path) = lookup("QL_CONFIG") {
            let path = PathBuf::from(path);
            if path.exists() {
                return Some(path);
            }
        }

        CONFIG_PATHS
            .iter()
            .map(PathBuf::from)
            .find(|path| path.exists())
    }
}

impl Default for ConfigLoader {
    fn default() -> Self {
        Self::new()
    }
}

fn apply_overrides<F>(config: &mut ListenerConfig, lookup: &F)
where
    F: Fn(&str) -> Option<String>,
{
    // SQS
    if let Some(val) = lookup("QL_SQS_REGION") {
        config.sqs.region = val;
    }
    if let Some(val) = lookup("QL_SQS_ENDPOINT_URL") {
        config.sqs.endpoint_url = Some(val).filter(|v| !v.is_empty());
    }
    if let Some(val) = lookup("QL_SQS_AUTO_CREATE_QUEUES") {
        config.sqs.auto_create_queues = val.parse().unwrap_or(false);
    }

    // Container
    if let Some(val) = lookup("QL_BACKOFF_TIME_MS") {
        if let Ok(ms) = val.parse() {
            config.container.backoff_time_ms = ms;
        }
    }
    if let Some(val) = lookup("QL_QUEUE_STOP_TIMEOUT_MS") {
        if let Ok(ms) = val.parse() {
            config.container.queue_stop_timeout_ms = ms;
        }
    }
    if let Some(val) = lookup("QL_EMPTY_POLL_DELAY_MS") {
        if let Ok(ms) = val.parse() {
            config.container.empty_poll_delay_ms = ms;
        }
    }
    if let Some(val) = lookup("QL_AUTO_STARTUP") {
        config.container.auto_startup = val.parse().unwrap_or(true);
    }

    // Queues
    if let Some(val) = lookup("QL_QUEUES") {
        for name in val.split(',').map(str::trim).filter(|n| !n.is_empty()) {
            if config.queues.iter().all(|q| q.name != name) {
                config.queues.push(QueueConfig::named(name));
            }
        }
    }

    // General
    if let Some(val) = lookup("QL_DEV_MODE") {
        config.dev_mode = val.parse().unwrap_or(false);
    }
}
