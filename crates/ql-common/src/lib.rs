use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;
use std::time::Duration;
use thiserror::Error;

pub mod logging;

// ============================================================================
// Header Names
// ============================================================================

/// Header carrying the logical queue name a message was received from
pub const LOGICAL_RESOURCE_ID: &str = "LogicalResourceId";

/// Header carrying the broker-assigned message ID
pub const MESSAGE_ID: &str = "MessageId";

/// Header carrying the lease/receipt token of this delivery
pub const RECEIPT_HANDLE: &str = "ReceiptHandle";

/// Broker system attribute holding the number of times a message was received
pub const APPROXIMATE_RECEIVE_COUNT: &str = "ApproximateReceiveCount";

/// Default number of messages requested per receive call
pub const DEFAULT_MAX_BATCH_SIZE: usize = 10;

// ============================================================================
// Core Message Types
// ============================================================================

/// A message as returned by a broker receive call.
///
/// The receipt handle is the lease token of this particular delivery; it is
/// required to delete the message and becomes invalid once the visibility
/// timeout expires.
#[derive(Debug, Clone, Default)]
pub struct ReceivedMessage {
    pub message_id: Option<String>,
    pub receipt_handle: String,
    pub body: String,
    /// Broker system attributes (ApproximateReceiveCount, SentTimestamp, ...)
    pub attributes: HashMap<String, String>,
    /// User-supplied string message attributes
    pub message_attributes: HashMap<String, String>,
}

impl ReceivedMessage {
    pub fn new(receipt_handle: impl Into<String>, body: impl Into<String>) -> Self {
        Self {
            receipt_handle: receipt_handle.into(),
            body: body.into(),
            ..Default::default()
        }
    }

    pub fn with_message_id(mut self, message_id: impl Into<String>) -> Self {
        self.message_id = Some(message_id.into());
        self
    }

    pub fn with_attribute(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.attributes.insert(name.into(), value.into());
        self
    }

    pub fn with_message_attribute(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.message_attributes.insert(name.into(), value.into());
        self
    }

    /// Number of times the broker has handed out this message, if reported
    pub fn receive_count(&self) -> Option<u32> {
        self.attributes
            .get(APPROXIMATE_RECEIVE_COUNT)
            .and_then(|v| v.parse().ok())
    }
}

// ============================================================================
// Deletion Policy
// ============================================================================

/// When a received message is deleted from the broker after its handler ran.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum DeletionPolicy {
    /// Delete only when the handler succeeded
    #[default]
    OnSuccess,
    /// Delete regardless of the handler outcome
    Always,
    /// Delete on success, and on failure only if the queue has no dead-letter target
    NoRedrive,
    /// Never delete automatically; the handler receives an acknowledgment
    Never,
}

impl DeletionPolicy {
    pub fn as_str(&self) -> &'static str {
        match self {
            DeletionPolicy::OnSuccess => "ON_SUCCESS",
            DeletionPolicy::Always => "ALWAYS",
            DeletionPolicy::NoRedrive => "NO_REDRIVE",
            DeletionPolicy::Never => "NEVER",
        }
    }
}

impl fmt::Display for DeletionPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("Unknown deletion policy: {0}")]
pub struct UnknownDeletionPolicy(pub String);

impl FromStr for DeletionPolicy {
    type Err = UnknownDeletionPolicy;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_uppercase().replace('-', "_").as_str() {
            "ON_SUCCESS" => Ok(DeletionPolicy::OnSuccess),
            "ALWAYS" => Ok(DeletionPolicy::Always),
            "NO_REDRIVE" => Ok(DeletionPolicy::NoRedrive),
            "NEVER" => Ok(DeletionPolicy::Never),
            _ => Err(UnknownDeletionPolicy(s.to_string())),
        }
    }
}

// ============================================================================
// Configuration Types
// ============================================================================

/// Per-queue receive and deletion settings supplied at registration
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueueSettings {
    /// Upper bound on messages per receive call; also the queue's slot capacity
    pub max_batch_size: usize,
    /// Lease duration requested for each received message
    pub visibility_timeout: Option<Duration>,
    /// Long-poll wait for receive calls
    pub wait_time: Option<Duration>,
    pub deletion_policy: DeletionPolicy,
    /// Free slots required before a finishing worker wakes the poller.
    /// Defaults to `max(1, max_batch_size / 2)`.
    pub wake_threshold: Option<usize>,
}

impl Default for QueueSettings {
    fn default() -> Self {
        Self {
            max_batch_size: DEFAULT_MAX_BATCH_SIZE,
            visibility_timeout: None,
            wait_time: None,
            deletion_policy: DeletionPolicy::OnSuccess,
            wake_threshold: None,
        }
    }
}

impl QueueSettings {
    pub fn with_max_batch_size(mut self, max_batch_size: usize) -> Self {
        self.max_batch_size = max_batch_size;
        self
    }

    pub fn with_visibility_timeout(mut self, timeout: Duration) -> Self {
        self.visibility_timeout = Some(timeout);
        self
    }

    pub fn with_wait_time(mut self, wait_time: Duration) -> Self {
        self.wait_time = Some(wait_time);
        self
    }

    pub fn with_deletion_policy(mut self, policy: DeletionPolicy) -> Self {
        self.deletion_policy = policy;
        self
    }

    pub fn with_wake_threshold(mut self, threshold: usize) -> Self {
        self.wake_threshold = Some(threshold);
        self
    }

    /// Threshold of free slots at which a completing worker wakes the poller
    pub fn effective_wake_threshold(&self) -> usize {
        self.wake_threshold
            .unwrap_or(self.max_batch_size / 2)
            .max(1)
    }
}

/// Sizing of the shared worker pool
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkerPoolSettings {
    /// Core workers reserved per registered queue
    pub base_workers_per_queue: usize,
    /// Overrides the computed maximum (sum of all queues' batch sizes)
    pub max_workers: Option<usize>,
    /// How long shutdown waits for running handlers to finish
    pub shutdown_timeout: Duration,
}

impl Default for WorkerPoolSettings {
    fn default() -> Self {
        Self {
            base_workers_per_queue: 2,
            max_workers: None,
            shutdown_timeout: Duration::from_secs(30),
        }
    }
}

/// Container-wide tuning
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContainerSettings {
    /// Sleep after a failed receive call before polling again
    pub backoff_time: Duration,
    /// How long `stop(queue)` waits for the poller to exit
    pub queue_stop_timeout: Duration,
    /// Lower bound for how long a poller with no free slots waits per tick
    pub min_slot_wait: Duration,
    /// Pause after an empty receive on a queue without a long-poll wait
    pub empty_poll_delay: Duration,
    pub pool: WorkerPoolSettings,
}

impl Default for ContainerSettings {
    fn default() -> Self {
        Self {
            backoff_time: Duration::from_secs(10),
            queue_stop_timeout: Duration::from_secs(10),
            min_slot_wait: Duration::from_millis(1000),
            empty_poll_delay: Duration::from_millis(100),
            pool: WorkerPoolSettings::default(),
        }
    }
}
