//! Broker collaborators for the queue listener.
//!
//! The listener engine only depends on the traits in this crate:
//! - [`QueueBroker`]: receive / delete / queue attribute lookup
//! - [`DestinationResolver`]: logical queue name to broker destination
//! - [`MessageSender`]: publishing, used by [`QueuePublisher`]
//!
//! Two implementations ship with it: an in-process [`memory::MemoryBroker`]
//! and, behind the `sqs` feature, an AWS SQS broker.

use async_trait::async_trait;
use ql_common::ReceivedMessage;
use std::time::Duration;

pub mod error;
pub mod memory;
pub mod publisher;
pub mod resolver;

#[cfg(feature = "sqs")]
pub mod sqs;

pub use error::QueueError;
pub use publisher::QueuePublisher;
pub use resolver::CachingDestinationResolver;

pub type Result<T> = std::result::Result<T, QueueError>;

/// Parameters of a single receive call
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReceiveRequest {
    pub destination: String,
    pub max_messages: usize,
    pub visibility_timeout: Option<Duration>,
    pub wait_time: Option<Duration>,
}

impl ReceiveRequest {
    pub fn new(destination: impl Into<String>, max_messages: usize) -> Self {
        Self {
            destination: destination.into(),
            max_messages,
            visibility_timeout: None,
            wait_time: None,
        }
    }
}

/// Queue metadata reported by the broker
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BrokerQueueAttributes {
    /// Raw redrive policy document, present when a dead-letter target is configured
    pub redrive_policy: Option<String>,
}

impl BrokerQueueAttributes {
    pub fn has_redrive_policy(&self) -> bool {
        self.redrive_policy.is_some()
    }
}

/// Pull-based broker with leased delivery
#[async_trait]
pub trait QueueBroker: Send + Sync {
    /// Receive up to `request.max_messages` messages, leasing each for the
    /// requested visibility timeout. Blocks up to `wait_time` when empty.
    async fn receive(&self, request: &ReceiveRequest) -> Result<Vec<ReceivedMessage>>;

    /// Delete a received message using the receipt handle of its delivery
    async fn delete(&self, destination: &str, receipt_handle: &str) -> Result<()>;

    /// Fetch the queue metadata the listener cares about
    async fn get_queue_attributes(&self, destination: &str) -> Result<BrokerQueueAttributes>;
}

/// Resolves a logical queue name to a broker destination
#[async_trait]
pub trait DestinationResolver: Send + Sync {
    /// Returns the destination, or `QueueError::NotFound` if the queue does not exist
    async fn resolve(&self, logical_name: &str) -> Result<String>;
}

/// Publishes message bodies to a destination
#[async_trait]
pub trait MessageSender: Send + Sync {
    /// Send a message, returning the broker message ID
    async fn send(&self, destination: &str, body: &str, delay_seconds: u32) -> Result<String>;
}

/// Names that are already destinations (URLs) resolve to themselves
pub(crate) fn is_destination_url(name: &str) -> bool {
    name.contains("://")
}
