//! Message handler callback and the payload it receives

use async_trait::async_trait;
use ql_common::LOGICAL_RESOURCE_ID;
use ql_queue::{QueueBroker, QueueError};
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use tracing::debug;

use crate::HandlerError;

/// Invoked once per received message.
///
/// Returning `Err` (or panicking) counts as a failure for the queue's
/// deletion policy.
#[async_trait]
pub trait MessageHandler: Send + Sync {
    async fn handle(&self, message: ListenerMessage) -> Result<(), HandlerError>;
}

/// A received message as seen by a handler
#[derive(Debug)]
pub struct ListenerMessage {
    pub payload: String,
    /// Logical queue name, message ID, receipt handle, broker system
    /// attributes and string message attributes
    pub headers: HashMap<String, String>,
    /// Present only for queues with the NEVER deletion policy
    pub acknowledgment: Option<Acknowledgment>,
}

impl ListenerMessage {
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(name).map(String::as_str)
    }

    pub fn queue_name(&self) -> Option<&str> {
        self.header(LOGICAL_RESOURCE_ID)
    }
}

/// Capability to delete one delivery of a message.
///
/// Bound to the receipt handle of this delivery: once the visibility timeout
/// expires the broker may reject it.
#[derive(Clone)]
pub struct Acknowledgment {
    broker: Arc<dyn QueueBroker>,
    queue_name: String,
    destination: String,
    receipt_handle: String,
}

impl Acknowledgment {
    pub(crate) fn new(
        broker: Arc<dyn QueueBroker>,
        queue_name: String,
        destination: String,
        receipt_handle: String,
    ) -> Self {
        Self {
            broker,
            queue_name,
            destination,
            receipt_handle,
        }
    }

    pub fn receipt_handle(&self) -> &str {
        &self.receipt_handle
    }

    /// Delete the message from its queue
    pub async fn acknowledge(&self) -> Result<(), QueueError> {
        self.broker
            .delete(&self.destination, &self.receipt_handle)
            .await?;
        debug!(queue = %self.queue_name, "Message acknowledged by handler");
        Ok(())
    }
}

impl fmt::Debug for Acknowledgment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Acknowledgment")
            .field("queue_name", &self.queue_name)
            .field("destination", &self.destination)
            .field("receipt_handle", &self.receipt_handle)
            .finish()
    }
}
