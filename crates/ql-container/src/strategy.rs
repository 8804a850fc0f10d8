use async_trait::async_trait;
use ql_common::ReceivedMessage;
use ql_queue::{QueueBroker, QueueError, ReceiveRequest};
use std::sync::Arc;

use crate::resolver::QueueAttributes;

/// Drains one batch from a queue given the capacity currently free for it
#[async_trait]
pub trait PollingStrategy: Send + Sync {
    async fn receive_batch(
        &self,
        queue: &QueueAttributes,
        capacity: usize,
    ) -> Result<Vec<ReceivedMessage>, QueueError>;
}

/// Requests `min(capacity, max_batch_size)` messages per call with the
/// queue's visibility timeout and long-poll wait
pub struct SlotGatedPolling {
    broker: Arc<dyn QueueBroker>,
}

impl SlotGatedPolling {
    pub fn new(broker: Arc<dyn QueueBroker>) -> Self {
        Self { broker }
    }
}

#[async_trait]
impl PollingStrategy for SlotGatedPolling {
    async fn receive_batch(
        &self,
        queue: &QueueAttributes,
        capacity: usize,
    ) -> Result<Vec<ReceivedMessage>, QueueError> {
        let request = ReceiveRequest {
            destination: queue.destination.clone(),
            max_messages: capacity.min(queue.max_batch_size()),
            visibility_timeout: queue.settings.visibility_timeout,
            wait_time: queue.settings.wait_time,
        };
        self.broker.receive(&request).await
    }
}
