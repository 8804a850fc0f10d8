//! In-memory broker for development and tests.
//!
//! Behaves like a pull-based broker with leased delivery:
//! - Received messages are hidden for their visibility timeout and come back
//!   when it expires, with a fresh receipt handle
//! - Receive calls long-poll up to the requested wait time
//! - A queue may carry a redrive policy that moves a message to a dead-letter
//!   queue once it has been received `max_receive_count` times
//! - Delivery delays hide newly sent messages

use async_trait::async_trait;
use parking_lot::Mutex;
use ql_common::{ReceivedMessage, APPROXIMATE_RECEIVE_COUNT};
use std::collections::{HashMap, VecDeque};
use std::time::{Duration, Instant};
use tokio::sync::Notify;
use tracing::{debug, warn};

use crate::{
    BrokerQueueAttributes, DestinationResolver, MessageSender, QueueBroker, QueueError,
    ReceiveRequest, Result,
};

/// Destination prefix for in-memory queues
pub const MEMORY_SCHEME: &str = "memory://";

const DEFAULT_VISIBILITY_TIMEOUT: Duration = Duration::from_secs(30);

/// Re-check interval while long-polling an empty queue, so messages whose
/// lease expires are picked up without a send to wake the waiter
const LONG_POLL_TICK: Duration = Duration::from_millis(50);

/// Dead-letter routing for a memory queue
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RedrivePolicy {
    pub dead_letter_queue: String,
    pub max_receive_count: u32,
}

struct StoredMessage {
    message_id: String,
    body: String,
    message_attributes: HashMap<String, String>,
    sent_at_ms: i64,
    visible_at: Instant,
    receive_count: u32,
    receipt_handle: Option<String>,
}

impl StoredMessage {
    fn to_received(&self, receipt_handle: String) -> ReceivedMessage {
        let mut received = ReceivedMessage::new(receipt_handle, self.body.clone())
            .with_message_id(self.message_id.clone())
            .with_attribute(APPROXIMATE_RECEIVE_COUNT, self.receive_count.to_string())
            .with_attribute("SentTimestamp", self.sent_at_ms.to_string());
        received.message_attributes = self.message_attributes.clone();
        received
    }
}

#[derive(Default)]
struct MemoryQueue {
    messages: VecDeque<StoredMessage>,
    redrive: Option<RedrivePolicy>,
}

pub struct MemoryBroker {
    queues: Mutex<HashMap<String, MemoryQueue>>,
    arrivals: Notify,
    auto_create: bool,
    default_visibility_timeout: Duration,
    default_wait_time: Duration,
}

impl Default for MemoryBroker {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryBroker {
    pub fn new() -> Self {
        Self {
            queues: Mutex::new(HashMap::new()),
            arrivals: Notify::new(),
            auto_create: false,
            default_visibility_timeout: DEFAULT_VISIBILITY_TIMEOUT,
            default_wait_time: Duration::ZERO,
        }
    }

    /// Create missing queues on resolution instead of reporting them as not found
    pub fn with_auto_create(mut self, auto_create: bool) -> Self {
        self.auto_create = auto_create;
        self
    }

    /// Lease applied when a receive call does not request one
    pub fn with_default_visibility_timeout(mut self, timeout: Duration) -> Self {
        self.default_visibility_timeout = timeout;
        self
    }

    /// Long-poll wait applied when a receive call does not request one,
    /// like a queue-level receive wait time on SQS
    pub fn with_default_wait_time(mut self, wait_time: Duration) -> Self {
        self.default_wait_time = wait_time;
        self
    }

    pub fn destination_for(name: &str) -> String {
        format!("{}{}", MEMORY_SCHEME, name)
    }

    /// Create a queue (no-op if it exists) and return its destination
    pub fn create_queue(&self, name: &str) -> String {
        self.queues.lock().entry(name.to_string()).or_default();
        Self::destination_for(name)
    }

    /// Create a queue with a dead-letter target. The target queue is created too.
    pub fn create_queue_with_redrive(&self, name: &str, policy: RedrivePolicy) -> String {
        let mut queues = self.queues.lock();
        queues.entry(policy.dead_letter_queue.clone()).or_default();
        queues.entry(name.to_string()).or_default().redrive = Some(policy);
        Self::destination_for(name)
    }

    /// Total messages held by a queue, leased or not
    pub fn queue_depth(&self, name: &str) -> usize {
        self.queues
            .lock()
            .get(name)
            .map(|q| q.messages.len())
            .unwrap_or(0)
    }

    /// Messages currently leased to a receiver
    pub fn in_flight_count(&self, name: &str) -> usize {
        let now = Instant::now();
        self.queues
            .lock()
            .get(name)
            .map(|q| {
                q.messages
                    .iter()
                    .filter(|m| m.receipt_handle.is_some() && m.visible_at > now)
                    .count()
            })
            .unwrap_or(0)
    }

    fn queue_name(destination: &str) -> Result<&str> {
        destination
            .strip_prefix(MEMORY_SCHEME)
            .ok_or_else(|| QueueError::NotFound(destination.to_string()))
    }

    fn take_visible(&self, name: &str, request: &ReceiveRequest) -> Result<Vec<ReceivedMessage>> {
        let mut queues = self.queues.lock();
        let queue = queues
            .get_mut(name)
            .ok_or_else(|| QueueError::NotFound(name.to_string()))?;

        let now = Instant::now();
        let visibility = request.visibility_timeout.unwrap_or(self.default_visibility_timeout);
        let redrive = queue.redrive.clone();
        let mut batch = Vec::new();
        let mut dead_lettered = Vec::new();

        let mut index = 0;
        while index < queue.messages.len() && batch.len() < request.max_messages {
            if queue.messages[index].visible_at > now {
                index += 1;
                continue;
            }

            let exhausted = redrive
                .as_ref()
                .map(|p| queue.messages[index].receive_count >= p.max_receive_count)
                .unwrap_or(false);
            if exhausted {
                if let Some(message) = queue.messages.remove(index) {
                    dead_lettered.push(message);
                }
                continue;
            }

            let message = &mut queue.messages[index];
            let receipt_handle = uuid::Uuid::new_v4().to_string();
            message.receive_count += 1;
            message.receipt_handle = Some(receipt_handle.clone());
            message.visible_at = now + visibility;
            batch.push(message.to_received(receipt_handle));
            index += 1;
        }

        if let Some(policy) = redrive.filter(|_| !dead_lettered.is_empty()) {
            match queues.get_mut(&policy.dead_letter_queue) {
                Some(dlq) => {
                    for mut message in dead_lettered {
                        debug!(
                            queue = %name,
                            dead_letter_queue = %policy.dead_letter_queue,
                            message_id = %message.message_id,
                            receive_count = message.receive_count,
                            "Moving message to dead-letter queue"
                        );
                        message.receive_count = 0;
                        message.receipt_handle = None;
                        message.visible_at = now;
                        dlq.messages.push_back(message);
                    }
                }
                None => {
                    warn!(
                        queue = %name,
                        dead_letter_queue = %policy.dead_letter_queue,
                        dropped = dead_lettered.len(),
                        "Dead-letter queue missing, dropping exhausted messages"
                    );
                }
            }
        }

        Ok(batch)
    }
}

#[async_trait]
impl QueueBroker for MemoryBroker {
    async fn receive(&self, request: &ReceiveRequest) -> Result<Vec<ReceivedMessage>> {
        let name = Self::queue_name(&request.destination)?;
        let deadline = Instant::now() + request.wait_time.unwrap_or(self.default_wait_time);

        loop {
            let arrived = self.arrivals.notified();
            let batch = self.take_visible(name, request)?;
            if !batch.is_empty() {
                return Ok(batch);
            }

            let now = Instant::now();
            if now >= deadline {
                return Ok(batch);
            }
            let _ = tokio::time::timeout((deadline - now).min(LONG_POLL_TICK), arrived).await;
        }
    }

    async fn delete(&self, destination: &str, receipt_handle: &str) -> Result<()> {
        let name = Self::queue_name(destination)?;
        let mut queues = self.queues.lock();
        let queue = queues
            .get_mut(name)
            .ok_or_else(|| QueueError::NotFound(name.to_string()))?;

        let position = queue
            .messages
            .iter()
            .position(|m| m.receipt_handle.as_deref() == Some(receipt_handle));

        match position {
            Some(index) => {
                queue.messages.remove(index);
                Ok(())
            }
            None => Err(QueueError::Broker(format!(
                "Receipt handle is invalid or expired: {}",
                receipt_handle
            ))),
        }
    }

    async fn get_queue_attributes(&self, destination: &str) -> Result<BrokerQueueAttributes> {
        let name = Self::queue_name(destination)?;
        let queues = self.queues.lock();
        let queue = queues
            .get(name)
            .ok_or_else(|| QueueError::NotFound(name.to_string()))?;

        let redrive_policy = match &queue.redrive {
            Some(policy) => Some(serde_json::to_string(&serde_json::json!({
                "deadLetterTargetArn": Self::destination_for(&policy.dead_letter_queue),
                "maxReceiveCount": policy.max_receive_count,
            }))?),
            None => None,
        };

        Ok(BrokerQueueAttributes { redrive_policy })
    }
}

#[async_trait]
impl DestinationResolver for MemoryBroker {
    async fn resolve(&self, logical_name: &str) -> Result<String> {
        if crate::is_destination_url(logical_name) {
            Self::queue_name(logical_name)?;
            return Ok(logical_name.to_string());
        }
        if self.queues.lock().contains_key(logical_name) {
            return Ok(Self::destination_for(logical_name));
        }
        if self.auto_create {
            debug!(queue = %logical_name, "Auto-creating memory queue");
            return Ok(self.create_queue(logical_name));
        }
        Err(QueueError::NotFound(logical_name.to_string()))
    }
}

#[async_trait]
impl MessageSender for MemoryBroker {
    async fn send(&self, destination: &str, body: &str, delay_seconds: u32) -> Result<String> {
        let name = Self::queue_name(destination)?;
        let message_id = uuid::Uuid::new_v4().to_string();

        {
            let mut queues = self.queues.lock();
            let queue = queues
                .get_mut(name)
                .ok_or_else(|| QueueError::NotFound(name.to_string()))?;
            queue.messages.push_back(StoredMessage {
                message_id: message_id.clone(),
                body: body.to_string(),
                message_attributes: HashMap::new(),
                sent_at_ms: chrono::Utc::now().timestamp_millis(),
                visible_at: Instant::now() + Duration::from_secs(delay_seconds as u64),
                receive_count: 0,
                receipt_handle: None,
            });
        }

        self.arrivals.notify_waiters();
        Ok(message_id)
    }
}
