//! Shared mocks for container tests

#![allow(dead_code)]

use async_trait::async_trait;
use parking_lot::Mutex;
use ql_common::{ContainerSettings, ReceivedMessage, WorkerPoolSettings};
use ql_container::{HandlerError, ListenerMessage, MessageHandler};
use ql_queue::{BrokerQueueAttributes, DestinationResolver, QueueBroker, QueueError, ReceiveRequest};
use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::atomic::{AtomicU32, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::Semaphore;

/// Settings with short timings so tests run quickly
pub fn fast_settings() -> ContainerSettings {
    ContainerSettings {
        backoff_time: Duration::from_millis(50),
        queue_stop_timeout: Duration::from_secs(2),
        min_slot_wait: Duration::from_millis(100),
        empty_poll_delay: Duration::from_millis(20),
        pool: WorkerPoolSettings {
            shutdown_timeout: Duration::from_secs(2),
            ..Default::default()
        },
    }
}

/// Poll `condition` until it holds or `timeout` elapses
pub async fn wait_until<F: Fn() -> bool>(condition: F, timeout: Duration) -> bool {
    let deadline = Instant::now() + timeout;
    while Instant::now() < deadline {
        if condition() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    condition()
}

pub fn message(id: &str) -> ReceivedMessage {
    ReceivedMessage::new(format!("receipt-{}", id), format!("body-{}", id)).with_message_id(id)
}

pub fn batch(prefix: &str, n: usize) -> Vec<ReceivedMessage> {
    (0..n).map(|i| message(&format!("{}-{}", prefix, i))).collect()
}

enum Step {
    Messages(Vec<ReceivedMessage>),
    Fail(String),
    Hang(Duration),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReceiveCall {
    pub destination: String,
    pub max_messages: usize,
    pub at: Instant,
}

fn destination(queue: &str) -> String {
    format!("scripted://{}", queue)
}

/// Broker that replays a per-queue script of receive results. Once a script
/// is used up, receives come back empty: after the requested long-poll wait,
/// or at once when none is requested.
pub struct ScriptedBroker {
    scripts: Mutex<HashMap<String, VecDeque<Step>>>,
    receive_calls: Mutex<Vec<ReceiveCall>>,
    deleted: Mutex<Vec<String>>,
    missing: Mutex<HashSet<String>>,
    redrive: bool,
    attribute_failures: AtomicU32,
}

impl ScriptedBroker {
    pub fn new() -> Self {
        ql_common::logging::init_test_logging();
        Self {
            scripts: Mutex::new(HashMap::new()),
            receive_calls: Mutex::new(Vec::new()),
            deleted: Mutex::new(Vec::new()),
            missing: Mutex::new(HashSet::new()),
            redrive: false,
            attribute_failures: AtomicU32::new(0),
        }
    }

    /// Every queue reports a dead-letter target
    pub fn with_redrive() -> Self {
        Self {
            redrive: true,
            ..Self::new()
        }
    }

    fn push(&self, queue: &str, step: Step) {
        self.scripts
            .lock()
            .entry(destination(queue))
            .or_default()
            .push_back(step);
    }

    pub fn push_messages(&self, queue: &str, messages: Vec<ReceivedMessage>) {
        self.push(queue, Step::Messages(messages));
    }

    pub fn push_failure(&self, queue: &str, reason: &str) {
        self.push(queue, Step::Fail(reason.to_string()));
    }

    /// Next receive call on `queue` blocks for `duration` before returning empty
    pub fn push_hang(&self, queue: &str, duration: Duration) {
        self.push(queue, Step::Hang(duration));
    }

    pub fn mark_missing(&self, name: &str) {
        self.missing.lock().insert(name.to_string());
    }

    /// Fail the next `n` queue attribute lookups
    pub fn fail_attribute_lookups(&self, n: u32) {
        self.attribute_failures.store(n, Ordering::SeqCst);
    }

    pub fn receive_calls(&self) -> Vec<ReceiveCall> {
        self.receive_calls.lock().clone()
    }

    pub fn receive_count(&self) -> usize {
        self.receive_calls.lock().len()
    }

    pub fn deleted(&self) -> Vec<String> {
        let mut deleted = self.deleted.lock().clone();
        deleted.sort();
        deleted
    }

    pub fn deleted_count(&self) -> usize {
        self.deleted.lock().len()
    }
}

#[async_trait]
impl QueueBroker for ScriptedBroker {
    async fn receive(&self, request: &ReceiveRequest) -> Result<Vec<ReceivedMessage>, QueueError> {
        self.receive_calls.lock().push(ReceiveCall {
            destination: request.destination.clone(),
            max_messages: request.max_messages,
            at: Instant::now(),
        });

        let step = self
            .scripts
            .lock()
            .get_mut(&request.destination)
            .and_then(|script| script.pop_front());
        match step {
            Some(Step::Messages(messages)) => Ok(messages),
            Some(Step::Fail(reason)) => Err(QueueError::Broker(reason)),
            Some(Step::Hang(duration)) => {
                tokio::time::sleep(duration).await;
                Ok(Vec::new())
            }
            None => {
                if let Some(wait) = request.wait_time {
                    tokio::time::sleep(wait).await;
                }
                Ok(Vec::new())
            }
        }
    }

    async fn delete(&self, _destination: &str, receipt_handle: &str) -> Result<(), QueueError> {
        self.deleted.lock().push(receipt_handle.to_string());
        Ok(())
    }

    async fn get_queue_attributes(&self, _destination: &str) -> Result<BrokerQueueAttributes, QueueError> {
        let remaining = self.attribute_failures.load(Ordering::SeqCst);
        if remaining > 0 {
            self.attribute_failures.store(remaining - 1, Ordering::SeqCst);
            return Err(QueueError::Broker("attributes unavailable".to_string()));
        }
        Ok(BrokerQueueAttributes {
            redrive_policy: self
                .redrive
                .then(|| r#"{"maxReceiveCount":3}"#.to_string()),
        })
    }
}

#[async_trait]
impl DestinationResolver for ScriptedBroker {
    async fn resolve(&self, logical_name: &str) -> Result<String, QueueError> {
        if self.missing.lock().contains(logical_name) {
            return Err(QueueError::NotFound(logical_name.to_string()));
        }
        Ok(destination(logical_name))
    }
}

/// Counts receive calls made against another broker
pub struct CountingBroker {
    inner: Arc<dyn QueueBroker>,
    receives: AtomicUsize,
}

impl CountingBroker {
    pub fn new(inner: Arc<dyn QueueBroker>) -> Self {
        Self {
            inner,
            receives: AtomicUsize::new(0),
        }
    }

    pub fn receive_count(&self) -> usize {
        self.receives.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl QueueBroker for CountingBroker {
    async fn receive(&self, request: &ReceiveRequest) -> Result<Vec<ReceivedMessage>, QueueError> {
        self.receives.fetch_add(1, Ordering::SeqCst);
        self.inner.receive(request).await
    }

    async fn delete(&self, destination: &str, receipt_handle: &str) -> Result<(), QueueError> {
        self.inner.delete(destination, receipt_handle).await
    }

    async fn get_queue_attributes(&self, destination: &str) -> Result<BrokerQueueAttributes, QueueError> {
        self.inner.get_queue_attributes(destination).await
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Behavior {
    Succeed,
    Fail,
    Panic,
    /// Acknowledge explicitly when the body ends with "-ack"
    AckMarked,
}

/// Handler that records what it saw and optionally waits for a go-ahead
pub struct RecordingHandler {
    behavior: Behavior,
    calls: AtomicU32,
    completed: AtomicU32,
    bodies: Mutex<Vec<String>>,
    queues: Mutex<Vec<String>>,
    /// When set, each invocation takes one permit before finishing
    gate: Option<Semaphore>,
}

impl RecordingHandler {
    pub fn new(behavior: Behavior) -> Self {
        Self {
            behavior,
            calls: AtomicU32::new(0),
            completed: AtomicU32::new(0),
            bodies: Mutex::new(Vec::new()),
            queues: Mutex::new(Vec::new()),
            gate: None,
        }
    }

    /// Invocations block until [`release`](Self::release) hands out permits
    pub fn blocking(behavior: Behavior) -> Self {
        Self {
            gate: Some(Semaphore::new(0)),
            ..Self::new(behavior)
        }
    }

    pub fn release(&self, n: usize) {
        if let Some(gate) = &self.gate {
            gate.add_permits(n);
        }
    }

    pub fn calls(&self) -> u32 {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn completed(&self) -> u32 {
        self.completed.load(Ordering::SeqCst)
    }

    pub fn bodies(&self) -> Vec<String> {
        self.bodies.lock().clone()
    }

    pub fn queues(&self) -> Vec<String> {
        self.queues.lock().clone()
    }
}

#[async_trait]
impl MessageHandler for RecordingHandler {
    async fn handle(&self, message: ListenerMessage) -> Result<(), HandlerError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.bodies.lock().push(message.payload.clone());
        if let Some(queue) = message.queue_name() {
            self.queues.lock().push(queue.to_string());
        }

        if let Some(gate) = &self.gate {
            gate.acquire().await.unwrap().forget();
        }
        self.completed.fetch_add(1, Ordering::SeqCst);

        match self.behavior {
            Behavior::Succeed => Ok(()),
            Behavior::Fail => Err(HandlerError::processing("rejected")),
            Behavior::Panic => panic!("handler exploded"),
            Behavior::AckMarked => {
                if message.payload.ends_with("-ack") {
                    let ack = message.acknowledgment.expect("NEVER policy grants an acknowledgment");
                    ack.acknowledge()
                        .await
                        .map_err(|e| HandlerError::Unexpected(e.to_string()))?;
                }
                Ok(())
            }
        }
    }
}
