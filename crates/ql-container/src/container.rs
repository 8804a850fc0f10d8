//! Message listener container
//!
//! Owns the registered queues, one poller task per running queue and the
//! shared worker pool. Queues are resolved once when the container is built;
//! a queue that cannot be resolved is logged and left out.

use parking_lot::Mutex;
use ql_common::{ContainerSettings, QueueSettings};
use ql_queue::{DestinationResolver, QueueBroker};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

use crate::handler::MessageHandler;
use crate::poller::QueuePoller;
use crate::pool::{PoolStats, WorkerPool};
use crate::resolver::{QueueAttributes, QueueAttributesResolver};
use crate::slot_gate::SlotGate;
use crate::state::{QueueState, RunningState};
use crate::strategy::{PollingStrategy, SlotGatedPolling};
use crate::{ContainerError, Result};

struct RegisteredQueue {
    attributes: Arc<QueueAttributes>,
    gate: Arc<SlotGate>,
    handler: Arc<dyn MessageHandler>,
}

struct PollerHandle {
    task: JoinHandle<()>,
    stop_signal: Arc<Notify>,
}

struct QueueRegistration {
    name: String,
    settings: QueueSettings,
    handler: Option<Arc<dyn MessageHandler>>,
}

/// Collects queue registrations and builds a [`MessageListenerContainer`]
pub struct ContainerBuilder {
    broker: Arc<dyn QueueBroker>,
    resolver: Arc<dyn DestinationResolver>,
    default_handler: Arc<dyn MessageHandler>,
    strategy: Option<Arc<dyn PollingStrategy>>,
    settings: ContainerSettings,
    registrations: Vec<QueueRegistration>,
}

impl ContainerBuilder {
    pub fn settings(mut self, settings: ContainerSettings) -> Self {
        self.settings = settings;
        self
    }

    /// Replace the default slot-gated broker polling
    pub fn polling_strategy(mut self, strategy: Arc<dyn PollingStrategy>) -> Self {
        self.strategy = Some(strategy);
        self
    }

    /// Register a queue served by the default handler
    pub fn register_queue(mut self, name: impl Into<String>, settings: QueueSettings) -> Self {
        self.registrations.push(QueueRegistration {
            name: name.into(),
            settings,
            handler: None,
        });
        self
    }

    pub fn register_queue_with_handler(
        mut self,
        name: impl Into<String>,
        settings: QueueSettings,
        handler: Arc<dyn MessageHandler>,
    ) -> Self {
        self.registrations.push(QueueRegistration {
            name: name.into(),
            settings,
            handler: Some(handler),
        });
        self
    }

    /// Resolve every registered queue and size the worker pool.
    /// Unresolvable or invalid queues are skipped, never fatal.
    pub async fn build(self) -> MessageListenerContainer {
        let attributes_resolver =
            QueueAttributesResolver::new(Arc::clone(&self.resolver), Arc::clone(&self.broker));
        let state = Arc::new(RunningState::new());
        let mut queues: HashMap<String, RegisteredQueue> = HashMap::new();

        for registration in self.registrations {
            let name = registration.name;
            if queues.contains_key(&name) {
                warn!(queue = %name, "Queue registered twice, keeping the first registration");
                continue;
            }
            if registration.settings.max_batch_size == 0 {
                error!(queue = %name, "Queue max_batch_size must be at least 1, skipping queue");
                continue;
            }

            let attributes = match attributes_resolver.resolve(&name, registration.settings).await {
                Ok(attributes) => attributes,
                Err(e) => {
                    warn!(queue = %name, error = %e, "Queue could not be resolved, skipping");
                    continue;
                }
            };

            let gate = SlotGate::new(
                attributes.max_batch_size(),
                attributes.settings.effective_wake_threshold(),
            );
            state.register(&name);
            queues.insert(
                name,
                RegisteredQueue {
                    attributes: Arc::new(attributes),
                    gate: Arc::new(gate),
                    handler: registration
                        .handler
                        .unwrap_or_else(|| Arc::clone(&self.default_handler)),
                },
            );
        }

        let pool_settings = &self.settings.pool;
        let core_size = queues.len() * pool_settings.base_workers_per_queue;
        let max_size = pool_settings.max_workers.unwrap_or_else(|| {
            queues
                .values()
                .map(|q| q.attributes.max_batch_size())
                .sum()
        });
        let pool = Arc::new(WorkerPool::new(core_size, max_size));

        info!(
            queues = queues.len(),
            pool_core_size = pool.stats().core_size,
            pool_max_size = pool.stats().max_size,
            "Message listener container initialized"
        );

        let strategy = self
            .strategy
            .unwrap_or_else(|| Arc::new(SlotGatedPolling::new(Arc::clone(&self.broker))));

        MessageListenerContainer {
            broker: self.broker,
            strategy,
            settings: self.settings,
            queues,
            state,
            pollers: Mutex::new(HashMap::new()),
            pool,
            active: AtomicBool::new(true),
        }
    }
}

pub struct MessageListenerContainer {
    broker: Arc<dyn QueueBroker>,
    strategy: Arc<dyn PollingStrategy>,
    settings: ContainerSettings,
    queues: HashMap<String, RegisteredQueue>,
    state: Arc<RunningState>,
    pollers: Mutex<HashMap<String, PollerHandle>>,
    pool: Arc<WorkerPool>,
    active: AtomicBool,
}

impl MessageListenerContainer {
    pub fn builder(
        broker: Arc<dyn QueueBroker>,
        resolver: Arc<dyn DestinationResolver>,
        default_handler: Arc<dyn MessageHandler>,
    ) -> ContainerBuilder {
        ContainerBuilder {
            broker,
            resolver,
            default_handler,
            strategy: None,
            settings: ContainerSettings::default(),
            registrations: Vec::new(),
        }
    }

    fn ensure_active(&self) -> Result<()> {
        if self.active.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err(ContainerError::ShutDown)
        }
    }

    fn registered(&self, name: &str) -> Result<&RegisteredQueue> {
        self.queues
            .get(name)
            .ok_or_else(|| ContainerError::QueueNotRegistered(name.to_string()))
    }

    /// Start every registered queue
    pub fn start_all(&self) -> Result<()> {
        self.ensure_active()?;
        for name in self.registered_queues() {
            self.start(&name)?;
        }
        Ok(())
    }

    /// Start one queue's poller. Starting a running queue is a no-op.
    pub fn start(&self, name: &str) -> Result<()> {
        self.ensure_active()?;
        let queue = self.registered(name)?;

        let Some(generation) = self.state.begin_start(name) else {
            return Ok(());
        };

        let stop_signal = Arc::new(Notify::new());
        let poller = QueuePoller {
            queue: Arc::clone(&queue.attributes),
            gate: Arc::clone(&queue.gate),
            strategy: Arc::clone(&self.strategy),
            broker: Arc::clone(&self.broker),
            handler: Arc::clone(&queue.handler),
            pool: Arc::clone(&self.pool),
            state: Arc::clone(&self.state),
            stop_signal: Arc::clone(&stop_signal),
            generation,
            backoff_time: self.settings.backoff_time,
            max_wait: queue.attributes.max_slot_wait(self.settings.min_slot_wait),
            empty_poll_delay: self.settings.empty_poll_delay,
        };

        let task = tokio::spawn(poller.run());
        // A handle left behind by a timed-out stop is detached here; that
        // poller exits on its own once it sees its generation is stale
        self.pollers
            .lock()
            .insert(name.to_string(), PollerHandle { task, stop_signal });

        info!(queue = %name, "Queue started");
        Ok(())
    }

    /// Stop one queue, waiting up to the configured stop timeout for its
    /// poller to exit. In-flight handlers are not interrupted.
    pub async fn stop(&self, name: &str) -> Result<()> {
        self.ensure_active()?;
        self.stop_queue(name).await
    }

    async fn stop_queue(&self, name: &str) -> Result<()> {
        self.registered(name)?;

        let Some(generation) = self.state.begin_stop(name) else {
            return Ok(());
        };
        let handle = self.pollers.lock().remove(name);

        if let Some(PollerHandle { task, stop_signal }) = handle {
            stop_signal.notify_one();
            let timeout = self.settings.queue_stop_timeout;
            match tokio::time::timeout(timeout, task).await {
                Ok(Ok(())) => {}
                Ok(Err(e)) => error!(queue = %name, error = %e, "Queue poller task failed"),
                Err(_) => warn!(
                    queue = %name,
                    timeout_ms = timeout.as_millis() as u64,
                    "Timed out waiting for queue poller to stop"
                ),
            }
        }

        self.state.finish_stop(name, generation);
        info!(queue = %name, "Queue stopped");
        Ok(())
    }

    /// Stop every running queue, one after another
    pub async fn stop_all(&self) -> Result<()> {
        self.ensure_active()?;
        self.stop_running().await;
        Ok(())
    }

    async fn stop_running(&self) {
        for name in self.state.running_queues() {
            if let Err(e) = self.stop_queue(&name).await {
                warn!(queue = %name, error = %e, "Failed to stop queue");
            }
        }
    }

    /// Stop all queues and release the worker pool. Later calls are no-ops;
    /// every other operation fails with `ShutDown` afterwards.
    pub async fn shutdown(&self) {
        if !self.active.swap(false, Ordering::SeqCst) {
            return;
        }

        info!("Shutting down message listener container");
        self.stop_running().await;
        self.pool.shutdown(self.settings.pool.shutdown_timeout).await;
        self.state.clear();
        info!("Message listener container shut down");
    }

    /// Whether a queue's poller is running. Unknown queues are not running.
    pub fn is_running(&self, name: &str) -> bool {
        self.state.is_running(name)
    }

    /// Whether any queue is running
    pub fn is_container_running(&self) -> bool {
        self.state.any_running()
    }

    /// Built and not yet shut down
    pub fn is_active(&self) -> bool {
        self.active.load(Ordering::SeqCst)
    }

    pub fn queue_state(&self, name: &str) -> Option<QueueState> {
        self.state.state(name)
    }

    /// Names of successfully resolved queues, sorted
    pub fn registered_queues(&self) -> Vec<String> {
        let mut names: Vec<String> = self.queues.keys().cloned().collect();
        names.sort();
        names
    }

    pub fn queue_attributes(&self, name: &str) -> Option<&QueueAttributes> {
        self.queues.get(name).map(|q| q.attributes.as_ref())
    }

    /// Free slots of a queue
    pub fn available_slots(&self, name: &str) -> Option<usize> {
        self.queues.get(name).map(|q| q.gate.available())
    }

    pub fn pool_stats(&self) -> PoolStats {
        self.pool.stats()
    }
}

impl Drop for MessageListenerContainer {
    fn drop(&mut self) {
        // Pollers hold no reference back to the container; clearing the flags
        // makes any still running exit at their next check
        self.state.clear();
        for handle in self.pollers.get_mut().values() {
            handle.stop_signal.notify_one();
        }
    }
}
