//! One receive loop per running queue

use ql_queue::QueueBroker;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::Notify;
use tracing::{debug, info, trace, warn};

use crate::dispatch::DispatchTask;
use crate::handler::MessageHandler;
use crate::pool::WorkerPool;
use crate::resolver::QueueAttributes;
use crate::slot_gate::{SlotGate, SlotWait};
use crate::state::RunningState;
use crate::strategy::PollingStrategy;

pub(crate) struct QueuePoller {
    pub queue: Arc<QueueAttributes>,
    pub gate: Arc<SlotGate>,
    pub strategy: Arc<dyn PollingStrategy>,
    pub broker: Arc<dyn QueueBroker>,
    pub handler: Arc<dyn MessageHandler>,
    pub pool: Arc<WorkerPool>,
    pub state: Arc<RunningState>,
    /// Signalled by `stop` to cut slot waits and backoff sleeps short
    pub stop_signal: Arc<Notify>,
    pub generation: u64,
    pub backoff_time: Duration,
    pub max_wait: Duration,
    /// Minimum time between two receive calls that came back empty
    pub empty_poll_delay: Duration,
}

impl QueuePoller {
    fn is_running(&self) -> bool {
        self.state.is_current(&self.queue.name, self.generation)
    }

    pub async fn run(self) {
        let name = self.queue.name.as_str();
        info!(
            queue = %name,
            max_batch_size = self.queue.max_batch_size(),
            deletion_policy = %self.queue.deletion_policy(),
            "Queue poller started"
        );

        while self.is_running() {
            let available = self.gate.available();
            if available == 0 {
                tokio::select! {
                    outcome = self.gate.await_available(self.max_wait) => {
                        if outcome == SlotWait::TimedOut {
                            trace!(queue = %name, "No free slots, waiting again");
                        }
                    }
                    _ = self.stop_signal.notified() => {}
                }
                continue;
            }

            let polled_at = Instant::now();
            let batch = match self.strategy.receive_batch(&self.queue, available).await {
                Ok(batch) => batch,
                Err(e) => {
                    warn!(
                        queue = %name,
                        error = %e,
                        backoff_ms = self.backoff_time.as_millis() as u64,
                        "Failed to receive messages, backing off"
                    );
                    tokio::select! {
                        _ = tokio::time::sleep(self.backoff_time) => {}
                        _ = self.stop_signal.notified() => {}
                    }
                    continue;
                }
            };

            if batch.is_empty() {
                // Brokers that answer an empty queue at once must not turn
                // this loop into a busy spin
                let pause = self.empty_poll_delay.saturating_sub(polled_at.elapsed());
                if pause.is_zero() {
                    tokio::task::yield_now().await;
                } else {
                    tokio::select! {
                        _ = tokio::time::sleep(pause) => {}
                        _ = self.stop_signal.notified() => {}
                    }
                }
                continue;
            }
            debug!(queue = %name, count = batch.len(), "Received messages");

            for message in batch {
                let Some(permit) = self.gate.try_permit() else {
                    warn!(
                        queue = %name,
                        message_id = ?message.message_id,
                        "Broker returned more messages than free slots, leaving message leased"
                    );
                    continue;
                };

                if !self.is_running() {
                    // Undispatched: the slot goes back and the lease lapses broker-side
                    drop(permit);
                    debug!(queue = %name, message_id = ?message.message_id, "Queue stopping, message not dispatched");
                    continue;
                }

                let task = DispatchTask::new(
                    &self.queue,
                    message,
                    Arc::clone(&self.handler),
                    Arc::clone(&self.broker),
                    permit,
                );
                if let Err(e) = self.pool.submit(task.run()).await {
                    warn!(queue = %name, error = %e, "Worker pool rejected message");
                }
            }
        }

        info!(queue = %name, "Queue poller stopped");
    }
}
