//! Queue Listener Container
//!
//! Pulls messages from pull-based broker queues and fans them out to a
//! bounded worker pool:
//! - QueueAttributesResolver: logical name to destination + redrive presence, once at build
//! - SlotGate: per-queue in-flight throttle sized to the queue's batch size
//! - QueuePoller: one receive loop per running queue, backing off on broker errors
//! - DispatchTask: handler invocation followed by the deletion policy decision
//! - WorkerPool: shared bounded executor with no backing queue
//! - MessageListenerContainer: start/stop of single queues and of the whole container

pub mod container;
pub mod deletion;
pub mod dispatch;
pub mod error;
pub mod handler;
pub mod pool;
mod poller;
pub mod resolver;
pub mod slot_gate;
pub mod state;
pub mod strategy;

pub use container::{ContainerBuilder, MessageListenerContainer};
pub use deletion::{decide, DeletionDecision, HandlerOutcome};
pub use dispatch::InFlightHandle;
pub use error::{ContainerError, HandlerError};
pub use handler::{Acknowledgment, ListenerMessage, MessageHandler};
pub use pool::{PoolStats, WorkerPool};
pub use resolver::{QueueAttributes, QueueAttributesResolver};
pub use slot_gate::{SlotGate, SlotPermit, SlotWait};
pub use state::{QueueState, RunningState};
pub use strategy::{PollingStrategy, SlotGatedPolling};

pub type Result<T> = std::result::Result<T, ContainerError>;
