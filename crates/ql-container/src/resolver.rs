//! Startup resolution of logical queue names

use ql_common::{DeletionPolicy, QueueSettings};
use ql_queue::{DestinationResolver, QueueBroker};
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

use crate::ContainerError;

/// Everything the engine needs to know about a queue. Resolved once, never mutated.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueueAttributes {
    /// Logical queue name the queue was registered under
    pub name: String,
    /// Broker handle used for receive and delete calls
    pub destination: String,
    pub settings: QueueSettings,
    pub has_redrive_policy: bool,
}

impl QueueAttributes {
    pub fn max_batch_size(&self) -> usize {
        self.settings.max_batch_size
    }

    pub fn deletion_policy(&self) -> DeletionPolicy {
        self.settings.deletion_policy
    }

    /// How long a poller with no free slots waits before re-checking:
    /// the queue's long-poll wait, but never less than `min_wait`
    pub fn max_slot_wait(&self, min_wait: Duration) -> Duration {
        self.settings
            .wait_time
            .map_or(min_wait, |wait| wait.max(min_wait))
    }
}

pub struct QueueAttributesResolver {
    resolver: Arc<dyn DestinationResolver>,
    broker: Arc<dyn QueueBroker>,
}

impl QueueAttributesResolver {
    pub fn new(resolver: Arc<dyn DestinationResolver>, broker: Arc<dyn QueueBroker>) -> Self {
        Self { resolver, broker }
    }

    /// Resolve the destination and redrive configuration of a logical queue.
    /// No retries: a missing queue is a configuration fact.
    pub async fn resolve(
        &self,
        name: &str,
        settings: QueueSettings,
    ) -> Result<QueueAttributes, ContainerError> {
        let resolution_error = |source| ContainerError::Resolution {
            queue: name.to_string(),
            source,
        };

        let destination = self.resolver.resolve(name).await.map_err(resolution_error)?;
        let broker_attributes = self
            .broker
            .get_queue_attributes(&destination)
            .await
            .map_err(resolution_error)?;

        debug!(
            queue = %name,
            destination = %destination,
            has_redrive_policy = broker_attributes.has_redrive_policy(),
            "Resolved queue attributes"
        );

        Ok(QueueAttributes {
            name: name.to_string(),
            destination,
            settings,
            has_redrive_policy: broker_attributes.has_redrive_policy(),
        })
    }
}
