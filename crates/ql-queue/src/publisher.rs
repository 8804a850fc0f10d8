//! Queue publisher with delayed delivery
//!
//! Brokers accept delivery delays in whole seconds up to 15 minutes. Requested
//! delays are normalized: anything between 1ms and 1s becomes 1s, anything
//! above 900s is capped at 900s.

use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

use crate::{DestinationResolver, MessageSender, Result};

/// Largest delivery delay brokers accept
pub const MAX_DELAY: Duration = Duration::from_secs(900);

/// Convert a requested delay into the whole seconds sent to the broker
pub fn delay_seconds(delay: Duration) -> u32 {
    if delay.is_zero() {
        return 0;
    }
    if delay < Duration::from_secs(1) {
        debug!(delay_ms = delay.as_millis() as u64, "Delay too small, assuming 1000ms");
        return 1;
    }
    if delay > MAX_DELAY {
        debug!(delay_ms = delay.as_millis() as u64, "Delay too big, assuming 900s");
        return MAX_DELAY.as_secs() as u32;
    }
    delay.as_secs() as u32
}

pub struct QueuePublisher {
    sender: Arc<dyn MessageSender>,
    resolver: Arc<dyn DestinationResolver>,
}

impl QueuePublisher {
    pub fn new(sender: Arc<dyn MessageSender>, resolver: Arc<dyn DestinationResolver>) -> Self {
        Self { sender, resolver }
    }

    /// Publish a payload for immediate delivery
    pub async fn publish<T: Serialize + ?Sized>(&self, queue_name: &str, payload: &T) -> Result<String> {
        self.publish_with_delay(queue_name, payload, Duration::ZERO).await
    }

    /// Publish a payload that becomes visible after `delay`
    pub async fn publish_with_delay<T: Serialize + ?Sized>(
        &self,
        queue_name: &str,
        payload: &T,
        delay: Duration,
    ) -> Result<String> {
        let body = serde_json::to_string(payload)?;
        self.publish_raw(queue_name, &body, delay).await
    }

    /// Publish an already-encoded body
    pub async fn publish_raw(&self, queue_name: &str, body: &str, delay: Duration) -> Result<String> {
        let destination = self.resolver.resolve(queue_name).await?;
        let delay_seconds = delay_seconds(delay);

        debug!(
            queue = %queue_name,
            delay_seconds = delay_seconds,
            "Publishing message to queue"
        );
        self.sender.send(&destination, body, delay_seconds).await
    }
}
