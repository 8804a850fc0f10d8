//! Per-message work executed on the worker pool

use futures::FutureExt;
use ql_common::{DeletionPolicy, ReceivedMessage, LOGICAL_RESOURCE_ID, MESSAGE_ID, RECEIPT_HANDLE};
use ql_queue::QueueBroker;
use std::any::Any;
use std::collections::HashMap;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use tracing::{debug, error, warn};

use crate::deletion::{decide, DeletionDecision, HandlerOutcome};
use crate::handler::{Acknowledgment, ListenerMessage, MessageHandler};
use crate::resolver::QueueAttributes;
use crate::slot_gate::SlotPermit;
use crate::HandlerError;

/// What a worker needs to settle one delivery
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InFlightHandle {
    pub receipt_handle: String,
    pub queue_name: String,
    pub destination: String,
    pub has_redrive_policy: bool,
    pub deletion_policy: DeletionPolicy,
}

impl InFlightHandle {
    pub fn new(queue: &QueueAttributes, receipt_handle: impl Into<String>) -> Self {
        Self {
            receipt_handle: receipt_handle.into(),
            queue_name: queue.name.clone(),
            destination: queue.destination.clone(),
            has_redrive_policy: queue.has_redrive_policy,
            deletion_policy: queue.deletion_policy(),
        }
    }
}

pub struct DispatchTask {
    handle: InFlightHandle,
    message: ReceivedMessage,
    handler: Arc<dyn MessageHandler>,
    broker: Arc<dyn QueueBroker>,
    permit: SlotPermit,
}

impl DispatchTask {
    pub fn new(
        queue: &QueueAttributes,
        message: ReceivedMessage,
        handler: Arc<dyn MessageHandler>,
        broker: Arc<dyn QueueBroker>,
        permit: SlotPermit,
    ) -> Self {
        Self {
            handle: InFlightHandle::new(queue, message.receipt_handle.clone()),
            message,
            handler,
            broker,
            permit,
        }
    }

    /// Invoke the handler, apply the deletion policy and free the slot.
    /// Never fails: every handler failure is settled here.
    pub async fn run(self) {
        let DispatchTask {
            handle,
            message,
            handler,
            broker,
            permit,
        } = self;

        let message_id = message.message_id.clone().unwrap_or_default();
        let payload = listener_message(&handle, message, &broker);

        let outcome = match AssertUnwindSafe(handler.handle(payload)).catch_unwind().await {
            Ok(Ok(())) => HandlerOutcome::Success,
            Ok(Err(e)) => {
                report_failure(&handle, &message_id, &e);
                HandlerOutcome::Failure
            }
            Err(panic) => {
                let e = HandlerError::Unexpected(panic_message(panic.as_ref()));
                report_failure(&handle, &message_id, &e);
                HandlerOutcome::Failure
            }
        };

        if decide(handle.deletion_policy, outcome, handle.has_redrive_policy) == DeletionDecision::Delete {
            match broker.delete(&handle.destination, &handle.receipt_handle).await {
                Ok(()) => debug!(
                    queue = %handle.queue_name,
                    message_id = %message_id,
                    outcome = ?outcome,
                    "Message deleted"
                ),
                Err(e) => warn!(
                    queue = %handle.queue_name,
                    message_id = %message_id,
                    error = %e,
                    "Failed to delete message"
                ),
            }
        }

        drop(permit);
    }
}

fn report_failure(handle: &InFlightHandle, message_id: &str, e: &HandlerError) {
    match handle.deletion_policy {
        DeletionPolicy::OnSuccess => error!(
            queue = %handle.queue_name,
            message_id = %message_id,
            error = %e,
            "Handler failed, message left on queue for redelivery"
        ),
        policy => warn!(
            queue = %handle.queue_name,
            message_id = %message_id,
            deletion_policy = %policy,
            error = %e,
            "Handler failed"
        ),
    }
}

fn listener_message(
    handle: &InFlightHandle,
    message: ReceivedMessage,
    broker: &Arc<dyn QueueBroker>,
) -> ListenerMessage {
    let ReceivedMessage {
        message_id,
        receipt_handle,
        body,
        attributes,
        message_attributes,
    } = message;

    let mut headers: HashMap<String, String> = attributes;
    headers.extend(message_attributes);
    headers.insert(LOGICAL_RESOURCE_ID.to_string(), handle.queue_name.clone());
    headers.insert(RECEIPT_HANDLE.to_string(), receipt_handle);
    if let Some(id) = message_id {
        headers.insert(MESSAGE_ID.to_string(), id);
    }

    let acknowledgment = (handle.deletion_policy == DeletionPolicy::Never).then(|| {
        Acknowledgment::new(
            Arc::clone(broker),
            handle.queue_name.clone(),
            handle.destination.clone(),
            handle.receipt_handle.clone(),
        )
    });

    ListenerMessage {
        payload: body,
        headers,
        acknowledgment,
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "handler panicked".to_string()
    }
}
