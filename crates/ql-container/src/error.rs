use ql_queue::QueueError;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ContainerError {
    #[error("Queue not registered: {0}")]
    QueueNotRegistered(String),

    #[error("Failed to resolve queue {queue}: {source}")]
    Resolution {
        queue: String,
        #[source]
        source: QueueError,
    },

    #[error("Worker pool is closed")]
    PoolClosed,

    #[error("Container has been shut down")]
    ShutDown,
}

/// Failure reported by (or on behalf of) a message handler
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum HandlerError {
    /// The handler could not process the message
    #[error("Processing failed: {0}")]
    Processing(String),

    /// Any other failure, including a panicking handler
    #[error("Unexpected handler failure: {0}")]
    Unexpected(String),
}

impl HandlerError {
    pub fn processing(msg: impl Into<String>) -> Self {
        HandlerError::Processing(msg.into())
    }
}
