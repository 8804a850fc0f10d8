use thiserror::Error;

#[derive(Error, Debug)]
pub enum QueueError {
    #[error("Queue not found: {0}")]
    NotFound(String),

    #[error("Broker error: {0}")]
    Broker(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}
