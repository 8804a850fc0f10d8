//! Queue Listener
//!
//! Polls the configured queues and hands every message to a handler that
//! logs it. Configuration comes from a TOML file plus `QL_*` environment
//! overrides (see `ql-config`).
//!
//! ## Development Mode
//!
//! Set `QL_DEV_MODE=true` (or `dev_mode = true`) to run against the in-process
//! memory broker. Queues are created on demand and a heartbeat message is
//! published to each of them periodically.

use anyhow::Result;
use async_trait::async_trait;
use ql_common::MESSAGE_ID;
use ql_config::{ConfigLoader, ListenerConfig};
use ql_container::{HandlerError, ListenerMessage, MessageHandler, MessageListenerContainer};
use ql_queue::memory::MemoryBroker;
use ql_queue::sqs::{load_client, SqsBroker};
use ql_queue::{CachingDestinationResolver, DestinationResolver, QueueBroker, QueuePublisher};
use std::sync::Arc;
use std::time::Duration;
use tokio::signal;
use tracing::{info, warn};

const HEARTBEAT_INTERVAL: Duration = Duration::from_secs(5);

/// Long-poll wait of memory queues for receive calls that set none
const MEMORY_WAIT_TIME: Duration = Duration::from_secs(1);

/// Logs every received message
struct LoggingHandler;

#[async_trait]
impl MessageHandler for LoggingHandler {
    async fn handle(&self, message: ListenerMessage) -> Result<(), HandlerError> {
        info!(
            queue = message.queue_name().unwrap_or_default(),
            message_id = message.header(MESSAGE_ID).unwrap_or_default(),
            payload_bytes = message.payload.len(),
            "Received message"
        );

        // Queues with the NEVER policy leave deletion to the handler
        if let Some(ack) = message.acknowledgment {
            ack.acknowledge()
                .await
                .map_err(|e| HandlerError::Unexpected(e.to_string()))?;
        }
        Ok(())
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    // Load .env file if present (for local development)
    let _ = dotenvy::dotenv();

    ql_common::logging::init_logging("ql-listener");

    let loader = match std::env::args().nth(1) {
        Some(path) => ConfigLoader::with_path(path),
        None => ConfigLoader::new(),
    };
    let config = loader.load()?;

    info!(
        queues = config.queues.len(),
        dev_mode = config.dev_mode,
        "Starting queue listener"
    );

    let (broker, resolver, publisher) = if config.dev_mode {
        memory_broker()
    } else {
        config.validate_for_sqs()?;
        sqs_broker(&config).await
    };

    let mut builder = MessageListenerContainer::builder(broker, resolver, Arc::new(LoggingHandler))
        .settings(config.container_settings());
    for queue in &config.queues {
        builder = builder.register_queue(queue.name.clone(), config.queue_settings(queue));
    }
    let container = builder.build().await;

    if container.registered_queues().is_empty() {
        warn!("No queues could be resolved, nothing to listen to");
    }

    if config.container.auto_startup {
        container.start_all()?;
    } else {
        info!("Auto startup disabled, queues stay stopped");
    }

    let heartbeat = publisher.map(|publisher| {
        let queues = container.registered_queues();
        tokio::spawn(publish_heartbeats(publisher, queues))
    });

    shutdown_signal().await;
    info!("Shutdown signal received");

    if let Some(task) = heartbeat {
        task.abort();
    }
    container.shutdown().await;

    info!("Queue listener stopped");
    Ok(())
}

type Collaborators = (
    Arc<dyn QueueBroker>,
    Arc<dyn DestinationResolver>,
    Option<QueuePublisher>,
);

fn memory_broker() -> Collaborators {
    info!("Using in-memory broker");
    let broker = Arc::new(
        MemoryBroker::new()
            .with_auto_create(true)
            .with_default_wait_time(MEMORY_WAIT_TIME),
    );
    let publisher = QueuePublisher::new(broker.clone(), broker.clone());
    (broker.clone(), broker, Some(publisher))
}

async fn sqs_broker(config: &ListenerConfig) -> Collaborators {
    let client = load_client(Some(&config.sqs.region), config.sqs.endpoint_url.as_deref()).await;
    let broker = Arc::new(SqsBroker::new(client).with_auto_create(config.sqs.auto_create_queues));
    let resolver = Arc::new(CachingDestinationResolver::new(broker.clone()));
    (broker, resolver, None)
}

async fn publish_heartbeats(publisher: QueuePublisher, queues: Vec<String>) {
    let mut interval = tokio::time::interval(HEARTBEAT_INTERVAL);
    loop {
        interval.tick().await;
        let payload = serde_json::json!({
            "type": "heartbeat",
            "sent_at": chrono::Utc::now().to_rfc3339(),
        });
        for queue in &queues {
            if let Err(e) = publisher.publish(queue, &payload).await {
                warn!(queue = %queue, error = %e, "Failed to publish heartbeat");
            }
        }
    }
}

async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("failed to install signal handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
