//! Container lifecycle tests
//!
//! Tests for:
//! - Startup resolution (missing queues are skipped)
//! - Worker pool sizing
//! - start/stop idempotency and unknown queues
//! - Bounded stop waits
//! - Shutdown
//! - Idle polling against a broker that answers empty queues at once

mod common;

use common::{fast_settings, wait_until, Behavior, CountingBroker, RecordingHandler, ScriptedBroker};
use ql_common::{ContainerSettings, QueueSettings};
use ql_container::{ContainerError, MessageListenerContainer, QueueState};
use ql_queue::memory::MemoryBroker;
use ql_queue::MessageSender;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio_test::assert_ok;

async fn container_for(
    broker: &Arc<ScriptedBroker>,
    handler: &Arc<RecordingHandler>,
    queues: &[&str],
) -> MessageListenerContainer {
    let mut builder = MessageListenerContainer::builder(broker.clone(), broker.clone(), handler.clone())
        .settings(fast_settings());
    for name in queues {
        builder = builder.register_queue(*name, QueueSettings::default());
    }
    builder.build().await
}

#[tokio::test]
async fn test_unresolvable_queues_are_skipped() {
    let broker = Arc::new(ScriptedBroker::new());
    broker.mark_missing("ghost");
    // First attribute lookup ("flaky") fails
    broker.fail_attribute_lookups(1);
    let handler = Arc::new(RecordingHandler::new(Behavior::Succeed));

    let container = container_for(&broker, &handler, &["flaky", "ghost", "orders"]).await;

    assert_eq!(container.registered_queues(), vec!["orders".to_string()]);
    assert!(container.is_active());
    assert_eq!(container.queue_state("ghost"), None);
    assert_eq!(container.available_slots("orders"), Some(10));

    let attrs = container.queue_attributes("orders").unwrap();
    assert_eq!(attrs.destination, "scripted://orders");
    assert!(!attrs.has_redrive_policy);
}

#[tokio::test]
async fn test_pool_sizing() {
    let broker = Arc::new(ScriptedBroker::new());
    let handler = Arc::new(RecordingHandler::new(Behavior::Succeed));

    let container = MessageListenerContainer::builder(broker.clone(), broker.clone(), handler.clone())
        .register_queue("a", QueueSettings::default())
        .register_queue("b", QueueSettings::default().with_max_batch_size(4))
        .register_queue("c", QueueSettings::default())
        .build()
        .await;

    let stats = container.pool_stats();
    assert_eq!(stats.core_size, 6);
    assert_eq!(stats.max_size, 24);
    assert_eq!(stats.active, 0);
}

#[tokio::test]
async fn test_duplicate_and_zero_batch_registrations_are_ignored() {
    let broker = Arc::new(ScriptedBroker::new());
    let handler = Arc::new(RecordingHandler::new(Behavior::Succeed));

    let container = MessageListenerContainer::builder(broker.clone(), broker.clone(), handler.clone())
        .register_queue("a", QueueSettings::default().with_max_batch_size(3))
        .register_queue("a", QueueSettings::default().with_max_batch_size(7))
        .register_queue("empty", QueueSettings::default().with_max_batch_size(0))
        .build()
        .await;

    assert_eq!(container.registered_queues(), vec!["a".to_string()]);
    assert_eq!(container.available_slots("a"), Some(3));
}

#[tokio::test]
async fn test_start_is_idempotent() {
    let broker = Arc::new(ScriptedBroker::new());
    let handler = Arc::new(RecordingHandler::new(Behavior::Succeed));
    let container = container_for(&broker, &handler, &["orders"]).await;

    assert_eq!(container.queue_state("orders"), Some(QueueState::Stopped));
    assert!(!container.is_container_running());

    assert_ok!(container.start("orders"));
    assert_ok!(container.start("orders"));
    assert!(container.is_running("orders"));
    assert_eq!(container.queue_state("orders"), Some(QueueState::Running));
    assert!(container.is_container_running());

    assert_ok!(container.stop("orders").await);
    assert!(!container.is_running("orders"));
    assert_eq!(container.queue_state("orders"), Some(QueueState::Stopped));

    // Restart after stop
    assert_ok!(container.start("orders"));
    assert!(container.is_running("orders"));
    container.shutdown().await;
}

#[tokio::test]
async fn test_unknown_queue_is_rejected() {
    let broker = Arc::new(ScriptedBroker::new());
    let handler = Arc::new(RecordingHandler::new(Behavior::Succeed));
    let container = container_for(&broker, &handler, &["orders"]).await;

    assert!(matches!(
        container.stop("nope").await,
        Err(ContainerError::QueueNotRegistered(name)) if name == "nope"
    ));
    assert!(matches!(
        container.start("nope"),
        Err(ContainerError::QueueNotRegistered(_))
    ));
    assert!(!container.is_running("nope"));

    // Stopping a registered but idle queue is fine
    assert_ok!(container.stop("orders").await);
}

#[tokio::test]
async fn test_start_all_and_stop_all() {
    let broker = Arc::new(ScriptedBroker::new());
    let handler = Arc::new(RecordingHandler::new(Behavior::Succeed));
    let container = container_for(&broker, &handler, &["a", "b", "c"]).await;

    assert_ok!(container.start_all());
    for name in ["a", "b", "c"] {
        assert!(container.is_running(name));
    }

    // Every poller is issuing receive calls
    assert!(
        wait_until(
            || {
                let calls = broker.receive_calls();
                ["a", "b", "c"].iter().all(|q| {
                    calls
                        .iter()
                        .any(|c| c.destination == format!("scripted://{}", q))
                })
            },
            Duration::from_secs(2)
        )
        .await
    );

    assert_ok!(container.stop_all().await);
    assert!(!container.is_container_running());
    for name in ["a", "b", "c"] {
        assert_eq!(container.queue_state(name), Some(QueueState::Stopped));
    }
}

#[tokio::test]
async fn test_stop_gives_up_after_timeout() {
    let broker = Arc::new(ScriptedBroker::new());
    broker.push_hang("orders", Duration::from_secs(5));
    let handler = Arc::new(RecordingHandler::new(Behavior::Succeed));

    let mut settings = fast_settings();
    settings.queue_stop_timeout = Duration::from_millis(200);
    let container = MessageListenerContainer::builder(broker.clone(), broker.clone(), handler.clone())
        .settings(settings)
        .register_queue("orders", QueueSettings::default())
        .build()
        .await;

    assert_ok!(container.start("orders"));
    assert!(wait_until(|| broker.receive_count() == 1, Duration::from_secs(1)).await);

    // The poller is stuck in a receive call that is never interrupted
    let started = Instant::now();
    assert_ok!(container.stop("orders").await);
    let elapsed = started.elapsed();

    assert!(elapsed >= Duration::from_millis(200));
    assert!(elapsed < Duration::from_secs(2));
    assert_eq!(container.queue_state("orders"), Some(QueueState::Stopped));
}

#[tokio::test]
async fn test_restart_after_timed_out_stop_runs_one_poller() {
    let broker = Arc::new(ScriptedBroker::new());
    broker.push_hang("orders", Duration::from_millis(400));
    let handler = Arc::new(RecordingHandler::new(Behavior::Succeed));

    let mut settings = fast_settings();
    settings.queue_stop_timeout = Duration::from_millis(50);
    let container = MessageListenerContainer::builder(broker.clone(), broker.clone(), handler.clone())
        .settings(settings)
        .register_queue("orders", QueueSettings::default().with_wait_time(Duration::from_millis(100)))
        .build()
        .await;

    assert_ok!(container.start("orders"));
    assert!(wait_until(|| broker.receive_count() == 1, Duration::from_secs(1)).await);
    assert_ok!(container.stop("orders").await);
    assert_ok!(container.start("orders"));

    // Let the stale poller's receive return; it must exit instead of polling on
    tokio::time::sleep(Duration::from_millis(700)).await;
    let before = broker.receive_count();
    tokio::time::sleep(Duration::from_millis(500)).await;
    let during = broker.receive_count() - before;

    // One poller with a 100ms long poll makes about 5 calls in 500ms
    assert!(during <= 7, "expected a single poller, saw {} calls", during);
    container.shutdown().await;
}

#[tokio::test]
async fn test_shutdown_rejects_further_operations() {
    let broker = Arc::new(ScriptedBroker::new());
    let handler = Arc::new(RecordingHandler::new(Behavior::Succeed));
    let container = container_for(&broker, &handler, &["orders"]).await;

    assert_ok!(container.start_all());
    container.shutdown().await;

    assert!(!container.is_active());
    assert!(!container.is_running("orders"));
    assert!(matches!(container.start("orders"), Err(ContainerError::ShutDown)));
    assert!(matches!(container.start_all(), Err(ContainerError::ShutDown)));
    assert!(matches!(container.stop("orders").await, Err(ContainerError::ShutDown)));
    assert!(matches!(container.stop_all().await, Err(ContainerError::ShutDown)));

    // Second shutdown is a no-op
    container.shutdown().await;
}

#[tokio::test]
async fn test_no_receive_after_stop() {
    let broker = Arc::new(ScriptedBroker::new());
    let handler = Arc::new(RecordingHandler::new(Behavior::Succeed));
    let container = container_for(&broker, &handler, &["orders"]).await;

    assert_ok!(container.start("orders"));
    assert!(wait_until(|| broker.receive_count() >= 2, Duration::from_secs(1)).await);
    assert_ok!(container.stop("orders").await);

    let after_stop = broker.receive_count();
    tokio::time::sleep(Duration::from_millis(150)).await;
    assert_eq!(broker.receive_count(), after_stop);
}

#[tokio::test]
async fn test_memory_broker_without_wait_time_stays_responsive() {
    let memory = Arc::new(MemoryBroker::new());
    let destination = memory.create_queue("q");
    let broker = Arc::new(CountingBroker::new(memory.clone()));
    let handler = Arc::new(RecordingHandler::new(Behavior::Succeed));

    // Default settings, and no long-poll wait on the queue
    let container = MessageListenerContainer::builder(broker.clone(), memory.clone(), handler.clone())
        .register_queue("q", QueueSettings::default())
        .build()
        .await;
    assert_ok!(container.start("q"));

    // The idle poller leaves room for timers on this single-threaded runtime
    assert_ok!(
        tokio::time::timeout(
            Duration::from_secs(2),
            tokio::time::sleep(Duration::from_millis(10))
        )
        .await
    );

    let before = broker.receive_count();
    tokio::time::sleep(Duration::from_millis(500)).await;
    let during = broker.receive_count() - before;
    // 100ms between empty receives: about 5 calls
    assert!(during <= 8, "expected paced receives, saw {} calls", during);

    assert_ok!(memory.send(&destination, "hello", 0).await);
    assert!(wait_until(|| handler.completed() == 1, Duration::from_secs(2)).await);
    assert!(wait_until(|| memory.queue_depth("q") == 0, Duration::from_secs(2)).await);

    let started = Instant::now();
    assert_ok!(container.stop("q").await);
    assert!(started.elapsed() < ContainerSettings::default().queue_stop_timeout);
    assert!(started.elapsed() < Duration::from_secs(1));
    assert_eq!(container.queue_state("q"), Some(QueueState::Stopped));

    container.shutdown().await;
}
