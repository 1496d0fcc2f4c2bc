//! Needs a live Redis: `REDIS_URL=redis://127.0.0.1:6379 cargo test -p flowgate-server --features e2e`

#![cfg(feature = "e2e")]

use std::{sync::Arc, time::Duration};

use flowgate_core::{
    bus::{Connection, EventBus, EventBusConfig, PublishOutcome, RelayState},
    mutex::{LockAcquisition, LockRequest, MutexService},
    queue::{AdmissionQueue, NoopNotifier},
};
use flowgate_server::infra::redis::{self, RedisLockStore, RedisQueueStore, RedisRelay};
use serde_json::json;
use uuid::Uuid;

fn redis_url() -> String {
    std::env::var("REDIS_URL").unwrap_or_else(|_| "redis://127.0.0.1:6379".to_string())
}

/// Unique prefix per test so runs do not collide.
fn scope() -> String {
    format!("flowgate-test:{}:", Uuid::now_v7())
}

fn request<'a>(owner: &'a str) -> LockRequest<'a> {
    LockRequest {
        lock_name: "upload",
        owner_id: owner,
        owner_display: owner,
        operation: "e2e",
    }
}

#[tokio::test]
async fn lease_is_exclusive_and_expires() {
    let (_client, manager) = redis::connect(&redis_url()).await.unwrap();
    let mutex = MutexService::new(Arc::new(RedisLockStore::new(manager, scope())));

    assert!(
        mutex
            .acquire(request("a"), Duration::from_millis(400))
            .await
            .unwrap()
            .is_granted()
    );
    match mutex
        .acquire(request("b"), Duration::from_secs(5))
        .await
        .unwrap()
    {
        LockAcquisition::Busy(Some(holder)) => assert_eq!(holder.owner_id, "a"),
        other => panic!("expected busy, got {other:?}"),
    }
    assert!(!mutex.release("upload", "b").await.unwrap());
    assert!(!mutex.extend("upload", "b", Duration::from_secs(5)).await.unwrap());

    tokio::time::sleep(Duration::from_millis(600)).await;
    assert!(
        mutex
            .acquire(request("b"), Duration::from_secs(5))
            .await
            .unwrap()
            .is_granted()
    );
    assert!(mutex.extend("upload", "b", Duration::from_secs(10)).await.unwrap());
    assert!(mutex.release("upload", "b").await.unwrap());
    assert!(!mutex.is_locked("upload").await.unwrap());
}

#[tokio::test]
async fn sorted_set_queue_orders_and_purges() {
    let (_client, manager) = redis::connect(&redis_url()).await.unwrap();
    let queue = AdmissionQueue::new(
        Arc::new(RedisQueueStore::new(manager)),
        Arc::new(NoopNotifier),
    )
    .with_key(format!("{}queue", scope()));

    assert_eq!(queue.enqueue("first").await.unwrap(), 1);
    tokio::time::sleep(Duration::from_millis(5)).await;
    assert_eq!(queue.enqueue("second").await.unwrap(), 2);
    assert_eq!(queue.enqueue("first").await.unwrap(), 1);
    assert_eq!(queue.depth().await.unwrap(), 2);

    tokio::time::sleep(Duration::from_millis(300)).await;
    assert_eq!(queue.enqueue("third").await.unwrap(), 3);

    let removed = queue.cleanup_stale(Duration::from_millis(200)).await.unwrap();
    assert_eq!(removed, 2);
    assert_eq!(
        queue.all_positions().await.unwrap(),
        vec![("third".to_string(), 1)]
    );
    assert!(queue.dequeue("third").await.unwrap());
}

#[tokio::test]
async fn pubsub_relay_reaches_both_processes_once() {
    let namespace = format!("{}bus", scope());
    let config = EventBusConfig {
        poll_interval: Duration::from_millis(100),
        ..EventBusConfig::default()
    };

    let mut buses = Vec::new();
    let mut receivers = Vec::new();
    for _ in 0..2 {
        let (client, manager) = redis::connect(&redis_url()).await.unwrap();
        let bus = EventBus::new(
            Arc::new(RedisRelay::new(client, manager, namespace.clone())),
            config.clone(),
        );
        let (conn, rx) = Connection::channel(16);
        bus.connect(Arc::new(conn), ["execution:42"]).await;
        assert_eq!(bus.state(), RelayState::Active);
        buses.push(bus);
        receivers.push(rx);
    }

    assert_eq!(
        buses[0].publish("execution:42", json!({"n": 1})).await,
        PublishOutcome::Relayed
    );

    for rx in receivers.iter_mut() {
        let text = tokio::time::timeout(Duration::from_secs(2), rx.recv())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(text, "{\"n\":1}");
    }
    tokio::time::sleep(Duration::from_millis(300)).await;
    for rx in receivers.iter_mut() {
        assert!(rx.try_recv().is_err());
    }

    for bus in &buses {
        bus.shutdown().await;
    }
}
