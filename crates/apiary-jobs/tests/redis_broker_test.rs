//! Integration tests for the Redis broker.
//!
//! These tests run against a real Redis server using testcontainers.
//! Requires Docker to be available on the system.

mod common;

use apiary_config::QueueOverrides;
use apiary_jobs::{
    Broker, ConfigResolver, JobError, JobOptions, QueueBackend, QueueEvent, QueueService, RedisBroker,
    RedisKeys,
};
use common::{next_outcome, wait_for, TestRedis};
use serde_json::json;
use std::sync::Arc;

#[tokio::test]
#[ignore = "requires Docker"]
async fn test_connect_and_health_snapshot() {
    let redis = TestRedis::new().await;
    let resolver = ConfigResolver::new(redis.bee("emails", QueueOverrides::default()));
    let broker = RedisBroker::new();
    let queue = broker
        .open("emails", &resolver.resolve_queue_config("emails"))
        .unwrap();

    let mut rx = queue.subscribe();
    queue.connect().await.unwrap();
    assert!(matches!(wait_for(&mut rx, |_| true).await, QueueEvent::Ready));

    queue.create_job(json!({"to": "a@example.com"}), JobOptions::default()).await.unwrap();
    queue.create_job(json!({"to": "b@example.com"}), JobOptions::default()).await.unwrap();

    let snapshot = queue.check_health().await.expect("health check failed");
    assert_eq!(snapshot.waiting, 2);
    assert_eq!(snapshot.active, 0);
    assert_eq!(snapshot.newest_job.map(|id| id.to_string()), Some("2".to_string()));
}

#[tokio::test]
#[ignore = "requires Docker"]
async fn test_process_success_and_failure() {
    let redis = TestRedis::new().await;
    let service = QueueService::builder(
        redis.bee("emails", QueueOverrides::default()),
        Arc::new(RedisBroker::new()),
    )
    .worker("emails", |job| async move {
        if job.data["fail"].as_bool().unwrap_or(false) {
            Err(JobError::failed("smtp rejected"))
        } else {
            Ok(json!({"sent": true}))
        }
    })
    .build();

    let producer = service.get_queue("emails").unwrap();
    let mut rx = producer.subscribe();
    let running = service.run().await.expect("failed to start queues");

    producer.create_job(json!({}), JobOptions::default()).await.unwrap();
    assert!(matches!(next_outcome(&mut rx).await, QueueEvent::Succeeded { .. }));

    producer
        .create_job(json!({"fail": true}), JobOptions::default().retries(1))
        .await
        .unwrap();
    assert!(matches!(next_outcome(&mut rx).await, QueueEvent::Retrying { .. }));
    match next_outcome(&mut rx).await {
        QueueEvent::Failed { job, error } => {
            assert_eq!(job.attempts_made, 2);
            assert!(error.contains("smtp rejected"));
        }
        other => panic!("unexpected event {:?}", other),
    }

    let snapshot = producer.check_health().await.unwrap();
    assert_eq!(snapshot.succeeded, 1);
    assert_eq!(snapshot.failed, 1);

    for queue in &running {
        queue.abort();
    }
}

#[tokio::test]
#[ignore = "requires Docker"]
async fn test_stall_sweep_requeues_abandoned_job() {
    let redis = TestRedis::new().await;
    let overrides = QueueOverrides {
        stall_interval: Some(200),
        ..QueueOverrides::default()
    };
    let resolver = ConfigResolver::new(redis.bee("emails", overrides));
    let config = resolver.resolve_queue_config("emails");
    let broker = RedisBroker::new();

    let queue = broker.open("emails", &config).unwrap();
    queue.connect().await.unwrap();
    let mut rx = queue.subscribe();
    let id = queue.create_job(json!({}), JobOptions::default()).await.unwrap();

    let worker = queue
        .process(
            1,
            apiary_jobs::handler_fn(|_job| async {
                tokio::time::sleep(std::time::Duration::from_secs(3600)).await;
                Ok(serde_json::Value::Null)
            }),
        )
        .await
        .unwrap();

    while queue.check_health().await.unwrap().active == 0 {
        tokio::time::sleep(std::time::Duration::from_millis(20)).await;
    }
    worker.abort();
    tokio::time::sleep(std::time::Duration::from_millis(500)).await;

    let report = queue.check_stalled_jobs().await.unwrap();
    assert_eq!(report.count, 1);
    match wait_for(&mut rx, |event| matches!(event, QueueEvent::Stalled { .. })).await {
        QueueEvent::Stalled { job_id } => assert_eq!(job_id, id),
        other => panic!("unexpected event {:?}", other),
    }

    let snapshot = queue.check_health().await.unwrap();
    assert_eq!(snapshot.active, 0);
    assert_eq!(snapshot.waiting, 1);
}

#[tokio::test]
#[ignore = "requires Docker"]
async fn test_stall_sweep_recovers_active_job_without_claim() {
    let redis = TestRedis::new().await;
    let resolver = ConfigResolver::new(redis.bee("emails", QueueOverrides::default()));
    let config = resolver.resolve_queue_config("emails");
    let keys = RedisKeys::new(&config.prefix, "emails");
    let broker = RedisBroker::new();

    let queue = broker.open("emails", &config).unwrap();
    queue.connect().await.unwrap();
    let id = queue.create_job(json!({}), JobOptions::default()).await.unwrap();

    // Move the job to active the way a claim does, but never record the claim.
    let client = redis::Client::open(redis.url()).unwrap();
    let mut conn = client.get_multiplexed_async_connection().await.unwrap();
    let moved: Option<String> = redis::cmd("RPOPLPUSH")
        .arg(keys.waiting())
        .arg(keys.active())
        .query_async(&mut conn)
        .await
        .unwrap();
    assert_eq!(moved.as_deref(), Some(id.as_str()));

    let first = queue.check_stalled_jobs().await.unwrap();
    assert_eq!(first.count, 0);
    assert_eq!(queue.check_health().await.unwrap().active, 1);

    let mut rx = queue.subscribe();
    let second = queue.check_stalled_jobs().await.unwrap();
    assert_eq!(second.count, 1);
    match wait_for(&mut rx, |event| matches!(event, QueueEvent::Stalled { .. })).await {
        QueueEvent::Stalled { job_id } => assert_eq!(job_id, id),
        other => panic!("unexpected event {:?}", other),
    }

    let snapshot = queue.check_health().await.unwrap();
    assert_eq!(snapshot.active, 0);
    assert_eq!(snapshot.waiting, 1);
}
