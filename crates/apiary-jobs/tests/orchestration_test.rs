//! Integration tests for queue orchestration against the in-memory broker.
//!
//! Timer-driven tests run on a paused clock, so waits are virtual.

mod common;

use apiary_config::BeeSettings;
use apiary_jobs::{
    JobError, JobOptions, MemoryBroker, MonitorSettings, QueueEvent, QueueService, RECONNECT_DELAY,
};
use common::{bee_with_concurrency, next_outcome, wait_for};
use serde_json::{json, Value};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;

#[tokio::test(start_paused = true)]
async fn test_concurrency_limit_is_respected() {
    let broker = MemoryBroker::new();
    let in_flight = Arc::new(AtomicUsize::new(0));
    let peak = Arc::new(AtomicUsize::new(0));

    let service = {
        let in_flight = in_flight.clone();
        let peak = peak.clone();
        QueueService::builder(bee_with_concurrency("default", 2), Arc::new(broker.clone()))
            .worker("default", move |job| {
                let in_flight = in_flight.clone();
                let peak = peak.clone();
                async move {
                    let now = in_flight.fetch_add(1, Ordering::SeqCst) + 1;
                    peak.fetch_max(now, Ordering::SeqCst);
                    tokio::time::sleep(Duration::from_millis(100)).await;
                    in_flight.fetch_sub(1, Ordering::SeqCst);
                    Ok(job.data)
                }
            })
            .build()
    };

    let producer = service.get_queue("default").unwrap();
    let mut rx = producer.subscribe();
    for n in 0..3 {
        producer.create_job(json!({ "n": n }), JobOptions::default()).await.unwrap();
    }

    let start = Instant::now();
    let running = service.run().await.unwrap();

    for _ in 0..3 {
        assert!(matches!(next_outcome(&mut rx).await, QueueEvent::Succeeded { .. }));
    }

    assert_eq!(peak.load(Ordering::SeqCst), 2);
    assert!(start.elapsed() >= Duration::from_millis(200));
    assert_eq!(running[0].concurrency(), 2);

    for queue in &running {
        queue.abort();
    }
}

#[tokio::test(start_paused = true)]
async fn test_queues_run_independently() {
    let broker = MemoryBroker::new();
    let mut bee = bee_with_concurrency("slow", 1);
    bee.extend(bee_with_concurrency("fast", 1));

    let service = QueueService::builder(bee, Arc::new(broker.clone()))
        .worker("slow", |_job| async {
            tokio::time::sleep(Duration::from_secs(3600)).await;
            Ok(Value::Null)
        })
        .worker("fast", |job| async move { Ok(job.data) })
        .build();

    let slow = service.get_queue("slow").unwrap();
    let fast = service.get_queue("fast").unwrap();
    let mut fast_rx = fast.subscribe();

    slow.create_job(json!("blocker"), JobOptions::default()).await.unwrap();
    let running = service.run().await.unwrap();

    let start = Instant::now();
    fast.create_job(json!(1), JobOptions::default()).await.unwrap();
    fast.create_job(json!(2), JobOptions::default()).await.unwrap();

    for expected in [json!(1), json!(2)] {
        match next_outcome(&mut fast_rx).await {
            QueueEvent::Succeeded { result, .. } => assert_eq!(result, expected),
            other => panic!("unexpected event {:?}", other),
        }
    }
    assert!(start.elapsed() < Duration::from_secs(1));

    for queue in &running {
        queue.abort();
    }
}

#[tokio::test(start_paused = true)]
async fn test_reconnects_with_constant_delay_then_ready() {
    let broker = MemoryBroker::new();
    broker.fail_next_connects("default", 3);

    let service = QueueService::builder(BeeSettings::new(), Arc::new(broker.clone()))
        .worker("default", |_job| async { Ok(Value::Null) })
        .build();

    let mut rx = service.get_queue("default").unwrap().subscribe();
    let start = Instant::now();
    let running = service.run().await.unwrap();

    let mut errors = 0;
    loop {
        match wait_for(&mut rx, |_| true).await {
            QueueEvent::Error { .. } => errors += 1,
            QueueEvent::Ready => break,
            other => panic!("unexpected event {:?}", other),
        }
    }

    assert_eq!(errors, 3);
    assert_eq!(broker.connect_attempts("default"), 4);
    assert_eq!(broker.times_connected("default"), 1);
    assert_eq!(start.elapsed(), RECONNECT_DELAY * 3);

    running[0].abort();
}

#[tokio::test(start_paused = true)]
async fn test_handler_error_emits_failed_and_queue_continues() {
    let broker = MemoryBroker::new();
    let service = QueueService::builder(bee_with_concurrency("default", 1), Arc::new(broker.clone()))
        .worker("default", |job| async move {
            if job.data["fail"].as_bool().unwrap_or(false) {
                Err(JobError::failed("boom"))
            } else {
                Ok(json!("ok"))
            }
        })
        .build();

    let producer = service.get_queue("default").unwrap();
    let mut rx = producer.subscribe();
    let running = service.run().await.unwrap();

    let bad = producer.create_job(json!({"fail": true}), JobOptions::default()).await.unwrap();
    match next_outcome(&mut rx).await {
        QueueEvent::Failed { job, error } => {
            assert_eq!(job.id, bad);
            assert!(error.contains("boom"));
        }
        other => panic!("unexpected event {:?}", other),
    }

    let good = producer.create_job(json!({}), JobOptions::default()).await.unwrap();
    match next_outcome(&mut rx).await {
        QueueEvent::Succeeded { job, result } => {
            assert_eq!(job.id, good);
            assert_eq!(result, json!("ok"));
        }
        other => panic!("unexpected event {:?}", other),
    }

    let snapshot = producer.check_health().await.unwrap();
    assert_eq!(snapshot.failed, 1);
    assert_eq!(snapshot.succeeded, 1);

    running[0].abort();
}

#[tokio::test(start_paused = true)]
async fn test_health_probe_recovers_after_failed_tick() {
    let broker = MemoryBroker::new();
    broker.fail_next_health_checks("default", 1);

    let service = QueueService::builder(BeeSettings::new(), Arc::new(broker.clone()))
        .worker("default", |_job| async { Ok(Value::Null) })
        .monitor_settings(MonitorSettings::default())
        .build();

    let running = service.run().await.unwrap();
    let queue = &running[0];

    tokio::time::sleep(Duration::from_millis(5500)).await;
    assert_eq!(queue.stats().health_failed(), 1);
    assert_eq!(queue.stats().health_ok(), 0);

    tokio::time::sleep(Duration::from_secs(5)).await;
    assert_eq!(queue.stats().health_failed(), 1);
    assert_eq!(queue.stats().health_ok(), 1);
    assert_eq!(queue.stats().sweeps_ok(), 2);

    queue.abort();
}

#[tokio::test(start_paused = true)]
async fn test_duplicate_registration_last_wins() {
    let broker = MemoryBroker::new();
    let service = QueueService::builder(BeeSettings::new(), Arc::new(broker.clone()))
        .worker("default", |_job| async { Ok(json!("first")) })
        .worker("default", |_job| async { Ok(json!("second")) })
        .build();

    assert_eq!(service.processors().len(), 1);

    let producer = service.get_queue("default").unwrap();
    let mut rx = producer.subscribe();
    let running = service.run().await.unwrap();
    producer.create_job(json!({}), JobOptions::default()).await.unwrap();

    match next_outcome(&mut rx).await {
        QueueEvent::Succeeded { result, .. } => assert_eq!(result, json!("second")),
        other => panic!("unexpected event {:?}", other),
    }

    running[0].abort();
}

#[tokio::test]
async fn test_missing_handler_is_fatal_before_network() {
    let broker = MemoryBroker::new();
    let service = QueueService::builder(BeeSettings::new(), Arc::new(broker.clone()))
        .worker("emails", |_job| async { Ok(Value::Null) })
        .build();

    let err = service
        .dispatcher()
        .start_queues(&["emails".to_string(), "ghost".to_string()])
        .await
        .unwrap_err();

    assert!(matches!(err, JobError::MissingHandler(ref name) if name == "ghost"));
    assert!(err.is_configuration());
    assert_eq!(broker.connect_attempts("emails"), 0);
    assert_eq!(broker.connect_attempts("ghost"), 0);
}

#[tokio::test(start_paused = true)]
async fn test_abort_stops_every_task() {
    let broker = MemoryBroker::new();
    let service = QueueService::builder(BeeSettings::new(), Arc::new(broker.clone()))
        .worker("default", |_job| async { Ok(Value::Null) })
        .build();

    let running = service.run().await.unwrap();
    let queue = &running[0];
    assert!(!queue.is_finished());

    queue.abort();
    for _ in 0..10 {
        if queue.is_finished() {
            break;
        }
        tokio::time::sleep(Duration::from_millis(1)).await;
    }
    assert!(queue.is_finished());
}
