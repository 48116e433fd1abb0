//! Concurrent configuration writers, readers and reschedules

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use assert_matches::assert_matches;
use serde_json::json;
use telemetry_emitter::{config::ConfigurationManager, scheduler::SchedulerState};

use crate::helpers::*;

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_updates_to_different_fields_all_land() {
    let manager = Arc::new(ConfigurationManager::default());

    let updates = [
        json!({ "pubSubPublish": false }),
        json!({ "mqttTopic": "fleet/metrics" }),
        json!({ "telemetryPublishIntervalMs": 5000 }),
    ];
    let handles: Vec<_> = updates
        .into_iter()
        .map(|update| {
            let manager = Arc::clone(&manager);
            tokio::task::spawn_blocking(move || manager.apply_update(&raw(update)))
        })
        .collect();

    for handle in handles {
        handle.await.unwrap();
    }

    let current = manager.current();
    assert!(!current.pub_sub_publish());
    assert_eq!(current.mqtt_topic(), "fleet/metrics");
    assert_eq!(current.telemetry_publish_interval_ms(), 5000);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_readers_never_see_mixed_snapshots() {
    let manager = Arc::new(ConfigurationManager::default());
    let done = Arc::new(AtomicBool::new(false));

    let writer = {
        let manager = Arc::clone(&manager);
        tokio::task::spawn_blocking(move || {
            for i in 0..500 {
                let update = if i % 2 == 0 {
                    json!({ "pubSubPublish": true, "mqttTopic": "a", "telemetryPublishIntervalMs": 1000 })
                } else {
                    json!({ "pubSubPublish": false, "mqttTopic": "b", "telemetryPublishIntervalMs": 2000 })
                };
                manager.apply_update(&raw(update));
            }
        })
    };

    let readers: Vec<_> = (0..3)
        .map(|_| {
            let manager = Arc::clone(&manager);
            let done = Arc::clone(&done);
            tokio::task::spawn_blocking(move || {
                while !done.load(Ordering::SeqCst) {
                    let snapshot = manager.current();
                    if snapshot.mqtt_topic().is_empty() {
                        continue;
                    }
                    let first = snapshot.mqtt_topic() == "a";
                    assert_eq!(snapshot.pub_sub_publish(), first);
                    let expected = if first { 1000 } else { 2000 };
                    assert_eq!(snapshot.telemetry_publish_interval_ms(), expected);
                }
            })
        })
        .collect();

    writer.await.unwrap();
    done.store(true, Ordering::SeqCst);
    for reader in readers {
        reader.await.unwrap();
    }
}

#[tokio::test(start_paused = true)]
async fn test_burst_of_interval_changes_leaves_one_task() {
    let mut harness = Harness::new();
    harness.update(json!({ "telemetryPublishIntervalMs": 1000 }));
    harness.emitter.start().await;

    for interval in [600, 700, 800, 900, 1500] {
        harness.update(json!({ "telemetryPublishIntervalMs": interval }));
        tokio::task::yield_now().await;
    }
    settle().await;

    assert_matches!(
        harness.emitter.scheduler_state().await,
        SchedulerState::Running { interval, .. } if interval == Duration::from_millis(1_500)
    );

    // a leftover task from the burst would add ticks here
    sleep_ms(3_100).await;
    assert_eq!(harness.drain_local().len(), 2);

    harness.emitter.stop().await;
}

#[tokio::test(start_paused = true)]
async fn test_second_start_keeps_following_updates() {
    let mut harness = Harness::new();
    harness.emitter.start().await;

    harness.update(json!({ "telemetryPublishIntervalMs": 1000 }));
    harness.emitter.start().await;
    settle().await;

    assert_matches!(
        harness.emitter.scheduler_state().await,
        SchedulerState::Running { interval, .. } if interval == Duration::from_millis(1_000)
    );

    sleep_ms(1_100).await;
    assert_eq!(harness.drain_local().len(), 1);

    harness.emitter.stop().await;
}
