//! Live configuration changes while the emitter is running
//!
//! Field changes are picked up by the next tick; interval changes replace the
//! periodic task and restart the period from the moment of the change.

use std::time::Duration;

use assert_matches::assert_matches;
use serde_json::json;
use telemetry_emitter::scheduler::SchedulerState;

use crate::helpers::*;

fn task_id(state: SchedulerState) -> u64 {
    match state {
        SchedulerState::Running { task_id, .. } => task_id,
        other => panic!("scheduler not running: {other:?}"),
    }
}

#[tokio::test(start_paused = true)]
async fn test_clearing_topic_stops_broker_publishing_on_next_tick() {
    let mut harness = Harness::new();
    harness.update(json!({
        "telemetryPublishIntervalMs": 500,
        "mqttTopic": "fleet/metrics",
    }));

    harness.emitter.start().await;
    sleep_ms(600).await;
    assert_eq!(harness.broker.topics(), vec!["fleet/metrics".to_string()]);

    harness.update(json!({ "mqttTopic": "" }));
    sleep_ms(500).await;

    assert_eq!(harness.broker.requests().len(), 1);
    assert_eq!(harness.drain_local().len(), 2);

    harness.emitter.stop().await;
}

#[tokio::test(start_paused = true)]
async fn test_toggling_pubsub_keeps_running_task() {
    let mut harness = Harness::new();
    harness.update(json!({ "telemetryPublishIntervalMs": 1000 }));

    harness.emitter.start().await;
    let before = harness.emitter.scheduler_state().await;

    harness.update(json!({ "pubSubPublish": false }));
    settle().await;

    assert_eq!(harness.emitter.scheduler_state().await, before);

    sleep_ms(1_100).await;
    assert!(harness.drain_local().is_empty());

    harness.update(json!({ "pubSubPublish": "TRUE" }));
    sleep_ms(1_000).await;
    assert_eq!(harness.drain_local().len(), 1);
    assert_eq!(task_id(harness.emitter.scheduler_state().await), task_id(before));

    harness.emitter.stop().await;
}

#[tokio::test(start_paused = true)]
async fn test_invalid_topic_keeps_previous_value() {
    let mut harness = Harness::new();
    harness.update(json!({
        "telemetryPublishIntervalMs": 500,
        "mqttTopic": "fleet/{core-device-name}",
    }));

    let outcome = harness.emitter.apply_update(&raw(json!({
        "mqttTopic": 4545,
        "pubSubPublish": false,
    })));
    assert!(outcome.is_rejected("mqttTopic"));
    assert!(!outcome.is_rejected("pubSubPublish"));
    assert!(outcome.changed);

    harness.emitter.start().await;
    sleep_ms(600).await;

    assert_eq!(harness.broker.topics(), vec!["fleet/thing-1".to_string()]);
    assert!(harness.drain_local().is_empty());

    harness.emitter.stop().await;
}

#[tokio::test(start_paused = true)]
async fn test_interval_change_restarts_period_from_change() {
    let mut harness = Harness::new();
    harness.update(json!({ "telemetryPublishIntervalMs": 1000 }));

    harness.emitter.start().await;
    let before = harness.emitter.scheduler_state().await;
    sleep_ms(2_500).await;
    assert_eq!(harness.drain_local().len(), 2);

    harness.update(json!({ "telemetryPublishIntervalMs": 3000 }));
    settle().await;

    let after = harness.emitter.scheduler_state().await;
    assert_matches!(
        after,
        SchedulerState::Running { interval, .. } if interval == Duration::from_millis(3_000)
    );
    assert_ne!(task_id(after), task_id(before));

    // the old 1s task must not fire at 3000ms
    sleep_ms(2_900).await;
    assert!(harness.drain_local().is_empty());

    sleep_ms(200).await;
    assert_eq!(harness.drain_local().len(), 1);

    harness.emitter.stop().await;
}

#[tokio::test(start_paused = true)]
async fn test_interval_below_minimum_is_clamped() {
    let mut harness = Harness::new();
    let outcome = harness
        .emitter
        .apply_update(&raw(json!({ "telemetryPublishIntervalMs": 100 })));

    assert_eq!(outcome.clamped_interval, Some(100));
    assert_eq!(outcome.snapshot.telemetry_publish_interval_ms(), 500);

    harness.emitter.start().await;
    sleep_ms(450).await;
    assert!(harness.drain_local().is_empty());
    sleep_ms(100).await;
    assert_eq!(harness.drain_local().len(), 1);

    harness.emitter.stop().await;
}

#[tokio::test(start_paused = true)]
async fn test_repeating_current_values_changes_nothing() {
    let harness = Harness::new();
    harness.update(json!({
        "telemetryPublishIntervalMs": 2000,
        "mqttTopic": "fleet/metrics",
    }));

    harness.emitter.start().await;
    let before = harness.emitter.scheduler_state().await;

    let outcome = harness.emitter.apply_update(&raw(json!({
        "telemetryPublishIntervalMs": "2000",
        "mqttTopic": "fleet/metrics",
        "somethingElse": [1, 2, 3],
    })));
    settle().await;

    assert!(!outcome.changed);
    assert!(outcome.rejected.is_empty());
    assert_eq!(harness.emitter.scheduler_state().await, before);

    harness.emitter.stop().await;
}
