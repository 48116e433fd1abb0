//! Failure handling
//!
//! A failed tick publishes nothing and never stops the schedule. Sink failures
//! are logged and dropped without retries.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use serde_json::json;
use telemetry_emitter::{
    Metric,
    aggregator::{JsonSerializer, MetricAggregator},
    config::ConfigurationManager,
    dispatcher::PublishDispatcher,
    emitter::TelemetryEmitter,
    monitors::MetricSource,
    publishers::{BroadcastBus, BrokerClient, MqttPublisher, OfflineBroker, PubSubPublisher},
    scheduler::SchedulerState,
};

use crate::helpers::*;

#[tokio::test(start_paused = true)]
async fn test_serialization_failure_skips_tick_only() {
    let mut harness = Harness::with_serializer(FlakySerializer::failing(1));
    harness.update(json!({
        "telemetryPublishIntervalMs": 500,
        "mqttTopic": "fleet/metrics",
    }));

    harness.emitter.start().await;
    sleep_ms(600).await;

    assert_eq!(harness.system.calls(), 1);
    assert!(harness.drain_local().is_empty());
    assert!(harness.broker.requests().is_empty());

    sleep_ms(500).await;

    assert_eq!(harness.drain_local().len(), 1);
    assert_eq!(harness.broker.requests().len(), 1);

    harness.emitter.stop().await;
}

#[tokio::test(start_paused = true)]
async fn test_disconnected_broker_drops_payload_silently() {
    let mut harness = Harness::new();
    harness.broker.set_live(false);
    harness.update(json!({
        "telemetryPublishIntervalMs": 500,
        "mqttTopic": "fleet/metrics",
    }));

    harness.emitter.start().await;
    sleep_ms(600).await;

    assert_eq!(harness.drain_local().len(), 1);
    assert!(harness.broker.requests().is_empty());

    // nothing was queued while offline
    harness.broker.set_live(true);
    sleep_ms(500).await;
    assert_eq!(harness.broker.requests().len(), 1);

    harness.emitter.stop().await;
}

#[tokio::test(start_paused = true)]
async fn test_failed_broker_publish_is_not_retried() {
    let mut harness = Harness::new();
    harness.broker.set_failing(true);
    harness.update(json!({
        "telemetryPublishIntervalMs": 1000,
        "mqttTopic": "fleet/metrics",
    }));

    harness.emitter.start().await;
    sleep_ms(1_100).await;
    assert_eq!(harness.broker.requests().len(), 1);

    sleep_ms(800).await;
    assert_eq!(harness.broker.requests().len(), 1);
    assert_eq!(harness.drain_local().len(), 1);

    harness.emitter.stop().await;
}

#[tokio::test(start_paused = true)]
async fn test_unconfigured_broker_leaves_local_sink_working() {
    let bus = Arc::new(BroadcastBus::new(8));
    let mut local = bus.subscribe();
    let configuration = Arc::new(ConfigurationManager::default());
    configuration.apply_update(&raw(json!({
        "telemetryPublishIntervalMs": 500,
        "mqttTopic": "fleet/metrics",
    })));

    let emitter = TelemetryEmitter::with_pipeline(
        configuration,
        MetricAggregator::with_sources(vec![FixedSource::new("SystemMetrics", &[1.0])]),
        Arc::new(JsonSerializer),
        PublishDispatcher::new(
            Arc::new(PubSubPublisher::new(bus)),
            Arc::new(MqttPublisher::new(Arc::new(OfflineBroker))),
        ),
    );

    emitter.start().await;
    sleep_ms(600).await;
    emitter.stop().await;

    assert!(!OfflineBroker.connected());
    assert!(local.try_recv().is_ok());
    assert!(local.try_recv().is_err(), "exactly one tick expected");
}

/// Panics on its first query only
struct PanickingSource {
    panicked: AtomicBool,
}

impl MetricSource for PanickingSource {
    fn name(&self) -> &str {
        "panicking"
    }

    fn get_metrics(&self) -> Vec<Metric> {
        if !self.panicked.swap(true, Ordering::SeqCst) {
            panic!("sensor read failed");
        }
        Vec::new()
    }
}

#[tokio::test(start_paused = true)]
async fn test_panicking_source_does_not_stop_schedule() {
    let bus = Arc::new(BroadcastBus::new(8));
    let mut local = bus.subscribe();
    let configuration = Arc::new(ConfigurationManager::default());
    configuration.apply_update(&raw(json!({ "telemetryPublishIntervalMs": 500 })));

    let emitter = TelemetryEmitter::with_pipeline(
        configuration,
        MetricAggregator::with_sources(vec![Arc::new(PanickingSource {
            panicked: AtomicBool::new(false),
        })]),
        Arc::new(JsonSerializer),
        PublishDispatcher::new(
            Arc::new(PubSubPublisher::new(bus)),
            Arc::new(MqttPublisher::new(Arc::new(OfflineBroker))),
        ),
    );

    emitter.start().await;
    sleep_ms(600).await;
    assert!(local.try_recv().is_err());

    sleep_ms(500).await;
    let message = local.try_recv().unwrap();
    assert_eq!(&message.payload[..], b"[]");
    assert!(matches!(
        emitter.scheduler_state().await,
        SchedulerState::Running { .. }
    ));

    emitter.stop().await;
}
