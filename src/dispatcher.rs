use std::sync::Arc;

use bytes::Bytes;
use tracing::trace;

use crate::{
    config::TelemetryConfiguration,
    publishers::{TELEMETRY_PUBSUB_TOPIC, TelemetryPublisher},
};

/// Routes one serialized payload to every sink the snapshot enables
///
/// The two sinks are independent: either, both or neither may be invoked for a
/// tick. Broker liveness is checked by the broker publisher itself, so an
/// offline broker costs nothing here.
#[derive(Clone)]
pub struct PublishDispatcher {
    pubsub: Arc<dyn TelemetryPublisher>,
    mqtt: Arc<dyn TelemetryPublisher>,
}

impl PublishDispatcher {
    pub fn new(pubsub: Arc<dyn TelemetryPublisher>, mqtt: Arc<dyn TelemetryPublisher>) -> Self {
        Self { pubsub, mqtt }
    }

    pub fn dispatch(&self, payload: &Bytes, config: &TelemetryConfiguration) {
        if config.pub_sub_publish() {
            self.pubsub
                .publish_message(payload.clone(), TELEMETRY_PUBSUB_TOPIC);
        } else {
            trace!("local publishing disabled");
        }

        if config.mqtt_topic().is_empty() {
            trace!("no broker topic configured");
        } else {
            self.mqtt.publish_message(payload.clone(), config.mqtt_topic());
        }
    }
}
