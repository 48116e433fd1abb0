//! Telemetry sinks
//!
//! Publishing is fire-and-forget: [`TelemetryPublisher::publish_message`]
//! returns immediately, the transport call runs on a spawned task, and its
//! completion is only logged. Nothing is retried or buffered; a payload a sink
//! cannot take is dropped for that sink.
//!
//! ```text
//! dispatcher ─┬─► MqttPublisher ──► BrokerClient (rumqttc, QoS 0)
//!             └─► PubSubPublisher ─► LocalBus (tokio broadcast)
//! ```

pub mod mqtt;
pub mod pubsub;

use bytes::Bytes;

pub use mqtt::{BrokerClient, MqttPublisher, OfflineBroker, PublishRequest, RumqttBroker};
pub use pubsub::{BroadcastBus, LocalBus, LocalMessage, PubSubPublisher, TELEMETRY_PUBSUB_TOPIC};

pub trait TelemetryPublisher: Send + Sync {
    /// Hand `payload` to the sink without waiting for the outcome
    ///
    /// Must be called from within a tokio runtime.
    fn publish_message(&self, payload: Bytes, topic: &str);
}
