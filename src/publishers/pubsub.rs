//! Local publish/subscribe sink

use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use tokio::sync::broadcast;
use tracing::{error, trace};

use crate::error::PublishError;

use super::TelemetryPublisher;

/// Topic local subscribers listen on for telemetry
pub const TELEMETRY_PUBSUB_TOPIC: &str = "$local/greengrass/telemetry";

/// In-process message bus
#[async_trait]
pub trait LocalBus: Send + Sync {
    async fn publish(&self, topic: &str, payload: Bytes) -> Result<(), PublishError>;
}

pub struct PubSubPublisher {
    bus: Arc<dyn LocalBus>,
}

impl PubSubPublisher {
    pub fn new(bus: Arc<dyn LocalBus>) -> Self {
        Self { bus }
    }
}

impl TelemetryPublisher for PubSubPublisher {
    fn publish_message(&self, payload: Bytes, topic: &str) {
        let bus = Arc::clone(&self.bus);
        let topic = topic.to_string();

        tokio::spawn(async move {
            match bus.publish(&topic, payload).await {
                Ok(()) => trace!("published telemetry on local topic {topic}"),
                Err(e) => error!("failed to publish telemetry on local topic {topic}: {e}"),
            }
        });
    }
}

/// Message delivered to local subscribers
#[derive(Debug, Clone)]
pub struct LocalMessage {
    pub topic: String,
    pub payload: Bytes,
    pub timestamp: DateTime<Utc>,
}

/// `LocalBus` over a tokio broadcast channel
///
/// Slow subscribers lag and lose messages rather than holding up the
/// publisher. Publishing with no subscribers is not an error.
#[derive(Debug, Clone)]
pub struct BroadcastBus {
    sender: broadcast::Sender<LocalMessage>,
}

impl BroadcastBus {
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self { sender }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<LocalMessage> {
        self.sender.subscribe()
    }
}

#[async_trait]
impl LocalBus for BroadcastBus {
    async fn publish(&self, topic: &str, payload: Bytes) -> Result<(), PublishError> {
        let message = LocalMessage {
            topic: topic.to_string(),
            payload,
            timestamp: Utc::now(),
        };

        match self.sender.send(message) {
            Ok(num_receivers) => trace!("delivered local message to {num_receivers} receivers"),
            Err(_) => trace!("no local subscribers (this is OK)"),
        }

        Ok(())
    }
}
