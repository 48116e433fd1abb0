//! Broker sink
//!
//! [`MqttPublisher`] publishes at most once (QoS 0) and only while the broker
//! connection is live. On an offline device this drops the tick's telemetry
//! instead of queueing it.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use rumqttc::{AsyncClient, ConnectReturnCode, Event, EventLoop, MqttOptions, Packet, QoS};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, instrument, trace, warn};

use crate::{
    config::MqttConfig,
    error::PublishError,
    util::{DeviceNameProvider, env_device_name_provider, resolve_topic},
};

use super::TelemetryPublisher;

/// Pause between event loop polls after a connection error
const RECONNECT_DELAY: Duration = Duration::from_secs(5);

const DEFAULT_CLIENT_ID: &str = "telemetry-emitter";

/// A single message for the broker
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PublishRequest {
    pub topic: String,
    pub qos: QoS,
    pub retain: bool,
    pub payload: Bytes,
}

impl PublishRequest {
    pub fn at_most_once(topic: impl Into<String>, payload: Bytes) -> Self {
        Self {
            topic: topic.into(),
            qos: QoS::AtMostOnce,
            retain: false,
            payload,
        }
    }
}

/// Connection to a message broker
#[async_trait]
pub trait BrokerClient: Send + Sync {
    /// Whether the connection is currently live
    fn connected(&self) -> bool;

    async fn publish(&self, request: PublishRequest) -> Result<(), PublishError>;
}

pub struct MqttPublisher {
    client: Arc<dyn BrokerClient>,
    device_name: DeviceNameProvider,
}

impl MqttPublisher {
    /// Publisher resolving the device name from `AWS_IOT_THING_NAME`
    pub fn new(client: Arc<dyn BrokerClient>) -> Self {
        Self::with_device_name(client, env_device_name_provider())
    }

    pub fn with_device_name(client: Arc<dyn BrokerClient>, device_name: DeviceNameProvider) -> Self {
        Self {
            client,
            device_name,
        }
    }
}

impl TelemetryPublisher for MqttPublisher {
    fn publish_message(&self, payload: Bytes, topic: &str) {
        if !self.client.connected() {
            trace!("broker not connected, dropping telemetry for {topic}");
            return;
        }

        let device_name = (self.device_name)();
        let request = PublishRequest::at_most_once(resolve_topic(topic, device_name.as_deref()), payload);
        let client = Arc::clone(&self.client);

        tokio::spawn(async move {
            let topic = request.topic.clone();
            match client.publish(request).await {
                Ok(()) => trace!("published telemetry to {topic}"),
                Err(e) => error!("failed to publish telemetry to {topic}: {e}"),
            }
        });
    }
}

/// `BrokerClient` backed by a rumqttc connection
///
/// A driver task pumps the rumqttc event loop and tracks liveness: a
/// successful ConnAck marks the connection live, a Disconnect or any
/// connection error marks it dead until the next ConnAck.
#[derive(Clone)]
pub struct RumqttBroker {
    client: AsyncClient,
    is_connected: Arc<AtomicBool>,
}

impl RumqttBroker {
    /// Create the client and spawn its event loop driver
    pub fn connect(config: &MqttConfig, device_name: Option<&str>) -> (Self, JoinHandle<()>) {
        let client_id = config
            .client_id
            .clone()
            .or_else(|| device_name.map(str::to_string))
            .unwrap_or_else(|| DEFAULT_CLIENT_ID.to_string());

        let mut options = MqttOptions::new(client_id, config.host.clone(), config.port);
        options.set_keep_alive(Duration::from_secs(config.keep_alive_secs));

        let (client, event_loop) = AsyncClient::new(options, 64);
        let is_connected = Arc::new(AtomicBool::new(false));

        let driver = tokio::spawn(drive_event_loop(event_loop, Arc::clone(&is_connected)));

        (
            Self {
                client,
                is_connected,
            },
            driver,
        )
    }

    pub async fn disconnect(&self) {
        self.is_connected.store(false, Ordering::Release);
        if let Err(e) = self.client.disconnect().await {
            warn!("error sending disconnect packet: {e}");
        }
    }
}

#[instrument(skip_all)]
async fn drive_event_loop(mut event_loop: EventLoop, is_connected: Arc<AtomicBool>) {
    debug!("starting broker event loop");

    loop {
        match event_loop.poll().await {
            Ok(Event::Incoming(Packet::ConnAck(conn_ack))) => {
                let live = conn_ack.code == ConnectReturnCode::Success;
                if live {
                    info!("broker connection established");
                } else {
                    warn!("broker refused connection: {:?}", conn_ack.code);
                }
                is_connected.store(live, Ordering::Release);
            }
            Ok(Event::Incoming(Packet::Disconnect)) => {
                warn!("disconnected by broker");
                is_connected.store(false, Ordering::Release);
            }
            Ok(event) => trace!("broker event: {event:?}"),
            Err(e) => {
                is_connected.store(false, Ordering::Release);
                error!("broker connection error: {e}");
                tokio::time::sleep(RECONNECT_DELAY).await;
            }
        }
    }
}

#[async_trait]
impl BrokerClient for RumqttBroker {
    fn connected(&self) -> bool {
        self.is_connected.load(Ordering::Acquire)
    }

    async fn publish(&self, request: PublishRequest) -> Result<(), PublishError> {
        self.client
            .publish_bytes(request.topic, request.qos, request.retain, request.payload)
            .await?;
        Ok(())
    }
}

/// Broker that is never connected, used when no broker is configured
#[derive(Debug, Clone, Copy, Default)]
pub struct OfflineBroker;

#[async_trait]
impl BrokerClient for OfflineBroker {
    fn connected(&self) -> bool {
        false
    }

    async fn publish(&self, _request: PublishRequest) -> Result<(), PublishError> {
        Err(PublishError::NotConnected)
    }
}
