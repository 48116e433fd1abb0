//! Emitter configuration
//!
//! Live configuration is a [`TelemetryConfiguration`] snapshot owned by the
//! [`ConfigurationManager`]. Snapshots are immutable: every accepted update
//! builds a new one and swaps it in whole, so a reader sees either the old or
//! the new snapshot, never a mix of both.
//!
//! Updates arrive as loosely typed JSON options. Each option is validated on
//! its own; a rejected option keeps its previous value while the other options
//! of the same update still apply.

use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use anyhow::Context;
use arc_swap::ArcSwap;
use serde_json::{Map, Value};
use tokio::sync::watch;
use tracing::{debug, instrument, trace, warn};

use crate::error::ConfigValidationError;

pub const PUBSUB_PUBLISH_CONFIG_NAME: &str = "pubSubPublish";
pub const MQTT_TOPIC_CONFIG_NAME: &str = "mqttTopic";
pub const TELEMETRY_PUBLISH_INTERVAL_CONFIG_NAME: &str = "telemetryPublishIntervalMs";

pub const DEFAULT_PUBSUB_PUBLISH: bool = true;
pub const DEFAULT_TELEMETRY_PUBLISH_INTERVAL_MS: u64 = 60_000;
pub const MIN_TELEMETRY_PUBLISH_INTERVAL_MS: u64 = 500;

/// Raw option name to value mapping, as delivered by the host's config store
pub type RawOptions = Map<String, Value>;

/// Immutable configuration snapshot
///
/// The publish interval is never below [`MIN_TELEMETRY_PUBLISH_INTERVAL_MS`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TelemetryConfiguration {
    pub_sub_publish: bool,
    mqtt_topic: String,
    telemetry_publish_interval_ms: u64,
}

impl TelemetryConfiguration {
    /// Build a snapshot, clamping the interval to the minimum
    pub fn new(pub_sub_publish: bool, mqtt_topic: impl Into<String>, interval_ms: i64) -> Self {
        Self {
            pub_sub_publish,
            mqtt_topic: mqtt_topic.into(),
            telemetry_publish_interval_ms: clamp_publish_interval(interval_ms),
        }
    }

    pub fn pub_sub_publish(&self) -> bool {
        self.pub_sub_publish
    }

    /// Broker topic; empty means the broker sink is disabled
    pub fn mqtt_topic(&self) -> &str {
        &self.mqtt_topic
    }

    pub fn telemetry_publish_interval_ms(&self) -> u64 {
        self.telemetry_publish_interval_ms
    }

    pub fn publish_interval(&self) -> Duration {
        Duration::from_millis(self.telemetry_publish_interval_ms)
    }
}

impl Default for TelemetryConfiguration {
    fn default() -> Self {
        Self {
            pub_sub_publish: DEFAULT_PUBSUB_PUBLISH,
            mqtt_topic: String::new(),
            telemetry_publish_interval_ms: DEFAULT_TELEMETRY_PUBLISH_INTERVAL_MS,
        }
    }
}

pub fn clamp_publish_interval(interval_ms: i64) -> u64 {
    interval_ms.max(MIN_TELEMETRY_PUBLISH_INTERVAL_MS as i64) as u64
}

fn describe(value: &Value) -> String {
    match value {
        Value::Null => "null".to_string(),
        Value::Bool(b) => format!("boolean `{b}`"),
        Value::Number(n) => format!("number `{n}`"),
        Value::String(s) => format!("string `{s}`"),
        Value::Array(_) => "an array".to_string(),
        Value::Object(_) => "an object".to_string(),
    }
}

fn type_mismatch(option: &'static str, expected: &'static str, found: &Value) -> ConfigValidationError {
    ConfigValidationError::TypeMismatch {
        option,
        expected,
        found: describe(found),
    }
}

/// Validate the `pubSubPublish` option
///
/// Accepts JSON booleans and the strings `"true"`/`"false"`. Numbers are a
/// type mismatch.
pub fn validate_pub_sub_publish(value: &Value) -> Result<bool, ConfigValidationError> {
    match value {
        Value::Bool(enabled) => Ok(*enabled),
        Value::String(raw) => match raw.trim().to_ascii_lowercase().as_str() {
            "true" => Ok(true),
            "false" => Ok(false),
            _ => Err(ConfigValidationError::Unparsable {
                option: PUBSUB_PUBLISH_CONFIG_NAME,
                value: raw.clone(),
            }),
        },
        other => Err(type_mismatch(PUBSUB_PUBLISH_CONFIG_NAME, "a boolean", other)),
    }
}

/// Validate the `mqttTopic` option; any string is accepted, including ""
pub fn validate_mqtt_topic(value: &Value) -> Result<String, ConfigValidationError> {
    match value {
        Value::String(topic) => Ok(topic.clone()),
        other => Err(type_mismatch(MQTT_TOPIC_CONFIG_NAME, "a string", other)),
    }
}

/// Validate the `telemetryPublishIntervalMs` option
///
/// Returns the requested value unclamped.
pub fn validate_publish_interval(value: &Value) -> Result<i64, ConfigValidationError> {
    let unparsable = || ConfigValidationError::Unparsable {
        option: TELEMETRY_PUBLISH_INTERVAL_CONFIG_NAME,
        value: value.to_string(),
    };

    match value {
        Value::Number(number) => number
            .as_i64()
            .or_else(|| number.as_u64().map(|_| i64::MAX))
            .or_else(|| {
                number
                    .as_f64()
                    .filter(|f| f.is_finite() && f.fract() == 0.0)
                    .filter(|f| *f >= i64::MIN as f64 && *f <= i64::MAX as f64)
                    .map(|f| f as i64)
            })
            .ok_or_else(unparsable),
        Value::String(raw) => raw.trim().parse::<i64>().map_err(|_| unparsable()),
        other => Err(type_mismatch(
            TELEMETRY_PUBLISH_INTERVAL_CONFIG_NAME,
            "an integer",
            other,
        )),
    }
}

/// Result of applying one raw update
#[derive(Debug, Clone)]
pub struct ValidationOutcome {
    /// The snapshot that is current after the update
    pub snapshot: Arc<TelemetryConfiguration>,

    /// Options that passed validation
    pub accepted: Vec<&'static str>,

    /// Options that were dropped, with the reason
    pub rejected: Vec<ConfigValidationError>,

    /// The requested interval, if it was raised to the minimum
    pub clamped_interval: Option<i64>,

    /// Whether a new snapshot was published
    pub changed: bool,
}

impl ValidationOutcome {
    pub fn is_rejected(&self, option: &str) -> bool {
        self.rejected.iter().any(|e| e.option() == option)
    }
}

/// Owner of the current configuration snapshot
///
/// Reads are lock-free. Writes are serialized so that two concurrent updates
/// cannot lose each other's fields. Every published snapshot is also sent on a
/// `watch` channel so the scheduler can react to interval changes.
pub struct ConfigurationManager {
    current: ArcSwap<TelemetryConfiguration>,
    write_lock: Mutex<()>,
    notifier: watch::Sender<Arc<TelemetryConfiguration>>,
}

impl ConfigurationManager {
    pub fn new(initial: TelemetryConfiguration) -> Self {
        let initial = Arc::new(initial);
        let (notifier, _) = watch::channel(Arc::clone(&initial));

        Self {
            current: ArcSwap::new(initial),
            write_lock: Mutex::new(()),
            notifier,
        }
    }

    /// The current snapshot
    pub fn current(&self) -> Arc<TelemetryConfiguration> {
        self.current.load_full()
    }

    /// Receive every snapshot published after this call
    pub fn subscribe(&self) -> watch::Receiver<Arc<TelemetryConfiguration>> {
        self.notifier.subscribe()
    }

    /// Validate `raw` option by option and publish the resulting snapshot
    ///
    /// Never fails: rejected options are reported in the outcome and logged.
    #[instrument(skip_all)]
    pub fn apply_update(&self, raw: &RawOptions) -> ValidationOutcome {
        let _guard = self.write_lock.lock().unwrap_or_else(PoisonError::into_inner);
        let previous = self.current.load_full();

        let mut candidate = (*previous).clone();
        let mut accepted = Vec::new();
        let mut rejected = Vec::new();
        let mut clamped_interval = None;

        for (option, value) in raw {
            match option.as_str() {
                PUBSUB_PUBLISH_CONFIG_NAME => match validate_pub_sub_publish(value) {
                    Ok(enabled) => {
                        candidate.pub_sub_publish = enabled;
                        accepted.push(PUBSUB_PUBLISH_CONFIG_NAME);
                    }
                    Err(e) => rejected.push(e),
                },
                MQTT_TOPIC_CONFIG_NAME => match validate_mqtt_topic(value) {
                    Ok(topic) => {
                        candidate.mqtt_topic = topic;
                        accepted.push(MQTT_TOPIC_CONFIG_NAME);
                    }
                    Err(e) => rejected.push(e),
                },
                TELEMETRY_PUBLISH_INTERVAL_CONFIG_NAME => match validate_publish_interval(value) {
                    Ok(requested) => {
                        let effective = clamp_publish_interval(requested);
                        if effective as i64 != requested {
                            warn!(
                                "publish interval {requested}ms is below the minimum, using {effective}ms"
                            );
                            clamped_interval = Some(requested);
                        }
                        candidate.telemetry_publish_interval_ms = effective;
                        accepted.push(TELEMETRY_PUBLISH_INTERVAL_CONFIG_NAME);
                    }
                    Err(e) => rejected.push(e),
                },
                unknown => trace!("ignoring unknown option `{unknown}`"),
            }
        }

        for e in &rejected {
            warn!("rejected configuration option: {e}");
        }

        let changed = candidate != *previous;
        let snapshot = if changed {
            let snapshot = Arc::new(candidate);
            self.current.store(Arc::clone(&snapshot));
            self.notifier.send_replace(Arc::clone(&snapshot));
            debug!("configuration updated: {snapshot:?}");
            snapshot
        } else {
            trace!("configuration unchanged");
            previous
        };

        ValidationOutcome {
            snapshot,
            accepted,
            rejected,
            clamped_interval,
            changed,
        }
    }
}

impl Default for ConfigurationManager {
    fn default() -> Self {
        Self::new(TelemetryConfiguration::default())
    }
}

/// Settings file for the standalone emitter binary
#[derive(Debug, Clone, serde::Deserialize)]
pub struct EmitterConfig {
    /// Raw emitter options, validated like any live update
    #[serde(default)]
    pub configuration: RawOptions,

    /// Broker connection; without it the broker sink never publishes
    pub mqtt: Option<MqttConfig>,

    #[serde(default = "default_local_channel_capacity")]
    pub local_channel_capacity: usize,
}

#[derive(Debug, Clone, serde::Deserialize)]
pub struct MqttConfig {
    pub host: String,
    #[serde(default = "default_mqtt_port")]
    pub port: u16,
    pub client_id: Option<String>,
    #[serde(default = "default_keep_alive_secs")]
    pub keep_alive_secs: u64,
}

fn default_local_channel_capacity() -> usize {
    64
}

fn default_mqtt_port() -> u16 {
    1883
}

fn default_keep_alive_secs() -> u64 {
    30
}

pub fn read_config_file(path: &str) -> anyhow::Result<EmitterConfig> {
    let file_content =
        std::fs::read_to_string(path).with_context(|| format!("failed to read {path}"))?;
    serde_json::from_str(&file_content)
        .context("invalid configuration file")
        .inspect(|config| trace!("loaded config: {config:?}"))
}
