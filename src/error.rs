//! Error types for the telemetry pipeline
//!
//! None of these ever escape to the host process. Each one is absorbed at the
//! boundary where it happens and only surfaces through logging:
//!
//! - [`ConfigValidationError`]: one option of an update is dropped
//! - [`SerializationError`]: the tick is aborted, nothing is published
//! - [`PublishError`]: one sink misses one payload
//! - [`SchedulingError`]: the tick is logged, the schedule keeps running

use thiserror::Error;

/// Rejection of a single configuration option
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConfigValidationError {
    /// The raw value has the wrong JSON type for this option
    #[error("option `{option}` expects {expected}, got {found}")]
    TypeMismatch {
        option: &'static str,
        expected: &'static str,
        found: String,
    },

    /// The raw value has an acceptable type but cannot be parsed
    #[error("option `{option}` has unparsable value `{value}`")]
    Unparsable { option: &'static str, value: String },
}

impl ConfigValidationError {
    /// Name of the rejected option
    pub fn option(&self) -> &'static str {
        match self {
            ConfigValidationError::TypeMismatch { option, .. } => option,
            ConfigValidationError::Unparsable { option, .. } => option,
        }
    }
}

/// The aggregated metrics could not be turned into a payload
#[derive(Debug, Error)]
pub enum SerializationError {
    #[error("failed to encode metrics as JSON: {0}")]
    Json(#[from] serde_json::Error),

    #[error("failed to encode metrics: {0}")]
    Encoder(String),
}

/// A sink could not deliver a payload
#[derive(Debug, Error)]
pub enum PublishError {
    /// The broker client refused or failed to send the message
    #[error("broker transport failure: {0}")]
    Transport(String),

    /// The broker connection is not live
    #[error("broker connection is not live")]
    NotConnected,

    /// The local bus can no longer accept messages
    #[error("local bus closed")]
    BusClosed,
}

impl From<rumqttc::ClientError> for PublishError {
    fn from(err: rumqttc::ClientError) -> Self {
        PublishError::Transport(err.to_string())
    }
}

/// Failure of a single tick of the periodic task
#[derive(Debug, Error)]
pub enum SchedulingError {
    #[error(transparent)]
    Serialization(#[from] SerializationError),

    /// The tick body panicked; the panic was caught at the tick boundary
    #[error("tick panicked: {0}")]
    Panicked(String),
}
