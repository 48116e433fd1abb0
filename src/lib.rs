pub mod aggregator;
pub mod config;
pub mod dispatcher;
pub mod emitter;
pub mod error;
pub mod monitors;
pub mod publishers;
pub mod scheduler;
pub mod util;

use chrono::Utc;
use serde::{Deserialize, Serialize};

/// A single telemetry data point.
///
/// Field names on the wire follow the compact telemetry schema (`NS`, `N`, `U`,
/// `A`, `V`, `TS`) so that downstream consumers of the payload do not depend on
/// this crate's naming.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Metric {
    #[serde(rename = "NS")]
    pub namespace: String,
    #[serde(rename = "N")]
    pub name: String,
    #[serde(rename = "U")]
    pub unit: MetricUnit,
    #[serde(rename = "A")]
    pub aggregation: AggregationType,
    #[serde(rename = "V")]
    pub value: f64,
    /// Milliseconds since the unix epoch
    #[serde(rename = "TS")]
    pub timestamp: i64,
}

impl Metric {
    pub fn new(
        namespace: impl Into<String>,
        name: impl Into<String>,
        unit: MetricUnit,
        aggregation: AggregationType,
        value: f64,
    ) -> Self {
        Self {
            namespace: namespace.into(),
            name: name.into(),
            unit,
            aggregation,
            value,
            timestamp: Utc::now().timestamp_millis(),
        }
    }

    pub fn at(mut self, timestamp: i64) -> Self {
        self.timestamp = timestamp;
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum MetricUnit {
    Count,
    Percent,
    Megabytes,
    Seconds,
    Milliseconds,
    None,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AggregationType {
    Average,
    Sum,
    Count,
    Maximum,
    Minimum,
}
