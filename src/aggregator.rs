//! Per-tick metric aggregation
//!
//! Every source is queried once, in registration order, and the concatenated
//! list is serialized into one payload. The order is part of the output
//! contract: system metrics come first, runtime metrics after them.

use std::sync::Arc;

use bytes::Bytes;
use tracing::{instrument, trace};

use crate::{
    Metric,
    error::SerializationError,
    monitors::{MetricSource, RuntimeMetricsSource, SystemMetricsSource},
};

/// Turns the aggregated metric list into a transport payload
pub trait PayloadSerializer: Send + Sync {
    fn serialize(&self, metrics: &[Metric]) -> Result<Bytes, SerializationError>;
}

/// JSON array encoding (default)
#[derive(Debug, Clone, Copy, Default)]
pub struct JsonSerializer;

impl PayloadSerializer for JsonSerializer {
    fn serialize(&self, metrics: &[Metric]) -> Result<Bytes, SerializationError> {
        Ok(Bytes::from(serde_json::to_vec(metrics)?))
    }
}

#[derive(Clone)]
pub struct MetricAggregator {
    sources: Vec<Arc<dyn MetricSource>>,
}

impl MetricAggregator {
    /// The standard pair: system first, then runtime
    pub fn new(system: Arc<SystemMetricsSource>, runtime: Arc<RuntimeMetricsSource>) -> Self {
        Self {
            sources: vec![system, runtime],
        }
    }

    /// Custom sources, queried in the given order
    pub fn with_sources(sources: Vec<Arc<dyn MetricSource>>) -> Self {
        Self { sources }
    }

    /// Query every source once and concatenate the results
    pub fn collect(&self) -> Vec<Metric> {
        self.sources
            .iter()
            .flat_map(|source| {
                let metrics = source.get_metrics();
                trace!("{} produced {} metrics", source.name(), metrics.len());
                metrics
            })
            .collect()
    }

    /// Collect and serialize in one step
    ///
    /// An empty collection still yields a payload. On error nothing is
    /// returned, so the caller cannot publish a stale or partial payload.
    #[instrument(skip_all)]
    pub fn build_payload(
        &self,
        serializer: &dyn PayloadSerializer,
    ) -> Result<Bytes, SerializationError> {
        let metrics = self.collect();
        let payload = serializer.serialize(&metrics)?;
        trace!("serialized {} metrics into {} bytes", metrics.len(), payload.len());
        Ok(payload)
    }
}
