//! Metric sources
//!
//! A source produces an ordered list of [`Metric`]s on demand. The aggregator
//! queries every source once per tick and never looks inside the records.

pub mod runtime;
pub mod system;

use crate::Metric;

pub use runtime::RuntimeMetricsSource;
pub use system::SystemMetricsSource;

pub trait MetricSource: Send + Sync {
    /// Short name used in logs
    fn name(&self) -> &str;

    /// Sample the current metrics
    fn get_metrics(&self) -> Vec<Metric>;
}
