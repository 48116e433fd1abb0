use std::time::Instant;

use tokio::runtime::Handle;
use tracing::trace;

use crate::{AggregationType, Metric, MetricUnit};

use super::MetricSource;

pub const RUNTIME_METRICS_NAMESPACE: &str = "RuntimeMetrics";

/// Internals of the async runtime the emitter runs on, plus process uptime
#[derive(Debug, Clone)]
pub struct RuntimeMetricsSource {
    started: Instant,
}

impl RuntimeMetricsSource {
    pub fn new() -> Self {
        Self {
            started: Instant::now(),
        }
    }

    fn count(name: &str, value: usize) -> Metric {
        Metric::new(
            RUNTIME_METRICS_NAMESPACE,
            name,
            MetricUnit::Count,
            AggregationType::Average,
            value as f64,
        )
    }
}

impl Default for RuntimeMetricsSource {
    fn default() -> Self {
        Self::new()
    }
}

impl MetricSource for RuntimeMetricsSource {
    fn name(&self) -> &str {
        RUNTIME_METRICS_NAMESPACE
    }

    fn get_metrics(&self) -> Vec<Metric> {
        let mut metrics = Vec::with_capacity(4);

        match Handle::try_current() {
            Ok(handle) => {
                let runtime = handle.metrics();
                metrics.push(Self::count("NumberOfWorkers", runtime.num_workers()));
                metrics.push(Self::count("NumberOfAliveTasks", runtime.num_alive_tasks()));
                metrics.push(Self::count("GlobalQueueDepth", runtime.global_queue_depth()));
            }
            Err(_) => trace!("no async runtime, reporting uptime only"),
        }

        metrics.push(Metric::new(
            RUNTIME_METRICS_NAMESPACE,
            "ProcessUptime",
            MetricUnit::Seconds,
            AggregationType::Maximum,
            self.started.elapsed().as_secs_f64(),
        ));

        metrics
    }
}
