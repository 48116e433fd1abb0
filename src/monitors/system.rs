use std::sync::{Mutex, PoisonError};

use sysinfo::{MemoryRefreshKind, System};
use tracing::{instrument, trace};

use crate::{AggregationType, Metric, MetricUnit};

use super::MetricSource;

pub const SYSTEM_METRICS_NAMESPACE: &str = "SystemMetrics";

const BYTES_PER_MEGABYTE: f64 = 1024.0 * 1024.0;

/// Host CPU and memory usage, sampled with `sysinfo`
///
/// The same `System` is refreshed on every call, so CPU usage is the average
/// since the previous sample. The very first sample reports 0%.
#[derive(Debug)]
pub struct SystemMetricsSource {
    system: Mutex<System>,
}

impl SystemMetricsSource {
    pub fn new() -> Self {
        let mut system = System::new();
        system.refresh_cpu_usage();

        Self {
            system: Mutex::new(system),
        }
    }
}

impl Default for SystemMetricsSource {
    fn default() -> Self {
        Self::new()
    }
}

impl MetricSource for SystemMetricsSource {
    fn name(&self) -> &str {
        SYSTEM_METRICS_NAMESPACE
    }

    #[instrument(skip_all)]
    fn get_metrics(&self) -> Vec<Metric> {
        let mut sys = self.system.lock().unwrap_or_else(PoisonError::into_inner);
        sys.refresh_cpu_usage();
        sys.refresh_memory_specifics(MemoryRefreshKind::nothing().with_ram().with_swap());

        let cpu_usage = sys.global_cpu_usage() as f64;
        let used_memory = sys.used_memory() as f64 / BYTES_PER_MEGABYTE;
        let used_swap = sys.used_swap() as f64 / BYTES_PER_MEGABYTE;

        trace!("cpu {cpu_usage:.1}%, memory {used_memory:.1}MB, swap {used_swap:.1}MB");

        vec![
            Metric::new(
                SYSTEM_METRICS_NAMESPACE,
                "CpuUsage",
                MetricUnit::Percent,
                AggregationType::Average,
                cpu_usage,
            ),
            Metric::new(
                SYSTEM_METRICS_NAMESPACE,
                "SystemMemUsage",
                MetricUnit::Megabytes,
                AggregationType::Average,
                used_memory,
            ),
            Metric::new(
                SYSTEM_METRICS_NAMESPACE,
                "SystemSwapUsage",
                MetricUnit::Megabytes,
                AggregationType::Average,
                used_swap,
            ),
        ]
    }
}
