use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::resources::ResourceId;

/// Metric name for CPU utilization samples, in percent.
pub const CPU_PERCENT: &str = "cpu_percent";

/// A single observed metric value for a resource.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetricSample {
    pub target: ResourceId,
    /// Metric name (e.g. "cpu_percent", "memory_percent").
    pub metric: String,
    pub value: f64,
    #[serde(default = "Utc::now")]
    pub timestamp: DateTime<Utc>,
}

impl MetricSample {
    pub fn new(target: ResourceId, metric: impl Into<String>, value: f64) -> Self {
        Self {
            target,
            metric: metric.into(),
            value,
            timestamp: Utc::now(),
        }
    }
}
