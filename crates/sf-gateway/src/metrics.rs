//! Bounded per-target metric history.
//!
//! Samples are pushed in through the REST API and read by the
//! recommendation engine and the history endpoint. Each (target, metric)
//! series keeps the most recent `capacity` samples.

use std::collections::{HashMap, VecDeque};

use serde::Serialize;
use tokio::sync::RwLock;

use sf_protocol::{MetricSample, ResourceId};

type SeriesKey = (ResourceId, String);

pub struct MetricsCollector {
    capacity: usize,
    series: RwLock<HashMap<SeriesKey, VecDeque<MetricSample>>>,
}

impl MetricsCollector {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            series: RwLock::new(HashMap::new()),
        }
    }

    /// Record samples, dropping the oldest of a series when it is full.
    /// Non-finite values are skipped. Returns how many were kept.
    pub async fn record(&self, samples: impl IntoIterator<Item = MetricSample>) -> usize {
        let mut series = self.series.write().await;
        let mut accepted = 0;
        for sample in samples {
            if !sample.value.is_finite() {
                tracing::debug!(resource = %sample.target, metric = %sample.metric, "dropping non-finite sample");
                continue;
            }
            let buf = series
                .entry((sample.target.clone(), sample.metric.clone()))
                .or_default();
            if buf.len() == self.capacity {
                buf.pop_front();
            }
            buf.push_back(sample);
            accepted += 1;
        }
        accepted
    }

    /// All samples for a target, oldest first.
    pub async fn history(&self, target: &ResourceId) -> Vec<MetricSample> {
        let series = self.series.read().await;
        let mut samples: Vec<MetricSample> = series
            .iter()
            .filter(|((id, _), _)| id == target)
            .flat_map(|(_, buf)| buf.iter().cloned())
            .collect();
        samples.sort_by_key(|s| s.timestamp);
        samples
    }

    /// The last `n` values of one series, oldest first.
    pub async fn recent(&self, target: &ResourceId, metric: &str, n: usize) -> Vec<f64> {
        let series = self.series.read().await;
        let Some(buf) = series.get(&(target.clone(), metric.to_string())) else {
            return Vec::new();
        };
        buf.iter().skip(buf.len().saturating_sub(n)).map(|s| s.value).collect()
    }

    /// Drop every series of a target (e.g. after it was deleted).
    pub async fn forget(&self, target: &ResourceId) {
        self.series.write().await.retain(|(id, _), _| id != target);
    }
}

/// Samples averaged into the forecast baseline.
const BASELINE_SAMPLES: usize = 5;

/// One forecast step.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ForecastPoint {
    /// Steps ahead of the last sample, starting at 0.
    pub step: usize,
    pub value: f64,
    pub confidence: f64,
}

/// Moving-average baseline projected along a least-squares trend.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Forecast {
    /// Mean of the most recent samples.
    pub baseline: f64,
    /// Change per sample.
    pub trend: f64,
    /// Mean confidence over the horizon.
    pub confidence: f64,
    pub points: Vec<ForecastPoint>,
}

impl Forecast {
    pub fn peak(&self) -> f64 {
        self.points
            .iter()
            .map(|p| p.value)
            .fold(f64::NEG_INFINITY, f64::max)
    }
}

/// Project a percentage series `horizon` steps ahead. Values are clamped to
/// 0..=100 and confidence falls from 1.0 to 0.5 over the horizon.
pub fn forecast(values: &[f64], horizon: usize) -> Option<Forecast> {
    if values.is_empty() || horizon == 0 {
        return None;
    }
    let recent = &values[values.len().saturating_sub(BASELINE_SAMPLES)..];
    let baseline = recent.iter().sum::<f64>() / recent.len() as f64;
    let trend = slope(values);

    let points: Vec<ForecastPoint> = (0..horizon)
        .map(|step| ForecastPoint {
            step,
            value: (baseline + trend * step as f64).clamp(0.0, 100.0),
            confidence: (1.0 - step as f64 / horizon as f64 * 0.5).max(0.5),
        })
        .collect();
    let confidence = points.iter().map(|p| p.confidence).sum::<f64>() / horizon as f64;
    Some(Forecast {
        baseline,
        trend,
        confidence,
        points,
    })
}

/// Least-squares slope against the sample index.
fn slope(values: &[f64]) -> f64 {
    if values.len() < 2 {
        return 0.0;
    }
    let n = values.len() as f64;
    let mean_x = (n - 1.0) / 2.0;
    let mean_y = values.iter().sum::<f64>() / n;
    let (cov, var) = values
        .iter()
        .enumerate()
        .fold((0.0, 0.0), |(cov, var), (i, y)| {
            let dx = i as f64 - mean_x;
            (cov + dx * (y - mean_y), var + dx * dx)
        });
    cov / var
}
