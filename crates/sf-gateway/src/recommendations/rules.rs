//! Scoring rules: signals for one resource → optional proposal.

use sf_protocol::{RecommendationKind, Resource};

use crate::config::RecommendationConfig;
use crate::metrics::forecast;

/// What the engine knows about a resource during a scan.
#[derive(Debug, Clone, Default)]
pub struct Signals {
    /// Most recent CPU samples, oldest first.
    pub cpu: Vec<f64>,
}

/// A rule's suggestion for one resource.
#[derive(Debug, Clone, PartialEq)]
pub struct Proposal {
    pub kind: RecommendationKind,
    /// Desired size in the kind's scale field.
    pub size: u64,
    pub justification: String,
    pub confidence: f64,
}

/// A deterministic scoring rule.
pub trait ScoringRule: Send + Sync {
    fn name(&self) -> &'static str;

    fn evaluate(&self, resource: &Resource, signals: &Signals) -> Option<Proposal>;
}

fn mean(values: &[f64]) -> f64 {
    values.iter().sum::<f64>() / values.len() as f64
}

/// All of the last `samples` CPU readings above `threshold`: double the size.
pub struct SustainedCpuHigh {
    pub samples: usize,
    pub threshold: f64,
}

impl ScoringRule for SustainedCpuHigh {
    fn name(&self) -> &'static str {
        "sustained_cpu_high"
    }

    fn evaluate(&self, resource: &Resource, signals: &Signals) -> Option<Proposal> {
        let window = signals.cpu.as_slice();
        if self.samples == 0 || window.len() < self.samples {
            return None;
        }
        let window = &window[window.len() - self.samples..];
        if !window.iter().all(|v| *v > self.threshold) {
            return None;
        }

        let kind = resource.id.kind;
        let size = resource.size()?;
        let target = (size * 2).max(1).min(kind.max_size());
        if target <= size {
            return None;
        }
        let avg = mean(window);
        let headroom = (100.0 - self.threshold).max(1.0);
        Some(Proposal {
            kind: RecommendationKind::ScaleUp,
            size: target,
            justification: format!(
                "CPU averaged {avg:.1}% over the last {} samples (above {:.0}%); scale {} from {size} to {target}",
                self.samples,
                self.threshold,
                kind.scale_field()
            ),
            confidence: (0.6 + 0.4 * (avg - self.threshold) / headroom).clamp(0.0, 1.0),
        })
    }
}

/// All of the last `samples` CPU readings below `threshold`: halve the size.
pub struct SustainedCpuLow {
    pub samples: usize,
    pub threshold: f64,
}

impl ScoringRule for SustainedCpuLow {
    fn name(&self) -> &'static str {
        "sustained_cpu_low"
    }

    fn evaluate(&self, resource: &Resource, signals: &Signals) -> Option<Proposal> {
        let window = signals.cpu.as_slice();
        if self.samples == 0 || window.len() < self.samples {
            return None;
        }
        let window = &window[window.len() - self.samples..];
        if !window.iter().all(|v| *v < self.threshold) {
            return None;
        }

        let kind = resource.id.kind;
        let size = resource.size()?;
        if size <= 1 {
            return None;
        }
        let target = (size / 2).max(1).max(kind.min_size());
        if target >= size {
            return None;
        }
        let avg = mean(window);
        Some(Proposal {
            kind: RecommendationKind::ScaleDown,
            size: target,
            justification: format!(
                "CPU averaged {avg:.1}% over the last {} samples (below {:.0}%); scale {} from {size} to {target}",
                self.samples,
                self.threshold,
                kind.scale_field()
            ),
            confidence: (0.6 + 0.4 * (self.threshold - avg) / self.threshold.max(1.0)).clamp(0.0, 1.0),
        })
    }
}

/// Fewest samples a trend is fitted to.
const MIN_TREND_SAMPLES: usize = 5;

/// Forecast over the last `window` CPU samples. A rising trend headed past
/// `ceiling` within `horizon` samples grows the resource by half; a falling
/// one that stays under `floor` shrinks it by one.
pub struct CpuTrend {
    pub window: usize,
    pub horizon: usize,
    pub min_slope: f64,
    pub ceiling: f64,
    pub floor: f64,
}

impl ScoringRule for CpuTrend {
    fn name(&self) -> &'static str {
        "cpu_trend"
    }

    fn evaluate(&self, resource: &Resource, signals: &Signals) -> Option<Proposal> {
        let values = signals.cpu.as_slice();
        let values = &values[values.len().saturating_sub(self.window)..];
        if values.len() < MIN_TREND_SAMPLES {
            return None;
        }
        let f = forecast(values, self.horizon)?;
        let peak = f.peak();
        let kind = resource.id.kind;
        let size = resource.size()?;

        let (rec_kind, target) = if f.trend >= self.min_slope && peak > self.ceiling {
            (RecommendationKind::ScaleUp, (size + (size / 2).max(1)).min(kind.max_size()))
        } else if f.trend <= -self.min_slope && peak < self.floor {
            (RecommendationKind::ScaleDown, size.saturating_sub(1).max(kind.min_size()).max(1))
        } else {
            return None;
        };
        if target == size {
            return None;
        }
        Some(Proposal {
            kind: rec_kind,
            size: target,
            justification: format!(
                "CPU trending {:+.1} points per sample from {:.1}%, forecast peak {peak:.0}% within {} samples; scale {} from {size} to {target}",
                f.trend,
                f.baseline,
                self.horizon,
                kind.scale_field()
            ),
            confidence: (f.confidence * 0.9).clamp(0.0, 1.0),
        })
    }
}

/// The built-in rule set.
pub fn default_rules(config: &RecommendationConfig) -> Vec<Box<dyn ScoringRule>> {
    vec![
        Box::new(SustainedCpuHigh {
            samples: config.sustained_samples,
            threshold: config.cpu_high_percent,
        }),
        Box::new(SustainedCpuLow {
            samples: config.sustained_samples,
            threshold: config.cpu_low_percent,
        }),
        Box::new(CpuTrend {
            window: config.trend_window,
            horizon: config.forecast_horizon,
            min_slope: config.trend_min_slope,
            ceiling: config.cpu_high_percent,
            floor: config.cpu_low_percent,
        }),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use serde_json::json;
    use sf_protocol::{ResourceId, ResourceKind, ResourceStatus};

    fn resource(kind: ResourceKind, spec: serde_json::Value) -> Resource {
        let now = Utc::now();
        Resource {
            id: ResourceId::new(kind, kind.default_scope(), "svc"),
            spec,
            status: ResourceStatus::Healthy,
            version: 1,
            observed_at: now,
            created_at: now,
        }
    }

    fn cpu(values: &[f64]) -> Signals {
        Signals {
            cpu: values.to_vec(),
        }
    }

    fn high() -> SustainedCpuHigh {
        SustainedCpuHigh {
            samples: 5,
            threshold: 75.0,
        }
    }

    fn low() -> SustainedCpuLow {
        SustainedCpuLow {
            samples: 5,
            threshold: 20.0,
        }
    }

    #[test]
    fn high_cpu_doubles() {
        let r = resource(ResourceKind::Deployment, json!({"replicas": 2}));
        let p = high().evaluate(&r, &cpu(&[10.0, 80.0, 85.0, 90.0, 95.0, 88.0])).unwrap();
        assert_eq!(p.kind, RecommendationKind::ScaleUp);
        assert_eq!(p.size, 4);
        assert!(p.confidence > 0.6 && p.confidence <= 1.0);
    }

    #[test]
    fn high_cpu_capped_at_max() {
        let r = resource(ResourceKind::CacheCluster, json!({"nodes": 15}));
        let p = high().evaluate(&r, &cpu(&[99.0; 5])).unwrap();
        assert_eq!(p.size, 20);

        let r = resource(ResourceKind::CacheCluster, json!({"nodes": 20}));
        assert!(high().evaluate(&r, &cpu(&[99.0; 5])).is_none());
    }

    #[test]
    fn one_dip_breaks_the_streak() {
        let r = resource(ResourceKind::Deployment, json!({"replicas": 2}));
        assert!(high().evaluate(&r, &cpu(&[80.0, 80.0, 70.0, 80.0, 80.0])).is_none());
        assert!(high().evaluate(&r, &cpu(&[80.0, 80.0])).is_none());
    }

    #[test]
    fn low_cpu_halves() {
        let r = resource(ResourceKind::ComputeInstance, json!({"count": 5}));
        let p = low().evaluate(&r, &cpu(&[5.0; 5])).unwrap();
        assert_eq!(p.kind, RecommendationKind::ScaleDown);
        assert_eq!(p.size, 2);
    }

    #[test]
    fn low_cpu_keeps_single_replica() {
        let r = resource(ResourceKind::Deployment, json!({"replicas": 1}));
        assert!(low().evaluate(&r, &cpu(&[1.0; 5])).is_none());
    }

    fn trend() -> CpuTrend {
        CpuTrend {
            window: 20,
            horizon: 10,
            min_slope: 2.0,
            ceiling: 75.0,
            floor: 20.0,
        }
    }

    #[test]
    fn rising_trend_scales_up_before_the_threshold() {
        let r = resource(ResourceKind::Deployment, json!({"replicas": 4}));
        let signals = cpu(&[52.0, 56.0, 60.0, 64.0, 68.0, 72.0]);
        assert!(high().evaluate(&r, &signals).is_none());

        let p = trend().evaluate(&r, &signals).unwrap();
        assert_eq!(p.kind, RecommendationKind::ScaleUp);
        assert_eq!(p.size, 6);
        assert!(p.justification.contains("+4.0"));
        assert!(p.confidence > 0.5 && p.confidence < 1.0);
    }

    #[test]
    fn falling_trend_under_floor_scales_down() {
        let r = resource(ResourceKind::CacheCluster, json!({"nodes": 3}));
        let p = trend()
            .evaluate(&r, &cpu(&[19.0, 16.0, 13.0, 10.0, 7.0, 4.0]))
            .unwrap();
        assert_eq!(p.kind, RecommendationKind::ScaleDown);
        assert_eq!(p.size, 2);
    }

    #[test]
    fn flat_or_short_series_has_no_trend_proposal() {
        let r = resource(ResourceKind::Deployment, json!({"replicas": 2}));
        assert!(trend().evaluate(&r, &cpu(&[93.0; 10])).is_none());
        assert!(trend().evaluate(&r, &cpu(&[50.0, 60.0, 70.0])).is_none());
        // falling, but still busy
        assert!(trend()
            .evaluate(&r, &cpu(&[90.0, 85.0, 80.0, 75.0, 70.0]))
            .is_none());
    }

    #[test]
    fn default_rule_names() {
        let names: Vec<_> = default_rules(&RecommendationConfig::default())
            .iter()
            .map(|r| r.name())
            .collect();
        assert_eq!(
            names,
            vec!["sustained_cpu_high", "sustained_cpu_low", "cpu_trend"]
        );
    }
}
