//! Gateway configuration, loadable from TOML or environment.

use std::time::Duration;

use serde::Deserialize;
use thiserror::Error;

use crate::classifier::OllamaConfig;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file {path}: {source}")]
    Read {
        path: String,
        source: std::io::Error,
    },

    #[error("invalid config file: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("invalid value for {key}: {value}")]
    InvalidValue { key: &'static str, value: String },
}

/// Top-level gateway configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct GatewayConfig {
    /// Listen address (e.g., "0.0.0.0").
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
    /// PostgreSQL connection URL. None runs on in-memory state.
    #[serde(default)]
    pub database_url: Option<String>,
    /// Execute change sets as soon as they are compiled. Off by default;
    /// every auto-applied submission is recorded as such.
    #[serde(default)]
    pub auto_apply: bool,
    /// Classified commands below this confidence are returned for
    /// confirmation instead of being compiled.
    #[serde(default = "default_ambiguity_threshold")]
    pub ambiguity_threshold: f64,
    /// Recompile-and-retry attempts on version conflicts.
    #[serde(default = "default_commit_retries")]
    pub commit_retries: u32,
    #[serde(default = "default_provider_timeout_ms")]
    pub provider_timeout_ms: u64,
    /// External control plane. None uses the simulated providers.
    #[serde(default)]
    pub control_plane_url: Option<String>,
    /// Seconds between provider status polls.
    #[serde(default = "default_observe_interval")]
    pub observe_interval_secs: u64,
    /// Samples kept per target and metric.
    #[serde(default = "default_metrics_capacity")]
    pub metrics_capacity: usize,
    /// Submissions kept for `GET /commands`.
    #[serde(default = "default_submission_history")]
    pub submission_history: usize,
    #[serde(default)]
    pub recommendations: RecommendationConfig,
    #[serde(default)]
    pub ollama: OllamaConfig,
}

fn default_host() -> String {
    "0.0.0.0".to_string()
}
fn default_port() -> u16 {
    8080
}
fn default_ambiguity_threshold() -> f64 {
    0.5
}
fn default_commit_retries() -> u32 {
    3
}
fn default_provider_timeout_ms() -> u64 {
    5_000
}
fn default_observe_interval() -> u64 {
    30
}
fn default_metrics_capacity() -> usize {
    100
}
fn default_submission_history() -> usize {
    500
}

/// Recommendation engine settings (`[recommendations]`).
#[derive(Debug, Clone, Deserialize)]
pub struct RecommendationConfig {
    #[serde(default = "default_scan_interval")]
    pub interval_secs: u64,
    /// No new recommendation for a target mutated within this window.
    #[serde(default = "default_cooldown")]
    pub cooldown_secs: u64,
    /// Pending recommendations older than this expire.
    #[serde(default = "default_expiry")]
    pub expiry_secs: u64,
    /// Most recent event log entries read per scan.
    #[serde(default = "default_event_window")]
    pub event_window: usize,
    /// Consecutive samples a CPU condition must hold for.
    #[serde(default = "default_sustained_samples")]
    pub sustained_samples: usize,
    #[serde(default = "default_cpu_high")]
    pub cpu_high_percent: f64,
    #[serde(default = "default_cpu_low")]
    pub cpu_low_percent: f64,
    /// CPU samples a trend is fitted to.
    #[serde(default = "default_trend_window")]
    pub trend_window: usize,
    /// Samples ahead the trend is projected.
    #[serde(default = "default_forecast_horizon")]
    pub forecast_horizon: usize,
    /// Smallest per-sample change counted as a trend, in CPU points.
    #[serde(default = "default_trend_min_slope")]
    pub trend_min_slope: f64,
}

fn default_scan_interval() -> u64 {
    60
}
fn default_cooldown() -> u64 {
    300
}
fn default_expiry() -> u64 {
    3600
}
fn default_event_window() -> usize {
    200
}
fn default_sustained_samples() -> usize {
    5
}
fn default_cpu_high() -> f64 {
    75.0
}
fn default_cpu_low() -> f64 {
    20.0
}
fn default_trend_window() -> usize {
    20
}
fn default_forecast_horizon() -> usize {
    10
}
fn default_trend_min_slope() -> f64 {
    2.0
}

impl Default for RecommendationConfig {
    fn default() -> Self {
        Self {
            interval_secs: default_scan_interval(),
            cooldown_secs: default_cooldown(),
            expiry_secs: default_expiry(),
            event_window: default_event_window(),
            sustained_samples: default_sustained_samples(),
            cpu_high_percent: default_cpu_high(),
            cpu_low_percent: default_cpu_low(),
            trend_window: default_trend_window(),
            forecast_horizon: default_forecast_horizon(),
            trend_min_slope: default_trend_min_slope(),
        }
    }
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            database_url: None,
            auto_apply: false,
            ambiguity_threshold: default_ambiguity_threshold(),
            commit_retries: default_commit_retries(),
            provider_timeout_ms: default_provider_timeout_ms(),
            control_plane_url: None,
            observe_interval_secs: default_observe_interval(),
            metrics_capacity: default_metrics_capacity(),
            submission_history: default_submission_history(),
            recommendations: RecommendationConfig::default(),
            ollama: OllamaConfig::default(),
        }
    }
}

fn parse_bool(v: &str) -> bool {
    v.eq_ignore_ascii_case("true") || v == "1"
}

impl GatewayConfig {
    /// Load config from a TOML file path.
    pub fn from_file(path: &str) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_string(),
            source,
        })?;
        Ok(toml::from_str(&contents)?)
    }

    /// Load config from environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Defaults overridden by whatever `lookup` returns for the known keys.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let mut config = Self::default();
        if let Some(host) = lookup("SKYFORGE_HOST") {
            config.host = host;
        }
        if let Some(port) = lookup("SKYFORGE_PORT") {
            config.port = port.parse().map_err(|_| ConfigError::InvalidValue {
                key: "SKYFORGE_PORT",
                value: port,
            })?;
        }
        config.database_url = lookup("DATABASE_URL").filter(|v| !v.is_empty());
        config.control_plane_url = lookup("SKYFORGE_CONTROL_PLANE_URL").filter(|v| !v.is_empty());
        if let Some(v) = lookup("SKYFORGE_AUTO_APPLY") {
            config.auto_apply = parse_bool(&v);
        }
        if let Some(v) = lookup("SKYFORGE_AMBIGUITY_THRESHOLD") {
            config.ambiguity_threshold = v.parse().map_err(|_| ConfigError::InvalidValue {
                key: "SKYFORGE_AMBIGUITY_THRESHOLD",
                value: v,
            })?;
        }
        if let Some(v) = lookup("OLLAMA_ENABLED") {
            config.ollama.enabled = parse_bool(&v);
        }
        if let Some(host) = lookup("OLLAMA_HOST") {
            config.ollama.host = host;
        }
        Ok(config)
    }

    pub fn provider_timeout(&self) -> Duration {
        Duration::from_millis(self.provider_timeout_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn default_config() {
        let config = GatewayConfig::default();
        assert_eq!(config.port, 8080);
        assert!(config.database_url.is_none());
        assert!(!config.auto_apply);
        assert_eq!(config.commit_retries, 3);
        assert_eq!(config.provider_timeout(), Duration::from_secs(5));
        assert_eq!(config.recommendations.cooldown_secs, 300);
        assert_eq!(config.recommendations.trend_window, 20);
        assert_eq!(config.recommendations.forecast_horizon, 10);
        assert!(!config.ollama.enabled);
    }

    #[test]
    fn deserialize_minimal_config() {
        let config: GatewayConfig = toml::from_str("port = 9000\n").unwrap();
        assert_eq!(config.port, 9000);
        assert_eq!(config.host, "0.0.0.0"); // default
        assert_eq!(config.ambiguity_threshold, 0.5); // default
        assert_eq!(config.recommendations.interval_secs, 60);
    }

    #[test]
    fn deserialize_full_config() {
        let toml = r#"
host = "127.0.0.1"
port = 8443
auto_apply = true
commit_retries = 5
control_plane_url = "http://control-plane.internal:9000"

[recommendations]
interval_secs = 10
cpu_high_percent = 90.0

[ollama]
enabled = true
model = "gemma:2b"
"#;
        let config: GatewayConfig = toml::from_str(toml).unwrap();
        assert!(config.auto_apply);
        assert_eq!(config.commit_retries, 5);
        assert_eq!(
            config.control_plane_url.as_deref(),
            Some("http://control-plane.internal:9000")
        );
        assert_eq!(config.recommendations.interval_secs, 10);
        assert_eq!(config.recommendations.cpu_high_percent, 90.0);
        assert_eq!(config.recommendations.cooldown_secs, 300);
        assert!(config.ollama.enabled);
        assert_eq!(config.ollama.model, "gemma:2b");
    }

    #[test]
    fn env_overrides() {
        let vars: HashMap<&str, &str> = [
            ("SKYFORGE_PORT", "3001"),
            ("SKYFORGE_AUTO_APPLY", "TRUE"),
            ("DATABASE_URL", "postgres://localhost/skyforge"),
            ("OLLAMA_ENABLED", "1"),
        ]
        .into_iter()
        .collect();
        let config =
            GatewayConfig::from_lookup(|k| vars.get(k).map(|v| v.to_string())).unwrap();
        assert_eq!(config.port, 3001);
        assert!(config.auto_apply);
        assert_eq!(
            config.database_url.as_deref(),
            Some("postgres://localhost/skyforge")
        );
        assert!(config.ollama.enabled);
    }

    #[test]
    fn bad_port_is_rejected() {
        let err = GatewayConfig::from_lookup(|k| (k == "SKYFORGE_PORT").then(|| "http".to_string()))
            .unwrap_err();
        assert!(matches!(err, ConfigError::InvalidValue { key: "SKYFORGE_PORT", .. }));
    }

    #[test]
    fn missing_file_is_read_error() {
        let err = GatewayConfig::from_file("/nonexistent/skyforge.toml").unwrap_err();
        assert!(matches!(err, ConfigError::Read { .. }));
    }
}
