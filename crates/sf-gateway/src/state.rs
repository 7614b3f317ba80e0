//! Shared application state for the Axum server.
//!
//! Supports two modes:
//! - **Database mode**: `PgStore` over a `PgPool` (production).
//! - **In-memory mode**: `MemoryStore` seeded with sample infrastructure
//!   (tests and development).

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use serde_json::json;
use tokio::sync::watch;
use tokio::task::JoinHandle;

use sf_protocol::{ProviderClass, Resource, ResourceId, ResourceKind, ResourceStatus};
use sf_providers::{HttpProvider, HttpProviderConfig, ProviderRegistry, ProviderResult};

use crate::classifier::{self, IntentClassifier};
use crate::config::GatewayConfig;
use crate::executor::ChangeExecutor;
use crate::metrics::MetricsCollector;
use crate::observer::Observer;
use crate::recommendations::RecommendationEngine;
use crate::service::{GatewayService, ServiceSettings};
use crate::store::{Ledger, MemoryStore};

/// Shared application state, wrapped in `Arc` for Axum handler sharing.
#[derive(Clone)]
pub struct AppState {
    /// State store and event log.
    pub ledger: Arc<dyn Ledger>,
    /// Classify → compile → execute pipeline.
    pub gateway: Arc<GatewayService>,
    pub recommendations: Arc<RecommendationEngine>,
    pub metrics: Arc<MetricsCollector>,
    pub providers: ProviderRegistry,
    pub config: Arc<GatewayConfig>,
}

impl AppState {
    pub fn build(
        ledger: Arc<dyn Ledger>,
        providers: ProviderRegistry,
        classifier: Arc<dyn IntentClassifier>,
        config: GatewayConfig,
    ) -> Self {
        let executor = ChangeExecutor::new(ledger.clone(), providers.clone())
            .with_provider_timeout(config.provider_timeout());
        let metrics = Arc::new(MetricsCollector::new(config.metrics_capacity));
        let gateway = Arc::new(
            GatewayService::new(
                classifier,
                ledger.clone(),
                executor,
                ServiceSettings::from(&config),
            )
            .with_metrics(metrics.clone()),
        );
        let recommendations = Arc::new(RecommendationEngine::new(
            gateway.clone(),
            metrics.clone(),
            config.recommendations.clone(),
        ));
        Self {
            ledger,
            gateway,
            recommendations,
            metrics,
            providers,
            config: Arc::new(config),
        }
    }

    /// In-memory state over `resources`, with simulated providers that
    /// already know them.
    pub fn in_memory(config: GatewayConfig, resources: Vec<Resource>) -> Self {
        let providers = ProviderRegistry::simulated(&resources);
        let classifier = classifier::from_config(&config.ollama);
        let ledger: Arc<dyn Ledger> = Arc::new(MemoryStore::seeded(resources));
        Self::build(ledger, providers, classifier, config)
    }

    /// Create state with sample infrastructure for development / tests.
    pub fn with_sample_data() -> Self {
        Self::in_memory(GatewayConfig::default(), sample_resources())
    }

    /// Start the recommendation engine and the observer. Both stop when
    /// `shutdown` turns true, after finishing the pass they are in.
    pub fn spawn_background(&self, shutdown: &watch::Receiver<bool>) -> Vec<JoinHandle<()>> {
        let observer = Observer::new(
            self.ledger.clone(),
            self.providers.clone(),
            Duration::from_secs(self.config.observe_interval_secs.max(1)),
        );
        vec![
            tokio::spawn(self.recommendations.clone().run(shutdown.clone())),
            tokio::spawn(observer.run(shutdown.clone())),
        ]
    }
}

impl Default for AppState {
    fn default() -> Self {
        Self::with_sample_data()
    }
}

/// HTTP providers for every class when a control plane is configured,
/// simulated ones otherwise.
pub fn provider_registry(config: &GatewayConfig, known: &[Resource]) -> ProviderResult<ProviderRegistry> {
    let Some(base_url) = &config.control_plane_url else {
        return Ok(ProviderRegistry::simulated(known));
    };
    let mut registry = ProviderRegistry::new();
    for class in [
        ProviderClass::Orchestrator,
        ProviderClass::CacheService,
        ProviderClass::CloudApi,
    ] {
        registry.register(Arc::new(HttpProvider::new(HttpProviderConfig {
            base_url: base_url.clone(),
            class,
            timeout_ms: config.provider_timeout_ms,
        })?));
    }
    Ok(registry)
}

/// The infrastructure the dashboard shows out of the box.
pub fn sample_resources() -> Vec<Resource> {
    let now = Utc::now();
    let resource = |kind: ResourceKind, scope: &str, name: &str, spec: serde_json::Value| Resource {
        id: ResourceId::new(kind, scope, name),
        spec,
        status: ResourceStatus::Healthy,
        version: 1,
        observed_at: now,
        created_at: now,
    };
    vec![
        resource(
            ResourceKind::Deployment,
            "default",
            "frontend",
            json!({"image": "nginx:latest", "replicas": 2}),
        ),
        resource(
            ResourceKind::Deployment,
            "default",
            "api-gateway",
            json!({"image": "api-gateway:1.4.2", "replicas": 3}),
        ),
        resource(
            ResourceKind::CacheCluster,
            "us-east-1",
            "redis-cache",
            json!({"engine": "redis", "nodes": 2}),
        ),
        resource(
            ResourceKind::ComputeInstance,
            "us-east-1",
            "worker-node-1",
            json!({"instance_type": "t3.medium", "count": 1}),
        ),
    ]
}
