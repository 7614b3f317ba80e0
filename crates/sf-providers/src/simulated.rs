//! In-process simulated control plane.
//!
//! Stands in for a real orchestrator, cloud API, or cache service. Keeps its
//! own view of live objects and applies the same validation a real control
//! plane would (size limits, engine names, duplicate/missing objects).

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::Mutex;
use uuid::Uuid;

use sf_protocol::{
    Operation, OperationKind, ProviderClass, Resource, ResourceId, ResourceKind, ResourceStatus,
};

use crate::error::{ProviderError, ProviderResult};
use crate::provider::{Ack, Provider};

const CACHE_ENGINES: &[&str] = &["redis", "memcached"];

#[derive(Debug, Clone)]
struct LiveObject {
    spec: serde_json::Value,
    status: ResourceStatus,
}

/// Simulated provider for one provider class.
pub struct SimulatedProvider {
    name: String,
    class: ProviderClass,
    live: Mutex<HashMap<ResourceId, LiveObject>>,
    /// Artificial latency added to every call.
    latency: Duration,
}

impl SimulatedProvider {
    pub fn new(name: impl Into<String>, class: ProviderClass) -> Self {
        Self {
            name: name.into(),
            class,
            live: Mutex::new(HashMap::new()),
            latency: Duration::ZERO,
        }
    }

    /// Pre-load live objects (e.g. resources already recorded by the store).
    pub fn with_resources<'a>(mut self, resources: impl IntoIterator<Item = &'a Resource>) -> Self {
        let live = self.live.get_mut();
        for r in resources {
            live.insert(
                r.id.clone(),
                LiveObject {
                    spec: r.spec.clone(),
                    status: r.status,
                },
            );
        }
        self
    }

    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = latency;
        self
    }

    /// Force the observed status of a live object (simulates drift).
    pub async fn set_status(&self, id: &ResourceId, status: ResourceStatus) -> bool {
        match self.live.lock().await.get_mut(id) {
            Some(obj) => {
                obj.status = status;
                true
            }
            None => false,
        }
    }

    /// Spec of a live object as the provider sees it.
    pub async fn live_spec(&self, id: &ResourceId) -> Option<serde_json::Value> {
        self.live.lock().await.get(id).map(|o| o.spec.clone())
    }

    pub async fn live_count(&self) -> usize {
        self.live.lock().await.len()
    }

    fn ack(&self, status: ResourceStatus, reference: Option<String>) -> Ack {
        Ack {
            provider: self.name.clone(),
            status,
            reference,
            detail: None,
        }
    }
}

/// Validate a spec document the way the real control plane would.
pub fn validate_spec(kind: ResourceKind, spec: &serde_json::Value) -> ProviderResult<()> {
    let field = kind.scale_field();
    let size = spec
        .get(field)
        .and_then(|v| v.as_u64())
        .ok_or_else(|| ProviderError::Rejected(format!("'{field}' must be a non-negative integer")))?;
    if size < kind.min_size() || size > kind.max_size() {
        return Err(ProviderError::Rejected(format!(
            "'{field}' must be between {} and {}, got {size}",
            kind.min_size(),
            kind.max_size()
        )));
    }

    match kind {
        ResourceKind::Deployment => {
            if spec.get("image").and_then(|v| v.as_str()).is_none_or(str::is_empty) {
                return Err(ProviderError::Rejected("deployment requires an image".into()));
            }
        }
        ResourceKind::CacheCluster => {
            let engine = spec.get("engine").and_then(|v| v.as_str()).unwrap_or_default();
            if !CACHE_ENGINES.contains(&engine) {
                return Err(ProviderError::Rejected(format!(
                    "unsupported cache engine '{engine}'"
                )));
            }
        }
        ResourceKind::ComputeInstance => {
            if spec.get("instance_type").and_then(|v| v.as_str()).is_none_or(str::is_empty) {
                return Err(ProviderError::Rejected(
                    "compute instance requires an instance_type".into(),
                ));
            }
        }
    }
    Ok(())
}

#[async_trait]
impl Provider for SimulatedProvider {
    fn name(&self) -> &str {
        &self.name
    }

    fn class(&self) -> ProviderClass {
        self.class
    }

    async fn apply_operation(&self, op: &Operation) -> ProviderResult<Ack> {
        if op.target.kind.provider_class() != self.class {
            return Err(ProviderError::Unsupported(op.target.kind));
        }
        if !self.latency.is_zero() {
            tokio::time::sleep(self.latency).await;
        }

        let mut live = self.live.lock().await;
        match op.kind {
            OperationKind::Create => {
                let spec = op
                    .after
                    .as_ref()
                    .ok_or_else(|| ProviderError::Rejected("create without spec".into()))?;
                validate_spec(op.target.kind, spec)?;
                if live.contains_key(&op.target) {
                    return Err(ProviderError::Rejected(format!(
                        "{} already exists",
                        op.target
                    )));
                }
                live.insert(
                    op.target.clone(),
                    LiveObject {
                        spec: spec.clone(),
                        status: ResourceStatus::Healthy,
                    },
                );
                let suffix = Uuid::now_v7().simple().to_string();
                let reference = format!("{}-{}", op.target.name, &suffix[24..]);
                tracing::debug!(provider = %self.name, resource = %op.target, "simulated create");
                Ok(self.ack(ResourceStatus::Healthy, Some(reference)))
            }
            OperationKind::Update => {
                let spec = op
                    .after
                    .as_ref()
                    .ok_or_else(|| ProviderError::Rejected("update without spec".into()))?;
                validate_spec(op.target.kind, spec)?;
                let obj = live
                    .get_mut(&op.target)
                    .ok_or_else(|| ProviderError::Rejected(format!("{} not found", op.target)))?;
                obj.spec = spec.clone();
                tracing::debug!(provider = %self.name, resource = %op.target, "simulated update");
                Ok(self.ack(obj.status, None))
            }
            OperationKind::Delete => {
                if live.remove(&op.target).is_none() {
                    return Err(ProviderError::Rejected(format!("{} not found", op.target)));
                }
                tracing::debug!(provider = %self.name, resource = %op.target, "simulated delete");
                Ok(self.ack(ResourceStatus::Deleting, None))
            }
        }
    }

    async fn observe(&self, id: &ResourceId) -> ProviderResult<Option<ResourceStatus>> {
        Ok(self.live.lock().await.get(id).map(|o| o.status))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use serde_json::json;

    fn frontend() -> Resource {
        let now = Utc::now();
        Resource {
            id: ResourceId::new(ResourceKind::Deployment, "default", "frontend"),
            spec: json!({"replicas": 2, "image": "nginx:latest"}),
            status: ResourceStatus::Healthy,
            version: 1,
            observed_at: now,
            created_at: now,
        }
    }

    fn orchestrator() -> SimulatedProvider {
        SimulatedProvider::new("sim-orchestrator", ProviderClass::Orchestrator)
            .with_resources([&frontend()])
    }

    #[tokio::test]
    async fn update_changes_live_spec() {
        let provider = orchestrator();
        let op = Operation::update(frontend(), json!({"replicas": 5, "image": "nginx:latest"}));
        let ack = provider.apply_operation(&op).await.unwrap();
        assert_eq!(ack.status, ResourceStatus::Healthy);
        assert_eq!(
            provider.live_spec(&frontend().id).await.unwrap()["replicas"],
            5
        );
    }

    #[tokio::test]
    async fn create_duplicate_rejected() {
        let provider = orchestrator();
        let op = Operation::create(frontend().id, json!({"replicas": 1, "image": "nginx"}));
        let err = provider.apply_operation(&op).await.unwrap_err();
        assert!(matches!(err, ProviderError::Rejected(_)));
    }

    #[tokio::test]
    async fn create_then_delete() {
        let provider = orchestrator();
        let id = ResourceId::new(ResourceKind::Deployment, "default", "api");
        let op = Operation::create(id.clone(), json!({"replicas": 1, "image": "api:1.0"}));
        let ack = provider.apply_operation(&op).await.unwrap();
        assert!(ack.reference.unwrap().starts_with("api-"));
        assert_eq!(provider.live_count().await, 2);

        let inverse = op.inverse().unwrap();
        let ack = provider.apply_operation(&inverse).await.unwrap();
        assert_eq!(ack.status, ResourceStatus::Deleting);
        assert_eq!(provider.live_count().await, 1);
    }

    #[tokio::test]
    async fn wrong_class_is_unsupported() {
        let provider = SimulatedProvider::new("sim-cache", ProviderClass::CacheService);
        let op = Operation::update(frontend(), json!({"replicas": 3, "image": "nginx"}));
        let err = provider.apply_operation(&op).await.unwrap_err();
        assert_eq!(err, ProviderError::Unsupported(ResourceKind::Deployment));
    }

    #[tokio::test]
    async fn observe_reports_drift() {
        let provider = orchestrator();
        assert!(provider.set_status(&frontend().id, ResourceStatus::Degraded).await);
        let status = provider.observe(&frontend().id).await.unwrap();
        assert_eq!(status, Some(ResourceStatus::Degraded));

        let missing = ResourceId::new(ResourceKind::Deployment, "default", "ghost");
        assert_eq!(provider.observe(&missing).await.unwrap(), None);
    }

    #[test]
    fn validate_size_limits() {
        assert!(validate_spec(ResourceKind::Deployment, &json!({"replicas": 3, "image": "x"})).is_ok());
        assert!(validate_spec(ResourceKind::Deployment, &json!({"replicas": 101, "image": "x"})).is_err());
        assert!(validate_spec(ResourceKind::CacheCluster, &json!({"nodes": 0, "engine": "redis"})).is_err());
        assert!(validate_spec(ResourceKind::CacheCluster, &json!({"nodes": 2, "engine": "mongo"})).is_err());
        assert!(validate_spec(ResourceKind::ComputeInstance, &json!({"count": 2})).is_err());
    }
}
