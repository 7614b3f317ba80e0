//! Mock provider for testing.
//!
//! Records every operation it receives and fails or hangs on scripted call
//! indices. All executor tests use this instead of a real control plane.

use std::collections::{HashMap, HashSet};
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;

use sf_protocol::{Operation, ProviderClass, ResourceId, ResourceStatus};

use crate::error::{ProviderError, ProviderResult};
use crate::provider::{Ack, Provider};

/// How long a scripted hang lasts. Far longer than any test timeout.
const HANG: Duration = Duration::from_secs(3600);

/// Mock provider with scripted failures and call recording.
pub struct MockProvider {
    name: String,
    class: ProviderClass,
    /// All operations passed to `apply_operation` (for test assertions).
    calls: Mutex<Vec<Operation>>,
    /// Call index → error returned for that call.
    failures: Mutex<HashMap<usize, ProviderError>>,
    /// Call indices that never complete.
    hangs: Mutex<HashSet<usize>>,
    /// Scripted `observe` answers.
    observed: Mutex<HashMap<ResourceId, ResourceStatus>>,
}

impl MockProvider {
    /// Create a mock that acknowledges everything as healthy.
    pub fn new(class: ProviderClass) -> Self {
        let name = match class {
            ProviderClass::Orchestrator => "mock-orchestrator",
            ProviderClass::CacheService => "mock-cache",
            ProviderClass::CloudApi => "mock-cloud",
        };
        Self {
            name: name.into(),
            class,
            calls: Mutex::new(Vec::new()),
            failures: Mutex::new(HashMap::new()),
            hangs: Mutex::new(HashSet::new()),
            observed: Mutex::new(HashMap::new()),
        }
    }

    /// Fail the `index`-th call (0-based) with `error`.
    pub fn fail_on_call(&self, index: usize, error: ProviderError) {
        self.failures.lock().unwrap().insert(index, error);
    }

    /// Make the `index`-th call (0-based) hang until the caller gives up.
    pub fn hang_on_call(&self, index: usize) {
        self.hangs.lock().unwrap().insert(index);
    }

    /// Script the status returned by `observe` for a resource.
    pub fn observe_as(&self, id: ResourceId, status: ResourceStatus) {
        self.observed.lock().unwrap().insert(id, status);
    }

    /// Get copies of all operations received so far.
    pub fn calls(&self) -> Vec<Operation> {
        self.calls.lock().unwrap().clone()
    }

    pub fn call_count(&self) -> usize {
        self.calls.lock().unwrap().len()
    }
}

#[async_trait]
impl Provider for MockProvider {
    fn name(&self) -> &str {
        &self.name
    }

    fn class(&self) -> ProviderClass {
        self.class
    }

    async fn apply_operation(&self, op: &Operation) -> ProviderResult<Ack> {
        let index = {
            let mut calls = self.calls.lock().unwrap();
            calls.push(op.clone());
            calls.len() - 1
        };

        if self.hangs.lock().unwrap().contains(&index) {
            tokio::time::sleep(HANG).await;
        }

        if let Some(err) = self.failures.lock().unwrap().remove(&index) {
            return Err(err);
        }

        Ok(Ack {
            provider: self.name.clone(),
            status: ResourceStatus::Healthy,
            reference: None,
            detail: None,
        })
    }

    async fn observe(&self, id: &ResourceId) -> ProviderResult<Option<ResourceStatus>> {
        Ok(self.observed.lock().unwrap().get(id).copied())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use sf_protocol::ResourceKind;
    use serde_json::json;

    fn create_op(name: &str) -> Operation {
        Operation::create(
            ResourceId::new(ResourceKind::Deployment, "default", name),
            json!({"replicas": 1, "image": "nginx"}),
        )
    }

    #[tokio::test]
    async fn records_calls_in_order() {
        let mock = MockProvider::new(ProviderClass::Orchestrator);
        mock.apply_operation(&create_op("a")).await.unwrap();
        mock.apply_operation(&create_op("b")).await.unwrap();

        let calls = mock.calls();
        assert_eq!(calls.len(), 2);
        assert_eq!(calls[0].target.name, "a");
        assert_eq!(calls[1].target.name, "b");
    }

    #[tokio::test]
    async fn scripted_failure_hits_only_that_call() {
        let mock = MockProvider::new(ProviderClass::Orchestrator);
        mock.fail_on_call(1, ProviderError::Rejected("quota exceeded".into()));

        assert!(mock.apply_operation(&create_op("a")).await.is_ok());
        let err = mock.apply_operation(&create_op("b")).await.unwrap_err();
        assert_eq!(err, ProviderError::Rejected("quota exceeded".into()));
        assert!(mock.apply_operation(&create_op("c")).await.is_ok());
        assert_eq!(mock.call_count(), 3);
    }

    #[tokio::test]
    async fn hang_is_cut_by_caller_timeout() {
        let mock = MockProvider::new(ProviderClass::Orchestrator);
        mock.hang_on_call(0);
        let result =
            tokio::time::timeout(Duration::from_millis(20), mock.apply_operation(&create_op("a")))
                .await;
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn observe_returns_scripted_status() {
        let mock = MockProvider::new(ProviderClass::CacheService);
        let id = ResourceId::new(ResourceKind::CacheCluster, "us-east-1", "redis-cache");
        assert_eq!(mock.observe(&id).await.unwrap(), None);
        mock.observe_as(id.clone(), ResourceStatus::Failed);
        assert_eq!(mock.observe(&id).await.unwrap(), Some(ResourceStatus::Failed));
    }
}
