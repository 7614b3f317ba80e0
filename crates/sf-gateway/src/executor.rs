//! Change executor: applies a `ChangeSet` through providers, then commits.
//!
//! Flow for one change set:
//! 1. Reject ids already applied (or being applied right now) and claim
//!    every target. A target claimed by another in-flight change set is a
//!    conflict, raised before any provider is called.
//! 2. Check every operation's expected version against the store.
//! 3. Call the provider for each operation in order, bounded by
//!    `provider_timeout`. On failure the already-applied operations are
//!    compensated in reverse order and a failure summary is logged; the
//!    store is not touched.
//! 4. Commit all mutations, one `operation` entry each, and the execution
//!    summary in one atomic store commit.
//!
//! No store lock is held while providers are called.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::Utc;
use thiserror::Error;
use uuid::Uuid;

use sf_protocol::{
    Actor, AppliedOperation, ChangeSet, ErrorDetail, EventDraft, EventPayload, ExecutionResult,
    Operation, OperationKind, Outcome, ResourceId,
};
use sf_providers::{Ack, ProviderError, ProviderRegistry};

use crate::store::{Commit, Ledger, Mutation, MutationCause, StoreError};

pub const DEFAULT_PROVIDER_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Debug, Clone, PartialEq, Error)]
pub enum ExecutionError {
    #[error("version conflict on {target}: expected {expected:?}, found {found:?}")]
    Conflict {
        target: ResourceId,
        expected: Option<u64>,
        found: Option<u64>,
    },

    #[error("{target} is being changed by change set {holder}")]
    TargetBusy { target: ResourceId, holder: Uuid },

    #[error("change set {0} already applied")]
    AlreadyApplied(Uuid),

    #[error("operation {index} on {target} timed out after {timeout_ms}ms")]
    ProviderTimeout {
        index: usize,
        target: ResourceId,
        timeout_ms: u64,
    },

    #[error("operation {index} on {target} rejected: {cause}")]
    ProviderRejected {
        index: usize,
        target: ResourceId,
        cause: String,
    },

    #[error("operation {index} on {target} failed, provider unavailable: {cause}")]
    ProviderUnavailable {
        index: usize,
        target: ResourceId,
        cause: String,
    },

    #[error("persistence unavailable: {0}")]
    PersistenceUnavailable(String),
}

impl ExecutionError {
    pub fn kind(&self) -> &'static str {
        match self {
            ExecutionError::Conflict { .. } | ExecutionError::TargetBusy { .. } => "conflict",
            ExecutionError::AlreadyApplied(_) => "already_applied",
            ExecutionError::ProviderTimeout { .. } => "provider_timeout",
            ExecutionError::ProviderRejected { .. } => "provider_rejected",
            ExecutionError::ProviderUnavailable { .. } => "provider_unavailable",
            ExecutionError::PersistenceUnavailable(_) => "persistence_unavailable",
        }
    }

    pub fn is_conflict(&self) -> bool {
        matches!(
            self,
            ExecutionError::Conflict { .. } | ExecutionError::TargetBusy { .. }
        )
    }

    fn from_provider(index: usize, target: &ResourceId, err: ProviderError) -> Self {
        let target = target.clone();
        match err {
            ProviderError::Timeout { timeout_ms } => ExecutionError::ProviderTimeout {
                index,
                target,
                timeout_ms,
            },
            ProviderError::Unavailable(cause) => ExecutionError::ProviderUnavailable {
                index,
                target,
                cause,
            },
            other @ (ProviderError::Rejected(_) | ProviderError::Unsupported(_)) => {
                ExecutionError::ProviderRejected {
                    index,
                    target,
                    cause: other.to_string(),
                }
            }
        }
    }
}

impl From<StoreError> for ExecutionError {
    fn from(e: StoreError) -> Self {
        match e {
            StoreError::Conflict {
                id,
                expected,
                found,
            } => ExecutionError::Conflict {
                target: id,
                expected,
                found,
            },
            StoreError::AlreadyApplied(id) => ExecutionError::AlreadyApplied(id),
            StoreError::Unavailable(cause) => ExecutionError::PersistenceUnavailable(cause),
        }
    }
}

/// Change sets being applied and the targets they hold.
#[derive(Default)]
struct InFlight {
    change_sets: HashSet<Uuid>,
    targets: HashMap<ResourceId, Uuid>,
}

/// Releases an in-flight claim when dropped.
struct Claim<'a> {
    in_flight: &'a Mutex<InFlight>,
    id: Uuid,
    targets: Vec<ResourceId>,
}

impl Drop for Claim<'_> {
    fn drop(&mut self) {
        if let Ok(mut state) = self.in_flight.lock() {
            state.change_sets.remove(&self.id);
            for target in &self.targets {
                state.targets.remove(target);
            }
        }
    }
}

pub struct ChangeExecutor {
    ledger: Arc<dyn Ledger>,
    providers: ProviderRegistry,
    provider_timeout: Duration,
    in_flight: Mutex<InFlight>,
}

impl ChangeExecutor {
    pub fn new(ledger: Arc<dyn Ledger>, providers: ProviderRegistry) -> Self {
        Self {
            ledger,
            providers,
            provider_timeout: DEFAULT_PROVIDER_TIMEOUT,
            in_flight: Mutex::new(InFlight::default()),
        }
    }

    pub fn with_provider_timeout(mut self, timeout: Duration) -> Self {
        self.provider_timeout = timeout;
        self
    }

    pub fn providers(&self) -> &ProviderRegistry {
        &self.providers
    }

    /// Claim the change set and all of its targets, or nothing.
    fn claim(&self, cs: &ChangeSet) -> Result<Claim<'_>, ExecutionError> {
        let mut state = self
            .in_flight
            .lock()
            .map_err(|_| ExecutionError::PersistenceUnavailable("executor state poisoned".into()))?;
        if state.change_sets.contains(&cs.id) {
            return Err(ExecutionError::AlreadyApplied(cs.id));
        }
        if let Some((target, holder)) = cs
            .targets()
            .find_map(|t| state.targets.get(t).map(|holder| (t.clone(), *holder)))
        {
            tracing::info!(change_set_id = %cs.id, resource = %target, %holder, "target busy");
            return Err(ExecutionError::TargetBusy { target, holder });
        }

        let targets: Vec<ResourceId> = cs
            .targets()
            .cloned()
            .collect::<HashSet<_>>()
            .into_iter()
            .collect();
        state.change_sets.insert(cs.id);
        for target in &targets {
            state.targets.insert(target.clone(), cs.id);
        }
        Ok(Claim {
            in_flight: &self.in_flight,
            id: cs.id,
            targets,
        })
    }

    /// Apply a change set all-or-nothing.
    pub async fn apply(&self, cs: &ChangeSet, actor: Actor) -> Result<ExecutionResult, ExecutionError> {
        let started_at = Utc::now();
        let _claim = self.claim(cs)?;

        if self.ledger.is_applied(cs.id).await? {
            return Err(ExecutionError::AlreadyApplied(cs.id));
        }
        for op in &cs.operations {
            let found = self.ledger.get(&op.target).await?.map(|r| r.version);
            let expected = op.expected_version();
            if found != expected {
                tracing::info!(
                    change_set_id = %cs.id,
                    resource = %op.target,
                    ?expected,
                    ?found,
                    "change set is stale"
                );
                return Err(ExecutionError::Conflict {
                    target: op.target.clone(),
                    expected,
                    found,
                });
            }
        }

        let mut acks: Vec<Ack> = Vec::with_capacity(cs.operations.len());
        for (index, op) in cs.operations.iter().enumerate() {
            match self.call_provider(op).await {
                Ok(ack) => {
                    tracing::debug!(
                        change_set_id = %cs.id,
                        index,
                        resource = %op.target,
                        provider = %ack.provider,
                        "operation acknowledged"
                    );
                    acks.push(ack);
                }
                Err(e) => {
                    let err = ExecutionError::from_provider(index, &op.target, e);
                    tracing::warn!(change_set_id = %cs.id, index, error = %err, "operation failed, rolling back");
                    let rolled_back = self.compensate(&cs.operations[..index]).await;
                    self.record_failure(cs, actor, &err, rolled_back, started_at)
                        .await;
                    return Err(err);
                }
            }
        }

        let applied: Vec<AppliedOperation> = cs
            .operations
            .iter()
            .map(|op| AppliedOperation {
                target: op.target.clone(),
                kind: op.kind,
                version: match op.kind {
                    OperationKind::Delete => None,
                    _ => Some(op.expected_version().map_or(1, |v| v + 1)),
                },
            })
            .collect();
        let result = ExecutionResult {
            change_set_id: cs.id,
            outcome: Outcome::Success,
            applied,
            rolled_back: 0,
            error: None,
            started_at,
            finished_at: Utc::now(),
        };

        let mutations = cs
            .operations
            .iter()
            .zip(&acks)
            .enumerate()
            .map(|(index, (op, ack))| Mutation {
                id: op.target.clone(),
                expected: op.expected_version(),
                next: op.after.clone().map(|spec| (spec, ack.status)),
                cause: MutationCause::Operation {
                    change_set_id: cs.id,
                    index,
                    kind: op.kind,
                },
            })
            .collect();
        let commit = Commit {
            change_set_id: Some(cs.id),
            actor,
            mutations,
            trailer: vec![EventDraft::new(
                actor,
                EventPayload::Execution(result.clone()),
                Outcome::Success,
            )],
        };

        match self.ledger.commit(commit).await {
            Ok(receipt) => {
                tracing::info!(
                    change_set_id = %cs.id,
                    operations = cs.operations.len(),
                    first_seq = receipt.seqs.first().copied().unwrap_or_default(),
                    "change set applied"
                );
                Ok(result)
            }
            Err(e) => {
                let err = ExecutionError::from(e);
                // Applied elsewhere: the provider already holds this change
                // set's result, undoing it would diverge from the store.
                if matches!(err, ExecutionError::AlreadyApplied(_)) {
                    tracing::warn!(change_set_id = %cs.id, "change set committed by another writer");
                    return Err(err);
                }
                tracing::error!(change_set_id = %cs.id, error = %err, "commit failed after provider success, rolling back");
                let rolled_back = self.compensate(&cs.operations).await;
                self.record_failure(cs, actor, &err, rolled_back, started_at)
                    .await;
                Err(err)
            }
        }
    }

    async fn call_provider(&self, op: &Operation) -> Result<Ack, ProviderError> {
        let provider = self.providers.resolve(op.target.kind)?;
        match tokio::time::timeout(self.provider_timeout, provider.apply_operation(op)).await {
            Ok(result) => result,
            Err(_) => Err(ProviderError::Timeout {
                timeout_ms: self.provider_timeout.as_millis() as u64,
            }),
        }
    }

    /// Undo provider-side effects in reverse order. Returns how many
    /// compensations succeeded.
    async fn compensate(&self, done: &[Operation]) -> usize {
        let mut rolled_back = 0;
        for op in done.iter().rev() {
            let Some(inverse) = op.inverse() else {
                tracing::error!(resource = %op.target, "operation has no inverse, cannot compensate");
                continue;
            };
            match self.call_provider(&inverse).await {
                Ok(_) => rolled_back += 1,
                Err(e) => {
                    tracing::error!(resource = %op.target, error = %e, "compensation failed");
                }
            }
        }
        rolled_back
    }

    async fn record_failure(
        &self,
        cs: &ChangeSet,
        actor: Actor,
        err: &ExecutionError,
        rolled_back: usize,
        started_at: chrono::DateTime<Utc>,
    ) {
        let result = ExecutionResult {
            change_set_id: cs.id,
            outcome: Outcome::Failure,
            applied: Vec::new(),
            rolled_back,
            error: Some(ErrorDetail::new(err.kind(), err.to_string())),
            started_at,
            finished_at: Utc::now(),
        };
        let draft = EventDraft::new(actor, EventPayload::Execution(result), Outcome::Failure);
        if let Err(e) = self.ledger.append(draft).await {
            tracing::error!(change_set_id = %cs.id, error = %e, "failed to record execution failure");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::{EventLog, MemoryStore, StateStore};
    use serde_json::json;
    use sf_protocol::{ProviderClass, Resource, ResourceKind, ResourceStatus};
    use sf_providers::MockProvider;

    fn deployment(name: &str, replicas: u64) -> Resource {
        let now = Utc::now();
        Resource {
            id: ResourceId::new(ResourceKind::Deployment, "default", name),
            spec: json!({"image": "nginx:latest", "replicas": replicas}),
            status: ResourceStatus::Healthy,
            version: 1,
            observed_at: now,
            created_at: now,
        }
    }

    struct Fixture {
        store: Arc<MemoryStore>,
        provider: Arc<MockProvider>,
        executor: ChangeExecutor,
    }

    fn fixture(resources: Vec<Resource>) -> Fixture {
        let store = Arc::new(MemoryStore::seeded(resources));
        let provider = Arc::new(MockProvider::new(ProviderClass::Orchestrator));
        let mut registry = ProviderRegistry::new();
        registry.register(provider.clone());
        let executor = ChangeExecutor::new(store.clone(), registry)
            .with_provider_timeout(Duration::from_millis(100));
        Fixture {
            store,
            provider,
            executor,
        }
    }

    fn scale_all(snapshot: &[Resource], replicas: u64) -> ChangeSet {
        let ops = snapshot
            .iter()
            .map(|r| Operation::update(r.clone(), json!({"image": "nginx:latest", "replicas": replicas})))
            .collect();
        ChangeSet::new(Uuid::now_v7(), ops, "scale all")
    }

    #[tokio::test]
    async fn applies_and_bumps_versions() {
        let resources = vec![deployment("a", 1), deployment("b", 1)];
        let f = fixture(resources.clone());
        let head_before = f.store.head().await.unwrap();

        let cs = scale_all(&resources, 3);
        let result = f.executor.apply(&cs, Actor::System).await.unwrap();
        assert_eq!(result.outcome, Outcome::Success);
        assert_eq!(result.applied.len(), 2);
        assert!(result.applied.iter().all(|a| a.version == Some(2)));

        let a = f.store.get(&resources[0].id).await.unwrap().unwrap();
        assert_eq!(a.version, 2);
        assert_eq!(a.spec["replicas"], 3);
        // two operation entries + execution summary
        assert_eq!(f.store.head().await.unwrap(), head_before + 3);
        assert!(f.store.is_applied(cs.id).await.unwrap());
    }

    #[tokio::test]
    async fn second_apply_is_already_applied() {
        let resources = vec![deployment("a", 1)];
        let f = fixture(resources.clone());
        let cs = scale_all(&resources, 2);
        f.executor.apply(&cs, Actor::System).await.unwrap();
        let head = f.store.head().await.unwrap();

        let err = f.executor.apply(&cs, Actor::System).await.unwrap_err();
        assert_eq!(err, ExecutionError::AlreadyApplied(cs.id));
        assert_eq!(f.store.head().await.unwrap(), head);
        assert_eq!(f.provider.call_count(), 1);
    }

    #[tokio::test]
    async fn failure_rolls_back_in_reverse() {
        let resources = vec![deployment("a", 1), deployment("b", 1), deployment("c", 1)];
        let f = fixture(resources.clone());
        f.provider
            .fail_on_call(2, ProviderError::Rejected("quota exceeded".into()));
        let before = f.store.snapshot().await.unwrap();
        let head = f.store.head().await.unwrap();

        let cs = scale_all(&resources, 5);
        let err = f.executor.apply(&cs, Actor::System).await.unwrap_err();
        assert_eq!(err.kind(), "provider_rejected");

        // calls: a, b, c(fails), then inverse of b, inverse of a
        let calls = f.provider.calls();
        assert_eq!(calls.len(), 5);
        assert_eq!(calls[3].target.name, "b");
        assert_eq!(calls[4].target.name, "a");
        assert_eq!(calls[4].after, Some(json!({"image": "nginx:latest", "replicas": 1})));

        let after = f.store.snapshot().await.unwrap();
        assert_eq!(before.resources, after.resources);
        assert!(!f.store.is_applied(cs.id).await.unwrap());

        // only the failure summary was logged
        assert_eq!(f.store.head().await.unwrap(), head + 1);
        let entry = f.store.read_range(head + 1, 1).await.unwrap().remove(0);
        assert_eq!(entry.outcome, Outcome::Failure);
        match entry.payload {
            EventPayload::Execution(r) => {
                assert_eq!(r.rolled_back, 2);
                assert_eq!(r.error.unwrap().kind, "provider_rejected");
            }
            other => panic!("unexpected payload {other:?}"),
        }
    }

    #[tokio::test]
    async fn timeout_is_a_failure() {
        let resources = vec![deployment("a", 1), deployment("b", 1)];
        let f = fixture(resources.clone());
        f.provider.hang_on_call(1);

        let cs = scale_all(&resources, 4);
        let err = f.executor.apply(&cs, Actor::System).await.unwrap_err();
        assert!(matches!(
            err,
            ExecutionError::ProviderTimeout { index: 1, timeout_ms: 100, .. }
        ));
        assert_eq!(f.provider.call_count(), 3);
        let a = f.store.get(&resources[0].id).await.unwrap().unwrap();
        assert_eq!(a.version, 1);
    }

    #[tokio::test]
    async fn stale_change_set_conflicts_before_provider_calls() {
        let resources = vec![deployment("a", 1)];
        let f = fixture(resources.clone());

        let first = scale_all(&resources, 2);
        let stale = scale_all(&resources, 3);
        f.executor.apply(&first, Actor::System).await.unwrap();

        let err = f.executor.apply(&stale, Actor::System).await.unwrap_err();
        assert!(err.is_conflict());
        assert_eq!(f.provider.call_count(), 1);
    }

    #[tokio::test]
    async fn overlapping_change_sets_do_not_both_reach_the_provider() {
        let resources = vec![deployment("a", 1)];
        let f = fixture(resources.clone());
        f.provider.hang_on_call(0);

        let first = scale_all(&resources, 2);
        let second = scale_all(&resources, 3);
        let (a, b) = tokio::join!(
            f.executor.apply(&first, Actor::System),
            f.executor.apply(&second, Actor::System),
        );

        assert!(matches!(a, Err(ExecutionError::ProviderTimeout { .. })));
        let b = b.unwrap_err();
        assert_eq!(
            b,
            ExecutionError::TargetBusy {
                target: resources[0].id.clone(),
                holder: first.id,
            }
        );
        assert!(b.is_conflict());
        assert_eq!(f.provider.call_count(), 1);

        // the claim is released once the first change set is done
        let result = f.executor.apply(&second, Actor::System).await.unwrap();
        assert_eq!(result.outcome, Outcome::Success);
    }

    #[tokio::test]
    async fn empty_change_set_is_recorded() {
        let f = fixture(vec![deployment("a", 1)]);
        let cs = ChangeSet::new(Uuid::now_v7(), Vec::new(), "nothing to do");
        let result = f.executor.apply(&cs, Actor::System).await.unwrap();
        assert!(result.applied.is_empty());
        assert!(f.store.is_applied(cs.id).await.unwrap());
    }

    #[tokio::test]
    async fn create_and_delete() {
        let f = fixture(vec![deployment("a", 1)]);
        let id = ResourceId::new(ResourceKind::Deployment, "default", "web");
        let create = ChangeSet::new(
            Uuid::now_v7(),
            vec![Operation::create(id.clone(), json!({"image": "httpd", "replicas": 1}))],
            "create web",
        );
        let result = f.executor.apply(&create, Actor::System).await.unwrap();
        assert_eq!(result.applied[0].version, Some(1));

        let web = f.store.get(&id).await.unwrap().unwrap();
        let delete = ChangeSet::new(Uuid::now_v7(), vec![Operation::delete(web)], "delete web");
        let result = f.executor.apply(&delete, Actor::System).await.unwrap();
        assert_eq!(result.applied[0].version, None);
        assert!(f.store.get(&id).await.unwrap().is_none());
    }
}
