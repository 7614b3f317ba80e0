//! Status observation: provider polls and pushed transitions.
//!
//! Observed status changes are committed like any other mutation (versioned,
//! with a `transition` entry), so the log explains every change of state.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;

use sf_protocol::{Actor, Resource, ResourceId, ResourceStatus};
use sf_providers::ProviderRegistry;

use crate::service::{GatewayError, GatewayResult};
use crate::store::{Commit, Ledger, Mutation, MutationCause, StoreError, StoreResult};

/// Attempts at recording a pushed transition when its read goes stale.
const RECORD_ATTEMPTS: usize = 3;

fn observation(resource: &Resource, status: ResourceStatus, detail: Option<String>) -> Commit {
    Commit {
        change_set_id: None,
        actor: Actor::System,
        mutations: vec![Mutation {
            id: resource.id.clone(),
            expected: Some(resource.version),
            next: Some((resource.spec.clone(), status)),
            cause: MutationCause::Observation { detail },
        }],
        trailer: Vec::new(),
    }
}

/// Record an externally observed status for a resource.
///
/// Unchanged status is a no-op. A concurrent change is re-read and retried.
pub async fn record_transition(
    ledger: &dyn Ledger,
    id: &ResourceId,
    status: ResourceStatus,
    detail: Option<String>,
) -> GatewayResult<Resource> {
    for _ in 0..RECORD_ATTEMPTS {
        let current = ledger
            .get(id)
            .await?
            .ok_or_else(|| GatewayError::NotFound(format!("resource {id}")))?;
        if current.status == status {
            return Ok(current);
        }
        match ledger
            .commit(observation(&current, status, detail.clone()))
            .await
        {
            Ok(mut receipt) => {
                tracing::info!(
                    resource = %id,
                    from = current.status.as_str(),
                    to = status.as_str(),
                    "status transition recorded"
                );
                if let Some(Some(resource)) = receipt.resources.pop() {
                    return Ok(resource);
                }
                return Err(GatewayError::Store(StoreError::Unavailable(
                    "commit returned no resource".into(),
                )));
            }
            Err(StoreError::Conflict { .. }) => continue,
            Err(e) => return Err(e.into()),
        }
    }
    Err(GatewayError::Store(StoreError::Conflict {
        id: id.clone(),
        expected: None,
        found: None,
    }))
}

/// Polls providers for the live status of every stored resource.
pub struct Observer {
    ledger: Arc<dyn Ledger>,
    providers: ProviderRegistry,
    interval: Duration,
}

impl Observer {
    pub fn new(ledger: Arc<dyn Ledger>, providers: ProviderRegistry, interval: Duration) -> Self {
        Self {
            ledger,
            providers,
            interval,
        }
    }

    /// One pass over the store. Returns the number of transitions committed.
    pub async fn poll_once(&self) -> StoreResult<usize> {
        let snapshot = self.ledger.snapshot().await?;
        let mut recorded = 0;
        for resource in snapshot.iter() {
            let provider = match self.providers.resolve(resource.id.kind) {
                Ok(p) => p,
                Err(e) => {
                    tracing::debug!(resource = %resource.id, error = %e, "no provider to observe");
                    continue;
                }
            };
            let observed = match tokio::time::timeout(self.interval, provider.observe(&resource.id)).await {
                Ok(Ok(Some(status))) => status,
                Ok(Ok(None)) => continue,
                Ok(Err(e)) => {
                    tracing::warn!(resource = %resource.id, provider = provider.name(), error = %e, "observe failed");
                    continue;
                }
                Err(_) => {
                    tracing::warn!(resource = %resource.id, provider = provider.name(), "observe timed out");
                    continue;
                }
            };
            if observed == resource.status {
                continue;
            }

            let detail = Some(format!("observed by {}", provider.name()));
            match self.ledger.commit(observation(resource, observed, detail)).await {
                Ok(_) => {
                    tracing::info!(
                        resource = %resource.id,
                        from = resource.status.as_str(),
                        to = observed.as_str(),
                        "status drift observed"
                    );
                    recorded += 1;
                }
                // Changed since the snapshot; the next poll sees the new version.
                Err(StoreError::Conflict { .. }) => {}
                Err(e) => return Err(e),
            }
        }
        Ok(recorded)
    }

    pub async fn run(self, mut shutdown: watch::Receiver<bool>) {
        let mut interval = tokio::time::interval(self.interval);
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        tracing::info!(interval_secs = self.interval.as_secs(), "observer started");

        loop {
            tokio::select! {
                _ = interval.tick() => {
                    if let Err(e) = self.poll_once().await {
                        tracing::warn!(error = %e, "observer poll failed");
                    }
                }
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
            }
        }
        tracing::info!("observer stopped");
    }
}
