//! State store and event log.
//!
//! Two backends share the same contract:
//! - **In-memory** (`MemoryStore`): one `RwLock` over resources, log and the
//!   applied set (tests and development).
//! - **PostgreSQL** (`PgStore`): one transaction per commit (production).
//!
//! Every resource mutation goes through [`StateStore::commit`], which writes
//! the matching `operation`/`transition` log entry in the same atomic step.

pub mod memory;
pub mod postgres;
pub mod stream;

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use thiserror::Error;
use tokio::sync::broadcast;
use uuid::Uuid;

use sf_protocol::{
    Actor, EventDraft, EventLogEntry, EventPayload, ObservedTransition, OperationKind,
    OperationRecord, Outcome, Resource, ResourceFilter, ResourceId, ResourceStatus, StateSnapshot,
};

pub use memory::MemoryStore;
pub use postgres::PgStore;
pub use stream::{read_from, read_history};

/// Capacity of the live event broadcast channel.
pub const EVENT_CHANNEL_CAPACITY: usize = 1024;

#[derive(Debug, Clone, PartialEq, Error)]
pub enum StoreError {
    /// Optimistic concurrency collision. Retryable by recompiling.
    #[error("version conflict on {id}: expected {expected:?}, found {found:?}")]
    Conflict {
        id: ResourceId,
        expected: Option<u64>,
        found: Option<u64>,
    },

    #[error("change set {0} already applied")]
    AlreadyApplied(Uuid),

    #[error("persistence unavailable: {0}")]
    Unavailable(String),
}

impl From<sqlx::Error> for StoreError {
    fn from(e: sqlx::Error) -> Self {
        StoreError::Unavailable(e.to_string())
    }
}

pub type StoreResult<T> = Result<T, StoreError>;

/// Why a mutation happens. Decides which log entry the store writes for it.
#[derive(Debug, Clone, PartialEq)]
pub enum MutationCause {
    /// Operation `index` of an executed change set.
    Operation {
        change_set_id: Uuid,
        index: usize,
        kind: OperationKind,
    },
    /// Status change observed on live infrastructure.
    Observation { detail: Option<String> },
}

/// One versioned change to one resource.
#[derive(Debug, Clone, PartialEq)]
pub struct Mutation {
    pub id: ResourceId,
    /// Version the change was computed against. `None` means the resource
    /// must not exist.
    pub expected: Option<u64>,
    /// New spec and status. `None` removes the resource.
    pub next: Option<(serde_json::Value, ResourceStatus)>,
    pub cause: MutationCause,
}

/// A batch of mutations applied all-or-nothing.
#[derive(Debug, Clone)]
pub struct Commit {
    /// Recorded as applied in the same step; a second commit with the same
    /// id is rejected.
    pub change_set_id: Option<Uuid>,
    pub actor: Actor,
    pub mutations: Vec<Mutation>,
    /// Entries appended after the per-mutation entries (e.g. the execution
    /// summary).
    pub trailer: Vec<EventDraft>,
}

#[derive(Debug, Clone)]
pub struct CommitReceipt {
    /// Resulting resource per mutation, in order (`None` when removed).
    pub resources: Vec<Option<Resource>>,
    /// Sequence numbers of every entry written by the commit.
    pub seqs: Vec<u64>,
}

/// Authoritative, versioned record of resources.
#[async_trait]
pub trait StateStore: Send + Sync {
    async fn get(&self, id: &ResourceId) -> StoreResult<Option<Resource>>;

    async fn list(&self, filter: &ResourceFilter) -> StoreResult<Vec<Resource>>;

    async fn snapshot(&self) -> StoreResult<StateSnapshot>;

    async fn is_applied(&self, change_set_id: Uuid) -> StoreResult<bool>;

    /// Compare-and-swap across the whole batch: any version mismatch rejects
    /// everything with [`StoreError::Conflict`].
    async fn commit(&self, commit: Commit) -> StoreResult<CommitReceipt>;
}

/// Append-only, gapless, totally ordered ledger.
#[async_trait]
pub trait EventLog: Send + Sync {
    /// Append a batch atomically. Returns the assigned sequence numbers.
    async fn append_all(&self, drafts: Vec<EventDraft>) -> StoreResult<Vec<u64>>;

    async fn append(&self, draft: EventDraft) -> StoreResult<u64> {
        self.append_all(vec![draft])
            .await?
            .pop()
            .ok_or_else(|| StoreError::Unavailable("append returned no sequence".into()))
    }

    /// Up to `limit` entries with `seq >= from`, in order.
    async fn read_range(&self, from: u64, limit: usize) -> StoreResult<Vec<EventLogEntry>>;

    /// Sequence number of the last entry (0 when empty).
    async fn head(&self) -> StoreResult<u64>;

    /// Live feed of entries committed from now on, in sequence order.
    fn subscribe(&self) -> broadcast::Receiver<EventLogEntry>;
}

/// A backend providing both contracts, sharing one serialization point.
pub trait Ledger: StateStore + EventLog {}

impl<T: StateStore + EventLog + ?Sized> Ledger for T {}

/// Reject the mutation unless `current` is at the expected version.
pub(crate) fn check_version(m: &Mutation, current: Option<&Resource>) -> StoreResult<()> {
    let found = current.map(|r| r.version);
    if found != m.expected {
        return Err(StoreError::Conflict {
            id: m.id.clone(),
            expected: m.expected,
            found,
        });
    }
    Ok(())
}

/// Reject a batch that touches one resource twice. The later mutation is
/// reported against the version the earlier one would leave behind.
pub(crate) fn check_distinct(mutations: &[Mutation]) -> StoreResult<()> {
    let mut seen: HashMap<&ResourceId, &Mutation> = HashMap::with_capacity(mutations.len());
    for m in mutations {
        if let Some(earlier) = seen.insert(&m.id, m) {
            let found = earlier
                .next
                .as_ref()
                .map(|_| earlier.expected.map_or(1, |v| v + 1));
            return Err(StoreError::Conflict {
                id: m.id.clone(),
                expected: m.expected,
                found,
            });
        }
    }
    Ok(())
}

/// Compute the resulting resource and the log entry for one mutation.
/// The caller has already checked the version.
pub(crate) fn apply_mutation(
    m: &Mutation,
    current: Option<&Resource>,
    actor: Actor,
    now: DateTime<Utc>,
) -> (Option<Resource>, EventDraft) {
    let after = m.next.as_ref().map(|(spec, status)| Resource {
        id: m.id.clone(),
        spec: spec.clone(),
        status: *status,
        version: current.map_or(1, |r| r.version + 1),
        observed_at: now,
        created_at: current.map_or(now, |r| r.created_at),
    });

    let payload = match &m.cause {
        MutationCause::Operation {
            change_set_id,
            index,
            kind,
        } => EventPayload::Operation(OperationRecord {
            change_set_id: *change_set_id,
            index: *index,
            kind: *kind,
            target: m.id.clone(),
            before: current.cloned(),
            after: after.clone(),
        }),
        MutationCause::Observation { detail } => EventPayload::Transition(ObservedTransition {
            target: m.id.clone(),
            from: current.map(|r| r.status),
            to: after.as_ref().map_or(ResourceStatus::Deleting, |r| r.status),
            before: current.cloned(),
            after: after.clone(),
            detail: detail.clone(),
        }),
    };

    (after, EventDraft::new(actor, payload, Outcome::Success))
}
