//! In-memory ledger.
//!
//! A single `RwLock` guards resources, the event log and the applied set, so
//! a commit's CAS check, its mutations and its log entries are one critical
//! section. Live entries are broadcast while the write lock is held, which
//! keeps the broadcast order equal to the sequence order.

use std::collections::{BTreeMap, HashSet};

use async_trait::async_trait;
use chrono::Utc;
use tokio::sync::{RwLock, broadcast};
use uuid::Uuid;

use sf_protocol::{
    Actor, EventDraft, EventLogEntry, EventPayload, ObservedTransition, Outcome, Resource,
    ResourceFilter, ResourceId, StateSnapshot,
};

use super::{
    Commit, CommitReceipt, EVENT_CHANNEL_CAPACITY, EventLog, StateStore, StoreError, StoreResult,
    apply_mutation, check_distinct, check_version,
};

#[derive(Default)]
struct Inner {
    resources: BTreeMap<ResourceId, Resource>,
    log: Vec<EventLogEntry>,
    applied: HashSet<Uuid>,
}

impl Inner {
    fn push(&mut self, draft: EventDraft, tx: &broadcast::Sender<EventLogEntry>) -> u64 {
        let seq = self.log.len() as u64 + 1;
        let entry = draft.into_entry(seq, Utc::now());
        // No receivers is fine.
        let _ = tx.send(entry.clone());
        self.log.push(entry);
        seq
    }
}

pub struct MemoryStore {
    inner: RwLock<Inner>,
    events: broadcast::Sender<EventLogEntry>,
}

impl MemoryStore {
    pub fn new() -> Self {
        let (events, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        Self {
            inner: RwLock::new(Inner::default()),
            events,
        }
    }

    /// Store pre-loaded with existing infrastructure. Each resource gets a
    /// `transition` entry so the log accounts for every record.
    pub fn seeded(resources: impl IntoIterator<Item = Resource>) -> Self {
        let (events, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        let mut inner = Inner::default();
        for resource in resources {
            let draft = EventDraft::new(
                Actor::System,
                EventPayload::Transition(ObservedTransition {
                    target: resource.id.clone(),
                    from: None,
                    to: resource.status,
                    before: None,
                    after: Some(resource.clone()),
                    detail: Some("discovered".into()),
                }),
                Outcome::Success,
            );
            inner.push(draft, &events);
            inner.resources.insert(resource.id.clone(), resource);
        }
        Self {
            inner: RwLock::new(inner),
            events,
        }
    }

    /// Number of log entries (test helper).
    pub async fn log_len(&self) -> usize {
        self.inner.read().await.log.len()
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl StateStore for MemoryStore {
    async fn get(&self, id: &ResourceId) -> StoreResult<Option<Resource>> {
        Ok(self.inner.read().await.resources.get(id).cloned())
    }

    async fn list(&self, filter: &ResourceFilter) -> StoreResult<Vec<Resource>> {
        let inner = self.inner.read().await;
        Ok(inner
            .resources
            .values()
            .filter(|r| filter.matches(r))
            .cloned()
            .collect())
    }

    async fn snapshot(&self) -> StoreResult<StateSnapshot> {
        let inner = self.inner.read().await;
        Ok(StateSnapshot::new(inner.resources.values().cloned()))
    }

    async fn is_applied(&self, change_set_id: Uuid) -> StoreResult<bool> {
        Ok(self.inner.read().await.applied.contains(&change_set_id))
    }

    async fn commit(&self, commit: Commit) -> StoreResult<CommitReceipt> {
        let mut inner = self.inner.write().await;

        if let Some(id) = commit.change_set_id
            && inner.applied.contains(&id)
        {
            return Err(StoreError::AlreadyApplied(id));
        }
        check_distinct(&commit.mutations)?;
        for m in &commit.mutations {
            check_version(m, inner.resources.get(&m.id))?;
        }

        // Validated: nothing below can fail.
        let now = Utc::now();
        let mut resources = Vec::with_capacity(commit.mutations.len());
        let mut seqs = Vec::with_capacity(commit.mutations.len() + commit.trailer.len());
        for m in &commit.mutations {
            let (after, draft) = apply_mutation(m, inner.resources.get(&m.id), commit.actor, now);
            match &after {
                Some(r) => {
                    inner.resources.insert(m.id.clone(), r.clone());
                }
                None => {
                    inner.resources.remove(&m.id);
                }
            }
            seqs.push(inner.push(draft, &self.events));
            resources.push(after);
        }
        for draft in commit.trailer {
            seqs.push(inner.push(draft, &self.events));
        }
        if let Some(id) = commit.change_set_id {
            inner.applied.insert(id);
        }

        Ok(CommitReceipt { resources, seqs })
    }
}

#[async_trait]
impl EventLog for MemoryStore {
    async fn append_all(&self, drafts: Vec<EventDraft>) -> StoreResult<Vec<u64>> {
        let mut inner = self.inner.write().await;
        Ok(drafts
            .into_iter()
            .map(|d| inner.push(d, &self.events))
            .collect())
    }

    async fn read_range(&self, from: u64, limit: usize) -> StoreResult<Vec<EventLogEntry>> {
        let inner = self.inner.read().await;
        let start = (from.max(1) - 1) as usize;
        Ok(inner.log.iter().skip(start).take(limit).cloned().collect())
    }

    async fn head(&self) -> StoreResult<u64> {
        Ok(self.inner.read().await.log.len() as u64)
    }

    fn subscribe(&self) -> broadcast::Receiver<EventLogEntry> {
        self.events.subscribe()
    }
}
