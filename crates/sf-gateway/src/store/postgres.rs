//! PostgreSQL ledger.
//!
//! Each commit runs in one transaction that first locks the `event_seq` row.
//! That lock is the single serialization point: sequence numbers are handed
//! out in commit order and the CAS check cannot interleave with another
//! writer. Live entries are broadcast after the transaction commits.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::postgres::PgPoolOptions;
use sqlx::{PgConnection, PgPool};
use tokio::sync::broadcast;
use uuid::Uuid;

use sf_protocol::{
    Actor, EventDraft, EventLogEntry, Resource, ResourceFilter, ResourceId, ResourceKind,
    ResourceStatus, StateSnapshot,
};

use super::{
    Commit, CommitReceipt, EVENT_CHANNEL_CAPACITY, EventLog, Mutation, MutationCause, StateStore,
    StoreError, StoreResult, apply_mutation, check_distinct, check_version,
};

/// Connect to PostgreSQL and run migrations.
pub async fn connect(database_url: &str) -> Result<PgPool, sqlx::Error> {
    let pool = PgPoolOptions::new()
        .max_connections(10)
        .connect(database_url)
        .await?;

    tracing::info!("running database migrations");
    sqlx::raw_sql(include_str!("../../migrations/001_resources.sql"))
        .execute(&pool)
        .await?;
    sqlx::raw_sql(include_str!("../../migrations/002_event_log.sql"))
        .execute(&pool)
        .await?;
    tracing::info!("migrations complete");

    Ok(pool)
}

/// Resource row returned from the database.
#[derive(Debug, Clone, sqlx::FromRow)]
struct ResourceRow {
    kind: String,
    scope: String,
    name: String,
    spec: serde_json::Value,
    status: String,
    version: i64,
    observed_at: DateTime<Utc>,
    created_at: DateTime<Utc>,
}

impl TryFrom<ResourceRow> for Resource {
    type Error = StoreError;

    fn try_from(row: ResourceRow) -> Result<Self, Self::Error> {
        let kind: ResourceKind = row
            .kind
            .parse()
            .map_err(|e| StoreError::Unavailable(format!("corrupt resource row: {e}")))?;
        let status: ResourceStatus = row
            .status
            .parse()
            .map_err(|e| StoreError::Unavailable(format!("corrupt resource row: {e}")))?;
        Ok(Resource {
            id: ResourceId::new(kind, row.scope, row.name),
            spec: row.spec,
            status,
            version: row.version as u64,
            observed_at: row.observed_at,
            created_at: row.created_at,
        })
    }
}

#[derive(Debug, Clone, sqlx::FromRow)]
struct EventRow {
    seq: i64,
    ts: DateTime<Utc>,
    actor: serde_json::Value,
    payload: serde_json::Value,
    outcome: String,
}

impl TryFrom<EventRow> for EventLogEntry {
    type Error = StoreError;

    fn try_from(row: EventRow) -> Result<Self, Self::Error> {
        let corrupt = |e: serde_json::Error| {
            StoreError::Unavailable(format!("corrupt event {}: {e}", row.seq))
        };
        Ok(EventLogEntry {
            seq: row.seq as u64,
            timestamp: row.ts,
            actor: serde_json::from_value(row.actor.clone()).map_err(corrupt)?,
            payload: serde_json::from_value(row.payload.clone()).map_err(corrupt)?,
            outcome: serde_json::from_value(serde_json::Value::String(row.outcome.clone()))
                .map_err(corrupt)?,
        })
    }
}

pub struct PgStore {
    pool: PgPool,
    events: broadcast::Sender<EventLogEntry>,
}

impl PgStore {
    pub fn new(pool: PgPool) -> Self {
        let (events, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        Self { pool, events }
    }

    /// Record `resources` as discovered infrastructure when the store is
    /// empty. Returns how many were inserted.
    pub async fn seed_if_empty(&self, resources: Vec<Resource>) -> StoreResult<usize> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM resources")
            .fetch_one(&self.pool)
            .await?;
        if count > 0 || resources.is_empty() {
            return Ok(0);
        }
        let inserted = resources.len();
        let mutations = resources
            .into_iter()
            .map(|r| Mutation {
                id: r.id,
                expected: None,
                next: Some((r.spec, r.status)),
                cause: MutationCause::Observation {
                    detail: Some("discovered".into()),
                },
            })
            .collect();
        self.commit(Commit {
            change_set_id: None,
            actor: Actor::System,
            mutations,
            trailer: vec![],
        })
        .await?;
        Ok(inserted)
    }

    fn broadcast(&self, entries: Vec<EventLogEntry>) {
        for entry in entries {
            let _ = self.events.send(entry);
        }
    }
}

/// Lock the sequence row and return the last assigned sequence number.
async fn lock_sequence(conn: &mut PgConnection) -> StoreResult<u64> {
    let last: i64 = sqlx::query_scalar("SELECT last_seq FROM event_seq WHERE id = 1 FOR UPDATE")
        .fetch_one(conn)
        .await?;
    Ok(last as u64)
}

async fn store_sequence(conn: &mut PgConnection, last: u64) -> StoreResult<()> {
    sqlx::query("UPDATE event_seq SET last_seq = $1 WHERE id = 1")
        .bind(last as i64)
        .execute(conn)
        .await?;
    Ok(())
}

async fn insert_entry(conn: &mut PgConnection, entry: &EventLogEntry) -> StoreResult<()> {
    let encode = |e: serde_json::Error| StoreError::Unavailable(format!("encode event: {e}"));
    sqlx::query(
        "INSERT INTO event_log (seq, ts, actor, payload, outcome, target)
         VALUES ($1, $2, $3, $4, $5, $6)",
    )
    .bind(entry.seq as i64)
    .bind(entry.timestamp)
    .bind(serde_json::to_value(entry.actor).map_err(encode)?)
    .bind(serde_json::to_value(&entry.payload).map_err(encode)?)
    .bind(entry.outcome.as_str())
    .bind(entry.payload.target().map(|t| t.to_string()))
    .execute(conn)
    .await?;
    Ok(())
}

async fn select_for_update(
    conn: &mut PgConnection,
    id: &ResourceId,
) -> StoreResult<Option<Resource>> {
    sqlx::query_as::<_, ResourceRow>(
        "SELECT * FROM resources WHERE kind = $1 AND scope = $2 AND name = $3 FOR UPDATE",
    )
    .bind(id.kind.as_str())
    .bind(&id.scope)
    .bind(&id.name)
    .fetch_optional(conn)
    .await?
    .map(Resource::try_from)
    .transpose()
}

async fn upsert_resource(conn: &mut PgConnection, r: &Resource) -> StoreResult<()> {
    sqlx::query(
        "INSERT INTO resources (kind, scope, name, spec, status, version, observed_at, created_at)
         VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
         ON CONFLICT (kind, scope, name)
         DO UPDATE SET
             spec = EXCLUDED.spec,
             status = EXCLUDED.status,
             version = EXCLUDED.version,
             observed_at = EXCLUDED.observed_at",
    )
    .bind(r.id.kind.as_str())
    .bind(&r.id.scope)
    .bind(&r.id.name)
    .bind(&r.spec)
    .bind(r.status.as_str())
    .bind(r.version as i64)
    .bind(r.observed_at)
    .bind(r.created_at)
    .execute(conn)
    .await?;
    Ok(())
}

async fn delete_resource(conn: &mut PgConnection, id: &ResourceId) -> StoreResult<()> {
    sqlx::query("DELETE FROM resources WHERE kind = $1 AND scope = $2 AND name = $3")
        .bind(id.kind.as_str())
        .bind(&id.scope)
        .bind(&id.name)
        .execute(conn)
        .await?;
    Ok(())
}

#[async_trait]
impl StateStore for PgStore {
    async fn get(&self, id: &ResourceId) -> StoreResult<Option<Resource>> {
        sqlx::query_as::<_, ResourceRow>(
            "SELECT * FROM resources WHERE kind = $1 AND scope = $2 AND name = $3",
        )
        .bind(id.kind.as_str())
        .bind(&id.scope)
        .bind(&id.name)
        .fetch_optional(&self.pool)
        .await?
        .map(Resource::try_from)
        .transpose()
    }

    async fn list(&self, filter: &ResourceFilter) -> StoreResult<Vec<Resource>> {
        let rows = sqlx::query_as::<_, ResourceRow>(
            "SELECT * FROM resources
             WHERE ($1::text IS NULL OR kind = $1)
               AND ($2::text IS NULL OR scope = $2)
               AND ($3::text IS NULL OR status = $3)
             ORDER BY kind, scope, name",
        )
        .bind(filter.kind.map(|k| k.as_str()))
        .bind(filter.scope.as_deref())
        .bind(filter.status.map(|s| s.as_str()))
        .fetch_all(&self.pool)
        .await?;
        rows.into_iter().map(Resource::try_from).collect()
    }

    async fn snapshot(&self) -> StoreResult<StateSnapshot> {
        let resources = self.list(&ResourceFilter::default()).await?;
        Ok(StateSnapshot::new(resources))
    }

    async fn is_applied(&self, change_set_id: Uuid) -> StoreResult<bool> {
        let applied: bool =
            sqlx::query_scalar("SELECT EXISTS(SELECT 1 FROM applied_change_sets WHERE id = $1)")
                .bind(change_set_id)
                .fetch_one(&self.pool)
                .await?;
        Ok(applied)
    }

    async fn commit(&self, commit: Commit) -> StoreResult<CommitReceipt> {
        check_distinct(&commit.mutations)?;
        let mut tx = self.pool.begin().await?;
        let mut seq = lock_sequence(&mut tx).await?;

        if let Some(id) = commit.change_set_id {
            let applied: bool = sqlx::query_scalar(
                "SELECT EXISTS(SELECT 1 FROM applied_change_sets WHERE id = $1)",
            )
            .bind(id)
            .fetch_one(&mut *tx)
            .await?;
            if applied {
                return Err(StoreError::AlreadyApplied(id));
            }
        }

        let mut current = Vec::with_capacity(commit.mutations.len());
        for m in &commit.mutations {
            let existing = select_for_update(&mut tx, &m.id).await?;
            check_version(m, existing.as_ref())?;
            current.push(existing);
        }

        let now = Utc::now();
        let mut resources = Vec::with_capacity(current.len());
        let mut entries = Vec::with_capacity(current.len() + commit.trailer.len());
        for (m, existing) in commit.mutations.iter().zip(&current) {
            let (after, draft) = apply_mutation(m, existing.as_ref(), commit.actor, now);
            match &after {
                Some(r) => upsert_resource(&mut tx, r).await?,
                None => delete_resource(&mut tx, &m.id).await?,
            }
            seq += 1;
            let entry = draft.into_entry(seq, now);
            insert_entry(&mut tx, &entry).await?;
            entries.push(entry);
            resources.push(after);
        }
        for draft in commit.trailer {
            seq += 1;
            let entry = draft.into_entry(seq, now);
            insert_entry(&mut tx, &entry).await?;
            entries.push(entry);
        }
        if let Some(id) = commit.change_set_id {
            sqlx::query("INSERT INTO applied_change_sets (id) VALUES ($1)")
                .bind(id)
                .execute(&mut *tx)
                .await?;
        }
        store_sequence(&mut tx, seq).await?;
        tx.commit().await?;

        let seqs = entries.iter().map(|e| e.seq).collect();
        self.broadcast(entries);
        Ok(CommitReceipt { resources, seqs })
    }
}

#[async_trait]
impl EventLog for PgStore {
    async fn append_all(&self, drafts: Vec<EventDraft>) -> StoreResult<Vec<u64>> {
        let mut tx = self.pool.begin().await?;
        let mut seq = lock_sequence(&mut tx).await?;
        let now = Utc::now();
        let mut entries = Vec::with_capacity(drafts.len());
        for draft in drafts {
            seq += 1;
            let entry = draft.into_entry(seq, now);
            insert_entry(&mut tx, &entry).await?;
            entries.push(entry);
        }
        store_sequence(&mut tx, seq).await?;
        tx.commit().await?;

        let seqs = entries.iter().map(|e| e.seq).collect();
        self.broadcast(entries);
        Ok(seqs)
    }

    async fn read_range(&self, from: u64, limit: usize) -> StoreResult<Vec<EventLogEntry>> {
        let rows = sqlx::query_as::<_, EventRow>(
            "SELECT seq, ts, actor, payload, outcome FROM event_log
             WHERE seq >= $1 ORDER BY seq LIMIT $2",
        )
        .bind(from.max(1) as i64)
        .bind(limit as i64)
        .fetch_all(&self.pool)
        .await?;
        rows.into_iter().map(EventLogEntry::try_from).collect()
    }

    async fn head(&self) -> StoreResult<u64> {
        let last: Option<i64> = sqlx::query_scalar("SELECT last_seq FROM event_seq WHERE id = 1")
            .fetch_optional(&self.pool)
            .await?;
        Ok(last.unwrap_or(0) as u64)
    }

    fn subscribe(&self) -> broadcast::Receiver<EventLogEntry> {
        self.events.subscribe()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use sf_protocol::{EventPayload, ObservedTransition, Outcome};

    #[test]
    fn resource_row_converts() {
        let now = Utc::now();
        let row = ResourceRow {
            kind: "cache_cluster".into(),
            scope: "us-east-1".into(),
            name: "redis-cache".into(),
            spec: json!({"engine": "redis", "nodes": 2}),
            status: "healthy".into(),
            version: 3,
            observed_at: now,
            created_at: now,
        };
        let r = Resource::try_from(row).unwrap();
        assert_eq!(r.id.kind, ResourceKind::CacheCluster);
        assert_eq!(r.version, 3);
        assert_eq!(r.size(), Some(2));
    }

    #[test]
    fn corrupt_status_is_unavailable() {
        let now = Utc::now();
        let row = ResourceRow {
            kind: "deployment".into(),
            scope: "default".into(),
            name: "frontend".into(),
            spec: json!({}),
            status: "exploded".into(),
            version: 1,
            observed_at: now,
            created_at: now,
        };
        assert!(matches!(
            Resource::try_from(row),
            Err(StoreError::Unavailable(_))
        ));
    }

    #[test]
    fn event_row_converts() {
        let payload = EventPayload::Transition(ObservedTransition {
            target: ResourceId::new(ResourceKind::Deployment, "default", "frontend"),
            from: Some(ResourceStatus::Healthy),
            to: ResourceStatus::Degraded,
            before: None,
            after: None,
            detail: None,
        });
        let row = EventRow {
            seq: 7,
            ts: Utc::now(),
            actor: serde_json::to_value(Actor::System).unwrap(),
            payload: serde_json::to_value(&payload).unwrap(),
            outcome: "success".into(),
        };
        let entry = EventLogEntry::try_from(row).unwrap();
        assert_eq!(entry.seq, 7);
        assert_eq!(entry.outcome, Outcome::Success);
        assert_eq!(entry.payload, payload);
    }
}
