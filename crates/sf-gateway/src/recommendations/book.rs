//! The recommendation book: every recommendation the engine has produced.
//!
//! All changes of one scan land under a single write lock, so readers never
//! see a half-applied scan.

use chrono::{DateTime, Duration, Utc};
use tokio::sync::RwLock;
use uuid::Uuid;

use sf_protocol::{Recommendation, RecommendationKind, RecommendationStatus, ResourceId};

/// Output of one scan, applied atomically.
#[derive(Debug, Default)]
pub struct ScanResult {
    pub created: Vec<Recommendation>,
    /// Pending (target, kind) pairs whose condition still holds.
    pub still_valid: Vec<(ResourceId, RecommendationKind)>,
    /// Targets present in the snapshot the scan read.
    pub live_targets: Vec<ResourceId>,
}

/// Counts of what a scan changed.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct ScanSummary {
    pub created: usize,
    pub expired: usize,
    /// Finished entries dropped after the retention window.
    pub pruned: usize,
}

#[derive(Default)]
pub struct RecommendationBook {
    entries: RwLock<Vec<Recommendation>>,
    retention: Option<Duration>,
}

impl RecommendationBook {
    pub fn new() -> Self {
        Self::default()
    }

    /// Keep applied, dismissed and expired entries only this long after
    /// their last change.
    pub fn with_retention(mut self, retention: Duration) -> Self {
        self.retention = Some(retention);
        self
    }

    /// Expire stale pending entries and insert new ones that are not
    /// duplicates of a pending (target, kind).
    pub async fn apply_scan(&self, scan: ScanResult, now: DateTime<Utc>) -> ScanSummary {
        let mut entries = self.entries.write().await;
        let mut summary = ScanSummary::default();

        for rec in entries.iter_mut().filter(|r| r.is_pending()) {
            let gone = !scan.live_targets.contains(&rec.target);
            let cleared = !scan
                .still_valid
                .iter()
                .any(|(t, k)| *t == rec.target && *k == rec.kind);
            if gone || cleared || rec.expires_at <= now {
                tracing::debug!(
                    recommendation_id = %rec.id,
                    resource = %rec.target,
                    gone,
                    cleared,
                    "recommendation expired"
                );
                rec.status = RecommendationStatus::Expired;
                rec.updated_at = now;
                summary.expired += 1;
            }
        }

        if let Some(retention) = self.retention {
            let before = entries.len();
            entries.retain(|r| r.is_pending() || r.updated_at + retention > now);
            summary.pruned = before - entries.len();
        }

        for rec in scan.created {
            let duplicate = entries
                .iter()
                .any(|r| r.is_pending() && r.target == rec.target && r.kind == rec.kind);
            if duplicate {
                continue;
            }
            entries.push(rec);
            summary.created += 1;
        }
        summary
    }

    /// Newest first, optionally filtered by status.
    pub async fn list(&self, status: Option<RecommendationStatus>) -> Vec<Recommendation> {
        self.entries
            .read()
            .await
            .iter()
            .rev()
            .filter(|r| status.is_none_or(|s| r.status == s))
            .cloned()
            .collect()
    }

    pub async fn get(&self, id: Uuid) -> Option<Recommendation> {
        self.entries.read().await.iter().find(|r| r.id == id).cloned()
    }

    pub async fn pending_count(&self) -> usize {
        self.entries
            .read()
            .await
            .iter()
            .filter(|r| r.is_pending())
            .count()
    }

    /// Move a recommendation from `from` to `to`. Returns the updated entry,
    /// or the current one unchanged as `Err` when it is not in `from`.
    pub async fn transition(
        &self,
        id: Uuid,
        from: RecommendationStatus,
        to: RecommendationStatus,
    ) -> Option<Result<Recommendation, Recommendation>> {
        let mut entries = self.entries.write().await;
        let rec = entries.iter_mut().find(|r| r.id == id)?;
        if rec.status != from {
            return Some(Err(rec.clone()));
        }
        rec.status = to;
        rec.updated_at = Utc::now();
        Some(Ok(rec.clone()))
    }
}
