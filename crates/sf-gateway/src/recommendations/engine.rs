//! Periodic scan producing scored, deduplicated, expiring recommendations.

use std::collections::HashSet;
use std::sync::Arc;

use chrono::{Duration, Utc};
use serde::Serialize;
use serde_json::json;
use tokio::sync::watch;
use uuid::Uuid;

use sf_protocol::{
    CPU_PERCENT, Command, CommandKind, CommandParams, EventLogEntry, Outcome, Recommendation,
    RecommendationAction, RecommendationStatus, Resource, ResourceId, StateSnapshot,
};

use super::book::{RecommendationBook, ScanResult, ScanSummary};
use super::rules::{Proposal, ScoringRule, Signals, default_rules};
use crate::compiler;
use crate::config::RecommendationConfig;
use crate::metrics::MetricsCollector;
use crate::service::{GatewayError, GatewayResult, GatewayService, Submission};

const TIER: &str = "recommendations";

/// Result of an operator action on a recommendation.
#[derive(Debug, Clone, Serialize)]
pub struct ActionOutcome {
    pub recommendation: Recommendation,
    /// The submission that carried out an `apply`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub submission: Option<Submission>,
}

pub struct RecommendationEngine {
    service: Arc<GatewayService>,
    metrics: Arc<MetricsCollector>,
    book: RecommendationBook,
    rules: Vec<Box<dyn ScoringRule>>,
    config: RecommendationConfig,
}

impl RecommendationEngine {
    pub fn new(
        service: Arc<GatewayService>,
        metrics: Arc<MetricsCollector>,
        config: RecommendationConfig,
    ) -> Self {
        Self {
            rules: default_rules(&config),
            service,
            metrics,
            book: RecommendationBook::new()
                .with_retention(Duration::seconds(config.expiry_secs as i64)),
            config,
        }
    }

    pub fn with_rules(mut self, rules: Vec<Box<dyn ScoringRule>>) -> Self {
        self.rules = rules;
        self
    }

    pub fn book(&self) -> &RecommendationBook {
        &self.book
    }

    /// Run scans every `interval_secs` until `shutdown` flips. A scan in
    /// progress always finishes first.
    pub async fn run(self: Arc<Self>, mut shutdown: watch::Receiver<bool>) {
        let period = std::time::Duration::from_secs(self.config.interval_secs.max(1));
        let mut interval = tokio::time::interval(period);
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        tracing::info!(interval_secs = period.as_secs(), "recommendation engine started");

        loop {
            tokio::select! {
                _ = interval.tick() => {
                    if let Err(e) = self.scan().await {
                        tracing::warn!(error = %e, "recommendation scan failed");
                    }
                }
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
            }
        }
        tracing::info!("recommendation engine stopped");
    }

    /// One scan over the current snapshot, event window and metrics.
    pub async fn scan(&self) -> GatewayResult<ScanSummary> {
        let ledger = self.service.ledger();
        let snapshot = ledger.snapshot().await?;
        let head = ledger.head().await?;
        let window = self.config.event_window;
        let from = head.saturating_sub(window as u64) + 1;
        let events = ledger.read_range(from, window).await?;

        let now = Utc::now();
        let cooling = recently_mutated(&events, now - Duration::seconds(self.config.cooldown_secs as i64));

        let mut scan = ScanResult {
            live_targets: snapshot.iter().map(|r| r.id.clone()).collect(),
            ..ScanResult::default()
        };
        let depth = self.config.sustained_samples.max(self.config.trend_window);
        for resource in snapshot.iter() {
            let signals = Signals {
                cpu: self.metrics.recent(&resource.id, CPU_PERCENT, depth).await,
            };
            for rule in &self.rules {
                let Some(proposal) = rule.evaluate(resource, &signals) else {
                    continue;
                };
                scan.still_valid.push((resource.id.clone(), proposal.kind));
                if cooling.contains(&resource.id) {
                    tracing::debug!(resource = %resource.id, rule = rule.name(), "target in cooldown");
                    continue;
                }
                if let Some(rec) = self.propose(resource, proposal, &snapshot) {
                    scan.created.push(rec);
                }
            }
        }

        let summary = self.book.apply_scan(scan, now).await;
        if summary.created > 0 || summary.expired > 0 || summary.pruned > 0 {
            tracing::info!(
                created = summary.created,
                expired = summary.expired,
                pruned = summary.pruned,
                head,
                "recommendation scan"
            );
        }
        Ok(summary)
    }

    fn propose(
        &self,
        resource: &Resource,
        proposal: Proposal,
        snapshot: &StateSnapshot,
    ) -> Option<Recommendation> {
        let cmd = scale_command(&resource.id, proposal.size, proposal.confidence);
        let proposed = match compiler::compile(&cmd, snapshot) {
            Ok(cs) if !cs.is_empty() => cs,
            Ok(_) => return None,
            Err(e) => {
                tracing::warn!(resource = %resource.id, error = %e, "recommendation did not compile");
                return None;
            }
        };
        let now = Utc::now();
        Some(Recommendation {
            id: Uuid::now_v7(),
            kind: proposal.kind,
            target: resource.id.clone(),
            command: cmd,
            proposed,
            justification: proposal.justification,
            confidence: proposal.confidence,
            status: RecommendationStatus::Pending,
            created_at: now,
            updated_at: now,
            expires_at: now + Duration::seconds(self.config.expiry_secs as i64),
        })
    }

    /// Apply or dismiss a pending recommendation.
    ///
    /// Apply recompiles the recommendation's command against current state
    /// and executes it. On failure the recommendation goes back to pending.
    pub async fn act(&self, id: Uuid, action: RecommendationAction) -> GatewayResult<ActionOutcome> {
        let to = match action {
            RecommendationAction::Apply => RecommendationStatus::Applied,
            RecommendationAction::Dismiss => RecommendationStatus::Dismissed,
        };
        let rec = match self
            .book
            .transition(id, RecommendationStatus::Pending, to)
            .await
        {
            None => return Err(GatewayError::NotFound(format!("recommendation {id}"))),
            Some(Err(current)) => {
                return Err(GatewayError::InvalidState(format!(
                    "recommendation {id} is {:?}, only pending recommendations accept actions",
                    current.status
                )));
            }
            Some(Ok(rec)) => rec,
        };

        if action == RecommendationAction::Dismiss {
            tracing::info!(recommendation_id = %id, "recommendation dismissed");
            return Ok(ActionOutcome {
                recommendation: rec,
                submission: None,
            });
        }

        let cmd = Command::new(
            rec.command.kind,
            rec.command.raw_text.clone(),
            rec.command.params.clone(),
            rec.command.confidence,
            TIER,
        )
        .with_initiator("system");
        match self.service.run_command(cmd).await {
            Ok(submission) => {
                tracing::info!(
                    recommendation_id = %id,
                    change_set_id = %submission.change_set.id,
                    "recommendation applied"
                );
                Ok(ActionOutcome {
                    recommendation: rec,
                    submission: Some(submission),
                })
            }
            Err(e) => {
                tracing::warn!(recommendation_id = %id, error = %e, "recommendation apply failed");
                self.book
                    .transition(id, RecommendationStatus::Applied, RecommendationStatus::Pending)
                    .await;
                Err(e)
            }
        }
    }
}

/// System command that sets `target` to `size`.
fn scale_command(target: &ResourceId, size: u64, confidence: f64) -> Command {
    let mut params = CommandParams::new();
    params.insert("target".into(), json!(target.name));
    params.insert("kind".into(), json!(target.kind.as_str()));
    params.insert("scope".into(), json!(target.scope));
    params.insert("replicas".into(), json!(size));
    Command::new(
        CommandKind::ScaleResource,
        format!("scale {} to {size} {}", target, target.kind.scale_field()),
        params,
        confidence,
        TIER,
    )
    .with_initiator("system")
}

/// Targets with a successful mutation newer than `since`.
fn recently_mutated(events: &[EventLogEntry], since: chrono::DateTime<Utc>) -> HashSet<ResourceId> {
    events
        .iter()
        .filter(|e| e.timestamp > since && e.outcome == Outcome::Success)
        .filter_map(|e| e.payload.target())
        .cloned()
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::classifier::RuleClassifier;
    use crate::executor::ChangeExecutor;
    use crate::service::ServiceSettings;
    use crate::store::{MemoryStore, StateStore};
    use sf_protocol::{MetricSample, RecommendationKind, ResourceKind, ResourceStatus};
    use sf_providers::ProviderRegistry;

    fn frontend() -> Resource {
        let now = Utc::now();
        Resource {
            id: ResourceId::new(ResourceKind::Deployment, "default", "frontend"),
            spec: json!({"image": "nginx:latest", "replicas": 2}),
            status: ResourceStatus::Healthy,
            version: 1,
            observed_at: now,
            created_at: now,
        }
    }

    fn engine(cooldown_secs: u64) -> (Arc<RecommendationEngine>, Arc<MemoryStore>, Arc<MetricsCollector>) {
        let resources = vec![frontend()];
        let store = Arc::new(MemoryStore::seeded(resources.clone()));
        let executor = ChangeExecutor::new(store.clone(), ProviderRegistry::simulated(&resources));
        let service = Arc::new(GatewayService::new(
            Arc::new(RuleClassifier::new()),
            store.clone(),
            executor,
            ServiceSettings::default(),
        ));
        let metrics = Arc::new(MetricsCollector::new(100));
        let config = RecommendationConfig {
            cooldown_secs,
            ..RecommendationConfig::default()
        };
        let engine = Arc::new(RecommendationEngine::new(service, metrics.clone(), config));
        (engine, store, metrics)
    }

    async fn hot(metrics: &MetricsCollector) {
        let samples = (0..5).map(|_| MetricSample::new(frontend().id, CPU_PERCENT, 92.0));
        metrics.record(samples).await;
    }

    #[tokio::test]
    async fn sustained_high_cpu_recommends_scale_up() {
        let (engine, _, metrics) = engine(0);
        hot(&metrics).await;

        let summary = engine.scan().await.unwrap();
        assert_eq!(summary.created, 1);
        let recs = engine.book().list(Some(RecommendationStatus::Pending)).await;
        assert_eq!(recs[0].kind, RecommendationKind::ScaleUp);
        assert_eq!(recs[0].command.initiated_by, "system");
        assert_eq!(recs[0].proposed.operations[0].after.as_ref().unwrap()["replicas"], 4);

        // same condition next scan: no duplicate
        let summary = engine.scan().await.unwrap();
        assert_eq!(summary.created, 0);
        assert_eq!(engine.book().pending_count().await, 1);
    }

    #[tokio::test]
    async fn rising_trend_recommends_ahead_of_threshold() {
        let (engine, _, metrics) = engine(0);
        let rising = [52.0, 56.0, 60.0, 64.0, 68.0, 72.0]
            .into_iter()
            .map(|v| MetricSample::new(frontend().id, CPU_PERCENT, v));
        metrics.record(rising).await;

        let summary = engine.scan().await.unwrap();
        assert_eq!(summary.created, 1);
        let rec = engine.book().list(None).await.remove(0);
        assert_eq!(rec.kind, RecommendationKind::ScaleUp);
        assert!(rec.justification.contains("forecast peak"));
        assert_eq!(rec.proposed.operations[0].after.as_ref().unwrap()["replicas"], 3);
    }

    #[tokio::test]
    async fn cooldown_suppresses_new_recommendations() {
        // seeding logs a "discovered" transition for frontend just now
        let (engine, _, metrics) = engine(300);
        hot(&metrics).await;
        let summary = engine.scan().await.unwrap();
        assert_eq!(summary.created, 0);
    }

    #[tokio::test]
    async fn cleared_condition_expires() {
        let (engine, _, metrics) = engine(0);
        hot(&metrics).await;
        engine.scan().await.unwrap();

        let calm = (0..5).map(|_| MetricSample::new(frontend().id, CPU_PERCENT, 50.0));
        metrics.record(calm).await;
        let summary = engine.scan().await.unwrap();
        assert_eq!(summary.expired, 1);
        assert_eq!(engine.book().pending_count().await, 0);
    }

    #[tokio::test]
    async fn apply_executes_against_fresh_state() {
        let (engine, store, metrics) = engine(0);
        hot(&metrics).await;
        engine.scan().await.unwrap();
        let rec = engine.book().list(None).await.remove(0);

        let outcome = engine.act(rec.id, RecommendationAction::Apply).await.unwrap();
        assert_eq!(outcome.recommendation.status, RecommendationStatus::Applied);
        assert!(outcome.submission.is_some());

        let fe = store.get(&frontend().id).await.unwrap().unwrap();
        assert_eq!(fe.spec["replicas"], 4);
        assert_eq!(fe.version, 2);

        let err = engine.act(rec.id, RecommendationAction::Dismiss).await.unwrap_err();
        assert_eq!(err.kind(), "conflict");
    }

    #[tokio::test]
    async fn dismiss_and_unknown() {
        let (engine, store, metrics) = engine(0);
        hot(&metrics).await;
        engine.scan().await.unwrap();
        let rec = engine.book().list(None).await.remove(0);

        let outcome = engine.act(rec.id, RecommendationAction::Dismiss).await.unwrap();
        assert_eq!(outcome.recommendation.status, RecommendationStatus::Dismissed);
        assert_eq!(store.get(&frontend().id).await.unwrap().unwrap().version, 1);

        let err = engine.act(Uuid::now_v7(), RecommendationAction::Apply).await.unwrap_err();
        assert_eq!(err.kind(), "not_found");
    }

    #[tokio::test]
    async fn shutdown_stops_the_loop() {
        let (engine, _, _) = engine(0);
        let (tx, rx) = watch::channel(false);
        let handle = tokio::spawn(engine.clone().run(rx));
        tx.send(true).unwrap();
        tokio::time::timeout(std::time::Duration::from_secs(2), handle)
            .await
            .unwrap()
            .unwrap();
    }
}
