//! Gateway service: operator text → preview → approved execution.
//!
//! `submit` classifies, applies operator overrides, gates ambiguous
//! classifications, compiles against a fresh snapshot and records the
//! command and its change set. Nothing touches providers until `execute`
//! (or `auto_apply`, which is explicit configuration and recorded on every
//! submission it affects).

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::RwLock;
use uuid::Uuid;

use sf_protocol::{
    Actor, ChangeSet, Command, CommandKind, CommandParams, ErrorDetail, EventDraft, EventPayload,
    ExecutionResult, OperationKind, Outcome, Resource, ResourceFilter, ResourceKind, StateSnapshot,
};

use crate::classifier::IntentClassifier;
use crate::compiler::{self, CompileError};
use crate::config::GatewayConfig;
use crate::executor::{ChangeExecutor, ExecutionError};
use crate::metrics::MetricsCollector;
use crate::store::{Ledger, StoreError};

/// Base wait before recompiling when a target is held by another change set.
const BUSY_BACKOFF: Duration = Duration::from_millis(25);

#[derive(Debug, Error)]
pub enum GatewayError {
    /// Carries the candidate command so the operator can confirm it.
    #[error("classification ambiguous (confidence {:.2}); confirm with explicit intent or parameters", .0.confidence)]
    Ambiguous(Box<Command>),

    #[error(transparent)]
    Compile(#[from] CompileError),

    #[error(transparent)]
    Execution(#[from] ExecutionError),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("bad request: {0}")]
    BadRequest(String),

    /// The object exists but is not in a state that accepts the request.
    #[error("conflict: {0}")]
    InvalidState(String),
}

impl GatewayError {
    pub fn kind(&self) -> &'static str {
        match self {
            GatewayError::Ambiguous(_) => "classification_ambiguous",
            GatewayError::Compile(e) => e.kind(),
            GatewayError::Execution(e) => e.kind(),
            GatewayError::Store(StoreError::Conflict { .. }) => "conflict",
            GatewayError::Store(StoreError::AlreadyApplied(_)) => "already_applied",
            GatewayError::Store(StoreError::Unavailable(_)) => "persistence_unavailable",
            GatewayError::NotFound(_) => "not_found",
            GatewayError::BadRequest(_) => "bad_request",
            GatewayError::InvalidState(_) => "conflict",
        }
    }
}

pub type GatewayResult<T> = Result<T, GatewayError>;

/// Operator submission.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct SubmitRequest {
    pub text: String,
    /// Parameters that replace whatever the classifier extracted.
    #[serde(default)]
    pub overrides: CommandParams,
    /// Command kind chosen by the operator instead of the classifier.
    #[serde(default)]
    pub intent: Option<CommandKind>,
    #[serde(default)]
    pub initiated_by: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SubmissionStatus {
    /// Compiled, waiting for approval.
    Pending,
    Applied,
    /// Last execution attempt failed; may be executed again.
    Failed,
    /// Read-only command, nothing to execute.
    Answered,
}

/// A command, its current change set and what happened to it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Submission {
    pub command: Command,
    pub change_set: ChangeSet,
    pub status: SubmissionStatus,
    /// Executed without operator approval because `auto_apply` is on.
    #[serde(default)]
    pub auto_applied: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub execution: Option<ExecutionResult>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<ErrorDetail>,
    /// Matching resources, for status queries.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub resources: Vec<Resource>,
    /// Earlier change sets replaced after a version conflict.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub superseded: Vec<Uuid>,
    pub updated_at: DateTime<Utc>,
}

impl Submission {
    fn answers(&self, change_set_id: Uuid) -> bool {
        self.change_set.id == change_set_id || self.superseded.contains(&change_set_id)
    }
}

/// Service-level knobs taken from [`GatewayConfig`].
#[derive(Debug, Clone)]
pub struct ServiceSettings {
    pub auto_apply: bool,
    pub ambiguity_threshold: f64,
    pub commit_retries: u32,
    pub history: usize,
}

impl From<&GatewayConfig> for ServiceSettings {
    fn from(config: &GatewayConfig) -> Self {
        Self {
            auto_apply: config.auto_apply,
            ambiguity_threshold: config.ambiguity_threshold,
            commit_retries: config.commit_retries,
            history: config.submission_history,
        }
    }
}

impl Default for ServiceSettings {
    fn default() -> Self {
        Self::from(&GatewayConfig::default())
    }
}

pub struct GatewayService {
    classifier: Arc<dyn IntentClassifier>,
    ledger: Arc<dyn Ledger>,
    executor: ChangeExecutor,
    settings: ServiceSettings,
    submissions: RwLock<VecDeque<Submission>>,
    metrics: Option<Arc<MetricsCollector>>,
}

impl GatewayService {
    pub fn new(
        classifier: Arc<dyn IntentClassifier>,
        ledger: Arc<dyn Ledger>,
        executor: ChangeExecutor,
        settings: ServiceSettings,
    ) -> Self {
        if settings.auto_apply {
            tracing::warn!("auto_apply is enabled: change sets execute without operator approval");
        }
        Self {
            classifier,
            ledger,
            executor,
            settings,
            submissions: RwLock::new(VecDeque::new()),
            metrics: None,
        }
    }

    /// Drop the metric history of resources this service deletes.
    pub fn with_metrics(mut self, metrics: Arc<MetricsCollector>) -> Self {
        self.metrics = Some(metrics);
        self
    }

    pub fn ledger(&self) -> &Arc<dyn Ledger> {
        &self.ledger
    }

    pub fn executor(&self) -> &ChangeExecutor {
        &self.executor
    }

    pub fn settings(&self) -> &ServiceSettings {
        &self.settings
    }

    /// Classify and compile operator text into a preview.
    pub async fn submit(&self, req: SubmitRequest) -> GatewayResult<Submission> {
        if req.text.trim().is_empty() && req.intent.is_none() {
            return Err(GatewayError::BadRequest("command text is empty".into()));
        }

        let mut cmd = self.classifier.classify(&req.text).await;
        let confirmed = req.intent.is_some() || !req.overrides.is_empty();
        if let Some(intent) = req.intent {
            cmd.kind = intent;
            cmd.confidence = 1.0;
            cmd.classified_by = "operator".into();
        }
        cmd.params.extend(req.overrides);
        if let Some(who) = req.initiated_by.filter(|w| !w.trim().is_empty()) {
            cmd.initiated_by = who;
        }

        if !confirmed
            && cmd.kind != CommandKind::Unknown
            && cmd.confidence < self.settings.ambiguity_threshold
        {
            tracing::info!(
                command_id = %cmd.id,
                kind = cmd.kind.as_str(),
                confidence = cmd.confidence,
                "classification below threshold, asking for confirmation"
            );
            return Err(GatewayError::Ambiguous(Box::new(cmd)));
        }

        let submission = self.accept(cmd).await?;
        if !(self.settings.auto_apply && submission.status == SubmissionStatus::Pending) {
            return Ok(submission);
        }

        let cs_id = submission.change_set.id;
        let command_id = submission.command.id;
        tracing::warn!(command_id = %command_id, change_set_id = %cs_id, "auto-applying change set");
        self.update(cs_id, |s| s.auto_applied = true).await;
        if let Err(e) = self.execute(cs_id).await {
            tracing::warn!(command_id = %command_id, error = %e, "auto-apply failed");
        }
        self.get_by_command(command_id)
            .await
            .ok_or_else(|| GatewayError::NotFound(format!("submission {command_id}")))
    }

    /// Compile an already-classified command and run it to completion.
    /// Used for system-initiated commands such as accepted recommendations.
    pub async fn run_command(&self, cmd: Command) -> GatewayResult<Submission> {
        let submission = self.accept(cmd).await?;
        if submission.status == SubmissionStatus::Pending {
            self.execute(submission.change_set.id).await?;
        }
        let command_id = submission.command.id;
        self.get_by_command(command_id)
            .await
            .ok_or_else(|| GatewayError::NotFound(format!("submission {command_id}")))
    }

    /// Compile against a fresh snapshot and record the result. Compile
    /// errors leave no trace.
    async fn accept(&self, cmd: Command) -> GatewayResult<Submission> {
        let snapshot = self.ledger.snapshot().await?;
        let change_set = match compiler::compile(&cmd, &snapshot) {
            Ok(cs) => cs,
            Err(e) => {
                tracing::info!(command_id = %cmd.id, error = %e, "command did not compile");
                return Err(e.into());
            }
        };

        let (status, resources, cs_outcome) = if cmd.kind == CommandKind::QueryStatus {
            (
                SubmissionStatus::Answered,
                query_resources(&cmd, &snapshot),
                Outcome::Success,
            )
        } else {
            (SubmissionStatus::Pending, Vec::new(), Outcome::Pending)
        };

        let actor = Actor::Command { id: cmd.id };
        self.ledger
            .append_all(vec![
                EventDraft::new(actor, EventPayload::Command(cmd.clone()), Outcome::Success),
                EventDraft::new(actor, EventPayload::ChangeSet(change_set.clone()), cs_outcome),
            ])
            .await?;
        tracing::info!(
            command_id = %cmd.id,
            change_set_id = %change_set.id,
            kind = cmd.kind.as_str(),
            operations = change_set.operations.len(),
            classified_by = %cmd.classified_by,
            "command compiled"
        );

        let submission = Submission {
            command: cmd,
            change_set,
            status,
            auto_applied: false,
            execution: None,
            error: None,
            resources,
            superseded: Vec::new(),
            updated_at: Utc::now(),
        };
        let mut submissions = self.submissions.write().await;
        submissions.push_back(submission.clone());
        while submissions.len() > self.settings.history {
            submissions.pop_front();
        }
        Ok(submission)
    }

    /// Execute a previewed change set.
    ///
    /// On a version conflict the command is recompiled against a fresh
    /// snapshot and retried, up to `commit_retries` times.
    pub async fn execute(&self, change_set_id: Uuid) -> GatewayResult<ExecutionResult> {
        let submission = self
            .get_by_change_set(change_set_id)
            .await
            .ok_or_else(|| GatewayError::NotFound(format!("change set {change_set_id}")))?;
        match submission.status {
            SubmissionStatus::Applied => {
                return Err(ExecutionError::AlreadyApplied(change_set_id).into());
            }
            SubmissionStatus::Answered => {
                return Err(GatewayError::BadRequest(
                    "status queries have nothing to execute".into(),
                ));
            }
            SubmissionStatus::Pending | SubmissionStatus::Failed => {}
        }

        let cmd = submission.command;
        let actor = Actor::Command { id: cmd.id };
        let mut cs = submission.change_set;
        let mut attempt = 0;
        loop {
            match self.executor.apply(&cs, actor).await {
                Ok(result) => {
                    if let Some(metrics) = &self.metrics {
                        for op in result.applied.iter().filter(|op| op.kind == OperationKind::Delete) {
                            metrics.forget(&op.target).await;
                        }
                    }
                    let recorded = result.clone();
                    self.update(cs.id, move |s| {
                        s.status = SubmissionStatus::Applied;
                        s.execution = Some(recorded);
                        s.error = None;
                    })
                    .await;
                    return Ok(result);
                }
                Err(e) if e.is_conflict() && attempt < self.settings.commit_retries => {
                    attempt += 1;
                    tracing::info!(
                        command_id = %cmd.id,
                        change_set_id = %cs.id,
                        attempt,
                        "version conflict, recompiling"
                    );
                    if matches!(e, ExecutionError::TargetBusy { .. }) {
                        // Recompile once the other change set has landed.
                        tokio::time::sleep(BUSY_BACKOFF * attempt).await;
                    }
                    let snapshot = self.ledger.snapshot().await?;
                    let next = match compiler::compile(&cmd, &snapshot) {
                        Ok(next) => next,
                        Err(ce) => {
                            let detail = ErrorDetail::new(ce.kind(), ce.to_string());
                            self.update(cs.id, |s| {
                                s.status = SubmissionStatus::Failed;
                                s.error = Some(detail);
                            })
                            .await;
                            return Err(ce.into());
                        }
                    };
                    self.ledger
                        .append(EventDraft::new(
                            actor,
                            EventPayload::ChangeSet(next.clone()),
                            Outcome::Pending,
                        ))
                        .await?;
                    let replacement = next.clone();
                    self.update(cs.id, move |s| {
                        s.superseded.push(s.change_set.id);
                        s.change_set = replacement;
                    })
                    .await;
                    cs = next;
                }
                Err(e) => {
                    let detail = ErrorDetail::new(e.kind(), e.to_string());
                    if !matches!(e, ExecutionError::AlreadyApplied(_)) {
                        self.update(cs.id, |s| {
                            s.status = SubmissionStatus::Failed;
                            s.error = Some(detail);
                        })
                        .await;
                    }
                    return Err(e.into());
                }
            }
        }
    }

    async fn update(&self, change_set_id: Uuid, f: impl FnOnce(&mut Submission)) {
        let mut submissions = self.submissions.write().await;
        if let Some(s) = submissions.iter_mut().find(|s| s.answers(change_set_id)) {
            f(s);
            s.updated_at = Utc::now();
        }
    }

    /// Most recent submissions first.
    pub async fn list(&self, limit: usize) -> Vec<Submission> {
        self.submissions
            .read()
            .await
            .iter()
            .rev()
            .take(limit)
            .cloned()
            .collect()
    }

    pub async fn get_by_command(&self, command_id: Uuid) -> Option<Submission> {
        self.submissions
            .read()
            .await
            .iter()
            .find(|s| s.command.id == command_id)
            .cloned()
    }

    pub async fn get_by_change_set(&self, change_set_id: Uuid) -> Option<Submission> {
        self.submissions
            .read()
            .await
            .iter()
            .find(|s| s.answers(change_set_id))
            .cloned()
    }
}

fn query_resources(cmd: &Command, snapshot: &StateSnapshot) -> Vec<Resource> {
    let filter = ResourceFilter {
        kind: cmd
            .param_str("kind")
            .and_then(|k| k.parse::<ResourceKind>().ok()),
        scope: cmd.param_str("scope").map(str::to_string),
        status: None,
    };
    snapshot
        .iter()
        .filter(|r| filter.matches(r))
        .filter(|r| cmd.param_str("target").is_none_or(|t| r.id.name == t))
        .cloned()
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::classifier::RuleClassifier;
    use crate::store::{EventLog, MemoryStore, StateStore};
    use serde_json::json;
    use sf_protocol::{CPU_PERCENT, MetricSample, ProviderClass, ResourceId, ResourceStatus};
    use sf_providers::{MockProvider, ProviderRegistry};

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

    fn service_with(settings: ServiceSettings) -> (GatewayService, Arc<MemoryStore>, Arc<MockProvider>) {
        let store = Arc::new(MemoryStore::seeded([frontend()]));
        let provider = Arc::new(MockProvider::new(ProviderClass::Orchestrator));
        let mut registry = ProviderRegistry::new();
        registry.register(provider.clone());
        let executor = ChangeExecutor::new(store.clone(), registry);
        let service = GatewayService::new(
            Arc::new(RuleClassifier::new()),
            store.clone(),
            executor,
            settings,
        );
        (service, store, provider)
    }

    fn service() -> (GatewayService, Arc<MemoryStore>, Arc<MockProvider>) {
        service_with(ServiceSettings::default())
    }

    fn text(t: &str) -> SubmitRequest {
        SubmitRequest {
            text: t.into(),
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn submit_previews_without_mutating() {
        let (svc, store, provider) = service();
        let head = store.head().await.unwrap();

        let sub = svc.submit(text("Scale frontend to 5 replicas")).await.unwrap();
        assert_eq!(sub.status, SubmissionStatus::Pending);
        assert_eq!(sub.change_set.operations.len(), 1);
        assert_eq!(provider.call_count(), 0);
        // command + change set entries
        assert_eq!(store.head().await.unwrap(), head + 2);
        assert_eq!(store.get(&frontend().id).await.unwrap().unwrap().version, 1);
    }

    #[tokio::test]
    async fn execute_applies_and_records() {
        let (svc, store, _) = service();
        let sub = svc.submit(text("Scale frontend to 5 replicas")).await.unwrap();
        let result = svc.execute(sub.change_set.id).await.unwrap();
        assert_eq!(result.outcome, Outcome::Success);

        let fe = store.get(&frontend().id).await.unwrap().unwrap();
        assert_eq!(fe.version, 2);
        assert_eq!(fe.spec["replicas"], 5);

        let sub = svc.get_by_command(sub.command.id).await.unwrap();
        assert_eq!(sub.status, SubmissionStatus::Applied);

        let err = svc.execute(sub.change_set.id).await.unwrap_err();
        assert_eq!(err.kind(), "already_applied");
    }

    #[tokio::test]
    async fn low_confidence_is_ambiguous_until_confirmed() {
        let (svc, store, _) = service();
        let head = store.head().await.unwrap();

        let err = svc.submit(text("scale up frontend")).await.unwrap_err();
        let GatewayError::Ambiguous(cmd) = err else {
            panic!("expected ambiguity");
        };
        assert_eq!(cmd.kind, CommandKind::ScaleResource);
        assert_eq!(store.head().await.unwrap(), head);

        let mut overrides = CommandParams::new();
        overrides.insert("replicas".into(), json!(4));
        let sub = svc
            .submit(SubmitRequest {
                text: "scale up frontend".into(),
                overrides,
                intent: None,
                initiated_by: Some("ops@example.com".into()),
            })
            .await
            .unwrap();
        assert_eq!(sub.command.initiated_by, "ops@example.com");
        assert_eq!(sub.change_set.operations[0].after.as_ref().unwrap()["replicas"], 4);
    }

    #[tokio::test]
    async fn compile_errors_leave_no_trace() {
        let (svc, store, _) = service();
        let head = store.head().await.unwrap();
        let err = svc.submit(text("scale checkout to 3 replicas")).await.unwrap_err();
        assert_eq!(err.kind(), "target_not_found");
        let err = svc.submit(text("bake me a pizza")).await.unwrap_err();
        assert_eq!(err.kind(), "unrecognized_intent");
        assert_eq!(store.head().await.unwrap(), head);
        assert!(svc.list(10).await.is_empty());
    }

    #[tokio::test]
    async fn conflict_is_recompiled() {
        let (svc, store, _) = service();
        let first = svc.submit(text("Scale frontend to 5 replicas")).await.unwrap();
        let second = svc.submit(text("Scale frontend to 7 replicas")).await.unwrap();

        svc.execute(first.change_set.id).await.unwrap();
        let result = svc.execute(second.change_set.id).await.unwrap();
        assert_ne!(result.change_set_id, second.change_set.id);

        let fe = store.get(&frontend().id).await.unwrap().unwrap();
        assert_eq!(fe.version, 3);
        assert_eq!(fe.spec["replicas"], 7);

        let sub = svc.get_by_change_set(second.change_set.id).await.unwrap();
        assert_eq!(sub.superseded, vec![second.change_set.id]);
        assert_eq!(sub.status, SubmissionStatus::Applied);
    }

    #[tokio::test]
    async fn conflict_retries_are_bounded() {
        let (svc, _, _) = service_with(ServiceSettings {
            commit_retries: 0,
            ..ServiceSettings::default()
        });
        let first = svc.submit(text("Scale frontend to 5 replicas")).await.unwrap();
        let second = svc.submit(text("Scale frontend to 7 replicas")).await.unwrap();
        svc.execute(first.change_set.id).await.unwrap();
        let err = svc.execute(second.change_set.id).await.unwrap_err();
        assert_eq!(err.kind(), "conflict");
        let sub = svc.get_by_change_set(second.change_set.id).await.unwrap();
        assert_eq!(sub.status, SubmissionStatus::Failed);
    }

    #[tokio::test]
    async fn auto_apply_is_recorded() {
        let (svc, store, _) = service_with(ServiceSettings {
            auto_apply: true,
            ..ServiceSettings::default()
        });
        let sub = svc.submit(text("Scale frontend to 3 replicas")).await.unwrap();
        assert!(sub.auto_applied);
        assert_eq!(sub.status, SubmissionStatus::Applied);
        assert_eq!(store.get(&frontend().id).await.unwrap().unwrap().version, 2);
    }

    #[tokio::test]
    async fn query_is_answered() {
        let (svc, _, _) = service();
        let sub = svc.submit(text("show status of frontend")).await.unwrap();
        assert_eq!(sub.status, SubmissionStatus::Answered);
        assert_eq!(sub.resources.len(), 1);
        let err = svc.execute(sub.change_set.id).await.unwrap_err();
        assert_eq!(err.kind(), "bad_request");
    }

    #[tokio::test]
    async fn delete_forgets_metric_history() {
        let (svc, store, _) = service();
        let metrics = Arc::new(MetricsCollector::new(10));
        let svc = svc.with_metrics(metrics.clone());
        metrics
            .record([MetricSample::new(frontend().id, CPU_PERCENT, 91.0)])
            .await;

        let sub = svc
            .submit(text("delete deployment frontend in namespace default"))
            .await
            .unwrap();
        svc.execute(sub.change_set.id).await.unwrap();

        assert!(store.get(&frontend().id).await.unwrap().is_none());
        assert!(metrics.history(&frontend().id).await.is_empty());
    }

    #[tokio::test]
    async fn unknown_change_set_is_not_found() {
        let (svc, _, _) = service();
        let err = svc.execute(Uuid::now_v7()).await.unwrap_err();
        assert_eq!(err.kind(), "not_found");
    }
}
