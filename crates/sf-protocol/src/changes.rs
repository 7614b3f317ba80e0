use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::events::Outcome;
use crate::resources::{Resource, ResourceId};

/// Kind of atomic change applied to one resource.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OperationKind {
    Create,
    Update,
    Delete,
}

/// One atomic step of a change set.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Operation {
    pub target: ResourceId,
    pub kind: OperationKind,
    /// Resource as it was when the change set was compiled (absent for create).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub before: Option<Resource>,
    /// Desired spec after the change (absent for delete).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub after: Option<serde_json::Value>,
}

impl Operation {
    pub fn create(target: ResourceId, spec: serde_json::Value) -> Self {
        Self {
            target,
            kind: OperationKind::Create,
            before: None,
            after: Some(spec),
        }
    }

    pub fn update(before: Resource, spec: serde_json::Value) -> Self {
        Self {
            target: before.id.clone(),
            kind: OperationKind::Update,
            before: Some(before),
            after: Some(spec),
        }
    }

    pub fn delete(before: Resource) -> Self {
        Self {
            target: before.id.clone(),
            kind: OperationKind::Delete,
            before: Some(before),
            after: None,
        }
    }

    /// Version the target must still have when the change is committed.
    /// `None` means the target must not exist.
    pub fn expected_version(&self) -> Option<u64> {
        self.before.as_ref().map(|r| r.version)
    }

    /// Compensating operation that undoes this one at the provider.
    ///
    /// The result carries no `before` snapshot; it is only sent to providers
    /// during rollback and never committed to the state store.
    pub fn inverse(&self) -> Option<Operation> {
        let (kind, after) = match self.kind {
            OperationKind::Create => (OperationKind::Delete, None),
            OperationKind::Update => (OperationKind::Update, Some(self.before.as_ref()?.spec.clone())),
            OperationKind::Delete => (OperationKind::Create, Some(self.before.as_ref()?.spec.clone())),
        };
        Some(Operation {
            target: self.target.clone(),
            kind,
            before: None,
            after,
        })
    }
}

/// Ordered batch of operations compiled from one command.
///
/// Immutable once compiled. Applied in full or not at all.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChangeSet {
    pub id: Uuid,
    /// Command this change set was compiled from.
    pub command_id: Uuid,
    pub operations: Vec<Operation>,
    /// Human-readable description of the change.
    pub summary: String,
    pub compiled_at: DateTime<Utc>,
}

impl ChangeSet {
    pub fn new(command_id: Uuid, operations: Vec<Operation>, summary: impl Into<String>) -> Self {
        Self {
            id: Uuid::now_v7(),
            command_id,
            operations,
            summary: summary.into(),
            compiled_at: Utc::now(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.operations.is_empty()
    }

    pub fn targets(&self) -> impl Iterator<Item = &ResourceId> {
        self.operations.iter().map(|op| &op.target)
    }
}

/// Taxonomy kind plus human-readable cause, attached to failures.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorDetail {
    pub kind: String,
    pub message: String,
}

impl ErrorDetail {
    pub fn new(kind: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            kind: kind.into(),
            message: message.into(),
        }
    }
}

/// An operation that reached the state store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AppliedOperation {
    pub target: ResourceId,
    pub kind: OperationKind,
    /// Version after the change (absent when the resource was deleted).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<u64>,
}

/// Outcome of applying one change set.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecutionResult {
    pub change_set_id: Uuid,
    pub outcome: Outcome,
    #[serde(default)]
    pub applied: Vec<AppliedOperation>,
    /// Number of provider operations compensated during rollback.
    #[serde(default)]
    pub rolled_back: usize,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<ErrorDetail>,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
}
