//! Event log entry types.
//!
//! The event log is append-only: entries are never mutated or deleted, and
//! every state store mutation produces exactly one `Operation` or
//! `Transition` entry with matching before/after snapshots.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::changes::{ChangeSet, ExecutionResult, OperationKind};
use crate::commands::Command;
use crate::resources::{Resource, ResourceId, ResourceStatus};

/// Who caused an entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Actor {
    Command { id: Uuid },
    System,
}

impl fmt::Display for Actor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Actor::Command { id } => write!(f, "command:{id}"),
            Actor::System => f.write_str("system"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Outcome {
    Success,
    Failure,
    Pending,
}

impl Outcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            Outcome::Success => "success",
            Outcome::Failure => "failure",
            Outcome::Pending => "pending",
        }
    }
}

/// One committed operation of a change set.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OperationRecord {
    pub change_set_id: Uuid,
    /// Position of the operation within its change set.
    pub index: usize,
    pub kind: OperationKind,
    pub target: ResourceId,
    pub before: Option<Resource>,
    pub after: Option<Resource>,
}

/// Status change observed on live infrastructure.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ObservedTransition {
    pub target: ResourceId,
    pub from: Option<ResourceStatus>,
    pub to: ResourceStatus,
    pub before: Option<Resource>,
    pub after: Option<Resource>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum EventPayload {
    Command(Command),
    ChangeSet(ChangeSet),
    Operation(OperationRecord),
    Execution(ExecutionResult),
    Transition(ObservedTransition),
}

impl EventPayload {
    /// Resource a mutation entry refers to.
    pub fn target(&self) -> Option<&ResourceId> {
        match self {
            EventPayload::Operation(op) => Some(&op.target),
            EventPayload::Transition(t) => Some(&t.target),
            _ => None,
        }
    }

    pub fn is_mutation(&self) -> bool {
        matches!(self, EventPayload::Operation(_) | EventPayload::Transition(_))
    }

    pub fn type_name(&self) -> &'static str {
        match self {
            EventPayload::Command(_) => "command",
            EventPayload::ChangeSet(_) => "change_set",
            EventPayload::Operation(_) => "operation",
            EventPayload::Execution(_) => "execution",
            EventPayload::Transition(_) => "transition",
        }
    }
}

/// An entry before the log assigns its sequence number.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EventDraft {
    pub actor: Actor,
    pub payload: EventPayload,
    pub outcome: Outcome,
}

impl EventDraft {
    pub fn new(actor: Actor, payload: EventPayload, outcome: Outcome) -> Self {
        Self {
            actor,
            payload,
            outcome,
        }
    }

    pub fn into_entry(self, seq: u64, timestamp: DateTime<Utc>) -> EventLogEntry {
        EventLogEntry {
            seq,
            timestamp,
            actor: self.actor,
            payload: self.payload,
            outcome: self.outcome,
        }
    }
}

/// A sequenced, immutable event log entry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EventLogEntry {
    /// Strictly increasing and gapless, starting at 1.
    pub seq: u64,
    pub timestamp: DateTime<Utc>,
    pub actor: Actor,
    pub payload: EventPayload,
    pub outcome: Outcome,
}
