use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// What the operator asked for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CommandKind {
    CreateResource,
    ScaleResource,
    DeleteResource,
    QueryStatus,
    Unknown,
}

impl CommandKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            CommandKind::CreateResource => "create_resource",
            CommandKind::ScaleResource => "scale_resource",
            CommandKind::DeleteResource => "delete_resource",
            CommandKind::QueryStatus => "query_status",
            CommandKind::Unknown => "unknown",
        }
    }

    /// Whether a command of this kind can mutate infrastructure.
    pub fn is_mutating(&self) -> bool {
        matches!(
            self,
            CommandKind::CreateResource | CommandKind::ScaleResource | CommandKind::DeleteResource
        )
    }
}

/// Extracted command parameters, keyed by parameter name.
pub type CommandParams = BTreeMap<String, serde_json::Value>;

/// A classified operator intent. Immutable once created.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Command {
    /// Unique command ID (UUIDv7 for time-sortability).
    pub id: Uuid,
    pub kind: CommandKind,
    /// Original text from the operator.
    pub raw_text: String,
    #[serde(default)]
    pub params: CommandParams,
    /// Classification confidence (0.0 - 1.0).
    pub confidence: f64,
    /// Which classifier tier produced this command.
    pub classified_by: String,
    /// Who issued this command ("system" for recommendations).
    pub initiated_by: String,
    pub created_at: DateTime<Utc>,
}

impl Command {
    pub fn new(
        kind: CommandKind,
        raw_text: impl Into<String>,
        params: CommandParams,
        confidence: f64,
        classified_by: impl Into<String>,
    ) -> Self {
        Self {
            id: Uuid::now_v7(),
            kind,
            raw_text: raw_text.into(),
            params,
            confidence: confidence.clamp(0.0, 1.0),
            classified_by: classified_by.into(),
            initiated_by: "anonymous".into(),
            created_at: Utc::now(),
        }
    }

    /// A command nothing matched: kind `Unknown`, confidence 0.
    pub fn unrecognized(raw_text: impl Into<String>, classified_by: impl Into<String>) -> Self {
        Self::new(
            CommandKind::Unknown,
            raw_text,
            CommandParams::new(),
            0.0,
            classified_by,
        )
    }

    pub fn with_initiator(mut self, initiated_by: impl Into<String>) -> Self {
        self.initiated_by = initiated_by.into();
        self
    }

    pub fn param_str(&self, key: &str) -> Option<&str> {
        self.params.get(key)?.as_str()
    }

    /// Integer parameter. Accepts JSON numbers and numeric strings.
    pub fn param_u64(&self, key: &str) -> Option<u64> {
        match self.params.get(key)? {
            serde_json::Value::Number(n) => n.as_u64(),
            serde_json::Value::String(s) => s.trim().parse().ok(),
            _ => None,
        }
    }

    pub fn has_param(&self, key: &str) -> bool {
        self.params.contains_key(key)
    }
}
