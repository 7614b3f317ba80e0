//! Dashboard overview.

use std::collections::BTreeMap;

use axum::Json;
use axum::extract::State;
use serde_json::{Value, json};

use crate::error::ApiResult;
use crate::state::AppState;
use crate::store::{EventLog, StateStore};

/// GET /api/v1/overview — resource counts, log head and pending suggestions.
pub async fn overview(State(state): State<AppState>) -> ApiResult<Json<Value>> {
    let snapshot = state.ledger.snapshot().await?;
    let head = state.ledger.head().await?;

    let mut by_kind: BTreeMap<&str, usize> = BTreeMap::new();
    let mut by_status: BTreeMap<&str, usize> = BTreeMap::new();
    for resource in snapshot.iter() {
        *by_kind.entry(resource.id.kind.as_str()).or_default() += 1;
        *by_status.entry(resource.status.as_str()).or_default() += 1;
    }

    Ok(Json(json!({
        "resources": snapshot.len(),
        "by_kind": by_kind,
        "by_status": by_status,
        "head_seq": head,
        "pending_recommendations": state.recommendations.book().pending_count().await,
    })))
}
