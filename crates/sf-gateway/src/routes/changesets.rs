//! Change set preview and execution.

use axum::Json;
use axum::extract::{Path, State};
use uuid::Uuid;

use sf_protocol::ExecutionResult;

use crate::error::{ApiError, ApiResult};
use crate::service::Submission;
use crate::state::AppState;

/// GET /api/v1/changesets/{id} — the submission holding this change set.
///
/// Superseded ids resolve to the submission that replaced them.
pub async fn get_change_set(
    State(state): State<AppState>,
    Path(change_set_id): Path<Uuid>,
) -> ApiResult<Json<Submission>> {
    state
        .gateway
        .get_by_change_set(change_set_id)
        .await
        .map(Json)
        .ok_or_else(|| ApiError::NotFound(format!("change set {change_set_id}")))
}

/// POST /api/v1/changesets/{id}/execute — operator approval.
pub async fn execute_change_set(
    State(state): State<AppState>,
    Path(change_set_id): Path<Uuid>,
) -> ApiResult<Json<ExecutionResult>> {
    let result = state.gateway.execute(change_set_id).await?;
    Ok(Json(result))
}
