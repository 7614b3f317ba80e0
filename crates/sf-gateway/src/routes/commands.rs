//! Command submission endpoints.

use axum::Json;
use axum::extract::{Path, Query, State};
use serde::Deserialize;
use uuid::Uuid;

use crate::error::{ApiError, ApiResult};
use crate::service::{SubmitRequest, Submission};
use crate::state::AppState;

#[derive(Debug, Deserialize)]
pub struct ListQuery {
    #[serde(default = "default_limit")]
    pub limit: usize,
}

fn default_limit() -> usize {
    50
}

/// POST /api/v1/commands — classify and compile a command into a preview.
///
/// Nothing is executed unless `auto_apply` is configured.
pub async fn submit_command(
    State(state): State<AppState>,
    Json(req): Json<SubmitRequest>,
) -> ApiResult<Json<Submission>> {
    let submission = state.gateway.submit(req).await?;
    Ok(Json(submission))
}

/// GET /api/v1/commands — recent submissions, newest first.
pub async fn list_commands(
    State(state): State<AppState>,
    Query(query): Query<ListQuery>,
) -> Json<Vec<Submission>> {
    Json(state.gateway.list(query.limit).await)
}

/// GET /api/v1/commands/{id}
pub async fn get_command(
    State(state): State<AppState>,
    Path(command_id): Path<Uuid>,
) -> ApiResult<Json<Submission>> {
    state
        .gateway
        .get_by_command(command_id)
        .await
        .map(Json)
        .ok_or_else(|| ApiError::NotFound(format!("command {command_id}")))
}
