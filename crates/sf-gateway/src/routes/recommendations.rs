//! Recommendation feed and operator actions.

use axum::Json;
use axum::extract::{Query, State};
use serde::Deserialize;
use uuid::Uuid;

use sf_protocol::{Recommendation, RecommendationAction, RecommendationStatus};

use crate::error::ApiResult;
use crate::recommendations::ActionOutcome;
use crate::state::AppState;

#[derive(Debug, Deserialize)]
pub struct FeedQuery {
    pub status: Option<RecommendationStatus>,
}

#[derive(Debug, Deserialize)]
pub struct ActionRequest {
    pub id: Uuid,
    pub action: RecommendationAction,
}

/// GET /api/v1/recommendations?status — newest first.
pub async fn list_recommendations(
    State(state): State<AppState>,
    Query(query): Query<FeedQuery>,
) -> Json<Vec<Recommendation>> {
    Json(state.recommendations.book().list(query.status).await)
}

/// POST /api/v1/recommendations — apply or dismiss a pending recommendation.
pub async fn act_on_recommendation(
    State(state): State<AppState>,
    Json(req): Json<ActionRequest>,
) -> ApiResult<Json<ActionOutcome>> {
    let outcome = state.recommendations.act(req.id, req.action).await?;
    Ok(Json(outcome))
}
