//! Resource state endpoints.

use axum::Json;
use axum::extract::{Path, Query, State};
use serde::Deserialize;

use sf_protocol::{Resource, ResourceFilter, ResourceId, ResourceKind, ResourceStatus};

use crate::error::{ApiError, ApiResult};
use crate::observer;
use crate::state::AppState;
use crate::store::StateStore;

/// Parse `/{kind}/{scope}/{name}` path segments.
pub(crate) fn resource_id(kind: &str, scope: String, name: String) -> ApiResult<ResourceId> {
    let kind: ResourceKind = kind
        .parse()
        .map_err(|e: sf_protocol::UnknownKind| ApiError::BadRequest(e.to_string()))?;
    Ok(ResourceId::new(kind, scope, name))
}

/// Body of a pushed status transition.
#[derive(Debug, Deserialize)]
pub struct StatusReport {
    pub status: ResourceStatus,
    #[serde(default)]
    pub detail: Option<String>,
}

/// GET /api/v1/resources?kind&scope&status
pub async fn list_resources(
    State(state): State<AppState>,
    Query(filter): Query<ResourceFilter>,
) -> ApiResult<Json<Vec<Resource>>> {
    Ok(Json(state.ledger.list(&filter).await?))
}

/// GET /api/v1/resources/{kind}/{scope}/{name}
pub async fn get_resource(
    State(state): State<AppState>,
    Path((kind, scope, name)): Path<(String, String, String)>,
) -> ApiResult<Json<Resource>> {
    let id = resource_id(&kind, scope, name)?;
    state
        .ledger
        .get(&id)
        .await?
        .map(Json)
        .ok_or_else(|| ApiError::NotFound(format!("resource {id}")))
}

/// POST /api/v1/resources/{kind}/{scope}/{name}/status — record an observed
/// transition pushed by an external watcher.
pub async fn report_status(
    State(state): State<AppState>,
    Path((kind, scope, name)): Path<(String, String, String)>,
    Json(report): Json<StatusReport>,
) -> ApiResult<Json<Resource>> {
    let id = resource_id(&kind, scope, name)?;
    let resource =
        observer::record_transition(state.ledger.as_ref(), &id, report.status, report.detail)
            .await?;
    Ok(Json(resource))
}
