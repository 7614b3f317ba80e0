//! Metric ingestion and history.

use std::collections::BTreeSet;

use axum::Json;
use axum::extract::{Path, Query, State};
use serde::Deserialize;
use serde_json::{Value, json};

use sf_protocol::{CPU_PERCENT, MetricSample};

use crate::error::{ApiError, ApiResult};
use crate::metrics::forecast;
use crate::routes::resources::resource_id;
use crate::state::AppState;
use crate::store::StateStore;

/// POST /api/v1/metrics — ingest a batch of samples.
///
/// Samples for resources the store does not hold are dropped and their
/// targets listed in `unknown_targets`.
pub async fn ingest_metrics(
    State(state): State<AppState>,
    Json(samples): Json<Vec<MetricSample>>,
) -> ApiResult<Json<Value>> {
    let received = samples.len();
    let mut known = BTreeSet::new();
    let mut unknown = BTreeSet::new();
    for target in samples.iter().map(|s| &s.target) {
        if known.contains(target) || unknown.contains(target) {
            continue;
        }
        if state.ledger.get(target).await?.is_some() {
            known.insert(target.clone());
        } else {
            unknown.insert(target.clone());
        }
    }

    let accepted = state
        .metrics
        .record(samples.into_iter().filter(|s| known.contains(&s.target)))
        .await;
    if accepted < received {
        tracing::debug!(received, accepted, unknown = unknown.len(), "dropped metric samples");
    }
    Ok(Json(json!({
        "accepted": accepted,
        "unknown_targets": unknown,
    })))
}

/// GET /api/v1/metrics/{kind}/{scope}/{name} — retained samples, oldest first.
pub async fn get_metrics(
    State(state): State<AppState>,
    Path((kind, scope, name)): Path<(String, String, String)>,
) -> ApiResult<Json<Value>> {
    let id = resource_id(&kind, scope, name)?;
    if state.ledger.get(&id).await?.is_none() {
        return Err(ApiError::NotFound(format!("resource {id}")));
    }
    let samples = state.metrics.history(&id).await;
    Ok(Json(json!({
        "target": id,
        "samples": samples,
    })))
}

/// Longest projection the forecast endpoint accepts.
const MAX_HORIZON: usize = 120;

#[derive(Debug, Deserialize)]
pub struct ForecastQuery {
    #[serde(default)]
    pub metric: Option<String>,
    #[serde(default)]
    pub horizon: Option<usize>,
}

/// GET /api/v1/metrics/{kind}/{scope}/{name}/forecast — trend projection of one series.
pub async fn get_forecast(
    State(state): State<AppState>,
    Path((kind, scope, name)): Path<(String, String, String)>,
    Query(query): Query<ForecastQuery>,
) -> ApiResult<Json<Value>> {
    let id = resource_id(&kind, scope, name)?;
    let metric = query.metric.unwrap_or_else(|| CPU_PERCENT.to_string());
    let horizon = query.horizon.unwrap_or(state.config.recommendations.forecast_horizon);
    if horizon == 0 || horizon > MAX_HORIZON {
        return Err(ApiError::BadRequest(format!(
            "horizon must be between 1 and {MAX_HORIZON}"
        )));
    }
    if state.ledger.get(&id).await?.is_none() {
        return Err(ApiError::NotFound(format!("resource {id}")));
    }

    let values = state
        .metrics
        .recent(&id, &metric, state.config.recommendations.trend_window)
        .await;
    let forecast = forecast(&values, horizon)
        .ok_or_else(|| ApiError::NotFound(format!("no {metric} samples for {id}")))?;
    Ok(Json(json!({
        "target": id,
        "metric": metric,
        "samples": values.len(),
        "forecast": forecast,
    })))
}
