//! API route definitions and router builder.

pub mod changesets;
pub mod commands;
pub mod events;
pub mod health;
pub mod metrics;
pub mod overview;
pub mod recommendations;
pub mod resources;
pub mod ws;

use axum::Router;
use axum::routing::{get, post};
use tower_http::compression::CompressionLayer;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use crate::state::AppState;

/// Build the Axum router with all routes and middleware.
pub fn build_router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    let api = Router::new()
        // Command endpoints
        .route(
            "/commands",
            get(commands::list_commands).post(commands::submit_command),
        )
        .route("/commands/{id}", get(commands::get_command))
        // Change set preview and approval
        .route("/changesets/{id}", get(changesets::get_change_set))
        .route(
            "/changesets/{id}/execute",
            post(changesets::execute_change_set),
        )
        // Resource state
        .route("/resources", get(resources::list_resources))
        .route(
            "/resources/{kind}/{scope}/{name}",
            get(resources::get_resource),
        )
        .route(
            "/resources/{kind}/{scope}/{name}/status",
            post(resources::report_status),
        )
        // Event log
        .route("/events", get(events::stream_events))
        .route("/ws", get(ws::ws_handler))
        // Recommendations
        .route(
            "/recommendations",
            get(recommendations::list_recommendations)
                .post(recommendations::act_on_recommendation),
        )
        // Metrics
        .route("/metrics", post(metrics::ingest_metrics))
        .route("/metrics/{kind}/{scope}/{name}", get(metrics::get_metrics))
        .route(
            "/metrics/{kind}/{scope}/{name}/forecast",
            get(metrics::get_forecast),
        )
        .route("/overview", get(overview::overview));

    Router::new()
        .route("/health", get(health::health))
        .nest("/api/v1", api)
        .layer(TraceLayer::new_for_http())
        .layer(CompressionLayer::new())
        .layer(cors)
        .with_state(state)
}
