//! Shared test harness for E2E integration tests.
//!
//! Wires the gateway router over an in-memory store with simulated
//! providers, optionally replacing the orchestrator with a scripted
//! `MockProvider`.

#![allow(dead_code)]

use std::sync::Arc;

use axum::Router;
use axum::body::Body;
use axum::http::{Method, Request, StatusCode};
use http_body_util::BodyExt;
use serde_json::{Value, json};
use tower::ServiceExt;

use sf_gateway::classifier::RuleClassifier;
use sf_gateway::config::GatewayConfig;
use sf_gateway::routes::build_router;
use sf_gateway::state::{AppState, provider_registry, sample_resources};
use sf_gateway::store::{Ledger, MemoryStore};
use sf_protocol::ProviderClass;
use sf_providers::{MockProvider, ProviderRegistry};

/// End-to-end harness: gateway state plus its router.
pub struct TestHarness {
    pub state: AppState,
    pub router: Router,
    /// Scripted orchestrator, when the harness was built with one.
    pub orchestrator: Option<Arc<MockProvider>>,
}

impl TestHarness {
    /// Sample infrastructure (frontend, api-gateway, redis-cache,
    /// worker-node-1) with simulated providers.
    pub fn with_sample_data() -> Self {
        Self::from_state(AppState::with_sample_data(), None)
    }

    pub fn with_config(config: GatewayConfig) -> Self {
        Self::from_state(AppState::in_memory(config, sample_resources()), None)
    }

    /// Sample infrastructure where deployments go through a `MockProvider`.
    pub fn with_mock_orchestrator() -> Self {
        Self::with_mock_orchestrator_and_config(GatewayConfig::default())
    }

    pub fn with_mock_orchestrator_and_config(config: GatewayConfig) -> Self {
        let resources = sample_resources();
        let mut providers = ProviderRegistry::simulated(&resources);
        let mock = Arc::new(MockProvider::new(ProviderClass::Orchestrator));
        providers.register(mock.clone());
        let ledger: Arc<dyn Ledger> = Arc::new(MemoryStore::seeded(resources));
        let state = AppState::build(ledger, providers, Arc::new(RuleClassifier::new()), config);
        Self::from_state(state, Some(mock))
    }

    /// Sample infrastructure served by the given providers.
    pub fn with_providers(providers: ProviderRegistry) -> Self {
        let ledger: Arc<dyn Ledger> = Arc::new(MemoryStore::seeded(sample_resources()));
        let state = AppState::build(
            ledger,
            providers,
            Arc::new(RuleClassifier::new()),
            GatewayConfig::default(),
        );
        Self::from_state(state, None)
    }

    /// Sample infrastructure where every provider class talks HTTP to
    /// `config.control_plane_url`.
    pub fn with_control_plane(config: GatewayConfig) -> Self {
        let resources = sample_resources();
        let providers = provider_registry(&config, &resources).unwrap();
        let ledger: Arc<dyn Ledger> = Arc::new(MemoryStore::seeded(resources));
        let state = AppState::build(ledger, providers, Arc::new(RuleClassifier::new()), config);
        Self::from_state(state, None)
    }

    fn from_state(state: AppState, orchestrator: Option<Arc<MockProvider>>) -> Self {
        let router = build_router(state.clone());
        Self {
            state,
            router,
            orchestrator,
        }
    }

    pub fn orchestrator(&self) -> &MockProvider {
        self.orchestrator
            .as_deref()
            .expect("harness built without a mock orchestrator")
    }

    /// Send a request and return (status, JSON body). Empty bodies map to `null`.
    pub async fn request(&self, method: Method, uri: &str, body: Option<Value>) -> (StatusCode, Value) {
        let builder = Request::builder().method(method).uri(uri);
        let request = match body {
            Some(body) => builder
                .header("content-type", "application/json")
                .body(Body::from(serde_json::to_vec(&body).unwrap()))
                .unwrap(),
            None => builder.body(Body::empty()).unwrap(),
        };
        let response = self.router.clone().oneshot(request).await.unwrap();
        let status = response.status();
        let bytes = response.into_body().collect().await.unwrap().to_bytes();
        let json = if bytes.is_empty() {
            Value::Null
        } else {
            serde_json::from_slice(&bytes).unwrap()
        };
        (status, json)
    }

    pub async fn get(&self, uri: &str) -> (StatusCode, Value) {
        self.request(Method::GET, uri, None).await
    }

    pub async fn post(&self, uri: &str, body: Value) -> (StatusCode, Value) {
        self.request(Method::POST, uri, Some(body)).await
    }

    /// Submit operator text (POST /api/v1/commands).
    pub async fn submit(&self, text: &str) -> (StatusCode, Value) {
        self.post(
            "/api/v1/commands",
            json!({"text": text, "initiated_by": "ops@example.com"}),
        )
        .await
    }

    /// Approve a previewed change set (POST /api/v1/changesets/{id}/execute).
    pub async fn execute(&self, change_set_id: &str) -> (StatusCode, Value) {
        let uri = format!("/api/v1/changesets/{change_set_id}/execute");
        self.request(Method::POST, &uri, None).await
    }

    /// Submit and return the previewed change set id, asserting success.
    pub async fn preview(&self, text: &str) -> String {
        let (status, json) = self.submit(text).await;
        assert_eq!(status, StatusCode::OK, "preview of {text:?} failed: {json}");
        json["change_set"]["id"].as_str().unwrap().to_string()
    }

    pub async fn resource(&self, kind: &str, scope: &str, name: &str) -> (StatusCode, Value) {
        self.get(&format!("/api/v1/resources/{kind}/{scope}/{name}"))
            .await
    }

    /// Finite event log read (GET /api/v1/events?from=N), one value per entry.
    pub async fn events_from(&self, from: u64) -> Vec<Value> {
        let request = Request::get(format!("/api/v1/events?from={from}"))
            .body(Body::empty())
            .unwrap();
        let response = self.router.clone().oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let bytes = response.into_body().collect().await.unwrap().to_bytes();
        std::str::from_utf8(&bytes)
            .unwrap()
            .lines()
            .map(|line| serde_json::from_str(line).unwrap())
            .collect()
    }

    pub async fn head(&self) -> u64 {
        let (_, overview) = self.get("/api/v1/overview").await;
        overview["head_seq"].as_u64().unwrap()
    }
}
