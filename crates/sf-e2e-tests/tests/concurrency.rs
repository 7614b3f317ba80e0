//! E2E tests for optimistic concurrency and idempotent execution.

mod helpers;

use std::sync::Arc;
use std::time::Duration;

use axum::http::StatusCode;

use helpers::TestHarness;
use sf_gateway::config::GatewayConfig;
use sf_gateway::state::sample_resources;
use sf_protocol::{ProviderClass, ResourceId, ResourceKind};
use sf_providers::{ProviderRegistry, SimulatedProvider};

/// A preview compiled before another change landed is recompiled on execute.
#[tokio::test]
async fn e2e_stale_preview_is_recompiled() {
    let h = TestHarness::with_sample_data();
    let first = h.preview("scale frontend to 5 replicas").await;
    let second = h.preview("scale frontend to 7 replicas").await;

    let (status, _) = h.execute(&first).await;
    assert_eq!(status, StatusCode::OK);

    let (status, result) = h.execute(&second).await;
    assert_eq!(status, StatusCode::OK);
    assert_ne!(result["change_set_id"], second.as_str());

    let (_, frontend) = h.resource("deployment", "default", "frontend").await;
    assert_eq!(frontend["spec"]["replicas"], 7);
    assert_eq!(frontend["version"], 3);

    // the old id still resolves to the submission that replaced it
    let (status, submission) = h.get(&format!("/api/v1/changesets/{second}")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(submission["superseded"][0], second.as_str());
    assert_eq!(submission["change_set"]["id"], result["change_set_id"]);
    assert_eq!(submission["change_set"]["operations"][0]["before"]["version"], 2);
}

/// Without retries the conflict surfaces.
#[tokio::test]
async fn e2e_conflict_without_retries() {
    let h = TestHarness::with_config(GatewayConfig {
        commit_retries: 0,
        ..Default::default()
    });
    let first = h.preview("scale frontend to 5 replicas").await;
    let second = h.preview("scale frontend to 7 replicas").await;
    h.execute(&first).await;

    let (status, json) = h.execute(&second).await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(json["kind"], "conflict");

    let (_, frontend) = h.resource("deployment", "default", "frontend").await;
    assert_eq!(frontend["spec"]["replicas"], 5);
}

/// Two simultaneous approvals of one change set reach the provider once.
#[tokio::test]
async fn e2e_concurrent_execute_is_idempotent() {
    let h = TestHarness::with_mock_orchestrator();
    let cs_id = h.preview("scale frontend to 9 replicas").await;

    let (a, b) = tokio::join!(h.execute(&cs_id), h.execute(&cs_id));
    let mut statuses = [a.0, b.0];
    statuses.sort();
    assert_eq!(statuses, [StatusCode::OK, StatusCode::CONFLICT]);
    let rejected = if a.0 == StatusCode::CONFLICT { a.1 } else { b.1 };
    assert_eq!(rejected["kind"], "already_applied");

    assert_eq!(h.orchestrator().call_count(), 1);
    let (_, frontend) = h.resource("deployment", "default", "frontend").await;
    assert_eq!(frontend["version"], 2);
}

/// Changes to different resources do not interfere.
#[tokio::test]
async fn e2e_independent_targets_all_apply() {
    let h = TestHarness::with_sample_data();
    let frontend = h.preview("scale frontend to 4 replicas").await;
    let api = h.preview("scale api-gateway to 8 replicas").await;
    let cache = h.preview("scale redis-cache to 3 nodes").await;

    let (a, b, c) = tokio::join!(h.execute(&frontend), h.execute(&api), h.execute(&cache));
    assert_eq!(a.0, StatusCode::OK);
    assert_eq!(b.0, StatusCode::OK);
    assert_eq!(c.0, StatusCode::OK);

    let (_, redis) = h.resource("cache_cluster", "us-east-1", "redis-cache").await;
    assert_eq!(redis["spec"]["nodes"], 3);
    assert_eq!(redis["version"], 2);
}

/// Two different change sets for one resource, approved together against a
/// slow provider: the provider ends up with what the store records.
#[tokio::test]
async fn e2e_overlapping_change_sets_keep_provider_and_store_in_step() {
    let resources = sample_resources();
    let slow = Arc::new(
        SimulatedProvider::new("slow-orchestrator", ProviderClass::Orchestrator)
            .with_resources(&resources)
            .with_latency(Duration::from_millis(50)),
    );
    let mut providers = ProviderRegistry::simulated(&resources);
    providers.register(slow.clone());
    let h = TestHarness::with_providers(providers);

    let five = h.preview("scale frontend to 5 replicas").await;
    let seven = h.preview("scale frontend to 7 replicas").await;
    let (a, b) = tokio::join!(h.execute(&five), h.execute(&seven));
    assert_eq!(a.0, StatusCode::OK, "{}", a.1);
    assert_eq!(b.0, StatusCode::OK, "{}", b.1);

    let id = ResourceId::new(ResourceKind::Deployment, "default", "frontend");
    let live = slow.live_spec(&id).await.unwrap();
    let (_, frontend) = h.resource("deployment", "default", "frontend").await;
    assert_eq!(live["replicas"], frontend["spec"]["replicas"]);
    assert_eq!(frontend["version"], 3);
}
