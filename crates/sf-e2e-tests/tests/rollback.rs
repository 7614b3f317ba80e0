//! E2E tests for provider failures: rollback, error mapping and retry.

mod helpers;

use axum::http::StatusCode;

use helpers::TestHarness;
use sf_gateway::config::GatewayConfig;
use sf_providers::ProviderError;

/// A rejected provider call leaves the store untouched and the submission
/// failed; executing again succeeds.
#[tokio::test]
async fn e2e_rejected_operation_then_retry() {
    let h = TestHarness::with_mock_orchestrator();
    h.orchestrator()
        .fail_on_call(0, ProviderError::Rejected("image pull backoff".into()));

    let (_, preview) = h.submit("scale frontend to 4 replicas").await;
    let cs_id = preview["change_set"]["id"].as_str().unwrap();
    let cmd_id = preview["command"]["id"].as_str().unwrap();
    let head = h.head().await;

    let (status, json) = h.execute(cs_id).await;
    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
    assert_eq!(json["kind"], "provider_rejected");
    assert!(json["error"].as_str().unwrap().contains("image pull backoff"));

    let (_, frontend) = h.resource("deployment", "default", "frontend").await;
    assert_eq!(frontend["spec"]["replicas"], 2);
    assert_eq!(frontend["version"], 1);

    let (_, submission) = h.get(&format!("/api/v1/commands/{cmd_id}")).await;
    assert_eq!(submission["status"], "failed");
    assert_eq!(submission["error"]["kind"], "provider_rejected");

    // only the failure summary was logged
    let logged = h.events_from(head + 1).await;
    assert_eq!(logged.len(), 1);
    assert_eq!(logged[0]["payload"]["type"], "execution");
    assert_eq!(logged[0]["outcome"], "failure");
    assert_eq!(logged[0]["payload"]["rolled_back"], 0);

    let (status, _) = h.execute(cs_id).await;
    assert_eq!(status, StatusCode::OK);
    let (_, frontend) = h.resource("deployment", "default", "frontend").await;
    assert_eq!(frontend["spec"]["replicas"], 4);
    assert_eq!(h.orchestrator().call_count(), 2);
}

#[tokio::test]
async fn e2e_provider_timeout_is_gateway_timeout() {
    let h = TestHarness::with_mock_orchestrator_and_config(GatewayConfig {
        provider_timeout_ms: 100,
        ..Default::default()
    });
    h.orchestrator().hang_on_call(0);

    let cs_id = h.preview("scale frontend to 3 replicas").await;
    let (status, json) = h.execute(&cs_id).await;
    assert_eq!(status, StatusCode::GATEWAY_TIMEOUT);
    assert_eq!(json["kind"], "provider_timeout");

    let (_, frontend) = h.resource("deployment", "default", "frontend").await;
    assert_eq!(frontend["version"], 1);
}

#[tokio::test]
async fn e2e_provider_unavailable_is_bad_gateway() {
    let h = TestHarness::with_mock_orchestrator();
    h.orchestrator()
        .fail_on_call(0, ProviderError::Unavailable("control plane returned 503".into()));

    let cs_id = h.preview("delete deployment api-gateway").await;
    let (status, json) = h.execute(&cs_id).await;
    assert_eq!(status, StatusCode::BAD_GATEWAY);
    assert_eq!(json["kind"], "provider_unavailable");

    let (status, _) = h.resource("deployment", "default", "api-gateway").await;
    assert_eq!(status, StatusCode::OK);
}
