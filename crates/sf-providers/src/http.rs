//! HTTP client for an external control plane.
//!
//! Operations are POSTed as JSON to `{base_url}/v1/operations`; the control
//! plane answers with an [`Ack`]. Status is read from
//! `{base_url}/v1/resources/{kind}/{scope}/{name}/status`.

use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;

use sf_protocol::{Operation, ProviderClass, ResourceId, ResourceStatus};

use crate::error::{ProviderError, ProviderResult};
use crate::provider::{Ack, Provider};

/// Connection settings for one control plane endpoint.
#[derive(Debug, Clone, Deserialize)]
pub struct HttpProviderConfig {
    pub base_url: String,
    pub class: ProviderClass,
    /// Per-request timeout in milliseconds.
    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,
}

fn default_timeout_ms() -> u64 {
    5000
}

#[derive(Deserialize)]
struct StatusResponse {
    status: ResourceStatus,
}

#[derive(Deserialize)]
struct ErrorResponse {
    #[serde(alias = "message")]
    error: String,
}

pub struct HttpProvider {
    name: String,
    client: reqwest::Client,
    config: HttpProviderConfig,
}

impl HttpProvider {
    pub fn new(config: HttpProviderConfig) -> ProviderResult<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_millis(config.timeout_ms))
            .build()
            .map_err(|e| ProviderError::Unavailable(format!("http client: {e}")))?;
        let name = format!("http-{}", class_slug(config.class));
        Ok(Self {
            name,
            client,
            config,
        })
    }

    fn base(&self) -> &str {
        self.config.base_url.trim_end_matches('/')
    }

    fn map_send_error(&self, e: reqwest::Error) -> ProviderError {
        if e.is_timeout() {
            ProviderError::Timeout {
                timeout_ms: self.config.timeout_ms,
            }
        } else {
            ProviderError::Unavailable(e.to_string())
        }
    }
}

fn class_slug(class: ProviderClass) -> &'static str {
    match class {
        ProviderClass::Orchestrator => "orchestrator",
        ProviderClass::CacheService => "cache",
        ProviderClass::CloudApi => "cloud",
    }
}

/// Turn a non-success response into a provider error.
/// 4xx means the control plane refused the request; anything else means it
/// could not serve it.
async fn error_from_response(response: reqwest::Response) -> ProviderError {
    let status = response.status();
    let cause = match response.json::<ErrorResponse>().await {
        Ok(body) => body.error,
        Err(_) => status.to_string(),
    };
    if status.is_client_error() {
        ProviderError::Rejected(cause)
    } else {
        ProviderError::Unavailable(format!("{status}: {cause}"))
    }
}

#[async_trait]
impl Provider for HttpProvider {
    fn name(&self) -> &str {
        &self.name
    }

    fn class(&self) -> ProviderClass {
        self.config.class
    }

    async fn apply_operation(&self, op: &Operation) -> ProviderResult<Ack> {
        if op.target.kind.provider_class() != self.config.class {
            return Err(ProviderError::Unsupported(op.target.kind));
        }
        let url = format!("{}/v1/operations", self.base());
        let response = self
            .client
            .post(&url)
            .json(op)
            .send()
            .await
            .map_err(|e| self.map_send_error(e))?;

        if !response.status().is_success() {
            let err = error_from_response(response).await;
            tracing::warn!(provider = %self.name, resource = %op.target, error = %err, "control plane refused operation");
            return Err(err);
        }

        response.json::<Ack>().await.map_err(|e| {
            if e.is_timeout() {
                self.map_send_error(e)
            } else {
                ProviderError::Unavailable(format!("malformed ack: {e}"))
            }
        })
    }

    async fn observe(&self, id: &ResourceId) -> ProviderResult<Option<ResourceStatus>> {
        let url = format!(
            "{}/v1/resources/{}/{}/{}/status",
            self.base(),
            id.kind,
            id.scope,
            id.name
        );
        let response = self
            .client
            .get(&url)
            .send()
            .await
            .map_err(|e| self.map_send_error(e))?;

        if response.status() == reqwest::StatusCode::NOT_FOUND {
            return Ok(None);
        }
        if !response.status().is_success() {
            return Err(error_from_response(response).await);
        }
        let body: StatusResponse = response
            .json()
            .await
            .map_err(|e| ProviderError::Unavailable(format!("malformed status: {e}")))?;
        Ok(Some(body.status))
    }
}
