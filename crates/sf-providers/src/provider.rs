//! The provider capability trait.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use sf_protocol::{Operation, ProviderClass, ResourceId, ResourceStatus};

use crate::error::ProviderResult;

/// Acknowledgement of an applied operation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Ack {
    /// Provider that accepted the operation.
    pub provider: String,
    /// Status the provider reports for the target after the operation.
    pub status: ResourceStatus,
    /// Provider-side reference (e.g. cluster ID, instance ID).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reference: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
}

/// An external control plane that realizes change set operations.
#[async_trait]
pub trait Provider: Send + Sync {
    /// Provider name (for logging/audit).
    fn name(&self) -> &str;

    /// Which resource kinds this provider is responsible for.
    fn class(&self) -> ProviderClass;

    /// Apply one operation. Must not be retried by the caller on timeout.
    async fn apply_operation(&self, op: &Operation) -> ProviderResult<Ack>;

    /// Current status of a resource as seen by the provider.
    /// `None` when the provider does not know the resource.
    async fn observe(&self, _id: &ResourceId) -> ProviderResult<Option<ResourceStatus>> {
        Ok(None)
    }
}
