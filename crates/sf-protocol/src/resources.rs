use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Kind of infrastructure object tracked by the gateway.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResourceKind {
    /// Container orchestrator deployment (scope = namespace).
    Deployment,
    /// Managed cache cluster such as Redis (scope = region).
    CacheCluster,
    /// Cloud compute instance group (scope = region).
    ComputeInstance,
}

/// Which control plane realizes a resource kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProviderClass {
    Orchestrator,
    CacheService,
    CloudApi,
}

impl ResourceKind {
    pub const ALL: [ResourceKind; 3] = [
        ResourceKind::Deployment,
        ResourceKind::CacheCluster,
        ResourceKind::ComputeInstance,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            ResourceKind::Deployment => "deployment",
            ResourceKind::CacheCluster => "cache_cluster",
            ResourceKind::ComputeInstance => "compute_instance",
        }
    }

    pub fn provider_class(&self) -> ProviderClass {
        match self {
            ResourceKind::Deployment => ProviderClass::Orchestrator,
            ResourceKind::CacheCluster => ProviderClass::CacheService,
            ResourceKind::ComputeInstance => ProviderClass::CloudApi,
        }
    }

    /// Spec field that holds the size of the resource.
    pub fn scale_field(&self) -> &'static str {
        match self {
            ResourceKind::Deployment => "replicas",
            ResourceKind::CacheCluster => "nodes",
            ResourceKind::ComputeInstance => "count",
        }
    }

    /// Scope used when the operator does not name one.
    pub fn default_scope(&self) -> &'static str {
        match self {
            ResourceKind::Deployment => "default",
            ResourceKind::CacheCluster | ResourceKind::ComputeInstance => "us-east-1",
        }
    }

    pub fn min_size(&self) -> u64 {
        match self {
            ResourceKind::CacheCluster => 1,
            ResourceKind::Deployment | ResourceKind::ComputeInstance => 0,
        }
    }

    pub fn max_size(&self) -> u64 {
        match self {
            ResourceKind::Deployment => 100,
            ResourceKind::CacheCluster => 20,
            ResourceKind::ComputeInstance => 50,
        }
    }
}

impl fmt::Display for ResourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Error returned when a string does not name a resource kind.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown resource kind: {0}")]
pub struct UnknownKind(pub String);

impl FromStr for ResourceKind {
    type Err = UnknownKind;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "deployment" | "deployments" => Ok(ResourceKind::Deployment),
            "cache_cluster" | "cache" | "cachecluster" => Ok(ResourceKind::CacheCluster),
            "compute_instance" | "instance" | "compute" => Ok(ResourceKind::ComputeInstance),
            other => Err(UnknownKind(other.to_string())),
        }
    }
}

/// Globally unique identity of a resource: kind + scope + name.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ResourceId {
    pub kind: ResourceKind,
    /// Namespace (orchestrator) or region (cloud, cache).
    pub scope: String,
    pub name: String,
}

impl ResourceId {
    pub fn new(kind: ResourceKind, scope: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            kind,
            scope: scope.into(),
            name: name.into(),
        }
    }
}

impl fmt::Display for ResourceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}/{}", self.kind, self.scope, self.name)
    }
}

/// Last observed health of a resource.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResourceStatus {
    Pending,
    Healthy,
    Degraded,
    Failed,
    Deleting,
}

impl ResourceStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ResourceStatus::Pending => "pending",
            ResourceStatus::Healthy => "healthy",
            ResourceStatus::Degraded => "degraded",
            ResourceStatus::Failed => "failed",
            ResourceStatus::Deleting => "deleting",
        }
    }
}

impl FromStr for ResourceStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(ResourceStatus::Pending),
            "healthy" => Ok(ResourceStatus::Healthy),
            "degraded" => Ok(ResourceStatus::Degraded),
            "failed" => Ok(ResourceStatus::Failed),
            "deleting" => Ok(ResourceStatus::Deleting),
            other => Err(format!("unknown resource status: {other}")),
        }
    }
}

/// A resource as recorded by the state store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Resource {
    pub id: ResourceId,
    /// Desired spec (kind-specific JSON document).
    pub spec: serde_json::Value,
    pub status: ResourceStatus,
    /// Incremented on every accepted change, starting at 1.
    pub version: u64,
    pub observed_at: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
}

impl Resource {
    /// Current size according to the kind's scale field.
    pub fn size(&self) -> Option<u64> {
        self.spec.get(self.id.kind.scale_field())?.as_u64()
    }
}

/// Query filter for listing resources. All fields are optional.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ResourceFilter {
    #[serde(default)]
    pub kind: Option<ResourceKind>,
    #[serde(default)]
    pub scope: Option<String>,
    #[serde(default)]
    pub status: Option<ResourceStatus>,
}

impl ResourceFilter {
    pub fn matches(&self, resource: &Resource) -> bool {
        self.kind.is_none_or(|k| k == resource.id.kind)
            && self.scope.as_deref().is_none_or(|s| s == resource.id.scope)
            && self.status.is_none_or(|s| s == resource.status)
    }
}

/// Point-in-time copy of the state store.
#[derive(Debug, Clone)]
pub struct StateSnapshot {
    pub resources: BTreeMap<ResourceId, Resource>,
    pub taken_at: DateTime<Utc>,
}

impl StateSnapshot {
    pub fn new(resources: impl IntoIterator<Item = Resource>) -> Self {
        Self {
            resources: resources.into_iter().map(|r| (r.id.clone(), r)).collect(),
            taken_at: Utc::now(),
        }
    }

    pub fn get(&self, id: &ResourceId) -> Option<&Resource> {
        self.resources.get(id)
    }

    pub fn contains(&self, id: &ResourceId) -> bool {
        self.resources.contains_key(id)
    }

    /// All resources with the given name, across kinds and scopes.
    pub fn find_by_name(&self, name: &str) -> Vec<&Resource> {
        self.resources.values().filter(|r| r.id.name == name).collect()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Resource> {
        self.resources.values()
    }

    pub fn len(&self) -> usize {
        self.resources.len()
    }

    pub fn is_empty(&self) -> bool {
        self.resources.is_empty()
    }
}
