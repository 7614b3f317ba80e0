//! Provider registry — maps resource kinds to the provider that realizes them.

use std::collections::HashMap;
use std::sync::Arc;

use sf_protocol::{ProviderClass, Resource, ResourceKind};

use crate::error::{ProviderError, ProviderResult};
use crate::provider::Provider;
use crate::simulated::SimulatedProvider;

/// One provider per provider class.
#[derive(Clone, Default)]
pub struct ProviderRegistry {
    providers: HashMap<ProviderClass, Arc<dyn Provider>>,
}

impl ProviderRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry with a simulated control plane for every provider class,
    /// pre-loaded with the given resources.
    pub fn simulated(resources: &[Resource]) -> Self {
        let mut registry = Self::new();
        for (class, name) in [
            (ProviderClass::Orchestrator, "sim-orchestrator"),
            (ProviderClass::CacheService, "sim-cache"),
            (ProviderClass::CloudApi, "sim-cloud"),
        ] {
            let seeded = resources
                .iter()
                .filter(|r| r.id.kind.provider_class() == class);
            registry.register(Arc::new(
                SimulatedProvider::new(name, class).with_resources(seeded),
            ));
        }
        registry
    }

    /// Register a provider, replacing any previous one for the same class.
    pub fn register(&mut self, provider: Arc<dyn Provider>) {
        tracing::debug!(
            provider = provider.name(),
            class = ?provider.class(),
            "provider registered"
        );
        self.providers.insert(provider.class(), provider);
    }

    pub fn resolve(&self, kind: ResourceKind) -> ProviderResult<Arc<dyn Provider>> {
        self.providers
            .get(&kind.provider_class())
            .cloned()
            .ok_or(ProviderError::Unsupported(kind))
    }

    pub fn len(&self) -> usize {
        self.providers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.providers.is_empty()
    }
}
