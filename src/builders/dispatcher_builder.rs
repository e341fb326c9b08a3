//! Assemble a [`Dispatcher`] from configuration and backends.

use std::sync::Arc;

use tracing::info;

use crate::config::DispatchConfig;
use crate::core::{
    ArtifactStore, AuditSink, BackendInfo, BackendRegistry, DispatchError, GenerationBackend,
    ModelCatalog, ModelDescriptor,
};
use crate::dispatch::Dispatcher;
use crate::infra::{InMemoryArtifactStore, InMemoryModelCatalog};

/// Collects the parts of a dispatcher before wiring them together.
///
/// Without an explicit store, artifacts are kept in memory. Without an
/// explicit catalog, every model a registered backend advertises is known.
#[derive(Default)]
pub struct DispatcherBuilder {
    config: DispatchConfig,
    backends: Vec<(BackendInfo, Arc<dyn GenerationBackend>)>,
    store: Option<Arc<dyn ArtifactStore>>,
    catalog: Option<Arc<dyn ModelCatalog>>,
    audit: Option<Box<dyn AuditSink>>,
}

impl DispatcherBuilder {
    /// Builder with default configuration and no backends.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace the configuration.
    #[must_use]
    pub fn with_config(mut self, config: DispatchConfig) -> Self {
        self.config = config;
        self
    }

    /// Register a backend at build time.
    #[must_use]
    pub fn with_backend(mut self, info: BackendInfo, backend: Arc<dyn GenerationBackend>) -> Self {
        self.backends.push((info, backend));
        self
    }

    /// Use `store` for artifacts.
    #[must_use]
    pub fn with_store(mut self, store: Arc<dyn ArtifactStore>) -> Self {
        self.store = Some(store);
        self
    }

    /// Use `catalog` for model lookup.
    #[must_use]
    pub fn with_catalog(mut self, catalog: Arc<dyn ModelCatalog>) -> Self {
        self.catalog = Some(catalog);
        self
    }

    /// Record registry transitions to `audit`.
    #[must_use]
    pub fn with_audit(mut self, audit: Box<dyn AuditSink>) -> Self {
        self.audit = Some(audit);
        self
    }

    /// Configuration the dispatcher will use.
    #[must_use]
    pub const fn config(&self) -> &DispatchConfig {
        &self.config
    }

    /// Backends queued for registration.
    #[must_use]
    pub fn backend_count(&self) -> usize {
        self.backends.len()
    }

    fn advertised_models(&self) -> InMemoryModelCatalog {
        let mut catalog = InMemoryModelCatalog::new();
        for (info, _) in &self.backends {
            for name in info.available_models.iter().chain(&info.loaded_model) {
                catalog.insert(ModelDescriptor {
                    name: name.clone(),
                    class: Some(info.type_tag.clone()),
                });
            }
        }
        catalog
    }

    /// Validate the configuration and wire everything together.
    ///
    /// # Errors
    ///
    /// `InvalidConfig` if the configuration does not validate.
    pub fn build(self) -> Result<Arc<Dispatcher>, DispatchError> {
        self.config.validate().map_err(DispatchError::InvalidConfig)?;
        let catalog = match self.catalog.clone() {
            Some(catalog) => catalog,
            None => Arc::new(self.advertised_models()),
        };
        let store = self
            .store
            .unwrap_or_else(|| Arc::new(InMemoryArtifactStore::new()));
        let registry = match self.audit {
            Some(audit) => BackendRegistry::new().with_audit(audit),
            None => BackendRegistry::new(),
        };
        let backends = self.backends.len();
        for (info, backend) in self.backends {
            registry.register(info, backend);
        }
        info!(backends, "dispatcher built");
        Dispatcher::new(Arc::new(registry), store, catalog, self.config)
    }
}
