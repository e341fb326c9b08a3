//! Batch and sweep dispatch over a shared backend registry.

pub mod axes;
pub mod batch;
pub(crate) mod pipeline;
pub mod sink;
pub mod sweep;

use std::collections::BTreeSet;
use std::sync::Arc;

use tracing::info;

pub use axes::{expand_axes, SweepAxis, SweepPoint};
pub use batch::{BatchRequest, BatchStream, BatchSummary};
pub use sink::{DispatchEvent, EventSink};
pub use sweep::{sanitize_folder_name, ErrorSlot, SweepReport, SweepRequest};

use crate::config::DispatchConfig;
use crate::core::{
    ArtifactStore, BackendAllocator, BackendRegistry, ClaimCategory, DispatchError,
    GenerationParams, ModelCatalog, Session,
};

/// Entry point tying the registry, allocator, store and catalog together.
pub struct Dispatcher {
    registry: Arc<BackendRegistry>,
    allocator: BackendAllocator,
    store: Arc<dyn ArtifactStore>,
    catalog: Arc<dyn ModelCatalog>,
    config: DispatchConfig,
}

impl std::fmt::Debug for Dispatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Dispatcher")
            .field("backends", &self.registry.len())
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl Dispatcher {
    /// Wire a dispatcher over `registry`.
    ///
    /// # Errors
    ///
    /// `InvalidConfig` if `config` does not validate.
    pub fn new(
        registry: Arc<BackendRegistry>,
        store: Arc<dyn ArtifactStore>,
        catalog: Arc<dyn ModelCatalog>,
        config: DispatchConfig,
    ) -> Result<Arc<Self>, DispatchError> {
        config.validate().map_err(DispatchError::InvalidConfig)?;
        let allocator = BackendAllocator::new(Arc::clone(&registry), config.poll_backstop());
        Ok(Arc::new(Self {
            registry,
            allocator,
            store,
            catalog,
            config,
        }))
    }

    /// Backend registry.
    #[must_use]
    pub const fn registry(&self) -> &Arc<BackendRegistry> {
        &self.registry
    }

    /// Backend allocator.
    #[must_use]
    pub const fn allocator(&self) -> &BackendAllocator {
        &self.allocator
    }

    /// Artifact store.
    #[must_use]
    pub fn store(&self) -> &dyn ArtifactStore {
        self.store.as_ref()
    }

    /// Model catalog.
    #[must_use]
    pub fn catalog(&self) -> &dyn ModelCatalog {
        self.catalog.as_ref()
    }

    /// Active configuration.
    #[must_use]
    pub const fn config(&self) -> &DispatchConfig {
        &self.config
    }

    /// Start a session tied to the program-level cancel signal.
    #[must_use]
    pub fn open_session(&self) -> Session {
        Session::new(self.registry.program_signal())
    }

    /// A batch request using the configured concurrency and output count.
    #[must_use]
    pub fn batch_request(&self, count: usize, params: GenerationParams) -> BatchRequest {
        BatchRequest::new(count, params, self.config.max_concurrent)
            .with_outputs_per_item(self.config.outputs_per_item)
    }

    pub(crate) fn check_model(&self, model: Option<&str>) -> Result<(), DispatchError> {
        match model {
            Some(name) if self.catalog.resolve(name).is_none() => Err(DispatchError::InvalidData(
                format!("model not found: {name}"),
            )),
            _ => Ok(()),
        }
    }

    /// Validate `request`, open a claim for it and start it.
    ///
    /// # Errors
    ///
    /// `InvalidData` for an unknown model or an oversized batch.
    pub fn submit_batch(
        self: &Arc<Self>,
        session: &Session,
        mut request: BatchRequest,
    ) -> Result<BatchStream, DispatchError> {
        self.check_model(request.params.model.as_deref())?;
        request.params.resolve_seeds();
        let queued = u32::try_from(request.count)
            .map_err(|_| DispatchError::InvalidData("too many images requested".into()))?;
        let claim = session.claim(queued);
        Ok(self.run_batch(claim, request))
    }

    /// Start `count` generations of `params` with the configured defaults.
    ///
    /// # Errors
    ///
    /// See [`Self::submit_batch`].
    pub fn generate(
        self: &Arc<Self>,
        session: &Session,
        count: usize,
        params: GenerationParams,
    ) -> Result<BatchStream, DispatchError> {
        self.submit_batch(session, self.batch_request(count, params))
    }

    /// Load `model` on every backend able to serve it.
    ///
    /// Returns how many backends now have it loaded.
    ///
    /// # Errors
    ///
    /// `InvalidData` for an unknown model, then any allocator or load error.
    pub async fn select_model(&self, session: &Session, model: &str) -> Result<usize, DispatchError> {
        self.check_model(Some(model))?;
        let claim = session.claim(0);
        let loads = claim.hold(ClaimCategory::ModelLoads, 0);
        let on_will_load = || loads.add(1);
        let loaded = self
            .allocator
            .load_on_all(
                model,
                self.config.backend_timeout(),
                claim.cancel_signal(),
                &on_will_load,
            )
            .await?;
        info!(model, backends = loaded, "model selected");
        Ok(loaded)
    }

    /// Models loaded on at least one backend.
    #[must_use]
    pub fn loaded_models(&self) -> BTreeSet<String> {
        self.registry.loaded_models()
    }

    /// Cancel every session and wake all waiters.
    pub fn shutdown(&self) {
        self.registry.shutdown();
    }
}
