//! Timeout-bounded, cancellable backend allocation.

use std::sync::Arc;
use std::time::Duration;

use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::core::registry::ReserveAttempt;
use crate::core::{
    Artifact, BackendFilter, BackendId, BackendInfo, BackendRegistry, CancellationToken,
    DispatchError, GenerationBackend, GenerationParams,
};

/// What to allocate and how long to wait for it.
#[derive(Debug, Clone)]
pub struct AcquireRequest {
    /// Model the caller needs loaded; `None` accepts any.
    pub model: Option<String>,
    /// Backend selection criteria.
    pub filter: BackendFilter,
    /// Maximum time to wait for a capable backend to free up.
    pub timeout: Duration,
}

impl AcquireRequest {
    /// Request any backend able to serve `model`.
    #[must_use]
    pub fn new(model: Option<String>, timeout: Duration) -> Self {
        Self {
            model,
            filter: BackendFilter::any(),
            timeout,
        }
    }

    /// Narrow the request with a filter.
    #[must_use]
    pub fn with_filter(mut self, filter: BackendFilter) -> Self {
        self.filter = filter;
        self
    }
}

/// Exclusive hold on one backend.
///
/// Dropping the handle returns the backend to Free and wakes waiters, on every
/// exit path.
pub struct Reservation {
    registry: Arc<BackendRegistry>,
    id: BackendId,
    info: BackendInfo,
    backend: Arc<dyn GenerationBackend>,
}

impl std::fmt::Debug for Reservation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Reservation")
            .field("id", &self.id)
            .field("info", &self.info)
            .finish_non_exhaustive()
    }
}

impl Reservation {
    /// Reserved backend id.
    pub const fn id(&self) -> BackendId {
        self.id
    }

    /// Capability metadata at reservation time (after any model load).
    pub const fn info(&self) -> &BackendInfo {
        &self.info
    }

    /// Mark the backend busy and run one generation on it.
    ///
    /// # Errors
    ///
    /// Propagates the backend's error unchanged.
    pub async fn generate(&self, params: &GenerationParams) -> Result<Vec<Artifact>, DispatchError> {
        self.registry.mark_busy(self.id);
        self.backend.generate(params).await
    }

    /// Release explicitly; equivalent to dropping.
    pub fn release(self) {}
}

impl Drop for Reservation {
    fn drop(&mut self) {
        if self.registry.mark_free(self.id) {
            debug!(backend = self.id, "reservation released");
        }
    }
}

/// Selects and reserves backends from a shared registry.
#[derive(Clone)]
pub struct BackendAllocator {
    registry: Arc<BackendRegistry>,
    poll_backstop: Duration,
}

impl BackendAllocator {
    /// Create an allocator over `registry`.
    ///
    /// Waiters wake on every registry release; `poll_backstop` bounds how long
    /// one wait may last without a notification.
    #[must_use]
    pub const fn new(registry: Arc<BackendRegistry>, poll_backstop: Duration) -> Self {
        Self {
            registry,
            poll_backstop,
        }
    }

    /// Registry this allocator draws from.
    pub const fn registry(&self) -> &Arc<BackendRegistry> {
        &self.registry
    }

    /// Reserve one free, capable backend, loading the model if needed.
    ///
    /// `on_will_load` runs right before a model load is triggered.
    ///
    /// # Errors
    ///
    /// - `NoCapableBackend` immediately if nothing could ever serve the request
    /// - `Timeout` once `request.timeout` elapses with every capable backend busy
    /// - `Cancelled` if `cancel` fires while waiting or the registry shuts down
    /// - the backend's own error if the model load fails
    pub async fn acquire(
        &self,
        request: &AcquireRequest,
        cancel: &CancellationToken,
        on_will_load: &(dyn Fn() + Send + Sync),
    ) -> Result<Reservation, DispatchError> {
        let deadline = Instant::now() + request.timeout;
        let model = request.model.as_deref();
        loop {
            // Register interest before inspecting state so a release between
            // the check and the wait is not lost.
            let changed = self.registry.changed().notified();
            tokio::pin!(changed);
            changed.as_mut().enable();

            if cancel.is_cancelled() {
                return Err(DispatchError::Cancelled);
            }
            match self.registry.try_reserve(model, &request.filter) {
                ReserveAttempt::Reserved { id, backend, info } => {
                    let reservation = Reservation {
                        registry: Arc::clone(&self.registry),
                        id,
                        info,
                        backend,
                    };
                    return self.prepare(reservation, model, on_will_load).await;
                }
                ReserveAttempt::NoneCapable => {
                    debug!(model = ?model, filter = ?request.filter, "no capable backend");
                    return Err(DispatchError::NoCapableBackend);
                }
                ReserveAttempt::ShutDown => return Err(DispatchError::Cancelled),
                ReserveAttempt::AllBusy => {}
            }
            if Instant::now() >= deadline {
                return Err(DispatchError::Timeout);
            }
            tokio::select! {
                () = &mut changed => {}
                () = cancel.cancelled() => return Err(DispatchError::Cancelled),
                () = tokio::time::sleep_until(deadline) => {
                    warn!(model = ?model, timeout = ?request.timeout, "backend wait timed out");
                    return Err(DispatchError::Timeout);
                }
                () = tokio::time::sleep(self.poll_backstop) => {}
            }
        }
    }

    async fn prepare(
        &self,
        mut reservation: Reservation,
        model: Option<&str>,
        on_will_load: &(dyn Fn() + Send + Sync),
    ) -> Result<Reservation, DispatchError> {
        let Some(model) = model else {
            return Ok(reservation);
        };
        if reservation.info.has_loaded(Some(model)) {
            return Ok(reservation);
        }
        on_will_load();
        info!(backend = reservation.id, model, "loading model");
        // On failure the reservation drops here and frees the backend.
        reservation.backend.load_model(model).await?;
        self.registry.set_loaded_model(reservation.id, model);
        reservation.info.loaded_model = Some(model.to_string());
        Ok(reservation)
    }

    /// Load `model` on every backend able to serve it.
    ///
    /// Backends are reserved one at a time, each waiting up to `timeout`.
    ///
    /// # Errors
    ///
    /// `NoCapableBackend` if nothing can serve `model`, otherwise the first
    /// acquire or load error.
    pub async fn load_on_all(
        &self,
        model: &str,
        timeout: Duration,
        cancel: &CancellationToken,
        on_will_load: &(dyn Fn() + Send + Sync),
    ) -> Result<usize, DispatchError> {
        let targets = self.registry.list_capable(Some(model), &BackendFilter::any());
        if targets.is_empty() {
            return Err(DispatchError::NoCapableBackend);
        }
        let mut loaded = 0;
        for target in targets {
            let request = AcquireRequest::new(Some(model.to_string()), timeout)
                .with_filter(BackendFilter::backend(target.id));
            match self.acquire(&request, cancel, on_will_load).await {
                Ok(reservation) => {
                    reservation.release();
                    loaded += 1;
                }
                // Removed since the snapshot was taken.
                Err(DispatchError::NoCapableBackend) => {}
                Err(e) => return Err(e),
            }
        }
        info!(model, backends = loaded, "model loaded on all capable backends");
        Ok(loaded)
    }
}
