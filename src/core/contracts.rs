//! Contracts for the external collaborators the dispatcher drives.
//!
//! Backends, artifact storage and the model catalog live outside this crate;
//! these traits are the only surface the scheduler relies on.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::core::{Artifact, DispatchError, GenerationParams};

/// A worker able to run one generation job at a time.
///
/// # Example
///
/// ```rust,ignore
/// use async_trait::async_trait;
/// use gen_dispatch::core::{Artifact, DispatchError, GenerationBackend, GenerationParams};
///
/// struct EchoBackend;
///
/// #[async_trait]
/// impl GenerationBackend for EchoBackend {
///     async fn load_model(&self, _model: &str) -> Result<(), DispatchError> {
///         Ok(())
///     }
///
///     async fn generate(&self, params: &GenerationParams) -> Result<Vec<Artifact>, DispatchError> {
///         Ok(vec![Artifact::new(params.prompt.clone().into_bytes(), "txt")])
///     }
/// }
/// ```
#[async_trait]
pub trait GenerationBackend: Send + Sync + 'static {
    /// Load `model` so subsequent generations use it.
    ///
    /// Called while the backend is reserved by exactly one caller.
    async fn load_model(&self, model: &str) -> Result<(), DispatchError>;

    /// Run one generation.
    ///
    /// Bad parameters fail with `InvalidData`; anything unexpected should be
    /// reported as `Internal`.
    async fn generate(&self, params: &GenerationParams) -> Result<Vec<Artifact>, DispatchError>;
}

/// Where an artifact should be stored.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SaveTarget {
    /// Top-level grouping (session id, sweep output folder).
    pub scope: String,
    /// Relative file stem inside the scope; may contain `/`.
    pub name: String,
    /// File extension.
    pub format: String,
}

impl SaveTarget {
    /// Relative path of the stored file, `scope/name.format`.
    #[must_use]
    pub fn relative_path(&self) -> String {
        format!("{}/{}.{}", self.scope, self.name, self.format)
    }
}

/// Persistence for produced artifacts.
#[async_trait]
pub trait ArtifactStore: Send + Sync + 'static {
    /// Store an artifact and return the reference callers use to fetch it.
    ///
    /// Fails with `PersistenceFailure`.
    async fn save(&self, artifact: &Artifact, target: &SaveTarget) -> Result<String, DispatchError>;

    /// Whether something is already stored at `target`.
    async fn exists(&self, _target: &SaveTarget) -> bool {
        false
    }
}

/// A model known to the catalog.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModelDescriptor {
    /// Model name as used in requests, e.g. `sd/v1-5.safetensors`.
    pub name: String,
    /// Architecture class label, when known.
    pub class: Option<String>,
}

/// Lookup of model names.
pub trait ModelCatalog: Send + Sync + 'static {
    /// Resolve a model by name.
    fn resolve(&self, name: &str) -> Option<ModelDescriptor>;
}
