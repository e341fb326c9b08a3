//! In-memory artifact store.

use std::collections::HashMap;

use async_trait::async_trait;
use parking_lot::Mutex;

use crate::core::{Artifact, ArtifactStore, DispatchError, SaveTarget};

#[derive(Default)]
struct StoreState {
    artifacts: HashMap<String, Artifact>,
    writes: Vec<String>,
}

/// Simple in-memory store for development/testing.
///
/// References are the relative path prefixed with `/`.
#[derive(Default)]
pub struct InMemoryArtifactStore {
    state: Mutex<StoreState>,
}

impl InMemoryArtifactStore {
    /// Create an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Put an artifact at `target` without counting it as a write.
    pub fn preload(&self, target: &SaveTarget, artifact: Artifact) {
        self.state
            .lock()
            .artifacts
            .insert(target.relative_path(), artifact);
    }

    /// Artifact stored at a relative path.
    #[must_use]
    pub fn get(&self, path: &str) -> Option<Artifact> {
        self.state.lock().artifacts.get(path).cloned()
    }

    /// Relative paths of every save, in order, including repeats.
    #[must_use]
    pub fn writes(&self) -> Vec<String> {
        self.state.lock().writes.clone()
    }

    /// Number of distinct stored paths.
    #[must_use]
    pub fn len(&self) -> usize {
        self.state.lock().artifacts.len()
    }

    /// Whether nothing is stored.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[async_trait]
impl ArtifactStore for InMemoryArtifactStore {
    async fn save(&self, artifact: &Artifact, target: &SaveTarget) -> Result<String, DispatchError> {
        let path = target.relative_path();
        let mut state = self.state.lock();
        state.artifacts.insert(path.clone(), artifact.clone());
        state.writes.push(path.clone());
        Ok(format!("/{path}"))
    }

    async fn exists(&self, target: &SaveTarget) -> bool {
        self.state
            .lock()
            .artifacts
            .contains_key(&target.relative_path())
    }
}
