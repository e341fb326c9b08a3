//! Filesystem artifact store.

use std::path::{Component, Path, PathBuf};

use async_trait::async_trait;
use tracing::debug;

use crate::core::{Artifact, ArtifactStore, DispatchError, SaveTarget};

/// Writes artifacts under a root directory, one file per target.
#[derive(Debug, Clone)]
pub struct FsArtifactStore {
    root: PathBuf,
}

impl FsArtifactStore {
    /// Store rooted at `root`; directories are created on demand.
    pub fn new(root: impl AsRef<Path>) -> Self {
        Self {
            root: root.as_ref().to_path_buf(),
        }
    }

    /// Root directory.
    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }

    fn file_path(&self, target: &SaveTarget) -> Result<PathBuf, DispatchError> {
        let relative = PathBuf::from(target.relative_path());
        if !relative
            .components()
            .all(|c| matches!(c, Component::Normal(_)))
        {
            return Err(DispatchError::PersistenceFailure(format!(
                "refusing to write outside the output root: {}",
                relative.display()
            )));
        }
        Ok(self.root.join(relative))
    }
}

#[async_trait]
impl ArtifactStore for FsArtifactStore {
    async fn save(&self, artifact: &Artifact, target: &SaveTarget) -> Result<String, DispatchError> {
        let path = self.file_path(target)?;
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| DispatchError::PersistenceFailure(e.to_string()))?;
        }
        tokio::fs::write(&path, &artifact.data)
            .await
            .map_err(|e| DispatchError::PersistenceFailure(e.to_string()))?;
        debug!(path = %path.display(), bytes = artifact.data.len(), "artifact written");
        Ok(format!("/{}", target.relative_path()))
    }

    async fn exists(&self, target: &SaveTarget) -> bool {
        match self.file_path(target) {
            Ok(path) => tokio::fs::try_exists(path).await.unwrap_or(false),
            Err(_) => false,
        }
    }
}
