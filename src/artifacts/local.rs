//! Local-disk artifact store.
//!
//! Files live at `{root}/{kind}/{owner}/{filename}`; the reference is the
//! path relative to `root`.

use std::path::{Component, Path, PathBuf};

use async_trait::async_trait;
use tracing::debug;

use super::{ArtifactError, ArtifactKind, ArtifactStore, reference_for};
use crate::domain::UserId;

/// [`ArtifactStore`] backed by a directory tree.
#[derive(Debug, Clone)]
pub struct LocalArtifactStore {
    root: PathBuf,
}

impl LocalArtifactStore {
    /// Creates the store, creating `root` if needed.
    ///
    /// # Errors
    ///
    /// Returns [`ArtifactError::Io`] if the directory cannot be created.
    pub async fn open(root: impl Into<PathBuf>) -> Result<Self, ArtifactError> {
        let root = root.into();
        tokio::fs::create_dir_all(&root).await?;
        Ok(Self { root })
    }

    /// Root directory of the store.
    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }

    fn resolve(&self, reference: &str) -> Result<PathBuf, ArtifactError> {
        let relative = Path::new(reference);
        let plain = relative
            .components()
            .all(|c| matches!(c, Component::Normal(_)));
        if reference.is_empty() || !plain {
            return Err(ArtifactError::InvalidName(reference.to_string()));
        }
        Ok(self.root.join(relative))
    }
}

#[async_trait]
impl ArtifactStore for LocalArtifactStore {
    async fn save(
        &self,
        kind: ArtifactKind,
        owner: UserId,
        filename: &str,
        bytes: Vec<u8>,
    ) -> Result<String, ArtifactError> {
        let reference = reference_for(kind, owner, filename)?;
        let path = self.resolve(&reference)?;
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        tokio::fs::write(&path, &bytes).await?;
        debug!(path = %path.display(), bytes = bytes.len(), "artifact written");
        Ok(reference)
    }

    async fn load(&self, reference: &str) -> Result<Vec<u8>, ArtifactError> {
        let path = self.resolve(reference)?;
        match tokio::fs::read(&path).await {
            Ok(bytes) => Ok(bytes),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                Err(ArtifactError::NotFound(reference.to_string()))
            }
            Err(e) => Err(e.into()),
        }
    }
}
