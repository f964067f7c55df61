//! In-memory artifact store for tests and ephemeral deployments.

use std::collections::HashMap;

use async_trait::async_trait;
use tokio::sync::RwLock;

use super::{ArtifactError, ArtifactKind, ArtifactStore, reference_for};
use crate::domain::UserId;

/// [`ArtifactStore`] keeping every artifact in a map.
#[derive(Debug, Default)]
pub struct MemoryArtifactStore {
    blobs: RwLock<HashMap<String, Vec<u8>>>,
}

impl MemoryArtifactStore {
    /// Creates an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored artifacts.
    pub async fn len(&self) -> usize {
        self.blobs.read().await.len()
    }

    /// Returns `true` when nothing is stored.
    pub async fn is_empty(&self) -> bool {
        self.blobs.read().await.is_empty()
    }
}

#[async_trait]
impl ArtifactStore for MemoryArtifactStore {
    async fn save(
        &self,
        kind: ArtifactKind,
        owner: UserId,
        filename: &str,
        bytes: Vec<u8>,
    ) -> Result<String, ArtifactError> {
        let reference = reference_for(kind, owner, filename)?;
        self.blobs.write().await.insert(reference.clone(), bytes);
        Ok(reference)
    }

    async fn load(&self, reference: &str) -> Result<Vec<u8>, ArtifactError> {
        self.blobs
            .read()
            .await
            .get(reference)
            .cloned()
            .ok_or_else(|| ArtifactError::NotFound(reference.to_string()))
    }
}
