//! Durable storage for job artifacts.
//!
//! Acquired scenes, baselines and rendered heatmaps are written through an
//! [`ArtifactStore`], which hands back an opaque reference string. The
//! reference is what analysis results and AOI baselines record.

pub mod local;
pub mod memory;

use std::fmt;

use async_trait::async_trait;

use crate::domain::UserId;

pub use local::LocalArtifactStore;
pub use memory::MemoryArtifactStore;

/// Category of a stored artifact.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ArtifactKind {
    /// Image as delivered by the provider.
    Raw,
    /// Image after size reconciliation.
    Normalized,
    /// Rendered difference overlay.
    Heatmap,
}

impl ArtifactKind {
    /// Directory-safe name of the kind.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Raw => "raw",
            Self::Normalized => "normalized",
            Self::Heatmap => "heatmap",
        }
    }
}

impl fmt::Display for ArtifactKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Errors raised by artifact stores.
#[derive(Debug, thiserror::Error)]
pub enum ArtifactError {
    /// Filename or reference is not a plain relative path.
    #[error("invalid artifact name: {0}")]
    InvalidName(String),
    /// Reference does not point to a stored artifact.
    #[error("artifact not found: {0}")]
    NotFound(String),
    /// Underlying storage failure.
    #[error("artifact io error: {0}")]
    Io(#[from] std::io::Error),
}

/// Durable storage for artifact bytes.
#[async_trait]
pub trait ArtifactStore: fmt::Debug + Send + Sync {
    /// Stores `bytes` and returns an opaque reference.
    ///
    /// # Errors
    ///
    /// Returns [`ArtifactError::InvalidName`] for filenames containing path
    /// separators or parent components, or [`ArtifactError::Io`] when the
    /// write fails.
    async fn save(
        &self,
        kind: ArtifactKind,
        owner: UserId,
        filename: &str,
        bytes: Vec<u8>,
    ) -> Result<String, ArtifactError>;

    /// Loads the bytes behind a reference returned by [`ArtifactStore::save`].
    ///
    /// # Errors
    ///
    /// Returns [`ArtifactError::NotFound`] when nothing is stored under
    /// `reference`.
    async fn load(&self, reference: &str) -> Result<Vec<u8>, ArtifactError>;
}

/// Builds the reference for a stored artifact.
///
/// # Errors
///
/// Returns [`ArtifactError::InvalidName`] if `filename` is empty, contains a
/// path separator, or is a dot component.
pub fn reference_for(
    kind: ArtifactKind,
    owner: UserId,
    filename: &str,
) -> Result<String, ArtifactError> {
    let invalid = filename.is_empty()
        || filename == "."
        || filename == ".."
        || filename.contains(['/', '\\']);
    if invalid {
        return Err(ArtifactError::InvalidName(filename.to_string()));
    }
    Ok(format!("{kind}/{owner}/{filename}"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reference_layout() {
        let reference = reference_for(ArtifactKind::Heatmap, UserId::new(5), "h.png");
        assert!(matches!(reference.as_deref(), Ok("heatmap/5/h.png")));
    }

    #[test]
    fn traversal_is_rejected() {
        for name in ["", "..", "../etc/passwd", "a/b.png", "a\\b.png"] {
            assert!(
                matches!(
                    reference_for(ArtifactKind::Raw, UserId::new(1), name),
                    Err(ArtifactError::InvalidName(_))
                ),
                "{name} should be rejected"
            );
        }
    }
}
