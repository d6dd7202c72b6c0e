//! In-memory artifact store for tests and embedded use.

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::{Arc, RwLock};
use uuid::Uuid;

use crate::task::{
    domain::ArtifactRef,
    ports::{ArtifactStore, ArtifactStoreError, ArtifactStoreResult},
};

/// Artifact store keeping content in a shared map.
#[derive(Debug, Clone, Default)]
pub struct InMemoryArtifactStore {
    contents: Arc<RwLock<HashMap<ArtifactRef, String>>>,
}

impl InMemoryArtifactStore {
    /// Creates an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns whether content exists for `reference`.
    ///
    /// # Errors
    ///
    /// Returns [`ArtifactStoreError::Backend`] when the lock is poisoned.
    pub fn contains(&self, reference: &ArtifactRef) -> ArtifactStoreResult<bool> {
        let guard = self
            .contents
            .read()
            .map_err(|err| ArtifactStoreError::backend(std::io::Error::other(err.to_string())))?;
        Ok(guard.contains_key(reference))
    }
}

#[async_trait]
impl ArtifactStore for InMemoryArtifactStore {
    async fn store(&self, content: &str) -> ArtifactStoreResult<ArtifactRef> {
        let reference = ArtifactRef::new(format!("artifact-{}", Uuid::new_v4()));
        let mut guard = self
            .contents
            .write()
            .map_err(|err| ArtifactStoreError::backend(std::io::Error::other(err.to_string())))?;
        guard.insert(reference.clone(), content.to_owned());
        Ok(reference)
    }

    async fn fetch(&self, reference: &ArtifactRef) -> ArtifactStoreResult<String> {
        let guard = self
            .contents
            .read()
            .map_err(|err| ArtifactStoreError::backend(std::io::Error::other(err.to_string())))?;
        guard
            .get(reference)
            .cloned()
            .ok_or_else(|| ArtifactStoreError::NotFound(reference.clone()))
    }

    async fn cleanup(&self, references: &[ArtifactRef]) -> ArtifactStoreResult<()> {
        let mut guard = self
            .contents
            .write()
            .map_err(|err| ArtifactStoreError::backend(std::io::Error::other(err.to_string())))?;
        for reference in references {
            guard.remove(reference);
        }
        Ok(())
    }
}
