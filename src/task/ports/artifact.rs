//! Artifact collaborator port.
//!
//! The archival workflow preserves or discards the artifacts a task
//! produced. It assumes nothing about the storage medium behind this trait.

use crate::task::domain::ArtifactRef;
use async_trait::async_trait;
use std::sync::Arc;
use thiserror::Error;

/// Result type for artifact store operations.
pub type ArtifactStoreResult<T> = Result<T, ArtifactStoreError>;

/// Artifact storage contract.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait ArtifactStore: Send + Sync {
    /// Stores content and returns its reference.
    async fn store(&self, content: &str) -> ArtifactStoreResult<ArtifactRef>;

    /// Fetches the content behind a reference.
    async fn fetch(&self, reference: &ArtifactRef) -> ArtifactStoreResult<String>;

    /// Discards the content behind each reference.
    async fn cleanup(&self, references: &[ArtifactRef]) -> ArtifactStoreResult<()>;
}

/// Errors returned by artifact store adapters.
#[derive(Debug, Clone, Error)]
pub enum ArtifactStoreError {
    /// No content exists for the reference.
    #[error("artifact not found: {0}")]
    NotFound(ArtifactRef),

    /// Backend failure.
    #[error("artifact backend error: {0}")]
    Backend(Arc<dyn std::error::Error + Send + Sync>),
}

impl ArtifactStoreError {
    /// Wraps a backend error.
    pub fn backend(err: impl std::error::Error + Send + Sync + 'static) -> Self {
        Self::Backend(Arc::new(err))
    }
}
