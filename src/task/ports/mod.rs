//! Port contracts for the task core.
//!
//! Ports define infrastructure-agnostic interfaces used by task services.

pub mod artifact;
pub mod query;
pub mod repository;

pub use artifact::{ArtifactStore, ArtifactStoreError, ArtifactStoreResult};
pub use query::{DeleteMode, GetOptions, Page, ParentFilter, TaskQuery};
pub use repository::{
    ArchivedTask, DependencyGraph, TaskRepository, TaskRepositoryError, TaskRepositoryResult,
};

#[cfg(test)]
pub use artifact::MockArtifactStore;
