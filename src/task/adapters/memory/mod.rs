//! In-memory adapters for tests and embedded use.

mod artifact;
mod repository;

pub use artifact::InMemoryArtifactStore;
pub use repository::InMemoryTaskRepository;
