//! Domain model for the task graph.
//!
//! Tasks form a tree through parent links and materialized paths, and an
//! independent acyclic graph through dependency edges. Every type here is
//! free of infrastructure concerns.

mod archive;
mod attribute;
mod classification;
mod dependency;
mod error;
mod event;
mod hierarchy;
mod ids;
mod lifecycle;
mod task;

pub use archive::{ArchiveInstruction, ArchiveRecord, ArchivedArtifact};
pub use attribute::{AttributeType, AttributeValue, TaskAttribute};
pub use classification::{Complexity, SpecialistType, TaskType};
pub use dependency::{
    DependencyCheck, DependencyStatus, DependencyType, PersistedDependencyData, TaskDependency,
    Waiver,
};
pub use error::{ParseEnumError, ParseLifecycleStageError, TaskDomainError};
pub use event::{EventCategory, SYSTEM_ACTOR, TaskEvent, TaskEventType};
pub use hierarchy::{HierarchyPath, PATH_SEPARATOR};
pub use ids::{ArchiveRecordId, ArtifactRef, DependencyId, EventId, TaskId};
pub use lifecycle::{LifecycleStage, StageReconciliation, TaskStatus, reconcile_stage};
pub use task::{MAX_PROGRESS_PERCENT, PersistedTaskData, Task};
