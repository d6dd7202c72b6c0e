//! Application services built on the task ports.
//!
//! - [`TaskLifecycleService`] validates caller requests and persists them
//! - [`StaleTaskDetector`] reports inactive, abandoned, orphaned, and blocked tasks
//! - [`ArchivalManager`] snapshots and retires tasks and proposes cleanups

mod archival;
mod lifecycle;
mod stale;

pub use archival::{
    ArchivalError, ArchivalManager, ArchivalResult, ArchiveFailure, ArchiveRequest,
    ArchiveResult, CleanupRecommendation, DEFAULT_COMPLETED_RETENTION, DEFAULT_FAILED_RETENTION,
    RecommendationKind, RetentionPolicy,
};
pub use lifecycle::{
    AddAttributeRequest, AddDependencyRequest, CreateTaskRequest, TaskLifecycleError,
    TaskLifecycleResult, TaskLifecycleService, TransitionTaskRequest,
};
pub use stale::{
    DEFAULT_ABANDONED_PROGRESS_CEILING, DEFAULT_ABANDONED_WINDOW, DEFAULT_INACTIVITY_THRESHOLD,
    RecommendedAction, StaleDetectionConfig, StaleReason, StaleTaskDetector, StaleTaskFinding,
};
