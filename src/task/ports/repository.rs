//! Repository port for task persistence, hierarchy, and dependency-graph
//! operations.

use super::query::{DeleteMode, GetOptions, Page, TaskQuery};
use crate::task::domain::{
    ArchiveInstruction, ArchiveRecord, AttributeValue, DependencyCheck, DependencyId, Task,
    TaskDependency, TaskDomainError, TaskId,
};
use async_trait::async_trait;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

/// Result type for task repository operations.
pub type TaskRepositoryResult<T> = Result<T, TaskRepositoryError>;

/// Adjacency view of the dependency graph: dependent → prerequisites.
pub type DependencyGraph = BTreeMap<TaskId, Vec<TaskId>>;

/// A task retired together with the record written for it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArchivedTask {
    /// The task as stored after retirement.
    pub task: Task,
    /// The archive record holding its pre-retirement snapshot.
    pub record: ArchiveRecord,
}

/// Task persistence contract.
///
/// Every write is all-or-nothing: a failed validation, cycle check, or
/// conflict leaves storage untouched. Soft-deleted tasks are invisible to
/// every read unless a caller opts in explicitly.
#[async_trait]
pub trait TaskRepository: Send + Sync {
    /// Stores a new task and returns it as persisted.
    ///
    /// The hierarchy path is recomputed from the stored parent and the
    /// lifecycle stage is reconciled with the status.
    ///
    /// # Errors
    ///
    /// Returns [`TaskRepositoryError::DuplicateTask`] when the identifier
    /// exists or [`TaskRepositoryError::NotFound`] when the parent does not
    /// resolve.
    async fn create(&self, task: &Task) -> TaskRepositoryResult<Task>;

    /// Loads a task aggregate.
    ///
    /// Returns `None` when the task does not exist or is hidden by
    /// soft deletion.
    async fn get(&self, id: TaskId, options: GetOptions) -> TaskRepositoryResult<Option<Task>>;

    /// Persists core fields, attributes, and new events of a task.
    ///
    /// # Errors
    ///
    /// Returns [`TaskRepositoryError::NotFound`] when the task does not
    /// exist or [`TaskRepositoryError::Validation`] when the lifecycle
    /// change is illegal.
    async fn update(&self, task: &Task) -> TaskRepositoryResult<Task>;

    /// Deletes a task. Returns `false` when nothing was deleted.
    async fn delete(&self, id: TaskId, mode: DeleteMode) -> TaskRepositoryResult<bool>;

    /// Returns the root and its visible descendants in breadth order.
    ///
    /// `max_depth` counts levels below the root; `None` is unbounded.
    ///
    /// # Errors
    ///
    /// Returns [`TaskRepositoryError::NotFound`] when the root does not
    /// resolve.
    async fn subtree(&self, root: TaskId, max_depth: Option<u32>)
    -> TaskRepositoryResult<Vec<Task>>;

    /// Returns the ancestors of a task, root first, immediate parent last.
    ///
    /// # Errors
    ///
    /// Returns [`TaskRepositoryError::NotFound`] when the task does not
    /// resolve.
    async fn ancestors(&self, id: TaskId) -> TaskRepositoryResult<Vec<Task>>;

    /// Re-parents a task and rewrites the paths of its whole subtree.
    ///
    /// `None` makes the task a root.
    ///
    /// # Errors
    ///
    /// Returns [`TaskRepositoryError::HierarchyCycle`] when the new parent
    /// is the task itself or one of its descendants.
    async fn move_task(&self, id: TaskId, new_parent: Option<TaskId>) -> TaskRepositoryResult<Task>;

    /// Inserts a dependency edge after a reachability check.
    ///
    /// An edge whose prerequisite already meets it is stored as satisfied.
    /// The stored edge is returned.
    ///
    /// # Errors
    ///
    /// Returns [`TaskRepositoryError::DependencyCycle`] when the edge would
    /// close a cycle, [`TaskRepositoryError::NotFound`] when an endpoint
    /// does not resolve, or [`TaskRepositoryError::Validation`] for a
    /// malformed or duplicate edge.
    async fn add_dependency(
        &self,
        dependency: &TaskDependency,
    ) -> TaskRepositoryResult<TaskDependency>;

    /// Waives a dependency edge.
    ///
    /// # Errors
    ///
    /// Returns [`TaskRepositoryError::DependencyNotFound`] when the edge
    /// does not exist or [`TaskRepositoryError::Validation`] when it is
    /// already waived.
    async fn waive_dependency(
        &self,
        id: DependencyId,
        waived_by: &str,
        reason: &str,
    ) -> TaskRepositoryResult<TaskDependency>;

    /// Evaluates the mandatory dependencies of a task.
    ///
    /// # Errors
    ///
    /// Returns [`TaskRepositoryError::NotFound`] when the task does not
    /// resolve.
    async fn check_dependencies(&self, id: TaskId) -> TaskRepositoryResult<DependencyCheck>;

    /// Returns every dependent task with its prerequisites.
    async fn dependency_graph(&self) -> TaskRepositoryResult<DependencyGraph>;

    /// Returns tasks matching `filter`, ordered by creation time then id.
    async fn query(&self, filter: &TaskQuery, page: Page) -> TaskRepositoryResult<Vec<Task>>;

    /// Returns tasks whose indexed attribute `name` equals `value`.
    async fn search_by_attribute(
        &self,
        name: &str,
        value: &AttributeValue,
    ) -> TaskRepositoryResult<Vec<Task>>;

    /// Snapshots a task into an archive record and retires it, as one
    /// atomic write.
    ///
    /// The task is re-read inside the write, so the snapshot and the stage
    /// change both start from its latest stored state. Nothing is written
    /// when any step fails.
    ///
    /// # Errors
    ///
    /// Returns [`TaskRepositoryError::NotFound`] when the task does not
    /// resolve.
    async fn archive(
        &self,
        id: TaskId,
        instruction: &ArchiveInstruction,
    ) -> TaskRepositoryResult<ArchivedTask>;

    /// Returns the archive records written for a task, oldest first.
    async fn archive_records(&self, task_id: TaskId) -> TaskRepositoryResult<Vec<ArchiveRecord>>;

    /// Loads a visible task without children.
    async fn find_by_id(&self, id: TaskId) -> TaskRepositoryResult<Option<Task>> {
        self.get(id, GetOptions::default()).await
    }
}

/// Errors returned by task repository implementations.
#[derive(Debug, Clone, Error)]
pub enum TaskRepositoryError {
    /// Input failed domain validation.
    #[error(transparent)]
    Validation(#[from] TaskDomainError),

    /// A task with the same identifier already exists.
    #[error("duplicate task identifier: {0}")]
    DuplicateTask(TaskId),

    /// The task was not found.
    #[error("task not found: {0}")]
    NotFound(TaskId),

    /// The dependency edge was not found.
    #[error("dependency not found: {0}")]
    DependencyNotFound(DependencyId),

    /// The move would make a task its own ancestor.
    #[error("moving task {task_id} under {new_parent} would create a hierarchy cycle")]
    HierarchyCycle {
        /// Task being moved.
        task_id: TaskId,
        /// Requested parent.
        new_parent: TaskId,
    },

    /// The edge would close a dependency cycle.
    #[error("dependency {dependent} -> {prerequisite} would create a cycle")]
    DependencyCycle {
        /// Dependent task.
        dependent: TaskId,
        /// Prerequisite task.
        prerequisite: TaskId,
    },

    /// A concurrent mutation collided with this one.
    #[error("concurrent modification conflict: {0}")]
    Conflict(String),

    /// Storage did not answer within the allotted time.
    #[error("storage operation timed out after {0:?}")]
    Timeout(Duration),

    /// Persistence-layer failure.
    #[error("persistence error: {0}")]
    Persistence(Arc<dyn std::error::Error + Send + Sync>),
}

impl TaskRepositoryError {
    /// Wraps a persistence error.
    pub fn persistence(err: impl std::error::Error + Send + Sync + 'static) -> Self {
        Self::Persistence(Arc::new(err))
    }

    /// Returns whether retrying the same request may succeed.
    #[must_use]
    pub const fn is_retryable(&self) -> bool {
        matches!(self, Self::Conflict(_) | Self::Timeout(_))
    }

    /// Returns whether the error reports a hierarchy or dependency cycle.
    #[must_use]
    pub const fn is_cycle(&self) -> bool {
        matches!(
            self,
            Self::HierarchyCycle { .. } | Self::DependencyCycle { .. }
        )
    }
}
