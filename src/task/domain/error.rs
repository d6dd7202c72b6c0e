//! Error types for task domain validation and parsing.

use super::{DependencyType, LifecycleStage, TaskId};
use thiserror::Error;

/// Errors returned while constructing or mutating domain task values.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum TaskDomainError {
    /// The task title is empty after trimming.
    #[error("task title must not be empty")]
    EmptyTitle,

    /// The attribute name is empty or contains whitespace.
    #[error("invalid attribute name '{0}'")]
    InvalidAttributeName(String),

    /// A raw attribute value could not be parsed for its declared type.
    #[error("attribute '{name}' value '{raw}' is not a valid {expected}")]
    InvalidAttributeValue {
        /// Attribute name.
        name: String,
        /// Raw value supplied by the caller.
        raw: String,
        /// Declared attribute type.
        expected: &'static str,
    },

    /// A task may not depend on itself.
    #[error("task {0} cannot depend on itself")]
    SelfDependency(TaskId),

    /// The same dependency edge was declared twice.
    #[error("task {dependent} already depends on {prerequisite}")]
    DuplicateDependency {
        /// Dependent task.
        dependent: TaskId,
        /// Prerequisite task.
        prerequisite: TaskId,
    },

    /// A data dependency lacks its artifact or parameter binding.
    #[error("{dependency_type} dependency requires both an output artifact and an input parameter")]
    IncompleteDataBinding {
        /// Dependency type that triggered the check.
        dependency_type: DependencyType,
    },

    /// Waiver fields must be set all together or not at all.
    #[error("waiver requires waived_at, waived_by, and waiver_reason together")]
    IncompleteWaiver,

    /// The waiver actor or reason is empty.
    #[error("waiver actor and reason must not be empty")]
    EmptyWaiverField,

    /// The dependency has already been waived.
    #[error("dependency is already waived")]
    AlreadyWaived,

    /// The requested lifecycle transition is not allowed.
    #[error("task {task_id} cannot transition from {from} to {to}")]
    InvalidStageTransition {
        /// Task identifier.
        task_id: TaskId,
        /// Current stage.
        from: LifecycleStage,
        /// Requested stage.
        to: LifecycleStage,
    },

    /// The artifact name is empty.
    #[error("artifact name must not be empty")]
    EmptyArtifactName,

    /// The hierarchy path is malformed beyond repair.
    #[error("invalid hierarchy path '{0}'")]
    InvalidHierarchyPath(String),
}

/// Error returned while parsing lifecycle stages from persistence.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("unknown lifecycle stage: {0}")]
pub struct ParseLifecycleStageError(pub String);

/// Error returned while parsing closed domain enumerations from persistence.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("unknown {kind}: {value}")]
pub struct ParseEnumError {
    /// Enumeration being parsed.
    pub kind: &'static str,
    /// Offending raw value.
    pub value: String,
}

impl ParseEnumError {
    pub(crate) fn new(kind: &'static str, value: &str) -> Self {
        Self {
            kind,
            value: value.to_owned(),
        }
    }
}
