//! Dependency edges between tasks.

use super::{DependencyId, ParseEnumError, Task, TaskDomainError, TaskId, TaskStatus};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// What a dependent task needs from its prerequisite.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DependencyType {
    /// The prerequisite must complete.
    Completion,
    /// The prerequisite must complete and publish a named artifact.
    Data,
    /// The prerequisite is an approval step.
    Approval,
    /// The prerequisite holds a shared resource.
    Resource,
}

impl DependencyType {
    /// Returns the canonical storage representation.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Completion => "completion",
            Self::Data => "data",
            Self::Approval => "approval",
            Self::Resource => "resource",
        }
    }
}

impl fmt::Display for DependencyType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl TryFrom<&str> for DependencyType {
    type Error = ParseEnumError;

    fn try_from(value: &str) -> Result<Self, Self::Error> {
        match value.trim().to_ascii_lowercase().as_str() {
            "completion" => Ok(Self::Completion),
            "data" => Ok(Self::Data),
            "approval" => Ok(Self::Approval),
            "resource" => Ok(Self::Resource),
            _ => Err(ParseEnumError::new("dependency type", value)),
        }
    }
}

/// Persisted resolution state of a dependency edge.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DependencyStatus {
    /// Waiting on the prerequisite.
    Pending,
    /// The prerequisite met the requirement.
    Satisfied,
    /// Explicitly overridden.
    Waived,
}

impl DependencyStatus {
    /// Returns the canonical storage representation.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Satisfied => "satisfied",
            Self::Waived => "waived",
        }
    }
}

impl fmt::Display for DependencyStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl TryFrom<&str> for DependencyStatus {
    type Error = ParseEnumError;

    fn try_from(value: &str) -> Result<Self, Self::Error> {
        match value.trim().to_ascii_lowercase().as_str() {
            "pending" => Ok(Self::Pending),
            "satisfied" => Ok(Self::Satisfied),
            "waived" => Ok(Self::Waived),
            _ => Err(ParseEnumError::new("dependency status", value)),
        }
    }
}

/// Explicit override marking a dependency satisfied.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Waiver {
    /// When the waiver was granted.
    pub waived_at: DateTime<Utc>,
    /// Who granted it.
    pub waived_by: String,
    /// Why it was granted.
    pub reason: String,
}

/// Directed edge `dependent → prerequisite`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskDependency {
    id: DependencyId,
    dependent_task_id: TaskId,
    prerequisite_task_id: TaskId,
    dependency_type: DependencyType,
    status: DependencyStatus,
    mandatory: bool,
    output_artifact: Option<String>,
    input_parameter: Option<String>,
    waiver: Option<Waiver>,
    satisfied_at: Option<DateTime<Utc>>,
    created_at: DateTime<Utc>,
}

/// Parameter object for reconstructing a persisted dependency edge.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PersistedDependencyData {
    /// Edge identifier.
    pub id: DependencyId,
    /// Task that waits.
    pub dependent_task_id: TaskId,
    /// Task being waited on.
    pub prerequisite_task_id: TaskId,
    /// Edge type.
    pub dependency_type: DependencyType,
    /// Stored status.
    pub status: DependencyStatus,
    /// Whether the edge gates readiness.
    pub mandatory: bool,
    /// Artifact the prerequisite must publish (data edges).
    pub output_artifact: Option<String>,
    /// Parameter of the dependent fed by the artifact (data edges).
    pub input_parameter: Option<String>,
    /// Waiver timestamp.
    pub waived_at: Option<DateTime<Utc>>,
    /// Waiver actor.
    pub waived_by: Option<String>,
    /// Waiver reason.
    pub waiver_reason: Option<String>,
    /// When the edge became satisfied.
    pub satisfied_at: Option<DateTime<Utc>>,
    /// Creation timestamp.
    pub created_at: DateTime<Utc>,
}

impl TaskDependency {
    /// Creates a pending, mandatory edge.
    ///
    /// Data edges must be given their binding with
    /// [`Self::with_data_binding`] before [`Self::validate`] accepts them.
    #[must_use]
    pub fn new(
        dependent_task_id: TaskId,
        prerequisite_task_id: TaskId,
        dependency_type: DependencyType,
        created_at: DateTime<Utc>,
    ) -> Self {
        Self {
            id: DependencyId::new(),
            dependent_task_id,
            prerequisite_task_id,
            dependency_type,
            status: DependencyStatus::Pending,
            mandatory: true,
            output_artifact: None,
            input_parameter: None,
            waiver: None,
            satisfied_at: None,
            created_at,
        }
    }

    /// Binds a prerequisite artifact to a dependent input parameter.
    #[must_use]
    pub fn with_data_binding(
        mut self,
        output_artifact: impl Into<String>,
        input_parameter: impl Into<String>,
    ) -> Self {
        self.output_artifact = Some(output_artifact.into());
        self.input_parameter = Some(input_parameter.into());
        self
    }

    /// Marks the edge as advisory: it never blocks readiness.
    #[must_use]
    pub const fn optional(mut self) -> Self {
        self.mandatory = false;
        self
    }

    /// Reconstructs and validates a persisted edge.
    ///
    /// A complete waiver tuple forces the status to
    /// [`DependencyStatus::Waived`].
    ///
    /// # Errors
    ///
    /// Returns [`TaskDomainError::IncompleteWaiver`] when only some waiver
    /// fields are present, or any error from [`Self::validate`].
    pub fn from_persisted(data: PersistedDependencyData) -> Result<Self, TaskDomainError> {
        let waiver = match (data.waived_at, data.waived_by, data.waiver_reason) {
            (None, None, None) => None,
            (Some(waived_at), Some(waived_by), Some(reason)) => Some(Waiver {
                waived_at,
                waived_by,
                reason,
            }),
            _ => return Err(TaskDomainError::IncompleteWaiver),
        };
        let status = if waiver.is_some() {
            DependencyStatus::Waived
        } else if data.status == DependencyStatus::Waived {
            return Err(TaskDomainError::IncompleteWaiver);
        } else {
            data.status
        };
        let dependency = Self {
            id: data.id,
            dependent_task_id: data.dependent_task_id,
            prerequisite_task_id: data.prerequisite_task_id,
            dependency_type: data.dependency_type,
            status,
            mandatory: data.mandatory,
            output_artifact: data.output_artifact,
            input_parameter: data.input_parameter,
            waiver,
            satisfied_at: data.satisfied_at,
            created_at: data.created_at,
        };
        dependency.validate()?;
        Ok(dependency)
    }

    /// Checks the structural invariants of the edge.
    ///
    /// # Errors
    ///
    /// Returns [`TaskDomainError::SelfDependency`] for a self-edge or
    /// [`TaskDomainError::IncompleteDataBinding`] for a data edge missing
    /// its artifact or parameter.
    pub fn validate(&self) -> Result<(), TaskDomainError> {
        if self.dependent_task_id == self.prerequisite_task_id {
            return Err(TaskDomainError::SelfDependency(self.dependent_task_id));
        }
        if self.dependency_type == DependencyType::Data {
            let bound = |field: Option<&String>| field.is_some_and(|value| !value.trim().is_empty());
            if !bound(self.output_artifact.as_ref()) || !bound(self.input_parameter.as_ref()) {
                return Err(TaskDomainError::IncompleteDataBinding {
                    dependency_type: self.dependency_type,
                });
            }
        }
        Ok(())
    }

    /// Returns the edge identifier.
    #[must_use]
    pub const fn id(&self) -> DependencyId {
        self.id
    }

    /// Returns the waiting task.
    #[must_use]
    pub const fn dependent_task_id(&self) -> TaskId {
        self.dependent_task_id
    }

    /// Returns the task being waited on.
    #[must_use]
    pub const fn prerequisite_task_id(&self) -> TaskId {
        self.prerequisite_task_id
    }

    /// Returns the edge type.
    #[must_use]
    pub const fn dependency_type(&self) -> DependencyType {
        self.dependency_type
    }

    /// Returns the stored status.
    #[must_use]
    pub const fn status(&self) -> DependencyStatus {
        self.status
    }

    /// Returns whether the edge gates readiness.
    #[must_use]
    pub const fn is_mandatory(&self) -> bool {
        self.mandatory
    }

    /// Returns the prerequisite artifact name for data edges.
    #[must_use]
    pub fn output_artifact(&self) -> Option<&str> {
        self.output_artifact.as_deref()
    }

    /// Returns the dependent parameter name for data edges.
    #[must_use]
    pub fn input_parameter(&self) -> Option<&str> {
        self.input_parameter.as_deref()
    }

    /// Returns the waiver, if granted.
    #[must_use]
    pub const fn waiver(&self) -> Option<&Waiver> {
        self.waiver.as_ref()
    }

    /// Returns when the edge was marked satisfied.
    #[must_use]
    pub const fn satisfied_at(&self) -> Option<DateTime<Utc>> {
        self.satisfied_at
    }

    /// Returns the creation timestamp.
    #[must_use]
    pub const fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    /// Grants a waiver, making the edge satisfied regardless of the
    /// prerequisite.
    ///
    /// # Errors
    ///
    /// Returns [`TaskDomainError::AlreadyWaived`] for a waived edge or
    /// [`TaskDomainError::EmptyWaiverField`] when actor or reason is blank.
    pub fn waive(
        &mut self,
        waived_by: impl Into<String>,
        reason: impl Into<String>,
        waived_at: DateTime<Utc>,
    ) -> Result<(), TaskDomainError> {
        if self.waiver.is_some() {
            return Err(TaskDomainError::AlreadyWaived);
        }
        let actor = waived_by.into();
        let why = reason.into();
        if actor.trim().is_empty() || why.trim().is_empty() {
            return Err(TaskDomainError::EmptyWaiverField);
        }
        self.waiver = Some(Waiver {
            waived_at,
            waived_by: actor,
            reason: why,
        });
        self.status = DependencyStatus::Waived;
        Ok(())
    }

    /// Records that the prerequisite met the requirement.
    pub const fn mark_satisfied(&mut self, satisfied_at: DateTime<Utc>) {
        if matches!(self.status, DependencyStatus::Pending) {
            self.status = DependencyStatus::Satisfied;
            self.satisfied_at = Some(satisfied_at);
        }
    }

    /// Evaluates the edge against the current prerequisite state.
    ///
    /// Waived and already-satisfied edges are satisfied unconditionally. A
    /// missing prerequisite never satisfies an edge.
    #[must_use]
    pub fn is_satisfied_by(&self, prerequisite: Option<&Task>) -> bool {
        match self.status {
            DependencyStatus::Waived | DependencyStatus::Satisfied => return true,
            DependencyStatus::Pending => {}
        }
        let Some(task) = prerequisite else {
            return false;
        };
        if task.status() != TaskStatus::Completed {
            return false;
        }
        match (self.dependency_type, self.output_artifact.as_deref()) {
            (DependencyType::Data, Some(artifact)) => task.artifact(artifact).is_some(),
            (DependencyType::Data, None) => false,
            _ => true,
        }
    }
}

/// Result of evaluating a task's dependencies.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct DependencyCheck {
    unsatisfied: Vec<TaskDependency>,
}

impl DependencyCheck {
    /// Creates a check result from its unsatisfied edges.
    #[must_use]
    pub const fn new(unsatisfied: Vec<TaskDependency>) -> Self {
        Self { unsatisfied }
    }

    /// Returns whether every mandatory edge is satisfied.
    #[must_use]
    pub fn all_satisfied(&self) -> bool {
        self.unsatisfied.is_empty()
    }

    /// Returns the mandatory edges still blocking the task.
    #[must_use]
    pub fn unsatisfied(&self) -> &[TaskDependency] {
        &self.unsatisfied
    }

    /// Returns the prerequisite identifiers of the blocking edges.
    #[must_use]
    pub fn blocking_prerequisites(&self) -> Vec<TaskId> {
        self.unsatisfied
            .iter()
            .map(TaskDependency::prerequisite_task_id)
            .collect()
    }
}
