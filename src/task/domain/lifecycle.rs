//! Lifecycle stages, fine-grained statuses, and the transition table that
//! governs them.
//!
//! The state machine is pure: every function here is side-effect-free and
//! callable from any layer. The repository consults it before persisting a
//! stage change and when reconciling a status that was set directly.

use super::{ParseEnumError, ParseLifecycleStageError};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;

/// Coarse-grained phase of a task's life.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LifecycleStage {
    /// Task has been recorded but not yet planned.
    Created,
    /// Task is being broken down or estimated.
    Planning,
    /// Task is planned and may be picked up.
    Ready,
    /// Work on the task is underway.
    Active,
    /// Work is paused on an external condition.
    Blocked,
    /// Work finished successfully.
    Completed,
    /// Work finished unsuccessfully.
    Failed,
    /// Task was abandoned before finishing.
    Cancelled,
    /// Task was retired from active management.
    Archived,
}

impl LifecycleStage {
    /// Every stage, in declaration order.
    pub const ALL: [Self; 9] = [
        Self::Created,
        Self::Planning,
        Self::Ready,
        Self::Active,
        Self::Blocked,
        Self::Completed,
        Self::Failed,
        Self::Cancelled,
        Self::Archived,
    ];

    /// Returns the canonical storage representation.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Created => "created",
            Self::Planning => "planning",
            Self::Ready => "ready",
            Self::Active => "active",
            Self::Blocked => "blocked",
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::Cancelled => "cancelled",
            Self::Archived => "archived",
        }
    }

    /// Returns the stages reachable in one step from this stage.
    #[must_use]
    pub const fn successors(self) -> &'static [Self] {
        match self {
            Self::Created => &[Self::Planning, Self::Cancelled],
            Self::Planning => &[Self::Ready, Self::Cancelled],
            Self::Ready => &[Self::Active, Self::Cancelled],
            Self::Active => &[Self::Blocked, Self::Completed, Self::Failed, Self::Cancelled],
            Self::Blocked => &[Self::Active, Self::Cancelled],
            Self::Completed | Self::Failed => &[Self::Archived, Self::Cancelled],
            Self::Cancelled | Self::Archived => &[],
        }
    }

    /// Returns the set of stages this stage may move to.
    #[must_use]
    pub fn allowed_transitions(self) -> BTreeSet<Self> {
        self.successors().iter().copied().collect()
    }

    /// Returns whether moving from `self` to `target` is permitted.
    #[must_use]
    pub fn can_transition_to(self, target: Self) -> bool {
        self.successors().contains(&target)
    }

    /// Returns whether no transition leaves this stage.
    #[must_use]
    pub const fn is_terminal(self) -> bool {
        matches!(self, Self::Cancelled | Self::Archived)
    }

    /// Returns whether work on the task has stopped for good or is awaiting
    /// retirement.
    #[must_use]
    pub const fn is_resolved(self) -> bool {
        matches!(
            self,
            Self::Completed | Self::Failed | Self::Cancelled | Self::Archived
        )
    }

    /// Returns the status that mirrors this stage.
    #[must_use]
    pub const fn status(self) -> TaskStatus {
        match self {
            Self::Created | Self::Planning | Self::Ready => TaskStatus::Pending,
            Self::Active => TaskStatus::Active,
            Self::Blocked => TaskStatus::Blocked,
            Self::Completed => TaskStatus::Completed,
            Self::Failed => TaskStatus::Failed,
            Self::Cancelled => TaskStatus::Cancelled,
            Self::Archived => TaskStatus::Archived,
        }
    }
}

impl fmt::Display for LifecycleStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl TryFrom<&str> for LifecycleStage {
    type Error = ParseLifecycleStageError;

    fn try_from(value: &str) -> Result<Self, Self::Error> {
        let normalized = value.trim().to_ascii_lowercase();
        Self::ALL
            .into_iter()
            .find(|stage| stage.as_str() == normalized)
            .ok_or_else(|| ParseLifecycleStageError(value.to_owned()))
    }
}

/// Fine-grained task status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    /// Not yet started.
    Pending,
    /// Being worked on.
    Active,
    /// Waiting on something external.
    Blocked,
    /// Finished successfully.
    Completed,
    /// Finished unsuccessfully.
    Failed,
    /// Abandoned.
    Cancelled,
    /// Retired.
    Archived,
}

impl TaskStatus {
    /// Every status, in declaration order.
    pub const ALL: [Self; 7] = [
        Self::Pending,
        Self::Active,
        Self::Blocked,
        Self::Completed,
        Self::Failed,
        Self::Cancelled,
        Self::Archived,
    ];

    /// Returns the canonical storage representation.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Active => "active",
            Self::Blocked => "blocked",
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::Cancelled => "cancelled",
            Self::Archived => "archived",
        }
    }

    /// Returns the stage a task with this status is moved to when its
    /// stage has to be derived from the status.
    #[must_use]
    pub const fn canonical_stage(self) -> LifecycleStage {
        match self {
            Self::Pending => LifecycleStage::Created,
            Self::Active => LifecycleStage::Active,
            Self::Blocked => LifecycleStage::Blocked,
            Self::Completed => LifecycleStage::Completed,
            Self::Failed => LifecycleStage::Failed,
            Self::Cancelled => LifecycleStage::Cancelled,
            Self::Archived => LifecycleStage::Archived,
        }
    }

    /// Returns whether `stage` may coexist with this status.
    #[must_use]
    pub fn is_consistent_with(self, stage: LifecycleStage) -> bool {
        stage.status() == self
    }
}

impl fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl TryFrom<&str> for TaskStatus {
    type Error = ParseEnumError;

    fn try_from(value: &str) -> Result<Self, Self::Error> {
        let normalized = value.trim().to_ascii_lowercase();
        Self::ALL
            .into_iter()
            .find(|status| status.as_str() == normalized)
            .ok_or_else(|| ParseEnumError::new("task status", value))
    }
}

/// Outcome of reconciling a task's stage with a directly-set status.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StageReconciliation {
    /// Stage and status already agree.
    Consistent,
    /// The stage follows the status through a legal transition.
    Transition(LifecycleStage),
    /// The stage must be forced because no legal transition exists.
    Correction(LifecycleStage),
}

/// Decides how `current` should move so that it agrees with `status`.
///
/// Returns `None` when the stage is terminal and disagrees with the status,
/// which cannot be reconciled.
#[must_use]
pub fn reconcile_stage(current: LifecycleStage, status: TaskStatus) -> Option<StageReconciliation> {
    if status.is_consistent_with(current) {
        return Some(StageReconciliation::Consistent);
    }
    if current.is_terminal() {
        return None;
    }
    let target = status.canonical_stage();
    if current.can_transition_to(target) {
        Some(StageReconciliation::Transition(target))
    } else {
        Some(StageReconciliation::Correction(target))
    }
}
