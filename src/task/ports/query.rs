//! Read options, filters, and pagination for repository queries.

use crate::task::domain::{LifecycleStage, SpecialistType, Task, TaskId, TaskStatus, TaskType};
use chrono::{DateTime, Utc};

/// Options for loading a single task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct GetOptions {
    include_children: bool,
    include_deleted: bool,
}

impl GetOptions {
    /// Loads direct children into the aggregate.
    #[must_use]
    pub const fn with_children(mut self) -> Self {
        self.include_children = true;
        self
    }

    /// Makes soft-deleted tasks visible. Intended for administrative tools.
    #[must_use]
    pub const fn including_deleted(mut self) -> Self {
        self.include_deleted = true;
        self
    }

    /// Returns whether direct children are loaded.
    #[must_use]
    pub const fn include_children(self) -> bool {
        self.include_children
    }

    /// Returns whether soft-deleted tasks are visible.
    #[must_use]
    pub const fn include_deleted(self) -> bool {
        self.include_deleted
    }
}

/// How a task is deleted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DeleteMode {
    /// Hide the task behind the visibility flag.
    #[default]
    Soft,
    /// Remove the row and cascade to side tables.
    Hard,
}

/// Pagination window.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Page {
    /// Maximum number of results; `None` is unbounded.
    pub limit: Option<usize>,
    /// Number of results to skip.
    pub offset: usize,
}

impl Page {
    /// Every result.
    #[must_use]
    pub const fn all() -> Self {
        Self {
            limit: None,
            offset: 0,
        }
    }

    /// A window of at most `limit` results after `offset`.
    #[must_use]
    pub const fn new(limit: usize, offset: usize) -> Self {
        Self {
            limit: Some(limit),
            offset,
        }
    }

    /// Applies the window to an already ordered result set.
    #[must_use]
    pub fn apply<T>(self, items: Vec<T>) -> Vec<T> {
        let window = items.into_iter().skip(self.offset);
        match self.limit {
            Some(limit) => window.take(limit).collect(),
            None => window.collect(),
        }
    }
}

/// Parent constraint of a query.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParentFilter {
    /// Only tasks without a parent.
    Root,
    /// Only direct children of the given task.
    ChildOf(TaskId),
}

/// Structured predicate over tasks. Empty collections and `None` fields do
/// not constrain the result.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct TaskQuery {
    /// Any of these statuses.
    pub statuses: Vec<TaskStatus>,
    /// Any of these stages.
    pub stages: Vec<LifecycleStage>,
    /// Exact task type.
    pub task_type: Option<TaskType>,
    /// Exact specialist role.
    pub specialist_type: Option<SpecialistType>,
    /// Exact assignee.
    pub assigned_to: Option<String>,
    /// Parent constraint.
    pub parent: Option<ParentFilter>,
    /// Created at or after.
    pub created_after: Option<DateTime<Utc>>,
    /// Created strictly before.
    pub created_before: Option<DateTime<Utc>>,
    /// Updated at or after.
    pub updated_after: Option<DateTime<Utc>>,
    /// Updated strictly before.
    pub updated_before: Option<DateTime<Utc>>,
    /// Carries this tag.
    pub tag: Option<String>,
    /// Includes soft-deleted tasks.
    pub include_deleted: bool,
}

impl TaskQuery {
    /// Creates an unconstrained query.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Restricts to tasks whose stage is not resolved.
    #[must_use]
    pub fn open_only(mut self) -> Self {
        self.stages = LifecycleStage::ALL
            .into_iter()
            .filter(|stage| !stage.is_resolved())
            .collect();
        self
    }

    /// Restricts to the given status.
    #[must_use]
    pub fn with_status(mut self, status: TaskStatus) -> Self {
        self.statuses.push(status);
        self
    }

    /// Restricts to the given stage.
    #[must_use]
    pub fn with_stage(mut self, stage: LifecycleStage) -> Self {
        self.stages.push(stage);
        self
    }

    /// Restricts to the given task type.
    #[must_use]
    pub const fn with_task_type(mut self, task_type: TaskType) -> Self {
        self.task_type = Some(task_type);
        self
    }

    /// Restricts to the given specialist role.
    #[must_use]
    pub const fn with_specialist(mut self, specialist_type: SpecialistType) -> Self {
        self.specialist_type = Some(specialist_type);
        self
    }

    /// Restricts to the given assignee.
    #[must_use]
    pub fn with_assignee(mut self, assignee: impl Into<String>) -> Self {
        self.assigned_to = Some(assignee.into());
        self
    }

    /// Restricts to root tasks.
    #[must_use]
    pub const fn roots(mut self) -> Self {
        self.parent = Some(ParentFilter::Root);
        self
    }

    /// Restricts to direct children of `parent`.
    #[must_use]
    pub const fn children_of(mut self, parent: TaskId) -> Self {
        self.parent = Some(ParentFilter::ChildOf(parent));
        self
    }

    /// Restricts the creation time to `[after, before)`.
    #[must_use]
    pub const fn created_between(
        mut self,
        after: Option<DateTime<Utc>>,
        before: Option<DateTime<Utc>>,
    ) -> Self {
        self.created_after = after;
        self.created_before = before;
        self
    }

    /// Restricts to tasks last updated strictly before `instant`.
    #[must_use]
    pub const fn updated_before(mut self, instant: DateTime<Utc>) -> Self {
        self.updated_before = Some(instant);
        self
    }

    /// Restricts to tasks last updated at or after `instant`.
    #[must_use]
    pub const fn updated_after(mut self, instant: DateTime<Utc>) -> Self {
        self.updated_after = Some(instant);
        self
    }

    /// Restricts to tasks carrying `tag`.
    #[must_use]
    pub fn with_tag(mut self, tag: impl Into<String>) -> Self {
        self.tag = Some(tag.into());
        self
    }

    /// Makes soft-deleted tasks visible.
    #[must_use]
    pub const fn including_deleted(mut self) -> Self {
        self.include_deleted = true;
        self
    }

    /// Evaluates the predicate against a task.
    #[must_use]
    pub fn matches(&self, task: &Task) -> bool {
        let within = |value: DateTime<Utc>,
                      after: Option<DateTime<Utc>>,
                      before: Option<DateTime<Utc>>| {
            after.is_none_or(|bound| value >= bound) && before.is_none_or(|bound| value < bound)
        };
        let parent_matches = match self.parent {
            None => true,
            Some(ParentFilter::Root) => task.parent_task_id().is_none(),
            Some(ParentFilter::ChildOf(parent)) => task.parent_task_id() == Some(parent),
        };

        (self.include_deleted || !task.is_deleted())
            && (self.statuses.is_empty() || self.statuses.contains(&task.status()))
            && (self.stages.is_empty() || self.stages.contains(&task.lifecycle_stage()))
            && self.task_type.is_none_or(|wanted| wanted == task.task_type())
            && self
                .specialist_type
                .is_none_or(|wanted| task.specialist_type() == Some(wanted))
            && self
                .assigned_to
                .as_deref()
                .is_none_or(|wanted| task.assigned_to() == Some(wanted))
            && parent_matches
            && within(task.created_at(), self.created_after, self.created_before)
            && within(task.updated_at(), self.updated_after, self.updated_before)
            && self
                .tag
                .as_ref()
                .is_none_or(|wanted| task.tags().contains(wanted))
    }
}
