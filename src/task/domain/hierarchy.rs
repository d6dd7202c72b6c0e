//! Materialized hierarchy paths.

use super::{TaskDomainError, TaskId};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Separator between path segments.
pub const PATH_SEPARATOR: char = '/';

/// Materialized path from the root task down to a task.
///
/// A valid path starts with [`PATH_SEPARATOR`] and its final segment is the
/// owning task's identifier. Level 0 is a root task.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct HierarchyPath(String);

impl HierarchyPath {
    /// Returns the path of a root task.
    #[must_use]
    pub fn root(task_id: TaskId) -> Self {
        Self(format!("{PATH_SEPARATOR}{task_id}"))
    }

    /// Returns the path of `task_id` placed under `self`.
    #[must_use]
    pub fn child(&self, task_id: TaskId) -> Self {
        Self(format!("{}{PATH_SEPARATOR}{task_id}", self.0))
    }

    /// Wraps a persisted path without validation.
    #[must_use]
    pub fn from_raw(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    /// Returns the path as `str`.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Iterates the non-empty segments from the root downwards.
    pub fn segments(&self) -> impl Iterator<Item = &str> {
        self.0.split(PATH_SEPARATOR).filter(|segment| !segment.is_empty())
    }

    /// Returns the depth implied by the path (root is 0).
    #[must_use]
    pub fn level(&self) -> u32 {
        let count = self.segments().count();
        u32::try_from(count.saturating_sub(1)).unwrap_or(u32::MAX)
    }

    /// Returns whether the path satisfies the invariant for `owner`.
    ///
    /// Every segment must be a task identifier, and `owner` must appear
    /// exactly once, as the final segment.
    #[must_use]
    pub fn is_valid_for(&self, owner: TaskId) -> bool {
        let owner_segment = owner.to_string();
        let segments: Vec<&str> = self.segments().collect();
        self.0.starts_with(PATH_SEPARATOR)
            && !self.0.contains("//")
            && !self.0.ends_with(PATH_SEPARATOR)
            && segments.last() == Some(&owner_segment.as_str())
            && segments
                .iter()
                .filter(|segment| **segment == owner_segment)
                .count()
                == 1
            && segments
                .iter()
                .all(|segment| segment.parse::<TaskId>().is_ok())
    }

    /// Parses the ancestor identifiers, root first, excluding the owner.
    ///
    /// # Errors
    ///
    /// Returns [`TaskDomainError::InvalidHierarchyPath`] when a segment is
    /// not a task identifier.
    pub fn ancestor_ids(&self) -> Result<Vec<TaskId>, TaskDomainError> {
        let mut ids = self
            .segments()
            .map(|segment| {
                segment
                    .parse::<TaskId>()
                    .map_err(|_| TaskDomainError::InvalidHierarchyPath(self.0.clone()))
            })
            .collect::<Result<Vec<_>, _>>()?;
        ids.pop();
        Ok(ids)
    }

    /// Returns whether `other` lies strictly beneath this path.
    #[must_use]
    pub fn is_ancestor_of(&self, other: &Self) -> bool {
        other
            .0
            .strip_prefix(self.0.as_str())
            .is_some_and(|rest| rest.starts_with(PATH_SEPARATOR))
    }

    /// Rewrites the `old_prefix` of this path to `new_prefix`.
    ///
    /// Returns `None` when `old_prefix` is not a prefix of the path.
    #[must_use]
    pub fn rebase(&self, old_prefix: &Self, new_prefix: &Self) -> Option<Self> {
        self.0
            .strip_prefix(old_prefix.as_str())
            .map(|rest| Self(format!("{}{rest}", new_prefix.0)))
    }

    /// Produces a valid path for `owner` from a damaged one.
    ///
    /// Only segments naming other tasks survive, in their original order,
    /// and the owner identifier is appended last. A path that is already
    /// valid comes back unchanged.
    #[must_use]
    pub fn repaired_for(&self, owner: TaskId) -> Self {
        let owner_segment = owner.to_string();
        let mut repaired = String::new();
        for segment in self
            .segments()
            .filter(|segment| *segment != owner_segment)
            .filter(|segment| segment.parse::<TaskId>().is_ok())
        {
            repaired.push(PATH_SEPARATOR);
            repaired.push_str(segment);
        }
        repaired.push(PATH_SEPARATOR);
        repaired.push_str(&owner_segment);
        Self(repaired)
    }
}

impl fmt::Display for HierarchyPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}
