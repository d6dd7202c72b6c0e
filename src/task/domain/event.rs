//! Append-only audit events attached to tasks.

use super::{EventId, ParseEnumError, TaskId};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;

/// Actor recorded for events produced by the core itself.
pub const SYSTEM_ACTOR: &str = "system";

/// Kind of change an event records.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskEventType {
    /// The task was created.
    Created,
    /// Core fields were updated.
    Updated,
    /// The status changed.
    StatusChanged,
    /// The lifecycle stage changed.
    StageChanged,
    /// The stage was forced to agree with a directly-set status.
    LifecycleCorrected,
    /// A damaged hierarchy path was repaired.
    HierarchyCorrected,
    /// The task moved to a new parent.
    Moved,
    /// An attribute was added or replaced.
    AttributeAdded,
    /// A dependency edge was added.
    DependencyAdded,
    /// A dependency edge was waived.
    DependencyWaived,
    /// A dependency edge was satisfied by its prerequisite.
    DependencySatisfied,
    /// An output artifact was attached.
    ArtifactAttached,
    /// The task was archived.
    Archived,
    /// The task was soft-deleted.
    Deleted,
    /// Caller-defined event.
    Custom,
}

impl TaskEventType {
    const ALL: [Self; 15] = [
        Self::Created,
        Self::Updated,
        Self::StatusChanged,
        Self::StageChanged,
        Self::LifecycleCorrected,
        Self::HierarchyCorrected,
        Self::Moved,
        Self::AttributeAdded,
        Self::DependencyAdded,
        Self::DependencyWaived,
        Self::DependencySatisfied,
        Self::ArtifactAttached,
        Self::Archived,
        Self::Deleted,
        Self::Custom,
    ];

    /// Returns the canonical storage representation.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Created => "created",
            Self::Updated => "updated",
            Self::StatusChanged => "status_changed",
            Self::StageChanged => "stage_changed",
            Self::LifecycleCorrected => "lifecycle_corrected",
            Self::HierarchyCorrected => "hierarchy_corrected",
            Self::Moved => "moved",
            Self::AttributeAdded => "attribute_added",
            Self::DependencyAdded => "dependency_added",
            Self::DependencyWaived => "dependency_waived",
            Self::DependencySatisfied => "dependency_satisfied",
            Self::ArtifactAttached => "artifact_attached",
            Self::Archived => "archived",
            Self::Deleted => "deleted",
            Self::Custom => "custom",
        }
    }

    /// Returns whether the event records an automatic repair.
    #[must_use]
    pub const fn is_correction(self) -> bool {
        matches!(self, Self::LifecycleCorrected | Self::HierarchyCorrected)
    }
}

impl fmt::Display for TaskEventType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl TryFrom<&str> for TaskEventType {
    type Error = ParseEnumError;

    fn try_from(value: &str) -> Result<Self, Self::Error> {
        let normalized = value.trim().to_ascii_lowercase();
        Self::ALL
            .into_iter()
            .find(|event_type| event_type.as_str() == normalized)
            .ok_or_else(|| ParseEnumError::new("event type", value))
    }
}

/// Broad grouping of events for index synchronizers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventCategory {
    /// Status and stage changes.
    Lifecycle,
    /// Parent/child structure.
    Hierarchy,
    /// Dependency edges.
    Dependency,
    /// Attributes and artifacts.
    Data,
    /// Retirement.
    Archival,
    /// Everything else.
    Audit,
}

impl EventCategory {
    /// Returns the canonical storage representation.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Lifecycle => "lifecycle",
            Self::Hierarchy => "hierarchy",
            Self::Dependency => "dependency",
            Self::Data => "data",
            Self::Archival => "archival",
            Self::Audit => "audit",
        }
    }
}

impl fmt::Display for EventCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl TryFrom<&str> for EventCategory {
    type Error = ParseEnumError;

    fn try_from(value: &str) -> Result<Self, Self::Error> {
        match value.trim().to_ascii_lowercase().as_str() {
            "lifecycle" => Ok(Self::Lifecycle),
            "hierarchy" => Ok(Self::Hierarchy),
            "dependency" => Ok(Self::Dependency),
            "data" => Ok(Self::Data),
            "archival" => Ok(Self::Archival),
            "audit" => Ok(Self::Audit),
            _ => Err(ParseEnumError::new("event category", value)),
        }
    }
}

/// Immutable audit record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskEvent {
    id: EventId,
    task_id: TaskId,
    event_type: TaskEventType,
    category: EventCategory,
    actor: String,
    occurred_at: DateTime<Utc>,
    payload: Value,
}

impl TaskEvent {
    /// Creates a new event.
    #[must_use]
    pub fn new(
        task_id: TaskId,
        event_type: TaskEventType,
        category: EventCategory,
        actor: impl Into<String>,
        payload: Value,
        occurred_at: DateTime<Utc>,
    ) -> Self {
        Self {
            id: EventId::new(),
            task_id,
            event_type,
            category,
            actor: actor.into(),
            occurred_at,
            payload,
        }
    }

    /// Reconstructs a persisted event.
    #[must_use]
    pub const fn from_persisted(
        id: EventId,
        task_id: TaskId,
        event_type: TaskEventType,
        category: EventCategory,
        actor: String,
        payload: Value,
        occurred_at: DateTime<Utc>,
    ) -> Self {
        Self {
            id,
            task_id,
            event_type,
            category,
            actor,
            occurred_at,
            payload,
        }
    }

    /// Returns the event identifier.
    #[must_use]
    pub const fn id(&self) -> EventId {
        self.id
    }

    /// Returns the owning task.
    #[must_use]
    pub const fn task_id(&self) -> TaskId {
        self.task_id
    }

    /// Returns the event type.
    #[must_use]
    pub const fn event_type(&self) -> TaskEventType {
        self.event_type
    }

    /// Returns the event category.
    #[must_use]
    pub const fn category(&self) -> EventCategory {
        self.category
    }

    /// Returns who caused the event.
    #[must_use]
    pub fn actor(&self) -> &str {
        &self.actor
    }

    /// Returns when the event happened.
    #[must_use]
    pub const fn occurred_at(&self) -> DateTime<Utc> {
        self.occurred_at
    }

    /// Returns the event payload.
    #[must_use]
    pub const fn payload(&self) -> &Value {
        &self.payload
    }
}
