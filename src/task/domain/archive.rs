//! Archive records written when tasks are retired.

use super::{ArchiveRecordId, ArtifactRef, TaskId};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Artifact content preserved alongside an archive record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArchivedArtifact {
    /// Artifact name on the task.
    pub name: String,
    /// Collaborator reference the content was fetched from.
    pub reference: ArtifactRef,
    /// Fetched content.
    pub content: String,
}

/// What to write down when a task is retired.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArchiveInstruction {
    /// Why the task is archived.
    pub reason: String,
    /// Who archives it.
    pub actor: String,
    /// Artifact content to keep with the record.
    pub artifacts: Vec<ArchivedArtifact>,
    /// Whether artifacts are kept rather than handed to cleanup.
    pub artifacts_preserved: bool,
}

/// Durable snapshot of a task taken at retirement.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArchiveRecord {
    id: ArchiveRecordId,
    task_id: TaskId,
    snapshot: Value,
    reason: String,
    artifacts: Vec<ArchivedArtifact>,
    archived_by: String,
    archived_at: DateTime<Utc>,
}

impl ArchiveRecord {
    /// Creates an archive record.
    #[must_use]
    pub fn new(
        task_id: TaskId,
        snapshot: Value,
        reason: impl Into<String>,
        artifacts: Vec<ArchivedArtifact>,
        archived_by: impl Into<String>,
        archived_at: DateTime<Utc>,
    ) -> Self {
        Self {
            id: ArchiveRecordId::new(),
            task_id,
            snapshot,
            reason: reason.into(),
            artifacts,
            archived_by: archived_by.into(),
            archived_at,
        }
    }

    /// Reconstructs a persisted archive record.
    #[must_use]
    pub const fn from_persisted(
        id: ArchiveRecordId,
        task_id: TaskId,
        snapshot: Value,
        reason: String,
        artifacts: Vec<ArchivedArtifact>,
        archived_by: String,
        archived_at: DateTime<Utc>,
    ) -> Self {
        Self {
            id,
            task_id,
            snapshot,
            reason,
            artifacts,
            archived_by,
            archived_at,
        }
    }

    /// Returns the record identifier.
    #[must_use]
    pub const fn id(&self) -> ArchiveRecordId {
        self.id
    }

    /// Returns the archived task.
    #[must_use]
    pub const fn task_id(&self) -> TaskId {
        self.task_id
    }

    /// Returns the serialized task as it was before retirement.
    #[must_use]
    pub const fn snapshot(&self) -> &Value {
        &self.snapshot
    }

    /// Returns why the task was archived.
    #[must_use]
    pub fn reason(&self) -> &str {
        &self.reason
    }

    /// Returns the preserved artifacts.
    #[must_use]
    pub fn artifacts(&self) -> &[ArchivedArtifact] {
        &self.artifacts
    }

    /// Returns who archived the task.
    #[must_use]
    pub fn archived_by(&self) -> &str {
        &self.archived_by
    }

    /// Returns when the record was written.
    #[must_use]
    pub const fn archived_at(&self) -> DateTime<Utc> {
        self.archived_at
    }
}
