//! Snapshot-then-retire archival workflow and cleanup recommendations.

use super::stale::{StaleDetectionConfig, StaleTaskDetector};
use crate::task::{
    domain::{ArchiveInstruction, ArchivedArtifact, Task, TaskId, TaskStatus},
    ports::{ArtifactStore, ArtifactStoreError, Page, TaskQuery, TaskRepository, TaskRepositoryError},
};
use chrono::{DateTime, Utc};
use mockable::Clock;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tracing::{error, info, warn};

/// Default retention of completed tasks before archival is suggested.
pub const DEFAULT_COMPLETED_RETENTION: Duration = Duration::from_secs(30 * 24 * 60 * 60);

/// Default retention of failed tasks before cleanup is suggested.
pub const DEFAULT_FAILED_RETENTION: Duration = Duration::from_secs(14 * 24 * 60 * 60);

/// Retention ages used by [`ArchivalManager::generate_cleanup_recommendations`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetentionPolicy {
    /// Age after which completed tasks should be archived.
    #[serde(with = "crate::task::duration_secs")]
    pub completed_retention: Duration,
    /// Age after which failed tasks should be cleaned up.
    #[serde(with = "crate::task::duration_secs")]
    pub failed_retention: Duration,
}

impl Default for RetentionPolicy {
    fn default() -> Self {
        Self {
            completed_retention: DEFAULT_COMPLETED_RETENTION,
            failed_retention: DEFAULT_FAILED_RETENTION,
        }
    }
}

/// Request to archive one task, optionally with its subtree.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArchiveRequest {
    task_id: TaskId,
    reason: String,
    include_subtasks: bool,
    preserve_artifacts: bool,
    actor: String,
}

impl ArchiveRequest {
    /// Creates a single-task request that preserves artifacts.
    #[must_use]
    pub fn new(task_id: TaskId, reason: impl Into<String>, actor: impl Into<String>) -> Self {
        Self {
            task_id,
            reason: reason.into(),
            include_subtasks: false,
            preserve_artifacts: true,
            actor: actor.into(),
        }
    }

    /// Archives the whole subtree rooted at the task.
    #[must_use]
    pub const fn with_subtasks(mut self) -> Self {
        self.include_subtasks = true;
        self
    }

    /// Hands artifacts to the collaborator's cleanup instead of copying them
    /// into the archive record.
    #[must_use]
    pub const fn discard_artifacts(mut self) -> Self {
        self.preserve_artifacts = false;
        self
    }
}

/// A task that could not be archived during a bulk run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArchiveFailure {
    /// Task that failed.
    pub task_id: TaskId,
    /// Rendered error.
    pub message: String,
}

/// Outcome of an archive call.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ArchiveResult {
    /// Whether every target was archived.
    pub success: bool,
    /// Number of archived tasks.
    pub archived_count: usize,
    /// Archived tasks, in processing order.
    pub archived_task_ids: Vec<TaskId>,
    /// Per-task failures of a bulk run.
    pub errors: Vec<ArchiveFailure>,
}

/// Errors returned by the archival manager.
#[derive(Debug, Error)]
pub enum ArchivalError {
    /// The requested task does not exist.
    #[error("task not found: {0}")]
    NotFound(TaskId),
    /// Repository operation failed.
    #[error(transparent)]
    Repository(#[from] TaskRepositoryError),
    /// Artifact content could not be fetched; nothing was archived.
    #[error("failed to preserve artifacts of task {task_id}: {source}")]
    Artifact {
        /// Task whose artifact failed.
        task_id: TaskId,
        /// Collaborator error.
        #[source]
        source: ArtifactStoreError,
    },
}

/// Result type for archival operations.
pub type ArchivalResult<T> = Result<T, ArchivalError>;

/// Kind of cleanup suggestion.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RecommendationKind {
    /// Completed tasks past their retention age.
    ArchiveOldCompleted,
    /// Tasks the stale detector flagged.
    ReviewStale,
    /// Failed tasks past their retention age.
    CleanupFailed,
}

/// One cleanup suggestion with the tasks it concerns.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CleanupRecommendation {
    /// Suggestion kind.
    pub kind: RecommendationKind,
    /// Human-readable summary.
    pub description: String,
    /// Concerned tasks.
    pub task_ids: Vec<TaskId>,
}

/// Archives tasks and proposes cleanups.
#[derive(Clone)]
pub struct ArchivalManager<R, A, C>
where
    R: TaskRepository,
    A: ArtifactStore,
    C: Clock + Send + Sync,
{
    repository: Arc<R>,
    artifacts: Arc<A>,
    clock: Arc<C>,
    retention: RetentionPolicy,
    stale_config: StaleDetectionConfig,
}

impl<R, A, C> ArchivalManager<R, A, C>
where
    R: TaskRepository,
    A: ArtifactStore,
    C: Clock + Send + Sync,
{
    /// Creates a manager with default retention and stale thresholds.
    #[must_use]
    pub fn new(repository: Arc<R>, artifacts: Arc<A>, clock: Arc<C>) -> Self {
        Self {
            repository,
            artifacts,
            clock,
            retention: RetentionPolicy::default(),
            stale_config: StaleDetectionConfig::default(),
        }
    }

    /// Overrides the retention policy.
    #[must_use]
    pub const fn with_retention(mut self, retention: RetentionPolicy) -> Self {
        self.retention = retention;
        self
    }

    /// Overrides the thresholds used for stale-review suggestions.
    #[must_use]
    pub fn with_stale_config(mut self, config: StaleDetectionConfig) -> Self {
        self.stale_config = config;
        self
    }

    /// Archives a task, or its whole subtree.
    ///
    /// Every artifact to preserve is fetched before anything is written.
    /// Each target's record and stage change are then written together, so
    /// a target is either fully archived or untouched. A single-task call
    /// fails on the first error; a subtree call collects per-task failures
    /// in the result instead.
    ///
    /// # Errors
    ///
    /// Returns [`ArchivalError::NotFound`] when the task does not exist,
    /// [`ArchivalError::Artifact`] when any preserved artifact cannot be
    /// fetched, or any error of a single-task run.
    pub async fn archive_task(&self, request: ArchiveRequest) -> ArchivalResult<ArchiveResult> {
        let root = self
            .repository
            .find_by_id(request.task_id)
            .await?
            .ok_or(ArchivalError::NotFound(request.task_id))?;
        let targets = if request.include_subtasks {
            self.repository.subtree(root.id(), None).await?
        } else {
            vec![root]
        };

        let mut prepared = Vec::with_capacity(targets.len());
        for task in targets {
            let preserved = if request.preserve_artifacts {
                self.fetch_artifacts(&task).await?
            } else {
                Vec::new()
            };
            prepared.push((task, preserved));
        }

        let mut result = ArchiveResult::default();
        for (task, preserved) in prepared {
            let task_id = task.id();
            match self.archive_one(task, preserved, &request).await {
                Ok(()) => {
                    result.archived_count += 1;
                    result.archived_task_ids.push(task_id);
                }
                Err(err) if !request.include_subtasks => return Err(err),
                Err(err) => {
                    warn!(task_id = %task_id, error = %err, "failed to archive task");
                    result.errors.push(ArchiveFailure {
                        task_id,
                        message: err.to_string(),
                    });
                }
            }
        }
        result.success = result.errors.is_empty();
        info!(
            task_id = %request.task_id,
            archived = result.archived_count,
            failed = result.errors.len(),
            "archival finished"
        );
        Ok(result)
    }

    async fn fetch_artifacts(&self, task: &Task) -> ArchivalResult<Vec<ArchivedArtifact>> {
        let mut preserved = Vec::with_capacity(task.artifacts().len());
        for (name, reference) in task.artifacts() {
            let content = self
                .artifacts
                .fetch(reference)
                .await
                .map_err(|source| ArchivalError::Artifact {
                    task_id: task.id(),
                    source,
                })?;
            preserved.push(ArchivedArtifact {
                name: name.clone(),
                reference: reference.clone(),
                content,
            });
        }
        Ok(preserved)
    }

    async fn archive_one(
        &self,
        task: Task,
        preserved: Vec<ArchivedArtifact>,
        request: &ArchiveRequest,
    ) -> ArchivalResult<()> {
        let task_id = task.id();
        let instruction = ArchiveInstruction {
            reason: request.reason.clone(),
            actor: request.actor.clone(),
            artifacts: preserved,
            artifacts_preserved: request.preserve_artifacts,
        };
        let archived = self.repository.archive(task_id, &instruction).await?;

        if !request.preserve_artifacts && !archived.task.artifacts().is_empty() {
            let references: Vec<_> = archived.task.artifacts().values().cloned().collect();
            if let Err(err) = self.artifacts.cleanup(&references).await {
                warn!(task_id = %task_id, error = %err, "artifact cleanup failed");
            }
        }
        Ok(())
    }

    /// Proposes archival and cleanup work without changing anything.
    ///
    /// Storage failures are logged and drop the affected suggestion.
    pub async fn generate_cleanup_recommendations(&self) -> Vec<CleanupRecommendation> {
        let now = self.clock.utc();
        let mut recommendations = Vec::new();

        let completed = self
            .aged_tasks(TaskStatus::Completed, self.retention.completed_retention, now)
            .await;
        if !completed.is_empty() {
            recommendations.push(CleanupRecommendation {
                kind: RecommendationKind::ArchiveOldCompleted,
                description: format!(
                    "{} completed task(s) are past the retention age and can be archived",
                    completed.len()
                ),
                task_ids: completed,
            });
        }

        let detector = StaleTaskDetector::new(
            Arc::clone(&self.repository),
            Arc::clone(&self.clock),
            self.stale_config.clone(),
        );
        let stale: Vec<TaskId> = detector
            .detect_stale_tasks()
            .await
            .into_iter()
            .map(|finding| finding.task_id)
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect();
        if !stale.is_empty() {
            recommendations.push(CleanupRecommendation {
                kind: RecommendationKind::ReviewStale,
                description: format!("{} task(s) show no recent activity", stale.len()),
                task_ids: stale,
            });
        }

        let failed = self
            .aged_tasks(TaskStatus::Failed, self.retention.failed_retention, now)
            .await;
        if !failed.is_empty() {
            recommendations.push(CleanupRecommendation {
                kind: RecommendationKind::CleanupFailed,
                description: format!(
                    "{} failed task(s) are past the retention age and can be cleaned up",
                    failed.len()
                ),
                task_ids: failed,
            });
        }
        recommendations
    }

    async fn aged_tasks(&self, status: TaskStatus, age: Duration, now: DateTime<Utc>) -> Vec<TaskId> {
        let Some(cutoff) = chrono::Duration::from_std(age)
            .ok()
            .and_then(|span| now.checked_sub_signed(span))
        else {
            return Vec::new();
        };
        let query = TaskQuery::new().with_status(status).updated_before(cutoff);
        match self.repository.query(&query, Page::all()).await {
            Ok(tasks) => tasks.iter().map(Task::id).collect(),
            Err(err) => {
                error!(status = %status, error = %err, "retention scan failed");
                Vec::new()
            }
        }
    }
}
