//! Stale task detection.
//!
//! The detector is read-only. Storage failures are logged and produce an
//! empty result, so a scheduler loop driving it never crashes on a
//! transient outage.

use crate::task::{
    domain::{DependencyStatus, SpecialistType, Task, TaskDependency, TaskId, TaskStatus},
    ports::{Page, TaskQuery, TaskRepository, TaskRepositoryError, TaskRepositoryResult},
};
use chrono::{DateTime, Utc};
use mockable::Clock;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error};

/// Default inactivity threshold for unmapped specialists.
pub const DEFAULT_INACTIVITY_THRESHOLD: Duration = Duration::from_secs(24 * 60 * 60);

/// Default idle window after which a barely started workflow is abandoned.
pub const DEFAULT_ABANDONED_WINDOW: Duration = Duration::from_secs(7 * 24 * 60 * 60);

/// Default progress below which a workflow counts as barely started.
pub const DEFAULT_ABANDONED_PROGRESS_CEILING: u8 = 10;

/// Thresholds driving stale detection.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct StaleDetectionConfig {
    /// Inactivity threshold for specialists absent from the map.
    #[serde(with = "crate::task::duration_secs")]
    pub default_threshold: Duration,
    /// Per-specialist inactivity thresholds.
    #[serde(with = "crate::task::duration_secs::map")]
    pub specialist_thresholds: BTreeMap<SpecialistType, Duration>,
    /// Idle window for abandoned-workflow detection.
    #[serde(with = "crate::task::duration_secs")]
    pub abandoned_window: Duration,
    /// Progress strictly below which a root workflow may be abandoned.
    pub abandoned_progress_ceiling: u8,
}

impl Default for StaleDetectionConfig {
    fn default() -> Self {
        Self {
            default_threshold: DEFAULT_INACTIVITY_THRESHOLD,
            specialist_thresholds: BTreeMap::new(),
            abandoned_window: DEFAULT_ABANDONED_WINDOW,
            abandoned_progress_ceiling: DEFAULT_ABANDONED_PROGRESS_CEILING,
        }
    }
}

impl StaleDetectionConfig {
    /// Overrides the default threshold.
    #[must_use]
    pub const fn with_default_threshold(mut self, threshold: Duration) -> Self {
        self.default_threshold = threshold;
        self
    }

    /// Sets the threshold for one specialist role.
    #[must_use]
    pub fn with_specialist_threshold(
        mut self,
        specialist_type: SpecialistType,
        threshold: Duration,
    ) -> Self {
        self.specialist_thresholds.insert(specialist_type, threshold);
        self
    }

    /// Overrides the abandoned-workflow window.
    #[must_use]
    pub const fn with_abandoned_window(mut self, window: Duration) -> Self {
        self.abandoned_window = window;
        self
    }

    /// Returns the threshold that applies to a task's specialist.
    #[must_use]
    pub fn threshold_for(&self, specialist_type: Option<SpecialistType>) -> Duration {
        specialist_type
            .and_then(|specialist| self.specialist_thresholds.get(&specialist).copied())
            .unwrap_or(self.default_threshold)
    }
}

/// Why a task was flagged.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum StaleReason {
    /// No update within the specialist's threshold.
    InactivityTimeout,
    /// Root workflow with children, barely started, idle for a long window.
    AbandonedWorkflow,
    /// The declared parent no longer resolves.
    OrphanedTask,
    /// A mandatory prerequisite failed or was cancelled.
    DependencyFailure,
}

impl StaleReason {
    /// Returns the storage representation.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::InactivityTimeout => "INACTIVITY_TIMEOUT",
            Self::AbandonedWorkflow => "ABANDONED_WORKFLOW",
            Self::OrphanedTask => "ORPHANED_TASK",
            Self::DependencyFailure => "DEPENDENCY_FAILURE",
        }
    }

    /// Returns the action recommended for this reason.
    #[must_use]
    pub const fn recommended_action(self) -> RecommendedAction {
        match self {
            Self::InactivityTimeout => RecommendedAction::NotifySpecialist,
            Self::AbandonedWorkflow => RecommendedAction::ArchiveWorkflow,
            Self::OrphanedTask => RecommendedAction::ReparentOrArchive,
            Self::DependencyFailure => RecommendedAction::ReviewDependencies,
        }
    }
}

impl fmt::Display for StaleReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Follow-up suggested for a finding.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RecommendedAction {
    /// Ping the assigned specialist.
    NotifySpecialist,
    /// Archive the whole workflow.
    ArchiveWorkflow,
    /// Move the task under a live parent or archive it.
    ReparentOrArchive,
    /// Re-plan, waive, or replace the failed prerequisites.
    ReviewDependencies,
}

impl RecommendedAction {
    /// Returns the storage representation.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::NotifySpecialist => "NOTIFY_SPECIALIST",
            Self::ArchiveWorkflow => "ARCHIVE_WORKFLOW",
            Self::ReparentOrArchive => "REPARENT_OR_ARCHIVE",
            Self::ReviewDependencies => "REVIEW_DEPENDENCIES",
        }
    }
}

/// One flagged task.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StaleTaskFinding {
    /// Flagged task.
    pub task_id: TaskId,
    /// Task title, for reports.
    pub title: String,
    /// Assigned specialist role.
    pub specialist_type: Option<SpecialistType>,
    /// Why the task was flagged.
    pub reason: StaleReason,
    /// Time since the last update.
    #[serde(with = "crate::task::duration_secs")]
    pub inactive_for: Duration,
    /// Suggested follow-up.
    pub recommended_action: RecommendedAction,
}

impl StaleTaskFinding {
    fn new(task: &Task, reason: StaleReason, now: DateTime<Utc>) -> Self {
        Self {
            task_id: task.id(),
            title: task.title().to_owned(),
            specialist_type: task.specialist_type(),
            reason,
            inactive_for: elapsed_since(task.updated_at(), now),
            recommended_action: reason.recommended_action(),
        }
    }
}

fn elapsed_since(instant: DateTime<Utc>, now: DateTime<Utc>) -> Duration {
    (now - instant).to_std().unwrap_or(Duration::ZERO)
}

fn cutoff(now: DateTime<Utc>, threshold: Duration) -> DateTime<Utc> {
    chrono::Duration::from_std(threshold)
        .ok()
        .and_then(|span| now.checked_sub_signed(span))
        .unwrap_or(DateTime::<Utc>::MIN_UTC)
}

/// Scans the repository for tasks whose progress has stopped.
#[derive(Clone)]
pub struct StaleTaskDetector<R, C>
where
    R: TaskRepository,
    C: Clock + Send + Sync,
{
    repository: Arc<R>,
    clock: Arc<C>,
    config: StaleDetectionConfig,
}

impl<R, C> StaleTaskDetector<R, C>
where
    R: TaskRepository,
    C: Clock + Send + Sync,
{
    /// Creates a detector.
    #[must_use]
    pub const fn new(repository: Arc<R>, clock: Arc<C>, config: StaleDetectionConfig) -> Self {
        Self {
            repository,
            clock,
            config,
        }
    }

    /// Returns the active thresholds.
    #[must_use]
    pub const fn config(&self) -> &StaleDetectionConfig {
        &self.config
    }

    /// Flags open tasks idle beyond their specialist's threshold.
    pub async fn detect_stale_tasks(&self) -> Vec<StaleTaskFinding> {
        let now = self.clock.utc();
        match self.inactive_tasks(now).await {
            Ok(findings) => findings,
            Err(err) => {
                error!(error = %err, "stale task scan failed");
                Vec::new()
            }
        }
    }

    /// Runs the inactivity scan plus the abandoned, orphaned, and
    /// dependency-failure heuristics.
    pub async fn detect_comprehensive(&self) -> Vec<StaleTaskFinding> {
        let now = self.clock.utc();
        let scans = async {
            let mut findings = self.inactive_tasks(now).await?;
            findings.extend(self.abandoned_workflows(now).await?);
            let open = self
                .repository
                .query(&TaskQuery::new().open_only(), Page::all())
                .await?;
            findings.extend(self.orphaned_tasks(&open, now).await?);
            findings.extend(self.dependency_failures(&open, now).await?);
            Ok::<_, TaskRepositoryError>(findings)
        };
        match scans.await {
            Ok(findings) => {
                debug!(count = findings.len(), "comprehensive stale scan finished");
                findings
            }
            Err(err) => {
                error!(error = %err, "comprehensive stale task scan failed");
                Vec::new()
            }
        }
    }

    async fn inactive_tasks(&self, now: DateTime<Utc>) -> TaskRepositoryResult<Vec<StaleTaskFinding>> {
        let mut findings = Vec::new();
        for (specialist, threshold) in &self.config.specialist_thresholds {
            let query = TaskQuery::new()
                .open_only()
                .with_specialist(*specialist)
                .updated_before(cutoff(now, *threshold));
            let tasks = self.repository.query(&query, Page::all()).await?;
            findings.extend(
                tasks
                    .iter()
                    .map(|task| StaleTaskFinding::new(task, StaleReason::InactivityTimeout, now)),
            );
        }

        let query = TaskQuery::new()
            .open_only()
            .updated_before(cutoff(now, self.config.default_threshold));
        let unmapped = self.repository.query(&query, Page::all()).await?;
        findings.extend(
            unmapped
                .iter()
                .filter(|task| {
                    task.specialist_type()
                        .is_none_or(|specialist| !self.config.specialist_thresholds.contains_key(&specialist))
                })
                .map(|task| StaleTaskFinding::new(task, StaleReason::InactivityTimeout, now)),
        );

        findings.sort_by(|left, right| {
            right
                .inactive_for
                .cmp(&left.inactive_for)
                .then_with(|| left.task_id.cmp(&right.task_id))
        });
        Ok(findings)
    }

    async fn abandoned_workflows(
        &self,
        now: DateTime<Utc>,
    ) -> TaskRepositoryResult<Vec<StaleTaskFinding>> {
        let query = TaskQuery::new()
            .open_only()
            .roots()
            .updated_before(cutoff(now, self.config.abandoned_window));
        let roots = self.repository.query(&query, Page::all()).await?;
        let mut findings = Vec::new();
        for root in roots
            .iter()
            .filter(|root| root.progress_percent() < self.config.abandoned_progress_ceiling)
        {
            let children = self
                .repository
                .query(&TaskQuery::new().children_of(root.id()), Page::new(1, 0))
                .await?;
            if !children.is_empty() {
                findings.push(StaleTaskFinding::new(root, StaleReason::AbandonedWorkflow, now));
            }
        }
        Ok(findings)
    }

    async fn orphaned_tasks(
        &self,
        open: &[Task],
        now: DateTime<Utc>,
    ) -> TaskRepositoryResult<Vec<StaleTaskFinding>> {
        let mut findings = Vec::new();
        for task in open {
            let Some(parent_id) = task.parent_task_id() else {
                continue;
            };
            if self.repository.find_by_id(parent_id).await?.is_none() {
                findings.push(StaleTaskFinding::new(task, StaleReason::OrphanedTask, now));
            }
        }
        Ok(findings)
    }

    async fn dependency_failures(
        &self,
        open: &[Task],
        now: DateTime<Utc>,
    ) -> TaskRepositoryResult<Vec<StaleTaskFinding>> {
        let mut findings = Vec::new();
        for task in open {
            let prerequisites: BTreeSet<TaskId> = task
                .dependencies()
                .iter()
                .filter(|edge| edge.is_mandatory() && edge.status() == DependencyStatus::Pending)
                .map(TaskDependency::prerequisite_task_id)
                .collect();
            for prerequisite_id in prerequisites {
                let failed = self
                    .repository
                    .find_by_id(prerequisite_id)
                    .await?
                    .is_some_and(|prerequisite| {
                        matches!(prerequisite.status(), TaskStatus::Failed | TaskStatus::Cancelled)
                    });
                if failed {
                    findings.push(StaleTaskFinding::new(task, StaleReason::DependencyFailure, now));
                    break;
                }
            }
        }
        Ok(findings)
    }
}
