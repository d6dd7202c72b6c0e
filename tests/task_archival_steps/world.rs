//! Shared world state for archival BDD scenarios.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use chrono::{DateTime, Local, TimeZone, Utc};
use mockable::Clock;
use rstest::fixture;
use trellis::task::{
    adapters::memory::{InMemoryArtifactStore, InMemoryTaskRepository},
    domain::TaskId,
    services::{
        ArchivalManager, ArchiveResult, CleanupRecommendation, StaleDetectionConfig,
        StaleTaskDetector, StaleTaskFinding,
    },
};

/// Clock that only moves when a step moves it.
#[derive(Debug)]
pub struct ScenarioClock {
    now: Mutex<DateTime<Utc>>,
}

impl ScenarioClock {
    fn starting_at(now: DateTime<Utc>) -> Self {
        Self {
            now: Mutex::new(now),
        }
    }

    /// Moves the clock forward.
    pub fn advance(&self, span: chrono::Duration) {
        if let Ok(mut now) = self.now.lock() {
            *now += span;
        }
    }
}

impl Clock for ScenarioClock {
    fn local(&self) -> DateTime<Local> {
        self.utc().with_timezone(&Local)
    }

    fn utc(&self) -> DateTime<Utc> {
        self.now.lock().map(|now| *now).unwrap_or_default()
    }
}

/// Repository type used by the BDD world.
pub type ScenarioRepository = InMemoryTaskRepository<ScenarioClock>;

/// Scenario world for archival and stale detection behaviour tests.
pub struct ArchivalWorld {
    pub clock: Arc<ScenarioClock>,
    pub repository: Arc<ScenarioRepository>,
    pub artifacts: Arc<InMemoryArtifactStore>,
    pub tasks_by_title: HashMap<String, TaskId>,
    pub workflows: HashMap<String, Vec<TaskId>>,
    pub archive_result: Option<ArchiveResult>,
    pub stale_findings: Vec<StaleTaskFinding>,
    pub recommendations: Vec<CleanupRecommendation>,
}

impl ArchivalWorld {
    /// Creates a world over an empty repository with a fixed start time.
    #[must_use]
    pub fn new() -> Self {
        let start = Utc
            .with_ymd_and_hms(2025, 6, 2, 8, 0, 0)
            .single()
            .unwrap_or_default();
        let clock = Arc::new(ScenarioClock::starting_at(start));
        Self {
            repository: Arc::new(InMemoryTaskRepository::with_clock(Arc::clone(&clock))),
            clock,
            artifacts: Arc::new(InMemoryArtifactStore::new()),
            tasks_by_title: HashMap::new(),
            workflows: HashMap::new(),
            archive_result: None,
            stale_findings: Vec::new(),
            recommendations: Vec::new(),
        }
    }

    /// Builds an archival manager over the world's adapters.
    #[must_use]
    pub fn archival(&self) -> ArchivalManager<ScenarioRepository, InMemoryArtifactStore, ScenarioClock> {
        ArchivalManager::new(
            Arc::clone(&self.repository),
            Arc::clone(&self.artifacts),
            Arc::clone(&self.clock),
        )
    }

    /// Builds a stale detector with default thresholds.
    #[must_use]
    pub fn detector(&self) -> StaleTaskDetector<ScenarioRepository, ScenarioClock> {
        StaleTaskDetector::new(
            Arc::clone(&self.repository),
            Arc::clone(&self.clock),
            StaleDetectionConfig::default(),
        )
    }

    /// Resolves a task created earlier in the scenario.
    ///
    /// # Errors
    ///
    /// Returns an error if no task with `title` was created.
    pub fn task_id(&self, title: &str) -> Result<TaskId, eyre::Report> {
        self.tasks_by_title
            .get(title)
            .copied()
            .ok_or_else(|| eyre::eyre!("no task titled {title:?} in scenario world"))
    }
}

impl Default for ArchivalWorld {
    fn default() -> Self {
        Self::new()
    }
}

/// Fixture that creates a new scenario world.
#[fixture]
pub fn world() -> ArchivalWorld {
    ArchivalWorld::default()
}

/// Runs an async operation within sync step definitions.
pub fn run_async<T>(future: impl std::future::Future<Output = T>) -> T {
    tokio::task::block_in_place(|| tokio::runtime::Handle::current().block_on(future))
}
