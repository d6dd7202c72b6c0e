//! Shared world state for task lifecycle BDD scenarios.

use std::collections::HashMap;
use std::sync::Arc;

use mockable::DefaultClock;
use rstest::fixture;
use trellis::task::{
    adapters::memory::InMemoryTaskRepository,
    domain::{Task, TaskDependency, TaskId},
    services::{TaskLifecycleError, TaskLifecycleService},
};

/// Service type used by the BDD world.
pub type TestTaskService = TaskLifecycleService<InMemoryTaskRepository, DefaultClock>;

/// Scenario world for lifecycle and dependency behaviour tests.
pub struct LifecycleWorld {
    pub repository: Arc<InMemoryTaskRepository>,
    pub service: TestTaskService,
    pub tasks_by_title: HashMap<String, TaskId>,
    pub last_task: Option<TaskId>,
    pub last_transition_result: Option<Result<Task, TaskLifecycleError>>,
    pub last_dependency_result: Option<Result<TaskDependency, TaskLifecycleError>>,
}

impl LifecycleWorld {
    /// Creates a world over an empty repository.
    #[must_use]
    pub fn new() -> Self {
        let repository = Arc::new(InMemoryTaskRepository::new());
        let service = TaskLifecycleService::new(Arc::clone(&repository), Arc::new(DefaultClock));
        Self {
            repository,
            service,
            tasks_by_title: HashMap::new(),
            last_task: None,
            last_transition_result: None,
            last_dependency_result: None,
        }
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

    /// Returns the most recently created task.
    ///
    /// # Errors
    ///
    /// Returns an error if the scenario has not created a task.
    pub fn current_task(&self) -> Result<TaskId, eyre::Report> {
        self.last_task
            .ok_or_else(|| eyre::eyre!("missing created task in scenario world"))
    }
}

impl Default for LifecycleWorld {
    fn default() -> Self {
        Self::new()
    }
}

/// Fixture that creates a new scenario world.
#[fixture]
pub fn world() -> LifecycleWorld {
    LifecycleWorld::default()
}

/// Runs an async operation within sync step definitions.
pub fn run_async<T>(future: impl std::future::Future<Output = T>) -> T {
    tokio::task::block_in_place(|| tokio::runtime::Handle::current().block_on(future))
}
