//! Shared helpers for in-memory task graph integration tests.

use std::collections::HashSet;
use std::sync::Arc;

use mockable::DefaultClock;
use rstest::fixture;
use trellis::task::{
    adapters::memory::{InMemoryArtifactStore, InMemoryTaskRepository},
    domain::{Task, TaskId, TaskType},
    ports::DependencyGraph,
    services::{ArchivalManager, CreateTaskRequest, TaskLifecycleService, TransitionTaskRequest},
};

/// Lifecycle service over the in-memory repository.
pub type TestService = TaskLifecycleService<InMemoryTaskRepository, DefaultClock>;

/// Archival manager over the in-memory adapters.
pub type TestArchival = ArchivalManager<InMemoryTaskRepository, InMemoryArtifactStore, DefaultClock>;

/// Adapters and services sharing one in-memory store.
pub struct Workspace {
    /// Backing repository.
    pub repository: Arc<InMemoryTaskRepository>,
    /// Backing artifact store.
    pub artifacts: Arc<InMemoryArtifactStore>,
    /// Lifecycle service bound to `repository`.
    pub service: TestService,
}

impl Workspace {
    /// Builds an archival manager over the workspace adapters.
    #[must_use]
    pub fn archival(&self) -> TestArchival {
        ArchivalManager::new(
            Arc::clone(&self.repository),
            Arc::clone(&self.artifacts),
            Arc::new(DefaultClock),
        )
    }

    /// Creates a task, optionally under `parent`.
    ///
    /// # Errors
    ///
    /// Returns an error if the service rejects the request.
    pub async fn create(
        &self,
        title: &str,
        task_type: TaskType,
        parent: Option<TaskId>,
    ) -> eyre::Result<Task> {
        let mut request = CreateTaskRequest::new(title, task_type);
        if let Some(parent_id) = parent {
            request = request.with_parent(parent_id);
        }
        Ok(self.service.create_task(request).await?)
    }

    /// Walks a task through the named stages in order.
    ///
    /// # Errors
    ///
    /// Returns an error if any transition is rejected.
    pub async fn walk(&self, task_id: TaskId, stages: &[&str]) -> eyre::Result<Task> {
        let mut current = None;
        for stage in stages {
            current = Some(
                self.service
                    .transition_task(TransitionTaskRequest::new(task_id, *stage, "agent-1"))
                    .await?,
            );
        }
        current.ok_or_else(|| eyre::eyre!("no stages given for {task_id}"))
    }

    /// Drives a freshly created task to completion.
    ///
    /// # Errors
    ///
    /// Returns an error if any transition is rejected.
    pub async fn complete(&self, task_id: TaskId) -> eyre::Result<Task> {
        self.walk(task_id, &["planning", "ready", "active", "completed"])
            .await
    }
}

/// Provides a fresh workspace for each test.
#[fixture]
pub fn workspace() -> Workspace {
    let repository = Arc::new(InMemoryTaskRepository::new());
    let service = TaskLifecycleService::new(Arc::clone(&repository), Arc::new(DefaultClock));
    Workspace {
        repository,
        artifacts: Arc::new(InMemoryArtifactStore::new()),
        service,
    }
}

/// Returns whether no dependent can reach itself through its prerequisites.
#[must_use]
pub fn is_acyclic(graph: &DependencyGraph) -> bool {
    graph.keys().all(|start| {
        let mut seen = HashSet::new();
        let mut stack: Vec<TaskId> = graph.get(start).cloned().unwrap_or_default();
        while let Some(current) = stack.pop() {
            if current == *start {
                return false;
            }
            if seen.insert(current) {
                stack.extend(graph.get(&current).into_iter().flatten().copied());
            }
        }
        true
    })
}
