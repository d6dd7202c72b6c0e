//! Request-object façade over the task repository.
//!
//! Protocol front-ends and the template-instantiation engine drive the task
//! graph through this service rather than assembling aggregates themselves.

use crate::task::{
    domain::{
        ArtifactRef, AttributeType, AttributeValue, Complexity, DependencyId, DependencyType,
        LifecycleStage, ParseLifecycleStageError, SpecialistType, Task, TaskAttribute,
        TaskDependency, TaskDomainError, TaskId, TaskStatus, TaskType,
    },
    ports::{TaskRepository, TaskRepositoryError},
};
use mockable::Clock;
use serde_json::{Map, Value};
use std::sync::Arc;
use thiserror::Error;

/// Request payload for creating a task.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CreateTaskRequest {
    title: String,
    task_type: TaskType,
    description: Option<String>,
    parent_task_id: Option<TaskId>,
    specialist_type: Option<SpecialistType>,
    assigned_to: Option<String>,
    complexity: Option<Complexity>,
    estimated_effort_minutes: Option<u32>,
    tags: Vec<String>,
    context: Map<String, Value>,
    configuration: Map<String, Value>,
}

impl CreateTaskRequest {
    /// Creates a request for a root task.
    #[must_use]
    pub fn new(title: impl Into<String>, task_type: TaskType) -> Self {
        Self {
            title: title.into(),
            task_type,
            description: None,
            parent_task_id: None,
            specialist_type: None,
            assigned_to: None,
            complexity: None,
            estimated_effort_minutes: None,
            tags: Vec::new(),
            context: Map::new(),
            configuration: Map::new(),
        }
    }

    /// Places the task under `parent`.
    #[must_use]
    pub const fn with_parent(mut self, parent: TaskId) -> Self {
        self.parent_task_id = Some(parent);
        self
    }

    /// Sets the description.
    #[must_use]
    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    /// Assigns a specialist role.
    #[must_use]
    pub const fn with_specialist(mut self, specialist_type: SpecialistType) -> Self {
        self.specialist_type = Some(specialist_type);
        self
    }

    /// Assigns a concrete assignee.
    #[must_use]
    pub fn with_assignee(mut self, assignee: impl Into<String>) -> Self {
        self.assigned_to = Some(assignee.into());
        self
    }

    /// Sets complexity and effort estimate.
    #[must_use]
    pub const fn with_estimate(mut self, complexity: Complexity, minutes: Option<u32>) -> Self {
        self.complexity = Some(complexity);
        self.estimated_effort_minutes = minutes;
        self
    }

    /// Sets tags.
    #[must_use]
    pub fn with_tags(mut self, tags: impl IntoIterator<Item = String>) -> Self {
        self.tags = tags.into_iter().collect();
        self
    }

    /// Sets the context map.
    #[must_use]
    pub fn with_context(mut self, context: Map<String, Value>) -> Self {
        self.context = context;
        self
    }

    /// Sets the configuration map.
    #[must_use]
    pub fn with_configuration(mut self, configuration: Map<String, Value>) -> Self {
        self.configuration = configuration;
        self
    }
}

/// Request payload for an explicit stage transition.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransitionTaskRequest {
    task_id: TaskId,
    target_stage: String,
    actor: String,
}

impl TransitionTaskRequest {
    /// Creates a request; the stage is parsed when the request is handled.
    #[must_use]
    pub fn new(task_id: TaskId, target_stage: impl Into<String>, actor: impl Into<String>) -> Self {
        Self {
            task_id,
            target_stage: target_stage.into(),
            actor: actor.into(),
        }
    }
}

/// Request payload for adding a typed attribute from raw text.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AddAttributeRequest {
    task_id: TaskId,
    name: String,
    attribute_type: AttributeType,
    raw_value: String,
    category: Option<String>,
    indexed: bool,
    actor: String,
}

impl AddAttributeRequest {
    /// Creates a request for an unindexed, uncategorized attribute.
    #[must_use]
    pub fn new(
        task_id: TaskId,
        name: impl Into<String>,
        attribute_type: AttributeType,
        raw_value: impl Into<String>,
        actor: impl Into<String>,
    ) -> Self {
        Self {
            task_id,
            name: name.into(),
            attribute_type,
            raw_value: raw_value.into(),
            category: None,
            indexed: false,
            actor: actor.into(),
        }
    }

    /// Sets the category.
    #[must_use]
    pub fn with_category(mut self, category: impl Into<String>) -> Self {
        self.category = Some(category.into());
        self
    }

    /// Makes the attribute searchable.
    #[must_use]
    pub const fn indexed(mut self) -> Self {
        self.indexed = true;
        self
    }
}

/// Request payload for adding a dependency edge.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AddDependencyRequest {
    dependent_task_id: TaskId,
    prerequisite_task_id: TaskId,
    dependency_type: DependencyType,
    data_binding: Option<(String, String)>,
    mandatory: bool,
}

impl AddDependencyRequest {
    /// Creates a mandatory edge request.
    #[must_use]
    pub const fn new(
        dependent_task_id: TaskId,
        prerequisite_task_id: TaskId,
        dependency_type: DependencyType,
    ) -> Self {
        Self {
            dependent_task_id,
            prerequisite_task_id,
            dependency_type,
            data_binding: None,
            mandatory: true,
        }
    }

    /// Binds a prerequisite artifact to a dependent parameter.
    #[must_use]
    pub fn with_data_binding(
        mut self,
        output_artifact: impl Into<String>,
        input_parameter: impl Into<String>,
    ) -> Self {
        self.data_binding = Some((output_artifact.into(), input_parameter.into()));
        self
    }

    /// Marks the edge as informational.
    #[must_use]
    pub const fn optional(mut self) -> Self {
        self.mandatory = false;
        self
    }
}

/// Service-level errors for task lifecycle operations.
#[derive(Debug, Error)]
pub enum TaskLifecycleError {
    /// Domain validation failed.
    #[error(transparent)]
    Domain(#[from] TaskDomainError),
    /// Repository operation failed.
    #[error(transparent)]
    Repository(#[from] TaskRepositoryError),
    /// The requested stage name is unknown.
    #[error(transparent)]
    InvalidStage(#[from] ParseLifecycleStageError),
    /// The task or its requested parent does not exist.
    #[error("task not found: {0}")]
    NotFound(TaskId),
}

/// Result type for task lifecycle service operations.
pub type TaskLifecycleResult<T> = Result<T, TaskLifecycleError>;

/// Task lifecycle orchestration service.
#[derive(Clone)]
pub struct TaskLifecycleService<R, C>
where
    R: TaskRepository,
    C: Clock + Send + Sync,
{
    repository: Arc<R>,
    clock: Arc<C>,
}

impl<R, C> TaskLifecycleService<R, C>
where
    R: TaskRepository,
    C: Clock + Send + Sync,
{
    /// Creates a new task lifecycle service.
    #[must_use]
    pub const fn new(repository: Arc<R>, clock: Arc<C>) -> Self {
        Self { repository, clock }
    }

    /// Creates and stores a task.
    ///
    /// # Errors
    ///
    /// Returns [`TaskLifecycleError::NotFound`] when the requested parent
    /// does not exist, or a domain or repository error.
    pub async fn create_task(&self, request: CreateTaskRequest) -> TaskLifecycleResult<Task> {
        let mut task = Task::new(request.title, request.task_type, &*self.clock)?
            .with_tags(request.tags)
            .with_context(request.context)
            .with_configuration(request.configuration);
        if let Some(parent_id) = request.parent_task_id {
            let parent = self.load(parent_id).await?;
            task = task.with_parent(&parent);
        }
        if let Some(description) = request.description {
            task = task.with_description(description);
        }
        if let Some(specialist) = request.specialist_type {
            task = task.with_specialist(specialist);
        }
        if let Some(assignee) = request.assigned_to {
            task = task.with_assignee(assignee);
        }
        if let Some(complexity) = request.complexity {
            task = task.with_estimate(complexity, request.estimated_effort_minutes);
        }
        Ok(self.repository.create(&task).await?)
    }

    /// Moves a task to a named stage through the state machine.
    ///
    /// # Errors
    ///
    /// Returns [`TaskLifecycleError::InvalidStage`] for an unknown stage
    /// name, [`TaskLifecycleError::Domain`] for a forbidden transition, or
    /// [`TaskLifecycleError::NotFound`] when the task does not exist.
    pub async fn transition_task(&self, request: TransitionTaskRequest) -> TaskLifecycleResult<Task> {
        let target = LifecycleStage::try_from(request.target_stage.as_str())?;
        let mut task = self.load(request.task_id).await?;
        task.transition_to(target, &request.actor, &*self.clock)?;
        Ok(self.repository.update(&task).await?)
    }

    /// Sets a status directly and lets the repository reconcile the stage.
    ///
    /// # Errors
    ///
    /// Returns [`TaskLifecycleError::NotFound`] when the task does not
    /// exist, or a repository error when reconciliation is impossible.
    pub async fn update_status(
        &self,
        task_id: TaskId,
        status: TaskStatus,
        actor: &str,
    ) -> TaskLifecycleResult<Task> {
        let mut task = self.load(task_id).await?;
        task.set_status(status, actor, &*self.clock);
        Ok(self.repository.update(&task).await?)
    }

    /// Parses and adds a typed attribute.
    ///
    /// # Errors
    ///
    /// Returns [`TaskLifecycleError::Domain`] when the name or raw value is
    /// invalid for the declared type.
    pub async fn add_attribute(&self, request: AddAttributeRequest) -> TaskLifecycleResult<Task> {
        let value = AttributeValue::parse(&request.name, request.attribute_type, &request.raw_value)?;
        let mut attribute = TaskAttribute::new(request.name, value, self.clock.utc())?;
        if let Some(category) = request.category {
            attribute = attribute.with_category(category);
        }
        if request.indexed {
            attribute = attribute.indexed();
        }
        let mut task = self.load(request.task_id).await?;
        task.add_attribute(attribute, &request.actor, &*self.clock);
        Ok(self.repository.update(&task).await?)
    }

    /// Adds a dependency edge after the repository's cycle check.
    ///
    /// # Errors
    ///
    /// Returns a repository error for missing endpoints, duplicates, or
    /// cycles, and a domain error for malformed edges.
    pub async fn add_dependency(
        &self,
        request: AddDependencyRequest,
    ) -> TaskLifecycleResult<TaskDependency> {
        let mut dependency = TaskDependency::new(
            request.dependent_task_id,
            request.prerequisite_task_id,
            request.dependency_type,
            self.clock.utc(),
        );
        if let Some((artifact, parameter)) = request.data_binding {
            dependency = dependency.with_data_binding(artifact, parameter);
        }
        if !request.mandatory {
            dependency = dependency.optional();
        }
        dependency.validate()?;
        Ok(self.repository.add_dependency(&dependency).await?)
    }

    /// Waives a dependency edge.
    ///
    /// # Errors
    ///
    /// Returns a repository error when the edge does not exist or is
    /// already waived.
    pub async fn waive_dependency(
        &self,
        dependency_id: DependencyId,
        waived_by: &str,
        reason: &str,
    ) -> TaskLifecycleResult<TaskDependency> {
        Ok(self
            .repository
            .waive_dependency(dependency_id, waived_by, reason)
            .await?)
    }

    /// Attaches a named output artifact to a task.
    ///
    /// # Errors
    ///
    /// Returns [`TaskLifecycleError::NotFound`] when the task does not
    /// exist or [`TaskLifecycleError::Domain`] for a blank name.
    pub async fn attach_artifact(
        &self,
        task_id: TaskId,
        name: &str,
        reference: ArtifactRef,
        actor: &str,
    ) -> TaskLifecycleResult<Task> {
        let mut task = self.load(task_id).await?;
        task.attach_artifact(name, reference, actor, &*self.clock)?;
        Ok(self.repository.update(&task).await?)
    }

    /// Retrieves a visible task.
    ///
    /// # Errors
    ///
    /// Returns [`TaskLifecycleError::Repository`] when the lookup fails.
    pub async fn find_task(&self, task_id: TaskId) -> TaskLifecycleResult<Option<Task>> {
        Ok(self.repository.find_by_id(task_id).await?)
    }

    async fn load(&self, task_id: TaskId) -> TaskLifecycleResult<Task> {
        self.repository
            .find_by_id(task_id)
            .await?
            .ok_or(TaskLifecycleError::NotFound(task_id))
    }
}
