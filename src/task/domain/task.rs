//! Task aggregate root.
//!
//! A [`Task`] travels in memory together with its attributes, inbound
//! dependency edges, audit events, and (optionally) loaded children. In
//! storage those collections live in separate side tables; the thin core row
//! is described by [`PersistedTaskData`], and adapters assemble or decompose
//! the aggregate explicitly.

use super::{
    ArchiveInstruction, ArchiveRecord, ArtifactRef, AttributeValue, Complexity, DependencyCheck,
    DependencyType, EventCategory, EventId, HierarchyPath, LifecycleStage, SYSTEM_ACTOR,
    SpecialistType, StageReconciliation, TaskAttribute, TaskDependency, TaskDomainError,
    TaskEvent, TaskEventType, TaskId, TaskStatus, TaskType, reconcile_stage,
};
use chrono::{DateTime, Utc};
use mockable::Clock;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value, json};
use std::collections::{BTreeMap, HashSet};
use tracing::warn;

/// Maximum progress value.
pub const MAX_PROGRESS_PERCENT: u8 = 100;

/// Task aggregate root.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Task {
    id: TaskId,
    parent_task_id: Option<TaskId>,
    hierarchy_path: HierarchyPath,
    hierarchy_level: u32,
    title: String,
    description: Option<String>,
    task_type: TaskType,
    status: TaskStatus,
    lifecycle_stage: LifecycleStage,
    specialist_type: Option<SpecialistType>,
    assigned_to: Option<String>,
    complexity: Option<Complexity>,
    estimated_effort_minutes: Option<u32>,
    actual_effort_minutes: Option<u32>,
    progress_percent: u8,
    context: Map<String, Value>,
    configuration: Map<String, Value>,
    tags: Vec<String>,
    artifacts: BTreeMap<String, ArtifactRef>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
    started_at: Option<DateTime<Utc>>,
    completed_at: Option<DateTime<Utc>>,
    deleted: bool,
    #[serde(default)]
    attributes: Vec<TaskAttribute>,
    #[serde(default)]
    dependencies: Vec<TaskDependency>,
    #[serde(default, skip_serializing)]
    events: Vec<TaskEvent>,
    #[serde(default, skip_serializing)]
    children: Vec<Task>,
}

/// Thin core row of a task, without side-table collections.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PersistedTaskData {
    /// Task identifier.
    pub id: TaskId,
    /// Parent identifier, `None` for roots.
    pub parent_task_id: Option<TaskId>,
    /// Materialized hierarchy path.
    pub hierarchy_path: HierarchyPath,
    /// Depth below the root.
    pub hierarchy_level: u32,
    /// Title.
    pub title: String,
    /// Description.
    pub description: Option<String>,
    /// Kind of work.
    pub task_type: TaskType,
    /// Fine-grained status.
    pub status: TaskStatus,
    /// Coarse lifecycle stage.
    pub lifecycle_stage: LifecycleStage,
    /// Specialist role assigned to the task.
    pub specialist_type: Option<SpecialistType>,
    /// Concrete assignee.
    pub assigned_to: Option<String>,
    /// Estimated difficulty.
    pub complexity: Option<Complexity>,
    /// Estimated effort.
    pub estimated_effort_minutes: Option<u32>,
    /// Recorded effort.
    pub actual_effort_minutes: Option<u32>,
    /// Completion percentage.
    pub progress_percent: u8,
    /// Free-form context.
    pub context: Map<String, Value>,
    /// Free-form configuration.
    pub configuration: Map<String, Value>,
    /// Tags.
    pub tags: Vec<String>,
    /// Output artifacts by name.
    pub artifacts: BTreeMap<String, ArtifactRef>,
    /// Creation timestamp.
    pub created_at: DateTime<Utc>,
    /// Last update timestamp.
    pub updated_at: DateTime<Utc>,
    /// First activation timestamp.
    pub started_at: Option<DateTime<Utc>>,
    /// Resolution timestamp.
    pub completed_at: Option<DateTime<Utc>>,
    /// Soft-delete flag.
    pub deleted: bool,
}

impl Task {
    /// Creates a root task in the [`LifecycleStage::Created`] stage.
    ///
    /// # Errors
    ///
    /// Returns [`TaskDomainError::EmptyTitle`] when the title is blank.
    pub fn new(
        title: impl Into<String>,
        task_type: TaskType,
        clock: &impl Clock,
    ) -> Result<Self, TaskDomainError> {
        let raw_title = title.into();
        let trimmed = raw_title.trim();
        if trimmed.is_empty() {
            return Err(TaskDomainError::EmptyTitle);
        }
        let id = TaskId::new();
        let timestamp = clock.utc();
        let mut task = Self {
            id,
            parent_task_id: None,
            hierarchy_path: HierarchyPath::root(id),
            hierarchy_level: 0,
            title: trimmed.to_owned(),
            description: None,
            task_type,
            status: TaskStatus::Pending,
            lifecycle_stage: LifecycleStage::Created,
            specialist_type: None,
            assigned_to: None,
            complexity: None,
            estimated_effort_minutes: None,
            actual_effort_minutes: None,
            progress_percent: 0,
            context: Map::new(),
            configuration: Map::new(),
            tags: Vec::new(),
            artifacts: BTreeMap::new(),
            created_at: timestamp,
            updated_at: timestamp,
            started_at: None,
            completed_at: None,
            deleted: false,
            attributes: Vec::new(),
            dependencies: Vec::new(),
            events: Vec::new(),
            children: Vec::new(),
        };
        let payload = json!({ "title": task.title, "task_type": task_type.as_str() });
        task.push_event(
            TaskEventType::Created,
            EventCategory::Lifecycle,
            SYSTEM_ACTOR,
            payload,
            timestamp,
        );
        Ok(task)
    }

    /// Places the new task beneath `parent`.
    #[must_use]
    pub fn with_parent(mut self, parent: &Self) -> Self {
        self.relocate(Some(parent.id), parent.hierarchy_path.child(self.id));
        self
    }

    /// Sets the description.
    #[must_use]
    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    /// Sets the specialist role.
    #[must_use]
    pub const fn with_specialist(mut self, specialist_type: SpecialistType) -> Self {
        self.specialist_type = Some(specialist_type);
        self
    }

    /// Sets the concrete assignee.
    #[must_use]
    pub fn with_assignee(mut self, assignee: impl Into<String>) -> Self {
        self.assigned_to = Some(assignee.into());
        self
    }

    /// Sets complexity and estimated effort.
    #[must_use]
    pub const fn with_estimate(
        mut self,
        complexity: Complexity,
        estimated_effort_minutes: Option<u32>,
    ) -> Self {
        self.complexity = Some(complexity);
        self.estimated_effort_minutes = estimated_effort_minutes;
        self
    }

    /// Sets the tags, removing duplicates.
    #[must_use]
    pub fn with_tags(mut self, tags: impl IntoIterator<Item = String>) -> Self {
        let mut collected: Vec<String> = tags.into_iter().collect();
        collected.sort();
        collected.dedup();
        self.tags = collected;
        self
    }

    /// Sets the free-form context map.
    #[must_use]
    pub fn with_context(mut self, context: Map<String, Value>) -> Self {
        self.context = context;
        self
    }

    /// Sets the free-form configuration map.
    #[must_use]
    pub fn with_configuration(mut self, configuration: Map<String, Value>) -> Self {
        self.configuration = configuration;
        self
    }

    /// Reconstructs a task from its persisted core row.
    ///
    /// A hierarchy path that violates its invariant is repaired and a
    /// [`TaskEventType::HierarchyCorrected`] event is recorded.
    #[must_use]
    pub fn from_persisted(data: PersistedTaskData, clock: &impl Clock) -> Self {
        let mut task = Self {
            id: data.id,
            parent_task_id: data.parent_task_id,
            hierarchy_path: data.hierarchy_path,
            hierarchy_level: data.hierarchy_level,
            title: data.title,
            description: data.description,
            task_type: data.task_type,
            status: data.status,
            lifecycle_stage: data.lifecycle_stage,
            specialist_type: data.specialist_type,
            assigned_to: data.assigned_to,
            complexity: data.complexity,
            estimated_effort_minutes: data.estimated_effort_minutes,
            actual_effort_minutes: data.actual_effort_minutes,
            progress_percent: data.progress_percent.min(MAX_PROGRESS_PERCENT),
            context: data.context,
            configuration: data.configuration,
            tags: data.tags,
            artifacts: data.artifacts,
            created_at: data.created_at,
            updated_at: data.updated_at,
            started_at: data.started_at,
            completed_at: data.completed_at,
            deleted: data.deleted,
            attributes: Vec::new(),
            dependencies: Vec::new(),
            events: Vec::new(),
            children: Vec::new(),
        };
        task.repair_hierarchy(clock);
        task
    }

    /// Decomposes the aggregate into its thin core row.
    #[must_use]
    pub fn to_persisted(&self) -> PersistedTaskData {
        PersistedTaskData {
            id: self.id,
            parent_task_id: self.parent_task_id,
            hierarchy_path: self.hierarchy_path.clone(),
            hierarchy_level: self.hierarchy_level,
            title: self.title.clone(),
            description: self.description.clone(),
            task_type: self.task_type,
            status: self.status,
            lifecycle_stage: self.lifecycle_stage,
            specialist_type: self.specialist_type,
            assigned_to: self.assigned_to.clone(),
            complexity: self.complexity,
            estimated_effort_minutes: self.estimated_effort_minutes,
            actual_effort_minutes: self.actual_effort_minutes,
            progress_percent: self.progress_percent,
            context: self.context.clone(),
            configuration: self.configuration.clone(),
            tags: self.tags.clone(),
            artifacts: self.artifacts.clone(),
            created_at: self.created_at,
            updated_at: self.updated_at,
            started_at: self.started_at,
            completed_at: self.completed_at,
            deleted: self.deleted,
        }
    }

    /// Attaches loaded attributes.
    #[must_use]
    pub fn with_attributes(mut self, attributes: Vec<TaskAttribute>) -> Self {
        self.attributes = attributes;
        self
    }

    /// Attaches loaded inbound dependency edges.
    #[must_use]
    pub fn with_dependencies(mut self, dependencies: Vec<TaskDependency>) -> Self {
        self.dependencies = dependencies;
        self
    }

    /// Attaches loaded events, keeping any recorded during rehydration.
    #[must_use]
    pub fn with_events(mut self, mut events: Vec<TaskEvent>) -> Self {
        events.append(&mut self.events);
        self.events = events;
        self
    }

    /// Attaches loaded children.
    #[must_use]
    pub fn with_children(mut self, children: Vec<Self>) -> Self {
        self.children = children;
        self
    }

    /// Returns the task identifier.
    #[must_use]
    pub const fn id(&self) -> TaskId {
        self.id
    }

    /// Returns the parent identifier, if any.
    #[must_use]
    pub const fn parent_task_id(&self) -> Option<TaskId> {
        self.parent_task_id
    }

    /// Returns the materialized hierarchy path.
    #[must_use]
    pub const fn hierarchy_path(&self) -> &HierarchyPath {
        &self.hierarchy_path
    }

    /// Returns the depth below the root.
    #[must_use]
    pub const fn hierarchy_level(&self) -> u32 {
        self.hierarchy_level
    }

    /// Returns the title.
    #[must_use]
    pub fn title(&self) -> &str {
        &self.title
    }

    /// Returns the description.
    #[must_use]
    pub fn description(&self) -> Option<&str> {
        self.description.as_deref()
    }

    /// Returns the task type.
    #[must_use]
    pub const fn task_type(&self) -> TaskType {
        self.task_type
    }

    /// Returns the status.
    #[must_use]
    pub const fn status(&self) -> TaskStatus {
        self.status
    }

    /// Returns the lifecycle stage.
    #[must_use]
    pub const fn lifecycle_stage(&self) -> LifecycleStage {
        self.lifecycle_stage
    }

    /// Returns the specialist role.
    #[must_use]
    pub const fn specialist_type(&self) -> Option<SpecialistType> {
        self.specialist_type
    }

    /// Returns the assignee.
    #[must_use]
    pub fn assigned_to(&self) -> Option<&str> {
        self.assigned_to.as_deref()
    }

    /// Returns the complexity estimate.
    #[must_use]
    pub const fn complexity(&self) -> Option<Complexity> {
        self.complexity
    }

    /// Returns the estimated effort.
    #[must_use]
    pub const fn estimated_effort_minutes(&self) -> Option<u32> {
        self.estimated_effort_minutes
    }

    /// Returns the recorded effort.
    #[must_use]
    pub const fn actual_effort_minutes(&self) -> Option<u32> {
        self.actual_effort_minutes
    }

    /// Returns the completion percentage.
    #[must_use]
    pub const fn progress_percent(&self) -> u8 {
        self.progress_percent
    }

    /// Returns the context map.
    #[must_use]
    pub const fn context(&self) -> &Map<String, Value> {
        &self.context
    }

    /// Returns the configuration map.
    #[must_use]
    pub const fn configuration(&self) -> &Map<String, Value> {
        &self.configuration
    }

    /// Returns the tags in sorted order.
    #[must_use]
    pub fn tags(&self) -> &[String] {
        &self.tags
    }

    /// Returns the output artifacts by name.
    #[must_use]
    pub const fn artifacts(&self) -> &BTreeMap<String, ArtifactRef> {
        &self.artifacts
    }

    /// Returns the named artifact reference.
    #[must_use]
    pub fn artifact(&self, name: &str) -> Option<&ArtifactRef> {
        self.artifacts.get(name)
    }

    /// Returns the creation timestamp.
    #[must_use]
    pub const fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    /// Returns the last update timestamp.
    #[must_use]
    pub const fn updated_at(&self) -> DateTime<Utc> {
        self.updated_at
    }

    /// Returns when the task first became active.
    #[must_use]
    pub const fn started_at(&self) -> Option<DateTime<Utc>> {
        self.started_at
    }

    /// Returns when the task was resolved.
    #[must_use]
    pub const fn completed_at(&self) -> Option<DateTime<Utc>> {
        self.completed_at
    }

    /// Returns whether the task is soft-deleted.
    #[must_use]
    pub const fn is_deleted(&self) -> bool {
        self.deleted
    }

    /// Returns whether work on the task may still happen.
    #[must_use]
    pub const fn is_open(&self) -> bool {
        !self.lifecycle_stage.is_resolved()
    }

    /// Returns the owned attributes.
    #[must_use]
    pub fn attributes(&self) -> &[TaskAttribute] {
        &self.attributes
    }

    /// Returns the inbound dependency edges.
    #[must_use]
    pub fn dependencies(&self) -> &[TaskDependency] {
        &self.dependencies
    }

    /// Returns the audit events, oldest first.
    #[must_use]
    pub fn events(&self) -> &[TaskEvent] {
        &self.events
    }

    /// Returns the loaded children.
    #[must_use]
    pub fn children(&self) -> &[Self] {
        &self.children
    }

    /// Sets the description.
    pub fn set_description(&mut self, description: Option<String>, clock: &impl Clock) {
        self.description = description;
        self.touch(clock);
    }

    /// Assigns the task to a specialist role and optional assignee.
    pub fn assign(
        &mut self,
        specialist_type: SpecialistType,
        assignee: Option<String>,
        clock: &impl Clock,
    ) {
        self.specialist_type = Some(specialist_type);
        self.assigned_to = assignee;
        self.touch(clock);
    }

    /// Sets the completion percentage, capped at 100.
    pub fn set_progress(&mut self, percent: u8, clock: &impl Clock) {
        self.progress_percent = percent.min(MAX_PROGRESS_PERCENT);
        self.touch(clock);
    }

    /// Records the actual effort spent.
    pub fn record_effort(&mut self, minutes: u32, clock: &impl Clock) {
        self.actual_effort_minutes = Some(minutes);
        self.touch(clock);
    }

    /// Sets a context entry.
    pub fn set_context_value(&mut self, key: impl Into<String>, value: Value, clock: &impl Clock) {
        self.context.insert(key.into(), value);
        self.touch(clock);
    }

    /// Sets the status directly.
    ///
    /// The lifecycle stage is left untouched; the repository reconciles it
    /// with the new status when the task is persisted.
    pub fn set_status(&mut self, status: TaskStatus, actor: &str, clock: &impl Clock) {
        if self.status == status {
            return;
        }
        let previous = self.status;
        self.status = status;
        let timestamp = clock.utc();
        self.updated_at = timestamp;
        self.push_event(
            TaskEventType::StatusChanged,
            EventCategory::Lifecycle,
            actor,
            json!({ "from": previous.as_str(), "to": status.as_str() }),
            timestamp,
        );
    }

    /// Moves the task to `target` through the lifecycle state machine.
    ///
    /// The status follows the new stage.
    ///
    /// # Errors
    ///
    /// Returns [`TaskDomainError::InvalidStageTransition`] when the state
    /// machine forbids the move.
    pub fn transition_to(
        &mut self,
        target: LifecycleStage,
        actor: &str,
        clock: &impl Clock,
    ) -> Result<(), TaskDomainError> {
        if !self.lifecycle_stage.can_transition_to(target) {
            return Err(TaskDomainError::InvalidStageTransition {
                task_id: self.id,
                from: self.lifecycle_stage,
                to: target,
            });
        }
        self.apply_stage(target, TaskEventType::StageChanged, actor, clock.utc());
        Ok(())
    }

    /// Brings the stage into agreement with the status before persistence.
    ///
    /// `stored_stage` is the stage currently persisted, or `None` for a new
    /// task. Every decision is taken against the stored stage, so a stale
    /// copy cannot move a task out of a terminal stage. An explicit stage
    /// change that agrees with the status must be one legal step from the
    /// stored stage. A status that disagrees with the stage pulls the stage
    /// along through a legal transition when one exists, or forces it with
    /// a [`TaskEventType::LifecycleCorrected`] event.
    ///
    /// # Errors
    ///
    /// Returns [`TaskDomainError::InvalidStageTransition`] when the stage
    /// change is illegal or a terminal stage would have to be left.
    pub fn reconcile_lifecycle(
        &mut self,
        stored_stage: Option<LifecycleStage>,
        clock: &impl Clock,
    ) -> Result<(), TaskDomainError> {
        let current = self.lifecycle_stage;
        let stored = stored_stage.unwrap_or(current);
        if self.status.is_consistent_with(current) {
            if stored != current && !stored.can_transition_to(current) {
                return Err(TaskDomainError::InvalidStageTransition {
                    task_id: self.id,
                    from: stored,
                    to: current,
                });
            }
            return Ok(());
        }

        let reconciliation =
            reconcile_stage(stored, self.status).ok_or(TaskDomainError::InvalidStageTransition {
                task_id: self.id,
                from: stored,
                to: self.status.canonical_stage(),
            })?;
        self.lifecycle_stage = stored;
        match reconciliation {
            StageReconciliation::Consistent => {}
            StageReconciliation::Transition(target) => {
                self.apply_stage(target, TaskEventType::StageChanged, SYSTEM_ACTOR, clock.utc());
            }
            StageReconciliation::Correction(target) => {
                warn!(
                    task_id = %self.id,
                    status = %self.status,
                    from = %stored,
                    to = %target,
                    "lifecycle stage disagreed with status; correcting"
                );
                self.apply_stage(
                    target,
                    TaskEventType::LifecycleCorrected,
                    SYSTEM_ACTOR,
                    clock.utc(),
                );
            }
        }
        Ok(())
    }

    /// Adds or replaces a typed attribute.
    pub fn add_attribute(&mut self, attribute: TaskAttribute, actor: &str, clock: &impl Clock) {
        let replaced = self
            .attributes
            .iter()
            .position(|existing| existing.name() == attribute.name())
            .map(|index| self.attributes.remove(index))
            .is_some();
        let timestamp = clock.utc();
        let payload = json!({
            "name": attribute.name(),
            "attribute_type": attribute.value().attribute_type().as_str(),
            "value": attribute.value().to_raw(),
            "indexed": attribute.is_indexed(),
            "replaced": replaced,
        });
        self.attributes.push(attribute);
        self.updated_at = timestamp;
        self.push_event(
            TaskEventType::AttributeAdded,
            EventCategory::Data,
            actor,
            payload,
            timestamp,
        );
    }

    /// Returns the named attribute.
    #[must_use]
    pub fn attribute(&self, name: &str) -> Option<&TaskAttribute> {
        self.attributes.iter().find(|attribute| attribute.name() == name)
    }

    /// Returns the typed value of the named attribute.
    #[must_use]
    pub fn get_attribute(&self, name: &str) -> Option<&AttributeValue> {
        self.attribute(name).map(TaskAttribute::value)
    }

    /// Declares that this task depends on `prerequisite`.
    ///
    /// The edge only exists in memory until it is handed to the
    /// repository, which runs the cycle check.
    ///
    /// # Errors
    ///
    /// Returns a validation error for self-edges, duplicates, or a data edge
    /// (use [`Self::add_data_dependency`] for those).
    pub fn add_dependency(
        &mut self,
        prerequisite: TaskId,
        dependency_type: DependencyType,
        clock: &impl Clock,
    ) -> Result<TaskDependency, TaskDomainError> {
        let dependency = TaskDependency::new(self.id, prerequisite, dependency_type, clock.utc());
        self.push_dependency(dependency)
    }

    /// Declares a data dependency binding `output_artifact` of the
    /// prerequisite to `input_parameter` of this task.
    ///
    /// # Errors
    ///
    /// Returns a validation error for self-edges, duplicates, or blank
    /// binding names.
    pub fn add_data_dependency(
        &mut self,
        prerequisite: TaskId,
        output_artifact: impl Into<String>,
        input_parameter: impl Into<String>,
        clock: &impl Clock,
    ) -> Result<TaskDependency, TaskDomainError> {
        let dependency =
            TaskDependency::new(self.id, prerequisite, DependencyType::Data, clock.utc())
                .with_data_binding(output_artifact, input_parameter);
        self.push_dependency(dependency)
    }

    fn push_dependency(
        &mut self,
        dependency: TaskDependency,
    ) -> Result<TaskDependency, TaskDomainError> {
        dependency.validate()?;
        let prerequisite = dependency.prerequisite_task_id();
        if self
            .dependencies
            .iter()
            .any(|existing| existing.prerequisite_task_id() == prerequisite)
        {
            return Err(TaskDomainError::DuplicateDependency {
                dependent: self.id,
                prerequisite,
            });
        }
        self.dependencies.push(dependency.clone());
        Ok(dependency)
    }

    /// Evaluates every mandatory inbound edge against `prerequisites`.
    ///
    /// Prerequisites absent from the slice count as unresolved, so their
    /// edges are unsatisfied unless waived.
    #[must_use]
    pub fn check_dependencies_satisfied(&self, prerequisites: &[Self]) -> DependencyCheck {
        let unsatisfied = self
            .dependencies
            .iter()
            .filter(|dependency| dependency.is_mandatory())
            .filter(|dependency| {
                let prerequisite = prerequisites
                    .iter()
                    .find(|task| task.id == dependency.prerequisite_task_id());
                !dependency.is_satisfied_by(prerequisite)
            })
            .cloned()
            .collect();
        DependencyCheck::new(unsatisfied)
    }

    /// Attaches a named output artifact.
    ///
    /// # Errors
    ///
    /// Returns [`TaskDomainError::EmptyArtifactName`] when the name is
    /// blank.
    pub fn attach_artifact(
        &mut self,
        name: impl Into<String>,
        reference: ArtifactRef,
        actor: &str,
        clock: &impl Clock,
    ) -> Result<(), TaskDomainError> {
        let artifact_name = name.into();
        if artifact_name.trim().is_empty() {
            return Err(TaskDomainError::EmptyArtifactName);
        }
        let timestamp = clock.utc();
        let payload = json!({ "name": artifact_name, "reference": reference.as_str() });
        self.artifacts.insert(artifact_name, reference);
        self.updated_at = timestamp;
        self.push_event(
            TaskEventType::ArtifactAttached,
            EventCategory::Data,
            actor,
            payload,
            timestamp,
        );
        Ok(())
    }

    /// Appends an audit event and returns a copy of it.
    pub fn record_event(
        &mut self,
        event_type: TaskEventType,
        category: EventCategory,
        actor: &str,
        data: Value,
        clock: &impl Clock,
    ) -> TaskEvent {
        let event = TaskEvent::new(self.id, event_type, category, actor, data, clock.utc());
        self.events.push(event.clone());
        event
    }

    /// Flags the task as soft-deleted.
    pub(crate) fn mark_deleted(&mut self, actor: &str, clock: &impl Clock) {
        let timestamp = clock.utc();
        self.deleted = true;
        self.updated_at = timestamp;
        self.push_event(
            TaskEventType::Deleted,
            EventCategory::Audit,
            actor,
            json!({ "soft": true }),
            timestamp,
        );
    }

    /// Replaces the parent link and hierarchy position.
    pub(crate) fn relocate(&mut self, parent_task_id: Option<TaskId>, path: HierarchyPath) {
        self.parent_task_id = parent_task_id;
        self.hierarchy_level = path.level();
        self.hierarchy_path = path;
    }

    /// Restores the hierarchy position exactly as it is stored.
    pub(crate) fn reset_position(
        &mut self,
        parent_task_id: Option<TaskId>,
        path: HierarchyPath,
        level: u32,
    ) {
        self.parent_task_id = parent_task_id;
        self.hierarchy_path = path;
        self.hierarchy_level = level;
    }

    /// Places the task at `expected`, recording a correction when its
    /// current position differs.
    pub(crate) fn settle_hierarchy(
        &mut self,
        parent_task_id: Option<TaskId>,
        expected: HierarchyPath,
        clock: &impl Clock,
    ) {
        if self.hierarchy_path == expected && self.hierarchy_level == expected.level() {
            self.parent_task_id = parent_task_id;
            return;
        }
        self.correct_hierarchy(parent_task_id, expected, clock);
    }

    /// Replaces a hierarchy position that violated its invariant and
    /// records a [`TaskEventType::HierarchyCorrected`] event.
    fn correct_hierarchy(
        &mut self,
        parent_task_id: Option<TaskId>,
        repaired: HierarchyPath,
        clock: &impl Clock,
    ) {
        warn!(
            task_id = %self.id,
            original = %self.hierarchy_path,
            repaired = %repaired,
            "hierarchy path violated its invariant; repairing"
        );
        let payload = json!({
            "original_path": self.hierarchy_path.as_str(),
            "repaired_path": repaired.as_str(),
            "original_level": self.hierarchy_level,
        });
        self.relocate(parent_task_id, repaired);
        self.push_event(
            TaskEventType::HierarchyCorrected,
            EventCategory::Hierarchy,
            SYSTEM_ACTOR,
            payload,
            clock.utc(),
        );
    }

    /// Drops hierarchy corrections produced while rehydrating this copy.
    ///
    /// Storage owns path repair; only corrections it has already saved (the
    /// identifiers in `saved`) are kept.
    pub(crate) fn discard_unsaved_corrections(&mut self, saved: &HashSet<EventId>) {
        self.events.retain(|event| {
            event.event_type() != TaskEventType::HierarchyCorrected || saved.contains(&event.id())
        });
    }

    /// Moves a stage forward as part of retirement.
    ///
    /// Completed or failed tasks become archived; other open tasks are
    /// cancelled because the state machine offers them no archived
    /// transition. Terminal tasks keep their stage. Returns the resulting
    /// stage.
    pub(crate) fn retire(&mut self, actor: &str, clock: &impl Clock) -> LifecycleStage {
        let current = self.lifecycle_stage;
        let target = if current.can_transition_to(LifecycleStage::Archived) {
            Some(LifecycleStage::Archived)
        } else if current.is_terminal() {
            None
        } else {
            Some(LifecycleStage::Cancelled)
        };
        if let Some(stage) = target {
            self.apply_stage(stage, TaskEventType::StageChanged, actor, clock.utc());
        }
        self.lifecycle_stage
    }

    /// Snapshots the task into an archive record, then retires it and
    /// records a [`TaskEventType::Archived`] event.
    ///
    /// The task is left untouched when the snapshot cannot be serialized.
    pub(crate) fn archive(
        &mut self,
        instruction: &ArchiveInstruction,
        clock: &impl Clock,
    ) -> Result<ArchiveRecord, serde_json::Error> {
        let snapshot = serde_json::to_value(&*self)?;
        let record = ArchiveRecord::new(
            self.id,
            snapshot,
            instruction.reason.as_str(),
            instruction.artifacts.clone(),
            instruction.actor.as_str(),
            clock.utc(),
        );
        let stage = self.retire(&instruction.actor, clock);
        self.record_event(
            TaskEventType::Archived,
            EventCategory::Archival,
            &instruction.actor,
            json!({
                "reason": instruction.reason,
                "archive_record_id": record.id().to_string(),
                "stage": stage.as_str(),
                "artifacts_preserved": instruction.artifacts_preserved,
            }),
            clock,
        );
        Ok(record)
    }

    pub(crate) fn push_event(
        &mut self,
        event_type: TaskEventType,
        category: EventCategory,
        actor: &str,
        payload: Value,
        occurred_at: DateTime<Utc>,
    ) {
        self.events.push(TaskEvent::new(
            self.id,
            event_type,
            category,
            actor,
            payload,
            occurred_at,
        ));
    }

    fn apply_stage(
        &mut self,
        target: LifecycleStage,
        event_type: TaskEventType,
        actor: &str,
        timestamp: DateTime<Utc>,
    ) {
        let from = self.lifecycle_stage;
        self.lifecycle_stage = target;
        self.status = target.status();
        self.updated_at = timestamp;
        if target == LifecycleStage::Active && self.started_at.is_none() {
            self.started_at = Some(timestamp);
        }
        if matches!(
            target,
            LifecycleStage::Completed | LifecycleStage::Failed | LifecycleStage::Cancelled
        ) && self.completed_at.is_none()
        {
            self.completed_at = Some(timestamp);
        }
        if target == LifecycleStage::Completed {
            self.progress_percent = MAX_PROGRESS_PERCENT;
        }
        self.push_event(
            event_type,
            EventCategory::Lifecycle,
            actor,
            json!({
                "from": from.as_str(),
                "to": target.as_str(),
                "status": self.status.as_str(),
            }),
            timestamp,
        );
    }

    fn repair_hierarchy(&mut self, clock: &impl Clock) {
        let path_valid = self.hierarchy_path.is_valid_for(self.id);
        if path_valid && self.hierarchy_level == self.hierarchy_path.level() {
            return;
        }
        let repaired = self.hierarchy_path.repaired_for(self.id);
        self.correct_hierarchy(self.parent_task_id, repaired, clock);
    }

    fn touch(&mut self, clock: &impl Clock) {
        self.updated_at = clock.utc();
    }
}
