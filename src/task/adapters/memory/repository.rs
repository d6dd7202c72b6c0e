//! In-memory task repository.
//!
//! Core rows and side tables are kept apart exactly as a relational store
//! would keep them, and every aggregate is assembled on read. A single
//! `RwLock` guards all tables, so each write (including its cycle check)
//! runs under one write guard and is serializable with every other write.

use async_trait::async_trait;
use mockable::{Clock, DefaultClock};
use serde_json::json;
use std::collections::{HashMap, HashSet};
use std::fmt;
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};
use tracing::{debug, info};

use crate::task::{
    domain::{
        ArchiveInstruction, ArchiveRecord, AttributeValue, DependencyCheck, DependencyId,
        DependencyStatus, EventCategory, EventId, HierarchyPath, PersistedTaskData, SYSTEM_ACTOR,
        Task, TaskAttribute, TaskDependency, TaskDomainError, TaskEvent, TaskEventType, TaskId,
        TaskStatus,
    },
    ports::{
        ArchivedTask, DeleteMode, DependencyGraph, GetOptions, Page, TaskQuery, TaskRepository,
        TaskRepositoryError, TaskRepositoryResult,
    },
};

/// Thread-safe in-memory task repository.
pub struct InMemoryTaskRepository<C = DefaultClock> {
    state: Arc<RwLock<InMemoryTaskState>>,
    clock: Arc<C>,
}

#[derive(Debug, Default)]
struct InMemoryTaskState {
    tasks: HashMap<TaskId, PersistedTaskData>,
    attributes: HashMap<TaskId, Vec<TaskAttribute>>,
    events: HashMap<TaskId, Vec<TaskEvent>>,
    dependencies: HashMap<DependencyId, TaskDependency>,
    archive_records: Vec<ArchiveRecord>,
}

impl InMemoryTaskRepository {
    /// Creates an empty repository using the system clock.
    #[must_use]
    pub fn new() -> Self {
        Self::with_clock(Arc::new(DefaultClock))
    }
}

impl Default for InMemoryTaskRepository {
    fn default() -> Self {
        Self::new()
    }
}

impl<C> Clone for InMemoryTaskRepository<C> {
    fn clone(&self) -> Self {
        Self {
            state: Arc::clone(&self.state),
            clock: Arc::clone(&self.clock),
        }
    }
}

impl<C> fmt::Debug for InMemoryTaskRepository<C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("InMemoryTaskRepository")
            .finish_non_exhaustive()
    }
}

impl<C> InMemoryTaskRepository<C>
where
    C: Clock + Send + Sync,
{
    /// Creates an empty repository stamping events with `clock`.
    #[must_use]
    pub fn with_clock(clock: Arc<C>) -> Self {
        Self {
            state: Arc::new(RwLock::new(InMemoryTaskState::default())),
            clock,
        }
    }

    /// Replaces a stored core row as-is, bypassing every invariant check.
    #[cfg(test)]
    pub(crate) fn overwrite_row(&self, row: PersistedTaskData) -> TaskRepositoryResult<()> {
        self.write()?.tasks.insert(row.id, row);
        Ok(())
    }

    fn read(&self) -> TaskRepositoryResult<RwLockReadGuard<'_, InMemoryTaskState>> {
        self.state.read().map_err(|err| {
            TaskRepositoryError::persistence(std::io::Error::other(err.to_string()))
        })
    }

    fn write(&self) -> TaskRepositoryResult<RwLockWriteGuard<'_, InMemoryTaskState>> {
        self.state.write().map_err(|err| {
            TaskRepositoryError::persistence(std::io::Error::other(err.to_string()))
        })
    }
}

impl InMemoryTaskState {
    fn visible(&self, id: TaskId, include_deleted: bool) -> Option<&PersistedTaskData> {
        self.tasks
            .get(&id)
            .filter(|row| include_deleted || !row.deleted)
    }

    fn require_visible(&self, id: TaskId) -> TaskRepositoryResult<&PersistedTaskData> {
        self.visible(id, false)
            .ok_or(TaskRepositoryError::NotFound(id))
    }

    fn inbound_dependencies(&self, id: TaskId) -> Vec<TaskDependency> {
        let mut edges: Vec<TaskDependency> = self
            .dependencies
            .values()
            .filter(|edge| edge.dependent_task_id() == id)
            .cloned()
            .collect();
        edges.sort_by_key(|edge| (edge.created_at(), edge.id()));
        edges
    }

    fn assemble(&self, row: &PersistedTaskData, clock: &impl Clock) -> Task {
        Task::from_persisted(row.clone(), clock)
            .with_attributes(self.attributes.get(&row.id).cloned().unwrap_or_default())
            .with_dependencies(self.inbound_dependencies(row.id))
            .with_events(self.events.get(&row.id).cloned().unwrap_or_default())
    }

    fn assemble_with_children(&self, row: &PersistedTaskData, clock: &impl Clock) -> Task {
        let mut children: Vec<&PersistedTaskData> = self
            .tasks
            .values()
            .filter(|child| child.parent_task_id == Some(row.id) && !child.deleted)
            .collect();
        children.sort_by_key(|child| (child.created_at, child.id));
        let loaded = children
            .into_iter()
            .map(|child| self.assemble(child, clock))
            .collect();
        self.assemble(row, clock).with_children(loaded)
    }

    /// Derives the path a row should have from its parent's stored path.
    ///
    /// An orphan whose parent row is gone keeps its own ancestry, repaired.
    fn expected_path(&self, row: &PersistedTaskData) -> HierarchyPath {
        match row.parent_task_id {
            None => HierarchyPath::root(row.id),
            Some(parent_id) => self.tasks.get(&parent_id).map_or_else(
                || row.hierarchy_path.repaired_for(row.id),
                |parent| parent.hierarchy_path.repaired_for(parent_id).child(row.id),
            ),
        }
    }

    fn saved_corrections(&self, task_id: TaskId) -> HashSet<EventId> {
        self.events
            .get(&task_id)
            .into_iter()
            .flatten()
            .filter(|event| event.event_type() == TaskEventType::HierarchyCorrected)
            .map(TaskEvent::id)
            .collect()
    }

    /// Brings `task` onto the stored position of `row`, repairing the path
    /// once if the stored one is broken.
    fn settle_stored_position(&self, task: &mut Task, row: &PersistedTaskData, clock: &impl Clock) {
        task.discard_unsaved_corrections(&self.saved_corrections(row.id));
        task.reset_position(row.parent_task_id, row.hierarchy_path.clone(), row.hierarchy_level);
        task.settle_hierarchy(row.parent_task_id, self.expected_path(row), clock);
    }

    fn append_events(&mut self, task_id: TaskId, events: &[TaskEvent]) {
        let stored = self.events.entry(task_id).or_default();
        let known: HashSet<_> = stored.iter().map(TaskEvent::id).collect();
        stored.extend(
            events
                .iter()
                .filter(|event| !known.contains(&event.id()))
                .cloned(),
        );
    }

    fn push_system_event(
        &mut self,
        task_id: TaskId,
        event_type: TaskEventType,
        category: EventCategory,
        payload: serde_json::Value,
        clock: &impl Clock,
    ) {
        let event = TaskEvent::new(
            task_id,
            event_type,
            category,
            SYSTEM_ACTOR,
            payload,
            clock.utc(),
        );
        self.events.entry(task_id).or_default().push(event);
    }

    /// Depth-first search along prerequisite edges from `start`.
    fn reaches(&self, start: TaskId, target: TaskId) -> bool {
        let mut visited = HashSet::new();
        let mut stack = vec![start];
        while let Some(current) = stack.pop() {
            if current == target {
                return true;
            }
            if visited.insert(current) {
                stack.extend(
                    self.dependencies
                        .values()
                        .filter(|edge| edge.dependent_task_id() == current)
                        .map(TaskDependency::prerequisite_task_id),
                );
            }
        }
        false
    }

    fn insert_dependency(
        &mut self,
        dependency: &TaskDependency,
        clock: &impl Clock,
    ) -> TaskRepositoryResult<TaskDependency> {
        dependency.validate()?;
        let dependent = dependency.dependent_task_id();
        let prerequisite = dependency.prerequisite_task_id();
        self.require_visible(dependent)?;
        let prerequisite_row = self.require_visible(prerequisite)?.clone();
        let prerequisite_task = Task::from_persisted(prerequisite_row, clock);
        if self.dependencies.values().any(|edge| {
            edge.dependent_task_id() == dependent && edge.prerequisite_task_id() == prerequisite
        }) {
            return Err(TaskDomainError::DuplicateDependency {
                dependent,
                prerequisite,
            }
            .into());
        }
        if self.reaches(prerequisite, dependent) {
            return Err(TaskRepositoryError::DependencyCycle {
                dependent,
                prerequisite,
            });
        }

        let mut edge = dependency.clone();
        let already_met = edge.status() == DependencyStatus::Pending
            && edge.is_satisfied_by(Some(&prerequisite_task));
        if already_met {
            edge.mark_satisfied(clock.utc());
        }
        self.dependencies.insert(edge.id(), edge.clone());
        self.push_system_event(
            dependent,
            TaskEventType::DependencyAdded,
            EventCategory::Dependency,
            json!({
                "dependency_id": edge.id().to_string(),
                "prerequisite_task_id": prerequisite.to_string(),
                "dependency_type": edge.dependency_type().as_str(),
            }),
            clock,
        );
        if already_met {
            self.push_system_event(
                dependent,
                TaskEventType::DependencySatisfied,
                EventCategory::Dependency,
                json!({
                    "dependency_id": edge.id().to_string(),
                    "prerequisite_task_id": prerequisite.to_string(),
                }),
                clock,
            );
        }
        Ok(edge)
    }

    /// Marks pending edges waiting on a completed task as satisfied.
    fn satisfy_inbound_edges(&mut self, completed: &Task, clock: &impl Clock) {
        let timestamp = clock.utc();
        let satisfied: Vec<TaskDependency> = self
            .dependencies
            .values()
            .filter(|edge| edge.prerequisite_task_id() == completed.id())
            .filter(|edge| edge.status() == DependencyStatus::Pending)
            .filter(|edge| edge.is_satisfied_by(Some(completed)))
            .cloned()
            .collect();
        for mut edge in satisfied {
            edge.mark_satisfied(timestamp);
            self.push_system_event(
                edge.dependent_task_id(),
                TaskEventType::DependencySatisfied,
                EventCategory::Dependency,
                json!({
                    "dependency_id": edge.id().to_string(),
                    "prerequisite_task_id": completed.id().to_string(),
                }),
                clock,
            );
            self.dependencies.insert(edge.id(), edge);
        }
    }

    fn sorted_visible<'a>(
        &'a self,
        mut rows: Vec<&'a PersistedTaskData>,
        clock: &impl Clock,
    ) -> Vec<Task> {
        rows.sort_by_key(|row| (row.created_at, row.id));
        rows.into_iter().map(|row| self.assemble(row, clock)).collect()
    }
}

#[async_trait]
impl<C> TaskRepository for InMemoryTaskRepository<C>
where
    C: Clock + Send + Sync,
{
    async fn create(&self, task: &Task) -> TaskRepositoryResult<Task> {
        let clock = &*self.clock;
        let mut state = self.write()?;
        if state.tasks.contains_key(&task.id()) {
            return Err(TaskRepositoryError::DuplicateTask(task.id()));
        }

        let mut stored = task.clone();
        let expected_path = match task.parent_task_id() {
            Some(parent_id) => state.require_visible(parent_id)?.hierarchy_path.child(task.id()),
            None => HierarchyPath::root(task.id()),
        };
        stored.settle_hierarchy(task.parent_task_id(), expected_path, clock);
        stored.reconcile_lifecycle(None, clock)?;

        for dependency in task.dependencies() {
            dependency.validate()?;
            state.require_visible(dependency.prerequisite_task_id())?;
        }

        state.tasks.insert(stored.id(), stored.to_persisted());
        state
            .attributes
            .insert(stored.id(), stored.attributes().to_vec());
        state.append_events(stored.id(), stored.events());
        for dependency in task.dependencies() {
            if let Err(err) = state.insert_dependency(dependency, clock) {
                state.tasks.remove(&stored.id());
                state.attributes.remove(&stored.id());
                state.events.remove(&stored.id());
                state
                    .dependencies
                    .retain(|_, edge| edge.dependent_task_id() != stored.id());
                return Err(err);
            }
        }
        debug!(task_id = %stored.id(), path = %stored.hierarchy_path(), "created task");

        let row = state.require_visible(stored.id())?;
        Ok(state.assemble(row, clock))
    }

    async fn get(&self, id: TaskId, options: GetOptions) -> TaskRepositoryResult<Option<Task>> {
        let clock = &*self.clock;
        let state = self.read()?;
        Ok(state
            .visible(id, options.include_deleted())
            .map(|row| {
                if options.include_children() {
                    state.assemble_with_children(row, clock)
                } else {
                    state.assemble(row, clock)
                }
            }))
    }

    async fn update(&self, task: &Task) -> TaskRepositoryResult<Task> {
        let clock = &*self.clock;
        let mut state = self.write()?;
        let existing = state.require_visible(task.id())?.clone();

        let mut stored = task.clone();
        stored.reconcile_lifecycle(Some(existing.lifecycle_stage), clock)?;
        state.settle_stored_position(&mut stored, &existing, clock);

        state.tasks.insert(stored.id(), stored.to_persisted());
        state
            .attributes
            .insert(stored.id(), stored.attributes().to_vec());
        state.append_events(stored.id(), stored.events());
        if stored.status() == TaskStatus::Completed {
            state.satisfy_inbound_edges(&stored, clock);
        }

        let row = state.require_visible(stored.id())?;
        Ok(state.assemble(row, clock))
    }

    async fn delete(&self, id: TaskId, mode: DeleteMode) -> TaskRepositoryResult<bool> {
        let clock = &*self.clock;
        let mut state = self.write()?;
        match mode {
            DeleteMode::Soft => {
                let Some(row) = state.visible(id, false).cloned() else {
                    return Ok(false);
                };
                let mut task = state.assemble(&row, clock);
                state.settle_stored_position(&mut task, &row, clock);
                task.mark_deleted(SYSTEM_ACTOR, clock);
                state.tasks.insert(id, task.to_persisted());
                state.append_events(id, task.events());
                debug!(task_id = %id, "soft-deleted task");
                Ok(true)
            }
            DeleteMode::Hard => {
                if state.tasks.remove(&id).is_none() {
                    return Ok(false);
                }
                state.attributes.remove(&id);
                state.events.remove(&id);
                state.dependencies.retain(|_, edge| {
                    edge.dependent_task_id() != id && edge.prerequisite_task_id() != id
                });
                info!(task_id = %id, "hard-deleted task");
                Ok(true)
            }
        }
    }

    async fn subtree(
        &self,
        root: TaskId,
        max_depth: Option<u32>,
    ) -> TaskRepositoryResult<Vec<Task>> {
        let clock = &*self.clock;
        let state = self.read()?;
        let root_row = state.require_visible(root)?;
        let root_path = &root_row.hierarchy_path;
        let root_level = root_row.hierarchy_level;

        let mut rows: Vec<&PersistedTaskData> = state
            .tasks
            .values()
            .filter(|row| !row.deleted)
            .filter(|row| row.id == root || root_path.is_ancestor_of(&row.hierarchy_path))
            .filter(|row| {
                max_depth.is_none_or(|depth| {
                    row.hierarchy_level.saturating_sub(root_level) <= depth
                })
            })
            .collect();
        rows.sort_by_key(|row| (row.hierarchy_level, row.created_at, row.id));
        Ok(rows
            .into_iter()
            .map(|row| state.assemble(row, clock))
            .collect())
    }

    async fn ancestors(&self, id: TaskId) -> TaskRepositoryResult<Vec<Task>> {
        let clock = &*self.clock;
        let state = self.read()?;
        let row = state.require_visible(id)?;
        let ancestor_ids = state.expected_path(row).ancestor_ids()?;
        Ok(ancestor_ids
            .into_iter()
            .filter_map(|ancestor| state.visible(ancestor, false))
            .map(|ancestor| state.assemble(ancestor, clock))
            .collect())
    }

    async fn move_task(&self, id: TaskId, new_parent: Option<TaskId>) -> TaskRepositoryResult<Task> {
        let clock = &*self.clock;
        let mut state = self.write()?;
        let existing = state.require_visible(id)?.clone();

        let new_path = match new_parent {
            Some(parent_id) => {
                let parent = state.require_visible(parent_id)?;
                let mut cursor = Some(parent_id);
                let mut visited = HashSet::new();
                while let Some(current) = cursor {
                    if current == id {
                        return Err(TaskRepositoryError::HierarchyCycle {
                            task_id: id,
                            new_parent: parent_id,
                        });
                    }
                    if !visited.insert(current) {
                        break;
                    }
                    cursor = state
                        .tasks
                        .get(&current)
                        .and_then(|row| row.parent_task_id);
                }
                parent.hierarchy_path.child(id)
            }
            None => HierarchyPath::root(id),
        };

        let old_path = existing.hierarchy_path.clone();
        let rewrites: Vec<(TaskId, HierarchyPath)> = state
            .tasks
            .values()
            .filter(|row| old_path.is_ancestor_of(&row.hierarchy_path))
            .filter_map(|row| {
                row.hierarchy_path
                    .rebase(&old_path, &new_path)
                    .map(|path| (row.id, path))
            })
            .collect();
        let descendant_count = rewrites.len();
        for (descendant, path) in rewrites {
            if let Some(row) = state.tasks.get_mut(&descendant) {
                row.hierarchy_level = path.level();
                row.hierarchy_path = path;
            }
        }

        let mut moved = state.assemble(&existing, clock);
        moved.discard_unsaved_corrections(&state.saved_corrections(id));
        moved.relocate(new_parent, new_path.clone());
        moved.push_event(
            TaskEventType::Moved,
            EventCategory::Hierarchy,
            SYSTEM_ACTOR,
            json!({
                "from_parent": existing.parent_task_id.map(|parent| parent.to_string()),
                "to_parent": new_parent.map(|parent| parent.to_string()),
                "old_path": old_path.as_str(),
                "new_path": new_path.as_str(),
                "descendants_rewritten": descendant_count,
            }),
            clock.utc(),
        );
        let mut row = moved.to_persisted();
        row.updated_at = clock.utc();
        state.tasks.insert(id, row);
        state.append_events(id, moved.events());
        info!(task_id = %id, new_path = %new_path, descendant_count, "moved task");

        let stored = state.require_visible(id)?;
        Ok(state.assemble(stored, clock))
    }

    async fn add_dependency(
        &self,
        dependency: &TaskDependency,
    ) -> TaskRepositoryResult<TaskDependency> {
        let clock = &*self.clock;
        let mut state = self.write()?;
        state.insert_dependency(dependency, clock)
    }

    async fn waive_dependency(
        &self,
        id: DependencyId,
        waived_by: &str,
        reason: &str,
    ) -> TaskRepositoryResult<TaskDependency> {
        let clock = &*self.clock;
        let mut state = self.write()?;
        let mut edge = state
            .dependencies
            .get(&id)
            .cloned()
            .ok_or(TaskRepositoryError::DependencyNotFound(id))?;
        edge.waive(waived_by, reason, clock.utc())?;
        state.dependencies.insert(id, edge.clone());
        let event = TaskEvent::new(
            edge.dependent_task_id(),
            TaskEventType::DependencyWaived,
            EventCategory::Dependency,
            waived_by,
            json!({
                "dependency_id": id.to_string(),
                "prerequisite_task_id": edge.prerequisite_task_id().to_string(),
                "reason": reason,
            }),
            clock.utc(),
        );
        state
            .events
            .entry(edge.dependent_task_id())
            .or_default()
            .push(event);
        Ok(edge)
    }

    async fn check_dependencies(&self, id: TaskId) -> TaskRepositoryResult<DependencyCheck> {
        let clock = &*self.clock;
        let state = self.read()?;
        let row = state.require_visible(id)?;
        let task = state.assemble(row, clock);
        let prerequisites: Vec<Task> = task
            .dependencies()
            .iter()
            .filter_map(|edge| state.visible(edge.prerequisite_task_id(), false))
            .map(|prerequisite| Task::from_persisted(prerequisite.clone(), clock))
            .collect();
        Ok(task.check_dependencies_satisfied(&prerequisites))
    }

    async fn dependency_graph(&self) -> TaskRepositoryResult<DependencyGraph> {
        let state = self.read()?;
        let mut graph = DependencyGraph::new();
        for edge in state.dependencies.values() {
            if state.visible(edge.dependent_task_id(), false).is_some() {
                graph
                    .entry(edge.dependent_task_id())
                    .or_default()
                    .push(edge.prerequisite_task_id());
            }
        }
        for prerequisites in graph.values_mut() {
            prerequisites.sort();
        }
        Ok(graph)
    }

    async fn query(&self, filter: &TaskQuery, page: Page) -> TaskRepositoryResult<Vec<Task>> {
        let clock = &*self.clock;
        let state = self.read()?;
        let mut matching: Vec<Task> = state
            .tasks
            .values()
            .map(|row| Task::from_persisted(row.clone(), clock))
            .filter(|task| filter.matches(task))
            .collect();
        matching.sort_by_key(|task| (task.created_at(), task.id()));
        let assembled = page
            .apply(matching)
            .into_iter()
            .filter_map(|task| state.tasks.get(&task.id()))
            .map(|row| state.assemble(row, clock))
            .collect();
        Ok(assembled)
    }

    async fn search_by_attribute(
        &self,
        name: &str,
        value: &AttributeValue,
    ) -> TaskRepositoryResult<Vec<Task>> {
        let clock = &*self.clock;
        let state = self.read()?;
        let rows: Vec<&PersistedTaskData> = state
            .attributes
            .iter()
            .filter(|(_, attributes)| {
                attributes.iter().any(|attribute| {
                    attribute.is_indexed() && attribute.name() == name && attribute.value() == value
                })
            })
            .filter_map(|(task_id, _)| state.visible(*task_id, false))
            .collect();
        Ok(state.sorted_visible(rows, clock))
    }

    async fn archive(
        &self,
        id: TaskId,
        instruction: &ArchiveInstruction,
    ) -> TaskRepositoryResult<ArchivedTask> {
        let clock = &*self.clock;
        let mut state = self.write()?;
        let row = state.require_visible(id)?.clone();
        let mut task = state.assemble(&row, clock);
        state.settle_stored_position(&mut task, &row, clock);
        let record = task
            .archive(instruction, clock)
            .map_err(TaskRepositoryError::persistence)?;

        state.tasks.insert(id, task.to_persisted());
        state.append_events(id, task.events());
        state.archive_records.push(record.clone());
        debug!(task_id = %id, stage = %task.lifecycle_stage(), "archived task");

        let stored = state.require_visible(id)?;
        Ok(ArchivedTask {
            task: state.assemble(stored, clock),
            record,
        })
    }

    async fn archive_records(&self, task_id: TaskId) -> TaskRepositoryResult<Vec<ArchiveRecord>> {
        let state = self.read()?;
        let mut records: Vec<ArchiveRecord> = state
            .archive_records
            .iter()
            .filter(|record| record.task_id() == task_id)
            .cloned()
            .collect();
        records.sort_by_key(ArchiveRecord::archived_at);
        Ok(records)
    }
}
