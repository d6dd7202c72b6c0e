//! Diesel row models for task graph persistence.
//!
//! Each record converts to and from its domain counterpart. Stored text
//! that no longer parses as a domain value surfaces as a persistence error.

use super::schema::{task_archive_records, task_attributes, task_dependencies, task_events, tasks};
use crate::task::{
    domain::{
        ArchiveRecord, ArchiveRecordId, ArchivedArtifact, AttributeType, AttributeValue,
        Complexity, DependencyId, DependencyStatus, DependencyType, EventCategory, EventId,
        HierarchyPath, LifecycleStage, PersistedDependencyData, PersistedTaskData,
        SpecialistType, Task, TaskAttribute, TaskDependency, TaskEvent, TaskEventType, TaskId,
        TaskStatus, TaskType,
    },
    ports::{TaskRepositoryError, TaskRepositoryResult},
};
use chrono::{DateTime, Utc};
use diesel::prelude::*;
use serde_json::Value;

/// Core task row, used for reads, inserts, and full-row updates.
#[derive(Debug, Clone, PartialEq, Queryable, Selectable, Insertable, AsChangeset)]
#[diesel(table_name = tasks)]
#[diesel(check_for_backend(diesel::pg::Pg))]
#[diesel(treat_none_as_null = true)]
pub struct TaskRecord {
    /// Task identifier.
    pub id: uuid::Uuid,
    /// Parent identifier.
    pub parent_task_id: Option<uuid::Uuid>,
    /// Materialized path.
    pub hierarchy_path: String,
    /// Depth below the root.
    pub hierarchy_level: i32,
    /// Title.
    pub title: String,
    /// Description.
    pub description: Option<String>,
    /// Task type text.
    pub task_type: String,
    /// Status text.
    pub status: String,
    /// Stage text.
    pub lifecycle_stage: String,
    /// Specialist text.
    pub specialist_type: Option<String>,
    /// Assignee.
    pub assigned_to: Option<String>,
    /// Complexity text.
    pub complexity: Option<String>,
    /// Estimated effort.
    pub estimated_effort_minutes: Option<i32>,
    /// Recorded effort.
    pub actual_effort_minutes: Option<i32>,
    /// Completion percentage.
    pub progress_percent: i16,
    /// Context document.
    pub context: Value,
    /// Configuration document.
    pub configuration: Value,
    /// Tag array document.
    pub tags: Value,
    /// Artifact map document.
    pub artifacts: Value,
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

impl TaskRecord {
    /// Decomposes the core row of a task.
    pub fn from_domain(task: &Task) -> TaskRepositoryResult<Self> {
        let data = task.to_persisted();
        Ok(Self {
            id: data.id.into_inner(),
            parent_task_id: data.parent_task_id.map(TaskId::into_inner),
            hierarchy_path: data.hierarchy_path.as_str().to_owned(),
            hierarchy_level: i32::try_from(data.hierarchy_level)
                .map_err(TaskRepositoryError::persistence)?,
            title: data.title,
            description: data.description,
            task_type: data.task_type.as_str().to_owned(),
            status: data.status.as_str().to_owned(),
            lifecycle_stage: data.lifecycle_stage.as_str().to_owned(),
            specialist_type: data.specialist_type.map(|value| value.as_str().to_owned()),
            assigned_to: data.assigned_to,
            complexity: data.complexity.map(|value| value.as_str().to_owned()),
            estimated_effort_minutes: to_db_minutes(data.estimated_effort_minutes)?,
            actual_effort_minutes: to_db_minutes(data.actual_effort_minutes)?,
            progress_percent: i16::from(data.progress_percent),
            context: Value::Object(data.context),
            configuration: Value::Object(data.configuration),
            tags: serde_json::to_value(&data.tags).map_err(TaskRepositoryError::persistence)?,
            artifacts: serde_json::to_value(&data.artifacts)
                .map_err(TaskRepositoryError::persistence)?,
            created_at: data.created_at,
            updated_at: data.updated_at,
            started_at: data.started_at,
            completed_at: data.completed_at,
            deleted: data.deleted,
        })
    }

    /// Parses the row back into persisted task data.
    pub fn into_persisted(self) -> TaskRepositoryResult<PersistedTaskData> {
        Ok(PersistedTaskData {
            id: TaskId::from_uuid(self.id),
            parent_task_id: self.parent_task_id.map(TaskId::from_uuid),
            hierarchy_path: HierarchyPath::from_raw(self.hierarchy_path),
            hierarchy_level: u32::try_from(self.hierarchy_level)
                .map_err(TaskRepositoryError::persistence)?,
            title: self.title,
            description: self.description,
            task_type: parse_text::<TaskType>(&self.task_type)?,
            status: parse_text::<TaskStatus>(&self.status)?,
            lifecycle_stage: LifecycleStage::try_from(self.lifecycle_stage.as_str())
                .map_err(TaskRepositoryError::persistence)?,
            specialist_type: self
                .specialist_type
                .as_deref()
                .map(parse_text::<SpecialistType>)
                .transpose()?,
            assigned_to: self.assigned_to,
            complexity: self
                .complexity
                .as_deref()
                .map(parse_text::<Complexity>)
                .transpose()?,
            estimated_effort_minutes: from_db_minutes(self.estimated_effort_minutes)?,
            actual_effort_minutes: from_db_minutes(self.actual_effort_minutes)?,
            progress_percent: u8::try_from(self.progress_percent)
                .map_err(TaskRepositoryError::persistence)?,
            context: from_json(self.context)?,
            configuration: from_json(self.configuration)?,
            tags: from_json(self.tags)?,
            artifacts: from_json(self.artifacts)?,
            created_at: self.created_at,
            updated_at: self.updated_at,
            started_at: self.started_at,
            completed_at: self.completed_at,
            deleted: self.deleted,
        })
    }
}

/// Attribute side-table row.
#[derive(Debug, Clone, PartialEq, Eq, Queryable, Selectable, Insertable)]
#[diesel(table_name = task_attributes)]
#[diesel(check_for_backend(diesel::pg::Pg))]
pub struct AttributeRecord {
    /// Owning task.
    pub task_id: uuid::Uuid,
    /// Attribute name.
    pub name: String,
    /// Type tag.
    pub attribute_type: String,
    /// Raw value.
    pub value: String,
    /// Category.
    pub category: Option<String>,
    /// Index flag.
    pub indexed: bool,
    /// Creation timestamp.
    pub created_at: DateTime<Utc>,
}

impl AttributeRecord {
    /// Flattens an attribute for storage.
    #[must_use]
    pub fn from_domain(task_id: TaskId, attribute: &TaskAttribute) -> Self {
        Self {
            task_id: task_id.into_inner(),
            name: attribute.name().to_owned(),
            attribute_type: attribute.value().attribute_type().as_str().to_owned(),
            value: attribute.value().to_raw(),
            category: attribute.category().map(str::to_owned),
            indexed: attribute.is_indexed(),
            created_at: attribute.created_at(),
        }
    }

    /// Re-parses the raw value against its stored type.
    pub fn into_domain(self) -> TaskRepositoryResult<TaskAttribute> {
        let attribute_type = parse_text::<AttributeType>(&self.attribute_type)?;
        let value = AttributeValue::parse(&self.name, attribute_type, &self.value)
            .map_err(TaskRepositoryError::persistence)?;
        let mut attribute = TaskAttribute::new(self.name, value, self.created_at)
            .map_err(TaskRepositoryError::persistence)?;
        if let Some(category) = self.category {
            attribute = attribute.with_category(category);
        }
        if self.indexed {
            attribute = attribute.indexed();
        }
        Ok(attribute)
    }
}

/// Dependency edge row.
#[derive(Debug, Clone, PartialEq, Eq, Queryable, Selectable, Insertable, AsChangeset)]
#[diesel(table_name = task_dependencies)]
#[diesel(check_for_backend(diesel::pg::Pg))]
#[diesel(treat_none_as_null = true)]
pub struct DependencyRecord {
    /// Edge identifier.
    pub id: uuid::Uuid,
    /// Waiting task.
    pub dependent_task_id: uuid::Uuid,
    /// Task being waited on.
    pub prerequisite_task_id: uuid::Uuid,
    /// Edge type text.
    pub dependency_type: String,
    /// Status text.
    pub status: String,
    /// Whether the edge gates readiness.
    pub mandatory: bool,
    /// Data-edge artifact.
    pub output_artifact: Option<String>,
    /// Data-edge parameter.
    pub input_parameter: Option<String>,
    /// Waiver timestamp.
    pub waived_at: Option<DateTime<Utc>>,
    /// Waiver actor.
    pub waived_by: Option<String>,
    /// Waiver reason.
    pub waiver_reason: Option<String>,
    /// Satisfaction timestamp.
    pub satisfied_at: Option<DateTime<Utc>>,
    /// Creation timestamp.
    pub created_at: DateTime<Utc>,
}

impl DependencyRecord {
    /// Flattens an edge, spreading its waiver over three nullable columns.
    #[must_use]
    pub fn from_domain(dependency: &TaskDependency) -> Self {
        let waiver = dependency.waiver();
        Self {
            id: dependency.id().into_inner(),
            dependent_task_id: dependency.dependent_task_id().into_inner(),
            prerequisite_task_id: dependency.prerequisite_task_id().into_inner(),
            dependency_type: dependency.dependency_type().as_str().to_owned(),
            status: dependency.status().as_str().to_owned(),
            mandatory: dependency.is_mandatory(),
            output_artifact: dependency.output_artifact().map(str::to_owned),
            input_parameter: dependency.input_parameter().map(str::to_owned),
            waived_at: waiver.map(|value| value.waived_at),
            waived_by: waiver.map(|value| value.waived_by.clone()),
            waiver_reason: waiver.map(|value| value.reason.clone()),
            satisfied_at: dependency.satisfied_at(),
            created_at: dependency.created_at(),
        }
    }

    /// Rebuilds the edge, enforcing the all-or-nothing waiver rule.
    pub fn into_domain(self) -> TaskRepositoryResult<TaskDependency> {
        let data = PersistedDependencyData {
            id: DependencyId::from_uuid(self.id),
            dependent_task_id: TaskId::from_uuid(self.dependent_task_id),
            prerequisite_task_id: TaskId::from_uuid(self.prerequisite_task_id),
            dependency_type: parse_text::<DependencyType>(&self.dependency_type)?,
            status: parse_text::<DependencyStatus>(&self.status)?,
            mandatory: self.mandatory,
            output_artifact: self.output_artifact,
            input_parameter: self.input_parameter,
            waived_at: self.waived_at,
            waived_by: self.waived_by,
            waiver_reason: self.waiver_reason,
            satisfied_at: self.satisfied_at,
            created_at: self.created_at,
        };
        TaskDependency::from_persisted(data).map_err(TaskRepositoryError::persistence)
    }
}

/// Event row.
#[derive(Debug, Clone, PartialEq, Eq, Queryable, Selectable, Insertable)]
#[diesel(table_name = task_events)]
#[diesel(check_for_backend(diesel::pg::Pg))]
pub struct EventRecord {
    /// Event identifier.
    pub id: uuid::Uuid,
    /// Owning task.
    pub task_id: uuid::Uuid,
    /// Event type text.
    pub event_type: String,
    /// Category text.
    pub category: String,
    /// Acting party.
    pub actor: String,
    /// Payload document.
    pub payload: Value,
    /// Occurrence timestamp.
    pub occurred_at: DateTime<Utc>,
}

impl EventRecord {
    /// Flattens an event.
    #[must_use]
    pub fn from_domain(event: &TaskEvent) -> Self {
        Self {
            id: event.id().into_inner(),
            task_id: event.task_id().into_inner(),
            event_type: event.event_type().as_str().to_owned(),
            category: event.category().as_str().to_owned(),
            actor: event.actor().to_owned(),
            payload: event.payload().clone(),
            occurred_at: event.occurred_at(),
        }
    }

    /// Rebuilds the event.
    pub fn into_domain(self) -> TaskRepositoryResult<TaskEvent> {
        Ok(TaskEvent::from_persisted(
            EventId::from_uuid(self.id),
            TaskId::from_uuid(self.task_id),
            parse_text::<TaskEventType>(&self.event_type)?,
            parse_text::<EventCategory>(&self.category)?,
            self.actor,
            self.payload,
            self.occurred_at,
        ))
    }
}

/// Archive record row.
#[derive(Debug, Clone, PartialEq, Eq, Queryable, Selectable, Insertable)]
#[diesel(table_name = task_archive_records)]
#[diesel(check_for_backend(diesel::pg::Pg))]
pub struct ArchiveRecordRow {
    /// Record identifier.
    pub id: uuid::Uuid,
    /// Archived task.
    pub task_id: uuid::Uuid,
    /// Serialized aggregate.
    pub snapshot: Value,
    /// Reason.
    pub reason: String,
    /// Preserved artifacts document.
    pub artifacts: Value,
    /// Acting party.
    pub archived_by: String,
    /// Archival timestamp.
    pub archived_at: DateTime<Utc>,
}

impl ArchiveRecordRow {
    /// Flattens an archive record.
    pub fn from_domain(record: &ArchiveRecord) -> TaskRepositoryResult<Self> {
        Ok(Self {
            id: record.id().into_inner(),
            task_id: record.task_id().into_inner(),
            snapshot: record.snapshot().clone(),
            reason: record.reason().to_owned(),
            artifacts: serde_json::to_value(record.artifacts())
                .map_err(TaskRepositoryError::persistence)?,
            archived_by: record.archived_by().to_owned(),
            archived_at: record.archived_at(),
        })
    }

    /// Rebuilds the archive record.
    pub fn into_domain(self) -> TaskRepositoryResult<ArchiveRecord> {
        let artifacts: Vec<ArchivedArtifact> = from_json(self.artifacts)?;
        Ok(ArchiveRecord::from_persisted(
            ArchiveRecordId::from_uuid(self.id),
            TaskId::from_uuid(self.task_id),
            self.snapshot,
            self.reason,
            artifacts,
            self.archived_by,
            self.archived_at,
        ))
    }
}

fn parse_text<T>(raw: &str) -> TaskRepositoryResult<T>
where
    for<'a> T: TryFrom<&'a str>,
    for<'a> <T as TryFrom<&'a str>>::Error: std::error::Error + Send + Sync + 'static,
{
    T::try_from(raw).map_err(TaskRepositoryError::persistence)
}

fn from_json<T: serde::de::DeserializeOwned>(value: Value) -> TaskRepositoryResult<T> {
    serde_json::from_value(value).map_err(TaskRepositoryError::persistence)
}

fn to_db_minutes(minutes: Option<u32>) -> TaskRepositoryResult<Option<i32>> {
    minutes
        .map(i32::try_from)
        .transpose()
        .map_err(TaskRepositoryError::persistence)
}

fn from_db_minutes(minutes: Option<i32>) -> TaskRepositoryResult<Option<u32>> {
    minutes
        .map(u32::try_from)
        .transpose()
        .map_err(TaskRepositoryError::persistence)
}
