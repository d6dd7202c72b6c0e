//! `PostgreSQL` repository implementation for the task graph.
//!
//! Every call runs as one `SERIALIZABLE` transaction on a blocking thread.
//! Moves and edge inserts additionally take a transaction-scoped advisory
//! lock, so their reachability checks are serialized with the write that
//! follows. Serialization failures surface as retryable conflicts.

use super::{
    config::PostgresRepositoryConfig,
    models::{AttributeRecord, ArchiveRecordRow, DependencyRecord, EventRecord, TaskRecord},
    schema::{task_archive_records, task_attributes, task_dependencies, task_events, tasks},
};
use crate::task::{
    domain::{
        ArchiveInstruction, ArchiveRecord, AttributeValue, DependencyCheck, DependencyId,
        DependencyStatus, EventCategory, EventId, HierarchyPath, PersistedTaskData, SYSTEM_ACTOR,
        Task, TaskAttribute, TaskDependency, TaskDomainError, TaskEvent, TaskEventType, TaskId,
        TaskStatus,
    },
    ports::{
        ArchivedTask, DeleteMode, DependencyGraph, GetOptions, Page, ParentFilter, TaskQuery,
        TaskRepository, TaskRepositoryError, TaskRepositoryResult,
    },
};
use async_trait::async_trait;
use diesel::pg::PgConnection;
use diesel::prelude::*;
use diesel::r2d2::{ConnectionManager, Pool};
use diesel::result::{DatabaseErrorKind, Error as DieselError};
use diesel::sql_types::{BigInt, Bool, Uuid as SqlUuid};
use mockable::{Clock, DefaultClock};
use serde_json::json;
use std::collections::{HashMap, HashSet};
use std::fmt;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, info};

/// `PostgreSQL` connection pool type used by task adapters.
pub type TaskPgPool = Pool<ConnectionManager<PgConnection>>;

const HIERARCHY_LOCK_KEY: i64 = 0x7472_656c_0001;
const DEPENDENCY_LOCK_KEY: i64 = 0x7472_656c_0002;

/// `PostgreSQL`-backed task repository.
pub struct PostgresTaskRepository<C = DefaultClock> {
    pool: TaskPgPool,
    config: PostgresRepositoryConfig,
    clock: Arc<C>,
}

impl PostgresTaskRepository {
    /// Creates a repository with default configuration and the system clock.
    #[must_use]
    pub fn new(pool: TaskPgPool) -> Self {
        Self::with_config(pool, PostgresRepositoryConfig::default(), Arc::new(DefaultClock))
    }
}

impl<C> Clone for PostgresTaskRepository<C> {
    fn clone(&self) -> Self {
        Self {
            pool: self.pool.clone(),
            config: self.config,
            clock: Arc::clone(&self.clock),
        }
    }
}

impl<C> fmt::Debug for PostgresTaskRepository<C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PostgresTaskRepository")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl<C> PostgresTaskRepository<C>
where
    C: Clock + Send + Sync + 'static,
{
    /// Creates a repository with explicit configuration and clock.
    #[must_use]
    pub const fn with_config(pool: TaskPgPool, config: PostgresRepositoryConfig, clock: Arc<C>) -> Self {
        Self {
            pool,
            config,
            clock,
        }
    }

    /// Returns the active configuration.
    #[must_use]
    pub const fn config(&self) -> &PostgresRepositoryConfig {
        &self.config
    }

    async fn run_in_transaction<F, T>(&self, f: F) -> TaskRepositoryResult<T>
    where
        F: FnOnce(&mut PgConnection, &C) -> TxResult<T> + Send + 'static,
        T: Send + 'static,
    {
        let pool = self.pool.clone();
        let clock = Arc::clone(&self.clock);
        let timeout = self.config.statement_timeout;
        tokio::task::spawn_blocking(move || {
            let mut connection = pool.get().map_err(TaskRepositoryError::persistence)?;
            let started = Instant::now();
            connection
                .build_transaction()
                .serializable()
                .run(|tx| {
                    set_statement_timeout(tx, timeout)?;
                    f(tx, clock.as_ref())
                })
                .map_err(|err: TxError| err.into_repository_error(timeout, started.elapsed()))
        })
        .await
        .map_err(TaskRepositoryError::persistence)?
    }
}

/// Transaction-internal error: either a raw Diesel failure awaiting
/// classification or an already-classified repository error.
#[derive(Debug)]
enum TxError {
    Diesel(DieselError),
    Repository(TaskRepositoryError),
}

type TxResult<T> = Result<T, TxError>;

impl From<DieselError> for TxError {
    fn from(err: DieselError) -> Self {
        Self::Diesel(err)
    }
}

impl From<TaskRepositoryError> for TxError {
    fn from(err: TaskRepositoryError) -> Self {
        Self::Repository(err)
    }
}

impl From<TaskDomainError> for TxError {
    fn from(err: TaskDomainError) -> Self {
        Self::Repository(err.into())
    }
}

impl TxError {
    fn into_repository_error(self, timeout: Duration, elapsed: Duration) -> TaskRepositoryError {
        match self {
            Self::Repository(err) => err,
            Self::Diesel(err) => classify_database_error(err, timeout, elapsed),
        }
    }
}

/// Maps a Diesel failure onto the repository taxonomy.
///
/// Diesel names SQLSTATE 40001 as [`DatabaseErrorKind::SerializationFailure`]
/// but reports every other code, query cancellation (57014) included, as
/// [`DatabaseErrorKind::Unknown`]. The only cancellation this repository
/// arms is `statement_timeout`, so an unknown database error raised once
/// the transaction has used up its timeout is that timeout firing.
pub(super) fn classify_database_error(
    err: DieselError,
    timeout: Duration,
    elapsed: Duration,
) -> TaskRepositoryError {
    match err {
        DieselError::DatabaseError(DatabaseErrorKind::SerializationFailure, info) => {
            TaskRepositoryError::Conflict(info.message().to_owned())
        }
        DieselError::DatabaseError(DatabaseErrorKind::Unknown, _) if elapsed >= timeout => {
            TaskRepositoryError::Timeout(timeout)
        }
        other => TaskRepositoryError::persistence(other),
    }
}

#[derive(QueryableByName)]
struct ReachableRow {
    #[diesel(sql_type = Bool)]
    reachable: bool,
}

fn set_statement_timeout(connection: &mut PgConnection, timeout: Duration) -> TxResult<()> {
    // SET does not accept bind parameters; the value is an integer.
    diesel::sql_query(format!(
        "SET LOCAL statement_timeout = {}",
        timeout.as_millis()
    ))
    .execute(connection)?;
    Ok(())
}

fn advisory_lock(connection: &mut PgConnection, key: i64) -> TxResult<()> {
    diesel::sql_query("SELECT pg_advisory_xact_lock($1)")
        .bind::<BigInt, _>(key)
        .execute(connection)?;
    Ok(())
}

fn load_record(
    connection: &mut PgConnection,
    id: TaskId,
    include_deleted: bool,
) -> TxResult<Option<TaskRecord>> {
    let mut query = tasks::table
        .filter(tasks::id.eq(id.into_inner()))
        .select(TaskRecord::as_select())
        .into_boxed();
    if !include_deleted {
        query = query.filter(tasks::deleted.eq(false));
    }
    Ok(query.first::<TaskRecord>(connection).optional()?)
}

fn require_record(connection: &mut PgConnection, id: TaskId) -> TxResult<TaskRecord> {
    load_record(connection, id, false)?.ok_or_else(|| TaskRepositoryError::NotFound(id).into())
}

/// Derives the path a row should have from its parent's stored path.
///
/// An orphan whose parent row is gone keeps its own ancestry, repaired.
fn expected_path(connection: &mut PgConnection, row: &PersistedTaskData) -> TxResult<HierarchyPath> {
    let Some(parent_id) = row.parent_task_id else {
        return Ok(HierarchyPath::root(row.id));
    };
    Ok(match load_record(connection, parent_id, true)? {
        Some(parent) => HierarchyPath::from_raw(parent.hierarchy_path)
            .repaired_for(parent_id)
            .child(row.id),
        None => row.hierarchy_path.repaired_for(row.id),
    })
}

fn saved_corrections(connection: &mut PgConnection, task_id: TaskId) -> TxResult<HashSet<EventId>> {
    Ok(task_events::table
        .filter(task_events::task_id.eq(task_id.into_inner()))
        .filter(task_events::event_type.eq(TaskEventType::HierarchyCorrected.as_str()))
        .select(task_events::id)
        .load::<uuid::Uuid>(connection)?
        .into_iter()
        .map(EventId::from_uuid)
        .collect())
}

/// Brings `task` onto the stored position of `row`, repairing the path once
/// if the stored one is broken.
fn settle_stored_position(
    connection: &mut PgConnection,
    task: &mut Task,
    row: &PersistedTaskData,
    clock: &impl Clock,
) -> TxResult<()> {
    task.discard_unsaved_corrections(&saved_corrections(connection, row.id)?);
    task.reset_position(row.parent_task_id, row.hierarchy_path.clone(), row.hierarchy_level);
    task.settle_hierarchy(row.parent_task_id, expected_path(connection, row)?, clock);
    Ok(())
}

/// Writes the core row of `task`, keeping the stored soft-delete flag.
fn write_core(connection: &mut PgConnection, task: &Task, deleted: bool) -> TxResult<()> {
    let mut record = TaskRecord::from_domain(task)?;
    record.deleted = deleted;
    diesel::update(tasks::table.find(record.id))
        .set(&record)
        .execute(connection)?;
    Ok(())
}

/// Joins side tables onto core rows, preserving the row order.
fn assemble_all(
    connection: &mut PgConnection,
    records: Vec<TaskRecord>,
    clock: &impl Clock,
) -> TxResult<Vec<Task>> {
    let ids: Vec<uuid::Uuid> = records.iter().map(|record| record.id).collect();

    let mut attributes: HashMap<uuid::Uuid, Vec<TaskAttribute>> = HashMap::new();
    for row in task_attributes::table
        .filter(task_attributes::task_id.eq_any(&ids))
        .order((task_attributes::task_id, task_attributes::created_at, task_attributes::name))
        .select(AttributeRecord::as_select())
        .load::<AttributeRecord>(connection)?
    {
        let task_id = row.task_id;
        attributes.entry(task_id).or_default().push(row.into_domain()?);
    }

    let mut dependencies: HashMap<uuid::Uuid, Vec<TaskDependency>> = HashMap::new();
    for row in task_dependencies::table
        .filter(task_dependencies::dependent_task_id.eq_any(&ids))
        .order((task_dependencies::created_at, task_dependencies::id))
        .select(DependencyRecord::as_select())
        .load::<DependencyRecord>(connection)?
    {
        let task_id = row.dependent_task_id;
        dependencies.entry(task_id).or_default().push(row.into_domain()?);
    }

    let mut events: HashMap<uuid::Uuid, Vec<TaskEvent>> = HashMap::new();
    for row in task_events::table
        .filter(task_events::task_id.eq_any(&ids))
        .order((task_events::occurred_at, task_events::id))
        .select(EventRecord::as_select())
        .load::<EventRecord>(connection)?
    {
        let task_id = row.task_id;
        events.entry(task_id).or_default().push(row.into_domain()?);
    }

    records
        .into_iter()
        .map(|record| {
            let id = record.id;
            let task = Task::from_persisted(record.into_persisted()?, clock)
                .with_attributes(attributes.remove(&id).unwrap_or_default())
                .with_dependencies(dependencies.remove(&id).unwrap_or_default())
                .with_events(events.remove(&id).unwrap_or_default());
            Ok(task)
        })
        .collect()
}

fn assemble_one(
    connection: &mut PgConnection,
    record: TaskRecord,
    clock: &impl Clock,
) -> TxResult<Task> {
    let id = TaskId::from_uuid(record.id);
    assemble_all(connection, vec![record], clock)?
        .pop()
        .ok_or_else(|| TaskRepositoryError::NotFound(id).into())
}

fn insert_events(connection: &mut PgConnection, events: &[TaskEvent]) -> TxResult<()> {
    if events.is_empty() {
        return Ok(());
    }
    let rows: Vec<EventRecord> = events.iter().map(EventRecord::from_domain).collect();
    diesel::insert_into(task_events::table)
        .values(&rows)
        .on_conflict_do_nothing()
        .execute(connection)?;
    Ok(())
}

fn system_event(
    connection: &mut PgConnection,
    task_id: TaskId,
    event_type: TaskEventType,
    category: EventCategory,
    payload: serde_json::Value,
    clock: &impl Clock,
) -> TxResult<()> {
    let event = TaskEvent::new(task_id, event_type, category, SYSTEM_ACTOR, payload, clock.utc());
    insert_events(connection, std::slice::from_ref(&event))
}

fn replace_attributes(connection: &mut PgConnection, task: &Task) -> TxResult<()> {
    diesel::delete(task_attributes::table.filter(task_attributes::task_id.eq(task.id().into_inner())))
        .execute(connection)?;
    let rows: Vec<AttributeRecord> = task
        .attributes()
        .iter()
        .map(|attribute| AttributeRecord::from_domain(task.id(), attribute))
        .collect();
    if !rows.is_empty() {
        diesel::insert_into(task_attributes::table)
            .values(&rows)
            .execute(connection)?;
    }
    Ok(())
}

fn prerequisites_reach(
    connection: &mut PgConnection,
    start: TaskId,
    target: TaskId,
) -> TxResult<bool> {
    let row = diesel::sql_query(concat!(
        "WITH RECURSIVE reachable(task_id) AS ( ",
        "SELECT prerequisite_task_id FROM task_dependencies WHERE dependent_task_id = $1 ",
        "UNION ",
        "SELECT d.prerequisite_task_id FROM task_dependencies d ",
        "JOIN reachable r ON d.dependent_task_id = r.task_id ",
        ") SELECT EXISTS (SELECT 1 FROM reachable WHERE task_id = $2) AS reachable",
    ))
    .bind::<SqlUuid, _>(start.into_inner())
    .bind::<SqlUuid, _>(target.into_inner())
    .get_result::<ReachableRow>(connection)?;
    Ok(row.reachable)
}

fn insert_dependency(
    connection: &mut PgConnection,
    dependency: &TaskDependency,
    clock: &impl Clock,
) -> TxResult<TaskDependency> {
    dependency.validate()?;
    let dependent = dependency.dependent_task_id();
    let prerequisite = dependency.prerequisite_task_id();
    require_record(connection, dependent)?;
    let prerequisite_task =
        Task::from_persisted(require_record(connection, prerequisite)?.into_persisted()?, clock);

    let existing: i64 = task_dependencies::table
        .filter(task_dependencies::dependent_task_id.eq(dependent.into_inner()))
        .filter(task_dependencies::prerequisite_task_id.eq(prerequisite.into_inner()))
        .count()
        .get_result(connection)?;
    if existing > 0 {
        return Err(TaskDomainError::DuplicateDependency {
            dependent,
            prerequisite,
        }
        .into());
    }
    if prerequisites_reach(connection, prerequisite, dependent)? {
        return Err(TaskRepositoryError::DependencyCycle {
            dependent,
            prerequisite,
        }
        .into());
    }

    let mut edge = dependency.clone();
    let already_met = edge.status() == DependencyStatus::Pending
        && edge.is_satisfied_by(Some(&prerequisite_task));
    if already_met {
        edge.mark_satisfied(clock.utc());
    }
    diesel::insert_into(task_dependencies::table)
        .values(&DependencyRecord::from_domain(&edge))
        .execute(connection)?;
    system_event(
        connection,
        dependent,
        TaskEventType::DependencyAdded,
        EventCategory::Dependency,
        json!({
            "dependency_id": edge.id().to_string(),
            "prerequisite_task_id": prerequisite.to_string(),
            "dependency_type": edge.dependency_type().as_str(),
        }),
        clock,
    )?;
    if already_met {
        system_event(
            connection,
            dependent,
            TaskEventType::DependencySatisfied,
            EventCategory::Dependency,
            json!({
                "dependency_id": edge.id().to_string(),
                "prerequisite_task_id": prerequisite.to_string(),
            }),
            clock,
        )?;
    }
    Ok(edge)
}

fn satisfy_inbound_edges(
    connection: &mut PgConnection,
    completed: &Task,
    clock: &impl Clock,
) -> TxResult<()> {
    let pending = task_dependencies::table
        .filter(task_dependencies::prerequisite_task_id.eq(completed.id().into_inner()))
        .filter(task_dependencies::status.eq(DependencyStatus::Pending.as_str()))
        .select(DependencyRecord::as_select())
        .load::<DependencyRecord>(connection)?;
    let timestamp = clock.utc();
    for row in pending {
        let mut edge = row.into_domain()?;
        if !edge.is_satisfied_by(Some(completed)) {
            continue;
        }
        edge.mark_satisfied(timestamp);
        diesel::update(task_dependencies::table.find(edge.id().into_inner()))
            .set(&DependencyRecord::from_domain(&edge))
            .execute(connection)?;
        system_event(
            connection,
            edge.dependent_task_id(),
            TaskEventType::DependencySatisfied,
            EventCategory::Dependency,
            json!({
                "dependency_id": edge.id().to_string(),
                "prerequisite_task_id": completed.id().to_string(),
            }),
            clock,
        )?;
    }
    Ok(())
}

fn to_sql_window(value: usize) -> TxResult<i64> {
    i64::try_from(value).map_err(|err| TaskRepositoryError::persistence(err).into())
}

fn query_records(
    connection: &mut PgConnection,
    filter: &TaskQuery,
    page: Page,
) -> TxResult<Vec<TaskRecord>> {
    let mut query = tasks::table.select(TaskRecord::as_select()).into_boxed();
    if !filter.include_deleted {
        query = query.filter(tasks::deleted.eq(false));
    }
    if !filter.statuses.is_empty() {
        let statuses: Vec<&str> = filter.statuses.iter().map(|status| status.as_str()).collect();
        query = query.filter(tasks::status.eq_any(statuses));
    }
    if !filter.stages.is_empty() {
        let stages: Vec<&str> = filter.stages.iter().map(|stage| stage.as_str()).collect();
        query = query.filter(tasks::lifecycle_stage.eq_any(stages));
    }
    if let Some(task_type) = filter.task_type {
        query = query.filter(tasks::task_type.eq(task_type.as_str()));
    }
    if let Some(specialist) = filter.specialist_type {
        query = query.filter(tasks::specialist_type.eq(specialist.as_str()));
    }
    if let Some(assignee) = filter.assigned_to.as_deref() {
        query = query.filter(tasks::assigned_to.eq(assignee.to_owned()));
    }
    match filter.parent {
        None => {}
        Some(ParentFilter::Root) => query = query.filter(tasks::parent_task_id.is_null()),
        Some(ParentFilter::ChildOf(parent)) => {
            query = query.filter(tasks::parent_task_id.eq(parent.into_inner()));
        }
    }
    if let Some(after) = filter.created_after {
        query = query.filter(tasks::created_at.ge(after));
    }
    if let Some(before) = filter.created_before {
        query = query.filter(tasks::created_at.lt(before));
    }
    if let Some(after) = filter.updated_after {
        query = query.filter(tasks::updated_at.ge(after));
    }
    if let Some(before) = filter.updated_before {
        query = query.filter(tasks::updated_at.lt(before));
    }
    if let Some(tag) = filter.tag.as_ref() {
        query = query.filter(tasks::tags.contains(json!([tag])));
    }
    query = query
        .order((tasks::created_at.asc(), tasks::id.asc()))
        .offset(to_sql_window(page.offset)?);
    if let Some(limit) = page.limit {
        query = query.limit(to_sql_window(limit)?);
    }
    Ok(query.load::<TaskRecord>(connection)?)
}

#[async_trait]
impl<C> TaskRepository for PostgresTaskRepository<C>
where
    C: Clock + Send + Sync + 'static,
{
    async fn create(&self, task: &Task) -> TaskRepositoryResult<Task> {
        let submitted = task.clone();
        self.run_in_transaction(move |connection, clock| {
            let task_id = submitted.id();
            if load_record(connection, task_id, true)?.is_some() {
                return Err(TaskRepositoryError::DuplicateTask(task_id).into());
            }

            let mut stored = submitted.clone();
            let expected_path = match submitted.parent_task_id() {
                Some(parent_id) => {
                    HierarchyPath::from_raw(require_record(connection, parent_id)?.hierarchy_path)
                        .child(task_id)
                }
                None => HierarchyPath::root(task_id),
            };
            stored.settle_hierarchy(submitted.parent_task_id(), expected_path, clock);
            stored.reconcile_lifecycle(None, clock)?;

            diesel::insert_into(tasks::table)
                .values(&TaskRecord::from_domain(&stored)?)
                .execute(connection)
                .map_err(|err| match err {
                    DieselError::DatabaseError(DatabaseErrorKind::UniqueViolation, _) => {
                        TxError::Repository(TaskRepositoryError::DuplicateTask(task_id))
                    }
                    other => other.into(),
                })?;
            replace_attributes(connection, &stored)?;
            insert_events(connection, stored.events())?;
            if !submitted.dependencies().is_empty() {
                advisory_lock(connection, DEPENDENCY_LOCK_KEY)?;
                for dependency in submitted.dependencies() {
                    insert_dependency(connection, dependency, clock)?;
                }
            }
            debug!(task_id = %task_id, path = %stored.hierarchy_path(), "created task");

            let record = require_record(connection, task_id)?;
            assemble_one(connection, record, clock)
        })
        .await
    }

    async fn get(&self, id: TaskId, options: GetOptions) -> TaskRepositoryResult<Option<Task>> {
        self.run_in_transaction(move |connection, clock| {
            let Some(record) = load_record(connection, id, options.include_deleted())? else {
                return Ok(None);
            };
            let task = assemble_one(connection, record, clock)?;
            if !options.include_children() {
                return Ok(Some(task));
            }
            let children = tasks::table
                .filter(tasks::parent_task_id.eq(id.into_inner()))
                .filter(tasks::deleted.eq(false))
                .order((tasks::created_at.asc(), tasks::id.asc()))
                .select(TaskRecord::as_select())
                .load::<TaskRecord>(connection)?;
            let loaded = assemble_all(connection, children, clock)?;
            Ok(Some(task.with_children(loaded)))
        })
        .await
    }

    async fn update(&self, task: &Task) -> TaskRepositoryResult<Task> {
        let mut stored = task.clone();
        self.run_in_transaction(move |connection, clock| {
            let existing = require_record(connection, stored.id())?.into_persisted()?;

            stored.reconcile_lifecycle(Some(existing.lifecycle_stage), clock)?;
            settle_stored_position(connection, &mut stored, &existing, clock)?;
            write_core(connection, &stored, existing.deleted)?;
            replace_attributes(connection, &stored)?;
            insert_events(connection, stored.events())?;
            if stored.status() == TaskStatus::Completed {
                satisfy_inbound_edges(connection, &stored, clock)?;
            }

            let reloaded = require_record(connection, stored.id())?;
            assemble_one(connection, reloaded, clock)
        })
        .await
    }

    async fn delete(&self, id: TaskId, mode: DeleteMode) -> TaskRepositoryResult<bool> {
        self.run_in_transaction(move |connection, clock| match mode {
            DeleteMode::Soft => {
                let Some(record) = load_record(connection, id, false)? else {
                    return Ok(false);
                };
                let row = record.into_persisted()?;
                let mut task = Task::from_persisted(row.clone(), clock);
                settle_stored_position(connection, &mut task, &row, clock)?;
                task.mark_deleted(SYSTEM_ACTOR, clock);
                write_core(connection, &task, true)?;
                insert_events(connection, task.events())?;
                debug!(task_id = %id, "soft-deleted task");
                Ok(true)
            }
            DeleteMode::Hard => {
                let key = id.into_inner();
                diesel::delete(
                    task_dependencies::table.filter(
                        task_dependencies::dependent_task_id
                            .eq(key)
                            .or(task_dependencies::prerequisite_task_id.eq(key)),
                    ),
                )
                .execute(connection)?;
                diesel::delete(task_attributes::table.filter(task_attributes::task_id.eq(key)))
                    .execute(connection)?;
                diesel::delete(task_events::table.filter(task_events::task_id.eq(key)))
                    .execute(connection)?;
                let removed = diesel::delete(tasks::table.find(key)).execute(connection)?;
                if removed > 0 {
                    info!(task_id = %id, "hard-deleted task");
                }
                Ok(removed > 0)
            }
        })
        .await
    }

    async fn subtree(
        &self,
        root: TaskId,
        max_depth: Option<u32>,
    ) -> TaskRepositoryResult<Vec<Task>> {
        self.run_in_transaction(move |connection, clock| {
            let root_record = require_record(connection, root)?;
            let prefix = format!("{}/%", root_record.hierarchy_path);
            let mut query = tasks::table
                .filter(tasks::deleted.eq(false))
                .filter(
                    tasks::id
                        .eq(root.into_inner())
                        .or(tasks::hierarchy_path.like(prefix)),
                )
                .select(TaskRecord::as_select())
                .into_boxed();
            if let Some(depth) = max_depth {
                let relative = i32::try_from(depth).unwrap_or(i32::MAX);
                query = query.filter(
                    tasks::hierarchy_level.le(root_record.hierarchy_level.saturating_add(relative)),
                );
            }
            let records = query
                .order((
                    tasks::hierarchy_level.asc(),
                    tasks::created_at.asc(),
                    tasks::id.asc(),
                ))
                .load::<TaskRecord>(connection)?;
            assemble_all(connection, records, clock)
        })
        .await
    }

    async fn ancestors(&self, id: TaskId) -> TaskRepositoryResult<Vec<Task>> {
        self.run_in_transaction(move |connection, clock| {
            let row = require_record(connection, id)?.into_persisted()?;
            let ancestor_ids = expected_path(connection, &row)?.ancestor_ids()?;
            let keys: Vec<uuid::Uuid> = ancestor_ids.iter().map(|ancestor| ancestor.into_inner()).collect();
            let mut by_id: HashMap<uuid::Uuid, TaskRecord> = tasks::table
                .filter(tasks::id.eq_any(&keys))
                .filter(tasks::deleted.eq(false))
                .select(TaskRecord::as_select())
                .load::<TaskRecord>(connection)?
                .into_iter()
                .map(|row| (row.id, row))
                .collect();
            let ordered = keys.iter().filter_map(|key| by_id.remove(key)).collect();
            assemble_all(connection, ordered, clock)
        })
        .await
    }

    async fn move_task(&self, id: TaskId, new_parent: Option<TaskId>) -> TaskRepositoryResult<Task> {
        self.run_in_transaction(move |connection, clock| {
            advisory_lock(connection, HIERARCHY_LOCK_KEY)?;
            let existing = require_record(connection, id)?;
            let old_path = HierarchyPath::from_raw(existing.hierarchy_path.clone());

            let new_path = match new_parent {
                Some(parent_id) => {
                    let parent = require_record(connection, parent_id)?;
                    let mut cursor = Some(parent_id);
                    let mut visited = HashSet::new();
                    while let Some(current) = cursor {
                        if current == id {
                            return Err(TaskRepositoryError::HierarchyCycle {
                                task_id: id,
                                new_parent: parent_id,
                            }
                            .into());
                        }
                        if !visited.insert(current) {
                            break;
                        }
                        cursor = tasks::table
                            .filter(tasks::id.eq(current.into_inner()))
                            .select(tasks::parent_task_id)
                            .first::<Option<uuid::Uuid>>(connection)
                            .optional()?
                            .flatten()
                            .map(TaskId::from_uuid);
                    }
                    HierarchyPath::from_raw(parent.hierarchy_path).child(id)
                }
                None => HierarchyPath::root(id),
            };

            let old_level = i64::from(existing.hierarchy_level);
            let new_level = i64::from(new_path.level());
            let descendants = diesel::sql_query(concat!(
                "UPDATE tasks SET hierarchy_path = $2 || substr(hierarchy_path, length($1) + 1), ",
                "hierarchy_level = hierarchy_level + $3 ",
                "WHERE hierarchy_path LIKE $1 || '/%'",
            ))
            .bind::<diesel::sql_types::Text, _>(old_path.as_str())
            .bind::<diesel::sql_types::Text, _>(new_path.as_str())
            .bind::<diesel::sql_types::Integer, _>(
                i32::try_from(new_level - old_level).map_err(TaskRepositoryError::persistence)?,
            )
            .execute(connection)?;

            let timestamp = clock.utc();
            diesel::update(tasks::table.find(id.into_inner()))
                .set((
                    tasks::parent_task_id.eq(new_parent.map(TaskId::into_inner)),
                    tasks::hierarchy_path.eq(new_path.as_str()),
                    tasks::hierarchy_level
                        .eq(i32::try_from(new_path.level()).map_err(TaskRepositoryError::persistence)?),
                    tasks::updated_at.eq(timestamp),
                ))
                .execute(connection)?;
            system_event(
                connection,
                id,
                TaskEventType::Moved,
                EventCategory::Hierarchy,
                json!({
                    "from_parent": existing.parent_task_id.map(|parent| parent.to_string()),
                    "to_parent": new_parent.map(|parent| parent.to_string()),
                    "old_path": old_path.as_str(),
                    "new_path": new_path.as_str(),
                    "descendants_rewritten": descendants,
                }),
                clock,
            )?;
            info!(task_id = %id, new_path = %new_path, descendants, "moved task");

            let record = require_record(connection, id)?;
            assemble_one(connection, record, clock)
        })
        .await
    }

    async fn add_dependency(
        &self,
        dependency: &TaskDependency,
    ) -> TaskRepositoryResult<TaskDependency> {
        let edge = dependency.clone();
        self.run_in_transaction(move |connection, clock| {
            advisory_lock(connection, DEPENDENCY_LOCK_KEY)?;
            insert_dependency(connection, &edge, clock)
        })
        .await
    }

    async fn waive_dependency(
        &self,
        id: DependencyId,
        waived_by: &str,
        reason: &str,
    ) -> TaskRepositoryResult<TaskDependency> {
        let actor = waived_by.to_owned();
        let justification = reason.to_owned();
        self.run_in_transaction(move |connection, clock| {
            let row = task_dependencies::table
                .find(id.into_inner())
                .select(DependencyRecord::as_select())
                .first::<DependencyRecord>(connection)
                .optional()?
                .ok_or(TaskRepositoryError::DependencyNotFound(id))?;
            let mut edge = row.into_domain()?;
            edge.waive(&actor, &justification, clock.utc())?;
            diesel::update(task_dependencies::table.find(id.into_inner()))
                .set(&DependencyRecord::from_domain(&edge))
                .execute(connection)?;
            let event = TaskEvent::new(
                edge.dependent_task_id(),
                TaskEventType::DependencyWaived,
                EventCategory::Dependency,
                &actor,
                json!({
                    "dependency_id": id.to_string(),
                    "prerequisite_task_id": edge.prerequisite_task_id().to_string(),
                    "reason": justification,
                }),
                clock.utc(),
            );
            insert_events(connection, std::slice::from_ref(&event))?;
            Ok(edge)
        })
        .await
    }

    async fn check_dependencies(&self, id: TaskId) -> TaskRepositoryResult<DependencyCheck> {
        self.run_in_transaction(move |connection, clock| {
            let record = require_record(connection, id)?;
            let task = assemble_one(connection, record, clock)?;
            let keys: Vec<uuid::Uuid> = task
                .dependencies()
                .iter()
                .map(|edge| edge.prerequisite_task_id().into_inner())
                .collect();
            let prerequisites = tasks::table
                .filter(tasks::id.eq_any(&keys))
                .filter(tasks::deleted.eq(false))
                .select(TaskRecord::as_select())
                .load::<TaskRecord>(connection)?
                .into_iter()
                .map(|row| Ok(Task::from_persisted(row.into_persisted()?, clock)))
                .collect::<TxResult<Vec<Task>>>()?;
            Ok(task.check_dependencies_satisfied(&prerequisites))
        })
        .await
    }

    async fn dependency_graph(&self) -> TaskRepositoryResult<DependencyGraph> {
        self.run_in_transaction(move |connection, _clock| {
            let edges = task_dependencies::table
                .inner_join(tasks::table.on(tasks::id.eq(task_dependencies::dependent_task_id)))
                .filter(tasks::deleted.eq(false))
                .order((
                    task_dependencies::dependent_task_id.asc(),
                    task_dependencies::prerequisite_task_id.asc(),
                ))
                .select((
                    task_dependencies::dependent_task_id,
                    task_dependencies::prerequisite_task_id,
                ))
                .load::<(uuid::Uuid, uuid::Uuid)>(connection)?;
            let mut graph = DependencyGraph::new();
            for (dependent, prerequisite) in edges {
                graph
                    .entry(TaskId::from_uuid(dependent))
                    .or_default()
                    .push(TaskId::from_uuid(prerequisite));
            }
            for prerequisites in graph.values_mut() {
                prerequisites.sort();
            }
            Ok(graph)
        })
        .await
    }

    async fn query(&self, filter: &TaskQuery, page: Page) -> TaskRepositoryResult<Vec<Task>> {
        let predicate = filter.clone();
        self.run_in_transaction(move |connection, clock| {
            let records = query_records(connection, &predicate, page)?;
            assemble_all(connection, records, clock)
        })
        .await
    }

    async fn search_by_attribute(
        &self,
        name: &str,
        value: &AttributeValue,
    ) -> TaskRepositoryResult<Vec<Task>> {
        let attribute_name = name.to_owned();
        let attribute_type = value.attribute_type();
        let raw = value.to_raw();
        let wanted = value.clone();
        self.run_in_transaction(move |connection, clock| {
            let candidates = task_attributes::table
                .filter(task_attributes::name.eq(&attribute_name))
                .filter(task_attributes::indexed.eq(true))
                .filter(task_attributes::attribute_type.eq(attribute_type.as_str()))
                .select(AttributeRecord::as_select())
                .load::<AttributeRecord>(connection)?;
            let mut keys = Vec::new();
            for row in candidates {
                let task_id = row.task_id;
                // Raw text differs for equal JSON documents, so compare parsed values.
                if row.value == raw || row.into_domain()?.value() == &wanted {
                    keys.push(task_id);
                }
            }
            let records = tasks::table
                .filter(tasks::id.eq_any(&keys))
                .filter(tasks::deleted.eq(false))
                .order((tasks::created_at.asc(), tasks::id.asc()))
                .select(TaskRecord::as_select())
                .load::<TaskRecord>(connection)?;
            assemble_all(connection, records, clock)
        })
        .await
    }

    async fn archive(
        &self,
        id: TaskId,
        instruction: &ArchiveInstruction,
    ) -> TaskRepositoryResult<ArchivedTask> {
        let instruction = instruction.clone();
        self.run_in_transaction(move |connection, clock| {
            let record = require_record(connection, id)?;
            let row = record.clone().into_persisted()?;
            let mut task = assemble_one(connection, record, clock)?;
            settle_stored_position(connection, &mut task, &row, clock)?;
            let archive = task
                .archive(&instruction, clock)
                .map_err(TaskRepositoryError::persistence)?;

            write_core(connection, &task, row.deleted)?;
            insert_events(connection, task.events())?;
            diesel::insert_into(task_archive_records::table)
                .values(&ArchiveRecordRow::from_domain(&archive)?)
                .execute(connection)?;
            debug!(task_id = %id, stage = %task.lifecycle_stage(), "archived task");

            let reloaded = require_record(connection, id)?;
            Ok(ArchivedTask {
                task: assemble_one(connection, reloaded, clock)?,
                record: archive,
            })
        })
        .await
    }

    async fn archive_records(&self, task_id: TaskId) -> TaskRepositoryResult<Vec<ArchiveRecord>> {
        self.run_in_transaction(move |connection, _clock| {
            task_archive_records::table
                .filter(task_archive_records::task_id.eq(task_id.into_inner()))
                .order((task_archive_records::archived_at.asc(), task_archive_records::id.asc()))
                .select(ArchiveRecordRow::as_select())
                .load::<ArchiveRecordRow>(connection)?
                .into_iter()
                .map(|row| Ok(row.into_domain()?))
                .collect()
        })
        .await
    }
}
