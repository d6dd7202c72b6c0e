//! Diesel schema for task graph persistence.

diesel::table! {
    /// Thin task core rows.
    tasks (id) {
        /// Task identifier.
        id -> Uuid,
        /// Parent identifier, null for roots.
        parent_task_id -> Nullable<Uuid>,
        /// Materialized path from the root.
        hierarchy_path -> Text,
        /// Depth below the root.
        hierarchy_level -> Int4,
        /// Title.
        #[max_length = 500]
        title -> Varchar,
        /// Description.
        description -> Nullable<Text>,
        /// Kind of work.
        #[max_length = 50]
        task_type -> Varchar,
        /// Fine-grained status.
        #[max_length = 50]
        status -> Varchar,
        /// Coarse lifecycle stage.
        #[max_length = 50]
        lifecycle_stage -> Varchar,
        /// Specialist role.
        #[max_length = 50]
        specialist_type -> Nullable<Varchar>,
        /// Concrete assignee.
        #[max_length = 255]
        assigned_to -> Nullable<Varchar>,
        /// Estimated difficulty.
        #[max_length = 50]
        complexity -> Nullable<Varchar>,
        /// Estimated effort in minutes.
        estimated_effort_minutes -> Nullable<Int4>,
        /// Recorded effort in minutes.
        actual_effort_minutes -> Nullable<Int4>,
        /// Completion percentage.
        progress_percent -> Int2,
        /// Free-form context.
        context -> Jsonb,
        /// Free-form configuration.
        configuration -> Jsonb,
        /// Tag list.
        tags -> Jsonb,
        /// Output artifacts by name.
        artifacts -> Jsonb,
        /// Creation timestamp.
        created_at -> Timestamptz,
        /// Last update timestamp.
        updated_at -> Timestamptz,
        /// First activation timestamp.
        started_at -> Nullable<Timestamptz>,
        /// Resolution timestamp.
        completed_at -> Nullable<Timestamptz>,
        /// Soft-delete flag.
        deleted -> Bool,
    }
}

diesel::table! {
    /// Typed task attributes, one row per name.
    task_attributes (task_id, name) {
        /// Owning task.
        task_id -> Uuid,
        /// Attribute name.
        #[max_length = 255]
        name -> Varchar,
        /// Declared value type.
        #[max_length = 20]
        attribute_type -> Varchar,
        /// Raw value text.
        value -> Text,
        /// Optional grouping.
        #[max_length = 100]
        category -> Nullable<Varchar>,
        /// Whether value searches may use this attribute.
        indexed -> Bool,
        /// Creation timestamp.
        created_at -> Timestamptz,
    }
}

diesel::table! {
    /// Dependency edges between tasks.
    task_dependencies (id) {
        /// Edge identifier.
        id -> Uuid,
        /// Waiting task.
        dependent_task_id -> Uuid,
        /// Task being waited on.
        prerequisite_task_id -> Uuid,
        /// Edge type.
        #[max_length = 20]
        dependency_type -> Varchar,
        /// Edge status.
        #[max_length = 20]
        status -> Varchar,
        /// Whether the edge gates readiness.
        mandatory -> Bool,
        /// Artifact name for data edges.
        #[max_length = 255]
        output_artifact -> Nullable<Varchar>,
        /// Parameter name for data edges.
        #[max_length = 255]
        input_parameter -> Nullable<Varchar>,
        /// Waiver timestamp.
        waived_at -> Nullable<Timestamptz>,
        /// Waiver actor.
        #[max_length = 255]
        waived_by -> Nullable<Varchar>,
        /// Waiver reason.
        waiver_reason -> Nullable<Text>,
        /// When the edge became satisfied.
        satisfied_at -> Nullable<Timestamptz>,
        /// Creation timestamp.
        created_at -> Timestamptz,
    }
}

diesel::table! {
    /// Append-only task audit events.
    task_events (id) {
        /// Event identifier.
        id -> Uuid,
        /// Owning task.
        task_id -> Uuid,
        /// Event type.
        #[max_length = 50]
        event_type -> Varchar,
        /// Event category.
        #[max_length = 20]
        category -> Varchar,
        /// Acting party.
        #[max_length = 255]
        actor -> Varchar,
        /// Structured payload.
        payload -> Jsonb,
        /// Occurrence timestamp.
        occurred_at -> Timestamptz,
    }
}

diesel::table! {
    /// Snapshots written when tasks are archived.
    task_archive_records (id) {
        /// Record identifier.
        id -> Uuid,
        /// Archived task.
        task_id -> Uuid,
        /// Serialized aggregate.
        snapshot -> Jsonb,
        /// Archival reason.
        reason -> Text,
        /// Preserved artifacts.
        artifacts -> Jsonb,
        /// Acting party.
        #[max_length = 255]
        archived_by -> Varchar,
        /// Archival timestamp.
        archived_at -> Timestamptz,
    }
}

diesel::joinable!(task_attributes -> tasks (task_id));
diesel::joinable!(task_events -> tasks (task_id));

diesel::allow_tables_to_appear_in_same_query!(
    tasks,
    task_attributes,
    task_dependencies,
    task_events,
    task_archive_records,
);
