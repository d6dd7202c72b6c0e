//! Archive record and attribute search tests against `PostgreSQL`.

use std::sync::Arc;

use eyre::{OptionExt, ensure};
use mockable::{Clock, DefaultClock};
use rstest::rstest;
use trellis::task::{
    adapters::memory::InMemoryArtifactStore,
    domain::{
        AttributeType, AttributeValue, DependencyStatus, DependencyType, LifecycleStage, Task,
        TaskDependency, TaskStatus,
    },
    ports::TaskRepository,
    services::{AddAttributeRequest, ArchivalManager, ArchiveRequest},
};

use super::helpers::{PostgresContext, context};

#[rstest]
#[tokio::test(flavor = "multi_thread")]
async fn postgres_archives_subtree_with_records(
    context: eyre::Result<Option<PostgresContext>>,
) -> eyre::Result<()> {
    let Some(ctx) = context? else {
        return Ok(());
    };
    let root = ctx.store("Sprint", None).await?;
    let child = ctx.store("Story", Some(&root)).await?;
    let manager = ArchivalManager::new(
        Arc::clone(&ctx.repository),
        Arc::new(InMemoryArtifactStore::new()),
        Arc::new(DefaultClock),
    );

    let result = manager
        .archive_task(ArchiveRequest::new(root.id(), "sprint closed", "lead").with_subtasks())
        .await?;

    ensure!(result.archived_count == 2);
    let records = ctx.repository.archive_records(child.id()).await?;
    let record = records.first().ok_or_eyre("child archive record")?;
    ensure!(record.reason() == "sprint closed");
    ensure!(record.snapshot()["title"] == "Story");
    let retired = ctx
        .repository
        .find_by_id(child.id())
        .await?
        .ok_or_eyre("child should remain readable")?;
    ensure!(retired.lifecycle_stage() == LifecycleStage::Cancelled);
    Ok(())
}

#[rstest]
#[tokio::test(flavor = "multi_thread")]
async fn postgres_search_uses_indexed_attributes_only(
    context: eyre::Result<Option<PostgresContext>>,
) -> eyre::Result<()> {
    let Some(ctx) = context? else {
        return Ok(());
    };
    let indexed = ctx.store("Indexed", None).await?;
    let plain = ctx.store("Plain", None).await?;
    for (task, searchable) in [(&indexed, true), (&plain, false)] {
        let mut request =
            AddAttributeRequest::new(task.id(), "priority", AttributeType::Number, "3", "pm");
        if searchable {
            request = request.indexed();
        }
        ctx.service.add_attribute(request).await?;
    }

    let value = AttributeValue::parse("priority", AttributeType::Number, "3")?;
    let found = ctx.repository.search_by_attribute("priority", &value).await?;

    ensure!(found.iter().map(Task::id).collect::<Vec<_>>() == vec![indexed.id()]);
    let stored = found.first().and_then(|task| task.get_attribute("priority"));
    ensure!(stored == Some(&value));
    Ok(())
}

#[rstest]
#[tokio::test(flavor = "multi_thread")]
async fn postgres_edge_to_finished_prerequisite_survives_archival(
    context: eyre::Result<Option<PostgresContext>>,
) -> eyre::Result<()> {
    let Some(ctx) = context? else {
        return Ok(());
    };
    let spike = ctx.store("Spike", None).await?;
    let build = ctx.store("Build", None).await?;
    let mut finished = spike.clone();
    finished.set_status(TaskStatus::Completed, "alice", &DefaultClock);
    ctx.repository.update(&finished).await?;

    let edge = ctx
        .repository
        .add_dependency(&TaskDependency::new(
            build.id(),
            spike.id(),
            DependencyType::Completion,
            DefaultClock.utc(),
        ))
        .await?;
    let manager = ArchivalManager::new(
        Arc::clone(&ctx.repository),
        Arc::new(InMemoryArtifactStore::new()),
        Arc::new(DefaultClock),
    );
    manager
        .archive_task(ArchiveRequest::new(spike.id(), "spike answered", "lead"))
        .await?;

    ensure!(edge.status() == DependencyStatus::Satisfied);
    ensure!(edge.satisfied_at().is_some());
    let archived = ctx
        .repository
        .find_by_id(spike.id())
        .await?
        .ok_or_eyre("archived spike should load")?;
    ensure!(archived.lifecycle_stage() == LifecycleStage::Archived);
    ensure!(ctx.repository.check_dependencies(build.id()).await?.all_satisfied());
    Ok(())
}
