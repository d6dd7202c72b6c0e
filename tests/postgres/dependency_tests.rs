//! Dependency persistence tests against `PostgreSQL`.

use eyre::{OptionExt, ensure};
use mockable::{Clock, DefaultClock};
use rstest::rstest;
use trellis::task::{
    domain::{DependencyStatus, DependencyType, TaskDependency, TaskEventType},
    ports::{TaskRepository, TaskRepositoryError},
    services::TransitionTaskRequest,
};

use super::helpers::{PostgresContext, context};

fn completion_edge(
    dependent: trellis::task::domain::TaskId,
    prerequisite: trellis::task::domain::TaskId,
) -> TaskDependency {
    TaskDependency::new(
        dependent,
        prerequisite,
        DependencyType::Completion,
        DefaultClock.utc(),
    )
}

#[rstest]
#[tokio::test(flavor = "multi_thread")]
async fn postgres_rejects_cycles_and_duplicates(
    context: eyre::Result<Option<PostgresContext>>,
) -> eyre::Result<()> {
    let Some(ctx) = context? else {
        return Ok(());
    };
    let a = ctx.store("A", None).await?;
    let b = ctx.store("B", None).await?;
    let c = ctx.store("C", None).await?;
    ctx.repository
        .add_dependency(&completion_edge(b.id(), a.id()))
        .await?;
    ctx.repository
        .add_dependency(&completion_edge(c.id(), b.id()))
        .await?;

    let cycle = ctx
        .repository
        .add_dependency(&completion_edge(a.id(), c.id()))
        .await;
    let duplicate = ctx
        .repository
        .add_dependency(&completion_edge(b.id(), a.id()))
        .await;

    ensure!(matches!(cycle, Err(TaskRepositoryError::DependencyCycle { .. })));
    ensure!(matches!(duplicate, Err(TaskRepositoryError::Validation(_))));
    let graph = ctx.repository.dependency_graph().await?;
    ensure!(graph.len() == 2);
    Ok(())
}

#[rstest]
#[tokio::test(flavor = "multi_thread")]
async fn postgres_completion_satisfies_inbound_edges(
    context: eyre::Result<Option<PostgresContext>>,
) -> eyre::Result<()> {
    let Some(ctx) = context? else {
        return Ok(());
    };
    let upstream = ctx.store("Upstream", None).await?;
    let downstream = ctx.store("Downstream", None).await?;
    ctx.repository
        .add_dependency(&completion_edge(downstream.id(), upstream.id()))
        .await?;

    for stage in ["planning", "ready", "active", "completed"] {
        ctx.service
            .transition_task(TransitionTaskRequest::new(upstream.id(), stage, "agent-1"))
            .await?;
    }
    let released = ctx
        .repository
        .find_by_id(downstream.id())
        .await?
        .ok_or_eyre("downstream should exist")?;

    ensure!(ctx.repository.check_dependencies(downstream.id()).await?.all_satisfied());
    ensure!(
        released
            .dependencies()
            .iter()
            .all(|edge| edge.status() == DependencyStatus::Satisfied)
    );
    ensure!(
        released
            .events()
            .iter()
            .any(|event| event.event_type() == TaskEventType::DependencySatisfied)
    );
    Ok(())
}

#[rstest]
#[tokio::test(flavor = "multi_thread")]
async fn postgres_waiver_is_persisted_once(
    context: eyre::Result<Option<PostgresContext>>,
) -> eyre::Result<()> {
    let Some(ctx) = context? else {
        return Ok(());
    };
    let review = ctx.store("Review", None).await?;
    let release = ctx.store("Release", None).await?;
    let edge = ctx
        .repository
        .add_dependency(&completion_edge(release.id(), review.id()))
        .await?;

    let waived = ctx
        .repository
        .waive_dependency(edge.id(), "lead", "approved offline")
        .await?;
    let again = ctx
        .repository
        .waive_dependency(edge.id(), "lead", "approved twice")
        .await;

    ensure!(waived.status() == DependencyStatus::Waived);
    ensure!(matches!(again, Err(TaskRepositoryError::Validation(_))));
    ensure!(ctx.repository.check_dependencies(release.id()).await?.all_satisfied());
    Ok(())
}
