//! Racing writes against `PostgreSQL`.
//!
//! Both writes hold their own pooled connection. The loser either sees the
//! winner's row and reports a cycle, or collides with it and reports a
//! retryable conflict; it never lands.

use std::sync::Arc;

use eyre::{bail, ensure};
use mockable::{Clock, DefaultClock};
use rstest::rstest;
use trellis::task::{
    adapters::postgres::PostgresTaskRepository,
    domain::{DependencyType, Task, TaskDependency, TaskId},
    ports::{TaskRepository, TaskRepositoryError},
};

use super::helpers::{PostgresContext, context, is_acyclic};

const ROUNDS: usize = 8;

fn lost_cleanly(err: &TaskRepositoryError) -> bool {
    err.is_cycle() || err.is_retryable()
}

async fn race_edges(
    repository: &Arc<PostgresTaskRepository>,
    first: TaskId,
    second: TaskId,
) -> eyre::Result<[Result<TaskDependency, TaskRepositoryError>; 2]> {
    let spawn_edge = |dependent: TaskId, prerequisite: TaskId| {
        let store = Arc::clone(repository);
        let edge = TaskDependency::new(
            dependent,
            prerequisite,
            DependencyType::Completion,
            DefaultClock.utc(),
        );
        tokio::spawn(async move { store.add_dependency(&edge).await })
    };
    let (forward, backward) = tokio::join!(spawn_edge(first, second), spawn_edge(second, first));
    Ok([forward?, backward?])
}

#[rstest]
#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn postgres_opposing_edges_never_both_land(
    context: eyre::Result<Option<PostgresContext>>,
) -> eyre::Result<()> {
    let Some(ctx) = context? else {
        return Ok(());
    };
    for round in 0..ROUNDS {
        let left = ctx.store(&format!("Left {round}"), None).await?;
        let right = ctx.store(&format!("Right {round}"), None).await?;

        let outcomes = race_edges(&ctx.repository, left.id(), right.id()).await?;

        let landed = outcomes.iter().filter(|outcome| outcome.is_ok()).count();
        ensure!(landed <= 1, "round {round}: both edges landed");
        ensure!(
            outcomes
                .iter()
                .filter_map(|outcome| outcome.as_ref().err())
                .all(lost_cleanly),
            "round {round}: unexpected failure {outcomes:?}"
        );
    }
    ensure!(is_acyclic(&ctx.repository.dependency_graph().await?));
    Ok(())
}

#[rstest]
#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn postgres_crossing_moves_never_both_land(
    context: eyre::Result<Option<PostgresContext>>,
) -> eyre::Result<()> {
    let Some(ctx) = context? else {
        return Ok(());
    };
    for round in 0..ROUNDS {
        let left = ctx.store(&format!("Left {round}"), None).await?;
        let right = ctx.store(&format!("Right {round}"), None).await?;
        let spawn_move = |id: TaskId, parent: TaskId| {
            let store = Arc::clone(&ctx.repository);
            tokio::spawn(async move { store.move_task(id, Some(parent)).await })
        };

        let (left_under_right, right_under_left) =
            tokio::join!(spawn_move(left.id(), right.id()), spawn_move(right.id(), left.id()));
        let outcomes = [left_under_right?, right_under_left?];

        let landed: Vec<&Task> = outcomes.iter().filter_map(|outcome| outcome.as_ref().ok()).collect();
        ensure!(landed.len() <= 1, "round {round}: both moves landed");
        ensure!(
            outcomes
                .iter()
                .filter_map(|outcome| outcome.as_ref().err())
                .all(lost_cleanly),
            "round {round}: unexpected failure {outcomes:?}"
        );
        let Some(moved) = landed.first() else {
            continue;
        };
        let Some(parent_id) = moved.parent_task_id() else {
            bail!("round {round}: moved task lost its parent");
        };
        let parent_ancestors = ctx.repository.ancestors(parent_id).await?;
        ensure!(parent_ancestors.is_empty(), "round {round}: parent became a descendant");
    }
    Ok(())
}
