//! Racing writes against the in-memory repository.
//!
//! Each race spawns both writes onto the multi-threaded runtime so they
//! contend for the store at the same time.

use std::sync::Arc;

use eyre::{bail, ensure};
use mockable::{Clock, DefaultClock};
use rstest::rstest;
use trellis::task::{
    adapters::memory::InMemoryTaskRepository,
    domain::{DependencyType, TaskDependency, TaskId, TaskType},
    ports::{TaskRepository, TaskRepositoryError},
};

use super::helpers::{Workspace, is_acyclic, workspace};

const ROUNDS: usize = 16;

async fn race_edges(
    repository: &Arc<InMemoryTaskRepository>,
    first: TaskId,
    second: TaskId,
) -> eyre::Result<Vec<Result<TaskDependency, TaskRepositoryError>>> {
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
    Ok(vec![forward?, backward?])
}

#[rstest]
#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn opposing_edges_never_both_land(workspace: Workspace) -> eyre::Result<()> {
    for round in 0..ROUNDS {
        let left = workspace.create(&format!("Left {round}"), TaskType::Task, None).await?;
        let right = workspace.create(&format!("Right {round}"), TaskType::Task, None).await?;

        let outcomes = race_edges(&workspace.repository, left.id(), right.id()).await?;

        let landed = outcomes.iter().filter(|outcome| outcome.is_ok()).count();
        ensure!(landed == 1, "round {round}: {landed} edges landed: {outcomes:?}");
        ensure!(
            outcomes
                .iter()
                .filter_map(|outcome| outcome.as_ref().err())
                .all(TaskRepositoryError::is_cycle),
            "round {round}: unexpected failure {outcomes:?}"
        );
    }
    ensure!(is_acyclic(&workspace.repository.dependency_graph().await?));
    Ok(())
}

#[rstest]
#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn crossing_moves_never_both_land(workspace: Workspace) -> eyre::Result<()> {
    for round in 0..ROUNDS {
        let left = workspace.create(&format!("Left {round}"), TaskType::Epic, None).await?;
        let right = workspace.create(&format!("Right {round}"), TaskType::Epic, None).await?;
        let spawn_move = |id: TaskId, parent: TaskId| {
            let store = Arc::clone(&workspace.repository);
            tokio::spawn(async move { store.move_task(id, Some(parent)).await })
        };

        let (left_under_right, right_under_left) =
            tokio::join!(spawn_move(left.id(), right.id()), spawn_move(right.id(), left.id()));
        let outcomes = [left_under_right?, right_under_left?];

        let landed = outcomes.iter().filter(|outcome| outcome.is_ok()).count();
        ensure!(landed == 1, "round {round}: {landed} moves landed");
        let Some(moved) = outcomes.iter().find_map(|outcome| outcome.as_ref().ok()) else {
            bail!("round {round}: no move landed");
        };
        let parent_id = moved.parent_task_id().ok_or_else(|| eyre::eyre!("moved task has a parent"))?;
        let ancestors = workspace.repository.ancestors(moved.id()).await?;
        ensure!(ancestors.iter().map(|task| task.id()).collect::<Vec<_>>() == vec![parent_id]);
        let parent_ancestors = workspace.repository.ancestors(parent_id).await?;
        ensure!(parent_ancestors.is_empty(), "round {round}: parent became a descendant");
    }
    Ok(())
}
