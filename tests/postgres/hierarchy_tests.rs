//! Hierarchy persistence tests against `PostgreSQL`.

use eyre::{OptionExt, ensure};
use rstest::rstest;
use trellis::task::{
    domain::{HierarchyPath, Task, TaskEventType},
    ports::{DeleteMode, GetOptions, Page, TaskQuery, TaskRepository, TaskRepositoryError},
};

use super::helpers::{PostgresContext, context};

#[rstest]
#[tokio::test(flavor = "multi_thread")]
async fn postgres_round_trips_task_with_children(
    context: eyre::Result<Option<PostgresContext>>,
) -> eyre::Result<()> {
    let Some(ctx) = context? else {
        return Ok(());
    };
    let root = ctx.store("Root", None).await?;
    let child = ctx.store("Child", Some(&root)).await?;

    let loaded = ctx
        .repository
        .get(root.id(), GetOptions::default().with_children())
        .await?
        .ok_or_eyre("root should load")?;

    ensure!(loaded.title() == "Root");
    ensure!(loaded.hierarchy_path() == root.hierarchy_path());
    ensure!(loaded.children().iter().map(Task::id).collect::<Vec<_>>() == vec![child.id()]);
    ensure!(
        loaded.events().first().map(|event| event.event_type()) == Some(TaskEventType::Created)
    );
    Ok(())
}

#[rstest]
#[tokio::test(flavor = "multi_thread")]
async fn postgres_move_rewrites_descendant_paths(
    context: eyre::Result<Option<PostgresContext>>,
) -> eyre::Result<()> {
    let Some(ctx) = context? else {
        return Ok(());
    };
    let old_root = ctx.store("Old root", None).await?;
    let new_root = ctx.store("New root", None).await?;
    let branch = ctx.store("Branch", Some(&old_root)).await?;
    let leaf = ctx.store("Leaf", Some(&branch)).await?;

    ctx.repository
        .move_task(branch.id(), Some(new_root.id()))
        .await?;
    let ancestors = ctx.repository.ancestors(leaf.id()).await?;
    let old_subtree = ctx.repository.subtree(old_root.id(), None).await?;
    let new_subtree = ctx.repository.subtree(new_root.id(), Some(1)).await?;

    ensure!(ancestors.iter().map(Task::id).collect::<Vec<_>>() == vec![new_root.id(), branch.id()]);
    ensure!(old_subtree.len() == 1);
    ensure!(new_subtree.iter().map(Task::id).collect::<Vec<_>>() == vec![new_root.id(), branch.id()]);
    Ok(())
}

#[rstest]
#[tokio::test(flavor = "multi_thread")]
async fn postgres_rejects_move_under_descendant(
    context: eyre::Result<Option<PostgresContext>>,
) -> eyre::Result<()> {
    let Some(ctx) = context? else {
        return Ok(());
    };
    let root = ctx.store("Root", None).await?;
    let child = ctx.store("Child", Some(&root)).await?;

    let result = ctx.repository.move_task(root.id(), Some(child.id())).await;

    ensure!(matches!(result, Err(TaskRepositoryError::HierarchyCycle { .. })));
    let reloaded = ctx
        .repository
        .find_by_id(root.id())
        .await?
        .ok_or_eyre("root should remain")?;
    ensure!(reloaded.parent_task_id().is_none());
    Ok(())
}

#[rstest]
#[tokio::test(flavor = "multi_thread")]
async fn postgres_soft_and_hard_delete(
    context: eyre::Result<Option<PostgresContext>>,
) -> eyre::Result<()> {
    let Some(ctx) = context? else {
        return Ok(());
    };
    let soft = ctx.store("Soft", None).await?;
    let hard = ctx.store("Hard", None).await?;

    ensure!(ctx.repository.delete(soft.id(), DeleteMode::Soft).await?);
    ensure!(ctx.repository.delete(hard.id(), DeleteMode::Hard).await?);
    ensure!(!ctx.repository.delete(hard.id(), DeleteMode::Hard).await?);

    let visible = ctx.repository.query(&TaskQuery::new(), Page::all()).await?;
    let hidden = ctx
        .repository
        .get(soft.id(), GetOptions::default().including_deleted())
        .await?;
    let gone = ctx
        .repository
        .get(hard.id(), GetOptions::default().including_deleted())
        .await?;

    ensure!(visible.is_empty());
    ensure!(hidden.is_some_and(|task| task.is_deleted()));
    ensure!(gone.is_none());
    Ok(())
}

#[rstest]
#[tokio::test(flavor = "multi_thread")]
async fn postgres_repairs_broken_path_once_on_write(
    context: eyre::Result<Option<PostgresContext>>,
) -> eyre::Result<()> {
    let Some(ctx) = context? else {
        return Ok(());
    };
    let task = ctx.store("Damaged", None).await?;
    let rows = ctx.execute_sql(&format!(
        "UPDATE tasks SET hierarchy_path = 'bogus' WHERE id = '{}'",
        task.id()
    ))?;
    ensure!(rows == 1);

    ensure!(ctx.repository.ancestors(task.id()).await?.is_empty());
    for _ in 0..2 {
        let loaded = ctx
            .repository
            .find_by_id(task.id())
            .await?
            .ok_or_eyre("damaged task should load")?;
        ctx.repository.update(&loaded).await?;
    }
    let settled = ctx
        .repository
        .find_by_id(task.id())
        .await?
        .ok_or_eyre("repaired task should load")?;

    ensure!(settled.hierarchy_path() == &HierarchyPath::root(task.id()));
    ensure!(settled.hierarchy_level() == 0);
    let corrections = settled
        .events()
        .iter()
        .filter(|event| event.event_type() == TaskEventType::HierarchyCorrected)
        .count();
    ensure!(corrections == 1, "expected one stored correction, found {corrections}");
    Ok(())
}
