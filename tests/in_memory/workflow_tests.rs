//! End-to-end workflow tests: build a tree, run it, archive it.

use eyre::{OptionExt, ensure};
use rstest::rstest;
use trellis::task::{
    domain::{
        AttributeType, AttributeValue, DependencyType, LifecycleStage, Task, TaskStatus, TaskType,
    },
    ports::{ArtifactStore, TaskRepository},
    services::{AddAttributeRequest, AddDependencyRequest, ArchiveRequest},
};

use super::helpers::{Workspace, workspace};

#[rstest]
#[tokio::test(flavor = "multi_thread")]
async fn finished_workflow_is_archived_with_its_outputs(workspace: Workspace) -> eyre::Result<()> {
    let epic = workspace.create("Onboarding", TaskType::Epic, None).await?;
    let research = workspace
        .create("Interview users", TaskType::Research, Some(epic.id()))
        .await?;
    let build = workspace
        .create("Build wizard", TaskType::Feature, Some(epic.id()))
        .await?;
    workspace
        .service
        .add_dependency(
            AddDependencyRequest::new(build.id(), research.id(), DependencyType::Data)
                .with_data_binding("notes", "requirements"),
        )
        .await?;
    let notes = workspace.artifacts.store("users want fewer steps").await?;
    workspace
        .service
        .attach_artifact(research.id(), "notes", notes.clone(), "researcher-1")
        .await?;
    workspace.complete(research.id()).await?;
    ensure!(
        workspace
            .repository
            .check_dependencies(build.id())
            .await?
            .all_satisfied()
    );
    workspace.complete(build.id()).await?;
    workspace.complete(epic.id()).await?;

    let result = workspace
        .archival()
        .archive_task(ArchiveRequest::new(epic.id(), "released", "lead").with_subtasks())
        .await?;

    ensure!(result.success && result.archived_count == 3);
    for task_id in [epic.id(), research.id(), build.id()] {
        let task = workspace
            .service
            .find_task(task_id)
            .await?
            .ok_or_eyre("archived tasks stay readable")?;
        ensure!(task.lifecycle_stage() == LifecycleStage::Archived);
        ensure!(task.status() == TaskStatus::Archived);
    }
    let records = workspace.repository.archive_records(research.id()).await?;
    let record = records.first().ok_or_eyre("research archive record")?;
    let preserved = record.artifacts().first().ok_or_eyre("preserved notes")?;
    ensure!(preserved.name == "notes");
    ensure!(preserved.reference == notes);
    ensure!(preserved.content == "users want fewer steps");
    Ok(())
}

#[rstest]
#[tokio::test(flavor = "multi_thread")]
async fn indexed_attributes_drive_search(workspace: Workspace) -> eyre::Result<()> {
    let tagged = workspace.create("Migrate billing", TaskType::Task, None).await?;
    let untagged = workspace.create("Migrate search", TaskType::Task, None).await?;
    workspace
        .service
        .add_attribute(
            AddAttributeRequest::new(tagged.id(), "team", AttributeType::String, "payments", "pm")
                .indexed(),
        )
        .await?;
    workspace
        .service
        .add_attribute(AddAttributeRequest::new(
            untagged.id(),
            "team",
            AttributeType::String,
            "payments",
            "pm",
        ))
        .await?;

    let found = workspace
        .repository
        .search_by_attribute("team", &AttributeValue::String("payments".to_owned()))
        .await?;

    ensure!(found.len() == 1);
    ensure!(found.first().map(Task::id) == Some(tagged.id()));
    Ok(())
}

#[rstest]
#[tokio::test(flavor = "multi_thread")]
async fn fresh_workspace_needs_no_cleanup(workspace: Workspace) -> eyre::Result<()> {
    let task = workspace.create("Just started", TaskType::Task, None).await?;
    workspace.walk(task.id(), &["planning", "ready", "active"]).await?;

    let recommendations = workspace.archival().generate_cleanup_recommendations().await;

    ensure!(recommendations.is_empty());
    Ok(())
}
