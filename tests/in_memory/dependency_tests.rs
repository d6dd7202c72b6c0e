//! Dependency graph integration tests over the in-memory repository.

use eyre::{OptionExt, bail, ensure};
use rstest::rstest;
use trellis::task::{
    domain::{ArtifactRef, DependencyStatus, DependencyType, TaskEventType, TaskType},
    ports::{TaskRepository, TaskRepositoryError},
    services::{AddDependencyRequest, ArchiveRequest, TaskLifecycleError},
};

use super::helpers::{Workspace, workspace};

#[rstest]
#[tokio::test(flavor = "multi_thread")]
async fn transitive_cycle_is_rejected_and_graph_unchanged(
    workspace: Workspace,
) -> eyre::Result<()> {
    let design = workspace.create("Design", TaskType::Task, None).await?;
    let build = workspace.create("Build", TaskType::Task, None).await?;
    let ship = workspace.create("Ship", TaskType::Task, None).await?;
    for (dependent, prerequisite) in [(&build, &design), (&ship, &build)] {
        workspace
            .service
            .add_dependency(AddDependencyRequest::new(
                dependent.id(),
                prerequisite.id(),
                DependencyType::Completion,
            ))
            .await?;
    }

    let result = workspace
        .service
        .add_dependency(AddDependencyRequest::new(
            design.id(),
            ship.id(),
            DependencyType::Completion,
        ))
        .await;

    let Err(TaskLifecycleError::Repository(TaskRepositoryError::DependencyCycle {
        dependent,
        prerequisite,
    })) = result
    else {
        bail!("expected a dependency cycle, got {result:?}");
    };
    ensure!(dependent == design.id() && prerequisite == ship.id());
    let graph = workspace.repository.dependency_graph().await?;
    ensure!(graph.get(&build.id()) == Some(&vec![design.id()]));
    ensure!(graph.get(&ship.id()) == Some(&vec![build.id()]));
    ensure!(!graph.contains_key(&design.id()));
    Ok(())
}

#[rstest]
#[tokio::test(flavor = "multi_thread")]
async fn completion_releases_waiting_task(workspace: Workspace) -> eyre::Result<()> {
    let upstream = workspace.create("Upstream", TaskType::Task, None).await?;
    let downstream = workspace.create("Downstream", TaskType::Task, None).await?;
    workspace
        .service
        .add_dependency(AddDependencyRequest::new(
            downstream.id(),
            upstream.id(),
            DependencyType::Completion,
        ))
        .await?;

    let before = workspace.repository.check_dependencies(downstream.id()).await?;
    workspace.complete(upstream.id()).await?;
    let after = workspace.repository.check_dependencies(downstream.id()).await?;
    let released = workspace
        .service
        .find_task(downstream.id())
        .await?
        .ok_or_eyre("downstream exists")?;

    ensure!(before.blocking_prerequisites() == vec![upstream.id()]);
    ensure!(after.all_satisfied());
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
async fn data_edge_needs_the_named_artifact(workspace: Workspace) -> eyre::Result<()> {
    let research = workspace.create("Research", TaskType::Research, None).await?;
    let report = workspace.create("Report", TaskType::Task, None).await?;
    workspace
        .service
        .add_dependency(
            AddDependencyRequest::new(report.id(), research.id(), DependencyType::Data)
                .with_data_binding("findings", "sources"),
        )
        .await?;

    workspace.complete(research.id()).await?;
    let without_artifact = workspace.repository.check_dependencies(report.id()).await?;
    workspace
        .service
        .attach_artifact(research.id(), "findings", ArtifactRef::new("artifact-42"), "agent-1")
        .await?;
    let with_artifact = workspace.repository.check_dependencies(report.id()).await?;

    ensure!(!without_artifact.all_satisfied());
    ensure!(with_artifact.all_satisfied());
    Ok(())
}

#[rstest]
#[tokio::test(flavor = "multi_thread")]
async fn waiver_unblocks_and_is_recorded(workspace: Workspace) -> eyre::Result<()> {
    let review = workspace.create("Security review", TaskType::Review, None).await?;
    let release = workspace.create("Release", TaskType::Task, None).await?;
    let edge = workspace
        .service
        .add_dependency(AddDependencyRequest::new(
            release.id(),
            review.id(),
            DependencyType::Approval,
        ))
        .await?;

    let waived = workspace
        .service
        .waive_dependency(edge.id(), "release-manager", "hotfix window")
        .await?;
    let check = workspace.repository.check_dependencies(release.id()).await?;

    ensure!(waived.status() == DependencyStatus::Waived);
    let waiver = waived.waiver().ok_or_eyre("waiver details present")?;
    ensure!(waiver.waived_by == "release-manager");
    ensure!(waiver.reason == "hotfix window");
    ensure!(check.all_satisfied());
    Ok(())
}

#[rstest]
#[tokio::test(flavor = "multi_thread")]
async fn edge_to_finished_prerequisite_survives_its_archival(
    workspace: Workspace,
) -> eyre::Result<()> {
    let spike = workspace.create("Spike", TaskType::Research, None).await?;
    let build = workspace.create("Build", TaskType::Task, None).await?;
    workspace.complete(spike.id()).await?;

    let edge = workspace
        .service
        .add_dependency(AddDependencyRequest::new(
            build.id(),
            spike.id(),
            DependencyType::Completion,
        ))
        .await?;
    let before = workspace.repository.check_dependencies(build.id()).await?;
    workspace
        .archival()
        .archive_task(ArchiveRequest::new(spike.id(), "findings delivered", "lead"))
        .await?;
    let after = workspace.repository.check_dependencies(build.id()).await?;

    ensure!(edge.status() == DependencyStatus::Satisfied);
    ensure!(edge.satisfied_at().is_some());
    ensure!(before.all_satisfied());
    ensure!(after.all_satisfied(), "archiving the prerequisite re-blocked {after:?}");
    Ok(())
}
