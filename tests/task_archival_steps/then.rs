//! Then steps for archival BDD scenarios.

use super::world::{ArchivalWorld, run_async};
use rstest_bdd_macros::then;
use trellis::task::{
    ports::TaskRepository,
    services::{RecommendationKind, StaleReason},
};

#[then(r#"{count:usize} archive records exist with reason "{reason}""#)]
fn archive_records_exist(
    world: &ArchivalWorld,
    count: usize,
    reason: String,
) -> Result<(), eyre::Report> {
    let result = world
        .archive_result
        .as_ref()
        .ok_or_else(|| eyre::eyre!("missing archive result"))?;
    eyre::ensure!(
        result.archived_count == count,
        "expected {count} archived tasks, got {}",
        result.archived_count
    );
    for task_id in &result.archived_task_ids {
        let records = run_async(world.repository.archive_records(*task_id))?;
        eyre::ensure!(
            records.iter().any(|record| record.reason() == reason),
            "task {task_id} has no record with reason {reason:?}"
        );
    }
    Ok(())
}

#[then(r#"no task in workflow "{name}" remains open"#)]
fn no_task_remains_open(world: &ArchivalWorld, name: String) -> Result<(), eyre::Report> {
    let members = world
        .workflows
        .get(&name)
        .ok_or_else(|| eyre::eyre!("no workflow named {name:?}"))?;
    for task_id in members {
        let task = run_async(world.repository.find_by_id(*task_id))?
            .ok_or_else(|| eyre::eyre!("task {task_id} should remain readable"))?;
        eyre::ensure!(!task.is_open(), "task {task_id} is still open");
    }
    Ok(())
}

#[then(r#""{title}" is reported as inactive"#)]
fn reported_as_inactive(world: &ArchivalWorld, title: String) -> Result<(), eyre::Report> {
    let task_id = world.task_id(&title)?;
    let reported = world.stale_findings.iter().any(|finding| {
        finding.task_id == task_id && finding.reason == StaleReason::InactivityTimeout
    });
    eyre::ensure!(reported, "expected {title:?} in {:?}", world.stale_findings);
    Ok(())
}

#[then("no stale tasks are reported")]
fn no_stale_tasks(world: &ArchivalWorld) -> Result<(), eyre::Report> {
    eyre::ensure!(
        world.stale_findings.is_empty(),
        "unexpected findings {:?}",
        world.stale_findings
    );
    Ok(())
}

#[then(r#"archiving "{title}" is recommended"#)]
fn archiving_is_recommended(world: &ArchivalWorld, title: String) -> Result<(), eyre::Report> {
    let task_id = world.task_id(&title)?;
    let recommended = world.recommendations.iter().any(|recommendation| {
        recommendation.kind == RecommendationKind::ArchiveOldCompleted
            && recommendation.task_ids.contains(&task_id)
    });
    eyre::ensure!(recommended, "expected {title:?} in {:?}", world.recommendations);
    Ok(())
}
