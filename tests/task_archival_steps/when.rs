//! When steps for archival BDD scenarios.

use super::world::{ArchivalWorld, run_async};
use eyre::WrapErr;
use rstest_bdd_macros::when;
use trellis::task::services::ArchiveRequest;

#[when(r#"the workflow "{name}" is archived by "{actor}" because "{reason}""#)]
fn workflow_is_archived(
    world: &mut ArchivalWorld,
    name: String,
    actor: String,
    reason: String,
) -> Result<(), eyre::Report> {
    let root = world.task_id(&name)?;
    let request = ArchiveRequest::new(root, reason, actor).with_subtasks();
    let result = run_async(world.archival().archive_task(request)).wrap_err("archive workflow")?;
    world.archive_result = Some(result);
    Ok(())
}

#[when("stale tasks are detected")]
fn stale_tasks_are_detected(world: &mut ArchivalWorld) {
    world.stale_findings = run_async(world.detector().detect_stale_tasks());
}

#[when("cleanup recommendations are generated")]
fn cleanup_recommendations_generated(world: &mut ArchivalWorld) {
    world.recommendations = run_async(world.archival().generate_cleanup_recommendations());
}
