//! Then steps for task lifecycle BDD scenarios.

use super::world::{LifecycleWorld, run_async};
use rstest_bdd_macros::then;
use trellis::task::{
    domain::{LifecycleStage, Task, TaskDomainError},
    ports::{TaskRepository, TaskRepositoryError},
    services::TaskLifecycleError,
};

fn current(world: &LifecycleWorld) -> Result<Task, eyre::Report> {
    let task_id = world.current_task()?;
    run_async(world.service.find_task(task_id))?
        .ok_or_else(|| eyre::eyre!("task {task_id} should exist"))
}

#[then(r#"the task stage is "{stage}""#)]
fn task_stage_is(world: &LifecycleWorld, stage: String) -> Result<(), eyre::Report> {
    let expected = LifecycleStage::try_from(stage.as_str())
        .map_err(|err| eyre::eyre!("invalid expected stage in scenario: {err}"))?;
    let task = current(world)?;
    if task.lifecycle_stage() != expected {
        return Err(eyre::eyre!(
            "expected stage {expected}, found {}",
            task.lifecycle_stage()
        ));
    }
    Ok(())
}

#[then("the task records when it started and completed")]
fn task_records_timestamps(world: &LifecycleWorld) -> Result<(), eyre::Report> {
    let task = current(world)?;
    let (Some(started), Some(completed)) = (task.started_at(), task.completed_at()) else {
        return Err(eyre::eyre!("expected both timestamps on {task:?}"));
    };
    eyre::ensure!(started <= completed, "task completed before it started");
    Ok(())
}

#[then("the transition fails with an invalid stage transition error")]
fn transition_fails_with_invalid_transition(world: &LifecycleWorld) -> Result<(), eyre::Report> {
    let result = world
        .last_transition_result
        .as_ref()
        .ok_or_else(|| eyre::eyre!("missing transition result"))?;
    if !matches!(
        result,
        Err(TaskLifecycleError::Domain(
            TaskDomainError::InvalidStageTransition { .. }
        ))
    ) {
        return Err(eyre::eyre!(
            "expected InvalidStageTransition error, got {result:?}"
        ));
    }
    Ok(())
}

#[then("the transition fails with an unknown stage error")]
fn transition_fails_with_unknown_stage(world: &LifecycleWorld) -> Result<(), eyre::Report> {
    let result = world
        .last_transition_result
        .as_ref()
        .ok_or_else(|| eyre::eyre!("missing transition result"))?;
    if !matches!(result, Err(TaskLifecycleError::InvalidStage(_))) {
        return Err(eyre::eyre!("expected InvalidStage error, got {result:?}"));
    }
    Ok(())
}

#[then(r#""{title}" has no blocking prerequisites"#)]
fn has_no_blocking_prerequisites(world: &LifecycleWorld, title: String) -> Result<(), eyre::Report> {
    let task_id = world.task_id(&title)?;
    let check = run_async(world.repository.check_dependencies(task_id))?;
    if !check.all_satisfied() {
        return Err(eyre::eyre!(
            "{title:?} is still blocked by {:?}",
            check.blocking_prerequisites()
        ));
    }
    Ok(())
}

#[then("the dependency is rejected as a cycle")]
fn dependency_rejected_as_cycle(world: &LifecycleWorld) -> Result<(), eyre::Report> {
    let result = world
        .last_dependency_result
        .as_ref()
        .ok_or_else(|| eyre::eyre!("missing dependency result"))?;
    if !matches!(
        result,
        Err(TaskLifecycleError::Repository(
            TaskRepositoryError::DependencyCycle { .. }
        ))
    ) {
        return Err(eyre::eyre!("expected DependencyCycle error, got {result:?}"));
    }
    Ok(())
}
