//! Given steps for archival BDD scenarios.

use super::world::{ArchivalWorld, run_async};
use eyre::WrapErr;
use rstest_bdd_macros::given;
use trellis::task::{
    domain::{SpecialistType, Task, TaskStatus, TaskType},
    ports::TaskRepository,
};

fn store(world: &mut ArchivalWorld, task: &Task) -> Result<Task, eyre::Report> {
    let stored = run_async(world.repository.create(task)).wrap_err("store scenario task")?;
    world
        .tasks_by_title
        .insert(stored.title().to_owned(), stored.id());
    Ok(stored)
}

#[given(r#"a workflow "{name}" with {count:usize} subtasks"#)]
fn workflow_with_subtasks(
    world: &mut ArchivalWorld,
    name: String,
    count: usize,
) -> Result<(), eyre::Report> {
    let epic = Task::new(name.clone(), TaskType::Epic, world.clock.as_ref())?;
    let root = store(world, &epic)?;
    let mut members = vec![root.id()];
    for index in 1..=count {
        let subtask = Task::new(
            format!("{name} step {index}"),
            TaskType::Task,
            world.clock.as_ref(),
        )?
        .with_parent(&root);
        members.push(store(world, &subtask)?.id());
    }
    world.workflows.insert(name, members);
    Ok(())
}

#[given(r#"a task "{title}" for a "{specialist}" specialist"#)]
fn task_for_specialist(
    world: &mut ArchivalWorld,
    title: String,
    specialist: String,
) -> Result<(), eyre::Report> {
    let specialist_type = SpecialistType::try_from(specialist.as_str())
        .map_err(|err| eyre::eyre!("invalid specialist in scenario: {err}"))?;
    let task = Task::new(title, TaskType::Research, world.clock.as_ref())?
        .with_specialist(specialist_type);
    store(world, &task)?;
    Ok(())
}

#[given(r#"a completed task "{title}""#)]
fn completed_task(world: &mut ArchivalWorld, title: String) -> Result<(), eyre::Report> {
    let feature = Task::new(title, TaskType::Feature, world.clock.as_ref())?;
    let mut task = store(world, &feature)?;
    task.set_status(TaskStatus::Completed, "agent-1", world.clock.as_ref());
    run_async(world.repository.update(&task)).wrap_err("complete scenario task")?;
    Ok(())
}

#[given("{hours:i64} hours pass")]
fn hours_pass(world: &mut ArchivalWorld, hours: i64) {
    world.clock.advance(chrono::Duration::hours(hours));
}

#[given("{days:i64} days pass")]
fn days_pass(world: &mut ArchivalWorld, days: i64) {
    world.clock.advance(chrono::Duration::days(days));
}
