//! Given steps for task lifecycle BDD scenarios.

use super::world::{LifecycleWorld, run_async};
use eyre::WrapErr;
use rstest_bdd_macros::given;
use trellis::task::{
    domain::{DependencyType, TaskType},
    services::{AddDependencyRequest, CreateTaskRequest},
};

#[given(r#"a task titled "{title}""#)]
fn task_titled(world: &mut LifecycleWorld, title: String) -> Result<(), eyre::Report> {
    let created = run_async(
        world
            .service
            .create_task(CreateTaskRequest::new(title.clone(), TaskType::Task)),
    )
    .wrap_err("create task for lifecycle scenario")?;
    world.tasks_by_title.insert(title, created.id());
    world.last_task = Some(created.id());
    Ok(())
}

#[given(r#""{dependent}" depends on "{prerequisite}""#)]
fn task_depends_on(
    world: &mut LifecycleWorld,
    dependent: String,
    prerequisite: String,
) -> Result<(), eyre::Report> {
    let request = AddDependencyRequest::new(
        world.task_id(&dependent)?,
        world.task_id(&prerequisite)?,
        DependencyType::Completion,
    );
    run_async(world.service.add_dependency(request)).wrap_err("add dependency in scenario setup")?;
    Ok(())
}
