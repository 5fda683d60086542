//! Task types compiled into the binary.
use anyhow::Result;

use hive_core::{TaskFn, TaskRegistry, TaskType, WorkerContext};
use hive_model::{TaskName, WorkModel};

pub mod simulator;

use simulator::Profile;

pub fn builtin_registry() -> Result<TaskRegistry> {
    let consumer = TaskFn::arc("simulator", |ctx: WorkerContext| {
        simulator::run_consumer(ctx, Profile::LONG_LIVED)
    });
    let oneshot = TaskFn::arc("oneshot-simulator", |ctx: WorkerContext| {
        simulator::run_oneshot(ctx, Profile::ONESHOT)
    });

    let registry = TaskRegistry::new()
        .with(TaskType::new(
            TaskName::new("simulator")?,
            WorkModel::DemandDriven,
            consumer,
        ))?
        .with(TaskType::new(
            TaskName::new("oneshot-simulator")?,
            WorkModel::Steady,
            oneshot,
        ))?;
    Ok(registry)
}
