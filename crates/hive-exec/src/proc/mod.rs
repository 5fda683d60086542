//! Spawning worker processes.
use std::{
    path::PathBuf,
    process::{Command, Stdio},
};

use tracing::{debug, trace};

use hive_core::{LaunchError, Launcher, Pid, StartOptions};
use hive_model::{ENV_EXIT_ON_IDLE, ENV_QUEUE, ENV_TASK, Launch, ResourceLimits, TaskDescriptor};

use crate::error::{ExecError, ExecResult};

mod child;
pub use child::prepare_child;

/// Subcommand a registered worker is started with.
pub const WORK_SUBCOMMAND: &str = "work";

/// [`Launcher`] backed by `fork`/`exec`.
///
/// Registered task types re-execute `program` as `<program> [worker_args..] work <task>`;
/// external ones run their configured command. Either way the child gets its own process
/// group, the configured rlimits and the `HIVE_*` environment.
#[derive(Debug, Clone)]
pub struct ProcLauncher {
    program: PathBuf,
    worker_args: Vec<String>,
    limits: ResourceLimits,
}

impl ProcLauncher {
    /// Launch registered workers through the running binary.
    pub fn current_exe(limits: ResourceLimits) -> ExecResult<Self> {
        Ok(Self::new(std::env::current_exe()?, limits))
    }

    pub fn new(program: impl Into<PathBuf>, limits: ResourceLimits) -> Self {
        Self {
            program: program.into(),
            worker_args: Vec::new(),
            limits,
        }
    }

    /// Arguments placed before the `work` subcommand, e.g. logging flags.
    pub fn with_worker_args(mut self, args: impl IntoIterator<Item = impl Into<String>>) -> Self {
        self.worker_args = args.into_iter().map(Into::into).collect();
        self
    }

    pub fn limits(&self) -> &ResourceLimits {
        &self.limits
    }

    /// Build the command for one worker without spawning it.
    pub fn command(&self, descriptor: &TaskDescriptor, opts: StartOptions) -> ExecResult<Command> {
        let mut cmd = match &descriptor.launch {
            Launch::Registered => {
                let mut cmd = Command::new(&self.program);
                cmd.args(&self.worker_args)
                    .arg(WORK_SUBCOMMAND)
                    .arg(descriptor.name.as_str());
                cmd
            }
            Launch::Exec {
                command,
                args,
                env,
                cwd,
            } => {
                if command.trim().is_empty() {
                    return Err(ExecError::MissingProgram);
                }
                let mut cmd = Command::new(command);
                cmd.args(args);
                for kv in env.iter() {
                    cmd.env(kv.key(), kv.value());
                }
                if let Some(dir) = cwd {
                    cmd.current_dir(dir);
                }
                cmd
            }
        };

        cmd.env(ENV_TASK, descriptor.name.as_str())
            .env(ENV_QUEUE, &descriptor.queue)
            .stdin(Stdio::null());
        if opts.exit_on_idle {
            cmd.env(ENV_EXIT_ON_IDLE, "1");
        } else {
            cmd.env_remove(ENV_EXIT_ON_IDLE);
        }
        prepare_child(&mut cmd, self.limits);
        Ok(cmd)
    }
}

impl Launcher for ProcLauncher {
    fn start(&mut self, descriptor: &TaskDescriptor, opts: StartOptions) -> Result<Pid, LaunchError> {
        let mut cmd = self.command(descriptor, opts)?;
        trace!(
            target: "hive.exec.proc",
            task = %descriptor.name,
            launch = descriptor.launch.kind(),
            program = ?cmd.get_program(),
            "spawn"
        );

        // The supervisor reaps through waitpid(-1); the `Child` handle is not needed.
        let child = cmd
            .spawn()
            .map_err(|e| ExecError::Spawn(format!("{}: {e}", descriptor.name)))?;
        let pid = Pid::from_raw(child.id() as i32);
        debug!(target: "hive.exec.proc", task = %descriptor.name, %pid, "spawned");
        Ok(pid)
    }
}
