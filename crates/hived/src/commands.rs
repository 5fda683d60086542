use std::{
    io::{self, Write},
    path::Path,
    sync::Arc,
};

use anyhow::{Context, Result, anyhow};
use tracing::{error, info, warn};

use hive_broker::ManagementBroker;
use hive_core::{
    ConfigFile, FileTaskSource, Supervisor, TaskRegistry, TaskSet, config::config_path,
};
use hive_exec::{OsProcesses, ProcLauncher, become_session_leader, context_from_env, run_worker};
use hive_model::Launch;
use hive_observe::{LoggerConfig, LoggerFormat, ProcTitle, logger_init};

use crate::{
    cli::{Cli, Command},
    tasks::builtin_registry,
};

/// Startup or configuration problem.
pub const EXIT_CONFIG: u8 = 2;
/// The supervisor loop failed after startup.
pub const EXIT_RUNTIME: u8 = 1;

/// Command-line overrides for the logger.
#[derive(Debug, Clone, Default)]
struct LogFlags {
    format: Option<LoggerFormat>,
    level: Option<String>,
}

impl LogFlags {
    fn apply(&self, base: LoggerConfig) -> LoggerConfig {
        base.overridden(self.format, self.level.as_deref())
    }
}

/// Run the selected command and return the process exit code.
///
/// `Err` means the command never got going (bad config, unknown task); callers map it
/// to [`EXIT_CONFIG`].
pub fn dispatch(cli: Cli) -> Result<u8> {
    let flags = LogFlags {
        format: cli.log_format,
        level: cli.log_level,
    };
    let registry = Arc::new(builtin_registry()?);
    let path = config_path(cli.config.as_deref());

    match cli.command.unwrap_or(Command::Run) {
        Command::Run => run(&path, registry, &flags),
        Command::Check => {
            let file = load(&path)?;
            let set = file.resolve_tasks(&registry);
            let stdout = io::stdout();
            check(&set, &mut stdout.lock())
        }
        Command::Tasks => {
            let stdout = io::stdout();
            list_tasks(&registry, &mut stdout.lock())?;
            Ok(0)
        }
        Command::Work { task } => work(&task, &registry, &flags),
    }
}

fn load(path: &Path) -> Result<ConfigFile> {
    ConfigFile::load(path).with_context(|| format!("loading {}", path.display()))
}

fn run(path: &Path, registry: Arc<TaskRegistry>, flags: &LogFlags) -> Result<u8> {
    let file = load(path)?;
    let log_cfg = flags.apply(file.logging.clone().unwrap_or_default());
    logger_init(&log_cfg).context("logger init")?;

    let config = file.supervisor.to_config()?;
    become_session_leader();

    let broker = ManagementBroker::new(&file.broker.clone().unwrap_or_default())
        .context("broker client")?;
    let launcher = ProcLauncher::current_exe(file.limits)?.with_worker_args([
        "--log-format".to_string(),
        log_cfg.format.as_str().to_string(),
        "--log-level".to_string(),
        log_cfg.level.clone(),
    ]);

    let mut supervisor = Supervisor::builder(config)
        .with_source(FileTaskSource::new(path, registry))
        .with_launcher(launcher)
        .with_processes(OsProcesses::new())
        .with_broker(Arc::new(broker))
        .with_title(Arc::new(ProcTitle::new("hived")))
        .build()?;

    info!(target: "hive.cli", config = %path.display(), "starting supervisor");
    supervisor.start().context("supervisor start")?;

    match supervisor.run() {
        Ok(()) => {
            info!(target: "hive.cli", "supervisor stopped");
            Ok(0)
        }
        Err(e) => {
            error!(target: "hive.cli", error = %e, "supervisor failed");
            Ok(EXIT_RUNTIME)
        }
    }
}

/// Print what the config resolves to. Any rejected entry makes the check fail.
fn check(set: &TaskSet, out: &mut impl Write) -> Result<u8> {
    for d in &set.descriptors {
        let origin = match &d.launch {
            Launch::Registered => "registered".to_string(),
            Launch::Exec { command, .. } => format!("exec {command}"),
        };
        writeln!(
            out,
            "{:<24} {:<14} queue={:<24} max_workers={:<4} {}",
            d.name.as_str(),
            d.work_model.as_str(),
            d.queue,
            d.max_workers,
            origin
        )?;
    }
    for r in &set.rejected {
        writeln!(out, "rejected {}: {}", r.name, r.error)?;
    }
    Ok(if set.rejected.is_empty() { 0 } else { EXIT_CONFIG })
}

fn list_tasks(registry: &TaskRegistry, out: &mut impl Write) -> Result<()> {
    for t in registry.iter() {
        writeln!(
            out,
            "{:<24} {:<14} queue={}",
            t.name.as_str(),
            t.work_model.as_str(),
            t.queue
        )?;
    }
    Ok(())
}

fn work(name: &str, registry: &TaskRegistry, flags: &LogFlags) -> Result<u8> {
    let task_type = registry
        .get(name)
        .ok_or_else(|| anyhow!("unknown task type: {name}"))?;

    let log_cfg = flags.apply(LoggerConfig::default());
    if let Err(e) = logger_init(&log_cfg) {
        eprintln!("hived: logger: {e}");
    }
    let ctx = context_from_env(&task_type.queue);
    let title = ProcTitle::new("hived");

    let outcome = run_worker(task_type.task.clone(), ctx, &title)?;
    if outcome.exit_code() != 0 {
        warn!(target: "hive.cli", task = name, outcome = ?outcome, "worker exiting with failure");
    }
    Ok(outcome.exit_code() as u8)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn resolve(yaml: &str) -> TaskSet {
        let registry = builtin_registry().unwrap();
        ConfigFile::from_yaml(yaml).unwrap().resolve_tasks(&registry)
    }

    #[test]
    fn check_lists_resolved_pools() {
        let set = resolve(
            "tasks:\n  simulator:\n    max_workers: 4\n  oneshot-simulator: {}\n",
        );
        let mut out = Vec::new();
        assert_eq!(check(&set, &mut out).unwrap(), 0);

        let text = String::from_utf8(out).unwrap();
        assert!(text.contains("simulator"));
        assert!(text.contains("max_workers=4"));
        assert!(text.contains("queue=oneshot_simulator"));
        assert!(!text.contains("rejected"));
    }

    #[test]
    fn check_fails_on_rejected_entries() {
        let set = resolve("tasks:\n  - simulator\n  - ghost\n");
        let mut out = Vec::new();
        assert_eq!(check(&set, &mut out).unwrap(), EXIT_CONFIG);
        assert!(String::from_utf8(out).unwrap().contains("rejected ghost"));
    }

    #[test]
    fn tasks_lists_builtins() {
        let registry = builtin_registry().unwrap();
        let mut out = Vec::new();
        list_tasks(&registry, &mut out).unwrap();

        let text = String::from_utf8(out).unwrap();
        assert_eq!(text.lines().count(), 2);
        assert!(text.contains("demand"));
    }

    #[test]
    fn unknown_worker_task_is_an_error() {
        let registry = builtin_registry().unwrap();
        let err = work("ghost", &registry, &LogFlags::default()).unwrap_err();
        assert!(err.to_string().contains("ghost"));
    }

    #[test]
    fn missing_config_file_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let err = load(&dir.path().join("absent.yml")).unwrap_err();
        assert!(format!("{err:#}").contains("absent.yml"));
    }

    #[test]
    fn config_file_on_disk_resolves() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.yml");
        std::fs::write(
            &path,
            "supervisor:\n  scaling_interval: 0.5\ntasks:\n  - simulator\n",
        )
        .unwrap();

        let file = load(&path).unwrap();
        assert_eq!(file.supervisor.scaling_interval, 0.5);
        let set = file.resolve_tasks(&builtin_registry().unwrap());
        assert_eq!(set.descriptors.len(), 1);
    }
}
