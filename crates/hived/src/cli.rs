use std::path::PathBuf;

use clap::{Parser, Subcommand};

use hive_observe::LoggerFormat;

#[derive(Parser, Debug)]
#[command(name = "hived")]
#[command(about = "Supervise worker pools and scale them with queue demand")]
#[command(version)]
pub struct Cli {
    /// Config file (falls back to etc/config.yml)
    #[arg(long, short, env = "HIVE_CONFIG", global = true)]
    pub config: Option<PathBuf>,

    /// Log filter directive, overrides the config file
    #[arg(long, global = true)]
    pub log_level: Option<String>,

    /// Log format: text, json or journald
    #[arg(long, global = true)]
    pub log_format: Option<LoggerFormat>,

    #[command(subcommand)]
    pub command: Option<Command>,
}

#[derive(Subcommand, Debug, Clone, PartialEq, Eq)]
pub enum Command {
    /// Start the supervisor (default)
    Run,
    /// Validate the config file and print the resolved pools
    Check,
    /// List built-in task types
    Tasks,
    /// Run one worker process; used by the supervisor itself
    #[command(hide = true)]
    Work {
        /// Registered task type name
        task: String,
    },
}
