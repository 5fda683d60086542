use std::process::ExitCode;

use clap::Parser;

mod cli;
mod commands;
mod tasks;

fn main() -> ExitCode {
    let cli = cli::Cli::parse();
    match commands::dispatch(cli) {
        Ok(code) => ExitCode::from(code),
        Err(e) => {
            eprintln!("hived: {e:#}");
            ExitCode::from(commands::EXIT_CONFIG)
        }
    }
}
