mod cli;
mod commands;
mod paths;
mod resource;
mod schema;
mod ui;

use anyhow::Result;
use clap::{CommandFactory, Parser};
use clap_complete::generate;
use cli::{Cli, Command};
use std::io;
use std::process::ExitCode;

/// Global context for the application
pub struct Context {
    pub verbose: u8,
    pub quiet: bool,
    pub silent: bool,
}

impl Context {
    /// Whether headers, listings and summaries should be printed
    pub fn shows_progress(&self) -> bool {
        !self.quiet && !self.silent
    }
}

fn main() -> Result<ExitCode> {
    let cli = Cli::parse();

    // Per-resource lines are logged at info level
    let log_level = match cli.verbose {
        0 => log::LevelFilter::Info,
        1 => log::LevelFilter::Debug,
        _ => log::LevelFilter::Trace,
    };

    env_logger::Builder::new()
        .filter_level(if cli.silent {
            log::LevelFilter::Off
        } else if cli.quiet {
            log::LevelFilter::Error
        } else {
            log_level
        })
        .format_timestamp(None)
        .format_target(false)
        .init();

    let ctx = Context {
        verbose: cli.verbose,
        quiet: cli.quiet,
        silent: cli.silent,
    };

    match cli.command {
        Command::Apply(args) => commands::apply::run(&ctx, args),
        Command::Check { manifest } => commands::check::run(&ctx, &manifest),
        Command::Inspect(args) => commands::inspect::run(&ctx, args).map(|()| ExitCode::SUCCESS),
        Command::Completions { shell } => {
            let mut cmd = Cli::command();
            generate(shell, &mut cmd, "viaduct", &mut io::stdout());
            Ok(ExitCode::SUCCESS)
        }
    }
}
