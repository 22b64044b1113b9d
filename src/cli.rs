use clap::{Parser, Subcommand, ValueEnum};
use clap_complete::Shell;
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "viaduct")]
#[command(version)]
#[command(about = "Apply declarative system manifests concurrently", long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    /// Verbosity level
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Only display errors
    #[arg(short, long, global = true, conflicts_with = "silent")]
    pub quiet: bool,

    /// Suppress all output
    #[arg(short, long, global = true)]
    pub silent: bool,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand)]
pub enum Command {
    /// Apply a manifest file
    Apply(ApplyArgs),

    /// Validate a manifest file and run preflight checks without changing anything
    Check {
        /// Path to the manifest file
        manifest: PathBuf,
    },

    /// Show the resources recorded in a manifest dump
    Inspect(InspectArgs),

    /// Generate shell completions
    Completions {
        /// Shell to generate completions for
        #[arg(value_enum)]
        shell: Shell,
    },
}

#[derive(Parser)]
pub struct ApplyArgs {
    /// Path to the manifest file
    pub manifest: PathBuf,

    /// Report what would change without changing it
    #[arg(short = 'n', long)]
    pub dry_run: bool,

    /// When to write the JSON manifest dump
    #[arg(long, value_enum, default_value_t = DumpWhen::OnFailure)]
    pub dump: DumpWhen,

    /// Directory for the manifest dump [env: VIADUCT_DUMP_DIR]
    #[arg(long)]
    pub dump_dir: Option<PathBuf>,

    /// Seconds a resource may wait for its dependencies
    #[arg(long, value_name = "SECS", default_value_t = 3600)]
    pub dependency_timeout: u64,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum)]
pub enum DumpWhen {
    Never,
    OnFailure,
    Always,
}

#[derive(Parser)]
pub struct InspectArgs {
    /// Path to a viaduct-*.json dump
    pub dump: PathBuf,

    /// Only show resources that did not succeed
    #[arg(short, long)]
    pub failed: bool,

    /// Show each resource's attributes
    #[arg(short, long)]
    pub attributes: bool,
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_is_valid() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_apply_defaults() {
        let cli = Cli::parse_from(["viaduct", "apply", "site.toml"]);
        match cli.command {
            Command::Apply(args) => {
                assert_eq!(args.manifest, PathBuf::from("site.toml"));
                assert!(!args.dry_run);
                assert_eq!(args.dump, DumpWhen::OnFailure);
                assert_eq!(args.dependency_timeout, 3600);
            }
            _ => panic!("Expected apply"),
        }
    }

    #[test]
    fn test_quiet_conflicts_with_silent() {
        let result = Cli::try_parse_from(["viaduct", "--quiet", "--silent", "check", "m.toml"]);
        assert!(result.is_err());
    }

    #[test]
    fn test_global_flags_after_subcommand() {
        let cli = Cli::parse_from(["viaduct", "apply", "m.toml", "-vv", "--dump", "always"]);
        assert_eq!(cli.verbose, 2);
        match cli.command {
            Command::Apply(args) => assert_eq!(args.dump, DumpWhen::Always),
            _ => panic!("Expected apply"),
        }
    }
}
