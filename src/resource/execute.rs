//! Execute resource - runs a shell command

use anyhow::{Context, Result};
use declarative::{ApplyContext, ApplyResult, ResourceDescriptor};
use serde::{Deserialize, Serialize};
use std::process::{Command, Stdio};

use super::{require, run_status};

/// Environment variable exposing the run's scratch directory to commands
pub const SCRATCH_DIR_ENV: &str = "VIADUCT_SCRATCH_DIR";

/// A command run through `bash -c`
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Execute {
    pub command: String,
    /// Where to run the command
    #[serde(default)]
    pub working_directory: Option<String>,
    /// Guard command; if it exits 0 the main command is skipped
    #[serde(default)]
    pub unless: Option<String>,
    /// Suppress the command's stdout
    #[serde(default)]
    pub quiet: bool,
}

impl Execute {
    pub fn new(command: &str) -> Self {
        Self {
            command: command.to_string(),
            ..Default::default()
        }
    }

    fn bash(&self, script: &str, ctx: &ApplyContext) -> Command {
        let mut cmd = Command::new("bash");
        cmd.arg("-c").arg(script).stdin(Stdio::null());
        if let Some(dir) = &self.working_directory {
            cmd.current_dir(crate::paths::expand(dir));
        }
        if let Some(scratch) = ctx.scratch_dir {
            cmd.env(SCRATCH_DIR_ENV, scratch);
        }
        cmd
    }

    /// True if the guard command exits cleanly
    fn guard_satisfied(&self, ctx: &ApplyContext) -> bool {
        let Some(unless) = &self.unless else {
            return false;
        };

        let status = self
            .bash(unless, ctx)
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .status();
        match status {
            Ok(status) => status.success(),
            Err(e) => {
                ctx.log.debug(format!("guard command could not run: {}", e));
                false
            }
        }
    }
}

impl ResourceDescriptor for Execute {
    fn kind(&self) -> &'static str {
        "Execute"
    }

    fn operation_name(&self) -> &'static str {
        "Run"
    }

    fn preflight_checks(&mut self, _ctx: &ApplyContext) -> Result<()> {
        require("Command", &self.command)
    }

    fn run(&self, ctx: &ApplyContext) -> Result<ApplyResult> {
        if self.guard_satisfied(ctx) {
            ctx.log.noop(&self.command);
            return Ok(ApplyResult::NoChange);
        }

        ctx.log.info(format!("{} -> started", self.command));
        if ctx.dry_run {
            return Ok(ApplyResult::Skipped {
                reason: "Dry run".to_string(),
            });
        }

        if let Some(scratch) = ctx.scratch_dir {
            std::fs::create_dir_all(scratch).with_context(|| {
                format!("Failed to create scratch directory: {}", scratch.display())
            })?;
        }

        let show_stdout = !(self.quiet || ctx.quiet);
        run_status(&mut self.bash(&self.command, ctx), show_stdout)
            .map_err(|e| anyhow::anyhow!("command failed: {}: {}", self.command, e))?;

        ctx.log.info(format!("{} -> finished", self.command));
        Ok(ApplyResult::Modified)
    }
}
