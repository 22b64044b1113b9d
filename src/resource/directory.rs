//! Directory resource

use anyhow::{Context, Result, bail};
use declarative::{ApplyContext, ApplyResult, ResourceDescriptor, ResourceLog};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;

use super::{ensure_mode, ensure_owner, require};

/// Default permission bits for created directories
pub const DEFAULT_DIR_MODE: u32 = 0o755;

/// A directory on the filesystem
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Directory {
    /// Path of the directory; missing parents are created
    pub path: String,
    /// Permission bits, defaults to 0o755
    #[serde(default)]
    pub mode: Option<u32>,
    #[serde(default)]
    pub owner: Option<String>,
    #[serde(default)]
    pub group: Option<String>,
    /// Remove the directory and its contents
    #[serde(default)]
    pub delete: bool,
}

impl Directory {
    pub fn new(path: &str) -> Self {
        Self {
            path: path.to_string(),
            ..Default::default()
        }
    }

    fn create(&self, ctx: &ApplyContext) -> Result<ApplyResult> {
        let path = crate::paths::expand(&self.path);

        if ctx.dry_run {
            ctx.log.info(path.display());
            return Ok(ApplyResult::Skipped {
                reason: "Dry run".to_string(),
            });
        }

        let mut result = if path.is_dir() {
            ctx.log.noop(path.display());
            ApplyResult::NoChange
        } else {
            if path.exists() {
                bail!("{} exists and is not a directory", path.display());
            }
            fs::create_dir_all(&path)
                .with_context(|| format!("Failed to create directory: {}", path.display()))?;
            ctx.log.info(path.display());
            ApplyResult::Created
        };

        let changed = set_directory_permissions(
            &path,
            self.mode.unwrap_or(DEFAULT_DIR_MODE),
            self.owner.as_deref(),
            self.group.as_deref(),
        )?;
        if changed && result == ApplyResult::NoChange {
            result = ApplyResult::Modified;
        }
        Ok(result)
    }
}

/// Apply mode and ownership to a directory; returns true if anything changed
pub(crate) fn set_directory_permissions(
    path: &Path,
    mode: u32,
    owner: Option<&str>,
    group: Option<&str>,
) -> Result<bool> {
    let log = ResourceLog::new("Directory", "Permissions");
    let mode_changed = ensure_mode(&log, path, mode)?;
    let owner_changed = ensure_owner(&log, path, owner, group)?;
    Ok(mode_changed || owner_changed)
}

/// Remove a directory tree if present
pub(crate) fn remove_directory(ctx: &ApplyContext, path: &Path) -> Result<ApplyResult> {
    if ctx.dry_run {
        ctx.log.info(path.display());
        return Ok(ApplyResult::Skipped {
            reason: "Dry run".to_string(),
        });
    }

    if !path.is_dir() {
        ctx.log.noop(path.display());
        return Ok(ApplyResult::NoChange);
    }

    fs::remove_dir_all(path)
        .with_context(|| format!("Failed to remove directory: {}", path.display()))?;
    ctx.log.info(path.display());
    Ok(ApplyResult::Removed)
}

impl ResourceDescriptor for Directory {
    fn kind(&self) -> &'static str {
        "Directory"
    }

    fn operation_name(&self) -> &'static str {
        if self.delete { "Delete" } else { "Create" }
    }

    fn preflight_checks(&mut self, _ctx: &ApplyContext) -> Result<()> {
        require("Path", &self.path)?;
        if !self.delete {
            self.mode.get_or_insert(DEFAULT_DIR_MODE);
        }
        Ok(())
    }

    fn run(&self, ctx: &ApplyContext) -> Result<ApplyResult> {
        if self.delete {
            remove_directory(ctx, &crate::paths::expand(&self.path))
        } else {
            self.create(ctx)
        }
    }
}
