//! File resource - manages content, permissions and ownership of a file

use anyhow::{Context, Result};
use declarative::{ApplyContext, ApplyResult, ResourceDescriptor, ResourceLog};
use serde::{Deserialize, Serialize};
use std::fs;

use super::{ensure_mode, ensure_owner, require};

/// Default permission bits for created files
pub const DEFAULT_FILE_MODE: u32 = 0o644;

/// A file with fixed content
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct File {
    /// Path of the file (`~` and `$VAR` are expanded)
    pub path: String,
    /// Full content of the file
    #[serde(default)]
    pub content: String,
    /// Permission bits, defaults to 0o644
    #[serde(default)]
    pub mode: Option<u32>,
    /// Owning user name or UID
    #[serde(default)]
    pub owner: Option<String>,
    /// Owning group name or GID
    #[serde(default)]
    pub group: Option<String>,
    /// Remove the file instead of creating it
    #[serde(default)]
    pub delete: bool,
}

impl File {
    pub fn new(path: &str, content: &str) -> Self {
        Self {
            path: path.to_string(),
            content: content.to_string(),
            ..Default::default()
        }
    }

    pub fn delete(path: &str) -> Self {
        Self {
            path: path.to_string(),
            delete: true,
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

        let existing = match fs::read_to_string(&path) {
            Ok(content) => Some(content),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => None,
            Err(e) => {
                return Err(e).with_context(|| format!("Failed to read {}", path.display()));
            }
        };

        let mut result = match &existing {
            Some(current) if *current == self.content => {
                ctx.log.noop(path.display());
                ApplyResult::NoChange
            }
            Some(current) => {
                log_diff(&ctx.log, current, &self.content);
                fs::write(&path, &self.content)
                    .with_context(|| format!("Failed to write {}", path.display()))?;
                ctx.log.info(path.display());
                ApplyResult::Modified
            }
            None => {
                fs::write(&path, &self.content)
                    .with_context(|| format!("Failed to write {}", path.display()))?;
                ctx.log.info(path.display());
                ApplyResult::Created
            }
        };

        let perms = ResourceLog::new("File", "Permissions");
        let mode = self.mode.unwrap_or(DEFAULT_FILE_MODE);
        let changed = ensure_mode(&perms, &path, mode)?
            | ensure_owner(
                &perms,
                &path,
                self.owner.as_deref(),
                self.group.as_deref(),
            )?;

        if changed && result == ApplyResult::NoChange {
            result = ApplyResult::Modified;
        }
        Ok(result)
    }

    fn remove(&self, ctx: &ApplyContext) -> Result<ApplyResult> {
        let path = crate::paths::expand(&self.path);

        if ctx.dry_run {
            ctx.log.info(path.display());
            return Ok(ApplyResult::Skipped {
                reason: "Dry run".to_string(),
            });
        }

        if !path.exists() {
            ctx.log.noop(path.display());
            return Ok(ApplyResult::NoChange);
        }

        fs::remove_file(&path).with_context(|| format!("Failed to remove {}", path.display()))?;
        ctx.log.info(path.display());
        Ok(ApplyResult::Removed)
    }
}

/// Log a line diff of the content change at debug level
fn log_diff(log: &ResourceLog, old: &str, new: &str) {
    if !log::log_enabled!(log::Level::Debug) {
        return;
    }

    let diff = similar::TextDiff::from_lines(old, new);
    let mut out = String::new();
    for change in diff.iter_all_changes() {
        match change.tag() {
            similar::ChangeTag::Delete => out.push_str(&format!("- {change}")),
            similar::ChangeTag::Insert => out.push_str(&format!("+ {change}")),
            similar::ChangeTag::Equal => {}
        }
    }
    log.debug(format!("content diff:\n{}", out.trim_end()));
}

impl ResourceDescriptor for File {
    fn kind(&self) -> &'static str {
        "File"
    }

    fn operation_name(&self) -> &'static str {
        if self.delete { "Delete" } else { "Create" }
    }

    fn preflight_checks(&mut self, _ctx: &ApplyContext) -> Result<()> {
        require("Path", &self.path)?;
        if !self.delete {
            self.mode.get_or_insert(DEFAULT_FILE_MODE);
        }
        Ok(())
    }

    fn run(&self, ctx: &ApplyContext) -> Result<ApplyResult> {
        if self.delete {
            self.remove(ctx)
        } else {
            self.create(ctx)
        }
    }
}
