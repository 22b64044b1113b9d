//! Download resource - fetches a URL into a file

use anyhow::{Context, Result};
use declarative::{ApplyContext, ApplyResult, ResourceDescriptor, ResourceLog, ResourceParams};
use serde::{Deserialize, Serialize};
use std::fs;

use super::file::DEFAULT_FILE_MODE;
use super::{ensure_mode, ensure_owner, fetch, require};
use crate::ui::format_size;

/// A file whose content comes from a URL
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Download {
    pub url: String,
    /// Destination path (`~` and `$VAR` are expanded)
    pub path: String,
    /// Leave an existing file alone without fetching
    #[serde(default)]
    pub not_if_exists: bool,
    /// Permission bits, defaults to 0o644
    #[serde(default)]
    pub mode: Option<u32>,
    #[serde(default)]
    pub owner: Option<String>,
    #[serde(default)]
    pub group: Option<String>,
}

impl Download {
    pub fn new(url: &str, path: &str) -> Self {
        Self {
            url: url.to_string(),
            path: path.to_string(),
            ..Default::default()
        }
    }
}

impl ResourceDescriptor for Download {
    fn kind(&self) -> &'static str {
        "Download"
    }

    fn operation_name(&self) -> &'static str {
        "Get"
    }

    fn params(&self) -> ResourceParams {
        ResourceParams::new()
    }

    fn preflight_checks(&mut self, _ctx: &ApplyContext) -> Result<()> {
        require("URL", &self.url)?;
        require("Path", &self.path)?;
        self.mode.get_or_insert(DEFAULT_FILE_MODE);
        Ok(())
    }

    fn run(&self, ctx: &ApplyContext) -> Result<ApplyResult> {
        let path = crate::paths::expand(&self.path);
        let msg = format!("{} -> {}", self.url, path.display());

        if ctx.dry_run {
            ctx.log.info(&msg);
            return Ok(ApplyResult::Skipped {
                reason: "Dry run".to_string(),
            });
        }

        if self.not_if_exists && path.exists() {
            ctx.log.noop(&msg);
            return Ok(ApplyResult::NoChange);
        }

        let body = fetch(&self.url)?;
        let mut result = match fs::read(&path) {
            Ok(current) if current == body => ApplyResult::NoChange,
            Ok(_) => ApplyResult::Modified,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => ApplyResult::Created,
            Err(e) => {
                return Err(e).with_context(|| format!("Failed to read {}", path.display()));
            }
        };

        if result == ApplyResult::NoChange {
            ctx.log.noop(&msg);
        } else {
            fs::write(&path, &body)
                .with_context(|| format!("Failed to write {}", path.display()))?;
            ctx.log.info(format!("{} (size: {})", msg, format_size(body.len() as u64)));
        }

        let perms = ResourceLog::new("Download", "Permissions");
        let mode = self.mode.unwrap_or(DEFAULT_FILE_MODE);
        let changed = ensure_mode(&perms, &path, mode)?
            | ensure_owner(&perms, &path, self.owner.as_deref(), self.group.as_deref())?;

        if changed && result == ApplyResult::NoChange {
            result = ApplyResult::Modified;
        }
        Ok(result)
    }
}
