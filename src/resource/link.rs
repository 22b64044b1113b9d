//! Link resource - symlink creation, replacement and removal

use anyhow::{Context, Result, bail};
use declarative::{ApplyContext, ApplyResult, ResourceDescriptor};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

use super::require;

/// A symlink at `path` pointing to `source`
///
/// An existing symlink with the wrong target, or a regular file at `path`,
/// is replaced.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Link {
    /// Where the symlink is created
    pub path: String,
    /// What the symlink points to (required unless deleting)
    #[serde(default)]
    pub source: Option<String>,
    /// Remove the symlink instead
    #[serde(default)]
    pub delete: bool,
}

#[derive(Debug, PartialEq, Eq)]
enum LinkState {
    Missing,
    Correct,
    WrongTarget(PathBuf),
    FileExists,
    DirectoryExists,
}

impl Link {
    pub fn new(path: &str, source: &str) -> Self {
        Self {
            path: path.to_string(),
            source: Some(source.to_string()),
            delete: false,
        }
    }

    pub fn delete(path: &str) -> Self {
        Self {
            path: path.to_string(),
            source: None,
            delete: true,
        }
    }

    /// Expanded, absolute source path
    fn source_path(&self) -> Result<PathBuf> {
        let source = self.source.as_deref().context("Required parameter: Source")?;
        std::path::absolute(crate::paths::expand(source))
            .with_context(|| format!("Failed to resolve source: {}", source))
    }

    fn check_current(path: &Path, source: &Path) -> Result<LinkState> {
        let meta = match fs::symlink_metadata(path) {
            Ok(meta) => meta,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(LinkState::Missing),
            Err(e) => {
                return Err(e).with_context(|| format!("Failed to inspect {}", path.display()));
            }
        };

        if meta.file_type().is_symlink() {
            let target = fs::read_link(path).context("Failed to read symlink")?;
            if target == source {
                Ok(LinkState::Correct)
            } else {
                Ok(LinkState::WrongTarget(target))
            }
        } else if meta.is_dir() {
            Ok(LinkState::DirectoryExists)
        } else {
            Ok(LinkState::FileExists)
        }
    }

    fn create(&self, ctx: &ApplyContext) -> Result<ApplyResult> {
        let source = self.source_path()?;
        let path = crate::paths::expand(&self.path);
        let msg = format!("{} -> {}", source.display(), path.display());

        if ctx.dry_run {
            ctx.log.info(&msg);
            return Ok(ApplyResult::Skipped {
                reason: "Dry run".to_string(),
            });
        }

        let result = match Self::check_current(&path, &source)? {
            LinkState::Correct => {
                ctx.log.noop(&msg);
                return Ok(ApplyResult::NoChange);
            }
            LinkState::DirectoryExists => {
                bail!(
                    "Refusing to replace directory with symlink: {}",
                    path.display()
                );
            }
            LinkState::WrongTarget(previous) => {
                ctx.log.debug(format!("replacing link to {}", previous.display()));
                fs::remove_file(&path).with_context(|| {
                    format!("Failed to remove existing symlink: {}", path.display())
                })?;
                ApplyResult::Modified
            }
            LinkState::FileExists => {
                fs::remove_file(&path).with_context(|| {
                    format!("Failed to remove existing file: {}", path.display())
                })?;
                ApplyResult::Modified
            }
            LinkState::Missing => {
                if let Some(parent) = path.parent() {
                    fs::create_dir_all(parent).with_context(|| {
                        format!("Failed to create parent directory: {}", parent.display())
                    })?;
                }
                ApplyResult::Created
            }
        };

        symlink(&source, &path)?;
        ctx.log.info(&msg);
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

        match fs::symlink_metadata(&path) {
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                ctx.log.noop(path.display());
                Ok(ApplyResult::NoChange)
            }
            Err(e) => Err(e).with_context(|| format!("Failed to inspect {}", path.display())),
            Ok(meta) if !meta.file_type().is_symlink() => {
                bail!("Not a symlink, refusing to delete: {}", path.display())
            }
            Ok(_) => {
                fs::remove_file(&path)
                    .with_context(|| format!("Failed to remove symlink: {}", path.display()))?;
                ctx.log.info(path.display());
                Ok(ApplyResult::Removed)
            }
        }
    }
}

#[cfg(unix)]
fn symlink(source: &Path, path: &Path) -> Result<()> {
    std::os::unix::fs::symlink(source, path).with_context(|| {
        format!(
            "Failed to create symlink: {} -> {}",
            path.display(),
            source.display()
        )
    })
}

#[cfg(windows)]
fn symlink(source: &Path, path: &Path) -> Result<()> {
    use std::os::windows::fs::{symlink_dir, symlink_file};

    let created = if source.is_dir() {
        symlink_dir(source, path)
    } else {
        symlink_file(source, path)
    };
    created.with_context(|| {
        format!(
            "Failed to create symlink: {} -> {}",
            path.display(),
            source.display()
        )
    })
}

#[cfg(not(any(unix, windows)))]
fn symlink(_source: &Path, _path: &Path) -> Result<()> {
    bail!("Symlinks not supported on this platform");
}

impl ResourceDescriptor for Link {
    fn kind(&self) -> &'static str {
        "Link"
    }

    fn operation_name(&self) -> &'static str {
        if self.delete { "Delete" } else { "Create" }
    }

    fn preflight_checks(&mut self, _ctx: &ApplyContext) -> Result<()> {
        require("Path", &self.path)?;
        if !self.delete {
            require("Source", self.source.as_deref().unwrap_or_default())?;
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
