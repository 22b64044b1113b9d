//! Git resource - clones and updates repositories through the `git` CLI

use anyhow::{Context, Result, bail};
use declarative::{ApplyContext, ApplyResult, ResourceDescriptor};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::process::Command;

use super::directory::{DEFAULT_DIR_MODE, remove_directory, set_directory_permissions};
use super::require;

/// Default remote name
pub const DEFAULT_REMOTE: &str = "origin";

/// A Git checkout at `path`
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Git {
    /// Where to clone the repository
    pub path: String,
    /// Repository URL (required unless deleting)
    #[serde(default)]
    pub url: String,
    /// Branch to check out; the remote's default branch when unset
    #[serde(default)]
    pub branch: Option<String>,
    /// Remote name, defaults to `origin`
    #[serde(default)]
    pub remote: Option<String>,
    /// Pull latest changes when the checkout already exists
    #[serde(default)]
    pub ensure: bool,
    #[serde(default)]
    pub mode: Option<u32>,
    #[serde(default)]
    pub owner: Option<String>,
    #[serde(default)]
    pub group: Option<String>,
    /// Remove the checkout
    #[serde(default)]
    pub delete: bool,
}

impl Git {
    pub fn new(path: &str, url: &str) -> Self {
        Self {
            path: path.to_string(),
            url: url.to_string(),
            ..Default::default()
        }
    }

    fn remote(&self) -> &str {
        self.remote.as_deref().unwrap_or(DEFAULT_REMOTE)
    }

    fn clone_args(&self, path: &Path) -> Vec<String> {
        let mut args = vec![
            "clone".to_string(),
            "--origin".to_string(),
            self.remote().to_string(),
        ];
        if let Some(branch) = &self.branch {
            args.push("--branch".to_string());
            args.push(branch.clone());
        }
        args.push(self.url.clone());
        args.push(path.to_string_lossy().into_owned());
        args
    }

    fn pull_args(&self, path: &Path) -> Vec<String> {
        let mut args = vec![
            "-C".to_string(),
            path.to_string_lossy().into_owned(),
            "pull".to_string(),
            "--ff-only".to_string(),
            self.remote().to_string(),
        ];
        if let Some(branch) = &self.branch {
            args.push(branch.clone());
        }
        args
    }

    fn create(&self, ctx: &ApplyContext) -> Result<ApplyResult> {
        let path = crate::paths::expand(&self.path);
        let msg = format!("{} -> {}", self.url, path.display());

        if ctx.dry_run {
            ctx.log.info(&msg);
            return Ok(ApplyResult::Skipped {
                reason: "Dry run".to_string(),
            });
        }

        let mut result = if path.exists() {
            if !self.ensure {
                ctx.log.noop(&msg);
                ApplyResult::NoChange
            } else {
                let stdout = git(&self.pull_args(&path))?;
                if is_up_to_date(&stdout) {
                    ctx.log.noop(&msg);
                    ApplyResult::NoChange
                } else {
                    ctx.log.info(&msg);
                    ApplyResult::Modified
                }
            }
        } else {
            if let Some(parent) = path.parent() {
                std::fs::create_dir_all(parent).with_context(|| {
                    format!("Failed to create parent directory: {}", parent.display())
                })?;
            }
            git(&self.clone_args(&path))?;
            ctx.log.info(&msg);
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

/// Run git and return its stdout
fn git(args: &[String]) -> Result<String> {
    let output = Command::new("git")
        .args(args)
        .env("GIT_TERMINAL_PROMPT", "0")
        .output()
        .context("Failed to run git")?;

    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        bail!("git {} failed: {}", args.join(" "), stderr.trim());
    }
    Ok(String::from_utf8_lossy(&output.stdout).into_owned())
}

fn is_up_to_date(stdout: &str) -> bool {
    stdout.contains("Already up to date") || stdout.contains("Already up-to-date")
}

impl ResourceDescriptor for Git {
    fn kind(&self) -> &'static str {
        "Git"
    }

    fn operation_name(&self) -> &'static str {
        if self.delete { "Delete" } else { "Create" }
    }

    fn preflight_checks(&mut self, _ctx: &ApplyContext) -> Result<()> {
        require("Path", &self.path)?;
        if !self.delete {
            require("URL", &self.url)?;
            self.remote.get_or_insert_with(|| DEFAULT_REMOTE.to_string());
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

#[cfg(test)]
mod tests {
    use super::*;
    use declarative::{ResourceLog, RunConfig};
    use std::path::PathBuf;
    use tempfile::TempDir;

    fn ctx(config: &RunConfig) -> ApplyContext<'_> {
        ApplyContext::new(config, ResourceLog::new("Git", "Create"))
    }

    #[test]
    fn test_clone_args() {
        let mut repo = Git::new("~/src/viaduct", "https://example.com/viaduct.git");
        let path = PathBuf::from("/home/u/src/viaduct");
        assert_eq!(
            repo.clone_args(&path),
            vec![
                "clone",
                "--origin",
                "origin",
                "https://example.com/viaduct.git",
                "/home/u/src/viaduct"
            ]
        );

        repo.branch = Some("dev".to_string());
        repo.remote = Some("upstream".to_string());
        let args = repo.clone_args(&path);
        assert_eq!(&args[1..5], &["--origin", "upstream", "--branch", "dev"]);
    }

    #[test]
    fn test_pull_args() {
        let mut repo = Git::new("/r", "u");
        repo.branch = Some("main".to_string());
        assert_eq!(
            repo.pull_args(Path::new("/r")),
            vec!["-C", "/r", "pull", "--ff-only", "origin", "main"]
        );
    }

    #[test]
    fn test_up_to_date_detection() {
        assert!(is_up_to_date("Already up to date.\n"));
        assert!(is_up_to_date("Already up-to-date.\n"));
        assert!(!is_up_to_date("Updating 1a2b3c..4d5e6f\nFast-forward\n"));
    }

    #[test]
    fn test_preflight() {
        let config = RunConfig::default();
        let mut repo = Git::new("/r", "https://example.com/r.git");
        repo.preflight_checks(&ctx(&config)).unwrap();
        assert_eq!(repo.remote.as_deref(), Some("origin"));
        assert_eq!(repo.mode, Some(0o755));

        let mut no_url = Git::new("/r", "");
        assert!(no_url.preflight_checks(&ctx(&config)).is_err());

        let mut delete = Git {
            path: "/r".to_string(),
            delete: true,
            ..Default::default()
        };
        assert!(delete.preflight_checks(&ctx(&config)).is_ok());
    }

    #[cfg(unix)]
    #[test]
    fn test_existing_checkout_without_ensure_is_noop() {
        let tmp = TempDir::new().unwrap();
        let config = RunConfig::default();
        let mut repo = Git::new(&tmp.path().to_string_lossy(), "https://example.com/r.git");
        repo.mode = Some(0o700);
        std::fs::set_permissions(
            tmp.path(),
            <std::fs::Permissions as std::os::unix::fs::PermissionsExt>::from_mode(0o700),
        )
        .unwrap();

        assert_eq!(repo.run(&ctx(&config)).unwrap(), ApplyResult::NoChange);
    }

    #[test]
    fn test_delete_checkout() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("repo");
        std::fs::create_dir_all(path.join(".git")).unwrap();
        let config = RunConfig::default();

        let repo = Git {
            path: path.to_string_lossy().into_owned(),
            delete: true,
            ..Default::default()
        };
        assert_eq!(repo.run(&ctx(&config)).unwrap(), ApplyResult::Removed);
        assert!(!path.exists());
    }
}
