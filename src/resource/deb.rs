//! Deb resource - installs a Debian package from a URL

use anyhow::{Context, Result, bail};
use declarative::{ApplyContext, ApplyResult, ResourceDescriptor, ResourceParams};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fs;
use std::path::Path;
use std::process::Command;

use super::{PackageManager, fetch, is_root, require, require_root, run_status};

/// A `.deb` package fetched from a URL
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Deb {
    /// Package name as known to dpkg
    pub name: String,
    /// Where to fetch the `.deb` from
    #[serde(default)]
    pub uri: String,
    /// Expected SHA-256 of the `.deb`, in hex
    #[serde(default)]
    pub checksum: Option<String>,
    /// Remove the package instead
    #[serde(default)]
    pub delete: bool,
}

impl Deb {
    pub fn new(name: &str, uri: &str) -> Self {
        Self {
            name: name.to_string(),
            uri: uri.to_string(),
            ..Default::default()
        }
    }

    /// Fail unless `data` matches the expected checksum, if one is set
    fn verify_checksum(&self, data: &[u8]) -> Result<()> {
        let Some(expected) = &self.checksum else {
            return Ok(());
        };

        let actual = format!("{:x}", Sha256::digest(data));
        if !actual.eq_ignore_ascii_case(expected) {
            bail!(
                "Checksum mismatch for {}: expected {}, got {}",
                self.name,
                expected,
                actual
            );
        }
        Ok(())
    }

    fn install_command(package: &Path) -> Command {
        let mut cmd = Command::new("apt-get");
        cmd.args(["install", "-y"]).arg(package);
        cmd
    }

    fn create(&self, ctx: &ApplyContext) -> Result<ApplyResult> {
        if PackageManager::Apt.is_installed(&self.name)? {
            ctx.log.noop(&self.name);
            return Ok(ApplyResult::NoChange);
        }

        ctx.log.info(format!("{} <- {}", self.name, self.uri));
        if ctx.dry_run {
            return Ok(ApplyResult::Skipped {
                reason: "Dry run".to_string(),
            });
        }

        let data = fetch(&self.uri)?;
        self.verify_checksum(&data)?;

        let dir = ctx
            .scratch_dir
            .map_or_else(std::env::temp_dir, Path::to_path_buf);
        fs::create_dir_all(&dir).with_context(|| format!("Failed to create {}", dir.display()))?;
        let package = std::path::absolute(dir.join(format!("{}.deb", self.name)))
            .context("Failed to resolve package path")?;
        fs::write(&package, &data)
            .with_context(|| format!("Failed to write {}", package.display()))?;

        let installed = run_status(&mut Self::install_command(&package), !ctx.quiet);
        let _ = fs::remove_file(&package);
        installed?;

        Ok(ApplyResult::Created)
    }

    fn remove(&self, ctx: &ApplyContext) -> Result<ApplyResult> {
        if !PackageManager::Apt.is_installed(&self.name)? {
            ctx.log.noop(&self.name);
            return Ok(ApplyResult::NoChange);
        }

        ctx.log.info(&self.name);
        if ctx.dry_run {
            return Ok(ApplyResult::Skipped {
                reason: "Dry run".to_string(),
            });
        }

        run_status(
            Command::new("apt-get").args(["remove", "-y", &self.name]),
            !ctx.quiet,
        )?;
        Ok(ApplyResult::Removed)
    }
}

impl ResourceDescriptor for Deb {
    fn kind(&self) -> &'static str {
        "Deb"
    }

    fn operation_name(&self) -> &'static str {
        if self.delete { "Delete" } else { "Create" }
    }

    fn params(&self) -> ResourceParams {
        ResourceParams::with_lock()
    }

    fn preflight_checks(&mut self, _ctx: &ApplyContext) -> Result<()> {
        require("Name", &self.name)?;
        if !self.delete {
            require("URI", &self.uri)?;
        }
        if let Some(checksum) = &self.checksum
            && (checksum.len() != 64 || !checksum.chars().all(|c| c.is_ascii_hexdigit()))
        {
            bail!("Checksum must be a hex SHA-256 digest: {}", checksum);
        }
        require_root("Deb", is_root())
    }

    fn run(&self, ctx: &ApplyContext) -> Result<ApplyResult> {
        if self.delete {
            self.remove(ctx)
        } else {
            self.create(ctx)
        }
    }
}
