//! Package resource - installs or removes system packages
//!
//! Package managers are not safe to run concurrently, so every package
//! resource takes the manifest-wide lock.

use anyhow::{Context, Result, bail};
use declarative::{ApplyContext, ApplyResult, ResourceDescriptor, ResourceParams};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::process::{Command, Stdio};

use super::{is_root, os_release_field, require_root, run_status};

/// Supported package managers
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PackageManager {
    Apt,
    Dnf,
    Pacman,
    Brew,
}

impl PackageManager {
    /// Detect the package manager of the running system
    pub fn detect() -> Result<Self> {
        if cfg!(target_os = "macos") {
            return Ok(Self::Brew);
        }

        let os_release = std::fs::read_to_string("/etc/os-release")
            .context("Failed to read /etc/os-release")?;
        Self::from_os_release(&os_release)
    }

    /// Pick a manager from `/etc/os-release` content, trying `ID` then `ID_LIKE`
    pub fn from_os_release(content: &str) -> Result<Self> {
        let id = os_release_field(content, "ID").unwrap_or_default();
        let id_like = os_release_field(content, "ID_LIKE").unwrap_or_default();

        std::iter::once(id.as_str())
            .chain(id_like.split_whitespace())
            .find_map(Self::for_distribution)
            .with_context(|| format!("Unrecognised distribution: {}", id))
    }

    /// System package managers need root; Homebrew refuses to run as root
    pub fn needs_root(self) -> bool {
        !matches!(self, Self::Brew)
    }

    fn for_distribution(id: &str) -> Option<Self> {
        match id {
            "debian" | "ubuntu" | "linuxmint" | "pop" => Some(Self::Apt),
            "fedora" | "centos" | "rhel" | "rocky" | "almalinux" => Some(Self::Dnf),
            "arch" | "manjaro" | "endeavouros" => Some(Self::Pacman),
            _ => None,
        }
    }

    fn install_command(self, names: &[String]) -> Command {
        let mut cmd = match self {
            Self::Apt => {
                let mut c = Command::new("apt-get");
                c.args(["install", "-y"]);
                c
            }
            Self::Dnf => {
                let mut c = Command::new("dnf");
                c.args(["install", "-y"]);
                c
            }
            Self::Pacman => {
                let mut c = Command::new("pacman");
                c.args(["-S", "--noconfirm", "--needed"]);
                c
            }
            Self::Brew => {
                let mut c = Command::new("brew");
                c.arg("install");
                c
            }
        };
        cmd.args(names);
        cmd
    }

    fn uninstall_command(self, names: &[String]) -> Command {
        let mut cmd = match self {
            Self::Apt => {
                let mut c = Command::new("apt-get");
                c.args(["remove", "-y"]);
                c
            }
            Self::Dnf => {
                let mut c = Command::new("dnf");
                c.args(["remove", "-y"]);
                c
            }
            Self::Pacman => {
                let mut c = Command::new("pacman");
                c.args(["-R", "--noconfirm"]);
                c
            }
            Self::Brew => {
                let mut c = Command::new("brew");
                c.arg("uninstall");
                c
            }
        };
        cmd.args(names);
        cmd
    }

    /// Check if a single package is installed
    pub(crate) fn is_installed(self, name: &str) -> Result<bool> {
        let mut cmd = match self {
            Self::Apt => {
                let mut c = Command::new("dpkg-query");
                c.args(["-W", "-f=${Status}", name]);
                c
            }
            Self::Dnf => {
                let mut c = Command::new("rpm");
                c.args(["-q", name]);
                c
            }
            Self::Pacman => {
                let mut c = Command::new("pacman");
                c.args(["-Q", name]);
                c
            }
            Self::Brew => {
                let mut c = Command::new("brew");
                c.args(["list", "--versions", name]);
                c
            }
        };

        let output = cmd
            .stderr(Stdio::null())
            .output()
            .with_context(|| format!("Failed to query {} for {}", self, name))?;

        Ok(match self {
            Self::Apt => {
                output.status.success()
                    && String::from_utf8_lossy(&output.stdout).contains("install ok installed")
            }
            Self::Brew => output.status.success() && !output.stdout.is_empty(),
            Self::Dnf | Self::Pacman => output.status.success(),
        })
    }
}

impl fmt::Display for PackageManager {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Apt => "apt",
            Self::Dnf => "dnf",
            Self::Pacman => "pacman",
            Self::Brew => "brew",
        };
        f.write_str(s)
    }
}

/// One or more packages to install or remove
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Package {
    pub names: Vec<String>,
    /// Package manager; detected from the system when unset
    #[serde(default)]
    pub manager: Option<PackageManager>,
    /// Show the package manager's stdout
    #[serde(default)]
    pub verbose: bool,
    /// Remove the packages instead
    #[serde(default)]
    pub uninstall: bool,
}

impl Package {
    pub fn new<S: AsRef<str>>(names: &[S]) -> Self {
        Self {
            names: names.iter().map(|n| n.as_ref().to_string()).collect(),
            ..Default::default()
        }
    }

    /// Reject runs that the package manager would refuse
    fn check_privileges(manager: PackageManager, root: bool) -> Result<()> {
        if manager.needs_root() {
            require_root("Package", root)?;
        }
        Ok(())
    }

    /// Names whose installed state differs from the desired one
    fn pending(&self, manager: PackageManager) -> Result<Vec<String>> {
        let mut pending = Vec::new();
        for name in &self.names {
            if manager.is_installed(name)? == self.uninstall {
                pending.push(name.clone());
            }
        }
        Ok(pending)
    }
}

impl ResourceDescriptor for Package {
    fn kind(&self) -> &'static str {
        "Package"
    }

    fn operation_name(&self) -> &'static str {
        if self.uninstall { "Uninstall" } else { "Install" }
    }

    fn params(&self) -> ResourceParams {
        ResourceParams::with_lock()
    }

    fn preflight_checks(&mut self, _ctx: &ApplyContext) -> Result<()> {
        if self.names.is_empty() {
            bail!("Required parameter: Names");
        }
        if self.names.iter().any(|n| n.trim().is_empty()) {
            bail!("Package names must not be empty");
        }
        let manager = match self.manager {
            Some(manager) => manager,
            None => PackageManager::detect()?,
        };
        Self::check_privileges(manager, is_root())?;
        self.manager = Some(manager);
        Ok(())
    }

    fn run(&self, ctx: &ApplyContext) -> Result<ApplyResult> {
        let manager = match self.manager {
            Some(manager) => manager,
            None => PackageManager::detect()?,
        };

        let pending = self.pending(manager)?;
        if pending.is_empty() {
            ctx.log.noop(format!("Packages: {}", self.names.join(", ")));
            return Ok(ApplyResult::NoChange);
        }

        ctx.log.info(format!("Packages:\n\t{}", pending.join("\n\t")));
        if ctx.dry_run {
            return Ok(ApplyResult::Skipped {
                reason: "Dry run".to_string(),
            });
        }

        let show_stdout = self.verbose && !ctx.quiet;
        if self.uninstall {
            run_status(&mut manager.uninstall_command(&pending), show_stdout)?;
            Ok(ApplyResult::Removed)
        } else {
            run_status(&mut manager.install_command(&pending), show_stdout)?;
            Ok(ApplyResult::Created)
        }
    }
}
