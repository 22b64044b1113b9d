//! Apt repository resource - manages a `sources.list.d` entry
//!
//! A repository can carry a signing key, fetched from a URL or from the
//! Ubuntu keyserver. Resources that run `apt-get update` take the
//! manifest-wide lock, since apt holds its own lock while updating.

use anyhow::{Context, Result, bail};
use declarative::{ApplyContext, ApplyResult, ResourceDescriptor, ResourceParams};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};

use super::{fetch, is_root, os_release_field, require, require_root, run_status};

const SOURCES_DIR: &str = "/etc/apt/sources.list.d";
const KEYRINGS_DIR: &str = "/usr/share/keyrings";
const KEYSERVER: &str = "hkps://keyserver.ubuntu.com";
const DEFAULT_SOURCE: &str = "main";

/// An apt repository, or a bare `apt-get update`
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct AptRepository {
    /// Base name of the sources file and keyring
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub uri: String,
    /// Distribution codename, defaults to the running system's
    #[serde(default)]
    pub distribution: Option<String>,
    /// Repository component, defaults to `main`
    #[serde(default)]
    pub source: Option<String>,
    /// Options rendered as `[key=value ...]`
    #[serde(default)]
    pub parameters: BTreeMap<String, String>,
    /// Key ID to receive from the keyserver
    #[serde(default)]
    pub signing_key: Option<String>,
    /// URL of an armored signing key
    #[serde(default)]
    pub signing_key_url: Option<String>,
    #[serde(default)]
    pub delete: bool,
    /// Run `apt-get update` after adding or removing the repository
    #[serde(default)]
    pub update: bool,
    /// Only run `apt-get update`
    #[serde(default)]
    pub update_only: bool,
    #[serde(skip)]
    root: PathBuf,
}

impl AptRepository {
    pub fn new(name: &str, uri: &str) -> Self {
        Self {
            name: name.to_string(),
            uri: uri.to_string(),
            ..Default::default()
        }
    }

    /// Only refresh the package index
    pub fn update() -> Self {
        Self {
            update_only: true,
            ..Default::default()
        }
    }

    #[cfg(test)]
    fn under(mut self, root: &Path) -> Self {
        self.root = root.to_path_buf();
        self
    }

    fn system_path(&self, path: &str) -> PathBuf {
        if self.root.as_os_str().is_empty() {
            PathBuf::from(path)
        } else {
            self.root.join(path.trim_start_matches('/'))
        }
    }

    fn sources_path(&self) -> PathBuf {
        self.system_path(SOURCES_DIR).join(format!("{}.list", self.name))
    }

    fn keyring_path(&self) -> PathBuf {
        self.system_path(KEYRINGS_DIR).join(format!("{}.gpg", self.name))
    }

    fn has_signing_key(&self) -> bool {
        self.signing_key.is_some() || self.signing_key_url.is_some()
    }

    /// Distribution codename from `/etc/os-release` content
    fn codename(os_release: &str) -> Option<String> {
        os_release_field(os_release, "UBUNTU_CODENAME")
            .or_else(|| os_release_field(os_release, "VERSION_CODENAME"))
            .filter(|codename| !codename.is_empty())
    }

    /// The `deb ...` line written to the sources file
    fn source_line(&self) -> Result<String> {
        let distribution = self
            .distribution
            .as_deref()
            .context("Required parameter: Distribution")?;
        let source = self.source.as_deref().unwrap_or(DEFAULT_SOURCE);

        let mut parameters = self.parameters.clone();
        if self.has_signing_key() {
            parameters.insert(
                "signed-by".to_string(),
                self.keyring_path().display().to_string(),
            );
        }

        let mut line = String::from("deb ");
        if !parameters.is_empty() {
            let options: Vec<String> = parameters
                .iter()
                .map(|(key, value)| format!("{}={}", key, value))
                .collect();
            line.push_str(&format!("[{}] ", options.join(" ")));
        }
        line.push_str(&format!("{} {} {}\n", self.uri, distribution, source));
        Ok(line)
    }

    fn apt_update(&self, ctx: &ApplyContext) -> Result<ApplyResult> {
        ctx.log.info("apt-get update");
        if ctx.dry_run {
            return Ok(ApplyResult::Skipped {
                reason: "Dry run".to_string(),
            });
        }

        require_root("Apt", is_root())?;
        run_status(Command::new("apt-get").args(["update", "-y"]), false)?;
        Ok(ApplyResult::Modified)
    }

    fn create(&self, ctx: &ApplyContext) -> Result<ApplyResult> {
        let path = self.sources_path();

        if ctx.dry_run {
            ctx.log.info(&self.name);
            return Ok(ApplyResult::Skipped {
                reason: "Dry run".to_string(),
            });
        }

        if self.has_signing_key() {
            self.receive_signing_key(ctx)?;
        }

        let line = self.source_line()?;
        let result = match fs::read_to_string(&path) {
            Ok(current) if current == line => {
                ctx.log.noop(&self.name);
                return Ok(ApplyResult::NoChange);
            }
            Ok(_) => ApplyResult::Modified,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => ApplyResult::Created,
            Err(e) => {
                return Err(e).with_context(|| format!("Failed to read {}", path.display()));
            }
        };

        fs::write(&path, &line).with_context(|| format!("Failed to write {}", path.display()))?;
        ctx.log.info(&self.name);

        if self.update {
            self.apt_update(ctx)?;
        }
        Ok(result)
    }

    fn remove(&self, ctx: &ApplyContext) -> Result<ApplyResult> {
        let path = self.sources_path();

        if ctx.dry_run {
            ctx.log.info(&self.name);
            return Ok(ApplyResult::Skipped {
                reason: "Dry run".to_string(),
            });
        }

        if !path.exists() {
            ctx.log.noop(&self.name);
            return Ok(ApplyResult::NoChange);
        }

        fs::remove_file(&path).with_context(|| format!("Failed to remove {}", path.display()))?;
        ctx.log.info(&self.name);

        if self.update {
            self.apt_update(ctx)?;
        }
        Ok(ApplyResult::Removed)
    }

    fn receive_signing_key(&self, ctx: &ApplyContext) -> Result<()> {
        let keyring = self.keyring_path();
        if keyring.exists() {
            ctx.log.noop(format!("Signing key: {}", keyring.display()));
            return Ok(());
        }

        if let Some(url) = &self.signing_key_url {
            dearmor(&fetch(url)?, &keyring)?;
        } else if let Some(key) = &self.signing_key {
            let home = ctx
                .scratch_dir
                .map_or_else(std::env::temp_dir, Path::to_path_buf)
                .join(format!("gnupg-{}", self.name));
            let received = receive_from_keyserver(key, &home, &keyring);
            let _ = fs::remove_dir_all(&home);
            received?;
        }

        ctx.log.info(format!("Signing key: {}", keyring.display()));
        Ok(())
    }
}

/// Convert an armored key to a binary keyring at `keyring`
fn dearmor(armored: &[u8], keyring: &Path) -> Result<()> {
    let mut child = Command::new("gpg")
        .args(["--batch", "--yes", "--dearmor", "--output"])
        .arg(keyring)
        .stdin(Stdio::piped())
        .stdout(Stdio::null())
        .stderr(Stdio::inherit())
        .spawn()
        .context("Failed to run gpg")?;

    if let Some(mut stdin) = child.stdin.take() {
        stdin.write_all(armored).context("Failed to pass signing key to gpg")?;
    }

    let status = child.wait().context("Failed to wait for gpg")?;
    if !status.success() {
        bail!("gpg --dearmor exited with {}", status);
    }
    Ok(())
}

/// Receive `key` into a throwaway GnuPG home and export it to `keyring`
fn receive_from_keyserver(key: &str, home: &Path, keyring: &Path) -> Result<()> {
    fs::create_dir_all(home).with_context(|| format!("Failed to create {}", home.display()))?;

    let gpg = || {
        let mut cmd = Command::new("gpg");
        cmd.arg("--batch").arg("--homedir").arg(home);
        cmd
    };

    run_status(
        gpg().args(["--keyserver", KEYSERVER, "--recv-keys", key]),
        false,
    )?;
    run_status(gpg().arg("--output").arg(keyring).args(["--export", key]), false)
}

impl ResourceDescriptor for AptRepository {
    fn kind(&self) -> &'static str {
        "Apt"
    }

    fn operation_name(&self) -> &'static str {
        if self.update_only {
            "Update"
        } else if self.delete {
            "Delete"
        } else {
            "Create"
        }
    }

    fn params(&self) -> ResourceParams {
        if self.update || self.update_only {
            ResourceParams::with_lock()
        } else {
            ResourceParams::new()
        }
    }

    fn preflight_checks(&mut self, _ctx: &ApplyContext) -> Result<()> {
        if self.update_only {
            return Ok(());
        }

        require("Name", &self.name)?;
        if self.delete {
            return require_root("Apt", is_root());
        }
        require("URI", &self.uri)?;
        if self.signing_key.is_some() && self.signing_key_url.is_some() {
            bail!("Cannot set both signing_key and signing_key_url");
        }
        require_root("Apt", is_root())?;

        if self.distribution.is_none() {
            let os_release = fs::read_to_string("/etc/os-release")
                .context("Failed to read /etc/os-release")?;
            let codename = Self::codename(&os_release)
                .context("Could not determine the distribution codename; set distribution")?;
            self.distribution = Some(codename);
        }
        self.source.get_or_insert_with(|| DEFAULT_SOURCE.to_string());
        Ok(())
    }

    fn run(&self, ctx: &ApplyContext) -> Result<ApplyResult> {
        if self.update_only {
            self.apt_update(ctx)
        } else if self.delete {
            self.remove(ctx)
        } else {
            self.create(ctx)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use declarative::{ResourceLog, RunConfig};
    use tempfile::TempDir;

    fn ctx(config: &RunConfig) -> ApplyContext<'_> {
        ApplyContext::new(config, ResourceLog::new("Apt", "Create"))
    }

    fn repo(root: &Path) -> AptRepository {
        fs::create_dir_all(root.join("etc/apt/sources.list.d")).unwrap();
        AptRepository {
            distribution: Some("noble".to_string()),
            ..AptRepository::new("hashicorp", "https://apt.releases.hashicorp.com")
        }
        .under(root)
    }

    #[test]
    fn test_lock_follows_update() {
        assert!(!AptRepository::new("a", "https://a").params().global_lock);
        assert!(AptRepository::update().params().global_lock);

        let updating = AptRepository {
            update: true,
            ..AptRepository::new("a", "https://a")
        };
        assert!(updating.params().global_lock);
    }

    #[test]
    fn test_operation_names() {
        assert_eq!(AptRepository::update().operation_name(), "Update");
        assert_eq!(AptRepository::new("a", "u").operation_name(), "Create");
        let delete = AptRepository {
            delete: true,
            ..AptRepository::new("a", "u")
        };
        assert_eq!(delete.operation_name(), "Delete");
    }

    #[test]
    fn test_codename_from_os_release() {
        let ubuntu = "ID=ubuntu\nVERSION_CODENAME=noble\nUBUNTU_CODENAME=noble\n";
        assert_eq!(AptRepository::codename(ubuntu).as_deref(), Some("noble"));

        let debian = "ID=debian\nVERSION_CODENAME=bookworm\n";
        assert_eq!(AptRepository::codename(debian).as_deref(), Some("bookworm"));

        assert_eq!(AptRepository::codename("ID=arch\n"), None);
    }

    #[test]
    fn test_source_line() {
        let mut repo = AptRepository {
            distribution: Some("jammy".to_string()),
            ..AptRepository::new("docker", "https://download.docker.com/linux/ubuntu")
        };
        assert_eq!(
            repo.source_line().unwrap(),
            "deb https://download.docker.com/linux/ubuntu jammy main\n"
        );

        repo.parameters.insert("arch".to_string(), "amd64".to_string());
        repo.signing_key_url = Some("https://download.docker.com/gpg".to_string());
        repo.source = Some("stable".to_string());
        assert_eq!(
            repo.source_line().unwrap(),
            "deb [arch=amd64 signed-by=/usr/share/keyrings/docker.gpg] \
             https://download.docker.com/linux/ubuntu jammy stable\n"
        );
    }

    #[test]
    fn test_preflight_validation() {
        let config = RunConfig::default();

        assert!(AptRepository::update().preflight_checks(&ctx(&config)).is_ok());

        let err = AptRepository::new("a", "").preflight_checks(&ctx(&config)).unwrap_err();
        assert_eq!(err.to_string(), "Required parameter: URI");

        let mut both = AptRepository {
            signing_key: Some("ABCDEF".to_string()),
            signing_key_url: Some("https://a/key".to_string()),
            ..AptRepository::new("a", "https://a")
        };
        let err = both.preflight_checks(&ctx(&config)).unwrap_err();
        assert!(err.to_string().contains("Cannot set both"));
    }

    #[test]
    fn test_create_noop_modify_delete() {
        let tmp = TempDir::new().unwrap();
        let config = RunConfig::default();
        let repo = repo(tmp.path());
        let path = tmp.path().join("etc/apt/sources.list.d/hashicorp.list");

        assert_eq!(repo.run(&ctx(&config)).unwrap(), ApplyResult::Created);
        assert_eq!(
            fs::read_to_string(&path).unwrap(),
            "deb https://apt.releases.hashicorp.com noble main\n"
        );
        assert_eq!(repo.run(&ctx(&config)).unwrap(), ApplyResult::NoChange);

        fs::write(&path, "deb http://old noble main\n").unwrap();
        assert_eq!(repo.run(&ctx(&config)).unwrap(), ApplyResult::Modified);

        let delete = AptRepository {
            delete: true,
            ..repo.clone()
        };
        assert_eq!(delete.run(&ctx(&config)).unwrap(), ApplyResult::Removed);
        assert!(!path.exists());
        assert_eq!(delete.run(&ctx(&config)).unwrap(), ApplyResult::NoChange);
    }

    #[test]
    fn test_existing_keyring_is_reused() {
        let tmp = TempDir::new().unwrap();
        let config = RunConfig::default();
        fs::create_dir_all(tmp.path().join("usr/share/keyrings")).unwrap();
        fs::write(tmp.path().join("usr/share/keyrings/hashicorp.gpg"), "key").unwrap();

        let repo = AptRepository {
            signing_key_url: Some("http://127.0.0.1:9/unreachable".to_string()),
            ..repo(tmp.path())
        };
        assert_eq!(repo.run(&ctx(&config)).unwrap(), ApplyResult::Created);

        let line =
            fs::read_to_string(tmp.path().join("etc/apt/sources.list.d/hashicorp.list")).unwrap();
        assert!(line.contains("signed-by="));
        assert!(line.contains("usr/share/keyrings/hashicorp.gpg"));
    }

    #[test]
    fn test_dry_run_writes_nothing() {
        let tmp = TempDir::new().unwrap();
        let config = RunConfig {
            dry_run: true,
            ..Default::default()
        };
        let repo = repo(tmp.path());

        assert!(matches!(
            repo.run(&ctx(&config)).unwrap(),
            ApplyResult::Skipped { .. }
        ));
        assert!(matches!(
            AptRepository::update().run(&ctx(&config)).unwrap(),
            ApplyResult::Skipped { .. }
        ));
        assert!(!tmp.path().join("etc/apt/sources.list.d/hashicorp.list").exists());
    }
}
