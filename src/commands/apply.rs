//! `viaduct apply` - run a manifest file

use anyhow::Result;
use declarative::{ApplyResult, DumpPolicy, Manifest, ResourceId, RunConfig};
use std::process::ExitCode;
use std::time::Duration;

use crate::Context;
use crate::cli::{ApplyArgs, DumpWhen};
use crate::paths;
use crate::schema::ManifestFile;
use crate::ui;

impl From<DumpWhen> for DumpPolicy {
    fn from(when: DumpWhen) -> Self {
        match when {
            DumpWhen::Never => Self::Never,
            DumpWhen::OnFailure => Self::OnFailure,
            DumpWhen::Always => Self::Always,
        }
    }
}

/// Build the engine configuration from CLI arguments
pub fn run_config(ctx: &Context, args: &ApplyArgs) -> RunConfig {
    RunConfig {
        dry_run: args.dry_run,
        quiet: ctx.quiet || ctx.silent,
        dump_policy: args.dump.into(),
        dump_dir: args
            .dump_dir
            .as_ref()
            .map(|dir| paths::expand(&dir.to_string_lossy()))
            .unwrap_or_else(paths::dump_dir),
        scratch_dir: Some(paths::scratch_dir()),
        dependency_timeout: Duration::from_secs(args.dependency_timeout),
        ..Default::default()
    }
}

/// Resources whose run created, modified or removed something
pub fn changed_resources(manifest: &Manifest) -> Vec<&ResourceId> {
    manifest
        .resources()
        .filter(|r| r.result().is_some_and(ApplyResult::is_change))
        .map(|r| r.id())
        .collect()
}

pub fn run(ctx: &Context, args: ApplyArgs) -> Result<ExitCode> {
    let manifest_file = ManifestFile::load(&args.manifest)?;
    let mut manifest = manifest_file.build()?;
    let config = run_config(ctx, &args);

    if ctx.shows_progress() {
        ui::header(&format!("Applying {}", args.manifest.display()));
        ui::dim(&format!("{} resource(s)", manifest.len()));
        if args.dry_run {
            ui::warn("Dry run - no changes will be made");
        }
    }

    let summary = manifest.run(&config);

    if ctx.shows_progress() {
        if ctx.verbose > 0 {
            for id in changed_resources(&manifest) {
                ui::kv("changed", id.as_str());
            }
        }
        ui::summary(&summary, args.dry_run);
    } else if !ctx.silent && !summary.is_success() {
        ui::error(&format!(
            "{} of {} resource(s) did not succeed",
            summary.total_failures(),
            summary.total()
        ));
    }

    Ok(ExitCode::from(summary.exit_code()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use std::path::PathBuf;
    use tempfile::TempDir;

    fn args(manifest: PathBuf, dump_dir: &TempDir) -> ApplyArgs {
        ApplyArgs {
            manifest,
            dry_run: false,
            dump: DumpWhen::OnFailure,
            dump_dir: Some(dump_dir.path().to_path_buf()),
            dependency_timeout: 30,
        }
    }

    fn quiet() -> Context {
        Context {
            verbose: 0,
            quiet: true,
            silent: false,
        }
    }

    #[test]
    fn test_run_config_from_args() {
        let tmp = TempDir::new().unwrap();
        let mut a = args(PathBuf::from("m.toml"), &tmp);
        a.dry_run = true;
        a.dump = DumpWhen::Never;

        let config = run_config(&quiet(), &a);
        assert!(config.dry_run);
        assert!(config.quiet);
        assert_eq!(config.dump_policy, DumpPolicy::Never);
        assert_eq!(config.dump_dir, tmp.path());
        assert_eq!(config.dependency_timeout, Duration::from_secs(30));
        assert!(config.scratch_dir.is_some());
    }

    #[test]
    fn test_changed_resources() {
        let tmp = TempDir::new().unwrap();
        let root = tmp.path().display();
        let kept = tmp.path().join("kept");
        fs::write(&kept, "same").unwrap();
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            fs::set_permissions(&kept, fs::Permissions::from_mode(0o644)).unwrap();
        }
        let file = ManifestFile::parse(&format!(
            r#"
[[resource]]
kind = "file"
name = "fresh"
path = "{root}/fresh"
content = "new"

[[resource]]
kind = "file"
name = "kept"
path = "{root}/kept"
content = "same"
"#
        ))
        .unwrap();
        let mut manifest = file.build().unwrap();
        let dumps = TempDir::new().unwrap();
        let config = run_config(&quiet(), &args(PathBuf::from("m.toml"), &dumps));

        assert!(changed_resources(&manifest).is_empty());
        manifest.run(&config);
        assert_eq!(changed_resources(&manifest), vec![&ResourceId::from("fresh")]);
    }

    #[test]
    fn test_apply_manifest_end_to_end() {
        let tmp = TempDir::new().unwrap();
        let dumps = TempDir::new().unwrap();
        let root = tmp.path().display();
        let manifest = tmp.path().join("site.toml");
        fs::write(
            &manifest,
            format!(
                r#"
[[resource]]
kind = "directory"
name = "conf"
path = "{root}/conf"

[[resource]]
kind = "file"
name = "settings"
depends_on = ["conf"]
path = "{root}/conf/settings.ini"
content = "[core]\n"

[[resource]]
kind = "link"
depends_on = ["settings"]
path = "{root}/settings.ini"
source = "{root}/conf/settings.ini"
"#
            ),
        )
        .unwrap();

        let code = run(&quiet(), args(manifest, &dumps)).unwrap();
        assert_eq!(code, ExitCode::SUCCESS);
        assert_eq!(
            fs::read_to_string(tmp.path().join("settings.ini")).unwrap(),
            "[core]\n"
        );
        assert_eq!(fs::read_dir(dumps.path()).unwrap().count(), 0);
    }

    #[test]
    fn test_apply_failure_writes_dump_and_fails() {
        let tmp = TempDir::new().unwrap();
        let dumps = TempDir::new().unwrap();
        let manifest = tmp.path().join("broken.toml");
        fs::write(
            &manifest,
            format!(
                r#"
[[resource]]
kind = "file"
name = "orphan"
path = "{}/missing/dir/file"
content = "x"

[[resource]]
kind = "execute"
depends_on = ["orphan"]
command = "true"
"#,
                tmp.path().display()
            ),
        )
        .unwrap();

        let code = run(&quiet(), args(manifest, &dumps)).unwrap();
        assert_eq!(code, ExitCode::from(1));
        assert_eq!(fs::read_dir(dumps.path()).unwrap().count(), 1);
    }

    #[test]
    fn test_missing_manifest_is_error() {
        let dumps = TempDir::new().unwrap();
        let result = run(&quiet(), args(PathBuf::from("/nonexistent/m.toml"), &dumps));
        assert!(result.is_err());
    }
}
