//! `viaduct check` - validate a manifest without applying it

use anyhow::Result;
use colored::Colorize;
use declarative::{DumpPolicy, Manifest, RunConfig};
use std::path::Path;
use std::process::ExitCode;

use crate::Context;
use crate::schema::ManifestFile;
use crate::ui;

/// Problems found in a manifest, one line each
pub fn problems(manifest: &mut Manifest) -> Vec<String> {
    let mut found: Vec<String> = manifest
        .dangling_dependencies()
        .into_iter()
        .map(|(id, dep)| format!("{}: depends on unknown resource {}", id, dep))
        .collect();

    let config = RunConfig {
        dry_run: true,
        quiet: true,
        dump_policy: DumpPolicy::Never,
        ..Default::default()
    };
    manifest.preflight(&config);

    found.extend(manifest.resources().filter_map(|r| {
        r.error().map(|e| format!("{}: {}", r.id(), e))
    }));
    found
}

pub fn run(ctx: &Context, path: &Path) -> Result<ExitCode> {
    let mut manifest = ManifestFile::load(path)?.build()?;
    let found = problems(&mut manifest);

    if ctx.shows_progress() {
        ui::header(&format!("Checking {}", path.display()));
        for resource in manifest.resources() {
            let deps = if resource.depends_on().is_empty() {
                String::new()
            } else {
                let names: Vec<&str> = resource.depends_on().iter().map(|d| d.as_str()).collect();
                format!(" <- {}", names.join(", "))
            };
            let lock = if resource.global_lock() { " [lock]" } else { "" };
            println!(
                "  {} {} [{}]{}{}",
                resource.id().as_str().bold(),
                resource.kind(),
                resource.attributes().operation_name(),
                lock.yellow(),
                deps.dimmed()
            );
            if ctx.verbose > 0 {
                for line in resource.attributes_pretty().lines() {
                    ui::dim(&format!("  {}", line));
                }
            }
        }
        println!();
    }

    if found.is_empty() {
        if ctx.shows_progress() {
            ui::success(&format!("{} resource(s) OK", manifest.len()));
        }
        return Ok(ExitCode::SUCCESS);
    }

    if !ctx.silent {
        for problem in &found {
            ui::error(problem);
        }
    }
    Ok(ExitCode::from(1))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_clean_manifest_has_no_problems() {
        let toml = r#"
[[resource]]
kind = "directory"
name = "d"
path = "/tmp/viaduct-check-d"

[[resource]]
kind = "execute"
depends_on = ["d"]
command = "true"
"#;
        let mut manifest = ManifestFile::parse(toml).unwrap().build().unwrap();
        assert!(problems(&mut manifest).is_empty());
    }

    #[test]
    fn test_reports_dangling_and_preflight() {
        let toml = r#"
[[resource]]
kind = "execute"
name = "first"
depends_on = ["ghost"]
command = "true"

[[resource]]
kind = "link"
name = "no-source"
path = "/tmp/viaduct-check-link"
"#;
        let mut manifest = ManifestFile::parse(toml).unwrap().build().unwrap();
        let found = problems(&mut manifest);

        assert_eq!(found.len(), 2);
        assert!(found[0].contains("first: depends on unknown resource ghost"));
        assert!(found[1].starts_with("no-source:"));
        assert!(found[1].contains("Source"));
    }
}
