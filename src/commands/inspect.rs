//! `viaduct inspect` - read back a manifest dump

use anyhow::Result;
use colored::Colorize;
use declarative::dump;
use declarative::{ManifestDump, Status};
use std::collections::BTreeMap;

use crate::Context;
use crate::cli::InspectArgs;
use crate::ui;

/// Count records per status
pub fn status_counts(records: &ManifestDump) -> BTreeMap<String, usize> {
    let mut counts = BTreeMap::new();
    for record in records.values() {
        *counts.entry(record.status.to_string()).or_insert(0) += 1;
    }
    counts
}

pub fn run(ctx: &Context, args: InspectArgs) -> Result<()> {
    let records = dump::load(&args.dump)?;
    if ctx.silent {
        return Ok(());
    }

    ui::header(&format!("Manifest dump {}", args.dump.display()));

    for (id, record) in &records {
        if args.failed && record.status == Status::Success {
            continue;
        }

        println!(
            "{} {} {}",
            ui::status(record.status),
            id.as_str().bold(),
            format!("({})", record.resource_kind).dimmed()
        );
        if !record.depends_on.is_empty() {
            let deps: Vec<&str> = record.depends_on.iter().map(|d| d.as_str()).collect();
            ui::kv("depends on", &deps.join(", "));
        }
        if record.global_lock {
            ui::kv("lock", "global");
        }
        if let Some(error) = &record.error {
            ui::kv("error", &error.red().to_string());
        }
        if args.attributes {
            let pretty = serde_json::to_string_pretty(&record.attributes)?;
            for line in pretty.lines() {
                ui::dim(line);
            }
        }
    }

    println!();
    let counts = status_counts(&records);
    let line: Vec<String> = counts
        .iter()
        .map(|(status, count)| format!("{} {}", count, status))
        .collect();
    ui::info(&format!("{} resource(s): {}", records.len(), line.join(", ")));
    Ok(())
}
