use colored::{ColoredString, Colorize};
use declarative::{RunSummary, Status};
use std::time::Duration;

/// Print an info message
pub fn info(msg: &str) {
    println!("{} {}", "ℹ".blue(), msg);
}

/// Print a success message
pub fn success(msg: &str) {
    println!("{} {}", "✓".green(), msg);
}

/// Print a warning message
pub fn warn(msg: &str) {
    println!("{} {}", "⚠".yellow(), msg);
}

/// Print an error message
pub fn error(msg: &str) {
    eprintln!("{} {}", "✗".red(), msg);
}

/// Print a dim/muted message
pub fn dim(msg: &str) {
    println!("  {}", msg.dimmed());
}

/// Print a header/title
pub fn header(title: &str) {
    println!();
    println!("{}", title.bold());
    println!("{}", "─".repeat(title.chars().count()).dimmed());
}

/// Print a key-value pair
pub fn kv(key: &str, value: &str) {
    println!("  {}: {}", key.dimmed(), value);
}

/// Status name colored by outcome
pub fn status(status: Status) -> ColoredString {
    let text = status.to_string();
    match status {
        Status::Success => text.green(),
        Status::Failed => text.red().bold(),
        Status::DependencyFailed => text.yellow(),
        Status::Pending => text.dimmed(),
    }
}

/// Format a duration for humans (e.g. "850ms", "2.4s", "3m 12s")
pub fn format_duration(d: Duration) -> String {
    let millis = d.as_millis();
    if millis < 1000 {
        format!("{}ms", millis)
    } else if millis < 60_000 {
        format!("{:.1}s", d.as_secs_f64())
    } else {
        let secs = d.as_secs();
        format!("{}m {}s", secs / 60, secs % 60)
    }
}

const KB: u64 = 1024;
const MB: u64 = KB * 1024;
const GB: u64 = MB * 1024;

/// Format bytes as human-readable size
pub fn format_size(bytes: u64) -> String {
    if bytes >= GB {
        format!("{:.1} GB", bytes as f64 / GB as f64)
    } else if bytes >= MB {
        format!("{:.1} MB", bytes as f64 / MB as f64)
    } else if bytes >= KB {
        format!("{:.1} KB", bytes as f64 / KB as f64)
    } else {
        format!("{} B", bytes)
    }
}

/// Print the outcome counts of a run
pub fn summary(summary: &RunSummary, dry_run: bool) {
    header(if dry_run { "Dry run summary" } else { "Summary" });

    let counts = [
        ("created", summary.created),
        ("modified", summary.modified),
        ("removed", summary.removed),
        ("skipped", summary.skipped),
        ("unchanged", summary.no_change),
        ("failed", summary.failed),
        ("dependency failed", summary.dependency_failed),
        ("not run", summary.not_run),
    ];
    for (label, count) in counts {
        if count > 0 {
            kv(label, &count.to_string());
        }
    }
    kv("elapsed", &format_duration(summary.elapsed));

    if let Some(path) = &summary.dump_path {
        kv("dump", &path.display().to_string());
    }

    println!();
    if summary.is_success() {
        success(&format!("{} resource(s) applied", summary.total()));
    } else {
        error(&format!(
            "{} of {} resource(s) did not succeed",
            summary.total_failures(),
            summary.total()
        ));
    }
}
