//! Run configuration and the context handed to descriptors
//!
//! The engine never consults global state: dry-run and quiet flags travel in
//! [`RunConfig`] and reach descriptors through [`ApplyContext`].

use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use crate::types::DumpPolicy;

/// Default wall-clock bound on the dependency-wait phase
pub const DEFAULT_DEPENDENCY_TIMEOUT: Duration = Duration::from_secs(60 * 60);

/// Default upper bound between dependency re-checks
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(250);

/// Shared flag used to cancel a run from another thread
#[derive(Debug, Clone, Default)]
pub struct CancelHandle(Arc<AtomicBool>);

impl CancelHandle {
    /// Create a handle that is not cancelled
    pub fn new() -> Self {
        Self::default()
    }

    /// Request cancellation
    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    /// Check whether cancellation was requested
    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// Options for a manifest run
#[derive(Debug, Clone)]
pub struct RunConfig {
    /// Descriptors should report what they would do without doing it
    pub dry_run: bool,
    /// Descriptors should suppress non-error output of their own
    pub quiet: bool,
    /// When to write the JSON dump
    pub dump_policy: DumpPolicy,
    /// Directory the dump is written to
    pub dump_dir: PathBuf,
    /// Scratch directory removed after a fully successful run
    pub scratch_dir: Option<PathBuf>,
    /// How long a resource may wait for its dependencies
    pub dependency_timeout: Duration,
    /// Upper bound between dependency re-checks (jittered)
    pub poll_interval: Duration,
    /// Cancellation flag
    pub cancel: CancelHandle,
}

impl Default for RunConfig {
    fn default() -> Self {
        Self {
            dry_run: false,
            quiet: false,
            dump_policy: DumpPolicy::default(),
            dump_dir: std::env::temp_dir(),
            scratch_dir: None,
            dependency_timeout: DEFAULT_DEPENDENCY_TIMEOUT,
            poll_interval: DEFAULT_POLL_INTERVAL,
            cancel: CancelHandle::new(),
        }
    }
}

/// Log lines scoped to one resource kind and operation
///
/// Lines read `==> {kind} [{operation}] {message}`.
#[derive(Debug, Clone)]
pub struct ResourceLog {
    kind: String,
    operation: String,
}

impl ResourceLog {
    pub fn new(kind: impl Into<String>, operation: impl Into<String>) -> Self {
        Self {
            kind: kind.into(),
            operation: operation.into(),
        }
    }

    /// Informational message
    pub fn info(&self, msg: impl fmt::Display) {
        log::info!("==> {} [{}] {}", self.kind, self.operation, msg);
    }

    /// Warning message
    pub fn warn(&self, msg: impl fmt::Display) {
        log::warn!("==> {} [{}] {}", self.kind, self.operation, msg);
    }

    /// Nothing to do, target already satisfied
    pub fn noop(&self, msg: impl fmt::Display) {
        log::info!("==> {} [{} (up-to-date)] {}", self.kind, self.operation, msg);
    }

    /// Failure that does not stop the process
    pub fn critical(&self, msg: impl fmt::Display) {
        log::error!("==> {} [{}] {}", self.kind, self.operation, msg);
    }

    /// Verbose detail
    pub fn debug(&self, msg: impl fmt::Display) {
        log::debug!("==> {} [{}] {}", self.kind, self.operation, msg);
    }
}

/// Context passed to descriptor preflight and run operations
pub struct ApplyContext<'a> {
    /// Whether this is a dry run (no actual changes)
    pub dry_run: bool,
    /// Whether to suppress descriptor output
    pub quiet: bool,
    /// Scratch directory for the run, if configured
    pub scratch_dir: Option<&'a Path>,
    /// Logger scoped to the resource
    pub log: ResourceLog,
}

impl<'a> ApplyContext<'a> {
    /// Create a context for one resource from the run configuration
    pub fn new(config: &'a RunConfig, log: ResourceLog) -> Self {
        Self {
            dry_run: config.dry_run,
            quiet: config.quiet,
            scratch_dir: config.scratch_dir.as_deref(),
            log,
        }
    }
}
