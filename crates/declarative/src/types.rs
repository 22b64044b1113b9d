//! Core types for declarative resource management

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

use crate::resource::Status;

/// Static scheduling hints a descriptor declares about itself
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResourceParams {
    /// Never run concurrently with another globally locked resource
    pub global_lock: bool,
}

impl ResourceParams {
    /// Params with no scheduling constraints
    pub fn new() -> Self {
        Self::default()
    }

    /// Params requiring the manifest-wide lock
    pub fn with_lock() -> Self {
        Self { global_lock: true }
    }
}

/// Outcome of a successful run
///
/// Every variant maps to [`Status::Success`]. An idempotent descriptor that
/// finds its target already satisfied returns `NoChange`, never an error.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ApplyResult {
    /// No changes needed
    NoChange,
    /// Resource was created
    Created,
    /// Resource was modified
    Modified,
    /// Resource was removed
    Removed,
    /// Apply was skipped (dry run)
    Skipped { reason: String },
}

impl ApplyResult {
    /// Check if the result represents a change
    pub fn is_change(&self) -> bool {
        matches!(self, Self::Created | Self::Modified | Self::Removed)
    }
}

/// When to write the postmortem JSON dump
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum DumpPolicy {
    /// Never write a dump
    Never,
    /// Write a dump when any resource ends non-Success
    #[default]
    OnFailure,
    /// Always write a dump
    Always,
}

/// Summary of a manifest run
#[derive(Debug, Clone, Default)]
pub struct RunSummary {
    pub created: usize,
    pub modified: usize,
    pub removed: usize,
    pub skipped: usize,
    pub no_change: usize,
    pub failed: usize,
    pub dependency_failed: usize,
    /// Resources left Pending (run aborted by preflight)
    pub not_run: usize,
    /// Wall-clock time of the run
    pub elapsed: Duration,
    /// Where the dump was written, if one was
    pub dump_path: Option<PathBuf>,
}

impl RunSummary {
    /// Total number of actual changes made
    pub fn total_changes(&self) -> usize {
        self.created + self.modified + self.removed
    }

    /// Total number of resources that did not end Success
    pub fn total_failures(&self) -> usize {
        self.failed + self.dependency_failed + self.not_run
    }

    /// Check if every resource ended Success
    pub fn is_success(&self) -> bool {
        self.total_failures() == 0
    }

    /// Total number of resources processed
    pub fn total(&self) -> usize {
        self.total_changes() + self.skipped + self.no_change + self.total_failures()
    }

    /// Process exit status for this run
    pub fn exit_code(&self) -> u8 {
        u8::from(!self.is_success())
    }

    /// Add a resource outcome to the summary
    pub fn add_outcome(&mut self, status: Status, result: Option<&ApplyResult>) {
        match (status, result) {
            (Status::Pending, _) => self.not_run += 1,
            (Status::Failed, _) => self.failed += 1,
            (Status::DependencyFailed, _) => self.dependency_failed += 1,
            (Status::Success, Some(ApplyResult::Created)) => self.created += 1,
            (Status::Success, Some(ApplyResult::Modified)) => self.modified += 1,
            (Status::Success, Some(ApplyResult::Removed)) => self.removed += 1,
            (Status::Success, Some(ApplyResult::Skipped { .. })) => self.skipped += 1,
            (Status::Success, Some(ApplyResult::NoChange) | None) => self.no_change += 1,
        }
    }
}
