//! # Declarative
//!
//! A concurrent engine for declarative resource manifests.
//!
//! Callers register resources (a file, a directory, a package) together
//! with the resources they depend on. Running the manifest executes every
//! resource on its own thread as soon as its dependencies succeed, so
//! independent branches proceed in parallel and a failure only stops the
//! resources downstream of it.
//!
//! ## Core Concepts
//!
//! - **ResourceDescriptor**: Kind-specific configuration and logic, supplied by the caller
//! - **Resource**: A descriptor plus its content-derived ID, dependencies and run state
//! - **Manifest**: The registered resource set; registration and execution API
//! - **Status**: `Pending` until the resource reaches a terminal state
//!
//! ## Example
//!
//! ```ignore
//! use declarative::{ApplyContext, ApplyResult, Manifest, ResourceDescriptor, RunConfig};
//! use serde::Serialize;
//!
//! #[derive(Debug, Serialize)]
//! struct Touch { path: String }
//!
//! impl ResourceDescriptor for Touch {
//!     fn kind(&self) -> &'static str { "Touch" }
//!     fn operation_name(&self) -> &'static str { "Create" }
//!
//!     fn run(&self, ctx: &ApplyContext) -> anyhow::Result<ApplyResult> {
//!         if ctx.dry_run {
//!             return Ok(ApplyResult::Skipped { reason: "Dry run".into() });
//!         }
//!         std::fs::write(&self.path, "")?;
//!         Ok(ApplyResult::Created)
//!     }
//! }
//!
//! let mut manifest = Manifest::new();
//! let dir = manifest.add(Touch { path: "/tmp/a".into() }, &[])?;
//! manifest.add(Touch { path: "/tmp/b".into() }, &[&dir])?;
//!
//! let summary = manifest.run(&RunConfig::default());
//! std::process::exit(summary.exit_code().into());
//! ```
//!
//! ## Guarantees
//!
//! - A resource runs only after every dependency ended `Success`
//! - Resources requiring the global lock never overlap one another
//! - Each status changes exactly once, from `Pending` to a terminal state
//! - A failed resource marks all transitive dependents `DependencyFailed`
//!   without running them

pub mod context;
pub mod dump;
pub mod error;
pub mod manifest;
pub mod resource;
pub mod scheduler;
pub mod types;

#[cfg(test)]
mod test_support;

// Re-export main types at crate root
pub use context::{
    ApplyContext, CancelHandle, DEFAULT_DEPENDENCY_TIMEOUT, DEFAULT_POLL_INTERVAL, ResourceLog,
    RunConfig,
};
pub use dump::{ManifestDump, ResourceRecord};
pub use error::{RegistrationError, ResourceError};
pub use manifest::Manifest;
pub use resource::{
    AttributesJson, BoxedDescriptor, Resource, ResourceDescriptor, ResourceId, ResourceKind,
    Status, compute_id,
};
pub use types::{ApplyResult, DumpPolicy, ResourceParams, RunSummary};
