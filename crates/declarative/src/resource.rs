//! Resource contract and identity
//!
//! A [`ResourceDescriptor`] is the kind-specific configuration and logic
//! (a file, a package, a git checkout). The engine wraps each descriptor in
//! a [`Resource`] carrying its content-derived ID, dependency list, lock
//! flag and run state.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;

use crate::context::ApplyContext;
use crate::error::{RegistrationError, ResourceError};
use crate::types::{ApplyResult, ResourceParams};

/// Number of hex characters of the content hash kept in generated IDs
const ID_HASH_LEN: usize = 8;

/// Serialize a descriptor's attributes to JSON
///
/// Implemented for every `Serialize` type, so descriptors get it for free.
pub trait AttributesJson {
    fn attributes_json(&self) -> serde_json::Result<Value>;
}

impl<T: Serialize> AttributesJson for T {
    fn attributes_json(&self) -> serde_json::Result<Value> {
        serde_json::to_value(self)
    }
}

/// Core trait for declarative resources
///
/// # Example
///
/// ```ignore
/// use declarative::{ApplyContext, ApplyResult, ResourceDescriptor};
/// use serde::Serialize;
///
/// #[derive(Debug, Serialize)]
/// struct Touch { path: String }
///
/// impl ResourceDescriptor for Touch {
///     fn kind(&self) -> &'static str { "Touch" }
///     fn operation_name(&self) -> &'static str { "Create" }
///
///     fn preflight_checks(&mut self, _ctx: &ApplyContext) -> anyhow::Result<()> {
///         anyhow::ensure!(!self.path.is_empty(), "required parameter: path");
///         Ok(())
///     }
///
///     fn run(&self, ctx: &ApplyContext) -> anyhow::Result<ApplyResult> {
///         if std::path::Path::new(&self.path).exists() {
///             ctx.log.noop(&self.path);
///             return Ok(ApplyResult::NoChange);
///         }
///         std::fs::write(&self.path, "")?;
///         ctx.log.info(&self.path);
///         Ok(ApplyResult::Created)
///     }
/// }
/// ```
pub trait ResourceDescriptor: AttributesJson + Send + Sync + fmt::Debug {
    /// Kind name used in IDs and log lines, e.g. "File" or "Package"
    fn kind(&self) -> &'static str;

    /// Operation label for logs, e.g. "Create", "Delete", "Run"
    fn operation_name(&self) -> &'static str;

    /// Static scheduling hints
    fn params(&self) -> ResourceParams {
        ResourceParams::default()
    }

    /// Validate attributes and fill defaults
    ///
    /// Must not have side effects outside `self`.
    fn preflight_checks(&mut self, _ctx: &ApplyContext) -> anyhow::Result<()> {
        Ok(())
    }

    /// Perform the idempotent side effect
    ///
    /// A target that is already satisfied is `Ok(ApplyResult::NoChange)`.
    fn run(&self, ctx: &ApplyContext) -> anyhow::Result<ApplyResult>;
}

/// A boxed descriptor for type-erased storage
pub type BoxedDescriptor = Box<dyn ResourceDescriptor>;

/// Name of a concrete resource type
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ResourceKind(String);

impl ResourceKind {
    /// Validate a kind name declared by a descriptor
    pub fn new(name: &str) -> Result<Self, RegistrationError> {
        if name.is_empty() || !name.chars().all(|c| c.is_ascii_alphanumeric()) {
            return Err(RegistrationError::InvalidKind(name.to_string()));
        }
        Ok(Self(name.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ResourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Unique handle of a resource within a manifest
///
/// Generated as `{kind}_id-{hash}` from the identity-defining fields, or
/// replaced by a chosen name through [`Manifest::set_name`](crate::Manifest::set_name).
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ResourceId(String);

impl ResourceId {
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// An empty ID was never assigned by a manifest
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl fmt::Display for ResourceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for ResourceId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl From<String> for ResourceId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

/// Run state of a resource
///
/// Starts `Pending` and moves exactly once to a terminal state.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Status {
    #[default]
    Pending,
    Success,
    Failed,
    DependencyFailed,
}

impl Status {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, Self::Pending)
    }

    pub fn is_failed(&self) -> bool {
        matches!(self, Self::Failed | Self::DependencyFailed)
    }
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Pending => "Pending",
            Self::Success => "Success",
            Self::Failed => "Failed",
            Self::DependencyFailed => "DependencyFailed",
        };
        f.write_str(s)
    }
}

/// The fields that define a resource's identity. Run state is excluded.
#[derive(Serialize)]
struct Identity<'a> {
    kind: &'a ResourceKind,
    attributes: &'a Value,
    depends_on: &'a [ResourceId],
    global_lock: bool,
}

/// Derive a resource ID from its identity-defining fields
///
/// `serde_json` objects are key-sorted, so equal attributes always
/// serialize to the same bytes.
pub fn compute_id(
    kind: &ResourceKind,
    attributes: &Value,
    depends_on: &[ResourceId],
    global_lock: bool,
) -> serde_json::Result<ResourceId> {
    let canonical = serde_json::to_vec(&Identity {
        kind,
        attributes,
        depends_on,
        global_lock,
    })?;

    let hash = blake3::hash(&canonical).to_hex();
    Ok(ResourceId(format!("{}_id-{}", kind, &hash[..ID_HASH_LEN])))
}

/// A descriptor plus its scheduling metadata and run state
pub struct Resource {
    pub(crate) id: ResourceId,
    pub(crate) kind: ResourceKind,
    pub(crate) attributes: BoxedDescriptor,
    pub(crate) depends_on: Vec<ResourceId>,
    pub(crate) global_lock: bool,
    pub(crate) status: Status,
    pub(crate) error: Option<ResourceError>,
    pub(crate) result: Option<ApplyResult>,
}

impl Resource {
    /// Build a pending resource and compute its ID
    ///
    /// `params` add to what the descriptor declares; neither can drop the lock.
    pub(crate) fn new(
        attributes: BoxedDescriptor,
        depends_on: Vec<ResourceId>,
        params: ResourceParams,
    ) -> Result<Self, RegistrationError> {
        let kind = ResourceKind::new(attributes.kind())?;
        let global_lock = params.global_lock || attributes.params().global_lock;
        let json = AttributesJson::attributes_json(attributes.as_ref())?;
        let id = compute_id(&kind, &json, &depends_on, global_lock)?;

        Ok(Self {
            id,
            kind,
            attributes,
            depends_on,
            global_lock,
            status: Status::Pending,
            error: None,
            result: None,
        })
    }

    pub fn id(&self) -> &ResourceId {
        &self.id
    }

    pub fn kind(&self) -> &ResourceKind {
        &self.kind
    }

    pub fn attributes(&self) -> &dyn ResourceDescriptor {
        self.attributes.as_ref()
    }

    pub fn depends_on(&self) -> &[ResourceId] {
        &self.depends_on
    }

    pub fn global_lock(&self) -> bool {
        self.global_lock
    }

    pub fn status(&self) -> Status {
        self.status
    }

    pub fn error(&self) -> Option<&ResourceError> {
        self.error.as_ref()
    }

    /// Outcome of a successful run
    pub fn result(&self) -> Option<&ApplyResult> {
        self.result.as_ref()
    }

    /// True iff the resource ended Failed or DependencyFailed
    pub fn failed(&self) -> bool {
        self.status.is_failed()
    }

    /// Attributes as pretty JSON, for diagnostics
    pub fn attributes_pretty(&self) -> String {
        AttributesJson::attributes_json(self.attributes.as_ref())
            .and_then(|v| serde_json::to_string_pretty(&v))
            .unwrap_or_else(|e| format!("<unserializable attributes: {}>", e))
    }
}

impl fmt::Debug for Resource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Resource")
            .field("id", &self.id)
            .field("kind", &self.kind)
            .field("attributes", &self.attributes)
            .field("depends_on", &self.depends_on)
            .field("global_lock", &self.global_lock)
            .field("status", &self.status)
            .field("error", &self.error)
            .finish()
    }
}
