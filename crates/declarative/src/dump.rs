//! Postmortem JSON dump of a manifest
//!
//! The dump is a JSON object keyed by resource ID. Each record carries the
//! resource's attributes, kind, dependencies, final status and error string,
//! so a failed run can be inspected after the process exits.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use crate::manifest::Manifest;
use crate::resource::{AttributesJson, Resource, ResourceId, ResourceKind, Status};

/// File name prefix of written dumps
pub const DUMP_PREFIX: &str = "viaduct-";

/// One resource as written to the dump
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct ResourceRecord {
    pub attributes: Value,
    pub resource_kind: ResourceKind,
    pub depends_on: Vec<ResourceId>,
    pub status: Status,
    /// Error string, `None` unless the resource failed
    pub error: Option<String>,
    #[serde(default)]
    pub global_lock: bool,
}

impl ResourceRecord {
    fn from_resource(resource: &Resource) -> Self {
        let attributes = AttributesJson::attributes_json(resource.attributes())
            .unwrap_or_else(|e| Value::String(format!("<unserializable attributes: {}>", e)));

        Self {
            attributes,
            resource_kind: resource.kind().clone(),
            depends_on: resource.depends_on().to_vec(),
            status: resource.status(),
            error: resource.error().map(ToString::to_string),
            global_lock: resource.global_lock(),
        }
    }
}

/// A loaded dump, keyed and ordered by resource ID
pub type ManifestDump = BTreeMap<ResourceId, ResourceRecord>;

impl Manifest {
    /// Snapshot every resource as a dump record
    pub fn records(&self) -> ManifestDump {
        self.resources
            .iter()
            .map(|(id, r)| (id.clone(), ResourceRecord::from_resource(r)))
            .collect()
    }

    /// The dump as pretty JSON
    pub fn to_json(&self) -> Result<String> {
        serde_json::to_string_pretty(&self.records()).context("Failed to serialize manifest dump")
    }

    /// Write the dump to `dir` and return its path
    ///
    /// Files are named `viaduct-{unix millis}.json`.
    pub fn write_dump(&self, dir: &Path) -> Result<PathBuf> {
        fs::create_dir_all(dir)
            .with_context(|| format!("Failed to create dump directory: {}", dir.display()))?;

        let path = dir.join(format!(
            "{}{}.json",
            DUMP_PREFIX,
            chrono::Utc::now().timestamp_millis()
        ));
        let json = self.to_json()?;
        fs::write(&path, json)
            .with_context(|| format!("Failed to write manifest dump: {}", path.display()))?;

        Ok(path)
    }
}

/// Read a dump written by [`Manifest::write_dump`]
pub fn load(path: &Path) -> Result<ManifestDump> {
    let content = fs::read_to_string(path)
        .with_context(|| format!("Failed to read manifest dump: {}", path.display()))?;
    parse(&content).with_context(|| format!("Invalid manifest dump: {}", path.display()))
}

/// Parse dump JSON
pub fn parse(json: &str) -> Result<ManifestDump> {
    Ok(serde_json::from_str(json)?)
}
