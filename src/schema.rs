//! TOML manifest files
//!
//! A manifest file is a list of `[[resource]]` tables. Each table names its
//! `kind`, the kind's own fields, and optionally a `name`, the names it
//! `depends_on`, and whether it needs the global `lock`:
//!
//! ```toml
//! [[resource]]
//! kind = "directory"
//! name = "config-dir"
//! path = "~/.config/app"
//!
//! [[resource]]
//! kind = "file"
//! depends_on = ["config-dir"]
//! path = "~/.config/app/settings.toml"
//! content = "theme = \"dark\"\n"
//! ```

use anyhow::{Context, Result};
use declarative::{BoxedDescriptor, Manifest, ResourceId, ResourceParams};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fs;
use std::path::Path;

use crate::resource::{AptRepository, Deb, Directory, Download, Execute, File, Git, Link, Package};

/// A parsed manifest file
#[derive(Debug, Default, Serialize, Deserialize)]
pub struct ManifestFile {
    #[serde(default, rename = "resource")]
    pub resources: Vec<ResourceEntry>,
}

/// One `[[resource]]` table
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResourceEntry {
    /// Stable name replacing the generated ID
    #[serde(default)]
    pub name: Option<String>,

    /// Names (or generated IDs) this resource waits for
    #[serde(default)]
    pub depends_on: Vec<String>,

    /// Never run concurrently with other locked resources
    #[serde(default)]
    pub lock: bool,

    #[serde(flatten)]
    pub body: ResourceBody,
}

/// Kind-specific fields, selected by `kind`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum ResourceBody {
    File(File),
    Directory(Directory),
    Link(Link),
    Execute(Execute),
    Git(Git),
    Package(Package),
    Apt(AptRepository),
    Download(Download),
    Deb(Deb),
}

impl ResourceBody {
    pub fn into_descriptor(self) -> BoxedDescriptor {
        match self {
            Self::File(r) => Box::new(r),
            Self::Directory(r) => Box::new(r),
            Self::Link(r) => Box::new(r),
            Self::Execute(r) => Box::new(r),
            Self::Git(r) => Box::new(r),
            Self::Package(r) => Box::new(r),
            Self::Apt(r) => Box::new(r),
            Self::Download(r) => Box::new(r),
            Self::Deb(r) => Box::new(r),
        }
    }
}

impl ManifestFile {
    /// Load and parse a manifest file
    pub fn load(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path)
            .with_context(|| format!("Could not read manifest {}", path.display()))?;
        Self::parse(&content)
            .with_context(|| format!("Invalid TOML format in manifest {}", path.display()))
    }

    pub fn parse(content: &str) -> Result<Self> {
        Ok(toml::from_str(content)?)
    }

    /// Register every entry with a new [`Manifest`]
    ///
    /// An entry is registered once the entries it depends on are, so its ID
    /// covers its resolved dependencies and lock flag. `depends_on` may name
    /// entries declared later in the file. Names that cannot be resolved at
    /// registration (cycles, unknown names) are attached afterwards and
    /// checked when the manifest runs.
    pub fn build(self) -> Result<Manifest> {
        let declared: HashSet<String> = self
            .resources
            .iter()
            .filter_map(|entry| entry.name.clone())
            .collect();

        let mut manifest = Manifest::new();
        let mut pending: Vec<(usize, ResourceEntry)> =
            self.resources.into_iter().enumerate().collect();
        let mut unresolved: Vec<(ResourceId, Vec<String>)> = Vec::new();

        while !pending.is_empty() {
            let ready = pending.iter().position(|(_, entry)| {
                entry.depends_on.iter().all(|dep| {
                    manifest.get(&ResourceId::from(dep.as_str())).is_some()
                        || !declared.contains(dep)
                })
            });
            // Nothing is ready only inside a cycle; break it at the first entry
            let (index, entry) = pending.remove(ready.unwrap_or(0));
            let label = entry_label(index, &entry);

            let mut deps: Vec<ResourceId> = Vec::new();
            let mut later: Vec<String> = Vec::new();
            for dep in &entry.depends_on {
                let id = ResourceId::from(dep.as_str());
                if manifest.get(&id).is_none() {
                    later.push(dep.clone());
                } else if !deps.contains(&id) {
                    deps.push(id);
                }
            }

            let params = if entry.lock {
                ResourceParams::with_lock()
            } else {
                ResourceParams::new()
            };
            let dep_refs: Vec<&ResourceId> = deps.iter().collect();
            let mut id = manifest
                .add_boxed_with(entry.body.into_descriptor(), &dep_refs, params)
                .with_context(|| format!("Failed to register {}", label))?;

            if let Some(name) = &entry.name {
                manifest
                    .set_name(&mut id, name.as_str())
                    .with_context(|| format!("Failed to name {}", label))?;
            }
            if !later.is_empty() {
                unresolved.push((id, later));
            }
        }

        for (id, deps) in unresolved {
            for dep in deps {
                manifest.set_dep(&id, dep)?;
            }
        }

        for (id, dep) in manifest.dangling_dependencies() {
            log::warn!("{} depends on unknown resource {}", id, dep);
        }

        Ok(manifest)
    }
}

fn entry_label(index: usize, entry: &ResourceEntry) -> String {
    match &entry.name {
        Some(name) => format!("resource #{} ({})", index + 1, name),
        None => format!("resource #{}", index + 1),
    }
}
