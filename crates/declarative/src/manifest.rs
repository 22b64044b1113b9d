//! Manifest registration API
//!
//! The manifest owns every registered resource, keyed by ID. Dependency
//! edges are implicit: each resource lists the IDs it depends on.

use std::collections::BTreeMap;

use crate::error::{RegistrationError, Result};
use crate::resource::{BoxedDescriptor, Resource, ResourceDescriptor, ResourceId};
use crate::types::ResourceParams;

/// The registered resource set and the engine that runs it
#[derive(Debug, Default)]
pub struct Manifest {
    pub(crate) resources: BTreeMap<ResourceId, Resource>,
}

impl Manifest {
    /// Create an empty manifest
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a descriptor that depends on already registered resources
    ///
    /// Returns the ID the resource was stored under. Registration fails
    /// without touching the manifest if a dependency is unknown or the
    /// computed ID collides with an existing resource.
    pub fn add<D>(&mut self, descriptor: D, deps: &[&ResourceId]) -> Result<ResourceId>
    where
        D: ResourceDescriptor + 'static,
    {
        self.add_boxed(Box::new(descriptor), deps)
    }

    /// Register an already boxed descriptor
    pub fn add_boxed(
        &mut self,
        descriptor: BoxedDescriptor,
        deps: &[&ResourceId],
    ) -> Result<ResourceId> {
        self.add_boxed_with(descriptor, deps, ResourceParams::new())
    }

    /// Register a descriptor with extra scheduling params
    ///
    /// `params` are combined with the descriptor's own before the ID is
    /// computed, so a resource registered with the lock differs from the
    /// same descriptor registered without it.
    pub fn add_boxed_with(
        &mut self,
        descriptor: BoxedDescriptor,
        deps: &[&ResourceId],
        params: ResourceParams,
    ) -> Result<ResourceId> {
        let mut depends_on = Vec::with_capacity(deps.len());
        for dep in deps {
            if dep.is_empty() || !self.resources.contains_key(*dep) {
                return Err(RegistrationError::UnknownDependency((*dep).clone()));
            }
            depends_on.push((*dep).clone());
        }

        let resource = Resource::new(descriptor, depends_on, params)?;

        if self.resources.contains_key(&resource.id) {
            return Err(RegistrationError::DuplicateResource {
                id: resource.id.clone(),
                attributes: resource.attributes_pretty(),
            });
        }

        let id = resource.id.clone();
        log::debug!("Registered {} ({})", id, resource.attributes.operation_name());
        self.resources.insert(id.clone(), resource);

        Ok(id)
    }

    /// Replace a resource's generated ID with a chosen name
    ///
    /// `id` is updated in place. Other resources that depend on the old ID
    /// are rewritten to depend on the new name.
    pub fn set_name(&mut self, id: &mut ResourceId, name: impl Into<String>) -> Result<()> {
        let new_id = ResourceId::from(name.into());

        if !self.resources.contains_key(id) {
            return Err(RegistrationError::UnknownResource(id.clone()));
        }
        if new_id == *id {
            return Ok(());
        }
        if new_id.is_empty() || self.resources.contains_key(&new_id) {
            return Err(RegistrationError::NameTaken(new_id.to_string()));
        }

        let Some(mut resource) = self.resources.remove(id) else {
            return Err(RegistrationError::UnknownResource(id.clone()));
        };
        resource.id = new_id.clone();
        self.resources.insert(new_id.clone(), resource);

        for other in self.resources.values_mut() {
            for dep in &mut other.depends_on {
                if dep == id {
                    *dep = new_id.clone();
                }
            }
        }

        *id = new_id;
        Ok(())
    }

    /// Add a dependency by name
    ///
    /// The name is not checked here so that resources registered later can
    /// be referenced. Names that never resolve fail the resource at run start.
    pub fn set_dep(&mut self, id: &ResourceId, name: impl Into<String>) -> Result<()> {
        let resource = self
            .resources
            .get_mut(id)
            .ok_or_else(|| RegistrationError::UnknownResource(id.clone()))?;

        let dep = ResourceId::from(name.into());
        if !resource.depends_on.contains(&dep) {
            resource.depends_on.push(dep);
        }
        Ok(())
    }

    /// Require the global lock for a resource
    pub fn with_lock(&mut self, id: &ResourceId) -> Result<()> {
        let resource = self
            .resources
            .get_mut(id)
            .ok_or_else(|| RegistrationError::UnknownResource(id.clone()))?;
        resource.global_lock = true;
        Ok(())
    }

    /// Look up a resource by ID
    pub fn get(&self, id: &ResourceId) -> Option<&Resource> {
        self.resources.get(id)
    }

    /// Iterate over resources in ID order
    pub fn resources(&self) -> impl Iterator<Item = &Resource> {
        self.resources.values()
    }

    /// Number of registered resources
    pub fn len(&self) -> usize {
        self.resources.len()
    }

    pub fn is_empty(&self) -> bool {
        self.resources.is_empty()
    }

    /// Dependencies that do not name a registered resource
    ///
    /// Returns `(resource, missing dependency)` pairs.
    pub fn dangling_dependencies(&self) -> Vec<(ResourceId, ResourceId)> {
        self.resources
            .values()
            .flat_map(|r| {
                r.depends_on
                    .iter()
                    .filter(|dep| !self.resources.contains_key(*dep))
                    .map(|dep| (r.id.clone(), dep.clone()))
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::Stub;

    #[test]
    fn test_add_returns_generated_id() {
        let mut m = Manifest::new();
        let id = m.add(Stub::new("a"), &[]).unwrap();

        assert!(id.as_str().starts_with("Stub_id-"));
        assert_eq!(m.len(), 1);
        assert_eq!(m.get(&id).unwrap().id(), &id);
    }

    #[test]
    fn test_add_records_dependencies() {
        let mut m = Manifest::new();
        let a = m.add(Stub::new("a"), &[]).unwrap();
        let b = m.add(Stub::new("b"), &[&a]).unwrap();

        assert_eq!(m.get(&b).unwrap().depends_on(), &[a]);
    }

    #[test]
    fn test_duplicate_rejected_without_mutation() {
        let mut m = Manifest::new();
        let first = m.add(Stub::new("same"), &[]).unwrap();

        let err = m.add(Stub::new("same"), &[]).unwrap_err();
        match err {
            RegistrationError::DuplicateResource { id, attributes } => {
                assert_eq!(id, first);
                assert!(attributes.contains("\"same\""));
            }
            other => panic!("Expected DuplicateResource, got: {:?}", other),
        }
        assert_eq!(m.len(), 1);
    }

    #[test]
    fn test_same_attributes_different_deps_are_distinct() {
        let mut m = Manifest::new();
        let a = m.add(Stub::new("a"), &[]).unwrap();
        let plain = m.add(Stub::new("x"), &[]).unwrap();
        let with_dep = m.add(Stub::new("x"), &[&a]).unwrap();
        assert_ne!(plain, with_dep);
    }

    #[test]
    fn test_unknown_dependency_rejected() {
        let mut m = Manifest::new();
        let never_registered = ResourceId::default();
        let err = m.add(Stub::new("a"), &[&never_registered]).unwrap_err();
        assert!(matches!(err, RegistrationError::UnknownDependency(_)));

        let other = ResourceId::from("not-here");
        let err = m.add(Stub::new("a"), &[&other]).unwrap_err();
        assert!(matches!(err, RegistrationError::UnknownDependency(id) if id == other));
        assert!(m.is_empty());
    }

    #[test]
    fn test_lock_at_registration_changes_id() {
        let mut m = Manifest::new();
        let plain = m.add(Stub::new("x"), &[]).unwrap();
        let locked = m
            .add_boxed_with(Box::new(Stub::new("x")), &[], ResourceParams::with_lock())
            .unwrap();

        assert_ne!(plain, locked);
        assert!(!m.get(&plain).unwrap().global_lock());
        assert!(m.get(&locked).unwrap().global_lock());
    }

    #[test]
    fn test_params_lock_applied() {
        let mut m = Manifest::new();
        let id = m.add(Stub::new("pkg").locked(), &[]).unwrap();
        assert!(m.get(&id).unwrap().global_lock());
    }

    #[test]
    fn test_set_name() {
        let mut m = Manifest::new();
        let mut id = m.add(Stub::new("a"), &[]).unwrap();
        let old = id.clone();

        m.set_name(&mut id, "test-name").unwrap();

        assert_eq!(id.as_str(), "test-name");
        assert!(m.get(&old).is_none());
        assert_eq!(m.get(&id).unwrap().id(), &id);
        assert_eq!(m.len(), 1);
    }

    #[test]
    fn test_set_name_rewrites_dependents() {
        let mut m = Manifest::new();
        let mut a = m.add(Stub::new("a"), &[]).unwrap();
        let b = m.add(Stub::new("b"), &[&a]).unwrap();

        m.set_name(&mut a, "base").unwrap();

        assert_eq!(m.get(&b).unwrap().depends_on(), &[ResourceId::from("base")]);
        assert!(m.dangling_dependencies().is_empty());
    }

    #[test]
    fn test_set_name_errors() {
        let mut m = Manifest::new();
        let mut a = m.add(Stub::new("a"), &[]).unwrap();
        let mut b = m.add(Stub::new("b"), &[]).unwrap();
        m.set_name(&mut a, "taken").unwrap();

        let err = m.set_name(&mut b, "taken").unwrap_err();
        assert!(matches!(err, RegistrationError::NameTaken(n) if n == "taken"));

        let mut unknown = ResourceId::from("ghost");
        let err = m.set_name(&mut unknown, "new").unwrap_err();
        assert!(matches!(err, RegistrationError::UnknownResource(_)));
    }

    #[test]
    fn test_set_dep_allows_forward_reference() {
        let mut m = Manifest::new();
        let a = m.add(Stub::new("a"), &[]).unwrap();

        m.set_dep(&a, "later").unwrap();
        assert_eq!(m.get(&a).unwrap().depends_on(), &[ResourceId::from("later")]);
        assert_eq!(
            m.dangling_dependencies(),
            vec![(a.clone(), ResourceId::from("later"))]
        );

        let mut later = m.add(Stub::new("b"), &[]).unwrap();
        m.set_name(&mut later, "later").unwrap();
        assert!(m.dangling_dependencies().is_empty());
    }

    #[test]
    fn test_set_dep_keeps_id() {
        let mut m = Manifest::new();
        let a = m.add(Stub::new("a"), &[]).unwrap();
        m.set_dep(&a, "x").unwrap();
        m.set_dep(&a, "x").unwrap();
        assert_eq!(m.get(&a).unwrap().depends_on().len(), 1);
        assert_eq!(m.get(&a).unwrap().id(), &a);
    }

    #[test]
    fn test_with_lock() {
        let mut m = Manifest::new();
        let a = m.add(Stub::new("a"), &[]).unwrap();
        assert!(!m.get(&a).unwrap().global_lock());

        m.with_lock(&a).unwrap();
        assert!(m.get(&a).unwrap().global_lock());

        let err = m.with_lock(&ResourceId::from("ghost")).unwrap_err();
        assert!(matches!(err, RegistrationError::UnknownResource(_)));
    }
}
