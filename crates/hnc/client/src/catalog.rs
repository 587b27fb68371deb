//! Discovery: which resources the platform serves

use crate::error::{ClientError, Result};
use hnc_types::{ApiResource, GroupResource};
use parking_lot::RwLock;
use std::collections::{BTreeMap, BTreeSet};

/// Served resources, keyed by group and plural name
#[derive(Debug, Default)]
pub struct ResourceCatalog {
    resources: RwLock<BTreeMap<GroupResource, ApiResource>>,
    /// Kinds whose definition is being deleted; still served until emptied
    terminating: RwLock<BTreeSet<GroupResource>>,
}

impl ResourceCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    /// A catalog of the built-in kinds plus HNC's own
    pub fn with_builtins() -> Self {
        let catalog = Self::new();
        for api in ApiResource::builtin() {
            catalog.register(api);
        }
        catalog
    }

    pub fn register(&self, api: ApiResource) {
        let gr = api.group_resource();
        self.terminating.write().remove(&gr);
        self.resources.write().insert(gr, api);
    }

    pub fn unregister(&self, gr: &GroupResource) {
        self.terminating.write().remove(gr);
        self.resources.write().remove(gr);
    }

    pub fn mark_terminating(&self, gr: &GroupResource) {
        if self.contains(gr) {
            self.terminating.write().insert(gr.clone());
        }
    }

    /// Is the kind's definition being removed from the platform?
    pub fn is_terminating(&self, gr: &GroupResource) -> bool {
        self.terminating.read().contains(gr)
    }

    pub fn resolve(&self, gr: &GroupResource) -> Result<ApiResource> {
        self.resources
            .read()
            .get(gr)
            .cloned()
            .ok_or_else(|| ClientError::UnknownResource(gr.to_string()))
    }

    /// Looks a resource up by `apiVersion` and `kind`, as manifests name it
    pub fn by_kind(&self, api_version: &str, kind: &str) -> Result<ApiResource> {
        self.resources
            .read()
            .values()
            .find(|r| r.kind == kind && r.api_version() == api_version)
            .cloned()
            .ok_or_else(|| ClientError::UnknownResource(format!("{}/{}", api_version, kind)))
    }

    pub fn contains(&self, gr: &GroupResource) -> bool {
        self.resources.read().contains_key(gr)
    }

    pub fn list(&self) -> Vec<ApiResource> {
        self.resources.read().values().cloned().collect()
    }

    /// Namespaced resources of one group, for reader discovery
    pub fn namespaced(&self) -> Vec<ApiResource> {
        self.resources
            .read()
            .values()
            .filter(|r| r.namespaced)
            .cloned()
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_resolve() {
        let catalog = ResourceCatalog::with_builtins();
        let api = catalog
            .resolve(&GroupResource::new("rbac.authorization.k8s.io", "rolebindings"))
            .unwrap();
        assert_eq!(api.kind, "RoleBinding");
        assert!(matches!(
            catalog.resolve(&GroupResource::new("example.com", "widgets")),
            Err(ClientError::UnknownResource(_))
        ));

        catalog.register(ApiResource::new("example.com", "v1", "widgets", "Widget", true));
        assert!(catalog.contains(&GroupResource::new("example.com", "widgets")));
        assert_eq!(
            catalog.by_kind("example.com/v1", "Widget").unwrap().resource,
            "widgets"
        );
    }
}
