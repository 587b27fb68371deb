//! Resource descriptors and the typed-object trait

use crate::meta::ObjectMeta;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Group and plural resource name; the identity of a kind inside HNC
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct GroupResource {
    #[serde(default)]
    pub group: String,
    pub resource: String,
}

impl GroupResource {
    pub fn new(group: impl Into<String>, resource: impl Into<String>) -> Self {
        Self {
            group: group.into(),
            resource: resource.into(),
        }
    }

    /// Parses `resource` or `resource.group`
    pub fn parse(value: &str) -> Self {
        match value.split_once('.') {
            Some((resource, group)) => Self::new(group, resource),
            None => Self::new("", value),
        }
    }
}

impl fmt::Display for GroupResource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.group.is_empty() {
            write!(f, "{}", self.resource)
        } else {
            write!(f, "{}.{}", self.resource, self.group)
        }
    }
}

/// Full description of a served resource
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ApiResource {
    #[serde(default)]
    pub group: String,
    pub version: String,
    /// Plural resource name, e.g. `rolebindings`
    pub resource: String,
    pub kind: String,
    pub namespaced: bool,
}

impl ApiResource {
    pub fn new(
        group: impl Into<String>,
        version: impl Into<String>,
        resource: impl Into<String>,
        kind: impl Into<String>,
        namespaced: bool,
    ) -> Self {
        Self {
            group: group.into(),
            version: version.into(),
            resource: resource.into(),
            kind: kind.into(),
            namespaced,
        }
    }

    pub fn group_resource(&self) -> GroupResource {
        GroupResource::new(self.group.clone(), self.resource.clone())
    }

    /// `apiVersion` value for objects of this resource
    pub fn api_version(&self) -> String {
        if self.group.is_empty() {
            self.version.clone()
        } else {
            format!("{}/{}", self.group, self.version)
        }
    }

    // ========== Well-known resources ==========

    pub fn namespaces() -> Self {
        Self::new("", "v1", "namespaces", "Namespace", false)
    }

    pub fn secrets() -> Self {
        Self::new("", "v1", "secrets", "Secret", true)
    }

    pub fn config_maps() -> Self {
        Self::new("", "v1", "configmaps", "ConfigMap", true)
    }

    pub fn resource_quotas() -> Self {
        Self::new("", "v1", "resourcequotas", "ResourceQuota", true)
    }

    pub fn limit_ranges() -> Self {
        Self::new("", "v1", "limitranges", "LimitRange", true)
    }

    pub fn service_accounts() -> Self {
        Self::new("", "v1", "serviceaccounts", "ServiceAccount", true)
    }

    pub fn roles() -> Self {
        Self::new("rbac.authorization.k8s.io", "v1", "roles", "Role", true)
    }

    pub fn role_bindings() -> Self {
        Self::new(
            "rbac.authorization.k8s.io",
            "v1",
            "rolebindings",
            "RoleBinding",
            true,
        )
    }

    pub fn network_policies() -> Self {
        Self::new(
            "networking.k8s.io",
            "v1",
            "networkpolicies",
            "NetworkPolicy",
            true,
        )
    }

    pub fn hierarchy_configurations() -> Self {
        Self::new(
            crate::keys::GROUP,
            crate::keys::VERSION,
            "hierarchyconfigurations",
            "HierarchyConfiguration",
            true,
        )
    }

    pub fn subnamespace_anchors() -> Self {
        Self::new(
            crate::keys::GROUP,
            crate::keys::VERSION,
            "subnamespaceanchors",
            "SubnamespaceAnchor",
            true,
        )
    }

    pub fn hnc_configurations() -> Self {
        Self::new(
            crate::keys::GROUP,
            crate::keys::VERSION,
            "hncconfigurations",
            "HNCConfiguration",
            false,
        )
    }

    pub fn hierarchical_resource_quotas() -> Self {
        Self::new(
            crate::keys::GROUP,
            crate::keys::VERSION,
            "hierarchicalresourcequotas",
            "HierarchicalResourceQuota",
            true,
        )
    }

    /// Kinds every cluster serves; HNC's own kinds included
    pub fn builtin() -> Vec<Self> {
        vec![
            Self::namespaces(),
            Self::secrets(),
            Self::config_maps(),
            Self::resource_quotas(),
            Self::limit_ranges(),
            Self::service_accounts(),
            Self::roles(),
            Self::role_bindings(),
            Self::network_policies(),
            Self::hierarchy_configurations(),
            Self::subnamespace_anchors(),
            Self::hnc_configurations(),
            Self::hierarchical_resource_quotas(),
        ]
    }

    /// Kinds that are always propagated regardless of the HNC configuration
    pub fn always_propagated() -> Vec<Self> {
        vec![Self::roles(), Self::role_bindings()]
    }
}

impl fmt::Display for ApiResource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.group_resource())
    }
}

/// A typed object stored under a known resource
pub trait Resource: Serialize + DeserializeOwned + Clone + Send + Sync + 'static {
    fn api_resource() -> ApiResource;

    fn meta(&self) -> &ObjectMeta;

    fn meta_mut(&mut self) -> &mut ObjectMeta;

    fn name(&self) -> &str {
        &self.meta().name
    }

    fn namespace(&self) -> Option<&str> {
        self.meta().namespace.as_deref()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_group_resource_display_and_parse() {
        let gr = GroupResource::new("rbac.authorization.k8s.io", "roles");
        assert_eq!(gr.to_string(), "roles.rbac.authorization.k8s.io");
        assert_eq!(GroupResource::parse(&gr.to_string()), gr);
        assert_eq!(GroupResource::parse("secrets"), GroupResource::new("", "secrets"));
    }

    #[test]
    fn test_api_version() {
        assert_eq!(ApiResource::secrets().api_version(), "v1");
        assert_eq!(
            ApiResource::hierarchy_configurations().api_version(),
            "hnc.x-k8s.io/v1alpha2"
        );
    }
}
