//! Per-namespace hierarchy configuration

use crate::condition::Condition;
use crate::keys;
use crate::meta::ObjectMeta;
use crate::resource::{ApiResource, Resource};
use serde::{Deserialize, Serialize};

/// A key/value pair of managed metadata
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct MetaKvp {
    pub key: String,
    pub value: String,
}

impl MetaKvp {
    pub fn new(key: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            value: value.into(),
        }
    }
}

/// Singleton (`hierarchy`) in every managed namespace
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct HierarchyConfiguration {
    pub metadata: ObjectMeta,

    #[serde(default)]
    pub spec: HierarchyConfigurationSpec,

    #[serde(default)]
    pub status: HierarchyConfigurationStatus,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HierarchyConfigurationSpec {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent: Option<String>,

    /// Allows deleting subnamespaces that themselves have subnamespaces
    #[serde(default)]
    pub allow_cascading_deletion: bool,

    /// Labels to set on this namespace and every descendant
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub labels: Vec<MetaKvp>,

    /// Annotations to set on this namespace and every descendant
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub annotations: Vec<MetaKvp>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct HierarchyConfigurationStatus {
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub children: Vec<String>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub conditions: Vec<Condition>,
}

impl HierarchyConfiguration {
    /// An empty singleton for `namespace`
    pub fn new(namespace: impl Into<String>) -> Self {
        Self {
            metadata: ObjectMeta::namespaced(namespace, keys::HIERARCHY_SINGLETON),
            ..Default::default()
        }
    }

    /// Declared parent, treating the empty string as no parent
    pub fn parent(&self) -> Option<&str> {
        self.spec.parent.as_deref().filter(|p| !p.is_empty())
    }
}

impl Resource for HierarchyConfiguration {
    fn api_resource() -> ApiResource {
        ApiResource::hierarchy_configurations()
    }

    fn meta(&self) -> &ObjectMeta {
        &self.metadata
    }

    fn meta_mut(&mut self) -> &mut ObjectMeta {
        &mut self.metadata
    }
}
