//! Cluster-wide HNC configuration

use crate::condition::Condition;
use crate::keys;
use crate::meta::ObjectMeta;
use crate::resource::{ApiResource, GroupResource, Resource};
use serde::{Deserialize, Serialize};

/// How HNC treats a configured kind
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum SyncMode {
    /// Copy source objects into descendants
    #[default]
    Propagate,
    /// Leave objects alone; existing copies are removed
    Ignore,
}

/// A kind named in the configuration
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ResourceSpec {
    #[serde(default)]
    pub group: String,
    pub resource: String,
    #[serde(default)]
    pub mode: SyncMode,
}

impl ResourceSpec {
    pub fn new(group: impl Into<String>, resource: impl Into<String>, mode: SyncMode) -> Self {
        Self {
            group: group.into(),
            resource: resource.into(),
            mode,
        }
    }

    pub fn group_resource(&self) -> GroupResource {
        GroupResource::new(self.group.clone(), self.resource.clone())
    }
}

/// Sync status of one kind
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResourceStatus {
    #[serde(default)]
    pub group: String,
    pub version: String,
    pub resource: String,
    pub mode: SyncMode,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub num_propagated_objects: Option<usize>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub num_source_objects: Option<usize>,
}

/// Singleton (`config`) controlling which kinds are propagated
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct HncConfiguration {
    pub metadata: ObjectMeta,

    #[serde(default)]
    pub spec: HncConfigurationSpec,

    #[serde(default)]
    pub status: HncConfigurationStatus,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct HncConfigurationSpec {
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub resources: Vec<ResourceSpec>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct HncConfigurationStatus {
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub resources: Vec<ResourceStatus>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub conditions: Vec<Condition>,
}

impl HncConfiguration {
    pub fn new() -> Self {
        Self {
            metadata: ObjectMeta::named(keys::CONFIG_SINGLETON),
            ..Default::default()
        }
    }

    /// Mode configured for a kind, if it is listed
    pub fn mode_of(&self, gr: &GroupResource) -> Option<SyncMode> {
        self.spec
            .resources
            .iter()
            .find(|r| r.group == gr.group && r.resource == gr.resource)
            .map(|r| r.mode)
    }
}

impl Resource for HncConfiguration {
    fn api_resource() -> ApiResource {
        ApiResource::hnc_configurations()
    }

    fn meta(&self) -> &ObjectMeta {
        &self.metadata
    }

    fn meta_mut(&mut self) -> &mut ObjectMeta {
        &mut self.metadata
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mode_defaults_to_propagate() {
        let spec: ResourceSpec =
            serde_json::from_value(serde_json::json!({ "resource": "secrets" })).unwrap();
        assert_eq!(spec.mode, SyncMode::Propagate);
        assert_eq!(spec.group_resource(), GroupResource::new("", "secrets"));
    }

    #[test]
    fn test_mode_of() {
        let mut config = HncConfiguration::new();
        config
            .spec
            .resources
            .push(ResourceSpec::new("", "secrets", SyncMode::Ignore));
        assert_eq!(
            config.mode_of(&GroupResource::new("", "secrets")),
            Some(SyncMode::Ignore)
        );
        assert_eq!(config.mode_of(&GroupResource::new("", "configmaps")), None);
    }
}
