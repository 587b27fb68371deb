//! Schema-less objects for kinds HNC does not know statically

use crate::meta::ObjectMeta;
use crate::resource::{ApiResource, Resource};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Any object: metadata is parsed, everything else is kept as raw JSON
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DynamicObject {
    #[serde(default)]
    pub api_version: String,

    #[serde(default)]
    pub kind: String,

    #[serde(default)]
    pub metadata: ObjectMeta,

    /// Top-level fields other than `apiVersion`, `kind` and `metadata`
    #[serde(flatten)]
    pub data: Map<String, Value>,
}

impl DynamicObject {
    pub fn new(api: &ApiResource, metadata: ObjectMeta) -> Self {
        Self {
            api_version: api.api_version(),
            kind: api.kind.clone(),
            metadata,
            data: Map::new(),
        }
    }

    pub fn with_data(mut self, data: Value) -> Self {
        if let Value::Object(map) = data {
            self.data = map;
        }
        self
    }

    pub fn name(&self) -> &str {
        &self.metadata.name
    }

    pub fn namespace(&self) -> Option<&str> {
        self.metadata.namespace.as_deref()
    }

    /// Converts a typed object, stamping its `apiVersion` and `kind`
    pub fn from_typed<K: Resource>(obj: &K) -> serde_json::Result<Self> {
        let api = K::api_resource();
        let mut dynamic: DynamicObject = serde_json::from_value(serde_json::to_value(obj)?)?;
        dynamic.api_version = api.api_version();
        dynamic.kind = api.kind;
        Ok(dynamic)
    }

    pub fn into_typed<K: Resource>(self) -> serde_json::Result<K> {
        serde_json::from_value(serde_json::to_value(self)?)
    }

    pub fn to_value(&self) -> serde_json::Result<Value> {
        serde_json::to_value(self)
    }

    /// Content that is propagated: everything but metadata and `status`
    pub fn payload(&self) -> Map<String, Value> {
        self.data
            .iter()
            .filter(|(k, _)| k.as_str() != "status")
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect()
    }

    /// Equality on user-visible content; server-managed fields are ignored
    pub fn same_content(&self, other: &DynamicObject) -> bool {
        self.metadata.labels == other.metadata.labels
            && self.metadata.annotations == other.metadata.annotations
            && self.payload() == other.payload()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hierarchy::HierarchyConfiguration;
    use serde_json::json;

    #[test]
    fn test_typed_round_trip() {
        let mut hc = HierarchyConfiguration::new("a");
        hc.spec.parent = Some("b".into());

        let dynamic = DynamicObject::from_typed(&hc).unwrap();
        assert_eq!(dynamic.kind, "HierarchyConfiguration");
        assert_eq!(dynamic.api_version, "hnc.x-k8s.io/v1alpha2");
        assert_eq!(dynamic.data["spec"]["parent"], "b");

        let back: HierarchyConfiguration = dynamic.into_typed().unwrap();
        assert_eq!(back, hc);
    }

    #[test]
    fn test_same_content_ignores_server_fields() {
        let api = ApiResource::secrets();
        let a = DynamicObject::new(&api, ObjectMeta::namespaced("a", "s"))
            .with_data(json!({ "data": { "k": "dg==" } }));

        let mut b = a.clone();
        b.metadata.namespace = Some("b".into());
        b.metadata.resource_version = Some("42".into());
        b.metadata.uid = Some("uid".into());
        b.data.insert("status".into(), json!({ "phase": "x" }));
        assert!(a.same_content(&b));

        b.data.insert("data".into(), json!({ "k": "eA==" }));
        assert!(!a.same_content(&b));
    }
}
