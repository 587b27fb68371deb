//! Subnamespace anchors

use crate::hierarchy::MetaKvp;
use crate::meta::ObjectMeta;
use crate::resource::{ApiResource, Resource};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Observed relationship between an anchor and the namespace it names
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum AnchorState {
    /// The subnamespace exists and points back at the anchor's namespace
    Ok,
    /// The subnamespace does not exist (yet)
    Missing,
    /// A namespace of that name exists but belongs elsewhere
    Conflict,
    /// The name is excluded from management
    Forbidden,
}

impl fmt::Display for AnchorState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            AnchorState::Ok => "Ok",
            AnchorState::Missing => "Missing",
            AnchorState::Conflict => "Conflict",
            AnchorState::Forbidden => "Forbidden",
        };
        f.write_str(s)
    }
}

/// Declares ownership of a child namespace named after the anchor
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SubnamespaceAnchor {
    pub metadata: ObjectMeta,

    #[serde(default)]
    pub spec: SubnamespaceAnchorSpec,

    #[serde(default)]
    pub status: SubnamespaceAnchorStatus,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SubnamespaceAnchorSpec {
    /// Managed labels applied to the subnamespace's hierarchy configuration
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub labels: Vec<MetaKvp>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub annotations: Vec<MetaKvp>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SubnamespaceAnchorStatus {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub state: Option<AnchorState>,
}

impl SubnamespaceAnchor {
    pub fn new(parent: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            metadata: ObjectMeta::namespaced(parent, name),
            ..Default::default()
        }
    }

    /// Namespace holding the anchor
    pub fn parent(&self) -> &str {
        self.metadata.namespace.as_deref().unwrap_or_default()
    }
}

impl Resource for SubnamespaceAnchor {
    fn api_resource() -> ApiResource {
        ApiResource::subnamespace_anchors()
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
    fn test_state_serialization() {
        let mut anchor = SubnamespaceAnchor::new("foo", "bar");
        anchor.status.state = Some(AnchorState::Conflict);
        let json = serde_json::to_value(&anchor).unwrap();
        assert_eq!(json["status"]["state"], "Conflict");
        assert_eq!(anchor.parent(), "foo");
    }
}
