//! The namespace object

use crate::keys;
use crate::meta::ObjectMeta;
use crate::resource::{ApiResource, Resource};
use serde::{Deserialize, Serialize};

/// A platform namespace; HNC only ever reads and writes its metadata
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Namespace {
    pub metadata: ObjectMeta,
}

impl Namespace {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            metadata: ObjectMeta::named(name),
        }
    }

    /// Parent recorded by an anchor, if this is a subnamespace
    pub fn subnamespace_of(&self) -> Option<&str> {
        self.metadata
            .annotation(keys::ANNOTATION_SUBNAMESPACE_OF)
            .filter(|v| !v.is_empty())
    }

    /// External hierarchy owner, if any; HNC itself does not count
    pub fn external_manager(&self) -> Option<&str> {
        self.metadata
            .annotation(keys::ANNOTATION_MANAGED_BY)
            .filter(|v| !v.is_empty() && *v != keys::MANAGED_BY_HNC)
    }
}

impl Resource for Namespace {
    fn api_resource() -> ApiResource {
        ApiResource::namespaces()
    }

    fn meta(&self) -> &ObjectMeta {
        &self.metadata
    }

    fn meta_mut(&mut self) -> &mut ObjectMeta {
        &mut self.metadata
    }
}
