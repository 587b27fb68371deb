//! The client trait every component talks to the platform through

use crate::catalog::ResourceCatalog;
use crate::error::{ClientError, Result};
use async_trait::async_trait;
use hnc_types::{ApiResource, DynamicObject, GroupResource};
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum WatchEventType {
    Added,
    Modified,
    Deleted,
}

/// A change to one stored object
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WatchEvent {
    #[serde(rename = "type")]
    pub event_type: WatchEventType,
    #[serde(skip)]
    pub resource: GroupResource,
    pub object: DynamicObject,
}

impl WatchEvent {
    pub fn new(event_type: WatchEventType, resource: GroupResource, object: DynamicObject) -> Self {
        Self {
            event_type,
            resource,
            object,
        }
    }

    pub fn namespace(&self) -> Option<&str> {
        self.object.namespace()
    }

    pub fn name(&self) -> &str {
        self.object.name()
    }
}

/// List/watch/write access to the platform's object store
///
/// All objects travel as [`DynamicObject`]s; see [`crate::typed`] for the
/// typed wrappers.
#[async_trait]
pub trait ClusterClient: Send + Sync {
    /// Resources the platform serves
    fn catalog(&self) -> &ResourceCatalog;

    async fn get(
        &self,
        api: &ApiResource,
        namespace: Option<&str>,
        name: &str,
    ) -> Result<DynamicObject>;

    /// Objects of a resource, in one namespace or across all of them
    async fn list(&self, api: &ApiResource, namespace: Option<&str>) -> Result<Vec<DynamicObject>>;

    async fn create(&self, api: &ApiResource, object: DynamicObject) -> Result<DynamicObject>;

    /// Replaces an object; a set `resourceVersion` must match the stored one
    async fn update(&self, api: &ApiResource, object: DynamicObject) -> Result<DynamicObject>;

    /// Requests deletion; objects with finalizers linger with a deletion timestamp
    async fn delete(&self, api: &ApiResource, namespace: Option<&str>, name: &str) -> Result<()>;

    /// Subscribes to changes of every resource
    fn watch(&self) -> broadcast::Receiver<WatchEvent>;

    async fn get_opt(
        &self,
        api: &ApiResource,
        namespace: Option<&str>,
        name: &str,
    ) -> Result<Option<DynamicObject>> {
        match self.get(api, namespace, name).await {
            Ok(obj) => Ok(Some(obj)),
            Err(ClientError::NotFound(_)) => Ok(None),
            Err(e) => Err(e),
        }
    }

    /// Deletes, treating an already-missing object as success
    async fn delete_if_exists(
        &self,
        api: &ApiResource,
        namespace: Option<&str>,
        name: &str,
    ) -> Result<()> {
        match self.delete(api, namespace, name).await {
            Ok(()) | Err(ClientError::NotFound(_)) => Ok(()),
            Err(e) => Err(e),
        }
    }
}
