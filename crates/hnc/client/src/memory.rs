//! In-memory object store with platform write semantics
//!
//! Mirrors the parts of the API server that HNC depends on: resource versions
//! with optimistic concurrency, generations, finalizers and deletion
//! timestamps, namespace termination that garbage-collects namespace
//! contents, an admission chain, and a watch stream of every change.

use crate::admission::{run_hooks, AdmissionHook, AdmissionOutcome, DEFAULT_HOOK_TIMEOUT};
use crate::catalog::ResourceCatalog;
use crate::client::{ClusterClient, WatchEvent, WatchEventType};
use crate::error::{ClientError, Result};
use async_trait::async_trait;
use hnc_types::admission::{AdmissionRequest, DenialReason, Operation, UserInfo};
use hnc_types::{ApiResource, DynamicObject, GroupResource, ObjectKey};
use serde::Deserialize;
use std::collections::{BTreeMap, BTreeSet};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, RwLock};
use tracing::{debug, info};

/// Capacity of the watch channel
const WATCH_CHANNEL_CAPACITY: usize = 16384;

type Objects = BTreeMap<GroupResource, BTreeMap<ObjectKey, DynamicObject>>;

struct Store {
    objects: RwLock<Objects>,
    resource_version: AtomicU64,
    events_tx: broadcast::Sender<WatchEvent>,
    hooks: parking_lot::RwLock<Vec<Arc<dyn AdmissionHook>>>,
    hook_timeout: parking_lot::RwLock<Duration>,
    catalog: Arc<ResourceCatalog>,
}

impl Store {
    fn next_version(&self) -> String {
        (self.resource_version.fetch_add(1, Ordering::SeqCst) + 1).to_string()
    }
}

/// A shared store plus the identity requests are made as
#[derive(Clone)]
pub struct InMemoryCluster {
    store: Arc<Store>,
    user: UserInfo,
}

impl Default for InMemoryCluster {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryCluster {
    /// An empty cluster serving the built-in kinds
    pub fn new() -> Self {
        let (events_tx, _) = broadcast::channel(WATCH_CHANNEL_CAPACITY);
        Self {
            store: Arc::new(Store {
                objects: RwLock::new(BTreeMap::new()),
                resource_version: AtomicU64::new(0),
                events_tx,
                hooks: parking_lot::RwLock::new(Vec::new()),
                hook_timeout: parking_lot::RwLock::new(DEFAULT_HOOK_TIMEOUT),
                catalog: Arc::new(ResourceCatalog::with_builtins()),
            }),
            user: UserInfo::new("system:admin"),
        }
    }

    /// A handle on the same store acting as another user
    pub fn impersonate(&self, user: UserInfo) -> Self {
        Self {
            store: self.store.clone(),
            user,
        }
    }

    pub fn user(&self) -> &UserInfo {
        &self.user
    }

    /// The discovery catalog, shared with components outside the store
    pub fn shared_catalog(&self) -> Arc<ResourceCatalog> {
        self.store.catalog.clone()
    }

    pub fn register_hook(&self, hook: Arc<dyn AdmissionHook>) {
        debug!(hook = hook.name(), "Registered admission hook");
        self.store.hooks.write().push(hook);
    }

    pub fn set_hook_timeout(&self, timeout: Duration) {
        *self.store.hook_timeout.write() = timeout;
    }

    /// Stores objects directly, bypassing admission
    pub async fn load(&self, objects: Vec<DynamicObject>) -> Result<usize> {
        let mut count = 0;
        for object in objects {
            let api = self
                .store
                .catalog
                .by_kind(&object.api_version, &object.kind)?;
            self.write_new(&api, object).await?;
            count += 1;
        }
        Ok(count)
    }

    /// Parses a YAML or JSON manifest (multi-document, lists allowed) and loads it
    pub async fn load_manifests(&self, text: &str) -> Result<usize> {
        let mut objects = Vec::new();
        for document in serde_yaml::Deserializer::from_str(text) {
            let value = serde_json::Value::deserialize(document)
                .map_err(|e| ClientError::Invalid(e.to_string()))?;
            collect_manifest_objects(value, &mut objects)?;
        }
        self.load(objects).await
    }

    /// Deletes a kind's definition: every instance is marked for deletion
    /// (without admission, as the platform's garbage collector would) and the
    /// kind stays served until the last finalizer is gone.
    pub async fn remove_kind(&self, api: &ApiResource) -> Result<usize> {
        let gr = api.group_resource();
        self.store.catalog.resolve(&gr)?;
        self.store.catalog.mark_terminating(&gr);

        let mut objects = self.store.objects.write().await;
        let mut namespaces = BTreeSet::new();
        let mut pending = 0usize;
        if let Some(by_key) = objects.get_mut(&gr) {
            let keys: Vec<ObjectKey> = by_key.keys().cloned().collect();
            for key in keys {
                let Some(obj) = by_key.get_mut(&key) else {
                    continue;
                };
                if obj.metadata.finalizers.is_empty() {
                    if let Some(removed) = by_key.remove(&key) {
                        let _ = self.store.events_tx.send(WatchEvent::new(
                            WatchEventType::Deleted,
                            gr.clone(),
                            removed,
                        ));
                    }
                } else {
                    pending += 1;
                    if !obj.metadata.is_deleting() {
                        obj.metadata.deletion_timestamp = Some(chrono::Utc::now());
                        obj.metadata.resource_version = Some(self.store.next_version());
                        let _ = self.store.events_tx.send(WatchEvent::new(
                            WatchEventType::Modified,
                            gr.clone(),
                            obj.clone(),
                        ));
                    }
                }
                if let Some(namespace) = key.namespace {
                    namespaces.insert(namespace);
                }
            }
        }
        for namespace in namespaces {
            self.collect_namespace(&mut objects, &namespace);
        }
        if pending == 0 {
            self.store.catalog.unregister(&gr);
        }
        info!(resource = %api, pending, "Kind removal requested");
        Ok(pending)
    }

    fn request(
        &self,
        api: &ApiResource,
        operation: Operation,
        namespace: Option<&str>,
        name: &str,
        object: Option<serde_json::Value>,
        old_object: Option<serde_json::Value>,
    ) -> AdmissionRequest {
        AdmissionRequest {
            uid: uuid::Uuid::new_v4().to_string(),
            resource: api.group_resource(),
            kind: api.kind.clone(),
            namespace: namespace.map(str::to_string),
            name: name.to_string(),
            operation,
            user_info: self.user.clone(),
            object,
            old_object,
            dry_run: false,
        }
    }

    async fn admit(&self, request: AdmissionRequest) -> Result<Option<serde_json::Value>> {
        let hooks: Vec<Arc<dyn AdmissionHook>> = self.store.hooks.read().clone();
        if hooks.is_empty() {
            return Ok(request.object);
        }
        let timeout = *self.store.hook_timeout.read();
        let operation = request.operation;
        let resource = request.resource.clone();
        match run_hooks(&hooks, request, timeout).await {
            AdmissionOutcome::Allowed { object, warnings } => {
                for warning in warnings {
                    info!(user = %self.user.username, %operation, %resource, %warning, "Admission warning");
                }
                Ok(object)
            }
            AdmissionOutcome::Denied { reason, message } => {
                Err(ClientError::Denied { reason, message })
            }
        }
    }

    /// Inserts a new object, stamping server-managed metadata
    async fn write_new(&self, api: &ApiResource, mut object: DynamicObject) -> Result<DynamicObject> {
        let key = object_key(api, &object)?;
        let mut objects = self.store.objects.write().await;

        if let Some(namespace) = &key.namespace {
            let ns_key = ObjectKey::cluster(namespace.clone());
            match objects
                .get(&ApiResource::namespaces().group_resource())
                .and_then(|m| m.get(&ns_key))
            {
                None => return Err(ClientError::NotFound(format!("namespace {}", namespace))),
                Some(ns) if ns.metadata.is_deleting() => {
                    return Err(ClientError::Denied {
                        reason: DenialReason::Forbidden,
                        message: format!(
                            "unable to create new content in namespace {} because it is being terminated",
                            namespace
                        ),
                    })
                }
                Some(_) => {}
            }
        }

        if self.store.catalog.is_terminating(&api.group_resource()) {
            return Err(ClientError::Denied {
                reason: DenialReason::Forbidden,
                message: format!("{} is being removed from the platform", api),
            });
        }

        let by_key = objects.entry(api.group_resource()).or_default();
        if by_key.contains_key(&key) {
            return Err(ClientError::AlreadyExists(format!("{} {}", api, key)));
        }

        object.api_version = api.api_version();
        object.kind = api.kind.clone();
        object.metadata.namespace = key.namespace.clone();
        object.metadata.uid = Some(uuid::Uuid::new_v4().to_string());
        object.metadata.resource_version = Some(self.store.next_version());
        object.metadata.generation = 1;
        object.metadata.creation_timestamp = Some(chrono::Utc::now());
        object.metadata.deletion_timestamp = None;

        by_key.insert(key, object.clone());
        self.emit(WatchEventType::Added, api.group_resource(), object.clone());
        Ok(object)
    }

    fn emit(&self, event_type: WatchEventType, resource: GroupResource, object: DynamicObject) {
        let _ = self
            .store
            .events_tx
            .send(WatchEvent::new(event_type, resource, object));
    }

    /// Removes terminating namespace contents, then the namespace once empty
    fn collect_namespace(&self, objects: &mut Objects, namespace: &str) {
        let ns_gr = ApiResource::namespaces().group_resource();
        let ns_key = ObjectKey::cluster(namespace);
        let terminating = objects
            .get(&ns_gr)
            .and_then(|m| m.get(&ns_key))
            .is_some_and(|ns| ns.metadata.is_deleting());
        if !terminating {
            return;
        }

        let mut remaining = 0usize;
        for (gr, by_key) in objects.iter_mut() {
            let keys: Vec<ObjectKey> = by_key
                .keys()
                .filter(|k| k.namespace.as_deref() == Some(namespace))
                .cloned()
                .collect();
            for key in keys {
                let Some(obj) = by_key.get_mut(&key) else {
                    continue;
                };
                if obj.metadata.finalizers.is_empty() {
                    if let Some(removed) = by_key.remove(&key) {
                        let _ = self.store.events_tx.send(WatchEvent::new(
                            WatchEventType::Deleted,
                            gr.clone(),
                            removed,
                        ));
                    }
                } else {
                    remaining += 1;
                    if !obj.metadata.is_deleting() {
                        obj.metadata.deletion_timestamp = Some(chrono::Utc::now());
                        obj.metadata.resource_version = Some(self.store.next_version());
                        let _ = self.store.events_tx.send(WatchEvent::new(
                            WatchEventType::Modified,
                            gr.clone(),
                            obj.clone(),
                        ));
                    }
                }
            }
        }

        if remaining > 0 {
            debug!(namespace = %namespace, remaining, "Namespace waiting on finalized content");
            return;
        }
        if let Some(by_key) = objects.get_mut(&ns_gr) {
            let finalized = by_key
                .get(&ns_key)
                .is_some_and(|ns| ns.metadata.finalizers.is_empty());
            if finalized {
                if let Some(removed) = by_key.remove(&ns_key) {
                    info!(namespace = %namespace, "Namespace deleted");
                    self.emit(WatchEventType::Deleted, ns_gr, removed);
                }
            }
        }
    }
}

fn object_key(api: &ApiResource, object: &DynamicObject) -> Result<ObjectKey> {
    if object.metadata.name.is_empty() {
        return Err(ClientError::Invalid(format!("{}: name is required", api)));
    }
    match (api.namespaced, object.metadata.namespace.as_deref()) {
        (true, Some(ns)) if !ns.is_empty() => {
            Ok(ObjectKey::namespaced(ns, object.metadata.name.clone()))
        }
        (true, _) => Err(ClientError::Invalid(format!(
            "{} {}: namespace is required",
            api, object.metadata.name
        ))),
        (false, _) => Ok(ObjectKey::cluster(object.metadata.name.clone())),
    }
}

fn key_for(api: &ApiResource, namespace: Option<&str>, name: &str) -> ObjectKey {
    match (api.namespaced, namespace) {
        (true, Some(ns)) => ObjectKey::namespaced(ns, name),
        _ => ObjectKey::cluster(name),
    }
}

fn collect_manifest_objects(value: serde_json::Value, out: &mut Vec<DynamicObject>) -> Result<()> {
    match value {
        serde_json::Value::Null => Ok(()),
        serde_json::Value::Array(items) => {
            for item in items {
                collect_manifest_objects(item, out)?;
            }
            Ok(())
        }
        serde_json::Value::Object(mut map)
            if map
                .get("kind")
                .and_then(|k| k.as_str())
                .is_some_and(|k| k.ends_with("List")) =>
        {
            match map.remove("items") {
                Some(items) => collect_manifest_objects(items, out),
                None => Ok(()),
            }
        }
        other => {
            out.push(serde_json::from_value(other)?);
            Ok(())
        }
    }
}

#[async_trait]
impl ClusterClient for InMemoryCluster {
    fn catalog(&self) -> &ResourceCatalog {
        &self.store.catalog
    }

    async fn get(
        &self,
        api: &ApiResource,
        namespace: Option<&str>,
        name: &str,
    ) -> Result<DynamicObject> {
        let key = key_for(api, namespace, name);
        let objects = self.store.objects.read().await;
        objects
            .get(&api.group_resource())
            .and_then(|m| m.get(&key))
            .cloned()
            .ok_or_else(|| ClientError::NotFound(format!("{} {}", api, key)))
    }

    async fn list(&self, api: &ApiResource, namespace: Option<&str>) -> Result<Vec<DynamicObject>> {
        let objects = self.store.objects.read().await;
        Ok(objects
            .get(&api.group_resource())
            .map(|m| {
                m.iter()
                    .filter(|(k, _)| namespace.is_none() || k.namespace.as_deref() == namespace)
                    .map(|(_, v)| v.clone())
                    .collect()
            })
            .unwrap_or_default())
    }

    async fn create(&self, api: &ApiResource, object: DynamicObject) -> Result<DynamicObject> {
        let key = object_key(api, &object)?;
        let request = self.request(
            api,
            Operation::Create,
            key.namespace.as_deref(),
            &key.name,
            Some(object.to_value()?),
            None,
        );
        let admitted = match self.admit(request).await? {
            Some(value) => serde_json::from_value(value)?,
            None => object,
        };
        let created = self.write_new(api, admitted).await?;
        debug!(resource = %api, key = %key, user = %self.user.username, "Created object");
        Ok(created)
    }

    async fn update(&self, api: &ApiResource, object: DynamicObject) -> Result<DynamicObject> {
        let key = object_key(api, &object)?;
        let current = self.get(api, key.namespace.as_deref(), &key.name).await?;
        check_version(api, &key, &object, &current)?;

        let request = self.request(
            api,
            Operation::Update,
            key.namespace.as_deref(),
            &key.name,
            Some(object.to_value()?),
            Some(current.to_value()?),
        );
        let mut updated: DynamicObject = match self.admit(request).await? {
            Some(value) => serde_json::from_value(value)?,
            None => object,
        };

        let mut objects = self.store.objects.write().await;
        let gr = api.group_resource();
        let current = objects
            .get(&gr)
            .and_then(|m| m.get(&key))
            .cloned()
            .ok_or_else(|| ClientError::NotFound(format!("{} {}", api, key)))?;
        check_version(api, &key, &updated, &current)?;

        if current.metadata.is_deleting()
            && updated
                .metadata
                .finalizers
                .iter()
                .any(|f| !current.metadata.has_finalizer(f))
        {
            return Err(ClientError::Invalid(format!(
                "{} {}: no new finalizers can be added while the object is being deleted",
                api, key
            )));
        }

        updated.api_version = api.api_version();
        updated.kind = api.kind.clone();
        updated.metadata.namespace = key.namespace.clone();
        updated.metadata.uid = current.metadata.uid.clone();
        updated.metadata.creation_timestamp = current.metadata.creation_timestamp;
        updated.metadata.deletion_timestamp = current.metadata.deletion_timestamp;
        updated.metadata.generation = if updated.payload() != current.payload() {
            current.metadata.generation + 1
        } else {
            current.metadata.generation
        };
        updated.metadata.resource_version = Some(self.store.next_version());

        let by_key = objects.entry(gr.clone()).or_default();
        if updated.metadata.is_deleting() && updated.metadata.finalizers.is_empty() {
            by_key.remove(&key);
            debug!(resource = %api, key = %key, "Finalized object removed");
            if by_key.is_empty() && self.store.catalog.is_terminating(&gr) {
                self.store.catalog.unregister(&gr);
                info!(resource = %api, "Kind removed");
            }
            self.emit(WatchEventType::Deleted, gr, updated.clone());
        } else {
            by_key.insert(key.clone(), updated.clone());
            self.emit(WatchEventType::Modified, gr, updated.clone());
        }

        if let Some(namespace) = &key.namespace {
            self.collect_namespace(&mut objects, namespace);
        } else if !api.namespaced && api.resource == "namespaces" {
            self.collect_namespace(&mut objects, &key.name);
        }
        Ok(updated)
    }

    async fn delete(&self, api: &ApiResource, namespace: Option<&str>, name: &str) -> Result<()> {
        let key = key_for(api, namespace, name);
        let current = self.get(api, key.namespace.as_deref(), &key.name).await?;
        if current.metadata.is_deleting() {
            return Ok(());
        }

        let request = self.request(
            api,
            Operation::Delete,
            key.namespace.as_deref(),
            &key.name,
            None,
            Some(current.to_value()?),
        );
        self.admit(request).await?;

        let mut objects = self.store.objects.write().await;
        let gr = api.group_resource();
        let is_namespace = gr == ApiResource::namespaces().group_resource();
        let Some(by_key) = objects.get_mut(&gr) else {
            return Err(ClientError::NotFound(format!("{} {}", api, key)));
        };
        let Some(obj) = by_key.get_mut(&key) else {
            return Err(ClientError::NotFound(format!("{} {}", api, key)));
        };
        if obj.metadata.is_deleting() {
            return Ok(());
        }

        if obj.metadata.finalizers.is_empty() && !is_namespace {
            if let Some(removed) = by_key.remove(&key) {
                self.emit(WatchEventType::Deleted, gr, removed);
            }
        } else {
            obj.metadata.deletion_timestamp = Some(chrono::Utc::now());
            obj.metadata.resource_version = Some(self.store.next_version());
            let snapshot = obj.clone();
            self.emit(WatchEventType::Modified, gr, snapshot);
        }
        info!(resource = %api, key = %key, user = %self.user.username, "Deletion requested");

        if is_namespace {
            self.collect_namespace(&mut objects, &key.name);
        } else if let Some(namespace) = &key.namespace {
            self.collect_namespace(&mut objects, namespace);
        }
        Ok(())
    }

    fn watch(&self) -> broadcast::Receiver<WatchEvent> {
        self.store.events_tx.subscribe()
    }
}

fn check_version(
    api: &ApiResource,
    key: &ObjectKey,
    desired: &DynamicObject,
    current: &DynamicObject,
) -> Result<()> {
    match &desired.metadata.resource_version {
        Some(rv) if Some(rv) != current.metadata.resource_version.as_ref() => {
            Err(ClientError::Conflict(format!(
                "{} {}: the object has been modified; please apply your changes to the latest version",
                api, key
            )))
        }
        _ => Ok(()),
    }
}
