//! Registry of running per-kind object propagators

use crate::controller::{Controller, ControllerConfig};
use crate::error::Result;
use crate::object::{is_copy, ObjectReconciler};
use crate::queue::{Backoff, WorkQueue};
use dashmap::DashMap;
use hnc_client::ClusterClient;
use hnc_forest::Forest;
use hnc_types::{keys, ApiResource, GroupResource, HncOptions, ObjectKey};
use std::collections::BTreeSet;
use std::sync::Arc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

struct Running {
    api: ApiResource,
    queue: WorkQueue<ObjectKey>,
    token: CancellationToken,
    handle: JoinHandle<()>,
}

pub struct Propagators {
    client: Arc<dyn ClusterClient>,
    forest: Arc<Forest>,
    options: Arc<HncOptions>,
    controller: ControllerConfig,
    backoff: Backoff,
    token: CancellationToken,
    running: DashMap<GroupResource, Running>,
    draining: DashMap<GroupResource, ApiResource>,
}

impl Propagators {
    pub fn new(
        client: Arc<dyn ClusterClient>,
        forest: Arc<Forest>,
        options: Arc<HncOptions>,
        controller: ControllerConfig,
        backoff: Backoff,
    ) -> Self {
        Self {
            client,
            forest,
            options,
            controller,
            backoff,
            token: CancellationToken::new(),
            running: DashMap::new(),
            draining: DashMap::new(),
        }
    }

    pub fn is_running(&self, resource: &GroupResource) -> bool {
        self.running.contains_key(resource)
    }

    /// Kinds currently propagated
    pub fn kinds(&self) -> Vec<ApiResource> {
        let mut kinds: Vec<ApiResource> = self.running.iter().map(|r| r.api.clone()).collect();
        kinds.sort_by_key(|api| api.group_resource());
        kinds
    }

    fn queue(&self, resource: &GroupResource) -> Option<WorkQueue<ObjectKey>> {
        self.running.get(resource).map(|r| r.queue.clone())
    }

    /// Starts propagating a kind and queues every existing object of it
    pub async fn start(&self, api: ApiResource) -> Result<bool> {
        let resource = api.group_resource();
        if self.is_running(&resource) || self.token.is_cancelled() {
            return Ok(false);
        }
        let objects = self.client.list(&api, None).await?;
        // Restarted before its old copies were cleaned up; they are live again
        self.draining.remove(&resource);

        let queue = WorkQueue::new(self.backoff);
        let reconciler = Arc::new(ObjectReconciler::new(
            api.clone(),
            self.client.clone(),
            self.forest.clone(),
            self.options.clone(),
        ));
        let token = self.token.child_token();
        let controller = Controller::new(reconciler, queue.clone(), self.controller);
        let handle = tokio::spawn(controller.run(token.clone()));

        for object in &objects {
            queue.add(object.metadata.key());
        }
        self.running.insert(
            resource.clone(),
            Running {
                api,
                queue,
                token,
                handle,
            },
        );
        info!(kind = %resource, objects = objects.len(), "Started propagating");
        Ok(true)
    }

    /// Stops propagating a kind and removes every copy it made
    ///
    /// A kind stays draining until all of its copies are gone, so a failed
    /// cleanup is finished by the next call.
    pub async fn stop(&self, resource: &GroupResource) -> Result<bool> {
        if let Some((_, running)) = self.running.remove(resource) {
            running.token.cancel();
            if let Err(e) = running.handle.await {
                warn!(kind = %resource, error = %e, "Propagator task ended abnormally");
            }
            {
                let mut forest = self.forest.lock();
                forest.clear_sources(resource);
                forest.clear_object_conditions(resource);
            }
            self.draining.insert(resource.clone(), running.api);
        }

        let Some(api) = self.draining.get(resource).map(|d| d.value().clone()) else {
            return Ok(false);
        };
        let removed = self.remove_copies(&api).await?;
        self.draining.remove(resource);
        info!(kind = %resource, removed, "Stopped propagating");
        Ok(true)
    }

    /// Kinds stopped whose copies are not all removed yet
    pub fn draining(&self) -> Vec<GroupResource> {
        self.draining.iter().map(|d| d.key().clone()).collect()
    }

    async fn remove_copies(&self, api: &ApiResource) -> Result<usize> {
        let mut removed = 0usize;
        for mut object in self.client.list(api, None).await? {
            if !is_copy(&object) {
                continue;
            }
            let namespace = object.metadata.namespace.clone();
            let name = object.metadata.name.clone();
            if object.metadata.remove_finalizer(keys::FINALIZER_PROPAGATED) {
                match self.client.update(api, object).await {
                    Ok(_) => {}
                    Err(e) if e.is_not_found() => continue,
                    Err(e) => return Err(e.into()),
                }
            }
            self.client
                .delete_if_exists(api, namespace.as_deref(), &name)
                .await?;
            removed += 1;
        }
        Ok(removed)
    }

    pub fn enqueue(&self, resource: &GroupResource, key: ObjectKey) {
        if let Some(queue) = self.queue(resource) {
            queue.add(key);
        }
    }

    /// Queues the copies a changed source owes to its descendants, nearest first
    pub fn enqueue_descendants(&self, resource: &GroupResource, namespace: &str, name: &str) {
        let Some(queue) = self.queue(resource) else {
            return;
        };
        let descendants = self.forest.lock().descendants(namespace);
        queue.add(ObjectKey::namespaced(namespace, name));
        for descendant in descendants {
            queue.add(ObjectKey::namespaced(descendant, name));
        }
    }

    /// Queues every object a namespace holds or should hold, for every kind
    pub async fn enqueue_namespace(&self, namespace: &str) -> Result<()> {
        for api in self.kinds() {
            let resource = api.group_resource();
            let mut names: BTreeSet<String> = {
                let forest = self.forest.lock();
                let mut names = forest.inherited_source_names(&resource, namespace);
                if let Some(node) = forest.get_opt(namespace) {
                    names.extend(node.sources(&resource).map(|o| o.metadata.name.clone()));
                }
                names
            };
            names.extend(
                self.client
                    .list(&api, Some(namespace))
                    .await?
                    .into_iter()
                    .map(|o| o.metadata.name),
            );
            for name in names {
                self.enqueue(&resource, ObjectKey::namespaced(namespace, name));
            }
        }
        Ok(())
    }

    /// Queues every stored object of every kind
    pub async fn resync(&self) -> Result<()> {
        for api in self.kinds() {
            let resource = api.group_resource();
            for object in self.client.list(&api, None).await? {
                self.enqueue(&resource, object.metadata.key());
            }
        }
        Ok(())
    }

    /// Nothing queued or in flight for any kind
    pub fn is_idle(&self) -> bool {
        self.running.iter().all(|r| r.queue.is_idle())
    }

    /// Stops every propagator without cleaning up copies
    pub async fn shutdown(&self) {
        self.token.cancel();
        let kinds: Vec<GroupResource> = self.running.iter().map(|r| r.key().clone()).collect();
        for kind in kinds {
            if let Some((_, running)) = self.running.remove(&kind) {
                if let Err(e) = running.handle.await {
                    warn!(kind = %kind, error = %e, "Propagator task ended abnormally");
                }
            }
        }
    }
}
