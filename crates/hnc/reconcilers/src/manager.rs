//! Wires platform watches and forest notifications to the reconcilers

use crate::anchor::AnchorReconciler;
use crate::config::TypeConfigurator;
use crate::controller::{Controller, ControllerConfig};
use crate::error::Result;
use crate::hierarchy::HierarchyReconciler;
use crate::hrq::HrqReconciler;
use crate::propagator::Propagators;
use crate::queue::{Backoff, WorkQueue};
use hnc_client::{typed, ClusterClient, WatchEvent};
use hnc_forest::{Change, Forest, ForestEvent};
use hnc_types::{
    keys, ApiResource, HierarchicalResourceQuota, HierarchyConfiguration, HncOptions, Namespace,
    ObjectKey, SubnamespaceAnchor,
};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast::error::RecvError;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

#[derive(Debug, Clone, Copy, Default)]
pub struct ManagerConfig {
    pub controller: ControllerConfig,
    pub backoff: Backoff,
    /// Re-queue everything this often; `None` disables periodic resync
    pub resync_period: Option<Duration>,
}

pub struct Manager {
    client: Arc<dyn ClusterClient>,
    forest: Arc<Forest>,
    options: Arc<HncOptions>,
    config: ManagerConfig,
    hierarchy: WorkQueue<String>,
    anchors: WorkQueue<ObjectKey>,
    configs: WorkQueue<String>,
    quotas: WorkQueue<ObjectKey>,
    propagators: Arc<Propagators>,
}

impl Manager {
    pub fn new(
        client: Arc<dyn ClusterClient>,
        forest: Arc<Forest>,
        options: Arc<HncOptions>,
        config: ManagerConfig,
    ) -> Self {
        let propagators = Arc::new(Propagators::new(
            client.clone(),
            forest.clone(),
            options.clone(),
            config.controller,
            config.backoff,
        ));
        Self {
            client,
            forest,
            options,
            config,
            hierarchy: WorkQueue::new(config.backoff),
            anchors: WorkQueue::new(config.backoff),
            configs: WorkQueue::new(config.backoff),
            quotas: WorkQueue::new(config.backoff),
            propagators,
        }
    }

    pub fn forest(&self) -> &Arc<Forest> {
        &self.forest
    }

    pub fn propagators(&self) -> &Arc<Propagators> {
        &self.propagators
    }

    /// Nothing queued or in flight anywhere
    pub fn is_idle(&self) -> bool {
        self.hierarchy.is_idle()
            && self.anchors.is_idle()
            && self.configs.is_idle()
            && self.quotas.is_idle()
            && self.propagators.is_idle()
    }

    /// Loads what the platform already holds and queues all of it
    pub async fn prime(&self) -> Result<()> {
        let anchors: Vec<SubnamespaceAnchor> = typed::list(&*self.client, None).await?;
        {
            let mut forest = self.forest.lock();
            for anchor in &anchors {
                forest.add_anchor(anchor.parent(), &anchor.metadata.name);
            }
        }
        for anchor in &anchors {
            self.anchors.add(anchor.metadata.key());
        }

        let namespaces: Vec<Namespace> = typed::list(&*self.client, None).await?;
        for ns in &namespaces {
            self.hierarchy.add(ns.metadata.name.clone());
        }
        let configs: Vec<HierarchyConfiguration> = typed::list(&*self.client, None).await?;
        for hc in &configs {
            if let Some(ns) = &hc.metadata.namespace {
                self.hierarchy.add(ns.clone());
            }
        }
        self.configs.add(keys::CONFIG_SINGLETON.to_string());
        if self.options.hrq_enabled() {
            for hrq in typed::list::<HierarchicalResourceQuota, _>(&*self.client, None).await? {
                self.quotas.add(hrq.metadata.key());
            }
        }
        info!(
            namespaces = namespaces.len(),
            anchors = anchors.len(),
            "Primed reconcilers"
        );
        Ok(())
    }

    /// Queues every known key again
    pub async fn resync(&self) -> Result<()> {
        debug!("Resyncing");
        self.prime().await?;
        self.propagators.resync().await
    }

    /// Runs every reconciler until `token` is cancelled
    pub async fn run(self: Arc<Self>, token: CancellationToken) -> Result<()> {
        // Subscribe before listing so nothing slips between the two
        let watch = self.client.watch();
        let changes = self.forest.subscribe();
        self.prime().await?;

        let mut tasks = JoinSet::new();
        let controller = self.config.controller;

        let hierarchy = HierarchyReconciler::new(self.client.clone(), self.forest.clone(), self.options.clone());
        tasks.spawn(
            Controller::new(Arc::new(hierarchy), self.hierarchy.clone(), controller).run(token.child_token()),
        );

        let anchors = AnchorReconciler::new(self.client.clone(), self.forest.clone(), self.options.clone());
        tasks.spawn(Controller::new(Arc::new(anchors), self.anchors.clone(), controller).run(token.child_token()));

        // A single worker keeps propagator start/stop serialized
        let configurator = TypeConfigurator::new(self.client.clone(), self.forest.clone(), self.propagators.clone());
        let single = ControllerConfig {
            workers: 1,
            ..controller
        };
        tasks.spawn(Controller::new(Arc::new(configurator), self.configs.clone(), single).run(token.child_token()));

        if self.options.hrq_enabled() {
            let hrq = HrqReconciler::new(self.client.clone(), self.forest.clone());
            tasks.spawn(Controller::new(Arc::new(hrq), self.quotas.clone(), controller).run(token.child_token()));
        }

        tasks.spawn(self.clone().pump_watch(watch, token.child_token()));
        tasks.spawn(self.clone().pump_forest(changes, token.child_token()));
        if let Some(period) = self.config.resync_period.filter(|p| !p.is_zero()) {
            tasks.spawn(self.clone().resync_every(period, token.child_token()));
        }
        info!("Manager started");

        token.cancelled().await;
        self.propagators.shutdown().await;
        while let Some(joined) = tasks.join_next().await {
            if let Err(e) = joined {
                error!(error = %e, "Manager task failed");
            }
        }
        info!("Manager stopped");
        Ok(())
    }

    async fn pump_watch(self: Arc<Self>, mut watch: tokio::sync::broadcast::Receiver<WatchEvent>, token: CancellationToken) {
        loop {
            let received = tokio::select! {
                _ = token.cancelled() => break,
                received = watch.recv() => received,
            };
            match received {
                Ok(event) => {
                    if let Err(e) = self.route_watch(event).await {
                        warn!(error = %e, "Failed to route watch event");
                    }
                }
                Err(RecvError::Lagged(missed)) => {
                    warn!(missed, "Watch lagged; resyncing");
                    if let Err(e) = self.resync().await {
                        error!(error = %e, "Resync failed");
                    }
                }
                Err(RecvError::Closed) => break,
            }
        }
    }

    async fn pump_forest(self: Arc<Self>, mut changes: tokio::sync::broadcast::Receiver<ForestEvent>, token: CancellationToken) {
        loop {
            let received = tokio::select! {
                _ = token.cancelled() => break,
                received = changes.recv() => received,
            };
            match received {
                Ok(event) => {
                    if let Err(e) = self.route_change(event).await {
                        warn!(error = %e, "Failed to route forest change");
                    }
                }
                Err(RecvError::Lagged(missed)) => {
                    warn!(missed, "Forest notifications lagged; resyncing");
                    if let Err(e) = self.resync().await {
                        error!(error = %e, "Resync failed");
                    }
                }
                Err(RecvError::Closed) => break,
            }
        }
    }

    async fn resync_every(self: Arc<Self>, period: Duration, token: CancellationToken) {
        let mut ticker = tokio::time::interval(period);
        ticker.tick().await;
        loop {
            tokio::select! {
                _ = token.cancelled() => break,
                _ = ticker.tick() => {
                    if let Err(e) = self.resync().await {
                        error!(error = %e, "Resync failed");
                    }
                }
            }
        }
    }

    async fn route_watch(&self, event: WatchEvent) -> Result<()> {
        let resource = &event.resource;
        let object = &event.object;
        let name = object.metadata.name.clone();

        if *resource == ApiResource::namespaces().group_resource() {
            if let Some(parent) = object.metadata.annotation(keys::ANNOTATION_SUBNAMESPACE_OF) {
                self.anchors.add(ObjectKey::namespaced(parent, name.clone()));
            }
            self.hierarchy.add(name);
            return Ok(());
        }

        let Some(namespace) = object.metadata.namespace.clone() else {
            if *resource == ApiResource::hnc_configurations().group_resource() {
                self.configs.add(name);
            }
            return Ok(());
        };

        let key = ObjectKey::namespaced(namespace.clone(), name.clone());
        if *resource == ApiResource::hierarchy_configurations().group_resource() {
            self.hierarchy.add(namespace);
        } else if *resource == ApiResource::subnamespace_anchors().group_resource() {
            self.anchors.add(key.clone());
            self.hierarchy.add(name);
            self.hierarchy.add(namespace);
        } else if *resource == ApiResource::hierarchical_resource_quotas().group_resource() {
            if self.options.hrq_enabled() {
                self.quotas.add(key.clone());
            }
        } else if *resource == ApiResource::resource_quotas().group_resource() {
            self.enqueue_quotas_above(&namespace).await?;
        }

        if self.propagators.is_running(resource) {
            self.propagators.enqueue(resource, key);
            self.configs.add(keys::CONFIG_SINGLETON.to_string());
        }
        Ok(())
    }

    async fn route_change(&self, event: ForestEvent) -> Result<()> {
        match event.change {
            Change::Hierarchy { namespace } => {
                self.hierarchy.add(namespace.clone());
                self.propagators.enqueue_namespace(&namespace).await?;
                self.configs.add(keys::CONFIG_SINGLETON.to_string());
                self.enqueue_quotas_above(&namespace).await?;
            }
            Change::Source {
                resource,
                namespace,
                name,
            } => {
                self.propagators
                    .enqueue_descendants(&resource, &namespace, &name);
                self.configs.add(keys::CONFIG_SINGLETON.to_string());
            }
        }
        Ok(())
    }

    /// Queues the hierarchical quotas whose subtree contains `namespace`
    async fn enqueue_quotas_above(&self, namespace: &str) -> Result<()> {
        if !self.options.hrq_enabled() {
            return Ok(());
        }
        let ancestry = self.forest.lock().ancestry(namespace);
        for ns in ancestry {
            for hrq in typed::list::<HierarchicalResourceQuota, _>(&*self.client, Some(&ns)).await? {
                self.quotas.add(hrq.metadata.key());
            }
        }
        Ok(())
    }
}
