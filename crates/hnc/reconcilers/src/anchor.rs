//! Anchor reconciler: creates and removes subnamespaces
//!
//! An anchor `c` in namespace `p` owns the namespace `c`. The anchor carries a
//! finalizer so that deleting it first deletes the subnamespace (subject to
//! the cascading deletion policy) and only then lets the anchor go.

use crate::controller::{Action, Reconciler};
use crate::error::Result;
use async_trait::async_trait;
use hnc_client::{typed, ClusterClient};
use hnc_forest::Forest;
use hnc_types::{
    keys, AnchorState, ApiResource, HierarchyConfiguration, HncOptions, MetaKvp, Namespace, ObjectKey,
    SubnamespaceAnchor,
};
use std::sync::Arc;
use tracing::{debug, info, warn};

pub struct AnchorReconciler {
    client: Arc<dyn ClusterClient>,
    forest: Arc<Forest>,
    options: Arc<HncOptions>,
}

impl AnchorReconciler {
    pub fn new(
        client: Arc<dyn ClusterClient>,
        forest: Arc<Forest>,
        options: Arc<HncOptions>,
    ) -> Self {
        Self {
            client,
            forest,
            options,
        }
    }

    /// The anchor kind itself is being removed, as when HNC is uninstalled
    fn tearing_down(&self) -> bool {
        self.client
            .catalog()
            .is_terminating(&ApiResource::subnamespace_anchors().group_resource())
    }

    async fn finalize(&self, mut anchor: SubnamespaceAnchor) -> Result<Action> {
        let (parent, name) = (anchor.parent().to_string(), anchor.metadata.name.clone());
        self.forest.lock().remove_anchor(&parent, &name);
        if anchor.metadata.remove_finalizer(keys::FINALIZER_ANCHOR) {
            typed::update(&*self.client, &anchor).await?;
            info!(parent = %parent, anchor = %name, "Anchor finalized");
        }
        Ok(Action::Done)
    }

    fn state_of(parent: &str, child: Option<&Namespace>) -> AnchorState {
        match child {
            None => AnchorState::Missing,
            Some(ns) if ns.subnamespace_of() == Some(parent) => AnchorState::Ok,
            Some(_) => AnchorState::Conflict,
        }
    }

    async fn on_deleting(&self, anchor: SubnamespaceAnchor) -> Result<Action> {
        let parent = anchor.parent().to_string();
        let name = anchor.metadata.name.clone();

        if self.tearing_down() {
            debug!(parent = %parent, anchor = %name, "Teardown in progress; keeping subnamespace");
            return self.finalize(anchor).await;
        }

        let child: Option<Namespace> = typed::get_opt(&*self.client, None, &name).await?;
        if Self::state_of(&parent, child.as_ref()) != AnchorState::Ok {
            return self.finalize(anchor).await;
        }
        if child.is_some_and(|ns| ns.metadata.is_deleting()) {
            debug!(parent = %parent, anchor = %name, "Waiting for subnamespace to disappear");
            return Ok(Action::Done);
        }

        let (has_descendants, cascading) = {
            let forest = self.forest.lock();
            (
                !forest.descendants(&name).is_empty(),
                forest.allows_cascading_deletion(&name),
            )
        };
        if has_descendants && !cascading {
            warn!(
                parent = %parent,
                anchor = %name,
                "Subnamespace has descendants and cascading deletion is not allowed; leaving it in place"
            );
            return self.finalize(anchor).await;
        }

        self.client
            .delete_if_exists(&ApiResource::namespaces(), None, &name)
            .await?;
        info!(parent = %parent, anchor = %name, "Deleting subnamespace");
        Ok(Action::Done)
    }

    async fn create_subnamespace(&self, anchor: &SubnamespaceAnchor) -> Result<()> {
        let parent = anchor.parent();
        let name = &anchor.metadata.name;
        let (labels, annotations) = self.forest.lock().effective_managed_metadata(parent);

        let mut ns = Namespace::new(name.clone());
        ns.metadata
            .annotations
            .insert(keys::ANNOTATION_SUBNAMESPACE_OF.to_string(), parent.to_string());
        for kvp in labels.iter().chain(&anchor.spec.labels) {
            if self.options.is_managed_label(&kvp.key) {
                ns.metadata.labels.insert(kvp.key.clone(), kvp.value.clone());
            }
        }
        for kvp in annotations.iter().chain(&anchor.spec.annotations) {
            if self.options.is_managed_annotation(&kvp.key) {
                ns.metadata
                    .annotations
                    .insert(kvp.key.clone(), kvp.value.clone());
            }
        }

        match typed::create(&*self.client, &ns).await {
            Ok(_) => {
                info!(parent = %parent, namespace = %name, "Created subnamespace");
                Ok(())
            }
            Err(e) if e.is_already_exists() => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    /// Mirrors the anchor's metadata into the subnamespace's hierarchy configuration
    async fn sync_hierarchy(&self, anchor: &SubnamespaceAnchor) -> Result<()> {
        let parent = anchor.parent();
        let name = &anchor.metadata.name;
        let existing: Option<HierarchyConfiguration> =
            typed::get_opt(&*self.client, Some(name), keys::HIERARCHY_SINGLETON).await?;

        match existing {
            None => {
                let mut hc = HierarchyConfiguration::new(name.clone());
                hc.spec.parent = Some(parent.to_string());
                hc.spec.labels = anchor.spec.labels.clone();
                hc.spec.annotations = anchor.spec.annotations.clone();
                match typed::create(&*self.client, &hc).await {
                    Ok(_) => debug!(namespace = %name, "Created subnamespace hierarchy"),
                    Err(e) if e.is_already_exists() => {}
                    Err(e) => return Err(e.into()),
                }
            }
            Some(mut hc) if !hc.metadata.is_deleting() => {
                let labels: Vec<MetaKvp> = anchor.spec.labels.clone();
                let annotations: Vec<MetaKvp> = anchor.spec.annotations.clone();
                if hc.spec.labels != labels || hc.spec.annotations != annotations {
                    hc.spec.labels = labels;
                    hc.spec.annotations = annotations;
                    typed::update(&*self.client, &hc).await?;
                    info!(namespace = %name, "Synced anchor metadata to subnamespace");
                }
            }
            Some(_) => {}
        }
        Ok(())
    }

    async fn write_status(
        &self,
        original: &SubnamespaceAnchor,
        state: AnchorState,
        finalizer: bool,
    ) -> Result<()> {
        let mut anchor = original.clone();
        anchor.status.state = Some(state);
        if finalizer {
            anchor.metadata.add_finalizer(keys::FINALIZER_ANCHOR);
        } else {
            anchor.metadata.remove_finalizer(keys::FINALIZER_ANCHOR);
        }
        if &anchor != original {
            typed::update(&*self.client, &anchor).await?;
            debug!(
                parent = %anchor.parent(),
                anchor = %anchor.metadata.name,
                %state,
                "Updated anchor status"
            );
        }
        Ok(())
    }
}

#[async_trait]
impl Reconciler for AnchorReconciler {
    type Key = ObjectKey;

    fn name(&self) -> &'static str {
        "anchor"
    }

    async fn reconcile(&self, key: &ObjectKey) -> Result<Action> {
        let Some(parent) = key.namespace.as_deref() else {
            return Ok(Action::Done);
        };
        let name = key.name.as_str();

        let anchor: Option<SubnamespaceAnchor> =
            typed::get_opt(&*self.client, Some(parent), name).await?;
        let Some(anchor) = anchor else {
            self.forest.lock().remove_anchor(parent, name);
            return Ok(Action::Done);
        };

        if self.options.is_excluded_namespace(parent) {
            return self.finalize(anchor).await;
        }

        if self.options.is_excluded_namespace(name) {
            self.forest.lock().remove_anchor(parent, name);
            if anchor.metadata.is_deleting() {
                return self.finalize(anchor).await;
            }
            warn!(parent = %parent, anchor = %name, "Anchor names an excluded namespace");
            self.write_status(&anchor, AnchorState::Forbidden, false).await?;
            return Ok(Action::Done);
        }

        if anchor.metadata.is_deleting() {
            return self.on_deleting(anchor).await;
        }

        self.forest.lock().add_anchor(parent, name);

        let child: Option<Namespace> = typed::get_opt(&*self.client, None, name).await?;
        let state = Self::state_of(parent, child.as_ref());
        match state {
            AnchorState::Missing => {
                // Finalizer first so the new namespace is never unowned
                self.write_status(&anchor, AnchorState::Missing, true).await?;
                self.create_subnamespace(&anchor).await?;
                self.sync_hierarchy(&anchor).await?;
            }
            AnchorState::Ok => {
                self.sync_hierarchy(&anchor).await?;
                self.write_status(&anchor, AnchorState::Ok, true).await?;
            }
            _ => {
                warn!(parent = %parent, anchor = %name, "Namespace exists and is not owned by this anchor");
                self.write_status(&anchor, state, true).await?;
            }
        }
        Ok(Action::Done)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use hnc_client::InMemoryCluster;

    struct Fixture {
        cluster: InMemoryCluster,
        forest: Arc<Forest>,
        reconciler: AnchorReconciler,
    }

    fn fixture() -> Fixture {
        let cluster = InMemoryCluster::new();
        let forest = Arc::new(Forest::new());
        let reconciler = AnchorReconciler::new(
            Arc::new(cluster.clone()),
            forest.clone(),
            Arc::new(HncOptions::default()),
        );
        Fixture {
            cluster,
            forest,
            reconciler,
        }
    }

    async fn anchor(f: &Fixture, parent: &str, name: &str) -> ObjectKey {
        if typed::get_opt::<Namespace, _>(&f.cluster, None, parent)
            .await
            .unwrap()
            .is_none()
        {
            typed::create(&f.cluster, &Namespace::new(parent)).await.unwrap();
        }
        typed::create(&f.cluster, &SubnamespaceAnchor::new(parent, name))
            .await
            .unwrap();
        ObjectKey::namespaced(parent, name)
    }

    async fn state(f: &Fixture, key: &ObjectKey) -> Option<AnchorState> {
        typed::get::<SubnamespaceAnchor, _>(&f.cluster, key.namespace.as_deref(), &key.name)
            .await
            .unwrap()
            .status
            .state
    }

    #[tokio::test]
    async fn test_creates_subnamespace() {
        let f = fixture();
        let key = anchor(&f, "foo", "bar").await;

        f.reconciler.reconcile(&key).await.unwrap();
        let bar: Namespace = typed::get(&f.cluster, None, "bar").await.unwrap();
        assert_eq!(bar.subnamespace_of(), Some("foo"));
        let hc: HierarchyConfiguration =
            typed::get(&f.cluster, Some("bar"), keys::HIERARCHY_SINGLETON)
                .await
                .unwrap();
        assert_eq!(hc.parent(), Some("foo"));

        f.reconciler.reconcile(&key).await.unwrap();
        assert_eq!(state(&f, &key).await, Some(AnchorState::Ok));
        assert!(f.forest.lock().get_opt("foo").unwrap().has_anchor("bar"));
    }

    #[tokio::test]
    async fn test_excluded_name_is_forbidden() {
        let f = fixture();
        let key = anchor(&f, "foo", "kube-system").await;

        f.reconciler.reconcile(&key).await.unwrap();
        assert_eq!(state(&f, &key).await, Some(AnchorState::Forbidden));
        let anchor: SubnamespaceAnchor = typed::get(&f.cluster, Some("foo"), "kube-system")
            .await
            .unwrap();
        assert!(anchor.metadata.finalizers.is_empty());
    }

    #[tokio::test]
    async fn test_existing_namespace_conflicts() {
        let f = fixture();
        typed::create(&f.cluster, &Namespace::new("baz")).await.unwrap();
        let key = anchor(&f, "foo", "baz").await;

        f.reconciler.reconcile(&key).await.unwrap();
        assert_eq!(state(&f, &key).await, Some(AnchorState::Conflict));
        let baz: Namespace = typed::get(&f.cluster, None, "baz").await.unwrap();
        assert_eq!(baz.subnamespace_of(), None);
    }

    #[tokio::test]
    async fn test_deletion_removes_subnamespace_then_finalizes() {
        let f = fixture();
        let key = anchor(&f, "foo", "bar").await;
        f.reconciler.reconcile(&key).await.unwrap();

        f.cluster
            .delete(&ApiResource::subnamespace_anchors(), Some("foo"), "bar")
            .await
            .unwrap();
        f.reconciler.reconcile(&key).await.unwrap();
        // The namespace held only its hierarchy configuration, which has no finalizer
        assert!(typed::get_opt::<Namespace, _>(&f.cluster, None, "bar")
            .await
            .unwrap()
            .is_none());

        f.reconciler.reconcile(&key).await.unwrap();
        assert!(typed::get_opt::<SubnamespaceAnchor, _>(&f.cluster, Some("foo"), "bar")
            .await
            .unwrap()
            .is_none());
    }

    #[tokio::test]
    async fn test_teardown_keeps_subnamespace() {
        let f = fixture();
        let key = anchor(&f, "foo", "bar").await;
        f.reconciler.reconcile(&key).await.unwrap();

        // Removing the anchor kind marks every anchor for deletion
        f.cluster
            .remove_kind(&ApiResource::subnamespace_anchors())
            .await
            .unwrap();
        f.reconciler.reconcile(&key).await.unwrap();

        assert!(typed::get_opt::<Namespace, _>(&f.cluster, None, "bar")
            .await
            .unwrap()
            .is_some());
        assert!(typed::get_opt::<SubnamespaceAnchor, _>(&f.cluster, Some("foo"), "bar")
            .await
            .unwrap()
            .is_none());
    }
}
