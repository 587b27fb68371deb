//! Object propagator for one configured kind
//!
//! Keys are `(namespace, name)` pairs. A pass records the object as a source
//! if it is one, then makes the namespace's copy match the nearest ancestor
//! source: create, update, delete, or report why it cannot.

use crate::controller::{Action, Reconciler};
use crate::error::Result;
use async_trait::async_trait;
use hnc_client::{ClientError, ClusterClient};
use hnc_forest::{ConditionSource, Forest};
use hnc_types::{
    keys, ApiResource, Condition, ConditionCode, DynamicObject, GroupResource, HncOptions,
    ObjectKey, ObjectMeta, PropagationSelector,
};
use sha2::{Digest, Sha256};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Is this object a propagated copy rather than a user-owned object?
pub fn is_copy(object: &DynamicObject) -> bool {
    object
        .metadata
        .annotation(keys::ANNOTATION_INHERITED_FROM)
        .is_some()
}

/// Fingerprint of the parts of a source that are copied
pub fn source_fingerprint(source: &DynamicObject) -> serde_json::Result<String> {
    let bytes = serde_json::to_vec(&(
        &source.metadata.labels,
        &source.metadata.annotations,
        &source.payload(),
    ))?;
    Ok(hex::encode(Sha256::digest(&bytes)))
}

enum Plan {
    /// Propagation is paused below a critical condition
    Halted,
    NoSource,
    Copy(DynamicObject),
}

pub struct ObjectReconciler {
    api: ApiResource,
    resource: GroupResource,
    client: Arc<dyn ClusterClient>,
    forest: Arc<Forest>,
    options: Arc<HncOptions>,
}

impl ObjectReconciler {
    pub fn new(
        api: ApiResource,
        client: Arc<dyn ClusterClient>,
        forest: Arc<Forest>,
        options: Arc<HncOptions>,
    ) -> Self {
        Self {
            resource: api.group_resource(),
            api,
            client,
            forest,
            options,
        }
    }

    pub fn api(&self) -> &ApiResource {
        &self.api
    }

    /// The copy a namespace should hold of `source`
    pub fn build_copy(
        &self,
        namespace: &str,
        source_namespace: &str,
        source: &DynamicObject,
    ) -> serde_json::Result<DynamicObject> {
        let mut metadata = ObjectMeta::namespaced(namespace, source.metadata.name.clone());
        metadata.labels = source
            .metadata
            .labels
            .iter()
            .filter(|(k, _)| self.options.propagates_label(k))
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect();
        metadata.annotations = source
            .metadata
            .annotations
            .iter()
            .filter(|(k, _)| self.options.propagates_annotation(k))
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect();
        metadata.annotations.insert(
            keys::ANNOTATION_INHERITED_FROM.to_string(),
            source_namespace.to_string(),
        );
        metadata.annotations.insert(
            keys::ANNOTATION_SOURCE_VERSION.to_string(),
            source_fingerprint(source)?,
        );
        metadata.finalizers = vec![keys::FINALIZER_PROPAGATED.to_string()];

        let mut copy = DynamicObject::new(&self.api, metadata);
        copy.data = source.payload();
        Ok(copy)
    }

    fn plan(&self, namespace: &str, name: &str) -> serde_json::Result<Plan> {
        let forest = self.forest.lock();
        if forest.is_halted(namespace) {
            return Ok(Plan::Halted);
        }
        let Some((source_namespace, source)) =
            forest.effective_source(&self.resource, namespace, name)
        else {
            return Ok(Plan::NoSource);
        };
        let admitted = PropagationSelector::from_annotations(&source.metadata.annotations)
            .map(|selector| selector.admits(&forest.selector_labels(namespace)))
            .unwrap_or(false);
        if !admitted {
            return Ok(Plan::NoSource);
        }
        Ok(Plan::Copy(self.build_copy(namespace, &source_namespace, source)?))
    }

    fn condition_source(&self, name: &str) -> ConditionSource {
        ConditionSource::Object {
            resource: self.resource.clone(),
            name: name.to_string(),
        }
    }

    fn set_condition(&self, namespace: &str, name: &str, condition: Condition) {
        warn!(
            kind = %self.resource,
            namespace = %namespace,
            name = %name,
            reason = %condition.reason,
            message = %condition.message,
            "Object condition"
        );
        self.forest
            .lock()
            .set_condition(namespace, self.condition_source(name), condition);
    }

    fn clear_condition(&self, namespace: &str, name: &str) {
        self.forest
            .lock()
            .clear_conditions(namespace, &self.condition_source(name));
    }

    /// Lets a copy go: drops the finalizer, then deletes it
    async fn remove_copy(&self, mut copy: DynamicObject) -> Result<()> {
        let namespace = copy.metadata.namespace.clone().unwrap_or_default();
        let name = copy.metadata.name.clone();
        if copy.metadata.remove_finalizer(keys::FINALIZER_PROPAGATED) {
            match self.client.update(&self.api, copy).await {
                Ok(_) | Err(ClientError::NotFound(_)) => {}
                Err(e) => return Err(e.into()),
            }
        }
        self.client
            .delete_if_exists(&self.api, Some(&namespace), &name)
            .await?;
        info!(kind = %self.resource, namespace = %namespace, name = %name, "Deleted propagated copy");
        Ok(())
    }

    async fn create_copy(&self, namespace: &str, name: &str, copy: DynamicObject) -> Result<()> {
        match self.client.create(&self.api, copy).await {
            Ok(_) => {
                info!(kind = %self.resource, namespace = %namespace, name = %name, "Propagated object");
                self.clear_condition(namespace, name);
                Ok(())
            }
            Err(e @ (ClientError::Denied { .. } | ClientError::AlreadyExists(_))) => {
                self.set_condition(
                    namespace,
                    name,
                    Condition::new(
                        ConditionCode::CannotPropagate,
                        "CreateFailed",
                        format!("could not propagate {} {}: {}", self.resource, name, e),
                    ),
                );
                Ok(())
            }
            Err(e) => Err(e.into()),
        }
    }

    async fn update_copy(
        &self,
        namespace: &str,
        name: &str,
        existing: DynamicObject,
        mut desired: DynamicObject,
    ) -> Result<()> {
        if existing.same_content(&desired) && existing.metadata.has_finalizer(keys::FINALIZER_PROPAGATED) {
            self.clear_condition(namespace, name);
            return Ok(());
        }
        desired.metadata.resource_version = existing.metadata.resource_version.clone();
        for finalizer in &existing.metadata.finalizers {
            if !desired.metadata.has_finalizer(finalizer) {
                desired.metadata.finalizers.push(finalizer.clone());
            }
        }
        match self.client.update(&self.api, desired).await {
            Ok(_) => {
                info!(kind = %self.resource, namespace = %namespace, name = %name, "Updated propagated copy");
                self.clear_condition(namespace, name);
                Ok(())
            }
            Err(e @ ClientError::Denied { .. }) => {
                self.set_condition(
                    namespace,
                    name,
                    Condition::new(
                        ConditionCode::CannotUpdate,
                        "UpdateFailed",
                        format!("could not update {} {}: {}", self.resource, name, e),
                    ),
                );
                Ok(())
            }
            Err(e) => Err(e.into()),
        }
    }
}

#[async_trait]
impl Reconciler for ObjectReconciler {
    type Key = ObjectKey;

    fn name(&self) -> &'static str {
        "object"
    }

    async fn reconcile(&self, key: &ObjectKey) -> Result<Action> {
        let Some(namespace) = key.namespace.as_deref() else {
            return Ok(Action::Done);
        };
        let name = key.name.as_str();
        if self.options.is_excluded_namespace(namespace) {
            return Ok(Action::Done);
        }

        let object = self.client.get_opt(&self.api, Some(namespace), name).await?;

        {
            let mut forest = self.forest.lock();
            match &object {
                Some(o) if !is_copy(o) && !o.metadata.is_deleting() => {
                    if forest.set_source(&self.resource, o.clone()) {
                        debug!(kind = %self.resource, namespace = %namespace, name = %name, "Recorded source");
                    }
                }
                _ => {
                    if forest.remove_source(&self.resource, namespace, name) {
                        debug!(kind = %self.resource, namespace = %namespace, name = %name, "Forgot source");
                    }
                }
            }
        }

        let plan = self.plan(namespace, name)?;
        match (object, plan) {
            (_, Plan::Halted) => {
                debug!(kind = %self.resource, namespace = %namespace, name = %name, "Propagation halted");
            }
            (Some(o), _) if is_copy(&o) && o.metadata.is_deleting() => {
                self.remove_copy(o).await?;
            }
            (Some(o), Plan::NoSource) if is_copy(&o) => {
                self.remove_copy(o).await?;
                self.clear_condition(namespace, name);
            }
            (Some(o), Plan::Copy(copy)) if is_copy(&o) => {
                self.update_copy(namespace, name, o, copy).await?;
            }
            (Some(o), Plan::Copy(copy)) => {
                let from = copy
                    .metadata
                    .annotation(keys::ANNOTATION_INHERITED_FROM)
                    .unwrap_or_default()
                    .to_string();
                if o.metadata.is_deleting() {
                    return Ok(Action::Done);
                }
                self.set_condition(
                    namespace,
                    name,
                    Condition::new(
                        ConditionCode::CannotPropagate,
                        "ObjectOverridden",
                        format!(
                            "{} {} from {} is overridden by a local object of the same name",
                            self.resource, name, from
                        ),
                    ),
                );
            }
            (Some(_), Plan::NoSource) | (None, Plan::NoSource) => {
                self.clear_condition(namespace, name);
            }
            (None, Plan::Copy(copy)) => {
                self.create_copy(namespace, name, copy).await?;
            }
        }
        Ok(Action::Done)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use hnc_client::{typed, InMemoryCluster};
    use hnc_types::Namespace;
    use serde_json::json;

    struct Fixture {
        cluster: InMemoryCluster,
        forest: Arc<Forest>,
        reconciler: ObjectReconciler,
    }

    async fn fixture(chain: &[&str]) -> Fixture {
        let cluster = InMemoryCluster::new();
        let forest = Arc::new(Forest::new());
        for ns in chain {
            typed::create(&cluster, &Namespace::new(*ns)).await.unwrap();
            forest.lock().set_exists(ns, true);
        }
        for pair in chain.windows(2) {
            forest.lock().set_parent(pair[1], Some(pair[0])).unwrap();
        }
        let reconciler = ObjectReconciler::new(
            ApiResource::config_maps(),
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

    fn config_map(ns: &str, name: &str, value: &str) -> DynamicObject {
        DynamicObject::new(&ApiResource::config_maps(), ObjectMeta::namespaced(ns, name))
            .with_data(json!({ "data": { "key": value } }))
    }

    async fn reconcile(f: &Fixture, ns: &str, name: &str) {
        f.reconciler
            .reconcile(&ObjectKey::namespaced(ns, name))
            .await
            .unwrap();
    }

    async fn get(f: &Fixture, ns: &str, name: &str) -> Option<DynamicObject> {
        f.cluster
            .get_opt(&ApiResource::config_maps(), Some(ns), name)
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn test_copies_source_to_descendants() {
        let f = fixture(&["a", "b", "c"]).await;
        let api = ApiResource::config_maps();
        f.cluster.create(&api, config_map("a", "cm", "v1")).await.unwrap();

        reconcile(&f, "a", "cm").await;
        reconcile(&f, "b", "cm").await;
        reconcile(&f, "c", "cm").await;

        let copy = get(&f, "c", "cm").await.unwrap();
        assert_eq!(copy.metadata.annotation(keys::ANNOTATION_INHERITED_FROM), Some("a"));
        assert!(copy.metadata.has_finalizer(keys::FINALIZER_PROPAGATED));
        assert_eq!(copy.data["data"]["key"], "v1");
    }

    #[tokio::test]
    async fn test_source_change_updates_copy_and_removal_deletes_it() {
        let f = fixture(&["a", "b"]).await;
        let api = ApiResource::config_maps();
        let source = f.cluster.create(&api, config_map("a", "cm", "v1")).await.unwrap();
        reconcile(&f, "a", "cm").await;
        reconcile(&f, "b", "cm").await;

        let mut changed = source.clone();
        changed.data.insert("data".into(), json!({ "key": "v2" }));
        f.cluster.update(&api, changed).await.unwrap();
        reconcile(&f, "a", "cm").await;
        reconcile(&f, "b", "cm").await;
        assert_eq!(get(&f, "b", "cm").await.unwrap().data["data"]["key"], "v2");

        f.cluster.delete(&api, Some("a"), "cm").await.unwrap();
        reconcile(&f, "a", "cm").await;
        reconcile(&f, "b", "cm").await;
        assert!(get(&f, "b", "cm").await.is_none());
    }

    #[tokio::test]
    async fn test_closest_source_wins() {
        let f = fixture(&["a", "b", "c"]).await;
        let api = ApiResource::config_maps();
        f.cluster.create(&api, config_map("a", "cm", "far")).await.unwrap();
        f.cluster.create(&api, config_map("b", "cm", "near")).await.unwrap();

        for ns in ["a", "b", "c"] {
            reconcile(&f, ns, "cm").await;
        }

        assert_eq!(get(&f, "b", "cm").await.unwrap().data["data"]["key"], "near");
        let copy = get(&f, "c", "cm").await.unwrap();
        assert_eq!(copy.data["data"]["key"], "near");
        assert_eq!(copy.metadata.annotation(keys::ANNOTATION_INHERITED_FROM), Some("b"));
        assert!(f
            .forest
            .lock()
            .get_opt("b")
            .unwrap()
            .has_condition(ConditionCode::CannotPropagate));
    }

    #[tokio::test]
    async fn test_tree_selector_excludes_subtree() {
        let f = fixture(&["a", "b", "c"]).await;
        let api = ApiResource::config_maps();
        let mut source = config_map("a", "cm", "v1");
        source
            .metadata
            .annotations
            .insert(keys::ANNOTATION_TREE_SELECTOR.into(), "!c".into());
        f.cluster.create(&api, source).await.unwrap();

        for ns in ["a", "b", "c"] {
            reconcile(&f, ns, "cm").await;
        }
        assert!(get(&f, "b", "cm").await.is_some());
        assert!(get(&f, "c", "cm").await.is_none());
    }

    #[tokio::test]
    async fn test_halted_namespace_is_left_alone() {
        let f = fixture(&["a", "b"]).await;
        let api = ApiResource::config_maps();
        f.cluster.create(&api, config_map("a", "cm", "v1")).await.unwrap();
        f.forest.lock().set_condition(
            "b",
            ConditionSource::Hierarchy,
            Condition::new(ConditionCode::CritCycle, "InCycle", "loop"),
        );

        reconcile(&f, "a", "cm").await;
        reconcile(&f, "b", "cm").await;
        assert!(get(&f, "b", "cm").await.is_none());
    }

    #[test]
    fn test_fingerprint_ignores_server_fields() {
        let mut a = config_map("a", "cm", "v1");
        let fp = source_fingerprint(&a).unwrap();
        a.metadata.resource_version = Some("42".into());
        a.data.insert("status".into(), json!({ "phase": "x" }));
        assert_eq!(source_fingerprint(&a).unwrap(), fp);

        a.data.insert("data".into(), json!({ "key": "v2" }));
        assert_ne!(source_fingerprint(&a).unwrap(), fp);
    }
}
