//! Hierarchy reconciler: one namespace and its `hierarchy` singleton
//!
//! Observes the namespace object and its hierarchy configuration, applies the
//! parent edge and managed metadata to the forest under its lock, then writes
//! depth labels, managed metadata and status back to the platform.

use crate::controller::{Action, Reconciler};
use crate::error::Result;
use async_trait::async_trait;
use hnc_client::{typed, ClusterClient};
use hnc_forest::{ConditionSource, Forest, ForestError, ForestState};
use hnc_types::{
    keys, Condition, ConditionCode, HierarchyConfiguration, HncOptions, MetaKvp, Namespace,
};
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

pub struct HierarchyReconciler {
    client: Arc<dyn ClusterClient>,
    forest: Arc<Forest>,
    options: Arc<HncOptions>,
}

/// What the forest says the platform objects should look like
#[derive(Debug, Default)]
struct Desired {
    depth_labels: BTreeMap<String, String>,
    managed_labels: Vec<MetaKvp>,
    managed_annotations: Vec<MetaKvp>,
    conditions: Vec<Condition>,
    children: Vec<String>,
    /// Parent to record in the spec, when it is dictated by an anchor
    forced_parent: Option<String>,
    has_subnamespaces: bool,
}

impl HierarchyReconciler {
    pub fn new(client: Arc<dyn ClusterClient>, forest: Arc<Forest>, options: Arc<HncOptions>) -> Self {
        Self {
            client,
            forest,
            options,
        }
    }

    /// Forgets a namespace that no longer exists; its children keep pointing at it
    fn on_missing(&self, name: &str) {
        let mut forest = self.forest.lock();
        if !forest.contains(name) {
            return;
        }
        let existed = forest.exists(name);
        forest.set_exists(name, false);
        let _ = forest.set_parent(name, None);
        forest.clear_conditions(name, &ConditionSource::Hierarchy);
        forest.set_managed_metadata(name, Vec::new(), Vec::new());
        forest.set_allow_cascading_deletion(name, false);
        forest.set_labels(name, BTreeMap::new());
        forest.set_subnamespace_of(name, None);
        forest.set_external(name, None, BTreeMap::new());
        if existed {
            info!(namespace = %name, "Namespace removed from the hierarchy");
            forest.notify_subtree(name);
        }
        forest.reclaim(name);
    }

    fn sync_forest(&self, namespace: &Namespace, hc: Option<&HierarchyConfiguration>) -> Desired {
        let name = namespace.metadata.name.as_str();
        let mut forest = self.forest.lock();

        let existed = forest.exists(name);
        forest.set_exists(name, true);
        if !existed {
            // Children waiting on a missing parent must look again
            forest.notify_subtree(name);
        }
        forest.set_labels(name, namespace.metadata.labels.clone());
        forest.set_subnamespace_of(name, namespace.subnamespace_of());
        let external = namespace.external_manager();
        let tree_labels = match external {
            Some(_) => external_tree_labels(name, &namespace.metadata.labels),
            None => BTreeMap::new(),
        };
        forest.set_external(name, external, tree_labels);

        // A terminating configuration still governs its subtree until it is gone
        let spec = hc.map(|h| h.spec.clone()).unwrap_or_default();

        let mut conditions = Vec::new();
        let mut desired_parent = spec.parent.clone().filter(|p| !p.is_empty());
        let mut forced_parent = None;

        if let Some(manager) = external {
            if let Some(parent) = desired_parent.take() {
                conditions.push(Condition::new(
                    ConditionCode::CritExternalManager,
                    "ParentIgnored",
                    format!(
                        "namespace is managed by {}; its parent {} is ignored",
                        manager, parent
                    ),
                ));
            }
        } else if let Some(owner) = namespace.subnamespace_of() {
            if desired_parent.as_deref() != Some(owner) {
                desired_parent = Some(owner.to_string());
                forced_parent = Some(owner.to_string());
            }
            let anchored = forest.get_opt(owner).is_some_and(|n| n.has_anchor(name));
            if forest.exists(owner) && !anchored {
                conditions.push(Condition::new(
                    ConditionCode::SubnamespaceAnchorMissing,
                    "AnchorMissing",
                    format!("the anchor for this subnamespace is missing from {}", owner),
                ));
            }
        }

        if let Some(parent) = desired_parent.clone() {
            if self.options.is_excluded_namespace(&parent) {
                conditions.push(Condition::new(
                    ConditionCode::CritParentMissing,
                    "IllegalParent",
                    format!("{} is excluded from the hierarchy and cannot be a parent", parent),
                ));
                desired_parent = None;
            }
        }

        match forest.set_parent(name, desired_parent.as_deref()) {
            Ok(affected) if !affected.is_empty() => {
                info!(
                    namespace = %name,
                    parent = ?desired_parent,
                    affected = affected.len(),
                    "Parent changed"
                );
            }
            Ok(_) => {}
            Err(e @ ForestError::Cycle { .. }) => {
                conditions.push(Condition::new(
                    ConditionCode::CritCycle,
                    "InCycle",
                    e.to_string(),
                ));
            }
        }

        let current_parent = forest.get(name).parent().map(str::to_string);
        if let Some(parent) = &current_parent {
            if !forest.exists(parent) {
                conditions.push(Condition::new(
                    ConditionCode::CritParentMissing,
                    "ParentMissing",
                    format!("parent {} does not exist", parent),
                ));
            }
        }

        let (labels, illegal_labels): (Vec<MetaKvp>, Vec<MetaKvp>) = spec
            .labels
            .iter()
            .cloned()
            .partition(|kvp| self.options.is_managed_label(&kvp.key));
        let (annotations, illegal_annotations): (Vec<MetaKvp>, Vec<MetaKvp>) = spec
            .annotations
            .iter()
            .cloned()
            .partition(|kvp| self.options.is_managed_annotation(&kvp.key));
        for kvp in &illegal_labels {
            conditions.push(Condition::new(
                ConditionCode::BadConfiguration,
                "IllegalManagedLabel",
                format!("{} is not a managed label", kvp.key),
            ));
        }
        for kvp in &illegal_annotations {
            conditions.push(Condition::new(
                ConditionCode::BadConfiguration,
                "IllegalManagedAnnotation",
                format!("{} is not a managed annotation", kvp.key),
            ));
        }
        forest.set_managed_metadata(name, labels, annotations);
        forest.set_allow_cascading_deletion(name, spec.allow_cascading_deletion);

        conditions.sort();
        conditions.dedup();
        for condition in &conditions {
            warn!(namespace = %name, code = %condition.code.as_str(), message = %condition.message, "Hierarchy condition");
        }
        forest.set_conditions(name, ConditionSource::Hierarchy, conditions);

        let desired = self.desired(&mut forest, name, forced_parent);
        forest.mark_observed(name);
        desired
    }

    fn desired(&self, forest: &mut ForestState, name: &str, forced_parent: Option<String>) -> Desired {
        let mut conditions = forest.get(name).conditions();
        if let Some(ancestor) = forest.critical_ancestor(name).filter(|a| a != name) {
            conditions.push(Condition::new(
                ConditionCode::CritAncestor,
                "AncestorHalted",
                format!("propagation paused because ancestor {} has a critical condition", ancestor),
            ));
        }
        conditions.sort();

        let children = forest.get(name).child_names();
        let has_subnamespaces = children.iter().any(|c| {
            forest
                .get_opt(c)
                .is_some_and(|n| n.exists() && n.subnamespace_of() == Some(name))
        });
        let (managed_labels, managed_annotations) = forest.effective_managed_metadata(name);

        Desired {
            depth_labels: forest.depth_labels(name),
            managed_labels,
            managed_annotations,
            conditions,
            children,
            forced_parent,
            has_subnamespaces,
        }
    }

    async fn write_namespace(&self, namespace: &Namespace, desired: &Desired) -> Result<()> {
        if namespace.metadata.is_deleting() {
            return Ok(());
        }
        let mut updated = namespace.clone();

        let labels = &mut updated.metadata.labels;
        labels.retain(|k, _| {
            !self.options.is_managed_label(k) || desired.managed_labels.iter().any(|kvp| &kvp.key == k)
        });
        for kvp in &desired.managed_labels {
            labels.insert(kvp.key.clone(), kvp.value.clone());
        }
        // HNC-owned labels go last so nothing above can displace them
        labels.retain(|k, _| {
            keys::depth_label_ancestor(k).is_none() || desired.depth_labels.contains_key(k)
        });
        labels.extend(desired.depth_labels.clone());
        labels.insert(keys::LABEL_INCLUDED_NAMESPACE.to_string(), "true".to_string());

        let annotations = &mut updated.metadata.annotations;
        annotations.retain(|k, _| {
            !self.options.is_managed_annotation(k)
                || desired.managed_annotations.iter().any(|kvp| &kvp.key == k)
        });
        for kvp in &desired.managed_annotations {
            annotations.insert(kvp.key.clone(), kvp.value.clone());
        }

        if &updated != namespace {
            typed::update(&*self.client, &updated).await?;
            info!(namespace = %namespace.metadata.name, "Updated namespace metadata");
        }
        Ok(())
    }

    async fn write_hierarchy(
        &self,
        namespace: &Namespace,
        hc: Option<HierarchyConfiguration>,
        desired: Desired,
    ) -> Result<Action> {
        let name = namespace.metadata.name.as_str();
        let Some(mut hc) = hc else {
            let needed = !desired.children.is_empty()
                || !desired.conditions.is_empty()
                || desired.forced_parent.is_some();
            if !needed || namespace.metadata.is_deleting() {
                return Ok(Action::Done);
            }
            let mut hc = HierarchyConfiguration::new(name);
            hc.spec.parent = desired.forced_parent;
            hc.status.children = desired.children;
            hc.status.conditions = desired.conditions;
            if desired.has_subnamespaces {
                hc.metadata.add_finalizer(keys::FINALIZER_HAS_SUBNAMESPACE);
            }
            return match typed::create(&*self.client, &hc).await {
                Ok(_) => {
                    info!(namespace = %name, "Created hierarchy configuration");
                    Ok(Action::Done)
                }
                Err(e) if e.is_already_exists() => Ok(Action::RequeueAfter(Duration::ZERO)),
                Err(e) => Err(e.into()),
            };
        };

        let original = hc.clone();
        if let Some(parent) = desired.forced_parent {
            if !hc.metadata.is_deleting() {
                hc.spec.parent = Some(parent);
            }
        }
        hc.status.children = desired.children;
        hc.status.conditions = desired.conditions;
        if desired.has_subnamespaces {
            if !hc.metadata.is_deleting() {
                hc.metadata.add_finalizer(keys::FINALIZER_HAS_SUBNAMESPACE);
            }
        } else {
            hc.metadata.remove_finalizer(keys::FINALIZER_HAS_SUBNAMESPACE);
        }

        if hc != original {
            typed::update(&*self.client, &hc).await?;
            debug!(namespace = %name, "Updated hierarchy configuration");
        }
        Ok(Action::Done)
    }
}

/// Ancestor depths an external manager publishes through depth labels
fn external_tree_labels(name: &str, labels: &BTreeMap<String, String>) -> BTreeMap<String, u32> {
    labels
        .iter()
        .filter_map(|(k, v)| {
            let ancestor = keys::depth_label_ancestor(k)?;
            let depth = v.parse::<u32>().ok()?;
            (ancestor != name).then(|| (ancestor.to_string(), depth))
        })
        .collect()
}

#[async_trait]
impl Reconciler for HierarchyReconciler {
    type Key = String;

    fn name(&self) -> &'static str {
        "hierarchy"
    }

    async fn reconcile(&self, name: &String) -> Result<Action> {
        let namespace: Option<Namespace> = typed::get_opt(&*self.client, None, name).await?;
        let hc: Option<HierarchyConfiguration> =
            typed::get_opt(&*self.client, Some(name), keys::HIERARCHY_SINGLETON).await?;

        let Some(namespace) = namespace else {
            self.on_missing(name);
            return Ok(Action::Done);
        };

        if self.options.is_excluded_namespace(name) {
            if let Some(mut hc) = hc {
                if hc.metadata.remove_finalizer(keys::FINALIZER_HAS_SUBNAMESPACE) {
                    typed::update(&*self.client, &hc).await?;
                    info!(namespace = %name, "Removed finalizer from excluded namespace");
                }
            }
            return Ok(Action::Done);
        }

        let desired = self.sync_forest(&namespace, hc.as_ref());
        self.write_namespace(&namespace, &desired).await?;
        self.write_hierarchy(&namespace, hc, desired).await
    }
}
