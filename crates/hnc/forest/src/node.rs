//! Per-namespace state held in the forest

use hnc_types::{Condition, ConditionCode, DynamicObject, GroupResource, MetaKvp};
use std::collections::{BTreeMap, BTreeSet};

/// Which reconciler owns a condition; each clears only its own
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum ConditionSource {
    /// Structural problems found by the hierarchy reconciler
    Hierarchy,
    /// Problems propagating one object of one kind
    Object { resource: GroupResource, name: String },
}

/// One namespace as the forest knows it
#[derive(Debug, Clone, Default)]
pub struct NamespaceNode {
    pub(crate) name: String,
    pub(crate) parent: Option<String>,
    pub(crate) children: BTreeSet<String>,

    /// Has the namespace object itself been observed?
    pub(crate) exists: bool,
    pub(crate) subnamespace_of: Option<String>,
    pub(crate) external_manager: Option<String>,
    /// Ancestor to depth, as published by an external hierarchy owner
    pub(crate) external_tree_labels: BTreeMap<String, u32>,
    pub(crate) allow_cascading_deletion: bool,
    pub(crate) managed_labels: Vec<MetaKvp>,
    pub(crate) managed_annotations: Vec<MetaKvp>,
    /// Labels on the namespace object other than the depth labels
    pub(crate) labels: BTreeMap<String, String>,
    pub(crate) anchors: BTreeSet<String>,
    pub(crate) conditions: BTreeMap<ConditionSource, Vec<Condition>>,
    pub(crate) sources: BTreeMap<GroupResource, BTreeMap<String, DynamicObject>>,

    pub(crate) hierarchy_generation: u64,
    pub(crate) observed_generation: u64,
}

impl NamespaceNode {
    pub(crate) fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            ..Default::default()
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn parent(&self) -> Option<&str> {
        self.parent.as_deref()
    }

    pub fn children(&self) -> impl Iterator<Item = &str> {
        self.children.iter().map(String::as_str)
    }

    pub fn child_names(&self) -> Vec<String> {
        self.children.iter().cloned().collect()
    }

    pub fn exists(&self) -> bool {
        self.exists
    }

    pub fn is_subnamespace(&self) -> bool {
        self.subnamespace_of.is_some()
    }

    pub fn subnamespace_of(&self) -> Option<&str> {
        self.subnamespace_of.as_deref()
    }

    pub fn external_manager(&self) -> Option<&str> {
        self.external_manager.as_deref()
    }

    pub fn is_external(&self) -> bool {
        self.external_manager.is_some()
    }

    pub fn external_tree_labels(&self) -> &BTreeMap<String, u32> {
        &self.external_tree_labels
    }

    /// The node's own bit; see `ForestState::allows_cascading_deletion` for inheritance
    pub fn allow_cascading_deletion(&self) -> bool {
        self.allow_cascading_deletion
    }

    pub fn managed_labels(&self) -> &[MetaKvp] {
        &self.managed_labels
    }

    pub fn managed_annotations(&self) -> &[MetaKvp] {
        &self.managed_annotations
    }

    pub fn labels(&self) -> &BTreeMap<String, String> {
        &self.labels
    }

    pub fn anchors(&self) -> impl Iterator<Item = &str> {
        self.anchors.iter().map(String::as_str)
    }

    pub fn anchor_names(&self) -> Vec<String> {
        self.anchors.iter().cloned().collect()
    }

    pub fn has_anchor(&self, name: &str) -> bool {
        self.anchors.contains(name)
    }

    /// All conditions from every source, deduplicated and sorted
    pub fn conditions(&self) -> Vec<Condition> {
        let set: BTreeSet<&Condition> = self.conditions.values().flatten().collect();
        set.into_iter().cloned().collect()
    }

    pub fn conditions_from(&self, source: &ConditionSource) -> &[Condition] {
        self.conditions.get(source).map(Vec::as_slice).unwrap_or_default()
    }

    pub fn has_condition(&self, code: ConditionCode) -> bool {
        self.conditions.values().flatten().any(|c| c.code == code)
    }

    /// Critical conditions recorded on this node itself
    pub fn has_local_critical(&self) -> bool {
        self.conditions.values().flatten().any(Condition::is_critical)
    }

    pub fn sources(&self, resource: &GroupResource) -> impl Iterator<Item = &DynamicObject> {
        self.sources.get(resource).into_iter().flat_map(|m| m.values())
    }

    pub fn source(&self, resource: &GroupResource, name: &str) -> Option<&DynamicObject> {
        self.sources.get(resource).and_then(|m| m.get(name))
    }

    pub fn num_sources(&self, resource: &GroupResource) -> usize {
        self.sources.get(resource).map_or(0, BTreeMap::len)
    }

    pub fn hierarchy_generation(&self) -> u64 {
        self.hierarchy_generation
    }

    /// Has the hierarchy reconciler caught up with the latest ancestry change?
    pub fn is_observed(&self) -> bool {
        self.observed_generation >= self.hierarchy_generation
    }

    /// A node with no remaining state can be dropped from the table
    pub(crate) fn is_quiescent(&self) -> bool {
        !self.exists
            && self.parent.is_none()
            && self.children.is_empty()
            && self.anchors.is_empty()
            && self.conditions.values().all(Vec::is_empty)
            && self.sources.values().all(BTreeMap::is_empty)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_conditions_are_merged_across_sources() {
        let mut node = NamespaceNode::new("a");
        let dup = Condition::new(ConditionCode::BadConfiguration, "IllegalManagedLabel", "x");
        node.conditions
            .insert(ConditionSource::Hierarchy, vec![dup.clone()]);
        node.conditions.insert(
            ConditionSource::Object {
                resource: GroupResource::new("", "secrets"),
                name: "s".into(),
            },
            vec![
                dup,
                Condition::new(ConditionCode::CannotPropagate, "ObjectOverridden", "y"),
            ],
        );

        assert_eq!(node.conditions().len(), 2);
        assert!(node.has_condition(ConditionCode::CannotPropagate));
        assert!(!node.has_local_critical());
    }

    #[test]
    fn test_new_node_is_quiescent() {
        let mut node = NamespaceNode::new("a");
        assert!(node.is_quiescent());
        node.exists = true;
        assert!(!node.is_quiescent());
    }
}
