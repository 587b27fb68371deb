//! The forest and its locked state

use crate::error::{ForestError, Result};
use crate::events::{Change, ForestEvent, EVENT_CHANNEL_CAPACITY};
use crate::node::{ConditionSource, NamespaceNode};
use hnc_types::{keys, Condition, DynamicObject, GroupResource, MetaKvp};
use parking_lot::{Mutex, MutexGuard};
use std::collections::{BTreeMap, BTreeSet, HashMap, VecDeque};
use tokio::sync::broadcast;
use tracing::debug;

/// Shared handle to the namespace tree
pub struct Forest {
    state: Mutex<ForestState>,
    events_tx: broadcast::Sender<ForestEvent>,
}

impl Default for Forest {
    fn default() -> Self {
        Self::new()
    }
}

impl Forest {
    pub fn new() -> Self {
        let (events_tx, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        Self {
            state: Mutex::new(ForestState {
                nodes: HashMap::new(),
                seq: 0,
                events_tx: events_tx.clone(),
            }),
            events_tx,
        }
    }

    /// Acquires the global lock; do not hold the guard across `.await`
    pub fn lock(&self) -> MutexGuard<'_, ForestState> {
        self.state.lock()
    }

    /// Subscribe to committed changes
    pub fn subscribe(&self) -> broadcast::Receiver<ForestEvent> {
        self.events_tx.subscribe()
    }
}

/// Everything behind the forest lock
pub struct ForestState {
    nodes: HashMap<String, NamespaceNode>,
    seq: u64,
    events_tx: broadcast::Sender<ForestEvent>,
}

impl ForestState {
    // ========== Nodes ==========

    /// Returns the node, creating an unattached one if it is unknown
    pub fn get(&mut self, name: &str) -> &mut NamespaceNode {
        self.nodes
            .entry(name.to_string())
            .or_insert_with(|| NamespaceNode::new(name))
    }

    pub fn get_opt(&self, name: &str) -> Option<&NamespaceNode> {
        self.nodes.get(name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.nodes.contains_key(name)
    }

    /// Has the namespace object been observed?
    pub fn exists(&self, name: &str) -> bool {
        self.nodes.get(name).is_some_and(NamespaceNode::exists)
    }

    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.nodes.keys().cloned().collect();
        names.sort();
        names
    }

    /// Names of all namespaces that are known to exist
    pub fn existing_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self
            .nodes
            .values()
            .filter(|n| n.exists)
            .map(|n| n.name.clone())
            .collect();
        names.sort();
        names
    }

    /// Drops a node that no longer carries any state
    pub fn reclaim(&mut self, name: &str) -> bool {
        if self.nodes.get(name).is_some_and(NamespaceNode::is_quiescent) {
            self.nodes.remove(name);
            debug!(namespace = %name, "Reclaimed forest node");
            return true;
        }
        false
    }

    // ========== Observed namespace state ==========

    pub fn set_exists(&mut self, name: &str, exists: bool) {
        if self.get(name).exists != exists {
            self.get(name).exists = exists;
            self.notify_changed(name);
        }
    }

    pub fn set_subnamespace_of(&mut self, name: &str, parent: Option<&str>) {
        let parent = parent.map(str::to_string);
        if self.get(name).subnamespace_of != parent {
            self.get(name).subnamespace_of = parent;
            self.notify_changed(name);
        }
    }

    pub fn set_external(
        &mut self,
        name: &str,
        manager: Option<&str>,
        tree_labels: BTreeMap<String, u32>,
    ) {
        let manager = manager.map(str::to_string);
        let node = self.get(name);
        if node.external_manager != manager || node.external_tree_labels != tree_labels {
            node.external_manager = manager;
            node.external_tree_labels = tree_labels;
            self.notify_subtree(name);
        }
    }

    pub fn set_labels(&mut self, name: &str, labels: BTreeMap<String, String>) {
        let labels: BTreeMap<String, String> = labels
            .into_iter()
            .filter(|(k, _)| keys::depth_label_ancestor(k).is_none())
            .collect();
        if self.get(name).labels != labels {
            self.get(name).labels = labels;
            self.notify_changed(name);
        }
    }

    pub fn set_allow_cascading_deletion(&mut self, name: &str, allow: bool) {
        self.get(name).allow_cascading_deletion = allow;
    }

    /// Records managed metadata; descendants inherit it so the whole subtree changes
    pub fn set_managed_metadata(
        &mut self,
        name: &str,
        labels: Vec<MetaKvp>,
        annotations: Vec<MetaKvp>,
    ) {
        let node = self.get(name);
        if node.managed_labels != labels || node.managed_annotations != annotations {
            node.managed_labels = labels;
            node.managed_annotations = annotations;
            self.notify_subtree(name);
        }
    }

    pub fn set_anchors(&mut self, name: &str, anchors: BTreeSet<String>) {
        if self.get(name).anchors != anchors {
            self.get(name).anchors = anchors;
            self.notify_changed(name);
        }
    }

    pub fn add_anchor(&mut self, name: &str, anchor: &str) -> bool {
        let added = self.get(name).anchors.insert(anchor.to_string());
        if added {
            self.notify_changed(anchor);
        }
        added
    }

    pub fn remove_anchor(&mut self, name: &str, anchor: &str) -> bool {
        let removed = self.get(name).anchors.remove(anchor);
        if removed {
            self.notify_changed(anchor);
        }
        removed
    }

    // ========== Structure ==========

    /// Proposed path that `set_parent(child, parent)` would turn into a cycle
    pub fn cycle_path(&self, child: &str, parent: &str) -> Option<Vec<String>> {
        if child == parent {
            return Some(vec![child.to_string(), child.to_string()]);
        }
        let mut path = vec![child.to_string()];
        for ancestor in std::iter::once(parent.to_string()).chain(self.ancestors(parent)) {
            path.push(ancestor.clone());
            if ancestor == child {
                return Some(path);
            }
        }
        None
    }

    /// Moves `child` under `parent` (or makes it a root)
    ///
    /// Returns the namespaces whose ancestry changed: the child and all of its
    /// descendants, nearest first. Nothing changes if the edge would close a
    /// cycle.
    pub fn set_parent(&mut self, child: &str, parent: Option<&str>) -> Result<Vec<String>> {
        let current = self.get(child).parent.clone();
        if current.as_deref() == parent {
            return Ok(Vec::new());
        }

        if let Some(parent) = parent {
            if let Some(path) = self.cycle_path(child, parent) {
                return Err(ForestError::Cycle {
                    child: child.to_string(),
                    parent: parent.to_string(),
                    path,
                });
            }
        }

        if let Some(old) = &current {
            if let Some(old_node) = self.nodes.get_mut(old) {
                old_node.children.remove(child);
            }
        }
        if let Some(parent) = parent {
            self.get(parent).children.insert(child.to_string());
        }
        self.get(child).parent = parent.map(str::to_string);

        debug!(
            namespace = %child,
            old_parent = ?current,
            new_parent = ?parent,
            "Forest parent changed"
        );

        if let Some(old) = &current {
            self.notify_changed(old);
        }
        if let Some(parent) = parent {
            self.notify_changed(parent);
        }

        let mut affected = vec![child.to_string()];
        affected.extend(self.descendants(child));
        for name in &affected {
            self.get(name).hierarchy_generation += 1;
            self.notify_changed(name);
        }
        Ok(affected)
    }

    /// Ancestors nearest first, excluding `name`; stops if a loop is found
    pub fn ancestors(&self, name: &str) -> Vec<String> {
        let mut seen = BTreeSet::from([name.to_string()]);
        let mut out = Vec::new();
        let mut cursor = self.nodes.get(name).and_then(|n| n.parent.clone());
        while let Some(current) = cursor {
            if !seen.insert(current.clone()) {
                break;
            }
            cursor = self.nodes.get(&current).and_then(|n| n.parent.clone());
            out.push(current);
        }
        out
    }

    /// Root first, ending with `name` itself
    pub fn ancestry(&self, name: &str) -> Vec<String> {
        let mut chain = self.ancestors(name);
        chain.reverse();
        chain.push(name.to_string());
        chain
    }

    /// Descendants in breadth-first (depth) order, excluding `name`
    pub fn descendants(&self, name: &str) -> Vec<String> {
        let mut seen = BTreeSet::from([name.to_string()]);
        let mut out = Vec::new();
        let mut queue = VecDeque::from([name.to_string()]);
        while let Some(current) = queue.pop_front() {
            let Some(node) = self.nodes.get(&current) else {
                continue;
            };
            for child in &node.children {
                if seen.insert(child.clone()) {
                    out.push(child.clone());
                    queue.push_back(child.clone());
                }
            }
        }
        out
    }

    pub fn is_ancestor(&self, ancestor: &str, name: &str) -> bool {
        self.ancestors(name).iter().any(|a| a == ancestor)
    }

    /// True if the node or any ancestor allows cascading deletion
    pub fn allows_cascading_deletion(&self, name: &str) -> bool {
        std::iter::once(name.to_string())
            .chain(self.ancestors(name))
            .any(|n| {
                self.nodes
                    .get(&n)
                    .is_some_and(|node| node.allow_cascading_deletion)
            })
    }

    /// Subnamespaces anywhere below `name`
    pub fn subnamespace_descendants(&self, name: &str) -> Vec<String> {
        self.descendants(name)
            .into_iter()
            .filter(|d| self.nodes.get(d).is_some_and(NamespaceNode::is_subnamespace))
            .collect()
    }

    /// Depth labels the namespace object should carry
    ///
    /// One entry per ancestor including the namespace itself at depth 0. If
    /// the root of the chain is externally managed, the tree labels its owner
    /// publishes are carried over, shifted by the root's depth.
    pub fn depth_labels(&self, name: &str) -> BTreeMap<String, String> {
        let chain = self.ancestry(name);
        let depth_of_self = chain.len() - 1;
        let mut labels = BTreeMap::new();

        if let Some(root) = chain.first().and_then(|r| self.nodes.get(r)) {
            for (ancestor, depth) in &root.external_tree_labels {
                labels.insert(
                    keys::depth_label(ancestor),
                    (*depth as usize + depth_of_self).to_string(),
                );
            }
        }
        for (i, ancestor) in chain.iter().enumerate() {
            labels.insert(keys::depth_label(ancestor), (depth_of_self - i).to_string());
        }
        labels
    }

    /// Labels the selectors of propagated objects are evaluated against
    pub fn selector_labels(&self, name: &str) -> BTreeMap<String, String> {
        let mut labels = self
            .nodes
            .get(name)
            .map(|n| n.labels.clone())
            .unwrap_or_default();
        labels.extend(self.depth_labels(name));
        labels
    }

    /// Managed metadata applying to `name`: inherited, with closer declarations winning
    pub fn effective_managed_metadata(&self, name: &str) -> (Vec<MetaKvp>, Vec<MetaKvp>) {
        let mut labels = BTreeMap::new();
        let mut annotations = BTreeMap::new();
        for n in self.ancestry(name) {
            if let Some(node) = self.nodes.get(&n) {
                for kvp in &node.managed_labels {
                    labels.insert(kvp.key.clone(), kvp.value.clone());
                }
                for kvp in &node.managed_annotations {
                    annotations.insert(kvp.key.clone(), kvp.value.clone());
                }
            }
        }
        let to_kvps = |m: BTreeMap<String, String>| {
            m.into_iter()
                .map(|(key, value)| MetaKvp { key, value })
                .collect()
        };
        (to_kvps(labels), to_kvps(annotations))
    }

    // ========== Conditions ==========

    /// Replaces the conditions owned by `source`; returns true if anything changed
    pub fn set_conditions(
        &mut self,
        name: &str,
        source: ConditionSource,
        conditions: Vec<Condition>,
    ) -> bool {
        let node = self.get(name);
        let previous = node.conditions.get(&source).cloned().unwrap_or_default();
        if previous == conditions {
            return false;
        }
        let was_critical = previous.iter().any(Condition::is_critical);
        let is_critical = conditions.iter().any(Condition::is_critical);
        if conditions.is_empty() {
            node.conditions.remove(&source);
        } else {
            node.conditions.insert(source, conditions);
        }

        if was_critical != is_critical {
            // Halting changes for the entire subtree
            self.notify_subtree(name);
        } else {
            self.notify_changed(name);
        }
        true
    }

    pub fn set_condition(&mut self, name: &str, source: ConditionSource, condition: Condition) -> bool {
        self.set_conditions(name, source, vec![condition])
    }

    pub fn clear_conditions(&mut self, name: &str, source: &ConditionSource) -> bool {
        if self.nodes.get(name).is_some_and(|n| n.conditions.contains_key(source)) {
            return self.set_conditions(name, source.clone(), Vec::new());
        }
        false
    }

    /// Clears all object conditions for one kind in every namespace
    pub fn clear_object_conditions(&mut self, resource: &GroupResource) {
        let targets: Vec<(String, ConditionSource)> = self
            .nodes
            .values()
            .flat_map(|n| {
                n.conditions.keys().filter_map(move |s| match s {
                    ConditionSource::Object { resource: r, .. } if r == resource => {
                        Some((n.name.clone(), s.clone()))
                    }
                    _ => None,
                })
            })
            .collect();
        for (name, source) in targets {
            self.clear_conditions(&name, &source);
        }
    }

    /// Nearest namespace, starting with `name` itself, holding a critical condition
    pub fn critical_ancestor(&self, name: &str) -> Option<String> {
        std::iter::once(name.to_string())
            .chain(self.ancestors(name))
            .find(|n| self.nodes.get(n).is_some_and(NamespaceNode::has_local_critical))
    }

    /// Propagation is halted in a namespace below any critical condition
    pub fn is_halted(&self, name: &str) -> bool {
        self.critical_ancestor(name).is_some()
    }

    /// Namespaces with at least one condition, for status summaries
    pub fn namespaces_with_conditions(&self) -> Vec<(String, Vec<Condition>)> {
        let mut out: Vec<(String, Vec<Condition>)> = self
            .nodes
            .values()
            .filter(|n| n.conditions.values().any(|c| !c.is_empty()))
            .map(|n| (n.name.clone(), n.conditions()))
            .collect();
        out.sort_by(|a, b| a.0.cmp(&b.0));
        out
    }

    // ========== Source objects ==========

    /// Records a source object; returns true if it is new or its content changed
    pub fn set_source(&mut self, resource: &GroupResource, object: DynamicObject) -> bool {
        let Some(namespace) = object.metadata.namespace.clone() else {
            return false;
        };
        let name = object.metadata.name.clone();
        let by_name = self
            .get(&namespace)
            .sources
            .entry(resource.clone())
            .or_default();
        let changed = by_name
            .get(&name)
            .map_or(true, |existing| !existing.same_content(&object));
        by_name.insert(name.clone(), object);
        if changed {
            self.notify_source(resource, &namespace, &name);
        }
        changed
    }

    pub fn remove_source(&mut self, resource: &GroupResource, namespace: &str, name: &str) -> bool {
        let removed = self
            .nodes
            .get_mut(namespace)
            .and_then(|n| n.sources.get_mut(resource))
            .and_then(|m| m.remove(name))
            .is_some();
        if removed {
            self.notify_source(resource, namespace, name);
        }
        removed
    }

    /// Drops every source of a kind, e.g. when it stops being propagated
    pub fn clear_sources(&mut self, resource: &GroupResource) {
        for node in self.nodes.values_mut() {
            node.sources.remove(resource);
        }
    }

    pub fn source(&self, resource: &GroupResource, namespace: &str, name: &str) -> Option<&DynamicObject> {
        self.nodes.get(namespace).and_then(|n| n.source(resource, name))
    }

    /// The source a copy of `name` in `namespace` must mirror: nearest strict ancestor wins
    pub fn effective_source(
        &self,
        resource: &GroupResource,
        namespace: &str,
        name: &str,
    ) -> Option<(String, &DynamicObject)> {
        self.ancestors(namespace).into_iter().find_map(|ancestor| {
            self.nodes
                .get(&ancestor)
                .and_then(|n| n.source(resource, name))
                .map(|obj| (ancestor.clone(), obj))
        })
    }

    /// Names of sources of a kind visible from `namespace` through its ancestors
    pub fn inherited_source_names(&self, resource: &GroupResource, namespace: &str) -> BTreeSet<String> {
        self.ancestors(namespace)
            .iter()
            .filter_map(|a| self.nodes.get(a))
            .flat_map(|n| n.sources(resource).map(|o| o.metadata.name.clone()))
            .collect()
    }

    pub fn num_sources(&self, resource: &GroupResource) -> usize {
        self.nodes.values().map(|n| n.num_sources(resource)).sum()
    }

    // ========== Notifications ==========

    /// Marks the hierarchy reconciler as caught up with `name`
    pub fn mark_observed(&mut self, name: &str) {
        let node = self.get(name);
        node.observed_generation = node.hierarchy_generation;
    }

    /// Publishes a hierarchy change for `name`
    pub fn notify_changed(&mut self, name: &str) {
        self.publish(Change::Hierarchy {
            namespace: name.to_string(),
        });
    }

    /// Publishes a hierarchy change for `name` and every descendant
    pub fn notify_subtree(&mut self, name: &str) {
        self.notify_changed(name);
        for d in self.descendants(name) {
            self.notify_changed(&d);
        }
    }

    fn notify_source(&mut self, resource: &GroupResource, namespace: &str, name: &str) {
        self.publish(Change::Source {
            resource: resource.clone(),
            namespace: namespace.to_string(),
            name: name.to_string(),
        });
    }

    fn publish(&mut self, change: Change) {
        self.seq += 1;
        // No listeners is fine
        let _ = self.events_tx.send(ForestEvent {
            seq: self.seq,
            change,
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use hnc_types::{ApiResource, ConditionCode, ObjectMeta};
    use proptest::prelude::*;

    fn chain(forest: &Forest, names: &[&str]) {
        let mut state = forest.lock();
        for pair in names.windows(2) {
            state.set_parent(pair[1], Some(pair[0])).unwrap();
        }
    }

    #[test]
    fn test_set_parent_maintains_children() {
        let forest = Forest::new();
        chain(&forest, &["a", "b", "c"]);
        let mut state = forest.lock();

        assert_eq!(state.get_opt("b").unwrap().parent(), Some("a"));
        assert_eq!(state.get_opt("a").unwrap().child_names(), vec!["b"]);
        assert_eq!(state.ancestry("c"), vec!["a", "b", "c"]);
        assert_eq!(state.descendants("a"), vec!["b", "c"]);

        state.set_parent("c", Some("a")).unwrap();
        assert!(state.get_opt("b").unwrap().child_names().is_empty());
        assert_eq!(state.get_opt("a").unwrap().child_names(), vec!["b", "c"]);
    }

    #[test]
    fn test_cycle_rejected() {
        let forest = Forest::new();
        chain(&forest, &["a", "b", "c"]);
        let mut state = forest.lock();

        let err = state.set_parent("a", Some("c")).unwrap_err();
        let ForestError::Cycle { path, .. } = &err;
        assert_eq!(path, &vec!["a", "c", "b", "a"]);
        assert!(err.to_string().contains("cycle"));
        assert_eq!(state.get_opt("a").unwrap().parent(), None);

        assert!(state.set_parent("a", Some("a")).is_err());
    }

    #[test]
    fn test_depth_labels() {
        let forest = Forest::new();
        chain(&forest, &["foo", "bar"]);
        let state = forest.lock();
        let labels = state.depth_labels("bar");
        assert_eq!(labels.len(), 2);
        assert_eq!(labels["foo.tree.hnc.x-k8s.io/depth"], "1");
        assert_eq!(labels["bar.tree.hnc.x-k8s.io/depth"], "0");
    }

    #[test]
    fn test_external_tree_labels_are_shifted() {
        let forest = Forest::new();
        chain(&forest, &["ext", "child"]);
        let mut state = forest.lock();
        state.set_external(
            "ext",
            Some("other-tool"),
            BTreeMap::from([("org".to_string(), 2)]),
        );
        let labels = state.depth_labels("child");
        assert_eq!(labels["org.tree.hnc.x-k8s.io/depth"], "3");
        assert_eq!(labels["ext.tree.hnc.x-k8s.io/depth"], "1");
    }

    #[test]
    fn test_cascading_deletion_is_inherited() {
        let forest = Forest::new();
        chain(&forest, &["a", "b", "c"]);
        let mut state = forest.lock();
        assert!(!state.allows_cascading_deletion("c"));
        state.set_allow_cascading_deletion("a", true);
        assert!(state.allows_cascading_deletion("c"));
        assert!(!state.allows_cascading_deletion("unrelated"));
    }

    #[test]
    fn test_critical_ancestor_halts_subtree() {
        let forest = Forest::new();
        chain(&forest, &["a", "b", "c"]);
        let mut state = forest.lock();
        state.set_condition(
            "b",
            ConditionSource::Hierarchy,
            Condition::new(ConditionCode::CritParentMissing, "ParentMissing", "gone"),
        );
        assert_eq!(state.critical_ancestor("c").as_deref(), Some("b"));
        assert!(!state.is_halted("a"));

        state.clear_conditions("b", &ConditionSource::Hierarchy);
        assert!(!state.is_halted("c"));
    }

    #[test]
    fn test_effective_source_prefers_nearest() {
        let forest = Forest::new();
        chain(&forest, &["a", "b", "c"]);
        let gr = GroupResource::new("rbac.authorization.k8s.io", "roles");
        let api = ApiResource::roles();
        let mut state = forest.lock();

        state.set_source(&gr, DynamicObject::new(&api, ObjectMeta::namespaced("a", "r")));
        assert_eq!(state.effective_source(&gr, "c", "r").unwrap().0, "a");

        state.set_source(&gr, DynamicObject::new(&api, ObjectMeta::namespaced("b", "r")));
        assert_eq!(state.effective_source(&gr, "c", "r").unwrap().0, "b");
        assert!(state.effective_source(&gr, "a", "r").is_none());

        assert_eq!(state.num_sources(&gr), 2);
        assert!(state.remove_source(&gr, "b", "r"));
        assert_eq!(state.effective_source(&gr, "c", "r").unwrap().0, "a");
    }

    #[tokio::test]
    async fn test_notifications_are_ordered() {
        let forest = Forest::new();
        let mut rx = forest.subscribe();
        chain(&forest, &["a", "b"]);

        let mut last = 0;
        while let Ok(event) = rx.try_recv() {
            assert!(event.seq > last);
            last = event.seq;
        }
        assert!(last > 0);
    }

    #[test]
    fn test_reclaim_only_quiescent() {
        let forest = Forest::new();
        let mut state = forest.lock();
        state.get("lonely");
        assert!(state.reclaim("lonely"));

        state.set_parent("b", Some("a")).unwrap();
        assert!(!state.reclaim("a"));
    }

    // ========== Property tests ==========

    const NAMES: [&str; 6] = ["a", "b", "c", "d", "e", "f"];

    fn edit_strategy() -> impl Strategy<Value = Vec<(usize, Option<usize>)>> {
        proptest::collection::vec(
            (0..NAMES.len(), proptest::option::of(0..NAMES.len())),
            0..40,
        )
    }

    fn check_invariants(state: &ForestState) {
        for name in state.names() {
            let node = state.get_opt(&name).unwrap();
            if let Some(parent) = node.parent() {
                // Parent is a known node and lists us as a child
                let parent_node = state.get_opt(parent).expect("parent exists");
                assert!(parent_node.children().any(|c| c == name));
            }
            for child in node.children() {
                assert_eq!(state.get_opt(child).unwrap().parent(), Some(name.as_str()));
            }

            // Walking up terminates without revisiting a node
            let ancestors = state.ancestors(&name);
            let unique: BTreeSet<&String> = ancestors.iter().collect();
            assert_eq!(unique.len(), ancestors.len());
            let root = ancestors.last().cloned().unwrap_or_else(|| name.clone());
            assert_eq!(state.get_opt(&root).unwrap().parent(), None);

            let labels = state.depth_labels(&name);
            assert_eq!(labels.len(), ancestors.len() + 1);
            assert_eq!(labels[&keys::depth_label(&name)], "0");
            for (i, a) in ancestors.iter().enumerate() {
                assert_eq!(labels[&keys::depth_label(a)], (i + 1).to_string());
            }
        }
    }

    proptest! {
        #[test]
        fn property_edits_preserve_invariants(edits in edit_strategy()) {
            let forest = Forest::new();
            let mut state = forest.lock();
            for (child, parent) in edits {
                let _ = state.set_parent(NAMES[child], parent.map(|p| NAMES[p]));
                check_invariants(&state);
            }
        }

        #[test]
        fn property_set_parent_round_trip(
            edits in edit_strategy(),
            child in 0..NAMES.len(),
            parent in proptest::option::of(0..NAMES.len()),
        ) {
            let forest = Forest::new();
            let mut state = forest.lock();
            for (c, p) in edits {
                let _ = state.set_parent(NAMES[c], p.map(|p| NAMES[p]));
            }

            let child = NAMES[child];
            let snapshot: Vec<(String, Option<String>)> = state
                .names()
                .into_iter()
                .map(|n| {
                    let parent = state.get_opt(&n).unwrap().parent().map(str::to_string);
                    (n, parent)
                })
                .collect();
            let old_parent = state.get(child).parent().map(str::to_string);

            if state.set_parent(child, parent.map(|p| NAMES[p])).is_ok() {
                state.set_parent(child, old_parent.as_deref()).unwrap();
            }

            for (name, parent) in snapshot {
                prop_assert_eq!(
                    state.get_opt(&name).unwrap().parent().map(str::to_string),
                    parent
                );
            }
            check_invariants(&state);
        }
    }
}
