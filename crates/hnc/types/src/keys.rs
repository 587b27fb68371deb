//! Well-known names used on the wire
//!
//! Every label, annotation and finalizer HNC reads or writes is declared here so
//! reconcilers and admission hooks agree on the exact spelling.

/// API group of all HNC custom kinds
pub const GROUP: &str = "hnc.x-k8s.io";

/// API version of all HNC custom kinds
pub const VERSION: &str = "v1alpha2";

/// Group served by the aggregated reader
pub const RESOURCES_GROUP: &str = "resources.hnc.x-k8s.io";

/// Version served by the aggregated reader
pub const RESOURCES_VERSION: &str = "v1alpha1";

/// Name of the per-namespace hierarchy configuration singleton
pub const HIERARCHY_SINGLETON: &str = "hierarchy";

/// Name of the cluster-wide HNC configuration singleton
pub const CONFIG_SINGLETON: &str = "config";

// ========== Labels ==========

/// Suffix of depth labels; the full key is `<ancestor>.tree.hnc.x-k8s.io/depth`
pub const LABEL_TREE_DEPTH_SUFFIX: &str = ".tree.hnc.x-k8s.io/depth";

/// Marks namespaces that HNC manages
pub const LABEL_INCLUDED_NAMESPACE: &str = "hnc.x-k8s.io/included-namespace";

/// Label stripped from propagated copies so other tools do not claim them
pub const LABEL_APP_MANAGED_BY: &str = "app.kubernetes.io/managed-by";

// ========== Annotations ==========

/// Set on namespaces created from an anchor; the value is the parent namespace
pub const ANNOTATION_SUBNAMESPACE_OF: &str = "hnc.x-k8s.io/subnamespace-of";

/// Names a foreign hierarchy owner of a namespace
pub const ANNOTATION_MANAGED_BY: &str = "hnc.x-k8s.io/managed-by";

/// Provenance of a propagated copy: the namespace holding the source object
pub const ANNOTATION_INHERITED_FROM: &str = "hnc.x-k8s.io/inherited-from";

/// Fingerprint of the source object a copy was produced from
pub const ANNOTATION_SOURCE_VERSION: &str = "hnc.x-k8s.io/source-version";

/// Prefix shared by all propagation selector annotations
pub const ANNOTATION_PROPAGATE_PREFIX: &str = "propagate.hnc.x-k8s.io";

/// Label selector evaluated against destination namespace labels
pub const ANNOTATION_SELECTOR: &str = "propagate.hnc.x-k8s.io/select";

/// Comma-separated list of subtrees to include (`name`) or exclude (`!name`)
pub const ANNOTATION_TREE_SELECTOR: &str = "propagate.hnc.x-k8s.io/treeSelect";

/// `"true"` disables propagation of the annotated object entirely
pub const ANNOTATION_NONE_SELECTOR: &str = "propagate.hnc.x-k8s.io/none";

// ========== Finalizers ==========

/// Held on anchors until the owned subnamespace has been cleaned up
pub const FINALIZER_ANCHOR: &str = "hnc.x-k8s.io";

/// Held on hierarchy configurations while the namespace still has anchors
pub const FINALIZER_HAS_SUBNAMESPACE: &str = "hnc.x-k8s.io/hasSubnamespace";

/// Held on propagated copies; only the object propagator removes it
pub const FINALIZER_PROPAGATED: &str = "hnc.x-k8s.io/propagated";

/// Value of [`ANNOTATION_MANAGED_BY`] that means HNC itself manages the namespace
pub const MANAGED_BY_HNC: &str = GROUP;

/// Full depth label key for an ancestor
pub fn depth_label(ancestor: &str) -> String {
    format!("{}{}", ancestor, LABEL_TREE_DEPTH_SUFFIX)
}

/// Returns the ancestor named by a depth label key, if the key is one
pub fn depth_label_ancestor(key: &str) -> Option<&str> {
    key.strip_suffix(LABEL_TREE_DEPTH_SUFFIX)
        .filter(|ancestor| !ancestor.is_empty())
}

/// Is this key one of the HNC-reserved metadata keys users may not set on copies?
pub fn is_hnc_key(key: &str) -> bool {
    key.starts_with("hnc.x-k8s.io/")
        || key.ends_with(LABEL_TREE_DEPTH_SUFFIX)
        || key.starts_with(ANNOTATION_PROPAGATE_PREFIX)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_depth_label_round_trip() {
        let key = depth_label("team-a");
        assert_eq!(key, "team-a.tree.hnc.x-k8s.io/depth");
        assert_eq!(depth_label_ancestor(&key), Some("team-a"));
    }

    #[test]
    fn test_depth_label_ancestor_rejects_other_keys() {
        assert_eq!(depth_label_ancestor("app"), None);
        assert_eq!(depth_label_ancestor(LABEL_TREE_DEPTH_SUFFIX), None);
    }

    #[test]
    fn test_is_hnc_key() {
        assert!(is_hnc_key(ANNOTATION_INHERITED_FROM));
        assert!(is_hnc_key(ANNOTATION_SELECTOR));
        assert!(is_hnc_key(&depth_label("a")));
        assert!(!is_hnc_key("team"));
    }
}
