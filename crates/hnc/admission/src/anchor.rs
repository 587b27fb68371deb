//! Validation of `SubnamespaceAnchor` writes

use crate::exempt;
use async_trait::async_trait;
use hnc_client::AdmissionHook;
use hnc_forest::Forest;
use hnc_types::admission::{AdmissionRequest, AdmissionResponse, DenialReason, Operation};
use hnc_types::selector::is_dns_label;
use hnc_types::{AnchorState, ApiResource, GroupResource, HncOptions, SubnamespaceAnchor};
use std::sync::Arc;
use tracing::info;

pub struct AnchorValidator {
    forest: Arc<Forest>,
    options: Arc<HncOptions>,
}

impl AnchorValidator {
    pub fn new(forest: Arc<Forest>, options: Arc<HncOptions>) -> Self {
        Self { forest, options }
    }

    fn check_create(&self, parent: &str, name: &str) -> Option<(DenialReason, String)> {
        if self.options.is_excluded_namespace(parent) {
            return Some((
                DenialReason::Forbidden,
                format!("{parent} is excluded from HNC; subnamespaces cannot be created in it"),
            ));
        }
        if !is_dns_label(name) {
            return Some((
                DenialReason::Invalid,
                format!("{name:?} is not a valid namespace name"),
            ));
        }
        let forest = self.forest.lock();
        match forest.get_opt(name).and_then(|n| n.subnamespace_of()) {
            Some(owner) if owner != parent => Some((
                DenialReason::Conflict,
                format!("{name} is already a subnamespace of {owner}"),
            )),
            _ => None,
        }
    }

    fn check_delete(&self, anchor: &SubnamespaceAnchor) -> Option<(DenialReason, String)> {
        // Only an anchor that owns its namespace can take a subtree with it
        if anchor.status.state != Some(AnchorState::Ok) {
            return None;
        }
        let (parent, name) = (anchor.parent(), anchor.metadata.name.as_str());
        let forest = self.forest.lock();
        if forest.get_opt(name).and_then(|n| n.subnamespace_of()) != Some(parent) {
            return None;
        }
        // Any child counts: deleting the namespace takes or orphans the whole subtree
        let descendants = forest.descendants(name);
        if descendants.is_empty() || forest.allows_cascading_deletion(name) {
            return None;
        }
        Some((
            DenialReason::Forbidden,
            format!(
                "{name} is not a leaf (descendants: {}); set allowCascadingDeletion on {name} or an ancestor to delete it",
                descendants.join(", ")
            ),
        ))
    }
}

#[async_trait]
impl AdmissionHook for AnchorValidator {
    fn name(&self) -> &str {
        "anchor-validator"
    }

    fn handles(&self, resource: &GroupResource) -> bool {
        *resource == ApiResource::subnamespace_anchors().group_resource()
    }

    async fn review(&self, request: &AdmissionRequest) -> AdmissionResponse {
        let uid = request.uid.as_str();
        if exempt(&self.options, request) {
            return AdmissionResponse::allow(uid);
        }
        let anchor = match request.decode::<SubnamespaceAnchor>() {
            Ok(Some(anchor)) => anchor,
            Ok(None) => return AdmissionResponse::allow(uid),
            Err(e) => return AdmissionResponse::deny(uid, DenialReason::BadRequest, e.to_string()),
        };
        let denial = match request.operation {
            Operation::Create => self.check_create(anchor.parent(), &anchor.metadata.name),
            Operation::Delete => self.check_delete(&anchor),
            Operation::Update => None,
        };
        match denial {
            Some((reason, message)) => {
                info!(parent = %anchor.parent(), anchor = %anchor.metadata.name, %reason, %message, "Denied anchor change");
                AdmissionResponse::deny(uid, reason, message)
            }
            None => AdmissionResponse::allow(uid),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::user_request;

    fn validator() -> AnchorValidator {
        let forest = Arc::new(Forest::new());
        {
            let mut f = forest.lock();
            for ns in ["foo", "bar", "baz", "other"] {
                f.set_exists(ns, true);
            }
            f.set_subnamespace_of("bar", Some("foo"));
            f.set_parent("bar", Some("foo")).unwrap();
            f.set_subnamespace_of("baz", Some("bar"));
            f.set_parent("baz", Some("bar")).unwrap();
        }
        AnchorValidator::new(forest, Arc::new(HncOptions::default()))
    }

    fn ok_anchor(parent: &str, name: &str) -> SubnamespaceAnchor {
        let mut anchor = SubnamespaceAnchor::new(parent, name);
        anchor.status.state = Some(AnchorState::Ok);
        anchor
    }

    #[tokio::test]
    async fn test_create_rules() {
        let v = validator();
        let excluded_parent = SubnamespaceAnchor::new("kube-system", "x");
        assert!(!v.review(&user_request(Operation::Create, &excluded_parent)).await.allowed);

        let bad_name = SubnamespaceAnchor::new("foo", "Not_A_Label");
        assert!(!v.review(&user_request(Operation::Create, &bad_name)).await.allowed);

        let taken = SubnamespaceAnchor::new("other", "bar");
        assert!(!v.review(&user_request(Operation::Create, &taken)).await.allowed);

        // Left to the reconciler, which reports Forbidden or Conflict
        let excluded_name = SubnamespaceAnchor::new("foo", "kube-system");
        assert!(v.review(&user_request(Operation::Create, &excluded_name)).await.allowed);
        let existing = SubnamespaceAnchor::new("foo", "other");
        assert!(v.review(&user_request(Operation::Create, &existing)).await.allowed);
    }

    #[tokio::test]
    async fn test_delete_needs_cascading_for_subtrees() {
        let v = validator();
        let anchor = ok_anchor("foo", "bar");
        let denied = v.review(&user_request(Operation::Delete, &anchor)).await;
        assert!(!denied.allowed);
        assert!(denied.message().unwrap().contains("allowCascadingDeletion"));

        v.forest.lock().set_allow_cascading_deletion("foo", true);
        assert!(v.review(&user_request(Operation::Delete, &anchor)).await.allowed);

        let leaf = ok_anchor("bar", "baz");
        assert!(v.review(&user_request(Operation::Delete, &leaf)).await.allowed);
    }

    #[tokio::test]
    async fn test_delete_counts_full_children() {
        let v = validator();
        {
            let mut f = v.forest.lock();
            f.set_exists("full", true);
            f.set_parent("full", Some("baz")).unwrap();
        }
        // baz's only child is a regular namespace, not a subnamespace
        let anchor = ok_anchor("bar", "baz");
        let denied = v.review(&user_request(Operation::Delete, &anchor)).await;
        assert!(!denied.allowed);
        assert!(denied.message().unwrap().contains("full"));

        v.forest.lock().set_allow_cascading_deletion("baz", true);
        assert!(v.review(&user_request(Operation::Delete, &anchor)).await.allowed);
    }
}
