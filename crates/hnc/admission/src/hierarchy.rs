//! Validation of `HierarchyConfiguration` writes

use crate::exempt;
use async_trait::async_trait;
use hnc_client::AdmissionHook;
use hnc_forest::Forest;
use hnc_types::admission::{AdmissionRequest, AdmissionResponse, DenialReason, Operation};
use hnc_types::{keys, ApiResource, GroupResource, HierarchyConfiguration, HncOptions};
use std::sync::Arc;
use tracing::info;

pub struct HierarchyValidator {
    forest: Arc<Forest>,
    options: Arc<HncOptions>,
}

impl HierarchyValidator {
    pub fn new(forest: Arc<Forest>, options: Arc<HncOptions>) -> Self {
        Self { forest, options }
    }

    /// Why `namespace` may not move under `parent`, if it may not
    fn check_parent(&self, namespace: &str, parent: Option<&str>) -> Option<(DenialReason, String)> {
        let forest = self.forest.lock();
        let node = forest.get_opt(namespace);

        if let Some(manager) = node.and_then(|n| n.external_manager()) {
            if parent.is_some() {
                return Some((
                    DenialReason::Forbidden,
                    format!("namespace {namespace} is managed by {manager}; its parent cannot be set"),
                ));
            }
        }
        if let Some(owner) = node.and_then(|n| n.subnamespace_of()) {
            if parent != Some(owner) {
                return Some((
                    DenialReason::Forbidden,
                    format!("{namespace} is a subnamespace of {owner}; its parent cannot be changed"),
                ));
            }
        }

        let parent = parent?;
        if self.options.is_excluded_namespace(parent) {
            return Some((
                DenialReason::Forbidden,
                format!("{parent} is excluded from HNC and cannot be a parent"),
            ));
        }
        if !forest.exists(parent) {
            return Some((
                DenialReason::Forbidden,
                format!("parent namespace {parent} does not exist"),
            ));
        }
        if let Some(path) = forest.cycle_path(namespace, parent) {
            return Some((
                DenialReason::Conflict,
                format!(
                    "setting the parent of {namespace} to {parent} would create a cycle: {}",
                    path.join(" <- ")
                ),
            ));
        }
        None
    }

    fn check_metadata(&self, hc: &HierarchyConfiguration) -> Vec<String> {
        let labels = hc
            .spec
            .labels
            .iter()
            .filter(|kvp| !self.options.is_managed_label(&kvp.key))
            .map(|kvp| format!("label {} is not a managed label", kvp.key));
        let annotations = hc
            .spec
            .annotations
            .iter()
            .filter(|kvp| !self.options.is_managed_annotation(&kvp.key))
            .map(|kvp| format!("annotation {} is not a managed annotation", kvp.key));
        labels.chain(annotations).collect()
    }
}

#[async_trait]
impl AdmissionHook for HierarchyValidator {
    fn name(&self) -> &str {
        "hierarchy-validator"
    }

    fn handles(&self, resource: &GroupResource) -> bool {
        *resource == ApiResource::hierarchy_configurations().group_resource()
    }

    async fn review(&self, request: &AdmissionRequest) -> AdmissionResponse {
        let uid = request.uid.as_str();
        if exempt(&self.options, request) || request.operation == Operation::Delete {
            return AdmissionResponse::allow(uid);
        }
        let hc = match request.decode::<HierarchyConfiguration>() {
            Ok(Some(hc)) => hc,
            Ok(None) => return AdmissionResponse::allow(uid),
            Err(e) => return AdmissionResponse::deny(uid, DenialReason::BadRequest, e.to_string()),
        };
        if hc.metadata.name != keys::HIERARCHY_SINGLETON {
            return AdmissionResponse::deny(
                uid,
                DenialReason::Invalid,
                format!("hierarchy configurations must be named {:?}", keys::HIERARCHY_SINGLETON),
            );
        }
        let namespace = request.namespace.clone().unwrap_or_default();
        if self.options.is_excluded_namespace(&namespace) {
            return AdmissionResponse::deny(
                uid,
                DenialReason::Forbidden,
                format!("{namespace} is excluded from HNC"),
            );
        }

        let old_parent = request
            .decode_old::<HierarchyConfiguration>()
            .ok()
            .flatten()
            .and_then(|old| old.parent().map(str::to_string));
        if hc.parent() != old_parent.as_deref() {
            if let Some((reason, message)) = self.check_parent(&namespace, hc.parent()) {
                info!(namespace = %namespace, %reason, %message, "Denied hierarchy change");
                return AdmissionResponse::deny(uid, reason, message);
            }
        }

        let problems = self.check_metadata(&hc);
        if !problems.is_empty() {
            let message = problems.join("; ");
            info!(namespace = %namespace, %message, "Denied hierarchy metadata");
            return AdmissionResponse::deny(uid, DenialReason::Invalid, message);
        }
        AdmissionResponse::allow(uid)
    }
}
