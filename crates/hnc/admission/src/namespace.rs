//! Namespace admission: deletion guards, reserved metadata and the included label

use crate::exempt;
use async_trait::async_trait;
use hnc_client::AdmissionHook;
use hnc_forest::Forest;
use hnc_types::admission::{
    AdmissionRequest, AdmissionResponse, DenialReason, Operation, PatchOperation,
};
use hnc_types::{keys, ApiResource, GroupResource, HncOptions, Namespace};
use serde_json::json;
use std::sync::Arc;
use tracing::{debug, info};

fn is_namespace(resource: &GroupResource) -> bool {
    *resource == ApiResource::namespaces().group_resource()
}

pub struct NamespaceValidator {
    forest: Arc<Forest>,
    options: Arc<HncOptions>,
}

impl NamespaceValidator {
    pub fn new(forest: Arc<Forest>, options: Arc<HncOptions>) -> Self {
        Self { forest, options }
    }

    fn check_delete(&self, name: &str) -> Option<(DenialReason, String)> {
        let forest = self.forest.lock();
        if let Some(owner) = forest.get_opt(name).and_then(|n| n.subnamespace_of()) {
            let anchored = forest.get_opt(owner).is_some_and(|p| p.has_anchor(name));
            if anchored {
                return Some((
                    DenialReason::Forbidden,
                    format!("{name} is a subnamespace; delete its anchor in {owner} instead"),
                ));
            }
        }
        let subnamespaces = forest.subnamespace_descendants(name);
        if !subnamespaces.is_empty() && !forest.allows_cascading_deletion(name) {
            return Some((
                DenialReason::Forbidden,
                format!(
                    "{name} has subnamespaces ({}); set allowCascadingDeletion on {name} to delete it",
                    subnamespaces.join(", ")
                ),
            ));
        }
        None
    }

    fn check_write(&self, ns: &Namespace, old: Option<&Namespace>) -> Option<(DenialReason, String)> {
        let name = ns.metadata.name.as_str();
        if ns.metadata.label(keys::LABEL_INCLUDED_NAMESPACE).is_some()
            && self.options.is_excluded_namespace(name)
        {
            return Some((
                DenialReason::Forbidden,
                format!("{name} is excluded from HNC and cannot carry {}", keys::LABEL_INCLUDED_NAMESPACE),
            ));
        }
        let previous = old.and_then(Namespace::subnamespace_of);
        if previous.is_some() && previous != ns.subnamespace_of() {
            return Some((
                DenialReason::Forbidden,
                format!("the {} annotation of {name} cannot be changed", keys::ANNOTATION_SUBNAMESPACE_OF),
            ));
        }
        if old.is_none() && ns.subnamespace_of().is_some() {
            return Some((
                DenialReason::Forbidden,
                format!("only HNC may create subnamespaces; create an anchor for {name} instead"),
            ));
        }
        None
    }
}

#[async_trait]
impl AdmissionHook for NamespaceValidator {
    fn name(&self) -> &str {
        "namespace-validator"
    }

    fn handles(&self, resource: &GroupResource) -> bool {
        is_namespace(resource)
    }

    async fn review(&self, request: &AdmissionRequest) -> AdmissionResponse {
        let uid = request.uid.as_str();
        if exempt(&self.options, request) {
            return AdmissionResponse::allow(uid);
        }
        let denial = match request.operation {
            Operation::Delete => self.check_delete(&request.name),
            Operation::Create | Operation::Update => {
                let ns = match request.decode::<Namespace>() {
                    Ok(Some(ns)) => ns,
                    Ok(None) => return AdmissionResponse::allow(uid),
                    Err(e) => {
                        return AdmissionResponse::deny(uid, DenialReason::BadRequest, e.to_string())
                    }
                };
                let old = request.decode_old::<Namespace>().ok().flatten();
                self.check_write(&ns, old.as_ref())
            }
        };
        match denial {
            Some((reason, message)) => {
                info!(namespace = %request.name, operation = %request.operation, %reason, %message, "Denied namespace change");
                AdmissionResponse::deny(uid, reason, message)
            }
            None => AdmissionResponse::allow(uid),
        }
    }
}

/// Labels every managed namespace as included
pub struct NamespaceMutator {
    options: Arc<HncOptions>,
}

impl NamespaceMutator {
    pub fn new(options: Arc<HncOptions>) -> Self {
        Self { options }
    }

    fn patch_for(&self, ns: &Namespace) -> Vec<PatchOperation> {
        if !self.options.is_managed_namespace(&ns.metadata.name)
            || ns.metadata.label(keys::LABEL_INCLUDED_NAMESPACE) == Some("true")
        {
            return Vec::new();
        }
        if ns.metadata.labels.is_empty() {
            let mut labels = serde_json::Map::new();
            labels.insert(keys::LABEL_INCLUDED_NAMESPACE.to_string(), json!("true"));
            vec![PatchOperation::add("/metadata/labels", labels.into())]
        } else {
            vec![PatchOperation::add(
                format!("/metadata/labels/{}", PatchOperation::escape(keys::LABEL_INCLUDED_NAMESPACE)),
                json!("true"),
            )]
        }
    }
}

#[async_trait]
impl AdmissionHook for NamespaceMutator {
    fn name(&self) -> &str {
        "namespace-mutator"
    }

    fn is_mutating(&self) -> bool {
        true
    }

    fn handles(&self, resource: &GroupResource) -> bool {
        is_namespace(resource)
    }

    async fn review(&self, request: &AdmissionRequest) -> AdmissionResponse {
        let uid = request.uid.as_str();
        if request.operation == Operation::Delete {
            return AdmissionResponse::allow(uid);
        }
        let Ok(Some(ns)) = request.decode::<Namespace>() else {
            return AdmissionResponse::allow(uid);
        };
        let ops = self.patch_for(&ns);
        if !ops.is_empty() {
            debug!(namespace = %ns.metadata.name, "Adding included-namespace label");
        }
        match AdmissionResponse::allow(uid).with_patch(&ops) {
            Ok(response) => response,
            Err(e) => AdmissionResponse::deny(uid, DenialReason::InternalError, e.to_string()),
        }
    }
}
