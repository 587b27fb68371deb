//! Validation of writes to propagated kinds
//!
//! Guards copies against user edits and checks the propagation selectors on
//! source objects.

use crate::exempt;
use async_trait::async_trait;
use hnc_client::AdmissionHook;
use hnc_forest::Forest;
use hnc_types::admission::{AdmissionRequest, AdmissionResponse, DenialReason, Operation};
use hnc_types::{keys, ApiResource, DynamicObject, GroupResource, HncOptions, PropagationSelector};
use std::sync::Arc;
use tracing::info;

pub struct ObjectValidator {
    forest: Arc<Forest>,
    options: Arc<HncOptions>,
}

fn inherited_from(object: &DynamicObject) -> Option<&str> {
    object.metadata.annotation(keys::ANNOTATION_INHERITED_FROM)
}

impl ObjectValidator {
    pub fn new(forest: Arc<Forest>, options: Arc<HncOptions>) -> Self {
        Self { forest, options }
    }

    /// Is the copy still backed by a source, i.e. would HNC restore it?
    fn is_live_copy(&self, resource: &GroupResource, namespace: &str, name: &str) -> bool {
        self.forest
            .lock()
            .effective_source(resource, namespace, name)
            .is_some()
    }

    /// Warns when a restricted source cannot reach any descendant
    fn reach_warning(&self, namespace: &str, object: &DynamicObject, selector: &PropagationSelector) -> Option<String> {
        if selector.is_unrestricted() {
            return None;
        }
        let forest = self.forest.lock();
        let reaches = forest
            .descendants(namespace)
            .iter()
            .any(|d| selector.admits(&forest.selector_labels(d)));
        (!reaches).then(|| {
            format!(
                "{} is not propagated to any descendant of {namespace} by its selectors",
                object.metadata.name
            )
        })
    }
}

#[async_trait]
impl AdmissionHook for ObjectValidator {
    fn name(&self) -> &str {
        "object-validator"
    }

    fn handles(&self, resource: &GroupResource) -> bool {
        resource.group != keys::GROUP && *resource != ApiResource::namespaces().group_resource()
    }

    async fn review(&self, request: &AdmissionRequest) -> AdmissionResponse {
        let uid = request.uid.as_str();
        let Some(namespace) = request.namespace.as_deref() else {
            return AdmissionResponse::allow(uid);
        };
        if exempt(&self.options, request) || self.options.is_excluded_namespace(namespace) {
            return AdmissionResponse::allow(uid);
        }
        let decoded = request
            .decode::<DynamicObject>()
            .and_then(|new| Ok((new, request.decode_old::<DynamicObject>()?)));
        let (object, old) = match decoded {
            Ok((Some(object), old)) => (object, old),
            Ok((None, _)) => return AdmissionResponse::allow(uid),
            Err(e) => return AdmissionResponse::deny(uid, DenialReason::BadRequest, e.to_string()),
        };
        let name = object.metadata.name.as_str();

        if let Some(source) = old.as_ref().and_then(inherited_from) {
            if self.is_live_copy(&request.resource, namespace, name) {
                let message = format!(
                    "{} {name} is propagated from {source}; change it there instead",
                    request.resource
                );
                info!(namespace = %namespace, name = %name, operation = %request.operation, "Denied write to propagated copy");
                return AdmissionResponse::deny(uid, DenialReason::Forbidden, message);
            }
        }
        if request.operation == Operation::Delete {
            return AdmissionResponse::allow(uid);
        }

        if old.is_none() && inherited_from(&object).is_some() {
            return AdmissionResponse::deny(
                uid,
                DenialReason::Forbidden,
                format!("only HNC may set the {} annotation", keys::ANNOTATION_INHERITED_FROM),
            );
        }
        let selector = match PropagationSelector::from_annotations(&object.metadata.annotations) {
            Ok(selector) => selector,
            Err(e) => return AdmissionResponse::deny(uid, DenialReason::Invalid, e.to_string()),
        };
        let response = AdmissionResponse::allow(uid);
        match self.reach_warning(namespace, &object, &selector) {
            Some(warning) => response.with_warning(warning),
            None => response,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::dynamic_request;
    use hnc_types::ObjectMeta;

    fn validator() -> ObjectValidator {
        let forest = Arc::new(Forest::new());
        {
            let mut f = forest.lock();
            for ns in ["a", "b"] {
                f.set_exists(ns, true);
            }
            f.set_parent("b", Some("a")).unwrap();
        }
        ObjectValidator::new(forest, Arc::new(HncOptions::default()))
    }

    fn secret(ns: &str, name: &str) -> DynamicObject {
        DynamicObject::new(&ApiResource::secrets(), ObjectMeta::namespaced(ns, name))
    }

    fn copy_of(source: &str, ns: &str, name: &str) -> DynamicObject {
        let mut copy = secret(ns, name);
        copy.metadata
            .annotations
            .insert(keys::ANNOTATION_INHERITED_FROM.into(), source.into());
        copy
    }

    #[tokio::test]
    async fn test_live_copies_are_protected() {
        let v = validator();
        let source = secret("a", "s");
        v.forest
            .lock()
            .set_source(&ApiResource::secrets().group_resource(), source);

        let copy = copy_of("a", "b", "s");
        let edit = v
            .review(&dynamic_request(Operation::Update, Some(&copy), Some(&copy)))
            .await;
        assert!(!edit.allowed);
        let delete = v
            .review(&dynamic_request(Operation::Delete, None, Some(&copy)))
            .await;
        assert!(!delete.allowed);

        // Without a source the copy is stale and may go
        v.forest
            .lock()
            .remove_source(&ApiResource::secrets().group_resource(), "a", "s");
        let stale = v
            .review(&dynamic_request(Operation::Delete, None, Some(&copy)))
            .await;
        assert!(stale.allowed);
    }

    #[tokio::test]
    async fn test_forged_copy_is_denied() {
        let v = validator();
        let forged = copy_of("a", "b", "x");
        let response = v
            .review(&dynamic_request(Operation::Create, Some(&forged), None))
            .await;
        assert!(!response.allowed);
    }

    #[tokio::test]
    async fn test_selectors_are_checked() {
        let v = validator();
        let mut bad = secret("a", "s");
        bad.metadata
            .annotations
            .insert(keys::ANNOTATION_SELECTOR.into(), "!!bad".into());
        let denied = v.review(&dynamic_request(Operation::Create, Some(&bad), None)).await;
        assert!(!denied.allowed);

        let mut nowhere = secret("a", "s");
        nowhere
            .metadata
            .annotations
            .insert(keys::ANNOTATION_TREE_SELECTOR.into(), "!b".into());
        let warned = v
            .review(&dynamic_request(Operation::Create, Some(&nowhere), None))
            .await;
        assert!(warned.allowed);
        assert_eq!(warned.warnings.len(), 1);

        let plain = v
            .review(&dynamic_request(Operation::Create, Some(&secret("a", "t")), None))
            .await;
        assert!(plain.allowed && plain.warnings.is_empty());
    }
}
