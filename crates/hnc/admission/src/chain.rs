//! Routes webhook paths to hooks and registers them with an in-memory cluster

use crate::anchor::AnchorValidator;
use crate::config::HncConfigValidator;
use crate::error::{AdmissionError, Result};
use crate::hierarchy::HierarchyValidator;
use crate::namespace::{NamespaceMutator, NamespaceValidator};
use crate::object::ObjectValidator;
use hnc_client::{AdmissionHook, InMemoryCluster, ResourceCatalog};
use hnc_forest::Forest;
use hnc_types::admission::{AdmissionResponse, AdmissionReview};
use hnc_types::HncOptions;
use std::sync::Arc;
use tracing::debug;

pub const VALIDATE_HIERARCHY_PATH: &str = "/validate-hnc-x-k8s-io-v1alpha2-hierarchyconfigurations";
pub const VALIDATE_ANCHOR_PATH: &str = "/validate-hnc-x-k8s-io-v1alpha2-subnamespaceanchors";
pub const VALIDATE_CONFIG_PATH: &str = "/validate-hnc-x-k8s-io-v1alpha2-hncconfigurations";
pub const VALIDATE_NAMESPACE_PATH: &str = "/validate-v1-namespace";
pub const VALIDATE_OBJECT_PATH: &str = "/validate-objects";
pub const MUTATE_NAMESPACE_PATH: &str = "/mutate-v1-namespace";

/// Every hook HNC serves, keyed by webhook path
pub struct AdmissionChain {
    hooks: Vec<(&'static str, Arc<dyn AdmissionHook>)>,
}

impl AdmissionChain {
    pub fn new(forest: Arc<Forest>, options: Arc<HncOptions>, catalog: Arc<ResourceCatalog>) -> Self {
        let hooks: Vec<(&'static str, Arc<dyn AdmissionHook>)> = vec![
            (
                VALIDATE_HIERARCHY_PATH,
                Arc::new(HierarchyValidator::new(forest.clone(), options.clone())),
            ),
            (
                VALIDATE_ANCHOR_PATH,
                Arc::new(AnchorValidator::new(forest.clone(), options.clone())),
            ),
            (
                VALIDATE_CONFIG_PATH,
                Arc::new(HncConfigValidator::new(catalog, options.clone())),
            ),
            (
                VALIDATE_NAMESPACE_PATH,
                Arc::new(NamespaceValidator::new(forest.clone(), options.clone())),
            ),
            (
                VALIDATE_OBJECT_PATH,
                Arc::new(ObjectValidator::new(forest, options.clone())),
            ),
            (MUTATE_NAMESPACE_PATH, Arc::new(NamespaceMutator::new(options))),
        ];
        Self { hooks }
    }

    pub fn paths(&self) -> Vec<&'static str> {
        self.hooks.iter().map(|(path, _)| *path).collect()
    }

    pub fn by_path(&self, path: &str) -> Option<&Arc<dyn AdmissionHook>> {
        self.hooks
            .iter()
            .find(|(p, _)| *p == path)
            .map(|(_, hook)| hook)
    }

    /// Puts every hook in front of the cluster's writes
    pub fn register(&self, cluster: &InMemoryCluster) {
        for (_, hook) in &self.hooks {
            cluster.register_hook(hook.clone());
        }
    }

    /// Answers one webhook call
    pub async fn review(&self, path: &str, review: AdmissionReview) -> Result<AdmissionReview> {
        let hook = self
            .by_path(path)
            .ok_or_else(|| AdmissionError::UnknownPath(path.to_string()))?;
        let request = review.request.ok_or(AdmissionError::MissingRequest)?;
        let response = if hook.handles(&request.resource) {
            hook.review(&request).await
        } else {
            debug!(hook = hook.name(), resource = %request.resource, "Resource not governed by hook");
            AdmissionResponse::allow(request.uid.clone())
        };
        Ok(AdmissionReview::response(response))
    }
}
