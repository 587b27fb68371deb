//! Validation of the `HNCConfiguration` singleton

use crate::exempt;
use async_trait::async_trait;
use hnc_client::{AdmissionHook, ResourceCatalog};
use hnc_types::admission::{AdmissionRequest, AdmissionResponse, DenialReason, Operation};
use hnc_types::{keys, ApiResource, GroupResource, HncConfiguration, HncOptions, SyncMode};
use std::collections::BTreeSet;
use std::sync::Arc;
use tracing::info;

pub struct HncConfigValidator {
    catalog: Arc<ResourceCatalog>,
    options: Arc<HncOptions>,
}

impl HncConfigValidator {
    pub fn new(catalog: Arc<ResourceCatalog>, options: Arc<HncOptions>) -> Self {
        Self { catalog, options }
    }

    fn problems(&self, config: &HncConfiguration) -> Vec<String> {
        let forced: BTreeSet<GroupResource> = ApiResource::always_propagated()
            .iter()
            .map(ApiResource::group_resource)
            .collect();
        let mut seen = BTreeSet::new();
        let mut problems = Vec::new();
        for spec in &config.spec.resources {
            let gr = spec.group_resource();
            if !seen.insert(gr.clone()) {
                problems.push(format!("{gr} is configured more than once"));
            } else if gr.group == keys::GROUP {
                problems.push(format!("{gr} belongs to HNC and cannot be configured"));
            } else if forced.contains(&gr) {
                if spec.mode != SyncMode::Propagate {
                    problems.push(format!("{gr} is always propagated and its mode cannot be changed"));
                }
            } else {
                match self.catalog.resolve(&gr) {
                    Ok(api) if !api.namespaced => {
                        problems.push(format!("{gr} is not namespaced"));
                    }
                    Ok(_) => {}
                    Err(_) => problems.push(format!("{gr} is not served by the platform")),
                }
            }
        }
        problems
    }
}

#[async_trait]
impl AdmissionHook for HncConfigValidator {
    fn name(&self) -> &str {
        "config-validator"
    }

    fn handles(&self, resource: &GroupResource) -> bool {
        *resource == ApiResource::hnc_configurations().group_resource()
    }

    async fn review(&self, request: &AdmissionRequest) -> AdmissionResponse {
        let uid = request.uid.as_str();
        if exempt(&self.options, request) || request.operation == Operation::Delete {
            return AdmissionResponse::allow(uid);
        }
        let config = match request.decode::<HncConfiguration>() {
            Ok(Some(config)) => config,
            Ok(None) => return AdmissionResponse::allow(uid),
            Err(e) => return AdmissionResponse::deny(uid, DenialReason::BadRequest, e.to_string()),
        };
        if config.metadata.name != keys::CONFIG_SINGLETON {
            return AdmissionResponse::deny(
                uid,
                DenialReason::Invalid,
                format!("the configuration must be named {:?}", keys::CONFIG_SINGLETON),
            );
        }
        let problems = self.problems(&config);
        if problems.is_empty() {
            return AdmissionResponse::allow(uid);
        }
        let message = problems.join("; ");
        info!(%message, "Denied configuration change");
        AdmissionResponse::deny(uid, DenialReason::Invalid, message)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::user_request;
    use hnc_types::ResourceSpec;

    fn validator() -> HncConfigValidator {
        HncConfigValidator::new(
            Arc::new(ResourceCatalog::with_builtins()),
            Arc::new(HncOptions::default()),
        )
    }

    fn config(resources: Vec<ResourceSpec>) -> HncConfiguration {
        let mut config = HncConfiguration::new();
        config.spec.resources = resources;
        config
    }

    #[tokio::test]
    async fn test_valid_configuration() {
        let v = validator();
        let ok = config(vec![
            ResourceSpec::new("", "secrets", SyncMode::Propagate),
            ResourceSpec::new("", "configmaps", SyncMode::Ignore),
            ResourceSpec::new("rbac.authorization.k8s.io", "roles", SyncMode::Propagate),
        ]);
        assert!(v.review(&user_request(Operation::Update, &ok)).await.allowed);
    }

    #[tokio::test]
    async fn test_invalid_configurations() {
        let v = validator();
        let cases = [
            vec![
                ResourceSpec::new("", "secrets", SyncMode::Propagate),
                ResourceSpec::new("", "secrets", SyncMode::Ignore),
            ],
            vec![ResourceSpec::new(keys::GROUP, "subnamespaceanchors", SyncMode::Propagate)],
            vec![ResourceSpec::new("", "widgets", SyncMode::Propagate)],
            vec![ResourceSpec::new("", "namespaces", SyncMode::Propagate)],
            vec![ResourceSpec::new("rbac.authorization.k8s.io", "rolebindings", SyncMode::Ignore)],
        ];
        for resources in cases {
            let response = v.review(&user_request(Operation::Update, &config(resources))).await;
            assert!(!response.allowed);
        }
    }

    #[tokio::test]
    async fn test_singleton_name() {
        let v = validator();
        let mut other = HncConfiguration::new();
        other.metadata.name = "other".into();
        assert!(!v.review(&user_request(Operation::Create, &other)).await.allowed);
    }
}
