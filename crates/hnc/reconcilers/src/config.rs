//! Type configurator: the cluster-wide `config` singleton
//!
//! Decides which kinds are propagated, starts and stops their propagators and
//! reports per-kind counts and problems in the singleton's status.

use crate::controller::{Action, Reconciler};
use crate::error::Result;
use crate::object::is_copy;
use crate::propagator::Propagators;
use async_trait::async_trait;
use hnc_client::{typed, ClientError, ClusterClient};
use hnc_forest::Forest;
use hnc_types::{
    keys, ApiResource, Condition, ConditionCode, GroupResource, HncConfiguration, ResourceStatus,
    SyncMode,
};
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

pub struct TypeConfigurator {
    client: Arc<dyn ClusterClient>,
    forest: Arc<Forest>,
    propagators: Arc<Propagators>,
}

/// Kinds the singleton asks for, after validation
#[derive(Debug, Default)]
struct Desired {
    kinds: BTreeMap<GroupResource, (ApiResource, SyncMode)>,
    conditions: Vec<Condition>,
}

impl TypeConfigurator {
    pub fn new(client: Arc<dyn ClusterClient>, forest: Arc<Forest>, propagators: Arc<Propagators>) -> Self {
        Self {
            client,
            forest,
            propagators,
        }
    }

    fn desired(&self, config: &HncConfiguration) -> Desired {
        let mut desired = Desired::default();
        let forced: BTreeSet<GroupResource> = ApiResource::always_propagated()
            .into_iter()
            .map(|api| {
                let gr = api.group_resource();
                desired.kinds.insert(gr.clone(), (api, SyncMode::Propagate));
                gr
            })
            .collect();

        let mut seen = BTreeSet::new();
        for spec in &config.spec.resources {
            let gr = spec.group_resource();
            if !seen.insert(gr.clone()) {
                desired.conditions.push(Condition::new(
                    ConditionCode::BadConfiguration,
                    "MultipleConfigurationsForType",
                    format!("{gr} is configured more than once; only the first entry is used"),
                ));
                continue;
            }
            if gr.group == keys::GROUP {
                desired.conditions.push(Condition::new(
                    ConditionCode::BadConfiguration,
                    "IllegalResource",
                    format!("{gr} belongs to HNC itself and cannot be configured"),
                ));
                continue;
            }
            if forced.contains(&gr) {
                if spec.mode != SyncMode::Propagate {
                    desired.conditions.push(Condition::new(
                        ConditionCode::BadConfiguration,
                        "IllegalMode",
                        format!("{gr} is always propagated; mode {:?} is ignored", spec.mode),
                    ));
                }
                continue;
            }
            match self.client.catalog().resolve(&gr) {
                Ok(api) if api.namespaced => {
                    desired.kinds.insert(gr, (api, spec.mode));
                }
                Ok(_) => desired.conditions.push(Condition::new(
                    ConditionCode::BadConfiguration,
                    "ResourceNotFound",
                    format!("{gr} is not a namespaced resource"),
                )),
                Err(_) => desired.conditions.push(Condition::new(
                    ConditionCode::BadConfiguration,
                    "ResourceNotFound",
                    format!("{gr} is not served by the platform"),
                )),
            }
        }
        desired
    }

    /// Starts and stops propagators so the running set matches `desired`
    async fn apply(&self, desired: &mut Desired) -> Result<()> {
        let wanted: BTreeSet<&GroupResource> = desired
            .kinds
            .iter()
            .filter(|(_, (_, mode))| *mode == SyncMode::Propagate)
            .map(|(gr, _)| gr)
            .collect();

        let mut retired: BTreeSet<GroupResource> = self.propagators.draining().into_iter().collect();
        retired.extend(self.propagators.kinds().iter().map(ApiResource::group_resource));
        for gr in retired {
            if !wanted.contains(&gr) {
                // Fails the pass so a partial cleanup is retried with backoff
                self.propagators.stop(&gr).await?;
            }
        }

        let mut failed = Vec::new();
        for gr in wanted {
            let Some((api, _)) = desired.kinds.get(gr) else {
                continue;
            };
            if let Err(e) = self.propagators.start(api.clone()).await {
                warn!(kind = %gr, error = %e, "Could not start propagator");
                failed.push(Condition::new(
                    ConditionCode::ObjectReconcilerCreationFailed,
                    "StartFailed",
                    format!("could not start propagating {gr}: {e}"),
                ));
            }
        }
        desired.conditions.extend(failed);
        Ok(())
    }

    async fn resource_status(&self, api: &ApiResource, mode: SyncMode) -> Result<ResourceStatus> {
        let gr = api.group_resource();
        let (num_source_objects, num_propagated_objects) = if self.propagators.is_running(&gr) {
            let sources = self.forest.lock().num_sources(&gr);
            let copies = self
                .client
                .list(api, None)
                .await?
                .iter()
                .filter(|o| is_copy(o))
                .count();
            (Some(sources), Some(copies))
        } else {
            (None, None)
        };
        Ok(ResourceStatus {
            group: api.group.clone(),
            version: api.version.clone(),
            resource: api.resource.clone(),
            mode,
            num_propagated_objects,
            num_source_objects,
        })
    }

    /// Object-level problems across the forest, one line per namespace condition
    fn object_conditions(&self) -> Vec<Condition> {
        self.forest
            .lock()
            .namespaces_with_conditions()
            .into_iter()
            .flat_map(|(ns, conditions)| {
                conditions
                    .into_iter()
                    .filter(|c| {
                        matches!(c.code, ConditionCode::CannotPropagate | ConditionCode::CannotUpdate)
                    })
                    .map(move |c| Condition::new(c.code, c.reason, format!("{ns}: {}", c.message)))
            })
            .collect()
    }
}

#[async_trait]
impl Reconciler for TypeConfigurator {
    type Key = String;

    fn name(&self) -> &'static str {
        "config"
    }

    async fn reconcile(&self, key: &String) -> Result<Action> {
        if key != keys::CONFIG_SINGLETON {
            debug!(name = %key, "Ignoring non-singleton configuration");
            return Ok(Action::Done);
        }

        let config = match typed::get_opt::<HncConfiguration, _>(&*self.client, None, key).await? {
            Some(config) => config,
            None => match typed::create(&*self.client, &HncConfiguration::new()).await {
                Ok(created) => {
                    info!("Created default configuration");
                    created
                }
                Err(ClientError::AlreadyExists(_)) => return Ok(Action::RequeueAfter(Duration::ZERO)),
                Err(e) => return Err(e.into()),
            },
        };

        let mut desired = self.desired(&config);
        for condition in &desired.conditions {
            warn!(reason = %condition.reason, message = %condition.message, "Configuration problem");
        }
        self.apply(&mut desired).await?;

        let mut resources = Vec::with_capacity(desired.kinds.len());
        for (api, mode) in desired.kinds.values() {
            resources.push(self.resource_status(api, *mode).await?);
        }
        let mut conditions = desired.conditions;
        conditions.extend(self.object_conditions());
        conditions.sort();
        conditions.dedup();

        if config.status.resources == resources && config.status.conditions == conditions {
            return Ok(Action::Done);
        }
        let mut updated = config;
        updated.status.resources = resources;
        updated.status.conditions = conditions;
        typed::update(&*self.client, &updated).await?;
        debug!("Updated configuration status");
        Ok(Action::Done)
    }
}
