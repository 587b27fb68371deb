//! Hierarchical quota: usage summed over a namespace and its descendants

use crate::controller::{Action, Reconciler};
use crate::error::Result;
use async_trait::async_trait;
use hnc_client::{typed, ClusterClient};
use hnc_forest::Forest;
use hnc_types::hrq::sum_usage;
use hnc_types::{HierarchicalResourceQuota, ObjectKey, ResourceQuota};
use std::sync::Arc;
use tracing::{debug, info};

pub struct HrqReconciler {
    client: Arc<dyn ClusterClient>,
    forest: Arc<Forest>,
}

impl HrqReconciler {
    pub fn new(client: Arc<dyn ClusterClient>, forest: Arc<Forest>) -> Self {
        Self { client, forest }
    }
}

#[async_trait]
impl Reconciler for HrqReconciler {
    type Key = ObjectKey;

    fn name(&self) -> &'static str {
        "hrq"
    }

    async fn reconcile(&self, key: &ObjectKey) -> Result<Action> {
        let Some(namespace) = key.namespace.as_deref() else {
            return Ok(Action::Done);
        };
        let Some(mut hrq) =
            typed::get_opt::<HierarchicalResourceQuota, _>(&*self.client, Some(namespace), &key.name)
                .await?
        else {
            return Ok(Action::Done);
        };

        let subtree = {
            let forest = self.forest.lock();
            let mut subtree = vec![namespace.to_string()];
            subtree.extend(forest.descendants(namespace));
            subtree
        };
        let mut quotas = Vec::new();
        for ns in &subtree {
            quotas.extend(typed::list::<ResourceQuota, _>(&*self.client, Some(ns)).await?);
        }
        let used = sum_usage(&hrq.spec.hard, quotas.iter().map(|q| &q.status.used));

        if hrq.status.hard == hrq.spec.hard && hrq.status.used == used {
            debug!(namespace = %namespace, name = %key.name, "Quota usage unchanged");
            return Ok(Action::Done);
        }
        hrq.status.hard = hrq.spec.hard.clone();
        hrq.status.used = used;
        typed::update(&*self.client, &hrq).await?;
        info!(
            namespace = %namespace,
            name = %key.name,
            namespaces = subtree.len(),
            "Updated hierarchical quota usage"
        );
        Ok(Action::Done)
    }
}
