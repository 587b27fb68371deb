//! Quota objects: the platform's per-namespace quota and HNC's subtree quota

use crate::meta::ObjectMeta;
use crate::quantity::Quantity;
use crate::resource::{ApiResource, Resource};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Resource name (e.g. `pods`, `limits.cpu`) to quantity
pub type ResourceList = BTreeMap<String, Quantity>;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct QuotaSpec {
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub hard: ResourceList,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct QuotaStatus {
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub hard: ResourceList,

    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub used: ResourceList,
}

/// Quota over a namespace and all of its descendants
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct HierarchicalResourceQuota {
    pub metadata: ObjectMeta,

    #[serde(default)]
    pub spec: QuotaSpec,

    #[serde(default)]
    pub status: QuotaStatus,
}

impl Resource for HierarchicalResourceQuota {
    fn api_resource() -> ApiResource {
        ApiResource::hierarchical_resource_quotas()
    }

    fn meta(&self) -> &ObjectMeta {
        &self.metadata
    }

    fn meta_mut(&mut self) -> &mut ObjectMeta {
        &mut self.metadata
    }
}

/// The platform's namespace-local quota; its `status.used` feeds subtree usage
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ResourceQuota {
    pub metadata: ObjectMeta,

    #[serde(default)]
    pub spec: QuotaSpec,

    #[serde(default)]
    pub status: QuotaStatus,
}

impl Resource for ResourceQuota {
    fn api_resource() -> ApiResource {
        ApiResource::resource_quotas()
    }

    fn meta(&self) -> &ObjectMeta {
        &self.metadata
    }

    fn meta_mut(&mut self) -> &mut ObjectMeta {
        &mut self.metadata
    }
}

/// Sums `used` over every list, limited to the resource names in `limited`
pub fn sum_usage<'a>(
    limited: &ResourceList,
    usages: impl IntoIterator<Item = &'a ResourceList>,
) -> ResourceList {
    let mut total: ResourceList = limited
        .keys()
        .map(|name| (name.clone(), Quantity::zero()))
        .collect();
    for usage in usages {
        for (name, amount) in usage {
            if let Some(sum) = total.get_mut(name) {
                *sum += *amount;
            }
        }
    }
    total
}
