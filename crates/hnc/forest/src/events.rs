//! Change notifications published by the forest

use hnc_types::GroupResource;

/// Capacity of the change channel; slow listeners resync on lag
pub const EVENT_CHANNEL_CAPACITY: usize = 16384;

/// What changed
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Change {
    /// Ancestry, managed metadata or conditions of a namespace changed;
    /// everything derived from its position in the tree must be recomputed.
    Hierarchy { namespace: String },

    /// A source object was added, changed or removed
    Source {
        resource: GroupResource,
        namespace: String,
        name: String,
    },
}

/// A committed change, numbered in commit order
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ForestEvent {
    pub seq: u64,
    pub change: Change,
}

impl ForestEvent {
    pub fn namespace(&self) -> &str {
        match &self.change {
            Change::Hierarchy { namespace } => namespace,
            Change::Source { namespace, .. } => namespace,
        }
    }
}
