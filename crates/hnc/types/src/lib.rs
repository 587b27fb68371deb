//! # HNC Types
//!
//! Shared object model for the hierarchical namespace controller.
//!
//! ## Overview
//!
//! This crate holds everything that more than one HNC component needs to agree on:
//!
//! - [`keys`]: the wire-visible label, annotation and finalizer names
//! - [`ObjectMeta`] and the typed API objects ([`Namespace`], [`HierarchyConfiguration`],
//!   [`SubnamespaceAnchor`], [`HncConfiguration`], [`HierarchicalResourceQuota`])
//! - [`DynamicObject`] for schema-less access to arbitrary propagated kinds
//! - [`Condition`] / [`ConditionCode`] diagnostics reported on hierarchy objects
//! - [`admission`] review types exchanged with the admission hooks
//! - [`HncOptions`], the parsed runtime options every component shares
//!
//! Typed objects implement [`Resource`], which ties them to an [`ApiResource`] so
//! clients can move between the typed and dynamic representations.

#![deny(unsafe_code)]
#![cfg_attr(feature = "strict-docs", warn(missing_docs))]
#![cfg_attr(not(feature = "strict-docs"), allow(missing_docs))]

pub mod admission;
pub mod anchor;
pub mod condition;
pub mod config;
pub mod dynamic;
pub mod hierarchy;
pub mod hrq;
pub mod keys;
pub mod meta;
pub mod namespace;
pub mod options;
pub mod quantity;
pub mod resource;
pub mod selector;

pub use anchor::{AnchorState, SubnamespaceAnchor, SubnamespaceAnchorSpec, SubnamespaceAnchorStatus};
pub use condition::{Condition, ConditionCode};
pub use config::{
    HncConfiguration, HncConfigurationSpec, HncConfigurationStatus, ResourceSpec, ResourceStatus,
    SyncMode,
};
pub use dynamic::DynamicObject;
pub use hierarchy::{
    HierarchyConfiguration, HierarchyConfigurationSpec, HierarchyConfigurationStatus, MetaKvp,
};
pub use hrq::{HierarchicalResourceQuota, ResourceList, ResourceQuota};
pub use meta::{ObjectKey, ObjectMeta};
pub use namespace::Namespace;
pub use options::{HncOptions, HncSettings, OptionsError};
pub use quantity::Quantity;
pub use resource::{ApiResource, GroupResource, Resource};
pub use selector::PropagationSelector;
