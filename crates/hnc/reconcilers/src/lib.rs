//! # HNC Reconcilers
//!
//! The control loops of the hierarchical namespace controller.
//!
//! Each reconciler implements [`Reconciler`] for one key type and is driven by
//! a [`Controller`]: a pool of workers draining a deduplicating, rate-limited
//! [`WorkQueue`]. The [`Manager`] owns one queue per reconciler and feeds them
//! from two sources:
//!
//! - platform watch events, routed by kind
//! - forest notifications, which fan hierarchy and source changes out to
//!   every namespace whose desired state they affect
//!
//! | Reconciler | Key | Owns |
//! |------------|-----|------|
//! | [`HierarchyReconciler`] | namespace | parent edges, depth labels, managed metadata, `hierarchy` status |
//! | [`AnchorReconciler`] | anchor | subnamespace creation and cascading deletion |
//! | [`ObjectReconciler`] | object | propagated copies of one kind |
//! | [`TypeConfigurator`] | `config` | which kinds are propagated, and their counts |
//! | [`HrqReconciler`] | quota | subtree usage of hierarchical quotas |

#![deny(unsafe_code)]

pub mod anchor;
pub mod config;
pub mod controller;
pub mod error;
pub mod hierarchy;
pub mod hrq;
pub mod manager;
pub mod object;
pub mod propagator;
pub mod queue;

pub use anchor::AnchorReconciler;
pub use config::TypeConfigurator;
pub use controller::{Action, Controller, ControllerConfig, Reconciler};
pub use error::{ReconcileError, Result};
pub use hierarchy::HierarchyReconciler;
pub use hrq::HrqReconciler;
pub use manager::{Manager, ManagerConfig};
pub use object::{is_copy, source_fingerprint, ObjectReconciler};
pub use propagator::Propagators;
pub use queue::{Backoff, WorkQueue};
