//! # HNC Admission
//!
//! Synchronous checks on writes to the objects HNC governs.
//!
//! Validators read the shared [`Forest`](hnc_forest::Forest) under its lock and
//! release it before answering; they fail closed. The single mutator labels
//! managed namespaces as included and fails open. Writes made by HNC's own
//! service account skip validation.
//!
//! | Path | Hook |
//! |------|------|
//! | [`VALIDATE_HIERARCHY_PATH`] | [`HierarchyValidator`] |
//! | [`VALIDATE_ANCHOR_PATH`] | [`AnchorValidator`] |
//! | [`VALIDATE_CONFIG_PATH`] | [`HncConfigValidator`] |
//! | [`VALIDATE_NAMESPACE_PATH`] | [`NamespaceValidator`] |
//! | [`VALIDATE_OBJECT_PATH`] | [`ObjectValidator`] |
//! | [`MUTATE_NAMESPACE_PATH`] | [`NamespaceMutator`] |

#![deny(unsafe_code)]

pub mod anchor;
pub mod chain;
pub mod config;
pub mod error;
pub mod hierarchy;
pub mod namespace;
pub mod object;

pub use anchor::AnchorValidator;
pub use chain::{
    AdmissionChain, MUTATE_NAMESPACE_PATH, VALIDATE_ANCHOR_PATH, VALIDATE_CONFIG_PATH,
    VALIDATE_HIERARCHY_PATH, VALIDATE_NAMESPACE_PATH, VALIDATE_OBJECT_PATH,
};
pub use config::HncConfigValidator;
pub use error::{AdmissionError, Result};
pub use hierarchy::HierarchyValidator;
pub use namespace::{NamespaceMutator, NamespaceValidator};
pub use object::ObjectValidator;

use hnc_types::admission::AdmissionRequest;
use hnc_types::HncOptions;

/// HNC's own writes are trusted
fn exempt(options: &HncOptions, request: &AdmissionRequest) -> bool {
    options.is_hnc_service_account(&request.user_info.username)
}
