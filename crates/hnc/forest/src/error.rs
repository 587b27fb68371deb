//! Error types for forest mutations

use thiserror::Error;

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ForestError {
    /// Setting the parent would close a loop in the tree
    #[error("setting the parent of {child} to {parent} would create a cycle: {}", .path.join(" <- "))]
    Cycle {
        child: String,
        parent: String,
        /// From the child up through the proposed parent and back to the child
        path: Vec<String>,
    },
}

pub type Result<T> = std::result::Result<T, ForestError>;
