//! HNC platform access layer
//!
//! Every component reads and writes objects through [`ClusterClient`]. The
//! [`InMemoryCluster`] implementation keeps the whole object store in memory
//! and runs registered admission hooks in front of every write.

pub mod admission;
pub mod catalog;
pub mod client;
pub mod error;
pub mod memory;
pub mod typed;

pub use admission::{run_hooks, AdmissionHook, AdmissionOutcome, DEFAULT_HOOK_TIMEOUT};
pub use catalog::ResourceCatalog;
pub use client::{ClusterClient, WatchEvent, WatchEventType};
pub use error::{ClientError, Result};
pub use memory::InMemoryCluster;
