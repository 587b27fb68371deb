//! # HNC Forest
//!
//! The process-wide, in-memory model of the namespace tree.
//!
//! Every reconciler and admission hook shares one [`Forest`]. All access goes
//! through [`Forest::lock`], which hands out a guard over [`ForestState`]; the
//! lock is a plain non-reentrant mutex and must never be held across I/O.
//!
//! Edges are stored as names in a single keyed table, so a parent may be
//! referenced before its namespace has been observed. Every mutation that
//! changes what a namespace should look like is published on a broadcast
//! channel as a [`ForestEvent`], in lock-acquisition order.

#![deny(unsafe_code)]

pub mod error;
pub mod events;
pub mod forest;
pub mod node;

pub use error::{ForestError, Result};
pub use events::{Change, ForestEvent};
pub use forest::{Forest, ForestState};
pub use node::{ConditionSource, NamespaceNode};
