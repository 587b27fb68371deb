//! HNC manager daemon library
//!
//! - Admission webhook server (one POST path per hook)
//! - Aggregated reader over namespace subtrees
//! - Reconciler manager wiring
//! - Mutual TLS identifying reader callers by certificate
//! - Server lifecycle management

pub mod api;
pub mod config;
pub mod error;
pub mod server;
pub mod tls;

pub use config::DaemonConfig;
pub use error::{ApiError, DaemonError, DaemonResult};
pub use server::Server;
