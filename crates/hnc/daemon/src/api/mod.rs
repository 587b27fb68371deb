//! HTTP surfaces of the daemon: admission webhooks and the aggregated reader

pub mod health;
pub mod reader;
pub mod router;
pub mod state;
pub mod webhooks;

pub use router::{reader_router, webhook_router};
pub use state::{Health, ReaderState, WebhookState};
