//! Shared state for the HTTP handlers

use axum::extract::FromRef;
use chrono::{DateTime, Utc};
use hnc_admission::AdmissionChain;
use hnc_client::ClusterClient;
use hnc_forest::Forest;
use hnc_types::HncOptions;
use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Duration;

/// Process identity reported by the health endpoints
#[derive(Debug, Clone)]
pub struct Health {
    pub version: String,
    pub started_at: DateTime<Utc>,
}

impl Health {
    pub fn new() -> Self {
        Self {
            version: env!("CARGO_PKG_VERSION").to_string(),
            started_at: Utc::now(),
        }
    }

    pub fn uptime(&self) -> String {
        let seconds = (Utc::now() - self.started_at).num_seconds().max(0);
        format!("{}h {}m {}s", seconds / 3600, (seconds % 3600) / 60, seconds % 60)
    }
}

impl Default for Health {
    fn default() -> Self {
        Self::new()
    }
}

/// State of the admission webhook server
#[derive(Clone)]
pub struct WebhookState {
    pub chain: Arc<AdmissionChain>,

    /// Deadline for a single review
    pub timeout: Duration,

    pub health: Health,
}

impl WebhookState {
    pub fn new(chain: Arc<AdmissionChain>, timeout: Duration, health: Health) -> Self {
        Self {
            chain,
            timeout,
            health,
        }
    }
}

impl FromRef<WebhookState> for Health {
    fn from_ref(state: &WebhookState) -> Self {
        state.health.clone()
    }
}

/// State of the aggregated reader
#[derive(Clone)]
pub struct ReaderState {
    pub client: Arc<dyn ClusterClient>,
    pub forest: Arc<Forest>,
    pub options: Arc<HncOptions>,
    pub authorized_users: Arc<BTreeSet<String>>,
    pub health: Health,
}

impl ReaderState {
    pub fn new(
        client: Arc<dyn ClusterClient>,
        forest: Arc<Forest>,
        options: Arc<HncOptions>,
        authorized_users: impl IntoIterator<Item = String>,
        health: Health,
    ) -> Self {
        Self {
            client,
            forest,
            options,
            authorized_users: Arc::new(authorized_users.into_iter().collect()),
            health,
        }
    }

    pub fn is_authorized(&self, user: &str) -> bool {
        self.authorized_users.contains(user)
    }
}

impl FromRef<ReaderState> for Health {
    fn from_ref(state: &ReaderState) -> Self {
        state.health.clone()
    }
}
