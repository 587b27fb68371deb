//! Liveness endpoint shared by both servers

use crate::api::state::Health;
use axum::{extract::State, Json};
use serde::Serialize;

#[derive(Debug, Serialize)]
pub struct HealthCheckResponse {
    pub status: String,
    pub version: String,
    pub uptime: String,
}

pub async fn health_check(State(health): State<Health>) -> Json<HealthCheckResponse> {
    Json(HealthCheckResponse {
        status: "healthy".to_string(),
        version: health.version.clone(),
        uptime: health.uptime(),
    })
}
