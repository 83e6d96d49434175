//! Health check API endpoint.

use axum::extract::State;
use axum::routing::get;
use axum::{Json, Router};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use crate::state::SharedState;

/// Health check response.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
#[schema(example = json!({
    "status": "running",
    "version": "0.1.0",
    "uptime_secs": 3600,
    "radio_available": true
}))]
pub struct HealthResponse {
    /// Service status; always `running` when the server answers.
    #[schema(example = "running")]
    pub status: String,

    /// Service version from Cargo.toml.
    #[schema(example = "0.1.0")]
    pub version: String,

    /// Seconds since startup.
    #[schema(example = 3600)]
    pub uptime_secs: u64,

    /// Whether real radio scans can run.
    #[schema(example = true)]
    pub radio_available: bool,
}

/// Creates the health router.
pub fn router() -> Router<SharedState> {
    Router::new().route("/", get(health_check))
}

/// Health check endpoint.
#[utoipa::path(
    get,
    path = "/health",
    tag = "system",
    operation_id = "healthCheck",
    summary = "Check service health",
    description = "Reports that the HTTP server is up. Says nothing about the \
        tracking loop; use `/api/scanner/status` for that.",
    responses(
        (status = 200, description = "Service is healthy", body = HealthResponse)
    )
)]
pub async fn health_check(State(state): State<SharedState>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "running".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        uptime_secs: state.uptime_secs(),
        radio_available: state.radio_available,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_health_response_serialization() {
        let response = HealthResponse {
            status: "running".to_string(),
            version: "0.1.0".to_string(),
            uptime_secs: 5,
            radio_available: false,
        };
        let json = serde_json::to_string(&response).unwrap();
        assert!(json.contains("\"status\":\"running\""));
        assert!(json.contains("\"radio_available\":false"));
    }
}
