//! Scanner API endpoints.
//!
//! Start/stop and settings changes all go through the settings store, so the
//! tracking loop lifecycle always follows the stored `run_flag`. Reads of the
//! beacon snapshot come from the cache and may lag the loop by one cycle.

use axum::body::Bytes;
use axum::extract::State;
use axum::routing::{get, post};
use axum::{Json, Router};
use beacon_core::{ScannerSettings, ScannerStatus, SettingsUpdate, Snapshot};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tracing::info;
use utoipa::ToSchema;

use crate::api::error::{ApiError, ApiResult, ErrorResponse};
use crate::state::SharedState;

/// Creates the scanner router with all endpoints.
pub fn router() -> Router<SharedState> {
    Router::new()
        .route("/start", post(start_scanner))
        .route("/stop", post(stop_scanner))
        .route("/status", get(get_status))
        .route(
            "/settings",
            get(get_settings).put(update_settings).post(update_settings),
        )
        .route("/beacons", get(get_beacons))
        .route("/info", get(get_info))
}

// ============================================================================
// Request/Response Types
// ============================================================================

/// Tracking loop status.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
#[schema(example = json!({"status": "running"}))]
pub struct StatusResponse {
    /// Whether the loop is running.
    pub status: ScannerStatus,
}

/// Optional body of a start request.
#[derive(Debug, Clone, Deserialize, ToSchema)]
#[schema(example = json!({"fake_scan": true}))]
pub struct StartRequest {
    /// Use the simulated beacon roster instead of the radio.
    pub fake_scan: Option<bool>,
}

/// Settings after an update, plus the fields that were ignored.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
#[schema(example = json!({
    "settings": {
        "uuid_filter": "ffffffff-bbbb-cccc-dddd-eeeeeeeeeeee",
        "scan_tick": 10,
        "run_flag": true,
        "fake_scan": false,
        "notify_target": null
    },
    "rejected": [{
        "error": "INVALID_SETTINGS_FIELD",
        "message": "Invalid settings field 'run_flag': expected boolean"
    }]
}))]
pub struct SettingsUpdateResponse {
    /// Settings as stored after the update.
    pub settings: ScannerSettings,

    /// Present fields whose value had the wrong type.
    pub rejected: Vec<ErrorResponse>,
}

impl From<SettingsUpdate> for SettingsUpdateResponse {
    fn from(update: SettingsUpdate) -> Self {
        Self {
            rejected: update.rejected.iter().map(ErrorResponse::from).collect(),
            settings: update.current,
        }
    }
}

/// Settings, status and latest snapshot in one document.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct InfoResponse {
    /// Current settings.
    #[serde(flatten)]
    pub settings: ScannerSettings,

    /// Tracking loop status.
    pub status: ScannerStatus,

    /// Latest cached snapshot.
    #[serde(flatten)]
    pub snapshot: Snapshot,
}

/// Empty bodies count as "no fields".
fn parse_body(body: &Bytes) -> ApiResult<Value> {
    if body.iter().all(u8::is_ascii_whitespace) {
        return Ok(Value::Null);
    }
    serde_json::from_slice(body).map_err(|e| ApiError::invalid_json(&e))
}

// ============================================================================
// Handlers
// ============================================================================

/// Start the tracking loop.
#[utoipa::path(
    post,
    path = "/api/scanner/start",
    tag = "scanner",
    operation_id = "startScanner",
    summary = "Start scanning",
    description = "Sets `run_flag` and starts the tracking loop if it is stopped. \
        An optional `fake_scan` in the body switches to the simulated roster.",
    request_body(content = StartRequest, content_type = "application/json", description = "Optional"),
    responses(
        (status = 200, description = "Loop running", body = StatusResponse),
        (status = 400, description = "Body is not JSON", body = ErrorResponse)
    )
)]
pub async fn start_scanner(
    State(state): State<SharedState>,
    body: Bytes,
) -> ApiResult<Json<StatusResponse>> {
    let body = parse_body(&body)?;

    let mut patch = Map::new();
    patch.insert("run_flag".to_string(), Value::Bool(true));
    if let Some(fake_scan) = body.get("fake_scan") {
        patch.insert("fake_scan".to_string(), fake_scan.clone());
    }

    let update = state.tracker.update_settings(&Value::Object(patch)).await;
    info!(fake_scan = update.current.fake_scan, "Scanner start requested");

    Ok(Json(StatusResponse {
        status: state.tracker.status(),
    }))
}

/// Stop the tracking loop.
#[utoipa::path(
    post,
    path = "/api/scanner/stop",
    tag = "scanner",
    operation_id = "stopScanner",
    summary = "Stop scanning",
    description = "Clears `run_flag` and waits for the loop to finish its current \
        cycle, at most one maximum scan tick.",
    responses(
        (status = 200, description = "Loop stopped", body = StatusResponse)
    )
)]
pub async fn stop_scanner(State(state): State<SharedState>) -> Json<StatusResponse> {
    state
        .tracker
        .update_settings(&serde_json::json!({"run_flag": false}))
        .await;
    info!("Scanner stop requested");

    Json(StatusResponse {
        status: state.tracker.status(),
    })
}

/// Get the loop status.
#[utoipa::path(
    get,
    path = "/api/scanner/status",
    tag = "scanner",
    operation_id = "getScannerStatus",
    summary = "Get scanner status",
    responses(
        (status = 200, description = "Current status", body = StatusResponse)
    )
)]
pub async fn get_status(State(state): State<SharedState>) -> Json<StatusResponse> {
    Json(StatusResponse {
        status: state.tracker.status(),
    })
}

/// Get the current settings.
#[utoipa::path(
    get,
    path = "/api/scanner/settings",
    tag = "scanner",
    operation_id = "getScannerSettings",
    summary = "Get scanner settings",
    responses(
        (status = 200, description = "Current settings", body = ScannerSettings)
    )
)]
pub async fn get_settings(State(state): State<SharedState>) -> Json<ScannerSettings> {
    Json(state.tracker.get_settings().await)
}

/// Apply a sparse settings update.
#[utoipa::path(
    put,
    path = "/api/scanner/settings",
    tag = "scanner",
    operation_id = "updateScannerSettings",
    summary = "Update scanner settings",
    description = "Permissive update. Keys are matched case-insensitively, unknown \
        keys are ignored, mistyped values are skipped and listed in `rejected`, \
        and `scan_tick` is clamped to [1, 10]. Changing `run_flag` starts or \
        stops the loop. POST is accepted as a synonym.",
    request_body(content = Object, content_type = "application/json"),
    responses(
        (status = 200, description = "Settings after the update", body = SettingsUpdateResponse),
        (status = 400, description = "Body is not JSON", body = ErrorResponse)
    )
)]
pub async fn update_settings(
    State(state): State<SharedState>,
    body: Bytes,
) -> ApiResult<Json<SettingsUpdateResponse>> {
    let patch = parse_body(&body)?;
    let update = state.tracker.update_settings(&patch).await;
    Ok(Json(update.into()))
}

/// Get the latest beacon snapshot.
#[utoipa::path(
    get,
    path = "/api/scanner/beacons",
    tag = "scanner",
    operation_id = "getBeacons",
    summary = "Get nearest and observed beacons",
    responses(
        (status = 200, description = "Latest cached snapshot", body = Snapshot)
    )
)]
pub async fn get_beacons(State(state): State<SharedState>) -> Json<Snapshot> {
    Json(state.tracker.read_snapshot().await)
}

/// Get settings, status and beacons together.
#[utoipa::path(
    get,
    path = "/api/scanner/info",
    tag = "scanner",
    operation_id = "getScannerInfo",
    summary = "Get everything about the scanner",
    responses(
        (status = 200, description = "Merged settings, status and snapshot", body = InfoResponse)
    )
)]
pub async fn get_info(State(state): State<SharedState>) -> Json<InfoResponse> {
    Json(InfoResponse {
        settings: state.tracker.get_settings().await,
        status: state.tracker.status(),
        snapshot: state.tracker.read_snapshot().await,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_body() {
        assert_eq!(parse_body(&Bytes::new()).unwrap(), Value::Null);
        assert_eq!(parse_body(&Bytes::from_static(b" \n")).unwrap(), Value::Null);
        assert_eq!(
            parse_body(&Bytes::from_static(br#"{"scan_tick": 2}"#)).unwrap()["scan_tick"],
            2
        );
        assert!(parse_body(&Bytes::from_static(b"{oops")).is_err());
    }

    #[test]
    fn test_info_response_is_flat() {
        let info = InfoResponse {
            settings: ScannerSettings::default(),
            status: ScannerStatus::Stopped,
            snapshot: Snapshot::default(),
        };
        let json = serde_json::to_value(&info).unwrap();
        assert_eq!(json["status"], "stopped");
        assert_eq!(json["scan_tick"], 3);
        assert!(json["nearest_beacon"].is_null());
        assert!(json["beacons_list"].as_array().unwrap().is_empty());
    }
}
