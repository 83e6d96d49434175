//! OpenAPI specification for the beacon-tracker API.
//!
//! Served at `/api/openapi.json` and written to disk by the `gen-openapi`
//! binary for client generation.

use axum::Json;
use beacon_core::{Beacon, ScannerSettings, ScannerStatus, Snapshot};
use utoipa::OpenApi;

use super::error::ErrorResponse;
use super::health::HealthResponse;
use super::scanner::{InfoResponse, SettingsUpdateResponse, StartRequest, StatusResponse};

/// Serve the OpenAPI specification as JSON.
pub async fn get_openapi_spec() -> Json<utoipa::openapi::OpenApi> {
    Json(ApiDoc::openapi())
}

/// The OpenAPI specification as pretty-printed JSON.
///
/// # Errors
///
/// Returns an error if the document cannot be serialized.
pub fn get_openapi_json() -> Result<String, serde_json::Error> {
    ApiDoc::openapi().to_pretty_json()
}

/// OpenAPI document for beacon-tracker.
#[derive(OpenApi)]
#[openapi(
    info(
        title = "beacon-tracker API",
        version = "0.1.0",
        description = r#"
# beacon-tracker API

beacon-tracker scans for iBeacon advertisements and keeps track of which beacon
is nearest, by signal strength.

## Overview

- **Scanner control**: start and stop the background tracking loop
- **Settings**: namespace filter, scan tick, simulated scans and webhook target
- **Beacons**: the nearest beacon, the previous nearest and every beacon of the latest scan

## Notes

- Settings updates are permissive: unknown keys are ignored and mistyped values skipped.
- Beacon data is refreshed once per scan tick and may be one cycle old.
"#,
        license(name = "MIT", url = "https://opensource.org/licenses/MIT")
    ),
    servers(
        (url = "/", description = "Local beacon-tracker server")
    ),
    tags(
        (name = "system", description = "Health checks"),
        (name = "scanner", description = "Tracking loop control, settings and beacon data")
    ),
    paths(
        super::health::health_check,
        super::scanner::start_scanner,
        super::scanner::stop_scanner,
        super::scanner::get_status,
        super::scanner::get_settings,
        super::scanner::update_settings,
        super::scanner::get_beacons,
        super::scanner::get_info,
    ),
    components(
        schemas(
            ErrorResponse,
            HealthResponse,
            StatusResponse,
            StartRequest,
            SettingsUpdateResponse,
            InfoResponse,
            Beacon,
            Snapshot,
            ScannerSettings,
            ScannerStatus,
        )
    )
)]
pub struct ApiDoc;
