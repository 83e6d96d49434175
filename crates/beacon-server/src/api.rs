//! HTTP API routes and handlers.
//!
//! - `health` - Service health check
//! - `scanner` - Tracking loop control, settings and beacon data
//! - `error` - API error types and the 404 fallback
//! - `openapi` - OpenAPI specification generation

use axum::http::{header, HeaderValue};
use axum::routing::get;
use axum::Router;
use tower_http::cors::CorsLayer;
use tower_http::set_header::SetResponseHeaderLayer;
use tower_http::trace::TraceLayer;

use crate::state::SharedState;

pub mod error;
pub mod health;
pub mod openapi;
pub mod scanner;

pub use error::{ApiError, ApiResult, ErrorResponse};
pub use openapi::get_openapi_json;

/// Beacon data changes every cycle; clients must not cache any response.
const NO_CACHE: HeaderValue = HeaderValue::from_static("no-store, no-cache");

/// Creates the combined API router with all endpoints.
///
/// # Route Structure
///
/// ```text
/// /health                  - Health check
/// /api
/// ├── /scanner
/// │   ├── /start           - POST, start the loop
/// │   ├── /stop            - POST, stop the loop
/// │   ├── /status          - GET, running or stopped
/// │   ├── /settings        - GET, PUT, POST
/// │   ├── /beacons         - GET, cached snapshot
/// │   └── /info            - GET, settings + status + snapshot
/// └── /openapi.json        - OpenAPI specification
/// ```
///
/// Anything else answers 404 with `PAGE_NOT_FOUND`.
pub fn create_router(state: SharedState) -> Router {
    Router::new()
        .nest("/health", health::router())
        .nest(
            "/api",
            Router::new()
                .route("/openapi.json", get(openapi::get_openapi_spec))
                .nest("/scanner", scanner::router()),
        )
        .fallback(error::page_not_found)
        .layer(SetResponseHeaderLayer::overriding(header::CACHE_CONTROL, NO_CACHE))
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
