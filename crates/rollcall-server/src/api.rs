//! HTTP API routes and handlers.
//!
//! This module contains all HTTP endpoint implementations organized by domain:
//! - `advertising` - Broadcasting this device's identity
//! - `scans` - Bounded discovery scans and their reports
//! - `reconcile` - Proxy-attendance check against a headcount
//! - `health` - Service health checks
//! - `error` - API error types
//! - `openapi` - OpenAPI specification generation

use axum::routing::get;
use axum::Router;
use tower_http::trace::TraceLayer;

use crate::state::SharedState;

pub mod advertising;
pub mod error;
pub mod health;
pub mod openapi;
pub mod reconcile;
pub mod scans;

pub use error::{ApiError, ApiResult, ErrorResponse};
pub use openapi::get_openapi_json;

/// Creates the combined API router with all endpoints.
///
/// # Route Structure
///
/// ```text
/// /health                - Health check
/// /api
/// ├── /advertising       - Advertising status, start, restart, stop
/// ├── /scans             - Start a scan
/// │   ├── /current       - Live devices, stop early
/// │   └── /last          - Last completed report
/// ├── /reconcile         - Observed vs. expected headcount
/// └── /openapi.json      - OpenAPI specification
/// ```
pub fn create_router(state: SharedState) -> Router {
    Router::new()
        .nest("/health", health::router())
        .nest(
            "/api",
            Router::new()
                .nest("/advertising", advertising::router())
                .nest("/scans", scans::router())
                .nest("/reconcile", reconcile::router())
                .route("/openapi.json", get(openapi::get_openapi_spec)),
        )
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
