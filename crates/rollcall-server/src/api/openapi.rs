//! OpenAPI specification generation for the rollcall API.
//!
//! The generated document is served at `/api/openapi.json` and written to the
//! workspace root by the `gen-openapi` binary for client generation.

use axum::Json;
use rollcall_core::{
    AdvertiseMode, AdvertiseOptions, AdvertisingStatus, DiscoveredDevice, Identity, MatchMode,
    ProxyReviewRequest, ReconciliationResult, ScanEnd, ScanMode, ScanOptions, ScanReport,
    TxPowerLevel, Verdict,
};
use utoipa::OpenApi;

use super::advertising::AdvertiseRequest;
use super::error::ErrorResponse;
use super::health::HealthResponse;
use super::reconcile::{ReconcileRequest, ReconcileResponse};
use super::scans::{CurrentScanResponse, ScanStartedResponse, StartScanRequest};

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

/// Main OpenAPI document structure for rollcall.
#[derive(OpenApi)]
#[openapi(
    info(
        title = "rollcall API",
        version = "0.1.0",
        description = r#"
# rollcall API

Proximity attendance over Bluetooth Low Energy.

## Overview

1. **Advertising**: a student's device broadcasts a compact numeric identity
2. **Scanning**: the instructor's device listens for a bounded window and
   collects each distinct identity once
3. **Reconciliation**: the number of identities is compared with a headcount
   estimated from a classroom photo; more identities than people suggests
   proxy attendance

Only one broadcast and one scan may run at a time on a device.
"#,
        license(name = "MIT", url = "https://opensource.org/licenses/MIT")
    ),
    servers(
        (url = "/", description = "Local rollcall server")
    ),
    tags(
        (name = "system", description = "Health checks"),
        (name = "advertising", description = "Broadcast this device's identity"),
        (name = "scans", description = "Bounded discovery of nearby identities"),
        (name = "reconcile", description = "Proxy-attendance detection")
    ),
    paths(
        super::health::health_check,
        super::advertising::get_advertising,
        super::advertising::start_advertising,
        super::advertising::restart_advertising,
        super::advertising::stop_advertising,
        super::scans::start_scan,
        super::scans::current_scan,
        super::scans::stop_scan,
        super::scans::last_scan,
        super::reconcile::reconcile_attendance,
    ),
    components(
        schemas(
            ErrorResponse,
            HealthResponse,
            // Advertising
            Identity,
            AdvertiseRequest,
            AdvertiseOptions,
            TxPowerLevel,
            AdvertiseMode,
            AdvertisingStatus,
            // Scans
            StartScanRequest,
            ScanOptions,
            ScanMode,
            MatchMode,
            ScanStartedResponse,
            CurrentScanResponse,
            DiscoveredDevice,
            ScanEnd,
            ScanReport,
            // Reconcile
            ReconcileRequest,
            ReconcileResponse,
            ReconciliationResult,
            ProxyReviewRequest,
            Verdict,
        )
    )
)]
pub struct ApiDoc;
