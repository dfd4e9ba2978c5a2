//! Scan API endpoints.
//!
//! An instructor's device opens a bounded scan window. Starting returns
//! immediately; the finished report is kept as "last" until the next scan
//! completes.

use std::time::Duration;

use axum::extract::State;
use axum::http::StatusCode;
use axum::routing::{get, post};
use axum::{Json, Router};
use rollcall_core::config::MAX_SCAN_DURATION_MS;
use rollcall_core::{DiscoveredDevice, ScanOptions, ScanReport, ScanRequest, SessionContext};
use serde::{Deserialize, Serialize};
use tracing::info;
use utoipa::ToSchema;
use uuid::Uuid;

use crate::api::error::{ApiError, ApiResult, ErrorResponse};
use crate::state::SharedState;

// ============================================================================
// Request/Response Types
// ============================================================================

/// Scan parameters. Every field is optional.
#[derive(Debug, Clone, Default, Serialize, Deserialize, ToSchema)]
#[serde(default)]
#[schema(example = json!({
    "duration_ms": 15000,
    "attendance_session_id": "clx0session01",
    "location": "Room 204"
}))]
pub struct StartScanRequest {
    /// Window length in milliseconds; the configured default when omitted.
    #[schema(example = 15000, minimum = 1, maximum = 120_000)]
    pub duration_ms: Option<u64>,

    /// Attendance session; when set, each identity found is recorded.
    pub attendance_session_id: Option<String>,

    /// Free-form location forwarded with each record.
    pub location: Option<String>,

    /// Platform scan options.
    pub options: ScanOptions,
}

/// Returned when a scan starts.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct ScanStartedResponse {
    /// Scan session id.
    pub session_id: Uuid,

    /// Effective window length in milliseconds.
    #[schema(example = 15000)]
    pub duration_ms: u64,
}

/// Live view of the open scan window.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct CurrentScanResponse {
    /// Whether a window is open.
    pub is_scanning: bool,

    /// Id of the open window.
    pub session_id: Option<Uuid>,

    /// Devices seen so far.
    pub devices: Vec<DiscoveredDevice>,
}

/// Creates the scans router.
pub fn router() -> Router<SharedState> {
    Router::new()
        .route("/", post(start_scan))
        .route("/current", get(current_scan).delete(stop_scan))
        .route("/last", get(last_scan))
}

// ============================================================================
// Handlers
// ============================================================================

/// Start a scan window.
#[utoipa::path(
    post,
    path = "/api/scans",
    tag = "scans",
    operation_id = "startScan",
    summary = "Start a scan",
    description = "Opens a bounded discovery window and returns at once. \
        Poll /api/scans/current for live devices and /api/scans/last for \
        the final report.",
    request_body = StartScanRequest,
    responses(
        (status = 202, description = "Scan started", body = ScanStartedResponse),
        (status = 400, description = "Invalid duration", body = ErrorResponse),
        (status = 403, description = "Bluetooth permissions denied", body = ErrorResponse),
        (status = 409, description = "A scan is already running", body = ErrorResponse),
        (status = 501, description = "Adapter cannot scan", body = ErrorResponse),
        (status = 503, description = "Bluetooth stack rejected the scan", body = ErrorResponse)
    )
)]
pub async fn start_scan(
    State(state): State<SharedState>,
    Json(request): Json<StartScanRequest>,
) -> ApiResult<(StatusCode, Json<ScanStartedResponse>)> {
    let duration_ms = request
        .duration_ms
        .unwrap_or(state.config.ble.scan_duration_ms);
    if duration_ms == 0 || duration_ms > MAX_SCAN_DURATION_MS {
        return Err(ApiError::BadRequest {
            error_code: "invalid_duration".to_string(),
            message: format!(
                "duration_ms must be between 1 and {MAX_SCAN_DURATION_MS}, got {duration_ms}"
            ),
        });
    }

    let session = request.attendance_session_id.map(|session_id| SessionContext {
        session_id,
        location: request.location,
    });
    let scan = ScanRequest {
        filter: None,
        options: request.options,
        timeout: Some(Duration::from_millis(duration_ms)),
        session,
    };

    let session_id = state
        .scans
        .start_scan(scan, state.report_listener())
        .await?;
    info!(session_id = %session_id, duration_ms, "Scan requested over HTTP");

    Ok((
        StatusCode::ACCEPTED,
        Json(ScanStartedResponse {
            session_id,
            duration_ms,
        }),
    ))
}

/// Devices seen so far in the open window.
#[utoipa::path(
    get,
    path = "/api/scans/current",
    tag = "scans",
    operation_id = "getCurrentScan",
    summary = "Get the open scan window",
    responses(
        (status = 200, description = "Live scan state", body = CurrentScanResponse)
    )
)]
pub async fn current_scan(State(state): State<SharedState>) -> Json<CurrentScanResponse> {
    Json(CurrentScanResponse {
        is_scanning: state.scans.is_scanning(),
        session_id: state.scans.current_session_id(),
        devices: state.scans.current_devices(),
    })
}

/// End the open window early and return its report.
#[utoipa::path(
    delete,
    path = "/api/scans/current",
    tag = "scans",
    operation_id = "stopScan",
    summary = "Stop the open scan window",
    responses(
        (status = 200, description = "Scan stopped", body = ScanReport),
        (status = 404, description = "No scan is running", body = ErrorResponse),
        (status = 409, description = "The scan finished on its own meanwhile", body = ErrorResponse)
    )
)]
pub async fn stop_scan(State(state): State<SharedState>) -> ApiResult<Json<ScanReport>> {
    let Some(session_id) = state.scans.current_session_id() else {
        return Err(ApiError::NotFound {
            error_code: "no_active_scan".to_string(),
            message: "No scan is running".to_string(),
        });
    };

    state.scans.stop_scan().await;

    state
        .last_report()
        .filter(|report| report.session_id == session_id)
        .map(Json)
        .ok_or_else(|| ApiError::Conflict {
            error_code: "scan_already_finished".to_string(),
            message: "The scan ended on its own; fetch it from /api/scans/last".to_string(),
        })
}

/// Most recent completed scan.
#[utoipa::path(
    get,
    path = "/api/scans/last",
    tag = "scans",
    operation_id = "getLastScan",
    summary = "Get the last completed scan",
    responses(
        (status = 200, description = "Last scan report", body = ScanReport),
        (status = 404, description = "No scan has completed yet", body = ErrorResponse)
    )
)]
pub async fn last_scan(State(state): State<SharedState>) -> ApiResult<Json<ScanReport>> {
    state.last_report().map(Json).ok_or_else(|| ApiError::NotFound {
        error_code: "no_completed_scan".to_string(),
        message: "No scan has completed yet".to_string(),
    })
}
