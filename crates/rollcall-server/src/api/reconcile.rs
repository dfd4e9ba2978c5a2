//! Proxy-attendance reconciliation endpoint.

use std::collections::HashSet;

use axum::extract::State;
use axum::routing::post;
use axum::{Json, Router};
use rollcall_core::{
    observed_identities, reconcile, Identity, ProxyReviewRequest, ReconciliationResult,
};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};
use utoipa::ToSchema;
use uuid::Uuid;

use crate::api::error::{ApiError, ApiResult, ErrorResponse};
use crate::state::SharedState;

/// Headcount from the estimator, optionally with explicit identities.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
#[schema(example = json!({ "expected_headcount": 10 }))]
pub struct ReconcileRequest {
    /// People counted in the classroom photo.
    #[schema(example = 10)]
    pub expected_headcount: i64,

    /// Observed identities. When omitted, the last completed scan is used.
    #[serde(default)]
    #[schema(example = json!([1, 2, 3]))]
    pub observed_ids: Option<Vec<i64>>,
}

/// Reconciliation outcome plus the review hand-off.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct ReconcileResponse {
    /// Derived comparison.
    pub result: ReconciliationResult,

    /// Present only for an overcount.
    pub review_request: Option<ProxyReviewRequest>,

    /// Scan the identities came from, when taken from the last scan.
    pub scan_session_id: Option<Uuid>,
}

/// Creates the reconcile router.
pub fn router() -> Router<SharedState> {
    Router::new().route("/", post(reconcile_attendance))
}

/// Compare observed identities with the expected headcount.
#[utoipa::path(
    post,
    path = "/api/reconcile",
    tag = "reconcile",
    operation_id = "reconcileAttendance",
    summary = "Check for proxy attendance",
    description = "Counts distinct observed identities and compares them with \
        the headcount. More identities than people is an overcount and comes \
        with a review request. Fewer is reported but not flagged.",
    request_body = ReconcileRequest,
    responses(
        (status = 200, description = "Reconciliation computed", body = ReconcileResponse),
        (status = 400, description = "Negative headcount or invalid identity", body = ErrorResponse),
        (status = 424, description = "No identities given and no scan has completed", body = ErrorResponse)
    )
)]
pub async fn reconcile_attendance(
    State(state): State<SharedState>,
    Json(request): Json<ReconcileRequest>,
) -> ApiResult<Json<ReconcileResponse>> {
    let (observed, scan_session_id) = match request.observed_ids {
        Some(ids) => {
            let observed = ids
                .into_iter()
                .map(Identity::from_raw)
                .collect::<rollcall_core::Result<HashSet<_>>>()?;
            (observed, None)
        }
        None => {
            let report = state.last_report().ok_or_else(|| ApiError::FailedDependency {
                error_code: "no_completed_scan".to_string(),
                message: "No identities given and no scan has completed".to_string(),
                details: Some("Run POST /api/scans first or pass observed_ids".to_string()),
            })?;
            (observed_identities(&report), Some(report.session_id))
        }
    };

    let result = reconcile(request.expected_headcount, &observed)?;
    let review_request = result.review_request();
    if review_request.is_some() {
        warn!(
            expected = result.expected_headcount,
            observed = result.observed_count,
            delta = result.delta,
            "Possible proxy attendance"
        );
    } else {
        info!(
            expected = result.expected_headcount,
            observed = result.observed_count,
            "Attendance reconciled"
        );
    }

    Ok(Json(ReconcileResponse {
        result,
        review_request,
        scan_session_id,
    }))
}
