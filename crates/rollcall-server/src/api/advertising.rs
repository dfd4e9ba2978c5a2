//! Advertising API endpoints.
//!
//! A student's device broadcasts one identity at a time.

use axum::extract::State;
use axum::http::StatusCode;
use axum::routing::get;
use axum::{Json, Router};
use rollcall_core::{AdvertiseOptions, AdvertisingStatus, Identity};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use crate::api::error::ApiResult;
use crate::state::SharedState;

// ============================================================================
// Request/Response Types
// ============================================================================

/// Identity to broadcast.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
#[schema(example = json!({
    "id": 42,
    "options": { "tx_power_level": "low", "advertise_mode": "low_latency" }
}))]
pub struct AdvertiseRequest {
    /// Numeric identity (0 to 4294967295).
    #[schema(example = 42)]
    pub id: i64,

    /// Optional hex tag appended to the payload (at most 20 bytes).
    #[serde(default)]
    #[schema(example = "a1b2c3d4")]
    pub tag: Option<String>,

    /// Platform options; the configured defaults apply when omitted.
    #[serde(default)]
    pub options: Option<AdvertiseOptions>,
}

impl AdvertiseRequest {
    fn into_parts(self, defaults: &AdvertiseOptions) -> ApiResult<(Identity, AdvertiseOptions)> {
        let mut identity = Identity::from_raw(self.id)?;
        identity.tag = self.tag;
        Ok((identity, self.options.unwrap_or_else(|| defaults.clone())))
    }
}

/// Creates the advertising router.
pub fn router() -> Router<SharedState> {
    Router::new().route(
        "/",
        get(get_advertising)
            .post(start_advertising)
            .put(restart_advertising)
            .delete(stop_advertising),
    )
}

// ============================================================================
// Handlers
// ============================================================================

/// Current advertising state.
#[utoipa::path(
    get,
    path = "/api/advertising",
    tag = "advertising",
    operation_id = "getAdvertising",
    summary = "Get advertising status",
    responses(
        (status = 200, description = "Current advertising state", body = AdvertisingStatus)
    )
)]
pub async fn get_advertising(State(state): State<SharedState>) -> Json<AdvertisingStatus> {
    Json(state.advertising.status())
}

/// Start broadcasting an identity.
#[utoipa::path(
    post,
    path = "/api/advertising",
    tag = "advertising",
    operation_id = "startAdvertising",
    summary = "Start advertising an identity",
    description = "Encodes the identity and puts it on the air. Only one \
        broadcast may run at a time; use PUT to switch identities.",
    request_body = AdvertiseRequest,
    responses(
        (status = 201, description = "Advertising started", body = AdvertisingStatus),
        (status = 400, description = "Identity cannot be encoded", body = crate::api::ErrorResponse),
        (status = 403, description = "Bluetooth permissions denied", body = crate::api::ErrorResponse),
        (status = 409, description = "Already advertising", body = crate::api::ErrorResponse),
        (status = 501, description = "Adapter cannot advertise", body = crate::api::ErrorResponse),
        (status = 503, description = "Bluetooth stack rejected the broadcast", body = crate::api::ErrorResponse)
    )
)]
pub async fn start_advertising(
    State(state): State<SharedState>,
    Json(request): Json<AdvertiseRequest>,
) -> ApiResult<(StatusCode, Json<AdvertisingStatus>)> {
    let (identity, options) = request.into_parts(&state.config.ble.advertise)?;
    state.advertising.start_advertising(identity, options).await?;
    Ok((StatusCode::CREATED, Json(state.advertising.status())))
}

/// Stop, settle, and start again with a new identity.
#[utoipa::path(
    put,
    path = "/api/advertising",
    tag = "advertising",
    operation_id = "restartAdvertising",
    summary = "Restart advertising",
    description = "Stops the current broadcast (if any), waits the configured \
        settle delay, then starts broadcasting the given identity.",
    request_body = AdvertiseRequest,
    responses(
        (status = 200, description = "Advertising restarted", body = AdvertisingStatus),
        (status = 400, description = "Identity cannot be encoded", body = crate::api::ErrorResponse),
        (status = 403, description = "Bluetooth permissions denied", body = crate::api::ErrorResponse),
        (status = 503, description = "Bluetooth stack rejected the broadcast", body = crate::api::ErrorResponse)
    )
)]
pub async fn restart_advertising(
    State(state): State<SharedState>,
    Json(request): Json<AdvertiseRequest>,
) -> ApiResult<Json<AdvertisingStatus>> {
    let (identity, options) = request.into_parts(&state.config.ble.advertise)?;
    state.advertising.restart_advertising(identity, options).await?;
    Ok(Json(state.advertising.status()))
}

/// Stop broadcasting. Always succeeds.
#[utoipa::path(
    delete,
    path = "/api/advertising",
    tag = "advertising",
    operation_id = "stopAdvertising",
    summary = "Stop advertising",
    responses(
        (status = 200, description = "Advertising stopped (or was not running)", body = AdvertisingStatus)
    )
)]
pub async fn stop_advertising(State(state): State<SharedState>) -> Json<AdvertisingStatus> {
    state.advertising.stop_advertising().await;
    Json(state.advertising.status())
}
