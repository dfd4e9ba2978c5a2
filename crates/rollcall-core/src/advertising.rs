//! Outgoing identity broadcast.
//!
//! ```text
//!   Idle --start_advertising--> Advertising --stop_advertising--> Idle
//! ```
//!
//! A start while a broadcast is running (or still being set up) fails with
//! [`RollcallError::AlreadyActive`] and leaves the running broadcast alone.
//! Stops never fail: the radio must always be releasable.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};
use utoipa::ToSchema;

use crate::config::BleConfig;
use crate::error::{Activity, Result, RollcallError};
use crate::payload::{self, AdvertisementPayload, Identity};
use crate::permissions::{PermissionGate, PermissionGroup};
use crate::platform::{AdvertiseOptions, BleAdvertiser, BroadcastRequest};

/// The broadcast currently on the air.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AdvertisingSession {
    /// Identity being advertised.
    pub identity: Identity,

    /// Its encoded form.
    pub payload: AdvertisementPayload,

    /// Options the broadcast was started with.
    pub options: AdvertiseOptions,

    /// When the platform acknowledged the broadcast.
    pub started_at: DateTime<Utc>,
}

/// Snapshot returned by [`AdvertisingController::status`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[schema(example = json!({
    "is_advertising": true,
    "identity": { "id": 42 },
    "started_at_utc": "2025-01-15T09:00:00Z"
}))]
pub struct AdvertisingStatus {
    /// Whether a broadcast is on the air.
    pub is_advertising: bool,

    /// Identity being advertised.
    pub identity: Option<Identity>,

    /// When the broadcast started.
    pub started_at_utc: Option<DateTime<Utc>>,
}

#[derive(Debug, Default)]
enum Phase {
    #[default]
    Idle,
    Starting,
    Advertising(AdvertisingSession),
}

/// Owns the single outgoing advertisement of this device.
pub struct AdvertisingController {
    radio: Arc<dyn BleAdvertiser>,
    permissions: Arc<PermissionGate>,
    config: BleConfig,
    phase: Mutex<Phase>,
}

impl AdvertisingController {
    /// Create an idle controller.
    pub fn new(
        radio: Arc<dyn BleAdvertiser>,
        permissions: Arc<PermissionGate>,
        config: BleConfig,
    ) -> Self {
        Self {
            radio,
            permissions,
            config,
            phase: Mutex::new(Phase::Idle),
        }
    }

    /// Whether the platform can advertise at all.
    pub fn is_supported(&self) -> bool {
        self.radio.supports_advertising()
    }

    /// Start broadcasting `identity`.
    ///
    /// # Errors
    ///
    /// - [`RollcallError::AlreadyActive`] if a broadcast is running or starting
    /// - [`RollcallError::InvalidPayload`] if the identity does not encode
    /// - [`RollcallError::PlatformUnsupported`] if the radio cannot advertise
    /// - [`RollcallError::PermissionDenied`] naming each refused permission
    /// - [`RollcallError::Platform`] if the radio rejects the broadcast
    ///
    /// On any error the controller is left as it was.
    pub async fn start_advertising(
        &self,
        identity: Identity,
        options: AdvertiseOptions,
    ) -> Result<()> {
        let payload = {
            let mut phase = self.phase();
            if !matches!(*phase, Phase::Idle) {
                return Err(RollcallError::AlreadyActive(Activity::Advertising));
            }
            let payload = payload::encode(&identity)?;
            *phase = Phase::Starting;
            payload
        };

        match self.bring_up(&identity, &payload, &options).await {
            Ok(()) => {
                info!(identity = %identity, bytes = payload.len(), "Started advertising");
                *self.phase() = Phase::Advertising(AdvertisingSession {
                    identity,
                    payload,
                    options,
                    started_at: Utc::now(),
                });
                Ok(())
            }
            Err(e) => {
                warn!(identity = %identity, error = %e, "Failed to start advertising");
                *self.phase() = Phase::Idle;
                Err(e)
            }
        }
    }

    async fn bring_up(
        &self,
        identity: &Identity,
        payload: &AdvertisementPayload,
        options: &AdvertiseOptions,
    ) -> Result<()> {
        if !self.radio.supports_advertising() {
            return Err(RollcallError::PlatformUnsupported {
                activity: Activity::Advertising,
                reason: "the Bluetooth adapter has no peripheral role".to_string(),
            });
        }

        let group = PermissionGroup::Bluetooth;
        let permissions = self.permissions.request_group(group).await;
        if !permissions.granted {
            return Err(RollcallError::PermissionDenied {
                group: group.name().to_string(),
                denied: permissions.denied_permissions,
            });
        }

        let request = BroadcastRequest {
            service_uuid: options.service_uuid.unwrap_or(self.config.service_uuid),
            company_id: options.company_id.unwrap_or(self.config.company_id),
            payload: payload.as_bytes().to_vec(),
            options: options.clone(),
        };
        debug!(identity = %identity, service_uuid = %request.service_uuid, "Broadcasting");
        self.radio.broadcast(request).await?;
        Ok(())
    }

    /// Stop broadcasting. A no-op when idle; platform errors are logged.
    pub async fn stop_advertising(&self) {
        let session = {
            let mut phase = self.phase();
            match std::mem::take(&mut *phase) {
                Phase::Advertising(session) => session,
                other => {
                    *phase = other;
                    info!("No active advertising to stop");
                    return;
                }
            }
        };

        if let Err(e) = self.radio.stop_broadcast().await {
            warn!(identity = %session.identity, error = %e, "Platform failed to stop advertising");
        }
        info!(identity = %session.identity, "Stopped advertising");
    }

    /// Stop (if running), wait for the radio to settle, then start.
    ///
    /// # Errors
    ///
    /// Same as [`AdvertisingController::start_advertising`].
    pub async fn restart_advertising(
        &self,
        identity: Identity,
        options: AdvertiseOptions,
    ) -> Result<()> {
        if self.status().is_advertising {
            self.stop_advertising().await;
            let settle = self.config.restart_settle();
            if settle > Duration::ZERO {
                tokio::time::sleep(settle).await;
            }
        }
        self.start_advertising(identity, options).await
    }

    /// Current state. Pure read.
    pub fn status(&self) -> AdvertisingStatus {
        match &*self.phase() {
            Phase::Advertising(session) => AdvertisingStatus {
                is_advertising: true,
                identity: Some(session.identity.clone()),
                started_at_utc: Some(session.started_at),
            },
            Phase::Idle | Phase::Starting => AdvertisingStatus {
                is_advertising: false,
                identity: None,
                started_at_utc: None,
            },
        }
    }

    /// The running session, if any.
    pub fn session(&self) -> Option<AdvertisingSession> {
        match &*self.phase() {
            Phase::Advertising(session) => Some(session.clone()),
            _ => None,
        }
    }

    fn phase(&self) -> MutexGuard<'_, Phase> {
        self.phase.lock().unwrap_or_else(PoisonError::into_inner)
    }
}
