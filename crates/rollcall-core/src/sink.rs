//! Attendance hand-off boundary.
//!
//! The scan controller calls [`AttendanceSink::record_sighting`] once for each
//! newly discovered device whose payload decoded. What "recording" means (an
//! HTTP call, a database row) is up to the host.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::info;
use utoipa::ToSchema;

use crate::payload::Identity;

/// Errors a sink may report. Logged by the scan controller; never fatal.
#[derive(Debug, Error)]
pub enum SinkError {
    /// The backend refused the record (duplicate, closed session, ...).
    #[error("Attendance rejected ({status}): {message}")]
    Rejected {
        /// Backend status code.
        status: u16,
        /// Backend message.
        message: String,
    },

    /// The backend could not be reached.
    #[error("Attendance backend unreachable: {0}")]
    Unavailable(String),
}

/// Attendance session the scan belongs to.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct SessionContext {
    /// Attendance session identifier assigned by the backend.
    #[schema(example = "clx0session01")]
    pub session_id: String,

    /// Optional free-form location (room name, coordinates).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    #[schema(example = "Room 204")]
    pub location: Option<String>,
}

impl SessionContext {
    /// Context without a location.
    #[must_use]
    pub fn new(session_id: impl Into<String>) -> Self {
        Self {
            session_id: session_id.into(),
            location: None,
        }
    }
}

/// Receives newly confirmed attendees.
#[async_trait]
pub trait AttendanceSink: Send + Sync {
    /// Record one attendee for the session.
    async fn record_sighting(
        &self,
        identity: &Identity,
        context: &SessionContext,
    ) -> Result<(), SinkError>;
}

/// Sink that only writes a log line.
#[derive(Debug, Clone, Copy, Default)]
pub struct LoggingSink;

#[async_trait]
impl AttendanceSink for LoggingSink {
    async fn record_sighting(
        &self,
        identity: &Identity,
        context: &SessionContext,
    ) -> Result<(), SinkError> {
        info!(
            identity = %identity,
            session_id = %context.session_id,
            "Attendance sighting"
        );
        Ok(())
    }
}
