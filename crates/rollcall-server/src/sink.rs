//! Attendance sink that posts to the attendance backend over HTTP.

use std::time::Duration;

use async_trait::async_trait;
use rollcall_core::{AttendanceSink, Identity, SessionContext, SinkError};
use serde::Serialize;
use tracing::debug;

/// Body of one attendance record.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct AttendanceRecord<'a> {
    session_id: &'a str,
    student_id: u32,
    /// Hex of the advertisement bytes as received.
    ble_data: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    location: Option<&'a str>,
}

/// Posts `{ sessionId, studentId, bleData }` to a fixed endpoint.
#[derive(Debug, Clone)]
pub struct HttpAttendanceSink {
    client: reqwest::Client,
    endpoint: String,
}

impl HttpAttendanceSink {
    /// Sink for `endpoint` with a per-request timeout.
    ///
    /// # Errors
    ///
    /// Returns an error if the HTTP client cannot be built.
    pub fn new(endpoint: impl Into<String>, timeout: Duration) -> reqwest::Result<Self> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self {
            client,
            endpoint: endpoint.into(),
        })
    }

    /// Target URL.
    #[must_use]
    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }
}

#[async_trait]
impl AttendanceSink for HttpAttendanceSink {
    async fn record_sighting(
        &self,
        identity: &Identity,
        context: &SessionContext,
    ) -> Result<(), SinkError> {
        let payload = rollcall_core::encode(identity)
            .map_err(|e| SinkError::Rejected {
                status: 400,
                message: e.to_string(),
            })?;
        let record = AttendanceRecord {
            session_id: &context.session_id,
            student_id: identity.id,
            ble_data: hex::encode(payload.as_bytes()),
            location: context.location.as_deref(),
        };

        let response = self
            .client
            .post(&self.endpoint)
            .json(&record)
            .send()
            .await
            .map_err(|e| SinkError::Unavailable(e.to_string()))?;

        let status = response.status();
        if status.is_success() {
            debug!(identity = %identity, session_id = %context.session_id, "Attendance recorded");
            return Ok(());
        }

        let message = response.text().await.unwrap_or_default();
        Err(SinkError::Rejected {
            status: status.as_u16(),
            message,
        })
    }
}
