//! Application state shared across handlers.

use std::sync::{Arc, PoisonError, RwLock};
use std::time::Duration;

use rollcall_core::{
    AdvertisingController, AttendanceSink, BleAdvertiser, BleScanner, DiscoveredDevice,
    LoggingSink, MockRadio, PermissionGate, RollcallConfig, ScanController, ScanListener,
    ScanReport,
};
use tracing::{debug, info, warn};

use crate::sink::HttpAttendanceSink;

/// Shared state handle passed to every handler.
pub type SharedState = Arc<AppState>;

/// Controllers and the most recent scan result.
pub struct AppState {
    /// Loaded configuration.
    pub config: RollcallConfig,

    /// Advertising side of the radio.
    pub advertising: AdvertisingController,

    /// Scanning side of the radio.
    pub scans: ScanController,

    last_report: Arc<RwLock<Option<ScanReport>>>,
}

impl AppState {
    /// Build state around a platform radio and attendance sink.
    pub fn new(
        config: RollcallConfig,
        advertiser: Arc<dyn BleAdvertiser>,
        scanner: Arc<dyn BleScanner>,
        sink: Arc<dyn AttendanceSink>,
    ) -> Self {
        let permissions = Arc::new(PermissionGate::default());
        let advertising =
            AdvertisingController::new(advertiser, Arc::clone(&permissions), config.ble.clone());
        let scans = ScanController::new(scanner, permissions, config.ble.clone()).with_sink(sink);

        Self {
            config,
            advertising,
            scans,
            last_report: Arc::default(),
        }
    }

    /// Build state around an in-memory radio, returning the radio so callers
    /// can inject sightings.
    pub fn with_mock_radio(config: RollcallConfig) -> (Self, MockRadio) {
        let radio = MockRadio::new();
        let sink = attendance_sink(&config);
        let state = Self::new(config, Arc::new(radio.clone()), Arc::new(radio.clone()), sink);
        (state, radio)
    }

    /// Wrap in the shared handle.
    #[must_use]
    pub fn shared(self) -> SharedState {
        Arc::new(self)
    }

    /// Listener that stores the finished report in this state.
    pub fn report_listener(&self) -> Arc<dyn ScanListener> {
        Arc::new(ReportStore {
            last_report: Arc::clone(&self.last_report),
        })
    }

    /// Most recent completed scan.
    pub fn last_report(&self) -> Option<ScanReport> {
        self.last_report
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

/// Attendance sink selected by configuration: HTTP when an endpoint is set,
/// otherwise log-only.
pub fn attendance_sink(config: &RollcallConfig) -> Arc<dyn AttendanceSink> {
    let Some(endpoint) = &config.attendance.endpoint else {
        info!("No attendance endpoint configured; sightings are only logged");
        return Arc::new(LoggingSink);
    };

    let timeout = Duration::from_millis(config.attendance.request_timeout_ms);
    match HttpAttendanceSink::new(endpoint.clone(), timeout) {
        Ok(sink) => {
            info!(endpoint = %sink.endpoint(), "Posting attendance to backend");
            Arc::new(sink)
        }
        Err(e) => {
            warn!(error = %e, "Failed to build HTTP client; sightings are only logged");
            Arc::new(LoggingSink)
        }
    }
}

struct ReportStore {
    last_report: Arc<RwLock<Option<ScanReport>>>,
}

impl ScanListener for ReportStore {
    fn on_device_found(&self, device: &DiscoveredDevice) {
        debug!(device_id = %device.device_id, rssi = ?device.rssi, "New device in scan");
    }

    fn on_scan_complete(&self, report: &ScanReport) {
        *self
            .last_report
            .write()
            .unwrap_or_else(PoisonError::into_inner) = Some(report.clone());
    }
}
