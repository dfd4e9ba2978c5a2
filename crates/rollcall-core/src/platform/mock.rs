//! In-memory radio.
//!
//! `MockRadio` records every broadcast and lets the caller inject sightings
//! into a running scan. Two radios can be wired together by turning one's
//! current broadcast into a sighting on the other with [`sighting_from`].

use std::sync::{Arc, Mutex, MutexGuard};

use async_trait::async_trait;
use tokio::sync::mpsc;
use tracing::debug;

use super::{
    BleAdvertiser, BleScanner, BroadcastRequest, PlatformError, ScanFilter, ScanOptions, Sighting,
};

const SIGHTING_BUFFER: usize = 256;

#[derive(Debug)]
struct RadioState {
    advertising_supported: bool,
    scanning_supported: bool,
    fail_next_broadcast: Option<String>,
    fail_next_scan: Option<String>,
    fail_stops: bool,
    current_broadcast: Option<BroadcastRequest>,
    broadcast_history: Vec<BroadcastRequest>,
    scan_tx: Option<mpsc::Sender<Sighting>>,
    last_scan: Option<(ScanFilter, ScanOptions)>,
    scans_started: usize,
    scans_stopped: usize,
}

impl Default for RadioState {
    fn default() -> Self {
        Self {
            advertising_supported: true,
            scanning_supported: true,
            fail_next_broadcast: None,
            fail_next_scan: None,
            fail_stops: false,
            current_broadcast: None,
            broadcast_history: Vec::new(),
            scan_tx: None,
            last_scan: None,
            scans_started: 0,
            scans_stopped: 0,
        }
    }
}

/// A fake BLE radio. Cheap to clone; clones share state.
#[derive(Debug, Clone, Default)]
pub struct MockRadio {
    state: Arc<Mutex<RadioState>>,
}

impl MockRadio {
    /// A radio that supports both roles.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// A radio without peripheral (advertising) support.
    #[must_use]
    pub fn without_advertising() -> Self {
        let radio = Self::new();
        radio.lock().advertising_supported = false;
        radio
    }

    /// A radio without central (scanning) support.
    #[must_use]
    pub fn without_scanning() -> Self {
        let radio = Self::new();
        radio.lock().scanning_supported = false;
        radio
    }

    /// Make the next `broadcast` call fail with the given message.
    pub fn fail_next_broadcast(&self, message: impl Into<String>) {
        self.lock().fail_next_broadcast = Some(message.into());
    }

    /// Make the next `start_scan` call fail with the given message.
    pub fn fail_next_scan(&self, message: impl Into<String>) {
        self.lock().fail_next_scan = Some(message.into());
    }

    /// Make every stop call report an error (the radio still stops).
    pub fn fail_stops(&self, fail: bool) {
        self.lock().fail_stops = fail;
    }

    /// The advertisement currently on the air.
    #[must_use]
    pub fn current_broadcast(&self) -> Option<BroadcastRequest> {
        self.lock().current_broadcast.clone()
    }

    /// Every successful broadcast, oldest first.
    #[must_use]
    pub fn broadcast_history(&self) -> Vec<BroadcastRequest> {
        self.lock().broadcast_history.clone()
    }

    /// Whether a scan is currently running.
    #[must_use]
    pub fn is_scanning(&self) -> bool {
        self.lock().scan_tx.is_some()
    }

    /// Filter and options of the most recent scan.
    #[must_use]
    pub fn last_scan(&self) -> Option<(ScanFilter, ScanOptions)> {
        self.lock().last_scan.clone()
    }

    /// Number of `(start_scan, stop_scan)` calls that succeeded.
    #[must_use]
    pub fn scan_counts(&self) -> (usize, usize) {
        let state = self.lock();
        (state.scans_started, state.scans_stopped)
    }

    /// Deliver a sighting to the running scan. Returns `false` when no scan is
    /// listening or the buffer is full.
    pub fn inject(&self, sighting: Sighting) -> bool {
        let state = self.lock();
        match &state.scan_tx {
            Some(tx) => tx.try_send(sighting).is_ok(),
            None => {
                debug!(device_id = %sighting.device_id, "Dropping sighting, no scan running");
                false
            }
        }
    }

    fn lock(&self) -> MutexGuard<'_, RadioState> {
        self.state
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
    }
}

/// Build the sighting another device would observe for `broadcast`.
#[must_use]
pub fn sighting_from(
    device_id: impl Into<String>,
    broadcast: &BroadcastRequest,
    rssi: Option<i16>,
) -> Sighting {
    let mut sighting = Sighting {
        device_id: device_id.into(),
        rssi,
        ..Sighting::default()
    };
    sighting
        .manufacturer_data
        .insert(broadcast.company_id, broadcast.payload.clone());
    sighting
}

#[async_trait]
impl BleAdvertiser for MockRadio {
    fn supports_advertising(&self) -> bool {
        self.lock().advertising_supported
    }

    async fn broadcast(&self, request: BroadcastRequest) -> Result<(), PlatformError> {
        let mut state = self.lock();
        if let Some(message) = state.fail_next_broadcast.take() {
            return Err(PlatformError::AdvertiseFailed(message));
        }
        state.broadcast_history.push(request.clone());
        state.current_broadcast = Some(request);
        Ok(())
    }

    async fn stop_broadcast(&self) -> Result<(), PlatformError> {
        let mut state = self.lock();
        state.current_broadcast = None;
        if state.fail_stops {
            return Err(PlatformError::Internal("stop_broadcast rejected".into()));
        }
        Ok(())
    }
}

#[async_trait]
impl BleScanner for MockRadio {
    fn supports_scanning(&self) -> bool {
        self.lock().scanning_supported
    }

    async fn start_scan(
        &self,
        filter: &ScanFilter,
        options: &ScanOptions,
    ) -> Result<mpsc::Receiver<Sighting>, PlatformError> {
        let mut state = self.lock();
        if let Some(message) = state.fail_next_scan.take() {
            return Err(PlatformError::ScanFailed(message));
        }
        let (tx, rx) = mpsc::channel(SIGHTING_BUFFER);
        state.scan_tx = Some(tx);
        state.last_scan = Some((filter.clone(), options.clone()));
        state.scans_started += 1;
        Ok(rx)
    }

    async fn stop_scan(&self) -> Result<(), PlatformError> {
        let mut state = self.lock();
        state.scan_tx = None;
        state.scans_stopped += 1;
        if state.fail_stops {
            return Err(PlatformError::Internal("stop_scan rejected".into()));
        }
        Ok(())
    }
}
