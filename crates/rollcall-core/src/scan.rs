//! Bounded-window discovery of nearby attendees.
//!
//! ```text
//!   Idle --start_scan--> Scanning --timeout | stop_scan--> Idle
//! ```
//!
//! One background task per scan consumes the platform's sighting channel, so
//! device-found notifications keep the platform's order. A device id is
//! announced once per scan; repeat sightings only refresh its RSSI, or fill in
//! a payload the first sighting lacked. When the window ends, by timeout or by
//! [`ScanController::stop_scan`], the task stops the radio, delivers whatever
//! sightings are still buffered, returns the controller to idle and then calls
//! [`ScanListener::on_scan_complete`] exactly once.
//!
//! Attendance records go through a per-session queue drained by its own task,
//! in order of identification. A slow sink never holds the scan window open.

use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};
use utoipa::ToSchema;
use uuid::Uuid;

use crate::config::BleConfig;
use crate::error::{Activity, Result, RollcallError};
use crate::payload::{self, Identity};
use crate::permissions::{PermissionGate, PermissionGroup};
use crate::platform::{BleScanner, ScanFilter, ScanOptions, Sighting};
use crate::sink::{AttendanceSink, SessionContext};

/// A nearby device seen during the current scan window.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[schema(example = json!({
    "device_id": "5C:F3:70:8B:12:AA",
    "name": null,
    "rssi": -58,
    "payload": { "id": 42 },
    "first_seen_at_utc": "2025-01-15T09:00:02Z",
    "last_seen_at_utc": "2025-01-15T09:00:09Z",
    "sightings": 4
}))]
pub struct DiscoveredDevice {
    /// Opaque platform identifier.
    pub device_id: String,

    /// Advertised name, if any.
    pub name: Option<String>,

    /// Latest signal strength in dBm.
    pub rssi: Option<i16>,

    /// Decoded identity; absent when the advertisement carried no valid payload.
    pub payload: Option<Identity>,

    /// First sighting in this window.
    pub first_seen_at_utc: DateTime<Utc>,

    /// Most recent sighting in this window.
    pub last_seen_at_utc: DateTime<Utc>,

    /// Number of sightings in this window.
    pub sightings: u32,
}

/// Why a scan window closed. Informational; the completion contract is the same.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum ScanEnd {
    /// The configured window elapsed.
    Timeout,
    /// [`ScanController::stop_scan`] was called.
    Stopped,
}

/// Final batch delivered once per scan.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct ScanReport {
    /// Scan session identifier.
    pub session_id: Uuid,

    /// When the scan started.
    pub started_at_utc: DateTime<Utc>,

    /// When the scan window closed.
    pub ended_at_utc: DateTime<Utc>,

    /// How it closed.
    pub ended_by: ScanEnd,

    /// Deduplicated devices, in order of first sighting.
    pub devices: Vec<DiscoveredDevice>,
}

/// One running discovery window.
#[derive(Debug, Clone)]
pub struct ScanSession {
    /// Session identifier.
    pub id: Uuid,

    /// When the scan started.
    pub started_at: DateTime<Utc>,

    /// Configured window length.
    pub duration: Duration,

    devices: Vec<DiscoveredDevice>,
    index: HashMap<String, usize>,
}

impl ScanSession {
    fn new(duration: Duration) -> Self {
        Self {
            id: Uuid::new_v4(),
            started_at: Utc::now(),
            duration,
            devices: Vec::new(),
            index: HashMap::new(),
        }
    }

    /// Devices seen so far, in order of first sighting.
    #[must_use]
    pub fn devices(&self) -> &[DiscoveredDevice] {
        &self.devices
    }

    /// Record a sighting and report what it changed.
    fn observe(&mut self, sighting: Sighting, filter: &ScanFilter) -> Observation {
        let now = Utc::now();

        if let Some(&slot) = self.index.get(&sighting.device_id) {
            let device = &mut self.devices[slot];
            if sighting.rssi.is_some() {
                device.rssi = sighting.rssi;
            }
            if device.name.is_none() {
                device.name.clone_from(&sighting.name);
            }
            device.last_seen_at_utc = now;
            device.sightings = device.sightings.saturating_add(1);

            // BlueZ often reports a device before its manufacturer data.
            if device.payload.is_none() {
                device.payload = decode_payload(&sighting, filter);
                if device.payload.is_some() {
                    return Observation::Identified(device.clone());
                }
            }
            return Observation::Repeat;
        }

        let device = DiscoveredDevice {
            device_id: sighting.device_id.clone(),
            payload: decode_payload(&sighting, filter),
            name: sighting.name,
            rssi: sighting.rssi,
            first_seen_at_utc: now,
            last_seen_at_utc: now,
            sightings: 1,
        };
        self.index.insert(sighting.device_id, self.devices.len());
        self.devices.push(device.clone());
        Observation::New(device)
    }

    fn finish(self, ended_by: ScanEnd) -> ScanReport {
        ScanReport {
            session_id: self.id,
            started_at_utc: self.started_at,
            ended_at_utc: Utc::now(),
            ended_by,
            devices: self.devices,
        }
    }
}

enum Observation {
    /// First sighting of this device id.
    New(DiscoveredDevice),
    /// Known device whose payload decoded only now.
    Identified(DiscoveredDevice),
    Repeat,
}

fn decode_payload(sighting: &Sighting, filter: &ScanFilter) -> Option<Identity> {
    let bytes = sighting.payload_bytes(filter)?;
    match payload::decode(bytes) {
        Ok(identity) => Some(identity),
        Err(e) => {
            debug!(device_id = %sighting.device_id, error = %e, "Undecodable payload");
            None
        }
    }
}

/// Receives scan notifications. Both methods run on the scan task and must
/// not block.
pub trait ScanListener: Send + Sync {
    /// A device id was seen for the first time in this window.
    fn on_device_found(&self, _device: &DiscoveredDevice) {}

    /// The window closed. Called exactly once per successful `start_scan`.
    fn on_scan_complete(&self, report: &ScanReport);
}

/// Listener that hands the final report to a oneshot channel.
pub struct CompletionListener {
    tx: Mutex<Option<oneshot::Sender<ScanReport>>>,
    found: Option<mpsc::UnboundedSender<DiscoveredDevice>>,
}

impl CompletionListener {
    /// Listener plus the receiver its report will arrive on.
    #[must_use]
    pub fn new() -> (Arc<Self>, oneshot::Receiver<ScanReport>) {
        let (tx, rx) = oneshot::channel();
        let listener = Self {
            tx: Mutex::new(Some(tx)),
            found: None,
        };
        (Arc::new(listener), rx)
    }

    /// Like [`CompletionListener::new`], also streaming each new device.
    #[must_use]
    pub fn with_devices() -> (
        Arc<Self>,
        mpsc::UnboundedReceiver<DiscoveredDevice>,
        oneshot::Receiver<ScanReport>,
    ) {
        let (tx, rx) = oneshot::channel();
        let (found_tx, found_rx) = mpsc::unbounded_channel();
        let listener = Self {
            tx: Mutex::new(Some(tx)),
            found: Some(found_tx),
        };
        (Arc::new(listener), found_rx, rx)
    }
}

impl ScanListener for CompletionListener {
    fn on_device_found(&self, device: &DiscoveredDevice) {
        if let Some(found) = &self.found {
            let _ = found.send(device.clone());
        }
    }

    fn on_scan_complete(&self, report: &ScanReport) {
        let tx = self
            .tx
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(tx) = tx {
            let _ = tx.send(report.clone());
        }
    }
}

/// Parameters of one scan. Unset fields fall back to configuration.
#[derive(Debug, Clone, Default)]
pub struct ScanRequest {
    /// Service filter; defaults to the configured service UUID and company id.
    pub filter: Option<ScanFilter>,

    /// Pass-through platform options.
    pub options: ScanOptions,

    /// Window length; defaults to `ble.scan_duration_ms`.
    pub timeout: Option<Duration>,

    /// Attendance session; sightings reach the sink only when set.
    pub session: Option<SessionContext>,
}

struct ActiveScan {
    session: ScanSession,
    stop_tx: Option<oneshot::Sender<()>>,
    task: Option<JoinHandle<()>>,
}

#[derive(Default)]
enum ScanState {
    #[default]
    Idle,
    /// Waiting on permissions or the radio. Holds callers of `stop_scan`
    /// that arrived in the meantime; they are released after completion.
    Starting(Vec<oneshot::Sender<()>>),
    Scanning(ActiveScan),
}

enum PendingStop {
    Starting(oneshot::Receiver<()>),
    Scanning {
        stop_tx: Option<oneshot::Sender<()>>,
        task: Option<JoinHandle<()>>,
    },
}

type SharedState = Arc<Mutex<ScanState>>;

fn lock(state: &SharedState) -> MutexGuard<'_, ScanState> {
    state.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Owns the single discovery scan of this device.
pub struct ScanController {
    radio: Arc<dyn BleScanner>,
    permissions: Arc<PermissionGate>,
    sink: Option<Arc<dyn AttendanceSink>>,
    config: BleConfig,
    state: SharedState,
}

impl fmt::Debug for ScanController {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ScanController")
            .field("config", &self.config)
            .field("scanning", &self.is_scanning())
            .finish_non_exhaustive()
    }
}

impl ScanController {
    /// Create an idle controller without an attendance sink.
    pub fn new(
        radio: Arc<dyn BleScanner>,
        permissions: Arc<PermissionGate>,
        config: BleConfig,
    ) -> Self {
        Self {
            radio,
            permissions,
            sink: None,
            config,
            state: Arc::default(),
        }
    }

    /// Forward newly confirmed attendees to `sink`.
    #[must_use]
    pub fn with_sink(mut self, sink: Arc<dyn AttendanceSink>) -> Self {
        self.sink = Some(sink);
        self
    }

    /// Whether the platform can scan at all.
    pub fn is_supported(&self) -> bool {
        self.radio.supports_scanning()
    }

    /// Start a scan window and return its session id immediately.
    ///
    /// # Errors
    ///
    /// - [`RollcallError::AlreadyActive`] if a scan is running or starting
    /// - [`RollcallError::PlatformUnsupported`] if the radio cannot scan
    /// - [`RollcallError::PermissionDenied`] naming each refused permission
    /// - [`RollcallError::Platform`] if the radio refuses to start
    ///
    /// On error no completion callback fires and the controller stays idle.
    pub async fn start_scan(
        &self,
        request: ScanRequest,
        listener: Arc<dyn ScanListener>,
    ) -> Result<Uuid> {
        {
            let mut state = lock(&self.state);
            if !matches!(*state, ScanState::Idle) {
                warn!("Scan already in progress; ignoring start request");
                return Err(RollcallError::AlreadyActive(Activity::Scanning));
            }
            *state = ScanState::Starting(Vec::new());
        }

        let filter = request
            .filter
            .clone()
            .unwrap_or_else(|| self.config.scan_filter());
        let service_uuid = filter.service_uuid;
        let rx = match self.bring_up(&filter, &request.options).await {
            Ok(rx) => rx,
            Err(e) => {
                warn!(error = %e, "Failed to start scan");
                *lock(&self.state) = ScanState::Idle;
                return Err(e);
            }
        };

        let timeout = request
            .timeout
            .unwrap_or_else(|| self.config.scan_duration());
        let session = ScanSession::new(timeout);
        let session_id = session.id;
        let attendance = self.attendance_queue(session_id, request.session);
        let (stop_tx, stop_rx) = oneshot::channel();

        let mut driver = ScanDriver {
            session_id,
            radio: Arc::clone(&self.radio),
            state: Arc::clone(&self.state),
            attendance,
            listener,
            filter,
            stop_waiters: Vec::new(),
        };

        // The task is spawned under the lock so `Scanning` is never visible
        // without its join handle.
        let stop_requested = {
            let mut state = lock(&self.state);
            if let ScanState::Starting(waiters) = std::mem::take(&mut *state) {
                driver.stop_waiters = waiters;
            }
            let stop_requested = !driver.stop_waiters.is_empty();
            let stop_tx = if stop_requested {
                let _ = stop_tx.send(());
                None
            } else {
                Some(stop_tx)
            };
            let task = tokio::spawn(driver.run(rx, stop_rx, timeout));
            *state = ScanState::Scanning(ActiveScan {
                session,
                stop_tx,
                task: Some(task),
            });
            stop_requested
        };

        info!(
            session_id = %session_id,
            service_uuid = %service_uuid,
            timeout_ms = timeout.as_millis(),
            stop_requested,
            "Scan started"
        );
        Ok(session_id)
    }

    /// Spawn the task that feeds this session's identities to the sink.
    fn attendance_queue(
        &self,
        session_id: Uuid,
        context: Option<SessionContext>,
    ) -> Option<mpsc::UnboundedSender<Identity>> {
        let (Some(sink), Some(context)) = (self.sink.clone(), context) else {
            return None;
        };
        let (tx, rx) = mpsc::unbounded_channel();
        tokio::spawn(record_attendance(session_id, sink, context, rx));
        Some(tx)
    }

    async fn bring_up(
        &self,
        filter: &ScanFilter,
        options: &ScanOptions,
    ) -> Result<mpsc::Receiver<Sighting>> {
        if !self.radio.supports_scanning() {
            return Err(RollcallError::PlatformUnsupported {
                activity: Activity::Scanning,
                reason: "the Bluetooth adapter has no central role".to_string(),
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

        Ok(self.radio.start_scan(filter, options).await?)
    }

    /// End the current scan early.
    ///
    /// A no-op when idle. Otherwise returns once the completion callback has
    /// been delivered, with the same contract as a natural timeout. A stop that
    /// arrives while the scan is still starting closes the window as soon as
    /// the radio is up; if the start fails instead, this returns with no
    /// completion.
    pub async fn stop_scan(&self) {
        let pending = {
            let mut state = lock(&self.state);
            match &mut *state {
                ScanState::Idle => {
                    debug!("No active scan to stop");
                    return;
                }
                ScanState::Starting(waiters) => {
                    let (tx, rx) = oneshot::channel();
                    waiters.push(tx);
                    PendingStop::Starting(rx)
                }
                ScanState::Scanning(active) => PendingStop::Scanning {
                    stop_tx: active.stop_tx.take(),
                    task: active.task.take(),
                },
            }
        };

        match pending {
            PendingStop::Starting(done) => {
                info!("Stop requested while scan is starting");
                let _ = done.await;
            }
            PendingStop::Scanning { stop_tx, task } => {
                if let Some(stop_tx) = stop_tx {
                    let _ = stop_tx.send(());
                }
                if let Some(task) = task {
                    if let Err(e) = task.await {
                        warn!(error = %e, "Scan task ended abnormally");
                    }
                }
            }
        }
    }

    /// Whether a scan window is open.
    pub fn is_scanning(&self) -> bool {
        matches!(*lock(&self.state), ScanState::Scanning(_))
    }

    /// Id of the open scan window.
    pub fn current_session_id(&self) -> Option<Uuid> {
        match &*lock(&self.state) {
            ScanState::Scanning(active) => Some(active.session.id),
            _ => None,
        }
    }

    /// Devices seen so far in the open window; empty when idle.
    pub fn current_devices(&self) -> Vec<DiscoveredDevice> {
        match &*lock(&self.state) {
            ScanState::Scanning(active) => active.session.devices().to_vec(),
            _ => Vec::new(),
        }
    }
}

struct ScanDriver {
    session_id: Uuid,
    radio: Arc<dyn BleScanner>,
    state: SharedState,
    attendance: Option<mpsc::UnboundedSender<Identity>>,
    listener: Arc<dyn ScanListener>,
    filter: ScanFilter,
    stop_waiters: Vec<oneshot::Sender<()>>,
}

impl ScanDriver {
    async fn run(
        self,
        mut rx: mpsc::Receiver<Sighting>,
        mut stop_rx: oneshot::Receiver<()>,
        timeout: Duration,
    ) {
        let deadline = tokio::time::sleep(timeout);
        tokio::pin!(deadline);
        let mut radio_open = true;

        let ended_by = loop {
            tokio::select! {
                biased;
                _ = &mut stop_rx => break ScanEnd::Stopped,
                () = &mut deadline => break ScanEnd::Timeout,
                sighting = rx.recv(), if radio_open => match sighting {
                    Some(sighting) => self.handle(sighting),
                    None => {
                        debug!(session_id = %self.session_id, "Platform closed the sighting stream");
                        radio_open = false;
                    }
                },
            }
        };

        if let Err(e) = self.radio.stop_scan().await {
            warn!(session_id = %self.session_id, error = %e, "Platform failed to stop scan");
        }
        while let Ok(sighting) = rx.try_recv() {
            self.handle(sighting);
        }

        let session = {
            let mut state = lock(&self.state);
            match std::mem::take(&mut *state) {
                ScanState::Scanning(active) if active.session.id == self.session_id => {
                    active.session
                }
                other => {
                    *state = other;
                    warn!(session_id = %self.session_id, "Scan state replaced before completion");
                    return;
                }
            }
        };

        let report = session.finish(ended_by);
        info!(
            session_id = %self.session_id,
            ended_by = ?ended_by,
            devices = report.devices.len(),
            "Scan complete"
        );
        self.listener.on_scan_complete(&report);

        for waiter in self.stop_waiters {
            let _ = waiter.send(());
        }
    }

    fn handle(&self, sighting: Sighting) {
        let observation = {
            let mut state = lock(&self.state);
            let ScanState::Scanning(active) = &mut *state else {
                return;
            };
            active.session.observe(sighting, &self.filter)
        };

        let device = match observation {
            Observation::New(device) => {
                debug!(
                    session_id = %self.session_id,
                    device_id = %device.device_id,
                    rssi = ?device.rssi,
                    identity = ?device.payload.as_ref().map(|p| p.id),
                    "Device found"
                );
                self.listener.on_device_found(&device);
                device
            }
            Observation::Identified(device) => {
                debug!(
                    session_id = %self.session_id,
                    device_id = %device.device_id,
                    identity = ?device.payload.as_ref().map(|p| p.id),
                    "Payload arrived after first sighting"
                );
                device
            }
            Observation::Repeat => return,
        };

        if let (Some(identity), Some(attendance)) = (device.payload, &self.attendance) {
            // Closed only if the recorder task panicked.
            if attendance.send(identity).is_err() {
                warn!(session_id = %self.session_id, "Attendance queue closed");
            }
        }
    }
}

/// Drain one session's identities into the sink, in order. Ends once the
/// scan driver drops its sender and the backlog is delivered.
async fn record_attendance(
    session_id: Uuid,
    sink: Arc<dyn AttendanceSink>,
    context: SessionContext,
    mut rx: mpsc::UnboundedReceiver<Identity>,
) {
    let mut recorded = 0_usize;
    while let Some(identity) = rx.recv().await {
        match sink.record_sighting(&identity, &context).await {
            Ok(()) => recorded += 1,
            Err(e) => warn!(
                identity = %identity,
                session_id = %context.session_id,
                error = %e,
                "Failed to record attendance"
            ),
        }
    }
    debug!(scan_session_id = %session_id, recorded, "Attendance queue drained");
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use super::*;
    use crate::permissions::testing::ScriptedPrompter;
    use crate::permissions::Permission;
    use crate::platform::mock::MockRadio;
    use crate::sink::testing::RecordingSink;

    #[derive(Default)]
    struct CountingListener {
        found: Mutex<Vec<DiscoveredDevice>>,
        completed: Mutex<Vec<ScanReport>>,
        completions: AtomicUsize,
    }

    impl ScanListener for CountingListener {
        fn on_device_found(&self, device: &DiscoveredDevice) {
            self.found.lock().unwrap().push(device.clone());
        }

        fn on_scan_complete(&self, report: &ScanReport) {
            self.completions.fetch_add(1, Ordering::SeqCst);
            self.completed.lock().unwrap().push(report.clone());
        }
    }

    fn controller(radio: &MockRadio) -> ScanController {
        ScanController::new(
            Arc::new(radio.clone()),
            Arc::new(PermissionGate::default()),
            BleConfig::default(),
        )
    }

    fn sighting(device_id: &str, id: u32, rssi: i16) -> Sighting {
        let mut sighting = Sighting {
            device_id: device_id.to_string(),
            rssi: Some(rssi),
            ..Sighting::default()
        };
        sighting
            .manufacturer_data
            .insert(crate::config::DEFAULT_COMPANY_ID, id.to_be_bytes().to_vec());
        sighting
    }

    fn request(timeout_ms: u64) -> ScanRequest {
        ScanRequest {
            timeout: Some(Duration::from_millis(timeout_ms)),
            ..ScanRequest::default()
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_repeat_sightings_notify_once() {
        let radio = MockRadio::new();
        let scans = controller(&radio);
        let listener = Arc::new(CountingListener::default());

        scans.start_scan(request(10_000), listener.clone()).await.unwrap();
        for rssi in [-70, -65, -60, -55, -50] {
            assert!(radio.inject(sighting("AA:BB:CC:DD:EE:01", 7, rssi)));
        }
        tokio::time::sleep(Duration::from_secs(11)).await;

        assert_eq!(listener.found.lock().unwrap().len(), 1);
        let completed = listener.completed.lock().unwrap();
        assert_eq!(completed.len(), 1);
        let devices = &completed[0].devices;
        assert_eq!(devices.len(), 1);
        assert_eq!(devices[0].payload, Some(Identity::new(7)));
        assert_eq!(devices[0].rssi, Some(-50));
        assert_eq!(devices[0].sightings, 5);
    }

    #[tokio::test(start_paused = true)]
    async fn test_timeout_completes_exactly_once() {
        let radio = MockRadio::new();
        let scans = controller(&radio);
        let listener = Arc::new(CountingListener::default());

        scans.start_scan(request(10_000), listener.clone()).await.unwrap();
        assert!(scans.is_scanning());

        tokio::time::sleep(Duration::from_millis(9_000)).await;
        assert_eq!(listener.completions.load(Ordering::SeqCst), 0);

        tokio::time::sleep(Duration::from_millis(2_000)).await;
        assert_eq!(listener.completions.load(Ordering::SeqCst), 1);
        assert!(!scans.is_scanning());
        assert_eq!(radio.scan_counts(), (1, 1));
        assert_eq!(
            listener.completed.lock().unwrap()[0].ended_by,
            ScanEnd::Timeout
        );

        // A late stop after the natural timeout must not fire again.
        scans.stop_scan().await;
        tokio::time::sleep(Duration::from_secs(30)).await;
        assert_eq!(listener.completions.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_stop_completes_exactly_once() {
        let radio = MockRadio::new();
        let scans = controller(&radio);
        let listener = Arc::new(CountingListener::default());

        scans.start_scan(request(10_000), listener.clone()).await.unwrap();
        radio.inject(sighting("dev-1", 1, -60));
        radio.inject(sighting("dev-2", 2, -61));

        scans.stop_scan().await;
        // Completion has been delivered by the time stop_scan returns.
        assert_eq!(listener.completions.load(Ordering::SeqCst), 1);
        assert!(!scans.is_scanning());

        scans.stop_scan().await;
        tokio::time::sleep(Duration::from_secs(30)).await;
        assert_eq!(listener.completions.load(Ordering::SeqCst), 1);

        let completed = listener.completed.lock().unwrap();
        assert_eq!(completed[0].ended_by, ScanEnd::Stopped);
        // Buffered sightings are delivered before completion.
        assert_eq!(completed[0].devices.len(), 2);
        assert_eq!(listener.found.lock().unwrap().len(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_second_start_fails_fast() {
        let radio = MockRadio::new();
        let scans = controller(&radio);
        let first = Arc::new(CountingListener::default());
        let second = Arc::new(CountingListener::default());

        let session_id = scans.start_scan(request(10_000), first.clone()).await.unwrap();
        let err = scans
            .start_scan(request(10_000), second.clone())
            .await
            .unwrap_err();

        assert!(matches!(err, RollcallError::AlreadyActive(Activity::Scanning)));
        assert_eq!(scans.current_session_id(), Some(session_id));
        assert_eq!(radio.scan_counts(), (1, 0));

        tokio::time::sleep(Duration::from_secs(11)).await;
        assert_eq!(first.completions.load(Ordering::SeqCst), 1);
        assert_eq!(second.completions.load(Ordering::SeqCst), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_undecodable_payload_still_recorded() {
        let radio = MockRadio::new();
        let scans = controller(&radio);
        let listener = Arc::new(CountingListener::default());

        scans.start_scan(request(1_000), listener.clone()).await.unwrap();
        let mut short = Sighting {
            device_id: "short".into(),
            ..Sighting::default()
        };
        short
            .manufacturer_data
            .insert(crate::config::DEFAULT_COMPANY_ID, vec![0x01, 0x02]);
        radio.inject(short);
        radio.inject(Sighting {
            device_id: "bare".into(),
            name: Some("Pixel 7".into()),
            ..Sighting::default()
        });
        tokio::time::sleep(Duration::from_secs(2)).await;

        let completed = listener.completed.lock().unwrap();
        let devices = &completed[0].devices;
        assert_eq!(devices.len(), 2);
        assert!(devices.iter().all(|d| d.payload.is_none()));
        assert_eq!(devices[1].name.as_deref(), Some("Pixel 7"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_new_scan_starts_clean() {
        let radio = MockRadio::new();
        let scans = controller(&radio);
        let listener = Arc::new(CountingListener::default());

        scans.start_scan(request(1_000), listener.clone()).await.unwrap();
        radio.inject(sighting("dev-1", 1, -60));
        tokio::time::sleep(Duration::from_secs(2)).await;

        scans.start_scan(request(1_000), listener.clone()).await.unwrap();
        assert!(scans.current_devices().is_empty());
        radio.inject(sighting("dev-1", 1, -60));
        tokio::time::sleep(Duration::from_secs(2)).await;

        assert_eq!(listener.found.lock().unwrap().len(), 2);
        let completed = listener.completed.lock().unwrap();
        assert_eq!(completed.len(), 2);
        assert_ne!(completed[0].session_id, completed[1].session_id);
    }

    #[tokio::test(start_paused = true)]
    async fn test_sink_receives_each_identity_once() {
        let radio = MockRadio::new();
        let sink = RecordingSink {
            reject_ids: vec![2],
            ..RecordingSink::default()
        };
        let scans = controller(&radio).with_sink(Arc::new(sink.clone()));
        let listener = Arc::new(CountingListener::default());

        let request = ScanRequest {
            timeout: Some(Duration::from_secs(5)),
            session: Some(SessionContext::new("session-1")),
            ..ScanRequest::default()
        };
        scans.start_scan(request, listener.clone()).await.unwrap();
        radio.inject(sighting("dev-1", 1, -60));
        radio.inject(sighting("dev-2", 2, -60));
        radio.inject(sighting("dev-1", 1, -55));
        radio.inject(Sighting {
            device_id: "no-payload".into(),
            ..Sighting::default()
        });
        radio.inject(sighting("dev-3", 3, -60));
        tokio::time::sleep(Duration::from_secs(6)).await;

        // The rejected identity does not abort the scan.
        assert_eq!(sink.ids(), vec![1, 2, 3]);
        assert_eq!(listener.completed.lock().unwrap()[0].devices.len(), 4);
        assert!(sink
            .records
            .lock()
            .unwrap()
            .iter()
            .all(|(_, ctx)| ctx.session_id == "session-1"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_no_sink_calls_without_session() {
        let radio = MockRadio::new();
        let sink = RecordingSink::default();
        let scans = controller(&radio).with_sink(Arc::new(sink.clone()));
        let listener = Arc::new(CountingListener::default());

        scans.start_scan(request(1_000), listener).await.unwrap();
        radio.inject(sighting("dev-1", 1, -60));
        tokio::time::sleep(Duration::from_secs(2)).await;

        assert!(sink.ids().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_slow_sink_does_not_delay_completion() {
        let radio = MockRadio::new();
        let sink = RecordingSink {
            delay: Duration::from_secs(10),
            ..RecordingSink::default()
        };
        let scans = controller(&radio).with_sink(Arc::new(sink.clone()));
        let listener = Arc::new(CountingListener::default());

        let request = ScanRequest {
            timeout: Some(Duration::from_secs(1)),
            session: Some(SessionContext::new("session-1")),
            ..ScanRequest::default()
        };
        scans.start_scan(request, listener.clone()).await.unwrap();
        for (device, id) in [("dev-1", 1), ("dev-2", 2), ("dev-3", 3)] {
            radio.inject(sighting(device, id, -60));
        }

        tokio::time::sleep(Duration::from_millis(1_100)).await;
        assert_eq!(listener.completions.load(Ordering::SeqCst), 1);
        assert!(!scans.is_scanning());
        assert!(!radio.is_scanning());
        assert!(sink.ids().is_empty());

        // The backlog still reaches the sink, in order, after the window.
        tokio::time::sleep(Duration::from_secs(31)).await;
        assert_eq!(sink.ids(), vec![1, 2, 3]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_stop_with_slow_sink_returns_promptly() {
        let radio = MockRadio::new();
        let sink = RecordingSink {
            delay: Duration::from_secs(10),
            ..RecordingSink::default()
        };
        let scans = controller(&radio).with_sink(Arc::new(sink.clone()));
        let listener = Arc::new(CountingListener::default());

        let request = ScanRequest {
            timeout: Some(Duration::from_secs(60)),
            session: Some(SessionContext::new("session-1")),
            ..ScanRequest::default()
        };
        scans.start_scan(request, listener.clone()).await.unwrap();
        for id in 1..=5 {
            radio.inject(sighting(&format!("dev-{id}"), id, -60));
        }
        tokio::time::sleep(Duration::from_millis(10)).await;

        let started = tokio::time::Instant::now();
        scans.stop_scan().await;
        assert!(started.elapsed() < Duration::from_secs(1));
        assert_eq!(listener.completions.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_payload_filled_in_by_later_sighting() {
        let radio = MockRadio::new();
        let sink = RecordingSink::default();
        let scans = controller(&radio).with_sink(Arc::new(sink.clone()));
        let listener = Arc::new(CountingListener::default());

        let request = ScanRequest {
            timeout: Some(Duration::from_secs(5)),
            session: Some(SessionContext::new("session-1")),
            ..ScanRequest::default()
        };
        scans.start_scan(request, listener.clone()).await.unwrap();
        radio.inject(Sighting {
            device_id: "dev-5".into(),
            rssi: Some(-70),
            ..Sighting::default()
        });
        radio.inject(sighting("dev-5", 5, -62));
        radio.inject(sighting("dev-5", 5, -61));
        tokio::time::sleep(Duration::from_secs(6)).await;

        let found = listener.found.lock().unwrap();
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].payload, None);

        let completed = listener.completed.lock().unwrap();
        let device = &completed[0].devices[0];
        assert_eq!(device.payload, Some(Identity::new(5)));
        assert_eq!(device.sightings, 3);
        assert_eq!(sink.ids(), vec![5]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_stop_while_starting_closes_window() {
        let radio = MockRadio::new();
        let prompter = ScriptedPrompter {
            delay: Duration::from_secs(1),
            ..ScriptedPrompter::default()
        };
        let scans = Arc::new(ScanController::new(
            Arc::new(radio.clone()),
            Arc::new(PermissionGate::new(prompter)),
            BleConfig::default(),
        ));
        let listener = Arc::new(CountingListener::default());

        let starting = {
            let scans = Arc::clone(&scans);
            let listener = listener.clone();
            tokio::spawn(async move { scans.start_scan(request(60_000), listener).await })
        };
        tokio::time::sleep(Duration::from_millis(500)).await;
        assert!(!scans.is_scanning());

        scans.stop_scan().await;
        assert_eq!(listener.completions.load(Ordering::SeqCst), 1);
        assert!(!scans.is_scanning());
        assert!(!radio.is_scanning());

        let session_id = starting.await.unwrap().unwrap();
        let completed = listener.completed.lock().unwrap();
        assert_eq!(completed[0].session_id, session_id);
        assert_eq!(completed[0].ended_by, ScanEnd::Stopped);
        drop(completed);

        tokio::time::sleep(Duration::from_secs(120)).await;
        assert_eq!(listener.completions.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_stop_while_starting_released_on_failure() {
        let radio = MockRadio::new();
        radio.fail_next_scan("SCAN_FAILED_INTERNAL_ERROR");
        let prompter = ScriptedPrompter {
            delay: Duration::from_secs(1),
            ..ScriptedPrompter::default()
        };
        let scans = Arc::new(ScanController::new(
            Arc::new(radio.clone()),
            Arc::new(PermissionGate::new(prompter)),
            BleConfig::default(),
        ));
        let listener = Arc::new(CountingListener::default());

        let starting = {
            let scans = Arc::clone(&scans);
            let listener = listener.clone();
            tokio::spawn(async move { scans.start_scan(request(60_000), listener).await })
        };
        tokio::time::sleep(Duration::from_millis(500)).await;

        scans.stop_scan().await;
        assert!(starting.await.unwrap().is_err());
        assert_eq!(listener.completions.load(Ordering::SeqCst), 0);
        assert!(!scans.is_scanning());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_stop_racing_start_waits_for_completion() {
        for _ in 0..100 {
            let radio = MockRadio::new();
            let scans = Arc::new(controller(&radio));
            let listener = Arc::new(CountingListener::default());

            let stopper = {
                let scans = Arc::clone(&scans);
                let listener = listener.clone();
                tokio::spawn(async move {
                    while scans.current_session_id().is_none() {
                        tokio::task::yield_now().await;
                    }
                    scans.stop_scan().await;
                    listener.completions.load(Ordering::SeqCst)
                })
            };
            scans.start_scan(request(60_000), listener.clone()).await.unwrap();

            assert_eq!(stopper.await.unwrap(), 1);
            assert!(!scans.is_scanning());
        }
    }

    #[tokio::test]
    async fn test_permission_denied_stays_idle() {
        let radio = MockRadio::new();
        let scans = ScanController::new(
            Arc::new(radio.clone()),
            Arc::new(PermissionGate::new(ScriptedPrompter::denying(&[
                Permission::BluetoothScan,
                Permission::AccessFineLocation,
            ]))),
            BleConfig::default(),
        );
        let listener = Arc::new(CountingListener::default());

        let err = scans
            .start_scan(ScanRequest::default(), listener.clone())
            .await
            .unwrap_err();
        let RollcallError::PermissionDenied { denied, .. } = err else {
            panic!("expected permission denial, got {err:?}");
        };
        assert_eq!(
            denied,
            vec![
                "android.permission.ACCESS_FINE_LOCATION",
                "android.permission.BLUETOOTH_SCAN"
            ]
        );
        assert!(!scans.is_scanning());
        assert!(!radio.is_scanning());
        assert_eq!(listener.completions.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_platform_failures() {
        let radio = MockRadio::without_scanning();
        let scans = controller(&radio);
        let err = scans
            .start_scan(ScanRequest::default(), Arc::new(CountingListener::default()))
            .await
            .unwrap_err();
        assert!(matches!(err, RollcallError::PlatformUnsupported { .. }));

        let radio = MockRadio::new();
        radio.fail_next_scan("SCAN_FAILED_APPLICATION_REGISTRATION_FAILED");
        let scans = controller(&radio);
        let err = scans
            .start_scan(ScanRequest::default(), Arc::new(CountingListener::default()))
            .await
            .unwrap_err();
        assert!(err.is_retryable());
        assert!(!scans.is_scanning());
    }

    #[tokio::test(start_paused = true)]
    async fn test_stop_failure_still_completes() {
        let radio = MockRadio::new();
        radio.fail_stops(true);
        let scans = controller(&radio);
        let listener = Arc::new(CountingListener::default());

        scans.start_scan(request(10_000), listener.clone()).await.unwrap();
        scans.stop_scan().await;

        assert_eq!(listener.completions.load(Ordering::SeqCst), 1);
        assert!(!scans.is_scanning());
    }

    #[tokio::test(start_paused = true)]
    async fn test_default_filter_and_timeout_from_config() {
        let radio = MockRadio::new();
        let scans = controller(&radio);
        let (listener, done) = CompletionListener::new();

        scans
            .start_scan(ScanRequest::default(), listener)
            .await
            .unwrap();
        let (filter, _) = radio.last_scan().unwrap();
        assert_eq!(filter, BleConfig::default().scan_filter());

        tokio::time::sleep(Duration::from_millis(14_900)).await;
        assert!(scans.is_scanning());
        let report = done.await.unwrap();
        assert_eq!(report.ended_by, ScanEnd::Timeout);
    }

    #[tokio::test]
    async fn test_stop_when_idle_is_noop() {
        let radio = MockRadio::new();
        let scans = controller(&radio);
        scans.stop_scan().await;
        scans.stop_scan().await;
        assert_eq!(radio.scan_counts(), (0, 0));
    }
}
