//! BlueZ radio over D-Bus.
//!
//! Advertising registers an LE advertisement with the adapter and keeps the
//! handle alive until [`BleAdvertiser::stop_broadcast`]. Scanning runs
//! `discover_devices_with_changes` on a background task that turns adapter
//! events into [`Sighting`]s; dropping the event stream ends discovery.

use std::collections::{BTreeMap, BTreeSet, HashSet};
use std::ops::ControlFlow;
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use bluer::adv::{Advertisement, AdvertisementHandle, Type};
use bluer::{Adapter, AdapterEvent, Address, DiscoveryFilter, DiscoveryTransport, Session};
use futures::{Stream, StreamExt};
use tokio::sync::mpsc::error::TrySendError;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use super::{
    AdvertiseMode, BleAdvertiser, BleScanner, BroadcastRequest, PlatformError, ScanFilter,
    ScanOptions, Sighting,
};

const SIGHTING_BUFFER: usize = 256;

impl From<bluer::Error> for PlatformError {
    fn from(e: bluer::Error) -> Self {
        Self::Internal(e.to_string())
    }
}

struct RunningScan {
    stop_tx: oneshot::Sender<()>,
    task: JoinHandle<()>,
}

/// Radio backed by the system's default (or a named) BlueZ adapter.
pub struct BluezRadio {
    _session: Session,
    adapter: Adapter,
    advertisement: Mutex<Option<AdvertisementHandle>>,
    scan: Mutex<Option<RunningScan>>,
}

impl BluezRadio {
    /// Connect to BlueZ and open the default adapter.
    ///
    /// # Errors
    ///
    /// Returns [`PlatformError::AdapterNotFound`] if there is no adapter and
    /// [`PlatformError::AdapterPoweredOff`] if it is not powered.
    pub async fn new() -> Result<Self, PlatformError> {
        let session = Session::new().await?;
        let adapter = session
            .default_adapter()
            .await
            .map_err(|_| PlatformError::AdapterNotFound)?;
        Self::open(session, adapter).await
    }

    /// Connect to BlueZ and open the adapter called `name` (e.g. `hci0`).
    ///
    /// # Errors
    ///
    /// Same as [`BluezRadio::new`].
    pub async fn with_adapter(name: &str) -> Result<Self, PlatformError> {
        let session = Session::new().await?;
        let adapter = session
            .adapter(name)
            .map_err(|_| PlatformError::AdapterNotFound)?;
        Self::open(session, adapter).await
    }

    async fn open(session: Session, adapter: Adapter) -> Result<Self, PlatformError> {
        if !adapter.is_powered().await? {
            return Err(PlatformError::AdapterPoweredOff);
        }
        info!(adapter = %adapter.name(), address = %adapter.address().await?, "Bluetooth adapter ready");

        Ok(Self {
            _session: session,
            adapter,
            advertisement: Mutex::new(None),
            scan: Mutex::new(None),
        })
    }

    fn advertisement(&self) -> MutexGuard<'_, Option<AdvertisementHandle>> {
        self.advertisement
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    fn scan(&self) -> MutexGuard<'_, Option<RunningScan>> {
        self.scan.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

const fn interval(mode: AdvertiseMode) -> Duration {
    match mode {
        AdvertiseMode::LowPower => Duration::from_millis(1000),
        AdvertiseMode::Balanced => Duration::from_millis(250),
        AdvertiseMode::LowLatency => Duration::from_millis(100),
    }
}

#[async_trait]
impl BleAdvertiser for BluezRadio {
    fn supports_advertising(&self) -> bool {
        true
    }

    async fn broadcast(&self, request: BroadcastRequest) -> Result<(), PlatformError> {
        let options = &request.options;
        let local_name = if options.include_device_name {
            Some(self.adapter.alias().await?)
        } else {
            None
        };

        let advertisement = Advertisement {
            advertisement_type: if options.connectable {
                Type::Peripheral
            } else {
                Type::Broadcast
            },
            service_uuids: BTreeSet::from([request.service_uuid]),
            manufacturer_data: BTreeMap::from([(request.company_id, request.payload.clone())]),
            local_name,
            tx_power: Some(options.tx_power_level.dbm()),
            min_interval: Some(interval(options.advertise_mode)),
            max_interval: Some(interval(options.advertise_mode)),
            ..Advertisement::default()
        };

        let handle = self
            .adapter
            .advertise(advertisement)
            .await
            .map_err(|e| PlatformError::AdvertiseFailed(e.to_string()))?;
        debug!(company_id = request.company_id, bytes = request.payload.len(), "Advertisement registered");

        // Replacing an old handle unregisters it.
        *self.advertisement() = Some(handle);
        Ok(())
    }

    async fn stop_broadcast(&self) -> Result<(), PlatformError> {
        if self.advertisement().take().is_some() {
            debug!("Advertisement unregistered");
        }
        Ok(())
    }
}

#[async_trait]
impl BleScanner for BluezRadio {
    fn supports_scanning(&self) -> bool {
        true
    }

    async fn start_scan(
        &self,
        filter: &ScanFilter,
        options: &ScanOptions,
    ) -> Result<mpsc::Receiver<Sighting>, PlatformError> {
        self.stop_scan().await?;

        self.adapter
            .set_discovery_filter(DiscoveryFilter {
                uuids: HashSet::from([filter.service_uuid]),
                transport: DiscoveryTransport::Le,
                duplicate_data: true,
                ..DiscoveryFilter::default()
            })
            .await
            .map_err(|e| PlatformError::ScanFailed(e.to_string()))?;

        let events = self
            .adapter
            .discover_devices_with_changes()
            .await
            .map_err(|e| PlatformError::ScanFailed(e.to_string()))?;
        debug!(scan_mode = ?options.scan_mode, "BlueZ discovery started");

        let (tx, rx) = mpsc::channel(SIGHTING_BUFFER);
        let (stop_tx, stop_rx) = oneshot::channel();
        let task = tokio::spawn(forward(self.adapter.clone(), Box::pin(events), tx, stop_rx));
        *self.scan() = Some(RunningScan { stop_tx, task });
        Ok(rx)
    }

    async fn stop_scan(&self) -> Result<(), PlatformError> {
        let running = self.scan().take();
        if let Some(RunningScan { stop_tx, task }) = running {
            let _ = stop_tx.send(());
            task.await
                .map_err(|e| PlatformError::Internal(format!("discovery task failed: {e}")))?;
            debug!("BlueZ discovery stopped");
        }
        Ok(())
    }
}

async fn forward(
    adapter: Adapter,
    mut events: std::pin::Pin<Box<dyn Stream<Item = AdapterEvent> + Send>>,
    tx: mpsc::Sender<Sighting>,
    mut stop_rx: oneshot::Receiver<()>,
) {
    loop {
        tokio::select! {
            _ = &mut stop_rx => break,
            event = events.next() => match event {
                Some(AdapterEvent::DeviceAdded(address)) => match read_sighting(&adapter, address).await {
                    Ok(sighting) => {
                        if offer(&tx, sighting).is_break() {
                            break;
                        }
                    }
                    Err(e) => debug!(%address, error = %e, "Device vanished before it could be read"),
                },
                Some(_) => {}
                None => {
                    warn!("BlueZ discovery stream ended");
                    break;
                }
            },
        }
    }
}

/// Hand a sighting to the scan task without waiting for room. The scan task
/// may itself be waiting on [`BluezRadio::stop_scan`], so blocking here could
/// never resolve. With `duplicate_data` a dropped sighting is soon repeated.
fn offer(tx: &mpsc::Sender<Sighting>, sighting: Sighting) -> ControlFlow<()> {
    match tx.try_send(sighting) {
        Ok(()) => ControlFlow::Continue(()),
        Err(TrySendError::Full(sighting)) => {
            debug!(device_id = %sighting.device_id, "Sighting buffer full, dropping");
            ControlFlow::Continue(())
        }
        Err(TrySendError::Closed(_)) => ControlFlow::Break(()),
    }
}

async fn read_sighting(adapter: &Adapter, address: Address) -> bluer::Result<Sighting> {
    let device = adapter.device(address)?;
    Ok(Sighting {
        device_id: address.to_string(),
        name: device.name().await?,
        rssi: device.rssi().await?,
        manufacturer_data: device.manufacturer_data().await?.unwrap_or_default(),
        service_data: device.service_data().await?.unwrap_or_default(),
    })
}
