//! Platform radio abstraction.
//!
//! The controllers never talk to a Bluetooth stack directly. They drive a
//! [`BleAdvertiser`] and a [`BleScanner`], which a host provides:
//!
//! - [`mock::MockRadio`] - in-memory radio for tests and development servers
//! - `bluez::BluezRadio` - BlueZ over D-Bus (requires the `bluetooth` feature)
//!
//! Options structs in this module are passed through to the platform verbatim.

use std::collections::HashMap;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::mpsc;
use utoipa::ToSchema;
use uuid::Uuid;

#[cfg(feature = "bluetooth")]
pub mod bluez;
pub mod mock;

/// Errors reported by a platform radio.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum PlatformError {
    /// No Bluetooth adapter was found on this system.
    #[error("No Bluetooth adapter found")]
    AdapterNotFound,

    /// The adapter exists but is powered off.
    #[error("Bluetooth adapter is powered off")]
    AdapterPoweredOff,

    /// Starting a broadcast failed.
    #[error("Failed to start advertising: {0}")]
    AdvertiseFailed(String),

    /// Starting or running a scan failed.
    #[error("Failed to scan: {0}")]
    ScanFailed(String),

    /// Any other stack error.
    #[error("{0}")]
    Internal(String),
}

/// Transmit power level, lowest to highest.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum TxPowerLevel {
    /// Shortest range, least power.
    UltraLow,
    /// Classroom-scale range.
    Low,
    /// Platform default.
    #[default]
    Medium,
    /// Longest range.
    High,
}

impl TxPowerLevel {
    /// Approximate radiated power in dBm, for stacks that take a number.
    #[must_use]
    pub const fn dbm(self) -> i16 {
        match self {
            Self::UltraLow => -21,
            Self::Low => -15,
            Self::Medium => -7,
            Self::High => 1,
        }
    }
}

/// Advertising interval tradeoff.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum AdvertiseMode {
    /// Longest interval (~1 s).
    LowPower,
    /// ~250 ms interval.
    #[default]
    Balanced,
    /// Shortest interval (~100 ms).
    LowLatency,
}

/// Options for one broadcast. Not validated; handed to the platform as-is.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(default)]
pub struct AdvertiseOptions {
    /// Transmit power level.
    pub tx_power_level: TxPowerLevel,

    /// Interval tradeoff.
    pub advertise_mode: AdvertiseMode,

    /// Include the local device name in the advertisement.
    pub include_device_name: bool,

    /// Include the tx power level field in the advertisement.
    pub include_tx_power_level: bool,

    /// Whether centrals may connect.
    pub connectable: bool,

    /// Override of the configured manufacturer/company identifier.
    #[schema(example = 65535)]
    pub company_id: Option<u16>,

    /// Override of the configured service UUID.
    pub service_uuid: Option<Uuid>,
}

/// Everything the platform needs to put one advertisement on the air.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BroadcastRequest {
    /// Service UUID advertised (and used as service-data key).
    pub service_uuid: Uuid,

    /// Manufacturer data company identifier.
    pub company_id: u16,

    /// Encoded identity payload.
    pub payload: Vec<u8>,

    /// Pass-through options.
    pub options: AdvertiseOptions,
}

/// Scan duty cycle.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum ScanMode {
    /// Least power.
    LowPower,
    /// Platform default.
    Balanced,
    /// Continuous scanning.
    #[default]
    LowLatency,
}

/// How aggressively the controller matches advertisements.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum MatchMode {
    /// Match on weak signals too.
    Aggressive,
    /// Require a stronger, repeated signal.
    #[default]
    Sticky,
}

/// Options for one scan. Not validated; handed to the platform as-is.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(default)]
pub struct ScanOptions {
    /// Scan duty cycle.
    pub scan_mode: ScanMode,

    /// Match mode.
    pub match_mode: MatchMode,

    /// Matches per filter the hardware tracks (0 = platform maximum).
    pub number_of_matches: u8,

    /// Batch delay in milliseconds (0 = report immediately).
    pub report_delay_ms: u64,
}

impl Default for ScanOptions {
    fn default() -> Self {
        Self {
            scan_mode: ScanMode::LowLatency,
            match_mode: MatchMode::Sticky,
            number_of_matches: 0,
            report_delay_ms: 0,
        }
    }
}

/// Which advertisements a scan reports.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScanFilter {
    /// Only devices advertising this service are reported.
    pub service_uuid: Uuid,

    /// Company identifier whose manufacturer data carries the payload.
    pub company_id: u16,
}

/// One raw "device discovered" event from the platform.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Sighting {
    /// Opaque platform device identifier (MAC-derived handle).
    pub device_id: String,

    /// Advertised local name.
    pub name: Option<String>,

    /// Received signal strength in dBm.
    pub rssi: Option<i16>,

    /// Manufacturer data keyed by company identifier.
    pub manufacturer_data: HashMap<u16, Vec<u8>>,

    /// Service data keyed by service UUID.
    pub service_data: HashMap<Uuid, Vec<u8>>,
}

impl Sighting {
    /// Bytes that may hold a rollcall payload: manufacturer data for the
    /// filter's company id, falling back to service data for its UUID.
    #[must_use]
    pub fn payload_bytes(&self, filter: &ScanFilter) -> Option<&[u8]> {
        self.manufacturer_data
            .get(&filter.company_id)
            .or_else(|| self.service_data.get(&filter.service_uuid))
            .map(Vec::as_slice)
    }
}

/// Outgoing side of the radio.
#[async_trait]
pub trait BleAdvertiser: Send + Sync {
    /// Capability probe. Not a permission check.
    fn supports_advertising(&self) -> bool;

    /// Put an advertisement on the air.
    async fn broadcast(&self, request: BroadcastRequest) -> Result<(), PlatformError>;

    /// Take the current advertisement off the air.
    async fn stop_broadcast(&self) -> Result<(), PlatformError>;
}

/// Listening side of the radio.
#[async_trait]
pub trait BleScanner: Send + Sync {
    /// Capability probe. Not a permission check.
    fn supports_scanning(&self) -> bool;

    /// Start discovery. Sightings are delivered on the returned channel in the
    /// order the stack reports them, until [`BleScanner::stop_scan`] is called.
    async fn start_scan(
        &self,
        filter: &ScanFilter,
        options: &ScanOptions,
    ) -> Result<mpsc::Receiver<Sighting>, PlatformError>;

    /// Stop discovery and close the sighting channel.
    async fn stop_scan(&self) -> Result<(), PlatformError>;
}
