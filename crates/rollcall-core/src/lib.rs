//! # rollcall-core
//!
//! Core logic for the rollcall proximity attendance system.
//!
//! A student's device advertises a compact identity over Bluetooth Low
//! Energy; the instructor's device scans for a bounded window, collects the
//! distinct identities in range, and compares their count with a headcount
//! estimated from a classroom photo to flag proxy attendance.
//!
//! ## Architecture
//!
//! - [`payload`] - Identity to advertisement byte codec
//! - [`advertising`] - Advertising state machine (one broadcast at a time)
//! - [`scan`] - Bounded scan windows with per-device deduplication
//! - [`reconcile`] - Observed vs. expected headcount comparison
//! - [`permissions`] - Runtime permission gate in front of the radio
//! - [`sink`] - Attendance hand-off boundary
//! - [`platform`] - Radio abstraction, in-memory radio and BlueZ backend
//! - [`config`] - Configuration loading, layering and validation
//! - [`error`] - Unified error types for the crate

#![forbid(unsafe_code)]
#![warn(clippy::all, clippy::pedantic, clippy::nursery)]
#![warn(missing_docs)]

pub mod advertising;
pub mod config;
pub mod error;
pub mod payload;
pub mod permissions;
pub mod platform;
pub mod reconcile;
pub mod scan;
pub mod sink;

// Re-export primary types for convenience
pub use advertising::{AdvertisingController, AdvertisingSession, AdvertisingStatus};
pub use config::{
    AttendanceConfig, BleConfig, ConfigError, ConfigResult, RollcallConfig, ServerConfig,
    DEFAULT_COMPANY_ID, DEFAULT_SERVICE_UUID,
};
pub use error::{Activity, Result, RollcallError};
pub use payload::{decode, encode, AdvertisementPayload, Identity};
pub use permissions::{
    GrantAll, Permission, PermissionGate, PermissionGroup, PermissionPrompter, PermissionResult,
};
#[cfg(feature = "bluetooth")]
pub use platform::bluez::BluezRadio;
pub use platform::mock::MockRadio;
pub use platform::{
    AdvertiseMode, AdvertiseOptions, BleAdvertiser, BleScanner, MatchMode, PlatformError,
    ScanFilter, ScanMode, ScanOptions, Sighting, TxPowerLevel,
};
pub use reconcile::{
    observed_identities, reconcile, ProxyReviewRequest, ReconciliationResult, Verdict,
};
pub use scan::{
    CompletionListener, DiscoveredDevice, ScanController, ScanEnd, ScanListener, ScanReport,
    ScanRequest, ScanSession,
};
pub use sink::{AttendanceSink, LoggingSink, SessionContext, SinkError};
