//! Application configuration management.
//!
//! Configuration is layered with the `config` crate:
//!
//! 1. Built-in defaults ([`RollcallConfig::default`])
//! 2. A TOML file (`/etc/rollcall/config.toml` on Linux, the platform config
//!    directory elsewhere, or whatever `ROLLCALL_CONFIG` points at)
//! 3. Environment variables prefixed `ROLLCALL__`, with `__` between
//!    sections, e.g. `ROLLCALL__BLE__SCAN_DURATION_MS=10000`

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

use crate::platform::{AdvertiseOptions, ScanFilter};

/// Default attendance service UUID shared by every device in a deployment.
pub const DEFAULT_SERVICE_UUID: Uuid = Uuid::from_u128(0x0000_feed_0000_1000_8000_0080_5f9b_34fb);

/// Default manufacturer data company identifier (reserved for testing).
pub const DEFAULT_COMPANY_ID: u16 = 0xffff;

/// Default scan window.
pub const DEFAULT_SCAN_DURATION_MS: u64 = 15_000;

/// Longest scan window accepted by validation.
pub const MAX_SCAN_DURATION_MS: u64 = 120_000;

/// Pause between stop and start on restart. Some radios need it, others do not.
pub const DEFAULT_RESTART_SETTLE_MS: u64 = 100;

const MAX_RESTART_SETTLE_MS: u64 = 5_000;

/// Environment variable naming an explicit config file.
pub const CONFIG_PATH_ENV: &str = "ROLLCALL_CONFIG";

/// Errors from loading, saving or validating configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// An explicitly requested config file does not exist.
    #[error("Configuration file not found: {}", .0.display())]
    NotFound(PathBuf),

    /// Layering or deserialization failed.
    #[error("Failed to load configuration: {0}")]
    Load(#[from] config::ConfigError),

    /// Serializing to TOML failed.
    #[error("Failed to serialize configuration: {0}")]
    Serialize(#[from] toml::ser::Error),

    /// Writing the file failed.
    #[error("Failed to write {}: {source}", path.display())]
    Write {
        /// Target path.
        path: PathBuf,
        /// Underlying error.
        source: std::io::Error,
    },

    /// One or more values are out of range.
    #[error("Invalid configuration: {}", .0.join("; "))]
    Validation(Vec<String>),
}

/// Result alias for configuration operations.
pub type ConfigResult<T> = std::result::Result<T, ConfigError>;

/// Main application configuration.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RollcallConfig {
    /// Radio settings.
    pub ble: BleConfig,

    /// HTTP daemon settings.
    pub server: ServerConfig,

    /// Attendance backend settings.
    pub attendance: AttendanceConfig,
}

/// Radio settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BleConfig {
    /// Attendance service UUID.
    pub service_uuid: Uuid,

    /// Manufacturer data company identifier.
    pub company_id: u16,

    /// Default scan window in milliseconds.
    pub scan_duration_ms: u64,

    /// Pause between stop and start on restart, in milliseconds. 0 disables it.
    pub restart_settle_ms: u64,

    /// Options used when a start request carries none.
    pub advertise: AdvertiseOptions,
}

impl Default for BleConfig {
    fn default() -> Self {
        Self {
            service_uuid: DEFAULT_SERVICE_UUID,
            company_id: DEFAULT_COMPANY_ID,
            scan_duration_ms: DEFAULT_SCAN_DURATION_MS,
            restart_settle_ms: DEFAULT_RESTART_SETTLE_MS,
            advertise: AdvertiseOptions::default(),
        }
    }
}

impl BleConfig {
    /// Default scan window.
    #[must_use]
    pub const fn scan_duration(&self) -> Duration {
        Duration::from_millis(self.scan_duration_ms)
    }

    /// Restart settle delay.
    #[must_use]
    pub const fn restart_settle(&self) -> Duration {
        Duration::from_millis(self.restart_settle_ms)
    }

    /// Scan filter for the configured service.
    #[must_use]
    pub const fn scan_filter(&self) -> ScanFilter {
        ScanFilter {
            service_uuid: self.service_uuid,
            company_id: self.company_id,
        }
    }
}

/// HTTP daemon settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Listen address.
    pub bind_address: String,

    /// Listen port.
    pub port: u16,

    /// JSON file logs plus compact stdout instead of pretty stdout.
    pub production_logging: bool,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_address: "0.0.0.0".to_string(),
            port: 3000,
            production_logging: false,
        }
    }
}

/// Attendance backend settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AttendanceConfig {
    /// Record-attendance endpoint. Sightings are only logged when unset.
    pub endpoint: Option<String>,

    /// Per-request timeout in milliseconds.
    pub request_timeout_ms: u64,
}

impl Default for AttendanceConfig {
    fn default() -> Self {
        Self {
            endpoint: None,
            request_timeout_ms: 5_000,
        }
    }
}

impl RollcallConfig {
    /// Load configuration from the default location plus environment.
    ///
    /// A missing default file is not an error; defaults apply.
    ///
    /// # Errors
    ///
    /// Returns an error if a file or variable cannot be parsed, if
    /// `ROLLCALL_CONFIG` names a missing file, or if validation fails.
    pub fn load() -> ConfigResult<Self> {
        match std::env::var_os(CONFIG_PATH_ENV) {
            Some(path) => Self::load_from(Path::new(&path)),
            None => Self::layered(Self::default_path().as_deref(), false),
        }
    }

    /// Load configuration from an explicit file plus environment.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::NotFound`] if the file does not exist, or a
    /// parse/validation error.
    pub fn load_from(path: &Path) -> ConfigResult<Self> {
        if !path.exists() {
            return Err(ConfigError::NotFound(path.to_path_buf()));
        }
        Self::layered(Some(path), true)
    }

    fn layered(path: Option<&Path>, required: bool) -> ConfigResult<Self> {
        let mut builder = config::Config::builder()
            .add_source(config::Config::try_from(&Self::default())?);
        if let Some(path) = path {
            builder = builder.add_source(
                config::File::from(path)
                    .format(config::FileFormat::Toml)
                    .required(required),
            );
        }
        let loaded: Self = builder
            .add_source(
                config::Environment::with_prefix("ROLLCALL")
                    .prefix_separator("__")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?
            .try_deserialize()?;
        loaded.validate()?;
        Ok(loaded)
    }

    /// Save configuration as TOML.
    ///
    /// # Errors
    ///
    /// Returns an error if serialization or the write fails.
    pub fn save(&self, path: &Path) -> ConfigResult<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|source| ConfigError::Write {
                path: parent.to_path_buf(),
                source,
            })?;
        }
        let content = toml::to_string_pretty(self)?;
        std::fs::write(path, content).map_err(|source| ConfigError::Write {
            path: path.to_path_buf(),
            source,
        })
    }

    /// Check value ranges, reporting every problem at once.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Validation`] listing each invalid field.
    pub fn validate(&self) -> ConfigResult<()> {
        let mut problems = Vec::new();

        if self.ble.service_uuid.is_nil() {
            problems.push("ble.service_uuid: must not be the nil UUID".to_string());
        }
        if self.ble.scan_duration_ms == 0 || self.ble.scan_duration_ms > MAX_SCAN_DURATION_MS {
            problems.push(format!(
                "ble.scan_duration_ms: must be between 1 and {MAX_SCAN_DURATION_MS}, got {}",
                self.ble.scan_duration_ms
            ));
        }
        if self.ble.restart_settle_ms > MAX_RESTART_SETTLE_MS {
            problems.push(format!(
                "ble.restart_settle_ms: must be at most {MAX_RESTART_SETTLE_MS}, got {}",
                self.ble.restart_settle_ms
            ));
        }
        if let Some(endpoint) = &self.attendance.endpoint {
            if !(endpoint.starts_with("http://") || endpoint.starts_with("https://")) {
                problems.push(format!(
                    "attendance.endpoint: must be an http(s) URL, got '{endpoint}'"
                ));
            }
        }
        if self.attendance.request_timeout_ms == 0 {
            problems.push("attendance.request_timeout_ms: must be positive".to_string());
        }

        if problems.is_empty() {
            Ok(())
        } else {
            Err(ConfigError::Validation(problems))
        }
    }

    /// Default configuration file path.
    ///
    /// On Linux: `/etc/rollcall/config.toml`
    /// Elsewhere: the platform config directory.
    #[must_use]
    pub fn default_path() -> Option<PathBuf> {
        #[cfg(target_os = "linux")]
        {
            Some(PathBuf::from("/etc/rollcall/config.toml"))
        }
        #[cfg(not(target_os = "linux"))]
        {
            directories::ProjectDirs::from("", "", "rollcall")
                .map(|dirs| dirs.config_dir().join("config.toml"))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_defaults_are_valid() {
        let config = RollcallConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(
            config.ble.service_uuid.to_string(),
            "0000feed-0000-1000-8000-00805f9b34fb"
        );
        assert_eq!(config.ble.company_id, 0xffff);
        assert_eq!(config.ble.scan_duration(), Duration::from_secs(15));
        assert_eq!(config.ble.restart_settle(), Duration::from_millis(100));
    }

    #[test]
    fn test_validation_collects_every_problem() {
        let mut config = RollcallConfig::default();
        config.ble.scan_duration_ms = 0;
        config.ble.service_uuid = Uuid::nil();
        config.attendance.endpoint = Some("ftp://backend".into());

        let Err(ConfigError::Validation(problems)) = config.validate() else {
            panic!("expected validation failure");
        };
        assert_eq!(problems.len(), 3);
        assert!(problems.iter().any(|p| p.starts_with("ble.scan_duration_ms")));
    }

    #[test]
    fn test_save_then_load_from_file() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("nested").join("config.toml");

        let mut config = RollcallConfig::default();
        config.ble.scan_duration_ms = 10_000;
        config.attendance.endpoint = Some("http://localhost:4000/api/attendance".into());
        config.save(&path).unwrap();

        let loaded = RollcallConfig::load_from(&path).unwrap();
        assert_eq!(loaded.ble.scan_duration_ms, 10_000);
        assert_eq!(loaded.attendance.endpoint, config.attendance.endpoint);
    }

    #[test]
    fn test_partial_file_keeps_defaults() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "[ble]\nrestart_settle_ms = 0\n").unwrap();

        let loaded = RollcallConfig::load_from(&path).unwrap();
        assert_eq!(loaded.ble.restart_settle_ms, 0);
        assert_eq!(loaded.ble.scan_duration_ms, DEFAULT_SCAN_DURATION_MS);
        assert_eq!(loaded.server.port, 3000);
    }

    #[test]
    fn test_environment_overrides_file() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "[server]\nbind_address = \"10.0.0.5\"\n").unwrap();

        std::env::set_var("ROLLCALL__SERVER__BIND_ADDRESS", "127.0.0.1");
        let loaded = RollcallConfig::load_from(&path);
        std::env::remove_var("ROLLCALL__SERVER__BIND_ADDRESS");

        assert_eq!(loaded.unwrap().server.bind_address, "127.0.0.1");
    }

    #[test]
    fn test_missing_explicit_file() {
        let result = RollcallConfig::load_from(Path::new("/nonexistent/rollcall.toml"));
        assert!(matches!(result, Err(ConfigError::NotFound(_))));
    }

    #[test]
    fn test_invalid_file_is_rejected() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "[ble]\nscan_duration_ms = 999999\n").unwrap();

        assert!(matches!(
            RollcallConfig::load_from(&path),
            Err(ConfigError::Validation(_))
        ));
    }
}
