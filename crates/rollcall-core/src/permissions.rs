//! OS permission boundary.
//!
//! Advertising and scanning need runtime permissions on some platforms
//! (Android in particular). The gate asks a [`PermissionPrompter`] for each
//! permission of a group one at a time, so a partial grant is visible to the
//! caller. A denial is a result value, never an error.

use std::fmt;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};
use utoipa::ToSchema;

/// A single runtime permission.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, ToSchema)]
pub enum Permission {
    /// Precise location (required for BLE scanning on older Android).
    AccessFineLocation,
    /// Approximate location.
    AccessCoarseLocation,
    /// Discover nearby devices.
    BluetoothScan,
    /// Broadcast to nearby devices.
    BluetoothAdvertise,
    /// Connect to paired devices.
    BluetoothConnect,
    /// Read shared storage.
    ReadExternalStorage,
    /// Write shared storage.
    WriteExternalStorage,
}

impl Permission {
    /// Platform permission string.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::AccessFineLocation => "android.permission.ACCESS_FINE_LOCATION",
            Self::AccessCoarseLocation => "android.permission.ACCESS_COARSE_LOCATION",
            Self::BluetoothScan => "android.permission.BLUETOOTH_SCAN",
            Self::BluetoothAdvertise => "android.permission.BLUETOOTH_ADVERTISE",
            Self::BluetoothConnect => "android.permission.BLUETOOTH_CONNECT",
            Self::ReadExternalStorage => "android.permission.READ_EXTERNAL_STORAGE",
            Self::WriteExternalStorage => "android.permission.WRITE_EXTERNAL_STORAGE",
        }
    }
}

impl fmt::Display for Permission {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Named set of permissions requested together.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, ToSchema)]
pub enum PermissionGroup {
    /// Everything advertising and scanning need.
    Bluetooth,
    /// Location access.
    Location,
    /// Shared storage (classroom photos).
    Storage,
}

impl PermissionGroup {
    /// Every group, in display order.
    pub const ALL: [Self; 3] = [Self::Bluetooth, Self::Location, Self::Storage];

    /// Human-readable group name.
    #[must_use]
    pub const fn name(self) -> &'static str {
        match self {
            Self::Bluetooth => "Bluetooth",
            Self::Location => "Location",
            Self::Storage => "Storage",
        }
    }

    /// Permissions in this group, in request order.
    #[must_use]
    pub const fn permissions(self) -> &'static [Permission] {
        match self {
            Self::Bluetooth => &[
                Permission::AccessFineLocation,
                Permission::BluetoothScan,
                Permission::BluetoothAdvertise,
                Permission::BluetoothConnect,
            ],
            Self::Location => &[
                Permission::AccessFineLocation,
                Permission::AccessCoarseLocation,
            ],
            Self::Storage => &[
                Permission::ReadExternalStorage,
                Permission::WriteExternalStorage,
            ],
        }
    }
}

impl fmt::Display for PermissionGroup {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Outcome of requesting a group.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct PermissionResult {
    /// `true` when every permission in the group was granted.
    pub granted: bool,

    /// Permissions that were refused, in request order.
    pub denied_permissions: Vec<String>,
}

/// Whatever actually shows the OS prompt.
#[async_trait]
pub trait PermissionPrompter: Send + Sync {
    /// Prompt for one permission. May wait on the user indefinitely.
    async fn request(&self, permission: Permission) -> bool;

    /// Whether the permission is already held. Must not prompt.
    async fn check(&self, permission: Permission) -> bool;
}

/// Prompter for platforms without runtime BLE permissions (BlueZ, desktop).
#[derive(Debug, Clone, Copy, Default)]
pub struct GrantAll;

#[async_trait]
impl PermissionPrompter for GrantAll {
    async fn request(&self, _permission: Permission) -> bool {
        true
    }

    async fn check(&self, _permission: Permission) -> bool {
        true
    }
}

/// Sequential permission requester shared by both controllers.
pub struct PermissionGate {
    prompter: Box<dyn PermissionPrompter>,
}

impl fmt::Debug for PermissionGate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PermissionGate").finish_non_exhaustive()
    }
}

impl Default for PermissionGate {
    fn default() -> Self {
        Self::new(GrantAll)
    }
}

impl PermissionGate {
    /// Create a gate around a prompter.
    pub fn new(prompter: impl PermissionPrompter + 'static) -> Self {
        Self {
            prompter: Box::new(prompter),
        }
    }

    /// Request every permission of `group`, one after the other.
    pub async fn request_group(&self, group: PermissionGroup) -> PermissionResult {
        info!(group = %group, "Requesting permissions");

        let mut denied_permissions = Vec::new();
        for &permission in group.permissions() {
            let granted = self.prompter.request(permission).await;
            debug!(permission = %permission, granted, "Permission result");
            if !granted {
                denied_permissions.push(permission.as_str().to_string());
            }
        }

        let granted = denied_permissions.is_empty();
        if !granted {
            warn!(group = %group, denied = ?denied_permissions, "Permissions denied");
        }
        PermissionResult {
            granted,
            denied_permissions,
        }
    }

    /// Probe whether every permission of `group` is already held.
    pub async fn check_group(&self, group: PermissionGroup) -> bool {
        for &permission in group.permissions() {
            if !self.prompter.check(permission).await {
                return false;
            }
        }
        true
    }
}

#[cfg(test)]
pub(crate) mod testing {
    use std::collections::HashSet;
    use std::sync::{Arc, Mutex};
    use std::time::Duration;

    use super::*;

    /// Grants everything except a fixed deny list and records prompt order.
    /// `delay` stands in for a user taking their time on each dialog.
    #[derive(Debug, Clone, Default)]
    pub struct ScriptedPrompter {
        pub deny: HashSet<Permission>,
        pub asked: Arc<Mutex<Vec<Permission>>>,
        pub delay: Duration,
    }

    impl ScriptedPrompter {
        pub fn denying(permissions: &[Permission]) -> Self {
            Self {
                deny: permissions.iter().copied().collect(),
                ..Self::default()
            }
        }
    }

    #[async_trait]
    impl PermissionPrompter for ScriptedPrompter {
        async fn request(&self, permission: Permission) -> bool {
            if !self.delay.is_zero() {
                tokio::time::sleep(self.delay).await;
            }
            self.asked.lock().unwrap().push(permission);
            !self.deny.contains(&permission)
        }

        async fn check(&self, permission: Permission) -> bool {
            !self.deny.contains(&permission)
        }
    }
}
