//! Device and driver type definitions
//!
//! This module defines the device records the monitor publishes, the driver
//! catalog entry shape, and the installer outcome types shared between the
//! daemon components.

use serde::{Deserialize, Serialize};

/// Driver installation state of a monitored device.
///
/// The first four states mirror what the device bus reports for the payload
/// sub-device; `Pending` is derived by the monitor when the composite device
/// has not exposed its payload sub-device yet.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum InstallState {
    /// A driver is installed and bound.
    Installed,
    /// The bound driver needs to be reinstalled.
    NeedsReinstall,
    /// Installation was attempted but no driver ended up bound.
    FailedInstall,
    /// Installation ran and a follow-up step (such as a reboot) is pending.
    FinishInstall,
    /// The payload sub-device has not appeared yet.
    Pending,
}

/// One monitored device, as published in the monitor snapshot.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceRecord {
    /// Instance ID of the top-level composite device.
    pub device_instance_id: String,
    /// Serial suffix of the instance ID (the part after the last backslash).
    pub serial_number: String,
    /// Human-readable description reported by the bus.
    pub description: String,
    /// Instance ID of the payload sub-device, when it has appeared.
    pub sub_device_instance_id: Option<String>,
    /// First hardware ID of the payload sub-device, when it has appeared.
    pub hardware_id: Option<String>,
    /// Current driver installation state.
    pub install_state: InstallState,
}

impl DeviceRecord {
    /// True when `id` names either the composite device or its payload
    /// sub-device.
    pub fn matches_id(&self, id: &str) -> bool {
        self.device_instance_id == id || self.sub_device_instance_id.as_deref() == Some(id)
    }
}

/// How a driver package is installed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub enum InstallMechanism {
    /// Run the bundled staged-installer helper against a package directory.
    #[serde(rename = "staged")]
    #[default]
    StagedInstaller,
    /// Run the package path itself as an executable.
    #[serde(rename = "exe")]
    DirectExecutable,
}

/// One entry of the driver catalog.
///
/// A device is supported when its composite instance ID matches
/// `device_instance_id`, or when one of its sub-device hardware IDs matches
/// `hardware_id`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DriverRule {
    pub device_instance_id: String,
    #[serde(rename = "android_hardware_id")]
    pub hardware_id: String,
    #[serde(rename = "driver_download_url")]
    pub download_url: String,
    #[serde(default)]
    pub install_mechanism: InstallMechanism,
}

/// Classified result of one driver installation attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum InstallErrorName {
    /// The installation succeeded.
    None,
    /// The staged installer reported that no driver was installed.
    NotInstalled,
    /// The driver was installed but a restart is required.
    NeedsRestart,
    /// A direct executable exited with a non-zero code.
    ExeError,
    /// The installer process ended without an obtainable exit code.
    NoExitCode,
    /// The installer process could not be launched or waited on.
    ErrorMessage,
}

/// Outcome of one installer run, delivered to the controller exactly once.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InstallOutcome {
    pub error_name: InstallErrorName,
    pub error_message: String,
    /// Raw exit code, kept for logging. Meaningless when no code was
    /// obtainable.
    pub exit_code: u32,
}

impl InstallOutcome {
    pub fn success(exit_code: u32) -> Self {
        Self {
            error_name: InstallErrorName::None,
            error_message: String::new(),
            exit_code,
        }
    }

    pub fn is_success(&self) -> bool {
        self.error_name == InstallErrorName::None
    }
}

/// Kind of a device change, as sent in `deviceChanged` notifications.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DeviceEventKind {
    Arrived,
    Removed,
}
