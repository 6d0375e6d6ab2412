//! Device bus abstraction
//!
//! The monitor sees the hardware through the [`DeviceBus`] trait: a tree of
//! [`BusNode`]s plus a stream of raw [`BusSignal`]s. Two implementations
//! exist:
//!
//! ```text
//! bus/
//! ├── usb.rs    UsbDeviceBus: libusb-backed, poll-based hotplug detection
//! └── fake.rs   FakeBus: scripted tree for tests
//! ```

pub mod fake;
pub mod usb;

pub use fake::{FakeBus, FakeBusHandle};
pub use usb::UsbDeviceBus;

use common::Result;
use protocol::InstallState;

/// Interface class GUID carried in watch notification paths.
pub const USB_DEVICE_INTERFACE_GUID: &str = "a5dcbf10-6530-11d2-901f-00c04fb951ed";

/// Class GUID reported for Android payload interfaces.
pub const ANDROID_CLASS_GUID: &str = "3f966bd9-fa04-4ec5-991c-d326973b5128";

/// One device in the bus tree. Top-level nodes are composite devices;
/// children are the interfaces they expose.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BusNode {
    pub instance_id: String,
    pub description: String,
    /// Class GUID; empty when the bus cannot determine one.
    pub class_guid: String,
    pub hardware_ids: Vec<String>,
    /// Nominal install state; the monitor refines this using `driver`.
    pub install_state: InstallState,
    /// Name of the bound driver; empty when none is bound.
    pub driver: String,
    pub children: Vec<BusNode>,
}

impl BusNode {
    pub fn new(instance_id: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            instance_id: instance_id.into(),
            description: description.into(),
            class_guid: String::new(),
            hardware_ids: Vec::new(),
            install_state: InstallState::Installed,
            driver: String::new(),
            children: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SignalKind {
    Arrival,
    Removal,
}

/// Raw hotplug signal. `interface_path` is the symbolic device-interface
/// path as delivered by the platform, not an instance ID.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BusSignal {
    pub kind: SignalKind,
    pub interface_path: String,
}

/// The symbolic interface path a watch notification would carry for
/// `instance_id`.
pub fn device_interface_path(instance_id: &str) -> String {
    format!(
        "\\\\?\\{}#{{{}}}",
        instance_id.replace('\\', "#"),
        USB_DEVICE_INTERFACE_GUID
    )
}

/// Source of device trees and hotplug signals.
pub trait DeviceBus: Send + Sync {
    /// Current device tree: top-level devices with their children.
    fn enumerate(&mut self) -> Result<Vec<BusNode>>;

    /// Force a fresh hardware scan so the next [`DeviceBus::enumerate`]
    /// reflects changes the installer may have caused.
    fn rescan(&mut self) -> Result<()>;

    /// Wind down any background machinery. Returns whether it stopped in
    /// time.
    fn stop(&mut self) -> bool {
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn interface_path_shape() {
        let path = device_interface_path("USB\\VID_19D2&PID_1350\\FULL_UNAGI");
        assert_eq!(
            path,
            "\\\\?\\USB#VID_19D2&PID_1350#FULL_UNAGI#{a5dcbf10-6530-11d2-901f-00c04fb951ed}"
        );
    }
}
