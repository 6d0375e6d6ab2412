//! Test utilities for usbmon
//!
//! Provides fixture builders and helper functions for testing across crates.
//!
//! # Example
//!
//! ```
//! use common::test_utils::mock_device_record;
//! use protocol::InstallState;
//!
//! let record = mock_device_record("FULL_UNAGI", InstallState::Installed);
//! assert_eq!(record.serial_number, "FULL_UNAGI");
//! ```

use protocol::{DeviceRecord, DriverRule, InstallMechanism, InstallState};
use std::time::{Duration, Instant};

/// Default test timeout (5 seconds)
pub const DEFAULT_TEST_TIMEOUT: Duration = Duration::from_secs(5);

/// Vendor and product used by all fixtures, matching the devices the daemon
/// was built around.
pub const MOCK_VID: u16 = 0x19d2;
pub const MOCK_PID: u16 = 0x1350;

/// Instance ID of a mock composite device.
pub fn mock_instance_id(serial: &str) -> String {
    format!("USB\\VID_{MOCK_VID:04X}&PID_{MOCK_PID:04X}\\{serial}")
}

/// Instance ID of the payload sub-device exposed by a mock composite
/// device.
pub fn mock_sub_instance_id(serial: &str) -> String {
    format!("USB\\VID_{MOCK_VID:04X}&PID_{MOCK_PID:04X}&MI_01\\{serial}")
}

/// Hardware ID of the payload sub-device.
pub fn mock_hardware_id() -> String {
    format!("USB\\VID_{MOCK_VID:04X}&PID_{MOCK_PID:04X}&MI_01")
}

/// A monitored device with its payload sub-device present.
pub fn mock_device_record(serial: &str, state: InstallState) -> DeviceRecord {
    DeviceRecord {
        device_instance_id: mock_instance_id(serial),
        serial_number: serial.to_string(),
        description: format!("Test Phone {serial}"),
        sub_device_instance_id: Some(mock_sub_instance_id(serial)),
        hardware_id: Some(mock_hardware_id()),
        install_state: state,
    }
}

/// A monitored device whose payload sub-device has not appeared yet.
pub fn mock_pending_record(serial: &str) -> DeviceRecord {
    DeviceRecord {
        device_instance_id: mock_instance_id(serial),
        serial_number: serial.to_string(),
        description: format!("Test Phone {serial}"),
        sub_device_instance_id: None,
        hardware_id: None,
        install_state: InstallState::Pending,
    }
}

/// A catalog rule matching [`mock_device_record`] fixtures.
pub fn mock_driver_rule(serial: &str) -> DriverRule {
    DriverRule {
        device_instance_id: mock_instance_id(serial),
        hardware_id: mock_hardware_id(),
        download_url: format!("https://example.invalid/{}.zip", serial.to_lowercase()),
        install_mechanism: InstallMechanism::StagedInstaller,
    }
}

/// Poll `cond` until it holds or `timeout` elapses. Returns the final
/// verdict.
pub fn wait_until<F: Fn() -> bool>(cond: F, timeout: Duration) -> bool {
    let deadline = Instant::now() + timeout;
    while Instant::now() < deadline {
        if cond() {
            return true;
        }
        std::thread::sleep(Duration::from_millis(2));
    }
    cond()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mock_ids_are_consistent() {
        let record = mock_device_record("FULL_OTORO", InstallState::Installed);
        assert_eq!(
            record.device_instance_id,
            "USB\\VID_19D2&PID_1350\\FULL_OTORO"
        );
        assert_eq!(
            record.sub_device_instance_id.as_deref(),
            Some("USB\\VID_19D2&PID_1350&MI_01\\FULL_OTORO")
        );

        let rule = mock_driver_rule("FULL_OTORO");
        assert_eq!(rule.device_instance_id, record.device_instance_id);
        assert_eq!(Some(rule.hardware_id), record.hardware_id);
    }

    #[test]
    fn pending_record_has_no_sub_device() {
        let record = mock_pending_record("FULL_UNAGI");
        assert!(record.sub_device_instance_id.is_none());
        assert_eq!(record.install_state, InstallState::Pending);
    }

    #[test]
    fn wait_until_observes_condition() {
        assert!(wait_until(|| true, Duration::from_millis(10)));
        assert!(!wait_until(|| false, Duration::from_millis(10)));
    }
}
