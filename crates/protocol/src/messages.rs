//! Daemon reply definitions
//!
//! Every reply is one JSON object serialized onto a single line, adjacently
//! tagged as `{"type": ..., "data": ...}`. Replies fall into two groups:
//! - Direct answers (info, list, install, error)
//! - Queued notifications (deviceChanged, driverInstalled), which the client
//!   pulls with the `message` command after a bell ping

use crate::error::{ParseError, Result};
use crate::types::{DeviceEventKind, DeviceRecord, InstallErrorName, InstallState};
use serde::{Deserialize, Serialize};

/// Device state as reported on the wire.
///
/// Collapses the five internal states into the three the extension
/// distinguishes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum DeviceState {
    Installed,
    Failed,
    NotInstalled,
}

impl From<InstallState> for DeviceState {
    fn from(state: InstallState) -> Self {
        match state {
            InstallState::Installed | InstallState::FinishInstall => DeviceState::Installed,
            InstallState::FailedInstall => DeviceState::Failed,
            InstallState::NeedsReinstall | InstallState::Pending => DeviceState::NotInstalled,
        }
    }
}

/// One element of a `list` reply.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeviceStateEntry {
    pub device_instance_id: String,
    pub state: DeviceState,
}

impl From<&DeviceRecord> for DeviceStateEntry {
    fn from(record: &DeviceRecord) -> Self {
        Self {
            device_instance_id: record.device_instance_id.clone(),
            state: record.install_state.into(),
        }
    }
}

/// A reply or notification sent to the client.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "data", rename_all = "camelCase")]
pub enum Reply {
    /// Answer to `info`.
    #[serde(rename_all = "camelCase")]
    Info { application: String, version: u32 },

    /// Answer to `list`. An unknown filter yields an empty array.
    List(Vec<DeviceStateEntry>),

    /// Answer to an accepted `install`. Completion arrives later as a
    /// `driverInstalled` notification.
    Install {},

    /// Answer to any command that failed. The connection stays open.
    #[serde(rename_all = "camelCase")]
    Error { error_message: String },

    /// Notification: a supported device arrived or was removed.
    #[serde(rename_all = "camelCase")]
    DeviceChanged {
        event_type: DeviceEventKind,
        device_instance_id: String,
    },

    /// Notification: a driver installation finished.
    #[serde(rename_all = "camelCase")]
    DriverInstalled {
        error_name: InstallErrorName,
        error_message: String,
    },
}

impl Reply {
    /// Serialize to the single-line JSON form (no trailing newline).
    pub fn to_line(&self) -> Result<String> {
        serde_json::to_string(self).map_err(|e| ParseError::Encode(e.to_string()))
    }

    /// Convenience constructor for error replies.
    pub fn error(message: impl Into<String>) -> Self {
        Reply::Error {
            error_message: message.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn info_wire_shape() {
        let reply = Reply::Info {
            application: "usbmond".to_string(),
            version: 1,
        };
        assert_eq!(
            reply.to_line().unwrap(),
            r#"{"type":"info","data":{"application":"usbmond","version":1}}"#
        );
    }

    #[test]
    fn list_wire_shape() {
        let reply = Reply::List(vec![DeviceStateEntry {
            device_instance_id: "USB\\VID_19D2&PID_1350\\FULL_UNAGI".to_string(),
            state: DeviceState::NotInstalled,
        }]);
        assert_eq!(
            reply.to_line().unwrap(),
            r#"{"type":"list","data":[{"deviceInstanceId":"USB\\VID_19D2&PID_1350\\FULL_UNAGI","state":"notInstalled"}]}"#
        );
    }

    #[test]
    fn empty_list_wire_shape() {
        assert_eq!(
            Reply::List(Vec::new()).to_line().unwrap(),
            r#"{"type":"list","data":[]}"#
        );
    }

    #[test]
    fn install_wire_shape() {
        assert_eq!(
            Reply::Install {}.to_line().unwrap(),
            r#"{"type":"install","data":{}}"#
        );
    }

    #[test]
    fn error_wire_shape() {
        assert_eq!(
            Reply::error("unknown command: frobnicate").to_line().unwrap(),
            r#"{"type":"error","data":{"errorMessage":"unknown command: frobnicate"}}"#
        );
    }

    #[test]
    fn device_changed_wire_shape() {
        let reply = Reply::DeviceChanged {
            event_type: DeviceEventKind::Arrived,
            device_instance_id: "USB\\VID_19D2&PID_1350\\FULL_OTORO".to_string(),
        };
        assert_eq!(
            reply.to_line().unwrap(),
            r#"{"type":"deviceChanged","data":{"eventType":"arrived","deviceInstanceId":"USB\\VID_19D2&PID_1350\\FULL_OTORO"}}"#
        );

        let reply = Reply::DeviceChanged {
            event_type: DeviceEventKind::Removed,
            device_instance_id: "USB\\VID_19D2&PID_1350\\FULL_OTORO".to_string(),
        };
        assert!(reply.to_line().unwrap().contains(r#""eventType":"removed""#));
    }

    #[test]
    fn driver_installed_wire_shape() {
        let reply = Reply::DriverInstalled {
            error_name: InstallErrorName::None,
            error_message: String::new(),
        };
        assert_eq!(
            reply.to_line().unwrap(),
            r#"{"type":"driverInstalled","data":{"errorName":"none","errorMessage":""}}"#
        );

        let reply = Reply::DriverInstalled {
            error_name: InstallErrorName::NeedsRestart,
            error_message: "a restart is required to finish installation".to_string(),
        };
        assert_eq!(
            reply.to_line().unwrap(),
            r#"{"type":"driverInstalled","data":{"errorName":"needsRestart","errorMessage":"a restart is required to finish installation"}}"#
        );
    }

    #[test]
    fn list_reply_round_trips() {
        let reply = Reply::List(vec![
            DeviceStateEntry {
                device_instance_id: "USB\\VID_19D2&PID_1350\\FULL_UNAGI".to_string(),
                state: DeviceState::Installed,
            },
            DeviceStateEntry {
                device_instance_id: "USB\\VID_19D2&PID_1350\\FULL_OTORO".to_string(),
                state: DeviceState::Failed,
            },
        ]);
        let line = reply.to_line().unwrap();
        let parsed: Reply = serde_json::from_str(&line).unwrap();
        assert_eq!(parsed, reply);
    }

    #[test]
    fn state_collapses_to_wire_values() {
        assert_eq!(DeviceState::from(InstallState::Installed), DeviceState::Installed);
        assert_eq!(DeviceState::from(InstallState::FinishInstall), DeviceState::Installed);
        assert_eq!(DeviceState::from(InstallState::FailedInstall), DeviceState::Failed);
        assert_eq!(DeviceState::from(InstallState::NeedsReinstall), DeviceState::NotInstalled);
        assert_eq!(DeviceState::from(InstallState::Pending), DeviceState::NotInstalled);
    }
}
