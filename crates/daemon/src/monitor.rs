//! Device monitor
//!
//! The monitor folds raw bus trees into [`DeviceRecord`]s for the devices
//! the catalog supports, and turns raw hotplug signals into recognized
//! device events. Unsupported devices never produce records or events.
//!
//! A snapshot is rebuilt from scratch on every refresh and swapped in
//! whole; published records are never mutated in place.

use crate::bus::{ANDROID_CLASS_GUID, BusNode, DeviceBus};
use crate::catalog::DriverCatalog;
use common::Result;
use protocol::{DeviceEventKind, DeviceRecord, InstallState};
use std::sync::Arc;
use tracing::{debug, info};

/// Description substring that marks a payload sub-device, matched without
/// regard to case.
pub const SUB_DEVICE_MARKER: &str = "android";

/// A recognized insertion or removal, keyed by the identifier the signal
/// carried.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceEvent {
    pub kind: DeviceEventKind,
    pub device_instance_id: String,
}

/// Immutable view of the supported devices at one point in time.
#[derive(Debug, Clone, Default)]
pub struct DeviceSnapshot {
    devices: Vec<DeviceRecord>,
}

impl DeviceSnapshot {
    pub fn devices(&self) -> &[DeviceRecord] {
        &self.devices
    }

    /// Look up a record by its composite instance ID.
    pub fn get(&self, device_instance_id: &str) -> Option<&DeviceRecord> {
        self.devices
            .iter()
            .find(|r| r.device_instance_id == device_instance_id)
    }

    /// True when `id` names a known composite device or one of their
    /// payload sub-devices.
    pub fn recognizes(&self, id: &str) -> bool {
        self.devices.iter().any(|r| r.matches_id(id))
    }

    pub fn len(&self) -> usize {
        self.devices.len()
    }

    pub fn is_empty(&self) -> bool {
        self.devices.is_empty()
    }
}

/// Watches the device bus for catalog-supported devices.
pub struct DeviceMonitor {
    bus: Box<dyn DeviceBus>,
    catalog: Arc<DriverCatalog>,
    snapshot: DeviceSnapshot,
}

impl DeviceMonitor {
    pub fn new(bus: Box<dyn DeviceBus>, catalog: Arc<DriverCatalog>) -> Self {
        Self {
            bus,
            catalog,
            snapshot: DeviceSnapshot::default(),
        }
    }

    /// Re-enumerate the bus and swap in a freshly built snapshot.
    pub fn refresh(&mut self) -> Result<&DeviceSnapshot> {
        let nodes = self.bus.enumerate()?;
        self.snapshot = build_snapshot(&nodes, &self.catalog);
        Ok(&self.snapshot)
    }

    pub fn snapshot(&self) -> &DeviceSnapshot {
        &self.snapshot
    }

    /// The catalog this monitor filters against.
    pub fn catalog(&self) -> &DriverCatalog {
        &self.catalog
    }

    /// Process a debounced arrival signal. Refreshes first, so a recognized
    /// device is already in the snapshot when its event goes out.
    pub fn handle_arrival(&mut self, instance_id: &str) -> Result<Option<DeviceEvent>> {
        self.refresh()?;
        if !self.snapshot.recognizes(instance_id) {
            debug!("ignoring arrival of unsupported device {}", instance_id);
            return Ok(None);
        }
        info!("device arrived: {}", instance_id);
        Ok(Some(DeviceEvent {
            kind: DeviceEventKind::Arrived,
            device_instance_id: instance_id.to_string(),
        }))
    }

    /// Process a removal signal. The device is judged against the snapshot
    /// taken before the removal, since the bus no longer lists it.
    pub fn handle_removal(&mut self, instance_id: &str) -> Result<Option<DeviceEvent>> {
        let known = self.snapshot.recognizes(instance_id);
        self.refresh()?;
        if !known {
            debug!("ignoring removal of unsupported device {}", instance_id);
            return Ok(None);
        }
        info!("device removed: {}", instance_id);
        Ok(Some(DeviceEvent {
            kind: DeviceEventKind::Removed,
            device_instance_id: instance_id.to_string(),
        }))
    }

    /// Nudge the bus to re-detect hardware, then report what changed as
    /// events keyed by composite instance ID. Used after a driver install,
    /// when the payload sub-device may only now be visible.
    pub fn rescan(&mut self) -> Result<Vec<DeviceEvent>> {
        let before: Vec<String> = self
            .snapshot
            .devices
            .iter()
            .map(|r| r.device_instance_id.clone())
            .collect();

        self.bus.rescan()?;
        self.refresh()?;

        let mut events = Vec::new();
        for id in &before {
            if self.snapshot.get(id).is_none() {
                events.push(DeviceEvent {
                    kind: DeviceEventKind::Removed,
                    device_instance_id: id.clone(),
                });
            }
        }
        for record in &self.snapshot.devices {
            if !before.contains(&record.device_instance_id) {
                events.push(DeviceEvent {
                    kind: DeviceEventKind::Arrived,
                    device_instance_id: record.device_instance_id.clone(),
                });
            }
        }
        Ok(events)
    }

    pub fn stop(&mut self) -> bool {
        self.bus.stop()
    }
}

fn build_snapshot(nodes: &[BusNode], catalog: &DriverCatalog) -> DeviceSnapshot {
    let mut devices = Vec::new();
    for node in nodes {
        let payload = payload_child(node);
        if !is_supported(node, payload, catalog) {
            continue;
        }
        devices.push(build_record(node, payload));
    }
    DeviceSnapshot { devices }
}

/// A device is supported when the catalog lists its composite instance ID,
/// or a hardware ID of its payload sub-device.
fn is_supported(node: &BusNode, payload: Option<&BusNode>, catalog: &DriverCatalog) -> bool {
    if catalog.rule_for_instance_id(&node.instance_id).is_some() {
        return true;
    }
    payload.is_some_and(|child| {
        child
            .hardware_ids
            .iter()
            .any(|hw| catalog.rule_for_hardware_id(hw).is_some())
    })
}

/// Walk the direct children for the payload sub-device: the first child
/// whose description contains the marker token or whose class GUID is the
/// Android one. Siblings after the first match are not examined.
fn payload_child(node: &BusNode) -> Option<&BusNode> {
    node.children.iter().find(|child| {
        child.description.to_lowercase().contains(SUB_DEVICE_MARKER)
            || child.class_guid.eq_ignore_ascii_case(ANDROID_CLASS_GUID)
    })
}

fn build_record(node: &BusNode, payload: Option<&BusNode>) -> DeviceRecord {
    let serial_number = node
        .instance_id
        .rsplit_once('\\')
        .map(|(_, serial)| serial.to_string())
        .unwrap_or_else(|| node.instance_id.clone());

    let install_state = match payload {
        // The bus may report "installed" while no driver is actually
        // bound; that is the installer-silently-no-oped case.
        Some(child) if child.install_state == InstallState::Installed && child.driver.is_empty() => {
            InstallState::FailedInstall
        }
        Some(child) => child.install_state,
        None => InstallState::Pending,
    };

    DeviceRecord {
        device_instance_id: node.instance_id.clone(),
        serial_number,
        description: node.description.clone(),
        sub_device_instance_id: payload.map(|child| child.instance_id.clone()),
        hardware_id: payload.and_then(|child| child.hardware_ids.first().cloned()),
        install_state,
    }
}

/// Convert the symbolic interface path carried by a hotplug signal into a
/// normalized device instance ID.
///
/// `\\?\USB#Vid_04e8&Pid_503b#0002F9A9828E0F06#{a5dcbf10-...}` becomes
/// `USB\VID_04E8&PID_503B\0002F9A9828E0F06`: prefix stripped, the interface
/// class GUID cut off, separators restored, uppercased.
pub fn interface_path_to_instance_id(path: &str) -> Option<String> {
    let body = path.strip_prefix("\\\\?\\")?;
    let (body, _guid) = body.rsplit_once('#')?;
    if body.is_empty() {
        return None;
    }
    Some(body.replace('#', "\\").to_uppercase())
}
