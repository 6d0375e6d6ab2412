//! libusb-backed device bus
//!
//! libusb has no portable hotplug callback on every platform the daemon
//! targets, so the watch runs as an interval worker that re-enumerates the
//! bus and diffs the set of known instance IDs. The poll thread owns its
//! own [`Context`] clone; the async side only ever reads the cached tree.
//!
//! Instance IDs are synthesized in the `USB\VID_xxxx&PID_xxxx\SERIAL`
//! shape, with one `&MI_xx` child per interface of the active
//! configuration.

use crate::bus::{
    ANDROID_CLASS_GUID, BusNode, BusSignal, DeviceBus, SignalKind, device_interface_path,
};
use common::{Error, Result, TaskWorker, WorkerContext, WorkerOptions};
use rusb::{Context, Device, UsbContext};
use std::collections::HashSet;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tracing::{debug, info, warn};

/// Hubs never carry payload interfaces and are not listed.
const CLASS_HUB: u8 = 0x09;

/// Vendor-specific interface class and the ADB subclass within it.
const CLASS_VENDOR: u8 = 0xff;
const SUBCLASS_ADB: u8 = 0x42;

/// How long a stopping poll thread gets to finish its current tick.
const POLL_STOP_TIMEOUT: Duration = Duration::from_secs(5);

/// Device bus backed by libusb enumeration.
pub struct UsbDeviceBus {
    context: Context,
    /// Tree from the most recent scan, shared with the poll thread.
    cache: Arc<Mutex<Vec<BusNode>>>,
    /// Instance IDs already reported, shared with the poll thread.
    seen: Arc<Mutex<HashSet<String>>>,
    signal_tx: async_channel::Sender<BusSignal>,
    poll_interval: Duration,
    poller: Option<TaskWorker>,
}

impl UsbDeviceBus {
    pub fn new(
        signal_tx: async_channel::Sender<BusSignal>,
        poll_interval: Duration,
    ) -> Result<Self> {
        let context = Context::new().map_err(|e| Error::Bus(e.to_string()))?;
        Ok(Self {
            context,
            cache: Arc::new(Mutex::new(Vec::new())),
            seen: Arc::new(Mutex::new(HashSet::new())),
            signal_tx,
            poll_interval,
            poller: None,
        })
    }

    /// Start the poll worker. Devices present now are recorded without
    /// signalling an arrival; only later changes produce signals.
    pub fn start_watch(&mut self) -> Result<()> {
        if self.poller.is_some() {
            return Ok(());
        }

        let initial = enumerate_bus(&self.context)?;
        {
            let mut seen = lock(&self.seen);
            seen.clear();
            seen.extend(initial.iter().map(|n| n.instance_id.clone()));
        }
        *lock(&self.cache) = initial;

        let context = self.context.clone();
        let cache = self.cache.clone();
        let seen = self.seen.clone();
        let signal_tx = self.signal_tx.clone();
        let opts = WorkerOptions {
            name: "usb-poll".to_string(),
            stop_timeout: POLL_STOP_TIMEOUT,
            ..WorkerOptions::default()
        };
        self.poller = Some(TaskWorker::interval(
            opts,
            self.poll_interval,
            move |_: &WorkerContext| {
                poll_once(&context, &cache, &seen, &signal_tx);
            },
        ));

        info!("watching USB bus every {:?}", self.poll_interval);
        Ok(())
    }
}

impl DeviceBus for UsbDeviceBus {
    fn enumerate(&mut self) -> Result<Vec<BusNode>> {
        // While watching, serve the poll thread's cache instead of racing
        // it on libusb.
        if self.poller.is_some() {
            return Ok(lock(&self.cache).clone());
        }
        enumerate_bus(&self.context)
    }

    fn rescan(&mut self) -> Result<()> {
        let nodes = enumerate_bus(&self.context)?;
        // Fold the fresh scan into the seen set so the poller does not
        // re-report devices the caller is about to diff itself.
        {
            let mut seen = lock(&self.seen);
            seen.clear();
            seen.extend(nodes.iter().map(|n| n.instance_id.clone()));
        }
        *lock(&self.cache) = nodes;
        Ok(())
    }

    fn stop(&mut self) -> bool {
        match self.poller.take() {
            Some(mut poller) => poller.stop(),
            None => true,
        }
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|e| e.into_inner())
}

/// One poll tick: re-enumerate, diff against the seen set, publish the
/// fresh tree and emit signals for the delta.
fn poll_once(
    context: &Context,
    cache: &Mutex<Vec<BusNode>>,
    seen: &Mutex<HashSet<String>>,
    signal_tx: &async_channel::Sender<BusSignal>,
) {
    let nodes = match enumerate_bus(context) {
        Ok(nodes) => nodes,
        Err(e) => {
            warn!("USB poll failed: {}", e);
            return;
        }
    };
    let current: HashSet<String> = nodes.iter().map(|n| n.instance_id.clone()).collect();

    let (removed, arrived) = {
        let mut seen = lock(seen);
        let removed: Vec<String> = seen.difference(&current).cloned().collect();
        let arrived: Vec<String> = current.difference(&seen).cloned().collect();
        *seen = current;
        (removed, arrived)
    };
    *lock(cache) = nodes;

    for id in removed {
        send_signal(signal_tx, SignalKind::Removal, &id);
    }
    for id in arrived {
        send_signal(signal_tx, SignalKind::Arrival, &id);
    }
}

fn send_signal(signal_tx: &async_channel::Sender<BusSignal>, kind: SignalKind, instance_id: &str) {
    debug!("bus signal: {:?} {}", kind, instance_id);
    let signal = BusSignal {
        kind,
        interface_path: device_interface_path(instance_id),
    };
    if signal_tx.send_blocking(signal).is_err() {
        debug!("bus signal dropped, receiver gone");
    }
}

fn enumerate_bus(context: &Context) -> Result<Vec<BusNode>> {
    let devices = context.devices().map_err(|e| Error::Bus(e.to_string()))?;
    let mut nodes = Vec::new();
    for device in devices.iter() {
        match describe_device(&device) {
            Ok(Some(node)) => nodes.push(node),
            Ok(None) => {}
            Err(e) => debug!(
                "skipping device bus={} addr={}: {}",
                device.bus_number(),
                device.address(),
                e
            ),
        }
    }
    Ok(nodes)
}

/// Build the [`BusNode`] for one physical device, or `None` for hubs.
fn describe_device(device: &Device<Context>) -> std::result::Result<Option<BusNode>, rusb::Error> {
    let descriptor = device.device_descriptor()?;
    if descriptor.class_code() == CLASS_HUB {
        return Ok(None);
    }

    let vid = descriptor.vendor_id();
    let pid = descriptor.product_id();

    // String descriptors need an open handle. Devices we cannot open are
    // still reported, with synthesized fields.
    let handle = device.open().ok();

    let serial = handle
        .as_ref()
        .and_then(|h| h.read_serial_number_string_ascii(&descriptor).ok())
        .map(|s| s.trim().to_uppercase())
        .filter(|s| !s.is_empty())
        .unwrap_or_else(|| format!("{:03}-{:03}", device.bus_number(), device.address()));

    let product = handle
        .as_ref()
        .and_then(|h| h.read_product_string_ascii(&descriptor).ok())
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .unwrap_or_else(|| format!("USB device {:04x}:{:04x}", vid, pid));

    let mut node = BusNode::new(instance_id_for(vid, pid, &serial), product.clone());
    node.hardware_ids = vec![format!("USB\\VID_{:04X}&PID_{:04X}", vid, pid)];

    // Interfaces of the active configuration become child nodes.
    if let Ok(config) = device.active_config_descriptor() {
        for interface in config.interfaces() {
            let number = interface.number();
            let Some(alt) = interface.descriptors().next() else {
                continue;
            };
            let adb = alt.class_code() == CLASS_VENDOR && alt.sub_class_code() == SUBCLASS_ADB;
            let driver = match handle.as_ref().map(|h| h.kernel_driver_active(number)) {
                Some(Ok(true)) => "kernel".to_string(),
                _ => String::new(),
            };

            let mut child = BusNode::new(
                format!(
                    "USB\\VID_{:04X}&PID_{:04X}&MI_{:02X}\\{}",
                    vid, pid, number, serial
                ),
                if adb {
                    "Android ADB Interface".to_string()
                } else {
                    product.clone()
                },
            );
            if adb {
                child.class_guid = ANDROID_CLASS_GUID.to_string();
            }
            child.hardware_ids = vec![format!(
                "USB\\VID_{:04X}&PID_{:04X}&MI_{:02X}",
                vid, pid, number
            )];
            child.driver = driver;
            node.children.push(child);
        }
    }

    Ok(Some(node))
}

fn instance_id_for(vid: u16, pid: u16, serial: &str) -> String {
    format!("USB\\VID_{:04X}&PID_{:04X}\\{}", vid, pid, serial)
}
