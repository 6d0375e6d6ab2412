//! Scripted device bus
//!
//! Backs the monitor and controller tests. The bus itself is handed to the
//! monitor; the paired [`FakeBusHandle`] stays with the test and edits the
//! tree or injects hotplug signals from outside.

use crate::bus::{BusNode, BusSignal, DeviceBus, SignalKind, device_interface_path};
use common::Result;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

pub struct FakeBus {
    nodes: Arc<Mutex<Vec<BusNode>>>,
    rescans: Arc<AtomicUsize>,
}

/// Test-side handle paired with a [`FakeBus`].
#[derive(Clone)]
pub struct FakeBusHandle {
    nodes: Arc<Mutex<Vec<BusNode>>>,
    rescans: Arc<AtomicUsize>,
    signal_tx: async_channel::Sender<BusSignal>,
}

impl FakeBus {
    pub fn new(signal_tx: async_channel::Sender<BusSignal>) -> (Self, FakeBusHandle) {
        let nodes = Arc::new(Mutex::new(Vec::new()));
        let rescans = Arc::new(AtomicUsize::new(0));
        let handle = FakeBusHandle {
            nodes: nodes.clone(),
            rescans: rescans.clone(),
            signal_tx,
        };
        (Self { nodes, rescans }, handle)
    }
}

impl DeviceBus for FakeBus {
    fn enumerate(&mut self) -> Result<Vec<BusNode>> {
        Ok(lock(&self.nodes).clone())
    }

    fn rescan(&mut self) -> Result<()> {
        self.rescans.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

impl FakeBusHandle {
    pub fn set_nodes(&self, nodes: Vec<BusNode>) {
        *lock(&self.nodes) = nodes;
    }

    pub fn add_node(&self, node: BusNode) {
        lock(&self.nodes).push(node);
    }

    pub fn remove_node(&self, instance_id: &str) {
        lock(&self.nodes).retain(|n| n.instance_id != instance_id);
    }

    /// How often the bus was asked to rescan.
    pub fn rescan_count(&self) -> usize {
        self.rescans.load(Ordering::SeqCst)
    }

    pub async fn signal_arrival(&self, instance_id: &str) {
        self.send(SignalKind::Arrival, instance_id).await;
    }

    pub async fn signal_removal(&self, instance_id: &str) {
        self.send(SignalKind::Removal, instance_id).await;
    }

    async fn send(&self, kind: SignalKind, instance_id: &str) {
        let signal = BusSignal {
            kind,
            interface_path: device_interface_path(instance_id),
        };
        let _ = self.signal_tx.send(signal).await;
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|e| e.into_inner())
}
