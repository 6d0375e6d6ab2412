//! Controller event loop
//!
//! One task owns every piece of mutable daemon state: the monitor, the
//! debouncer, the installer handle, the notification queue, and the socket.
//! Bus signals, client lines, and install outcomes all arrive over channels
//! and are applied here in order, so no other locking is needed.
//!
//! Notifications are never pushed to clients directly. They are queued as
//! pre-encoded lines, clients get a bell byte, and each `message` command
//! pops exactly one entry.

use std::collections::VecDeque;
use std::future::Future;
use std::time::{Duration, Instant};

use async_channel::Receiver;
use common::Error;
use protocol::{Command, DeviceStateEntry, InstallOutcome, PROTOCOL_VERSION, Reply};
use tokio::time;
use tracing::{debug, info, warn};

use crate::bus::{BusSignal, SignalKind};
use crate::debounce::ArrivalDebouncer;
use crate::installer::DriverInstaller;
use crate::monitor::{DeviceEvent, DeviceMonitor, interface_path_to_instance_id};
use crate::net::{ClientLine, SocketService};

/// Application name reported by the `info` command.
pub const APP_NAME: &str = "usbmond";

/// Oldest notifications are dropped beyond this depth. A client that never
/// sends `message` must not grow the daemon without bound.
pub const MAX_PENDING_NOTIFICATIONS: usize = 50;

/// FIFO of pre-encoded notification lines awaiting a `message` command.
#[derive(Debug, Default)]
pub struct NotificationQueue {
    items: VecDeque<String>,
}

impl NotificationQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a line, evicting the oldest entry once the queue is full.
    pub fn push(&mut self, line: String) {
        if self.items.len() >= MAX_PENDING_NOTIFICATIONS {
            self.items.pop_front();
            warn!("notification queue full, dropping oldest entry");
        }
        self.items.push_back(line);
    }

    pub fn pop(&mut self) -> Option<String> {
        self.items.pop_front()
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }
}

/// Whether the event loop keeps running after a client command.
#[derive(Debug, PartialEq, Eq)]
enum Flow {
    Continue,
    Shutdown,
}

/// The daemon event loop.
pub struct Controller {
    monitor: DeviceMonitor,
    installer: DriverInstaller,
    socket: SocketService,
    debouncer: ArrivalDebouncer,
    notifications: NotificationQueue,
    signal_rx: Receiver<BusSignal>,
    line_rx: Receiver<ClientLine>,
    outcome_rx: Receiver<InstallOutcome>,
}

impl Controller {
    pub fn new(
        monitor: DeviceMonitor,
        installer: DriverInstaller,
        socket: SocketService,
        debounce_window: Duration,
        signal_rx: Receiver<BusSignal>,
        line_rx: Receiver<ClientLine>,
        outcome_rx: Receiver<InstallOutcome>,
    ) -> Self {
        Self {
            monitor,
            installer,
            socket,
            debouncer: ArrivalDebouncer::new(debounce_window),
            notifications: NotificationQueue::new(),
            signal_rx,
            line_rx,
            outcome_rx,
        }
    }

    /// Run until a client sends `shutdown`, a channel closes, or the given
    /// future resolves. Always tears the daemon down before returning.
    pub async fn run(mut self, shutdown: impl Future<Output = ()>) -> common::Result<()> {
        tokio::pin!(shutdown);

        match self.monitor.refresh() {
            Ok(snapshot) => info!("monitoring {} supported device(s)", snapshot.len()),
            Err(e) => warn!("initial device scan failed: {}", e),
        }

        loop {
            let flush_delay = self
                .debouncer
                .next_deadline()
                .map(|deadline| deadline.saturating_duration_since(Instant::now()))
                .unwrap_or(Duration::from_secs(60));

            tokio::select! {
                signal = self.signal_rx.recv() => {
                    match signal {
                        Ok(signal) => self.handle_bus_signal(signal).await,
                        Err(_) => {
                            warn!("bus signal channel closed, shutting down");
                            break;
                        }
                    }
                }

                line = self.line_rx.recv() => {
                    match line {
                        Ok(line) => {
                            if self.handle_client_line(line).await == Flow::Shutdown {
                                info!("shutdown requested by client");
                                break;
                            }
                        }
                        Err(_) => {
                            warn!("client line channel closed, shutting down");
                            break;
                        }
                    }
                }

                outcome = self.outcome_rx.recv() => {
                    match outcome {
                        Ok(outcome) => self.handle_install_outcome(outcome).await,
                        Err(_) => {
                            warn!("install outcome channel closed, shutting down");
                            break;
                        }
                    }
                }

                // Fires when the oldest debounced arrival has sat out its
                // window. The guard keeps an empty debouncer from waking the
                // loop every 60 seconds for nothing.
                _ = time::sleep(flush_delay), if self.debouncer.has_pending() => {
                    self.flush_due_arrivals().await;
                }

                _ = &mut shutdown => {
                    info!("shutdown signal received");
                    break;
                }
            }
        }

        self.shutdown().await;
        Ok(())
    }

    /// Route a raw hotplug signal. Arrivals are debounced; removals take
    /// effect immediately and cancel any pending arrival of the same device.
    async fn handle_bus_signal(&mut self, signal: BusSignal) {
        let Some(instance_id) = interface_path_to_instance_id(&signal.interface_path) else {
            debug!("ignoring malformed interface path {:?}", signal.interface_path);
            return;
        };

        match signal.kind {
            SignalKind::Arrival => {
                debug!("arrival signalled for {}", instance_id);
                self.debouncer.note_arrival(&instance_id, Instant::now());
            }
            SignalKind::Removal => {
                self.debouncer.cancel(&instance_id);
                match self.monitor.handle_removal(&instance_id) {
                    Ok(Some(event)) => self.notify_device_changed(&event).await,
                    Ok(None) => {}
                    Err(e) => warn!("removal handling failed for {}: {}", instance_id, e),
                }
            }
        }
    }

    async fn flush_due_arrivals(&mut self) {
        for instance_id in self.debouncer.take_due(Instant::now()) {
            match self.monitor.handle_arrival(&instance_id) {
                Ok(Some(event)) => self.notify_device_changed(&event).await,
                Ok(None) => {}
                Err(e) => warn!("arrival handling failed for {}: {}", instance_id, e),
            }
        }
    }

    /// Forward a finished installation to the clients. A successful run may
    /// have rebound the payload sub-device, so rescan and report the delta.
    async fn handle_install_outcome(&mut self, outcome: InstallOutcome) {
        let reply = Reply::DriverInstalled {
            error_name: outcome.error_name,
            error_message: outcome.error_message.clone(),
        };
        self.queue_notification(reply).await;

        if outcome.is_success() {
            match self.monitor.rescan() {
                Ok(events) => {
                    for event in events {
                        self.notify_device_changed(&event).await;
                    }
                }
                Err(e) => warn!("post-install rescan failed: {}", e),
            }
        }
    }

    /// Parse and execute one client line, answering on the same connection.
    async fn handle_client_line(&mut self, client: ClientLine) -> Flow {
        let command = match Command::parse(&client.line) {
            Ok(command) => command,
            Err(e) => {
                debug!("rejected line from connection {}: {}", client.conn_id, e);
                self.reply(client.conn_id, &Reply::error(e.to_string())).await;
                return Flow::Continue;
            }
        };

        match command {
            Command::Info => {
                let reply = Reply::Info {
                    application: APP_NAME.to_string(),
                    version: PROTOCOL_VERSION,
                };
                self.reply(client.conn_id, &reply).await;
            }
            Command::List { device_instance_id } => {
                let entries = self.list_devices(device_instance_id.as_deref());
                self.reply(client.conn_id, &Reply::List(entries)).await;
            }
            Command::Install {
                device_instance_id,
                path,
            } => {
                let reply = self.start_install(&device_instance_id, &path);
                self.reply(client.conn_id, &reply).await;
            }
            Command::Message => match self.notifications.pop() {
                Some(line) => self.send_raw(client.conn_id, &line).await,
                None => {
                    self.reply(client.conn_id, &Reply::error("no pending messages"))
                        .await;
                }
            },
            Command::Shutdown => return Flow::Shutdown,
        }
        Flow::Continue
    }

    fn list_devices(&self, filter: Option<&str>) -> Vec<DeviceStateEntry> {
        let snapshot = self.monitor.snapshot();
        match filter {
            Some(id) => snapshot.get(id).map(DeviceStateEntry::from).into_iter().collect(),
            None => snapshot.devices().iter().map(DeviceStateEntry::from).collect(),
        }
    }

    /// Resolve the catalog rule for a device and hand the package to the
    /// installer. The rule decides the mechanism; the client supplies the
    /// package path.
    fn start_install(&self, device_instance_id: &str, path: &str) -> Reply {
        let catalog = self.monitor.catalog();
        let rule = catalog.rule_for_instance_id(device_instance_id).or_else(|| {
            self.monitor
                .snapshot()
                .get(device_instance_id)
                .and_then(|record| record.hardware_id.as_deref())
                .and_then(|hw| catalog.rule_for_hardware_id(hw))
        });

        let Some(rule) = rule else {
            debug!("install rejected, no rule for {}", device_instance_id);
            return Reply::error(Error::DeviceNotFound(device_instance_id.to_string()).to_string());
        };
        let mechanism = rule.install_mechanism;

        if self.installer.start(mechanism, path) {
            Reply::Install {}
        } else {
            Reply::error(Error::InstallerBusy.to_string())
        }
    }

    async fn notify_device_changed(&mut self, event: &DeviceEvent) {
        let reply = Reply::DeviceChanged {
            event_type: event.kind,
            device_instance_id: event.device_instance_id.clone(),
        };
        self.queue_notification(reply).await;
    }

    /// Queue a notification line and ring the bell on every connection.
    async fn queue_notification(&mut self, reply: Reply) {
        match reply.to_line() {
            Ok(line) => {
                self.notifications.push(line);
                self.socket.ping_clients().await;
            }
            Err(e) => warn!("could not encode notification: {}", e),
        }
    }

    async fn reply(&self, conn_id: u64, reply: &Reply) {
        match reply.to_line() {
            Ok(line) => self.send_raw(conn_id, &line).await,
            Err(e) => warn!("could not encode reply: {}", e),
        }
    }

    async fn send_raw(&self, conn_id: u64, line: &str) {
        if !self.socket.send_line(conn_id, line).await {
            debug!("reply dropped, connection {} is gone", conn_id);
        }
    }

    async fn shutdown(mut self) {
        info!("stopping daemon");
        if !self.socket.stop().await {
            warn!("socket service did not stop cleanly");
        }
        if !self.installer.stop() {
            warn!("installer did not stop cleanly");
        }
        if !self.monitor.stop() {
            warn!("device bus did not stop cleanly");
        }
        info!("daemon stopped");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn notification_queue_is_fifo() {
        let mut queue = NotificationQueue::new();
        assert!(queue.is_empty());
        assert_eq!(queue.pop(), None);

        queue.push("first".to_string());
        queue.push("second".to_string());
        assert_eq!(queue.len(), 2);
        assert_eq!(queue.pop().as_deref(), Some("first"));
        assert_eq!(queue.pop().as_deref(), Some("second"));
        assert_eq!(queue.pop(), None);
    }

    #[test]
    fn full_queue_evicts_the_oldest_entry() {
        let mut queue = NotificationQueue::new();
        for n in 0..MAX_PENDING_NOTIFICATIONS + 3 {
            queue.push(format!("line {n}"));
        }
        assert_eq!(queue.len(), MAX_PENDING_NOTIFICATIONS);
        // Entries 0..3 were evicted to make room.
        assert_eq!(queue.pop().as_deref(), Some("line 3"));
    }
}
