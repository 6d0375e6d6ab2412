//! usbmond
//!
//! USB device monitor daemon. Watches the bus for supported composite
//! devices, serves their driver state to a browser-extension client over a
//! loopback socket, and runs driver installations through a helper process.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use common::setup_logging;
use daemon::bus::UsbDeviceBus;
use daemon::catalog::DriverCatalog;
use daemon::config::DaemonConfig;
use daemon::control::Controller;
use daemon::installer::{DriverInstaller, SystemLauncher};
use daemon::monitor::DeviceMonitor;
use daemon::net::SocketService;
use tokio::signal;
use tracing::{error, info, warn};

#[derive(Parser, Debug)]
#[command(name = "usbmond")]
#[command(
    author,
    version,
    about = "USB device monitor daemon for the browser extension"
)]
#[command(long_about = "
USB device monitor daemon. Watches the USB bus for supported composite
devices, reports their driver state to a browser-extension client over a
loopback socket, and runs driver installations on request.

EXAMPLES:
    # Run with default config
    usbmond

    # Run with custom config
    usbmond --config /path/to/config.toml

    # List supported USB devices without starting the daemon
    usbmond --list-devices

    # Run with debug logging
    usbmond --log-level debug

CONFIGURATION:
    The daemon looks for configuration files in the following order:
    1. Path specified with --config
    2. ~/.config/usbmon/config.toml
    3. /etc/usbmon/config.toml
    4. Built-in defaults
")]
struct Args {
    /// Path to configuration file
    #[arg(short, long, value_name = "PATH")]
    config: Option<PathBuf>,

    /// Save default configuration to the default location and exit
    #[arg(long)]
    save_config: bool,

    /// List supported USB devices and exit
    #[arg(long)]
    list_devices: bool,

    /// Log level (trace, debug, info, warn, error)
    #[arg(short, long, value_name = "LEVEL")]
    log_level: Option<String>,

    /// Socket port, overriding the configured one
    #[arg(short, long, value_name = "PORT")]
    port: Option<u16>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // Handle --save-config flag early (before loading config)
    if args.save_config {
        let config = DaemonConfig::default();
        let path = DaemonConfig::default_path()
            .context("Could not determine the user configuration directory")?;
        config.save(&path).context("Failed to save configuration")?;
        println!("Configuration saved to: {}", path.display());
        return Ok(());
    }

    // An explicit --config that fails to load is an error; otherwise fall
    // back to defaults.
    let mut config = if let Some(ref path) = args.config {
        DaemonConfig::load(Some(path)).context("Failed to load configuration")?
    } else {
        DaemonConfig::load_or_default(None)
    };

    if let Some(level) = args.log_level {
        config.daemon.log_level = level;
    }
    if let Some(port) = args.port {
        config.socket.port = port;
    }
    config.validate().context("Invalid configuration")?;

    setup_logging(&config.daemon.log_level).context("Failed to setup logging")?;

    info!("usbmond v{}", env!("CARGO_PKG_VERSION"));

    let catalog = Arc::new(DriverCatalog::load_or_empty(&config.catalog_path()));
    if catalog.is_empty() {
        warn!("driver catalog is empty, no devices will be recognized");
    }

    let (signal_tx, signal_rx) = async_channel::bounded(256);
    let mut bus = UsbDeviceBus::new(signal_tx, config.poll_interval())
        .context("Failed to open the USB bus")?;

    if args.list_devices {
        return list_devices_mode(bus, catalog);
    }

    bus.start_watch().context("Failed to start the USB watcher")?;
    let monitor = DeviceMonitor::new(Box::new(bus), catalog);

    let (outcome_tx, outcome_rx) = async_channel::bounded(16);
    let installer =
        DriverInstaller::new(&config.installer, Arc::new(SystemLauncher::new()), outcome_tx);

    let (line_tx, line_rx) = async_channel::bounded(64);
    let socket = SocketService::bind(
        config.socket.port,
        config.socket.max_clients,
        config.socket.port_file.as_deref(),
        line_tx,
    )
    .await
    .context("Failed to bind the extension socket")?;

    let controller = Controller::new(
        monitor,
        installer,
        socket,
        config.debounce_window(),
        signal_rx,
        line_rx,
        outcome_rx,
    );

    controller
        .run(async {
            match signal::ctrl_c().await {
                Ok(()) => info!("received Ctrl+C, shutting down"),
                Err(e) => error!("error waiting for Ctrl+C: {}", e),
            }
        })
        .await
        .context("Daemon event loop failed")?;

    info!("usbmond exited");
    Ok(())
}

/// Scan once and print the supported devices.
fn list_devices_mode(bus: UsbDeviceBus, catalog: Arc<DriverCatalog>) -> Result<()> {
    let mut monitor = DeviceMonitor::new(Box::new(bus), catalog);
    let snapshot = monitor.refresh().context("Failed to scan the USB bus")?;

    if snapshot.is_empty() {
        println!("No supported devices connected.");
        return Ok(());
    }

    println!("Found {} supported device(s):\n", snapshot.len());
    for device in snapshot.devices() {
        println!("  {} - {}", device.device_instance_id, device.description);
        println!(
            "      Serial: {}  State: {:?}",
            device.serial_number, device.install_state
        );
        if let Some(sub) = &device.sub_device_instance_id {
            println!("      Payload: {}", sub);
        }
        println!();
    }
    Ok(())
}
