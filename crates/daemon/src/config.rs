//! Daemon configuration
//!
//! Loaded from a TOML file; every field has a default so an absent or
//! partial file still yields a working configuration.

use common::{Error, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::warn;

/// Default TCP port the client socket listens on.
pub const DEFAULT_PORT: u16 = 24642;

/// Top-level configuration for `usbmond`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct DaemonConfig {
    pub daemon: DaemonSettings,
    pub socket: SocketSettings,
    pub catalog: CatalogSettings,
    pub installer: InstallerSettings,
    pub monitor: MonitorSettings,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DaemonSettings {
    /// Default log level, overridden by `RUST_LOG`.
    pub log_level: String,
}

impl Default for DaemonSettings {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SocketSettings {
    /// Loopback port for the extension socket. 0 picks an ephemeral port.
    pub port: u16,
    /// Size of the client slot pool; accepts pause while it is full.
    pub max_clients: usize,
    /// When set, the bound port is written here on startup. Useful together
    /// with `port = 0`.
    pub port_file: Option<PathBuf>,
}

impl Default for SocketSettings {
    fn default() -> Self {
        Self {
            port: DEFAULT_PORT,
            max_clients: 2,
            port_file: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CatalogSettings {
    /// Path to the driver catalog JSON file. Tilde is expanded.
    pub path: String,
}

impl Default for CatalogSettings {
    fn default() -> Self {
        Self {
            path: "drivers/driver_list.json".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct InstallerSettings {
    /// Staged-installer helper executable. Defaults to the dpinst binary
    /// matching the daemon's pointer width, next to the daemon executable.
    pub staged_installer: Option<String>,
    /// Root against which relative driver-package paths from the client are
    /// resolved. Defaults to the daemon's working directory.
    pub package_root: Option<String>,
    /// How long stopping the installer worker may take before it is
    /// reported as unclean.
    pub stop_timeout_secs: u64,
}

impl Default for InstallerSettings {
    fn default() -> Self {
        Self {
            staged_installer: None,
            package_root: None,
            stop_timeout_secs: 30,
        }
    }
}

impl InstallerSettings {
    pub fn staged_installer_path(&self) -> PathBuf {
        if let Some(path) = &self.staged_installer {
            return PathBuf::from(shellexpand::tilde(path).into_owned());
        }
        let helper = if cfg!(target_pointer_width = "64") {
            "dpinst64.exe"
        } else {
            "dpinst32.exe"
        };
        std::env::current_exe()
            .ok()
            .and_then(|exe| exe.parent().map(|dir| dir.join(helper)))
            .unwrap_or_else(|| PathBuf::from(helper))
    }

    pub fn package_root(&self) -> PathBuf {
        match &self.package_root {
            Some(root) => PathBuf::from(shellexpand::tilde(root).into_owned()),
            None => PathBuf::from("."),
        }
    }

    pub fn stop_timeout(&self) -> Duration {
        Duration::from_secs(self.stop_timeout_secs)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MonitorSettings {
    /// Bus poll period for hotplug detection.
    pub poll_interval_ms: u64,
    /// Settle window for arrival signals.
    pub debounce_ms: u64,
}

impl Default for MonitorSettings {
    fn default() -> Self {
        Self {
            poll_interval_ms: 1000,
            debounce_ms: 500,
        }
    }
}

impl DaemonConfig {
    /// Load configuration from `path`, or from the first existing default
    /// location when no path is given. No file at all yields the defaults.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let candidate = match path {
            Some(path) => Some(path.to_path_buf()),
            None => {
                let mut candidates = Vec::new();
                if let Some(default) = Self::default_path() {
                    candidates.push(default);
                }
                candidates.push(PathBuf::from("/etc/usbmon/config.toml"));
                candidates.into_iter().find(|p| p.exists())
            }
        };

        let Some(candidate) = candidate else {
            return Ok(Self::default());
        };

        let text = std::fs::read_to_string(&candidate).map_err(|e| {
            Error::Config(format!("failed to read {}: {}", candidate.display(), e))
        })?;
        let config: DaemonConfig = toml::from_str(&text).map_err(|e| {
            Error::Config(format!("failed to parse {}: {}", candidate.display(), e))
        })?;
        Ok(config)
    }

    /// Like [`DaemonConfig::load`], but falls back to the defaults on any
    /// error instead of failing startup.
    pub fn load_or_default(path: Option<&Path>) -> Self {
        match Self::load(path) {
            Ok(config) => config,
            Err(e) => {
                warn!("{}; using default configuration", e);
                Self::default()
            }
        }
    }

    /// Write this configuration as pretty TOML, creating parent
    /// directories.
    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent()
            && !parent.as_os_str().is_empty()
        {
            std::fs::create_dir_all(parent)?;
        }
        let text = toml::to_string_pretty(self)
            .map_err(|e| Error::Config(format!("failed to serialize configuration: {}", e)))?;
        std::fs::write(path, text)?;
        Ok(())
    }

    /// Per-user default config location.
    pub fn default_path() -> Option<PathBuf> {
        dirs::config_dir().map(|dir| dir.join("usbmon").join("config.toml"))
    }

    pub fn validate(&self) -> Result<()> {
        const LEVELS: [&str; 5] = ["trace", "debug", "info", "warn", "error"];
        if !LEVELS.contains(&self.daemon.log_level.as_str()) {
            return Err(Error::Config(format!(
                "invalid log level '{}' (expected one of {})",
                self.daemon.log_level,
                LEVELS.join(", ")
            )));
        }
        if self.socket.max_clients == 0 {
            return Err(Error::Config(
                "socket.max_clients must be at least 1".to_string(),
            ));
        }
        if self.monitor.poll_interval_ms < 50 {
            return Err(Error::Config(
                "monitor.poll_interval_ms must be at least 50".to_string(),
            ));
        }
        if self.catalog.path.is_empty() {
            return Err(Error::Config("catalog.path must not be empty".to_string()));
        }
        Ok(())
    }

    pub fn catalog_path(&self) -> PathBuf {
        PathBuf::from(shellexpand::tilde(&self.catalog.path).into_owned())
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.monitor.poll_interval_ms)
    }

    pub fn debounce_window(&self) -> Duration {
        Duration::from_millis(self.monitor.debounce_ms)
    }
}
