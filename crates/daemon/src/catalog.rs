//! Driver catalog
//!
//! The catalog is a JSON file describing the devices the daemon supports
//! and how to install their drivers:
//!
//! ```json
//! {
//!   "devices": [
//!     {
//!       "device_instance_id": "USB\\VID_19D2&PID_1350\\FULL_UNAGI",
//!       "android_hardware_id": "USB\\VID_19D2&PID_1350&MI_01",
//!       "driver_download_url": "https://example.com/unagi.zip",
//!       "install_mechanism": "staged"
//!     }
//!   ]
//! }
//! ```
//!
//! Rules are looked up two ways: by the composite device's instance ID, or
//! by a sub-device hardware ID when the composite ID is not recognized. A
//! missing or malformed file degrades to an empty catalog rather than
//! failing startup.

use common::{Error, Result};
use protocol::DriverRule;
use serde::Deserialize;
use std::collections::HashMap;
use std::path::Path;
use tracing::{info, warn};

#[derive(Debug, Deserialize)]
struct CatalogFile {
    devices: Vec<DriverRule>,
}

/// Read-only lookup table of driver rules.
#[derive(Debug, Default)]
pub struct DriverCatalog {
    rules: Vec<DriverRule>,
    by_instance_id: HashMap<String, usize>,
    by_hardware_id: HashMap<String, usize>,
}

impl DriverCatalog {
    pub fn from_rules(rules: Vec<DriverRule>) -> Self {
        let mut by_instance_id = HashMap::new();
        let mut by_hardware_id = HashMap::new();
        for (index, rule) in rules.iter().enumerate() {
            if by_instance_id
                .insert(rule.device_instance_id.clone(), index)
                .is_some()
            {
                warn!(
                    "duplicate catalog entry for {}, keeping the later one",
                    rule.device_instance_id
                );
            }
            by_hardware_id.insert(rule.hardware_id.clone(), index);
        }
        Self {
            rules,
            by_instance_id,
            by_hardware_id,
        }
    }

    /// Load the catalog from a JSON file.
    pub fn load(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)
            .map_err(|e| Error::Catalog(format!("failed to read {}: {}", path.display(), e)))?;
        let file: CatalogFile = serde_json::from_str(&text)
            .map_err(|e| Error::Catalog(format!("failed to parse {}: {}", path.display(), e)))?;
        Ok(Self::from_rules(file.devices))
    }

    /// Load the catalog, degrading to an empty one on any error. Install
    /// commands then always report the device as unknown.
    pub fn load_or_empty(path: &Path) -> Self {
        match Self::load(path) {
            Ok(catalog) => {
                info!(
                    "loaded {} driver rule(s) from {}",
                    catalog.len(),
                    path.display()
                );
                catalog
            }
            Err(e) => {
                warn!("{}; starting with an empty catalog", e);
                Self::default()
            }
        }
    }

    pub fn rule_for_instance_id(&self, id: &str) -> Option<&DriverRule> {
        self.by_instance_id.get(id).map(|&i| &self.rules[i])
    }

    pub fn rule_for_hardware_id(&self, id: &str) -> Option<&DriverRule> {
        self.by_hardware_id.get(id).map(|&i| &self.rules[i])
    }

    pub fn len(&self) -> usize {
        self.rules.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }
}
