//! Device slot resolver - UUID-keyed logical prefix resolution.
//!
//! Saved profiles reference devices as `js1`/`gp2`; which physical device a
//! slot means is decided here. The auto table is rebuilt once per process
//! start from enumeration order, and a persisted user override table (keyed
//! by UUID, never by enumeration order) takes precedence over it.

use crate::devices::{DeviceClass, DeviceDescriptor};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

/// Resolves a device UUID to the logical prefix used in canonical strings.
#[derive(Clone, Debug, Default)]
pub struct DeviceSlotResolver {
    /// Per-run table built from enumeration order: uuid -> `js{N}`/`gp{N}`.
    auto: HashMap<String, String>,
    /// Persisted user overrides: uuid -> prefix. Wins over the auto table.
    overrides: HashMap<String, String>,
}

impl DeviceSlotResolver {
    pub fn new(auto: HashMap<String, String>, overrides: HashMap<String, String>) -> Self {
        Self { auto, overrides }
    }

    /// Builds the auto table from an enumeration snapshot, assigning
    /// sequential slot numbers separately per device class, in enumeration
    /// order.
    pub fn from_enumeration(devices: &[DeviceDescriptor], overrides: PrefixOverrides) -> Self {
        let mut auto = HashMap::new();
        let mut joystick_slot = 0usize;
        let mut gamepad_slot = 0usize;

        for device in devices {
            let slot = match device.class {
                DeviceClass::Joystick => {
                    joystick_slot += 1;
                    joystick_slot
                }
                DeviceClass::Gamepad => {
                    gamepad_slot += 1;
                    gamepad_slot
                }
            };
            let prefix = format!("{}{}", device.class.prefix_stem(), slot);
            info!(
                "auto-detected {} as {} ({})",
                device.name, prefix, device.uuid
            );
            auto.insert(device.uuid.clone(), prefix);
        }

        Self {
            auto,
            overrides: overrides.devices,
        }
    }

    /// Pure lookup: auto-detected prefix (falling back to the backend's own
    /// prefix for devices missing from the table), then replaced by a user
    /// override when one exists.
    pub fn resolve(&self, device_uuid: &str, backend_prefix: &str) -> String {
        let detected = self
            .auto
            .get(device_uuid)
            .map(String::as_str)
            .unwrap_or(backend_prefix);

        match self.overrides.get(device_uuid) {
            Some(overridden) => {
                debug!(
                    "prefix override for {}: {} -> {}",
                    device_uuid, detected, overridden
                );
                overridden.clone()
            }
            None => detected.to_string(),
        }
    }

    /// The auto-detected prefix for a UUID, if the device was enumerated.
    pub fn auto_prefix(&self, device_uuid: &str) -> Option<&str> {
        self.auto.get(device_uuid).map(String::as_str)
    }
}

/// Persisted `{uuid -> prefix}` override table.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct PrefixOverrides {
    #[serde(default)]
    pub devices: HashMap<String, String>,
}

impl PrefixOverrides {
    /// Loads the override table, degrading to empty on a missing file and
    /// logging and ignoring a corrupt one.
    pub fn load(path: &Path) -> Self {
        let raw = match fs::read_to_string(path) {
            Ok(raw) => raw,
            Err(e) => {
                debug!("no override table at {:?}: {}", path, e);
                return Self::default();
            }
        };
        match toml::from_str(&raw) {
            Ok(overrides) => overrides,
            Err(e) => {
                warn!("ignoring corrupt override table {:?}: {}", path, e);
                Self::default()
            }
        }
    }

    pub fn save(&self, path: &Path) -> std::io::Result<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        let raw = toml::to_string_pretty(self)
            .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e))?;
        fs::write(path, raw)
    }
}

/// Default location of the override table.
pub fn overrides_path() -> Option<PathBuf> {
    dirs::config_dir().map(|dir| dir.join("rebind").join("overrides.toml"))
}
