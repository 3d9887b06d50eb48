//! Device identity: classification, enumeration, and slot resolution.
//!
//! The backend's enumeration order can change across restarts and
//! reconnects, so nothing in a saved profile may be keyed by it. This module
//! turns best-effort hardware enumeration into stable UUID-keyed prefixes:
//!
//! ```text
//! enumerate_devices() ──► autoPrefixTable (per run) ──┐
//!                                                     ├──► resolve(uuid, backend)
//! overrides.toml (persisted, user-editable) ──────────┘
//! ```

pub mod enumerator;
pub mod resolver;

pub use enumerator::{enumerate_devices, DeviceDescriptor};
pub use resolver::{DeviceSlotResolver, PrefixOverrides};

use serde::{Deserialize, Serialize};
use std::fmt;
use tracing::debug;

/// Coarse device class used for slot numbering (`js{N}` vs `gp{N}`).
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum DeviceClass {
    Joystick,
    Gamepad,
}

impl DeviceClass {
    pub fn prefix_stem(&self) -> &'static str {
        match self {
            DeviceClass::Joystick => "js",
            DeviceClass::Gamepad => "gp",
        }
    }
}

impl fmt::Display for DeviceClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DeviceClass::Joystick => write!(f, "Joystick"),
            DeviceClass::Gamepad => write!(f, "Gamepad"),
        }
    }
}

// Joystick/HOTAS identifiers are checked first: a "VKB Gladiator joystick"
// must never classify as a gamepad no matter what else its name contains.
const JOYSTICK_INDICATORS: [&str; 13] = [
    "joystick",
    "hotas",
    "throttle",
    "gladiator",
    "warthog",
    "t16000",
    "vkb",
    "vkbsim",
    "virpil",
    "thrustmaster",
    "saitek",
    "x52",
    "x56",
];

const GAMEPAD_INDICATORS: [&str; 10] = [
    "xbox",
    "playstation",
    "dualshock",
    "dualsense",
    "ps3",
    "ps4",
    "ps5",
    "controller for windows",
    "gamepad",
    "xinput",
];

/// Classifies a device by its reported name. Generic devices that match
/// neither indicator list default to joystick.
pub fn classify_device_name(name: &str) -> DeviceClass {
    let lower = name.to_lowercase();

    if JOYSTICK_INDICATORS.iter().any(|ind| lower.contains(ind)) {
        debug!("classified {:?} as joystick", name);
        return DeviceClass::Joystick;
    }
    if GAMEPAD_INDICATORS.iter().any(|ind| lower.contains(ind)) {
        debug!("classified {:?} as gamepad", name);
        return DeviceClass::Gamepad;
    }
    debug!("classified {:?} as joystick (generic device)", name);
    DeviceClass::Joystick
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn joystick_indicators_win_over_gamepad_indicators() {
        // "xbox" substring alone would say gamepad; "hotas" must win.
        assert_eq!(
            classify_device_name("XBOX-layout HOTAS throttle"),
            DeviceClass::Joystick
        );
        assert_eq!(
            classify_device_name("Thrustmaster T16000M"),
            DeviceClass::Joystick
        );
    }

    #[test]
    fn gamepads_classify_as_gamepad() {
        assert_eq!(
            classify_device_name("Xbox Wireless Controller"),
            DeviceClass::Gamepad
        );
        assert_eq!(
            classify_device_name("Sony DualSense"),
            DeviceClass::Gamepad
        );
    }

    #[test]
    fn generic_devices_default_to_joystick() {
        assert_eq!(
            classify_device_name("USB Input Device"),
            DeviceClass::Joystick
        );
    }
}
