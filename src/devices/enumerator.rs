//! Best-effort hardware enumeration over the gilrs backend.
//!
//! Enumeration feeds the resolver's auto-prefix table once per process
//! start. The same physical device can still report a different UUID after
//! an OS/driver reinstall; that is an accepted external limitation.

use crate::devices::{classify_device_name, DeviceClass};
use gilrs::Gilrs;
use serde::{Deserialize, Serialize};
use tracing::info;

/// One enumerated device, as the slot resolver consumes it.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct DeviceDescriptor {
    pub uuid: String,
    pub name: String,
    pub class: DeviceClass,
}

/// Walks the connected gamepad roster and produces descriptors in
/// enumeration order.
pub fn enumerate_devices(gilrs: &Gilrs) -> Vec<DeviceDescriptor> {
    let mut devices = Vec::new();

    for (idx, (id, gamepad)) in gilrs.gamepads().enumerate() {
        let uuid = uuid_string(gamepad.uuid(), idx);
        let class = classify_device_name(gamepad.name());
        info!(
            "  [{}] ID: {}, Name: {}, UUID: {}, Class: {}",
            idx,
            id,
            gamepad.name(),
            uuid,
            class
        );
        devices.push(DeviceDescriptor {
            uuid,
            name: gamepad.name().to_string(),
            class,
        });
    }

    info!("enumerated {} devices", devices.len());
    devices
}

/// Hex form of a backend UUID. Devices reporting an all-zero UUID (XInput
/// slots do) get a synthetic stable one derived from their roster position.
pub fn uuid_string(raw: [u8; 16], slot: usize) -> String {
    if raw.iter().all(|b| *b == 0) {
        return format!("xinput_{}", slot);
    }
    let mut out = String::with_capacity(32);
    for byte in raw {
        out.push_str(&format!("{:02x}", byte));
    }
    out
}
