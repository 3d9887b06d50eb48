//! Backend device source - gilrs events to raw device events.
//!
//! Polls the gilrs event queue, translates gamepad/joystick activity into
//! raw device events (`button<N>`, `axis<N>`, D-pad as `hat1_<direction>`),
//! stamps them with the armed session id, and feeds the shared source
//! channel. Axis activity is edge-triggered so a deflected stick emits one
//! detection per direction instead of a stream.

use crate::capture::SessionId;
use crate::devices::enumerator::uuid_string;
use crate::input::{Modifier, RawInputEvent};
use crate::sources::{SourceError, SourceEvent};
use gilrs::{Axis, Button, Event, EventType, GamepadId, Gilrs};
use statum::{machine, state};
use std::collections::HashMap;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

// Edge-trigger thresholds for axis detection.
const AXIS_TRIGGER_THRESHOLD: f32 = 0.5;
const AXIS_RESET_THRESHOLD: f32 = 0.3;
const MOVEMENT_THRESHOLD: f32 = 0.3;

/// Backend identity of one connected device: the backend's own prefix (the
/// slot resolver remaps it) and the stable UUID.
#[derive(Clone, Debug)]
struct DeviceIdentity {
    prefix: String,
    uuid: String,
}

// Per-axis edge state: a direction fires once until the axis re-centers.
#[derive(Clone, Debug, Default)]
struct AxisState {
    last_value: f32,
    last_triggered_positive: Option<bool>,
}

#[state]
#[derive(Debug, Clone)]
pub enum DeviceSourceState {
    Initializing,
    Streaming,
}

#[machine]
pub struct DeviceSource<S: DeviceSourceState> {
    gilrs: Gilrs,
    roster: HashMap<GamepadId, DeviceIdentity>,
    armed: watch::Receiver<Option<SessionId>>,
    held_modifiers: watch::Receiver<Vec<Modifier>>,
    output: mpsc::Sender<SourceEvent>,
    cancel: CancellationToken,
    axis_states: HashMap<(GamepadId, u32), AxisState>,
}

impl DeviceSource<Initializing> {
    pub fn create(
        armed: watch::Receiver<Option<SessionId>>,
        held_modifiers: watch::Receiver<Vec<Modifier>>,
        output: mpsc::Sender<SourceEvent>,
        cancel: CancellationToken,
    ) -> Result<Self, SourceError> {
        info!("Initializing gilrs device backend");
        let gilrs = match Gilrs::new() {
            Ok(g) => g,
            Err(e) => {
                error!("Failed to initialize gilrs: {}", e);
                return Err(SourceError::Initialization(e.to_string()));
            }
        };

        Ok(Self::new(
            gilrs,
            HashMap::new(),
            armed,
            held_modifiers,
            output,
            cancel,
            HashMap::new(),
        ))
    }

    /// Builds the backend roster (per-class backend prefixes in enumeration
    /// order) and transitions to streaming.
    pub fn initialize(mut self) -> DeviceSource<Streaming> {
        let mut joystick_slot = 0usize;
        let mut gamepad_slot = 0usize;
        let mut roster = HashMap::new();

        for (idx, (id, gamepad)) in self.gilrs.gamepads().enumerate() {
            let class = crate::devices::classify_device_name(gamepad.name());
            let slot = match class {
                crate::devices::DeviceClass::Joystick => {
                    joystick_slot += 1;
                    joystick_slot
                }
                crate::devices::DeviceClass::Gamepad => {
                    gamepad_slot += 1;
                    gamepad_slot
                }
            };
            let identity = DeviceIdentity {
                prefix: format!("{}{}", class.prefix_stem(), slot),
                uuid: uuid_string(gamepad.uuid(), idx),
            };
            info!(
                "  [{}] {} streaming as {} ({})",
                id,
                gamepad.name(),
                identity.prefix,
                identity.uuid
            );
            roster.insert(id, identity);
        }

        if roster.is_empty() {
            warn!("No device connected, device source idle until refresh");
        }
        self.roster = roster;
        self.transition()
    }
}

impl DeviceSource<Streaming> {
    /// Polls gilrs until cancelled, forwarding stamped raw events.
    pub async fn run(mut self) {
        info!("Device source entering streaming loop");
        loop {
            tokio::select! {
                _ = self.cancel.cancelled() => {
                    info!("Device source cancelled");
                    break;
                }
                _ = tokio::time::sleep(Duration::from_millis(2)) => {
                    if self.drain_events().await.is_err() {
                        break;
                    }
                }
            }
        }
    }

    async fn drain_events(&mut self) -> Result<(), SourceError> {
        while let Some(Event { id, event, .. }) = self.gilrs.next_event() {
            let Some(identity) = self.roster.get(&id).cloned() else {
                debug!("skipping event from unenumerated device: {:?}", id);
                continue;
            };
            let Some(parts) = self.convert(id, event) else {
                continue;
            };

            let Some(session_id) = *self.armed.borrow() else {
                debug!("device source dropping event, no session armed");
                continue;
            };
            let raw = RawInputEvent::Device {
                device_uuid: identity.uuid,
                raw_string: format!("{}_{}", identity.prefix, parts.base),
                held_modifiers: self.held_modifiers.borrow().clone(),
                axis_value: parts.axis_value,
                hid_axis_name: parts.hid_axis_name,
            };
            if self
                .output
                .send(SourceEvent::Raw {
                    session_id,
                    event: raw,
                })
                .await
                .is_err()
            {
                error!("device source output closed");
                return Err(SourceError::Channel("output closed".to_string()));
            }
        }
        Ok(())
    }

    fn convert(&mut self, id: GamepadId, event: EventType) -> Option<RawParts> {
        match event {
            EventType::ButtonPressed(button, _) => convert_button(button),
            EventType::ButtonReleased(..) | EventType::ButtonRepeated(..) => None,
            EventType::AxisChanged(axis, value, _) => self.convert_axis(id, axis, value),
            EventType::Connected => {
                info!("device connected event; roster refresh requires restart");
                None
            }
            EventType::Disconnected => {
                warn!("device disconnected event");
                None
            }
            _ => {
                debug!("unhandled gilrs event: {:?}", event);
                None
            }
        }
    }

    /// Edge-triggered axis detection: fire once per direction past the
    /// trigger threshold, re-arm when the axis returns to center.
    fn convert_axis(&mut self, id: GamepadId, axis: Axis, value: f32) -> Option<RawParts> {
        // D-pads report as axes on some backends; they are hats.
        if axis == Axis::DPadX || axis == Axis::DPadY {
            let direction = match (axis, value) {
                (Axis::DPadX, v) if v > 0.5 => "right",
                (Axis::DPadX, v) if v < -0.5 => "left",
                (Axis::DPadY, v) if v > 0.5 => "up",
                (Axis::DPadY, v) if v < -0.5 => "down",
                _ => return None,
            };
            return Some(RawParts {
                base: format!("hat1_{}", direction),
                axis_value: Some(value),
                hid_axis_name: None,
            });
        }

        let (index, hid_name) = axis_identity(axis)?;
        let state = self
            .axis_states
            .entry((id, index))
            .or_default();

        let movement = (value - state.last_value).abs();
        let is_positive = value > AXIS_TRIGGER_THRESHOLD;
        let is_negative = value < -AXIS_TRIGGER_THRESHOLD;

        if value.abs() < AXIS_RESET_THRESHOLD {
            state.last_triggered_positive = None;
            state.last_value = value;
            return None;
        }

        let should_trigger = (is_positive
            && movement > MOVEMENT_THRESHOLD
            && state.last_triggered_positive != Some(true))
            || (is_negative
                && movement > MOVEMENT_THRESHOLD
                && state.last_triggered_positive != Some(false));
        if !should_trigger {
            return None;
        }

        state.last_triggered_positive = Some(is_positive);
        state.last_value = value;
        debug!("axis {:?} triggered at {:.4}", axis, value);
        Some(RawParts {
            base: format!("axis{}", index),
            axis_value: Some(value),
            hid_axis_name: Some(hid_name.to_string()),
        })
    }
}

struct RawParts {
    base: String,
    axis_value: Option<f32>,
    hid_axis_name: Option<String>,
}

fn convert_button(button: Button) -> Option<RawParts> {
    // D-pad presses are hat directions, everything else a numbered button.
    let base = match button {
        Button::DPadUp => "hat1_up".to_string(),
        Button::DPadDown => "hat1_down".to_string(),
        Button::DPadLeft => "hat1_left".to_string(),
        Button::DPadRight => "hat1_right".to_string(),
        other => format!("button{}", button_number(other)?),
    };
    Some(RawParts {
        base,
        axis_value: None,
        hid_axis_name: None,
    })
}

fn button_number(button: Button) -> Option<u32> {
    match button {
        Button::South => Some(1),
        Button::East => Some(2),
        Button::West => Some(3),
        Button::North => Some(4),
        Button::LeftTrigger => Some(5),
        Button::RightTrigger => Some(6),
        Button::Select => Some(7),
        Button::Start => Some(8),
        Button::LeftThumb => Some(9),
        Button::RightThumb => Some(10),
        Button::Mode => Some(11),
        Button::LeftTrigger2 => Some(12),
        Button::RightTrigger2 => Some(13),
        _ => None,
    }
}

fn axis_identity(axis: Axis) -> Option<(u32, &'static str)> {
    match axis {
        Axis::LeftStickX => Some((1, "X")),
        Axis::LeftStickY => Some((2, "Y")),
        Axis::LeftZ => Some((3, "Z")),
        Axis::RightStickX => Some((4, "Rx")),
        Axis::RightStickY => Some((5, "Ry")),
        Axis::RightZ => Some((6, "Rz")),
        _ => None,
    }
}

/// Spawns the device source as a background task.
pub struct DeviceSourceHandle {
    task: JoinHandle<()>,
}

impl DeviceSourceHandle {
    pub fn spawn(
        armed: watch::Receiver<Option<SessionId>>,
        held_modifiers: watch::Receiver<Vec<Modifier>>,
        output: mpsc::Sender<SourceEvent>,
        cancel: CancellationToken,
    ) -> Result<Self, SourceError> {
        let source = DeviceSource::create(armed, held_modifiers, output, cancel)?;
        let task = tokio::spawn(async move {
            source.initialize().run().await;
        });
        Ok(Self { task })
    }

    pub fn abort(&self) {
        self.task.abort();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn dpad_buttons_become_hat_directions() {
        assert_eq!(convert_button(Button::DPadLeft).unwrap().base, "hat1_left");
        assert_eq!(convert_button(Button::South).unwrap().base, "button1");
    }

    #[test]
    fn named_axes_carry_hid_identity() {
        assert_eq!(axis_identity(Axis::RightZ), Some((6, "Rz")));
        assert_eq!(axis_identity(Axis::LeftStickX), Some((1, "X")));
        assert_eq!(axis_identity(Axis::Unknown), None);
    }
}
