//! Identifier normalizer - raw platform events to canonical strings.
//!
//! One entry point, [`normalize`], turns a single [`RawInputEvent`] into a
//! [`DetectedInput`]. Malformed or empty events yield `None`; nothing in
//! here ever raises an error up the stack, because a dropped event is the
//! correct degradation for every failure mode this layer has.

use crate::devices::DeviceSlotResolver;
use crate::input::{
    compose_canonical, ordered_modifiers, split_prefix, DetectedInput, InputType, Modifier,
    RawInputEvent,
};
use chrono::Local;
use tracing::debug;

/// Normalizes one raw event into a canonical [`DetectedInput`].
///
/// The resolver is consulted for device events only; keyboard events use the
/// fixed `kb1` prefix and mouse events the fixed `mouse1` prefix.
pub fn normalize(event: &RawInputEvent, resolver: &DeviceSlotResolver) -> Option<DetectedInput> {
    match event {
        RawInputEvent::Keyboard {
            code,
            key,
            held_modifiers,
        } => normalize_keyboard(code, key, held_modifiers),
        RawInputEvent::Mouse { button_index } => normalize_mouse(*button_index),
        RawInputEvent::Device {
            device_uuid,
            raw_string,
            held_modifiers,
            axis_value,
            hid_axis_name,
        } => normalize_device(
            device_uuid,
            raw_string,
            held_modifiers,
            *axis_value,
            hid_axis_name.as_deref(),
            resolver,
        ),
    }
}

fn normalize_keyboard(code: &str, key: &str, held: &[Modifier]) -> Option<DetectedInput> {
    // A modifier pressed as the input itself becomes the base token, not a
    // prefix; binding "Left Alt alone" must differ from "Alt+X".
    if let Some(own) = Modifier::from_key_code(code) {
        let others: Vec<Modifier> = held.iter().copied().filter(|m| *m != own).collect();
        let mods = ordered_modifiers(&others);
        let canonical = compose_canonical("kb1", &mods, own.token());
        return Some(DetectedInput {
            canonical,
            input_type: InputType::Keyboard,
            display_name: display_with_modifiers("Keyboard", &mods, &pretty_token(own.token())),
            device_uuid: None,
            modifiers: mods,
            axis_value: None,
            is_modifier: true,
            hid_axis_name: None,
            detected_at: Local::now(),
        });
    }

    let base = key_token(code, key)?;
    let mods = ordered_modifiers(held);
    let canonical = compose_canonical("kb1", &mods, &base);
    Some(DetectedInput {
        canonical,
        input_type: InputType::Keyboard,
        display_name: display_with_modifiers("Keyboard", &mods, &pretty_token(&base)),
        device_uuid: None,
        modifiers: mods,
        axis_value: None,
        is_modifier: false,
        hid_axis_name: None,
        detected_at: Local::now(),
    })
}

fn normalize_mouse(button_index: u8) -> Option<DetectedInput> {
    // Platform indices are 0-based, canonical tokens 1-based.
    let number = u16::from(button_index) + 1;
    let base = format!("mouse{}", number);
    Some(DetectedInput {
        canonical: compose_canonical("mouse1", &[], &base),
        input_type: InputType::Mouse,
        display_name: format!("Mouse - Button {}", number),
        device_uuid: None,
        modifiers: Vec::new(),
        axis_value: None,
        is_modifier: false,
        hid_axis_name: None,
        detected_at: Local::now(),
    })
}

fn normalize_device(
    uuid: &str,
    raw_string: &str,
    held: &[Modifier],
    axis_value: Option<f32>,
    hid_axis_name: Option<&str>,
    resolver: &DeviceSlotResolver,
) -> Option<DetectedInput> {
    let raw = raw_string.trim().to_ascii_lowercase();
    let Some((backend_prefix, rest)) = split_prefix(&raw) else {
        debug!("dropping device event without a device prefix: {:?}", raw_string);
        return None;
    };

    let prefix = resolver.resolve(uuid, backend_prefix);
    let base = device_base_token(rest, axis_value, hid_axis_name)?;
    let mods = ordered_modifiers(held);
    let canonical = compose_canonical(&prefix, &mods, &base);
    let input_type = InputType::from_canonical(&canonical);

    Some(DetectedInput {
        display_name: display_with_modifiers(
            &device_label(&prefix, input_type),
            &mods,
            &pretty_token(&base),
        ),
        canonical,
        input_type,
        device_uuid: Some(uuid.to_string()),
        modifiers: mods,
        axis_value,
        is_modifier: false,
        hid_axis_name: hid_axis_name.map(|s| s.to_string()),
        detected_at: Local::now(),
    })
}

/// Derives the canonical base token for a device event.
///
/// A HID-reported hat switch is re-encoded as `hat<N>_<direction>` even when
/// the backend delivered it on a generic axis channel; named HID axes map to
/// their canonical axis names (`Rz` -> `rotz`).
fn device_base_token(
    rest: &str,
    axis_value: Option<f32>,
    hid_axis_name: Option<&str>,
) -> Option<String> {
    if rest.is_empty() {
        return None;
    }

    if let Some(name) = hid_axis_name {
        let lower = name.to_ascii_lowercase();
        if lower.contains("hat") {
            if rest.starts_with("hat") && rest.contains('_') {
                return Some(rest.to_string());
            }
            let direction = hat_direction(axis_value?)?;
            return Some(format!("hat1_{}", direction));
        }
        if let Some(axis) = named_axis(&lower) {
            let direction = direction_suffix(rest, axis_value)?;
            return Some(format!("{}_{}", axis, direction));
        }
        debug!("unrecognized HID axis name {:?}, keeping raw token", name);
    }

    if !rest
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || c == '_')
    {
        debug!("dropping malformed device token: {:?}", rest);
        return None;
    }

    // Bare `axisN` tokens still need a direction if the event carries one.
    if rest.starts_with("axis") && !rest.contains('_') {
        if let Some(value) = axis_value {
            if let Some(direction) = signed_direction(value) {
                return Some(format!("{}_{}", rest, direction));
            }
            return None;
        }
    }

    Some(rest.to_string())
}

fn named_axis(lower: &str) -> Option<&'static str> {
    match lower {
        "x" => Some("x"),
        "y" => Some("y"),
        "z" => Some("z"),
        "rx" => Some("rotx"),
        "ry" => Some("roty"),
        "rz" => Some("rotz"),
        "slider" | "dial" => Some("slider1"),
        _ => None,
    }
}

fn direction_suffix(rest: &str, axis_value: Option<f32>) -> Option<&'static str> {
    if rest.ends_with("_positive") {
        return Some("positive");
    }
    if rest.ends_with("_negative") {
        return Some("negative");
    }
    signed_direction(axis_value?)
}

fn signed_direction(value: f32) -> Option<&'static str> {
    if value > 0.0 {
        Some("positive")
    } else if value < 0.0 {
        Some("negative")
    } else {
        None
    }
}

/// Quantizes a normalized hat axis value (-1.0..=1.0) into the 8-way table
/// the backend reports: positions pair up as up,up,right,right,down,down,
/// left,left; a centered hat yields nothing.
fn hat_direction(value: f32) -> Option<&'static str> {
    if !(-1.0..=1.0).contains(&value) {
        return None;
    }
    let slot = (((value + 1.0) / 2.0) * 7.0).round() as i32;
    match slot {
        0 | 1 => Some("up"),
        2 | 3 => Some("right"),
        4 | 5 => Some("down"),
        6 | 7 => Some("left"),
        _ => None,
    }
}

/// Maps a platform key code (falling back to the key text) to its canonical
/// token. Unknown keys are malformed input and yield `None`.
fn key_token(code: &str, key: &str) -> Option<String> {
    if let Some(letter) = code.strip_prefix("Key") {
        if letter.len() == 1 && letter.chars().all(|c| c.is_ascii_alphabetic()) {
            return Some(letter.to_ascii_lowercase());
        }
    }
    if let Some(digit) = code.strip_prefix("Digit") {
        if digit.len() == 1 && digit.chars().all(|c| c.is_ascii_digit()) {
            return Some(digit.to_string());
        }
    }
    if let Some(n) = code.strip_prefix("Numpad") {
        let token = match n {
            "0" | "1" | "2" | "3" | "4" | "5" | "6" | "7" | "8" | "9" => {
                return Some(format!("np_{}", n))
            }
            "Add" => "np_add",
            "Subtract" => "np_subtract",
            "Multiply" => "np_multiply",
            "Divide" => "np_divide",
            "Decimal" => "np_period",
            "Enter" => "np_enter",
            _ => return None,
        };
        return Some(token.to_string());
    }
    if let Some(f) = code.strip_prefix('F') {
        if let Ok(n) = f.parse::<u8>() {
            if (1..=24).contains(&n) {
                return Some(format!("f{}", n));
            }
        }
    }

    let named = match code {
        "Space" => "space",
        "Enter" => "enter",
        "Escape" => "escape",
        "Tab" => "tab",
        "Backspace" => "backspace",
        "CapsLock" => "capslock",
        "Insert" => "insert",
        "Delete" => "delete",
        "Home" => "home",
        "End" => "end",
        "PageUp" => "pgup",
        "PageDown" => "pgdown",
        "ArrowUp" => "up",
        "ArrowDown" => "down",
        "ArrowLeft" => "left",
        "ArrowRight" => "right",
        "Minus" => "minus",
        "Equal" => "equals",
        "BracketLeft" => "lbracket",
        "BracketRight" => "rbracket",
        "Semicolon" => "semicolon",
        "Quote" => "apostrophe",
        "Backquote" => "grave",
        "Backslash" => "backslash",
        "Comma" => "comma",
        "Period" => "period",
        "Slash" => "slash",
        "PrintScreen" => "print",
        "ScrollLock" => "scrolllock",
        "Pause" => "pause",
        _ => "",
    };
    if !named.is_empty() {
        return Some(named.to_string());
    }

    // Last resort: a single printable character from the key text.
    let mut chars = key.chars();
    match (chars.next(), chars.next()) {
        (Some(c), None) if c.is_ascii_alphanumeric() => Some(c.to_ascii_lowercase().to_string()),
        _ => {
            debug!("dropping unmapped key event: code={:?} key={:?}", code, key);
            None
        }
    }
}

fn device_label(prefix: &str, input_type: InputType) -> String {
    let slot: String = prefix.chars().filter(|c| c.is_ascii_digit()).collect();
    format!("{} {}", input_type, slot)
}

fn display_with_modifiers(device: &str, mods: &[Modifier], base: &str) -> String {
    if mods.is_empty() {
        format!("{} - {}", device, base)
    } else {
        let chord: Vec<String> = mods
            .iter()
            .map(|m| m.token().to_ascii_uppercase())
            .collect();
        format!("{} - {} + {}", device, chord.join(" + "), base)
    }
}

/// Human label for a base token: `button3` -> `Button 3`, `hat1_up` ->
/// `Hat 1 UP`, `axis2_positive` -> `Axis 2 +`, `rotz_negative` -> `ROTZ -`.
fn pretty_token(base: &str) -> String {
    let mut parts = Vec::new();
    for segment in base.split('_') {
        match segment {
            "positive" => parts.push("+".to_string()),
            "negative" => parts.push("-".to_string()),
            "up" | "down" | "left" | "right" => parts.push(segment.to_ascii_uppercase()),
            _ => {
                let digits_at = segment.find(|c: char| c.is_ascii_digit());
                match digits_at {
                    Some(at) if at > 0 => {
                        let (word, num) = segment.split_at(at);
                        let mut w = word.to_string();
                        if let Some(first) = w.get_mut(0..1) {
                            first.make_ascii_uppercase();
                        }
                        parts.push(format!("{} {}", w, num));
                    }
                    _ => parts.push(segment.to_ascii_uppercase()),
                }
            }
        }
    }
    parts.join(" ")
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn resolver() -> DeviceSlotResolver {
        DeviceSlotResolver::new(HashMap::new(), HashMap::new())
    }

    fn device_event(raw: &str) -> RawInputEvent {
        RawInputEvent::Device {
            device_uuid: "044f:0402".to_string(),
            raw_string: raw.to_string(),
            held_modifiers: Vec::new(),
            axis_value: None,
            hid_axis_name: None,
        }
    }

    #[test]
    fn normalization_is_idempotent() {
        let event = RawInputEvent::Keyboard {
            code: "KeyX".to_string(),
            key: "x".to_string(),
            held_modifiers: vec![Modifier::LAlt],
        };
        let first = normalize(&event, &resolver()).unwrap();
        let second = normalize(&event, &resolver()).unwrap();
        assert_eq!(first.canonical, second.canonical);
        assert_eq!(first.canonical, "kb1_lalt+x");
    }

    #[test]
    fn held_modifiers_normalize_in_precedence_order() {
        let event = RawInputEvent::Keyboard {
            code: "KeyX".to_string(),
            key: "x".to_string(),
            held_modifiers: vec![Modifier::RCtrl, Modifier::LAlt],
        };
        let detected = normalize(&event, &resolver()).unwrap();
        assert_eq!(detected.canonical, "kb1_lalt+rctrl+x");
    }

    #[test]
    fn modifier_alone_becomes_base_token() {
        let event = RawInputEvent::Keyboard {
            code: "AltLeft".to_string(),
            key: "Alt".to_string(),
            held_modifiers: vec![Modifier::LAlt],
        };
        let detected = normalize(&event, &resolver()).unwrap();
        assert_eq!(detected.canonical, "kb1_lalt");
        assert!(detected.is_modifier);
        assert_eq!(detected.base_modifier(), Some(Modifier::LAlt));
    }

    #[test]
    fn modifier_with_other_modifier_held_keeps_base_position() {
        let event = RawInputEvent::Keyboard {
            code: "AltLeft".to_string(),
            key: "Alt".to_string(),
            held_modifiers: vec![Modifier::LCtrl, Modifier::LAlt],
        };
        let detected = normalize(&event, &resolver()).unwrap();
        assert_eq!(detected.canonical, "kb1_lctrl+lalt");
        assert!(detected.is_modifier);
    }

    #[test]
    fn mouse_buttons_are_one_based() {
        let detected = normalize(&RawInputEvent::Mouse { button_index: 1 }, &resolver()).unwrap();
        assert_eq!(detected.canonical, "mouse1_mouse2");
        assert_eq!(detected.input_type, InputType::Mouse);
    }

    #[test]
    fn device_button_passes_through() {
        let detected = normalize(&device_event("js1_button3"), &resolver()).unwrap();
        assert_eq!(detected.canonical, "js1_button3");
        assert_eq!(detected.input_type, InputType::Joystick);
        assert_eq!(detected.display_name, "Joystick 1 - Button 3");
    }

    #[test]
    fn named_hid_axis_maps_to_rot_names() {
        let event = RawInputEvent::Device {
            device_uuid: "044f:0402".to_string(),
            raw_string: "js1_axis6".to_string(),
            held_modifiers: Vec::new(),
            axis_value: Some(0.8),
            hid_axis_name: Some("Rz".to_string()),
        };
        let detected = normalize(&event, &resolver()).unwrap();
        assert_eq!(detected.canonical, "js1_rotz_positive");
    }

    #[test]
    fn hat_on_generic_axis_channel_is_reencoded() {
        let event = RawInputEvent::Device {
            device_uuid: "044f:0402".to_string(),
            raw_string: "js1_axis8".to_string(),
            held_modifiers: Vec::new(),
            axis_value: Some(-1.0),
            hid_axis_name: Some("Hat switch".to_string()),
        };
        let detected = normalize(&event, &resolver()).unwrap();
        assert_eq!(detected.canonical, "js1_hat1_up");
    }

    #[test]
    fn already_encoded_hat_is_kept() {
        let event = RawInputEvent::Device {
            device_uuid: "044f:0402".to_string(),
            raw_string: "js1_hat1_left".to_string(),
            held_modifiers: Vec::new(),
            axis_value: None,
            hid_axis_name: Some("Hat switch".to_string()),
        };
        let detected = normalize(&event, &resolver()).unwrap();
        assert_eq!(detected.canonical, "js1_hat1_left");
    }

    #[test]
    fn centered_hat_yields_nothing() {
        let event = RawInputEvent::Device {
            device_uuid: "044f:0402".to_string(),
            raw_string: "js1_axis8".to_string(),
            held_modifiers: Vec::new(),
            axis_value: None,
            hid_axis_name: Some("Hat switch".to_string()),
        };
        assert!(normalize(&event, &resolver()).is_none());
    }

    #[test]
    fn malformed_events_yield_none_not_errors() {
        assert!(normalize(&device_event("button3"), &resolver()).is_none());
        assert!(normalize(&device_event("js1_"), &resolver()).is_none());
        let unknown_key = RawInputEvent::Keyboard {
            code: "MediaTrackNext".to_string(),
            key: "MediaTrackNext".to_string(),
            held_modifiers: Vec::new(),
        };
        assert!(normalize(&unknown_key, &resolver()).is_none());
    }

    #[test]
    fn overridden_device_prefix_replaces_the_backend_prefix() {
        let mut auto = HashMap::new();
        auto.insert("u1".to_string(), "js2".to_string());
        let mut overrides = HashMap::new();
        overrides.insert("u1".to_string(), "js1".to_string());
        let resolver = DeviceSlotResolver::new(auto, overrides);

        let event = RawInputEvent::Device {
            device_uuid: "u1".to_string(),
            raw_string: "js2_button3".to_string(),
            held_modifiers: Vec::new(),
            axis_value: None,
            hid_axis_name: None,
        };
        let detected = normalize(&event, &resolver).unwrap();
        assert_eq!(detected.canonical, "js1_button3");
    }

    #[test]
    fn device_modifiers_prefix_the_base() {
        let event = RawInputEvent::Device {
            device_uuid: "044f:0402".to_string(),
            raw_string: "js1_button5".to_string(),
            held_modifiers: vec![Modifier::RShift, Modifier::LAlt],
            axis_value: None,
            hid_axis_name: None,
        };
        let detected = normalize(&event, &resolver()).unwrap();
        assert_eq!(detected.canonical, "js1_lalt+rshift+button5");
    }
}
