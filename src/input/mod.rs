//! Canonical input model shared by the normalizer, matcher, and capture engine.
//!
//! A canonical string has the shape `<devicePrefix>_<modifier+>*<baseToken>`,
//! e.g. `js1_lalt+button3` or `kb1_space`. Canonical-string equality is the
//! sole criterion the matcher and the conflict detector use, so every piece
//! of string assembly lives here.

pub mod normalizer;

use chrono::{DateTime, Local};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Keyboard modifier keys, declared in canonical precedence order.
///
/// The derive order matters: `Ord` on this enum *is* the fixed precedence
/// `lalt,ralt,lctrl,rctrl,lshift,rshift` that modifier segments must follow
/// in a canonical string, independent of press order.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Modifier {
    LAlt,
    RAlt,
    LCtrl,
    RCtrl,
    LShift,
    RShift,
}

impl Modifier {
    pub const ALL: [Modifier; 6] = [
        Modifier::LAlt,
        Modifier::RAlt,
        Modifier::LCtrl,
        Modifier::RCtrl,
        Modifier::LShift,
        Modifier::RShift,
    ];

    /// Canonical lower-case token used inside canonical strings.
    pub fn token(&self) -> &'static str {
        match self {
            Modifier::LAlt => "lalt",
            Modifier::RAlt => "ralt",
            Modifier::LCtrl => "lctrl",
            Modifier::RCtrl => "rctrl",
            Modifier::LShift => "lshift",
            Modifier::RShift => "rshift",
        }
    }

    /// Parses a modifier token in either the canonical lower-case form or
    /// the backend's upper-case form (`LALT`, `RCTRL`, ...).
    pub fn from_token(token: &str) -> Option<Self> {
        match token.to_ascii_lowercase().as_str() {
            "lalt" => Some(Modifier::LAlt),
            "ralt" => Some(Modifier::RAlt),
            "lctrl" => Some(Modifier::LCtrl),
            "rctrl" => Some(Modifier::RCtrl),
            "lshift" => Some(Modifier::LShift),
            "rshift" => Some(Modifier::RShift),
            _ => None,
        }
    }

    /// Parses a platform key code (`AltLeft`, `ControlRight`, ...).
    pub fn from_key_code(code: &str) -> Option<Self> {
        match code {
            "AltLeft" => Some(Modifier::LAlt),
            "AltRight" => Some(Modifier::RAlt),
            "ControlLeft" => Some(Modifier::LCtrl),
            "ControlRight" => Some(Modifier::RCtrl),
            "ShiftLeft" => Some(Modifier::LShift),
            "ShiftRight" => Some(Modifier::RShift),
            _ => None,
        }
    }
}

impl fmt::Display for Modifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.token())
    }
}

/// Sorts into canonical precedence order and removes duplicates.
pub fn ordered_modifiers(modifiers: &[Modifier]) -> Vec<Modifier> {
    let mut out = modifiers.to_vec();
    out.sort();
    out.dedup();
    out
}

/// Device class a binding belongs to, derived from its canonical prefix.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
pub enum InputType {
    Keyboard,
    Mouse,
    Joystick,
    Gamepad,
    #[default]
    Unknown,
}

impl InputType {
    /// Classifies a canonical string (or bare prefix) by its prefix stem.
    pub fn from_canonical(input: &str) -> Self {
        let prefix = match split_prefix(input) {
            Some((prefix, _)) => prefix,
            None => input,
        };
        match prefix_stem(prefix) {
            Some("kb") => InputType::Keyboard,
            Some("mouse") | Some("mo") => InputType::Mouse,
            Some("js") => InputType::Joystick,
            Some("gp") => InputType::Gamepad,
            _ => InputType::Unknown,
        }
    }

    /// Prefix stem for composing canonical strings of this class.
    pub fn prefix_stem(&self) -> &'static str {
        match self {
            InputType::Keyboard => "kb",
            InputType::Mouse => "mouse",
            InputType::Joystick => "js",
            InputType::Gamepad => "gp",
            InputType::Unknown => "",
        }
    }
}

impl fmt::Display for InputType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            InputType::Keyboard => write!(f, "Keyboard"),
            InputType::Mouse => write!(f, "Mouse"),
            InputType::Joystick => write!(f, "Joystick"),
            InputType::Gamepad => write!(f, "Gamepad"),
            InputType::Unknown => write!(f, "Unknown"),
        }
    }
}

/// Returns the stem of a device prefix (`js1` -> `js`), or None if the
/// string is not `<letters><digits>`.
fn prefix_stem(prefix: &str) -> Option<&str> {
    let digits = prefix.chars().rev().take_while(|c| c.is_ascii_digit()).count();
    if digits == 0 {
        return None;
    }
    let stem = &prefix[..prefix.len() - digits];
    match stem {
        "js" | "gp" | "kb" | "mouse" | "mo" => Some(stem),
        _ => None,
    }
}

/// True if the string looks like a device prefix: a known stem followed by a
/// slot number (`js1`, `gp2`, `kb1`, `mouse1`, legacy `mo1`).
pub fn is_device_prefix(s: &str) -> bool {
    prefix_stem(s).is_some()
}

/// Splits a canonical string into `(devicePrefix, remainder)` at the first
/// underscore, requiring the left side to be a valid device prefix.
pub fn split_prefix(canonical: &str) -> Option<(&str, &str)> {
    let (prefix, rest) = canonical.split_once('_')?;
    if is_device_prefix(prefix) {
        Some((prefix, rest))
    } else {
        None
    }
}

/// A "cleared" binding: `<prefix>_` followed by only whitespace. Distinct
/// from "no binding present".
pub fn is_cleared(input: &str) -> bool {
    match input.split_once('_') {
        Some((prefix, rest)) => {
            is_device_prefix(prefix) && !rest.is_empty() && rest.trim().is_empty()
        }
        None => false,
    }
}

/// Assembles a canonical string from its parts. Modifiers are emitted in
/// canonical precedence order regardless of the order supplied.
pub fn compose_canonical(prefix: &str, modifiers: &[Modifier], base: &str) -> String {
    let mods = ordered_modifiers(modifiers);
    let mut out = String::with_capacity(prefix.len() + base.len() + mods.len() * 7 + 1);
    out.push_str(prefix);
    out.push('_');
    for m in &mods {
        out.push_str(m.token());
        out.push('+');
    }
    out.push_str(base);
    out
}

/// One raw platform/device event, before normalization.
///
/// Keyboard and mouse events are forwarded by the host UI; device events
/// come from the backend stream and already carry the backend's own prefix
/// inside `raw_string` (e.g. `js2_button3`).
#[derive(Clone, Debug)]
pub enum RawInputEvent {
    Keyboard {
        code: String,
        key: String,
        held_modifiers: Vec<Modifier>,
    },
    Mouse {
        /// 0-based platform button index; canonical tokens are 1-based.
        button_index: u8,
    },
    Device {
        device_uuid: String,
        raw_string: String,
        held_modifiers: Vec<Modifier>,
        axis_value: Option<f32>,
        hid_axis_name: Option<String>,
    },
}

/// A normalized input, ready to be used as a capture candidate.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct DetectedInput {
    pub canonical: String,
    pub input_type: InputType,
    pub display_name: String,
    pub device_uuid: Option<String>,
    /// Held modifiers in canonical precedence order.
    pub modifiers: Vec<Modifier>,
    pub axis_value: Option<f32>,
    /// True if this input's base token is itself a modifier key.
    pub is_modifier: bool,
    pub hid_axis_name: Option<String>,
    pub detected_at: DateTime<Local>,
}

impl DetectedInput {
    /// Base token of the canonical string (the part after prefix and
    /// modifier segments), e.g. `button3` for `js1_lalt+button3`.
    pub fn base_token(&self) -> &str {
        let rest = split_prefix(&self.canonical)
            .map(|(_, rest)| rest)
            .unwrap_or(&self.canonical);
        rest.rsplit('+').next().unwrap_or(rest)
    }

    /// If this input is a modifier pressed on its own, the modifier.
    pub fn base_modifier(&self) -> Option<Modifier> {
        if self.is_modifier {
            Modifier::from_token(self.base_token())
        } else {
            None
        }
    }
}
