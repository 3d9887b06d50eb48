//! Action/binding data model and the persistence-collaborator seam.
//!
//! The profile (action maps, actions, bindings) is owned by the external
//! persisted profile; this crate loads it wholesale, treats it as immutable,
//! and replaces the whole snapshot on every update/clear/reset. The
//! original's XML profile format stays outside the core; [`ProfileStore`] is
//! the seam it plugs into.

pub mod portal;

pub use portal::ProfilePortal;

use crate::input::InputType;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// One concrete input mapped to an action, default or custom.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Binding {
    /// Canonical input string, e.g. `js1_lalt+button3`.
    pub input: String,
    pub input_type: InputType,
    pub display_name: String,
    pub is_default: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub multi_tap: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub activation_mode: Option<String>,
}

/// One bindable game command, holding 0..N bindings.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Action {
    pub name: String,
    pub ui_label: String,
    #[serde(default)]
    pub on_hold: bool,
    #[serde(default)]
    pub bindings: Vec<Binding>,
}

/// Named group of related actions.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ActionMap {
    pub name: String,
    pub ui_label: String,
    #[serde(default)]
    pub actions: Vec<Action>,
}

impl ActionMap {
    pub fn action(&self, name: &str) -> Option<&Action> {
        self.actions.iter().find(|a| a.name == name)
    }
}

/// Errors from profile operations. Nothing here is fatal; a failed write
/// leaves the previous snapshot in place.
#[derive(Debug, Error)]
pub enum ProfileError {
    #[error("action map not found: {0}")]
    MapNotFound(String),

    #[error("action not found: {0}")]
    ActionNotFound(String),

    #[error("profile I/O error: {0}")]
    Io(String),

    #[error("profile serialization error: {0}")]
    Serialization(String),

    #[error("profile lock poisoned: {0}")]
    Lock(String),
}

/// The persistence collaborator, as the capture engine consumes it.
pub trait ProfileStore: Send + Sync + 'static {
    fn load_profile(&self) -> Result<Vec<ActionMap>, ProfileError>;

    fn update_binding(
        &self,
        action_map: &str,
        action: &str,
        input: &str,
        multi_tap: Option<u32>,
        activation_mode: Option<&str>,
    ) -> Result<(), ProfileError>;

    fn clear_binding(
        &self,
        action_map: &str,
        action: &str,
        input_type: InputType,
    ) -> Result<(), ProfileError>;

    fn reset_binding(&self, action_map: &str, action: &str) -> Result<(), ProfileError>;
}

/// Top-level container for the portal's native TOML serialization.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct ProfileFile {
    #[serde(default)]
    pub action_maps: Vec<ActionMap>,
}

fn default_binding(input: &str, display_name: &str) -> Binding {
    Binding {
        input: input.to_string(),
        input_type: InputType::from_canonical(input),
        display_name: display_name.to_string(),
        is_default: true,
        multi_tap: None,
        activation_mode: None,
    }
}

/// Built-in sample profile for the demo binary and tests.
pub fn default_profile() -> Vec<ActionMap> {
    vec![
        ActionMap {
            name: "spaceship_movement".to_string(),
            ui_label: "Flight - Movement".to_string(),
            actions: vec![
                Action {
                    name: "v_pitch".to_string(),
                    ui_label: "Pitch".to_string(),
                    on_hold: false,
                    bindings: vec![default_binding("js1_y", "Joystick Y")],
                },
                Action {
                    name: "v_yaw".to_string(),
                    ui_label: "Yaw".to_string(),
                    on_hold: false,
                    bindings: vec![default_binding("js1_x", "Joystick X")],
                },
                Action {
                    name: "v_roll".to_string(),
                    ui_label: "Roll".to_string(),
                    on_hold: false,
                    bindings: vec![default_binding("js1_rotz", "Joystick Twist")],
                },
                Action {
                    name: "v_afterburner".to_string(),
                    ui_label: "Afterburner".to_string(),
                    on_hold: true,
                    bindings: vec![default_binding("kb1_lshift", "Left Shift")],
                },
            ],
        },
        ActionMap {
            name: "spaceship_weapons".to_string(),
            ui_label: "Flight - Weapons".to_string(),
            actions: vec![
                Action {
                    name: "v_attack1_group1".to_string(),
                    ui_label: "Fire Weapon Group 1".to_string(),
                    on_hold: true,
                    bindings: vec![
                        default_binding("mouse1_mouse1", "Mouse Button 1"),
                        default_binding("js1_button1", "Joystick Trigger"),
                    ],
                },
                Action {
                    name: "v_weapon_cycle_missile_fwd".to_string(),
                    ui_label: "Cycle Missile Type".to_string(),
                    on_hold: false,
                    bindings: vec![default_binding("kb1_r", "R")],
                },
            ],
        },
    ]
}
