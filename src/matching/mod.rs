//! Binding matcher - which actions are bound to a given physical control.
//!
//! Pure functions over an immutable profile snapshot; reentrant, no locking.
//! A full linear scan per query is fine here: queries are human-paced and
//! the data set is small.

use crate::input::{is_cleared, is_device_prefix, split_prefix, Modifier};
use crate::profile::ActionMap;
use tracing::debug;

/// Identifier extracted from a UI control (button, axis, hat direction, key).
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ControlIdentifier {
    ByNumber(u32),
    ByString(String),
}

/// The raw fields a UI control carries, before identifier extraction.
#[derive(Clone, Debug, Default)]
pub struct ControlQuery {
    /// Explicit numeric id on the control (a button number).
    pub numeric_id: Option<u32>,
    /// Explicit input descriptor (normalized axis name or numeric `axisN`).
    pub input_descriptor: Option<String>,
    /// Display label, used only as a last-resort heuristic.
    pub display_name: Option<String>,
}

/// Extraction priority: explicit numeric id, then input descriptor, then a
/// display-name parse that only fires if the name literally contains
/// "button" (an axis labeled "Axis 2" must not resolve as "Button 2").
pub fn extract_identifier(query: &ControlQuery) -> Option<ControlIdentifier> {
    if let Some(n) = query.numeric_id {
        return Some(ControlIdentifier::ByNumber(n));
    }
    if let Some(descriptor) = &query.input_descriptor {
        let descriptor = descriptor.trim().to_ascii_lowercase();
        if !descriptor.is_empty() {
            return Some(ControlIdentifier::ByString(descriptor));
        }
    }
    if let Some(name) = &query.display_name {
        let lower = name.to_ascii_lowercase();
        if lower.contains("button") {
            if let Some(n) = first_number(&lower) {
                return Some(ControlIdentifier::ByNumber(n));
            }
        }
    }
    None
}

fn first_number(s: &str) -> Option<u32> {
    let digits: String = s
        .chars()
        .skip_while(|c| !c.is_ascii_digit())
        .take_while(|c| c.is_ascii_digit())
        .collect();
    digits.parse().ok()
}

/// A binding input with its modifier segments stripped off.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct StrippedBinding {
    pub prefix: Option<String>,
    pub base: String,
    pub modifiers: Vec<Modifier>,
}

/// Lower-cases and decomposes a binding input, stripping a modifier prefix
/// in either supported form (`<device>_<mod>+<rest>` or legacy
/// `<mod>+<device>_<rest>` - whichever side does not match a device-prefix
/// pattern is the modifier). Empty and placeholder (cleared-form) inputs
/// yield `None`.
pub fn strip_modifiers(input: &str) -> Option<StrippedBinding> {
    let lower = input.trim().to_ascii_lowercase();
    if lower.is_empty() || is_cleared(&input.to_ascii_lowercase()) {
        return None;
    }

    let mut prefix: Option<String> = None;
    let mut tokens: Vec<&str> = Vec::new();

    for part in lower.split('+') {
        let token = match split_prefix(part) {
            Some((part_prefix, rest)) => {
                if prefix.is_none() {
                    prefix = Some(part_prefix.to_string());
                }
                rest
            }
            None => part,
        };
        if token.is_empty() {
            return None;
        }
        tokens.push(token);
    }

    // Exactly one token is the base: the non-modifier one, or - for a
    // "modifier alone" binding like `kb1_lalt` - the final token.
    let mut modifiers = Vec::new();
    let mut base: Option<String> = None;
    let last = tokens.len() - 1;
    for (idx, token) in tokens.iter().enumerate() {
        let as_modifier = Modifier::from_token(token);
        let is_base = idx == last || as_modifier.is_none();
        if is_base {
            if base.is_some() {
                debug!("discarding ambiguous binding input: {:?}", input);
                return None;
            }
            base = Some((*token).to_string());
        } else if let Some(m) = as_modifier {
            modifiers.push(m);
        }
    }

    let base = base?;
    modifiers.sort();
    modifiers.dedup();
    Some(StrippedBinding {
        prefix,
        base,
        modifiers,
    })
}

/// Query-time filters applied after matching and sorting.
#[derive(Clone, Debug, Default)]
pub struct MatchFilters {
    pub hide_defaults: bool,
    /// Keep only entries whose modifier set contains this modifier; `None`
    /// means "all".
    pub modifier_filter: Option<Modifier>,
}

/// One match the UI can render.
#[derive(Clone, Debug)]
pub struct BindingMatch {
    pub action_label: String,
    pub action_map_label: String,
    pub is_default: bool,
    pub display_name: String,
    pub modifiers: Vec<Modifier>,
    pub multi_tap: Option<u32>,
    pub activation_mode: Option<String>,
    /// Internal action-map name the match came from.
    pub provenance: String,
}

/// Searches the whole profile for bindings matching `identifier` on the
/// device `device_prefix` (the slot of the control being inspected, e.g.
/// `js2`). Output is stable-sorted with custom bindings before defaults,
/// then filtered.
pub fn find_bindings(
    profile: &[ActionMap],
    device_prefix: &str,
    identifier: &ControlIdentifier,
    filters: &MatchFilters,
) -> Vec<BindingMatch> {
    let device_prefix = device_prefix.to_ascii_lowercase();
    let mut matches = Vec::new();

    for map in profile {
        for action in &map.actions {
            for binding in &action.bindings {
                let Some(stripped) = strip_modifiers(&binding.input) else {
                    continue;
                };
                if !binding_matches(&stripped, binding.is_default, &device_prefix, identifier) {
                    continue;
                }
                matches.push(BindingMatch {
                    action_label: action.ui_label.clone(),
                    action_map_label: map.ui_label.clone(),
                    is_default: binding.is_default,
                    display_name: binding.display_name.clone(),
                    modifiers: stripped.modifiers.clone(),
                    multi_tap: binding.multi_tap,
                    activation_mode: binding.activation_mode.clone(),
                    provenance: map.name.clone(),
                });
            }
        }
    }

    // Stable: customs first, defaults after, relative order preserved.
    matches.sort_by_key(|m| m.is_default);

    if filters.hide_defaults {
        matches.retain(|m| !m.is_default);
    }
    if let Some(wanted) = filters.modifier_filter {
        matches.retain(|m| m.modifiers.contains(&wanted));
    }
    matches
}

fn binding_matches(
    stripped: &StrippedBinding,
    is_default: bool,
    device_prefix: &str,
    identifier: &ControlIdentifier,
) -> bool {
    let same_slot = stripped
        .prefix
        .as_deref()
        .map(|p| p == device_prefix)
        .unwrap_or(false);

    match identifier {
        ControlIdentifier::ByString(s) => {
            if same_slot && string_matches(&stripped.base, s) {
                return true;
            }
            // Defaults are hard-coded to slot 1 but apply to all instances
            // of the class; axis names only, never button numbers.
            if is_default && !same_slot {
                if let Some(prefix) = stripped.prefix.as_deref() {
                    if is_slot_one(prefix)
                        && same_class(prefix, device_prefix)
                        && is_axis_base(&stripped.base)
                        && string_matches(&stripped.base, s)
                    {
                        return true;
                    }
                }
            }
            false
        }
        ControlIdentifier::ByNumber(n) => {
            if !same_slot {
                return false;
            }
            if stripped.base.contains("axis") || stripped.base.contains("hat") {
                return false;
            }
            contains_bounded_token(&stripped.base, &format!("button{}", n))
        }
    }
}

/// Equality, or equality up to a trailing `_`-suffix (hat sub-directions
/// share one id).
fn string_matches(base: &str, id: &str) -> bool {
    base == id || (base.len() > id.len() && base.starts_with(id) && base.as_bytes()[id.len()] == b'_')
}

fn is_slot_one(prefix: &str) -> bool {
    let digits: String = prefix
        .chars()
        .skip_while(|c| !c.is_ascii_digit())
        .collect();
    is_device_prefix(prefix) && digits == "1"
}

fn same_class(a: &str, b: &str) -> bool {
    let stem = |p: &str| -> String { p.chars().take_while(|c| !c.is_ascii_digit()).collect() };
    stem(a) == stem(b)
}

fn is_axis_base(base: &str) -> bool {
    !base.starts_with("button") && !base.starts_with("hat") && !base.starts_with("mouse")
}

/// `token` present in `haystack`, bounded by `_` or string edges on both
/// sides - so `button1` never matches inside `button10`.
fn contains_bounded_token(haystack: &str, token: &str) -> bool {
    let bytes = haystack.as_bytes();
    let mut from = 0;
    while let Some(pos) = haystack[from..].find(token) {
        let at = from + pos;
        let end = at + token.len();
        let left_ok = at == 0 || bytes[at - 1] == b'_';
        let right_ok = end == haystack.len() || bytes[end] == b'_';
        if left_ok && right_ok {
            return true;
        }
        from = at + 1;
    }
    false
}

/// One existing binding colliding with a candidate canonical string.
#[derive(Clone, Debug)]
pub struct BindingConflict {
    pub action_map: String,
    pub action_map_label: String,
    pub action: String,
    pub action_label: String,
    pub display_name: String,
    pub is_default: bool,
}

/// Collects every binding outside the action being bound whose canonical
/// input equals `canonical`. Advisory only; equal canonical strings across
/// actions denote a conflict, not an error.
pub fn scan_conflicts(
    profile: &[ActionMap],
    action_map: &str,
    action: &str,
    canonical: &str,
) -> Vec<BindingConflict> {
    let mut conflicts = Vec::new();
    for map in profile {
        for candidate in &map.actions {
            if map.name == action_map && candidate.name == action {
                continue;
            }
            for binding in &candidate.bindings {
                if binding.input.eq_ignore_ascii_case(canonical) {
                    conflicts.push(BindingConflict {
                        action_map: map.name.clone(),
                        action_map_label: map.ui_label.clone(),
                        action: candidate.name.clone(),
                        action_label: candidate.ui_label.clone(),
                        display_name: binding.display_name.clone(),
                        is_default: binding.is_default,
                    });
                }
            }
        }
    }
    conflicts
}
