//! Profile portal - snapshot-swapping implementation of [`ProfileStore`].
//!
//! Readers (the matcher, conflict detection) take a cheap `Arc` clone of the
//! current snapshot and never hold a lock during their scan; writers rebuild
//! the action-map vector and swap the `Arc`. This is what lets the matcher
//! run concurrently with an active capture session without locking.

use crate::input::InputType;
use crate::profile::{ActionMap, Binding, ProfileError, ProfileFile, ProfileStore};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Arc, RwLock};
use tracing::{debug, info};

pub struct ProfilePortal {
    profile: RwLock<Arc<Vec<ActionMap>>>,
    /// Pristine copy of the loaded profile's defaults, kept for reset.
    defaults: Vec<ActionMap>,
    /// Optional backing file; writes persist here before the swap.
    path: Option<PathBuf>,
}

impl ProfilePortal {
    pub fn new(profile: Vec<ActionMap>) -> Self {
        Self {
            defaults: profile.clone(),
            profile: RwLock::new(Arc::new(profile)),
            path: None,
        }
    }

    /// Loads the portal from its native TOML serialization. A missing file
    /// degrades to the built-in default profile; a corrupt one is an error
    /// the caller decides about.
    pub fn load_from(path: &Path) -> Result<Self, ProfileError> {
        let profile = match fs::read_to_string(path) {
            Ok(raw) => {
                let file: ProfileFile =
                    toml::from_str(&raw).map_err(|e| ProfileError::Serialization(e.to_string()))?;
                info!("loaded profile with {} action maps from {:?}", file.action_maps.len(), path);
                file.action_maps
            }
            Err(e) => {
                debug!("no profile at {:?} ({}), using defaults", path, e);
                crate::profile::default_profile()
            }
        };
        let mut portal = Self::new(profile);
        portal.path = Some(path.to_path_buf());
        Ok(portal)
    }

    /// Current immutable snapshot. Cheap; safe to hold across a scan.
    pub fn snapshot(&self) -> Arc<Vec<ActionMap>> {
        match self.profile.read() {
            Ok(guard) => Arc::clone(&guard),
            Err(poisoned) => Arc::clone(&poisoned.into_inner()),
        }
    }

    /// Replaces the whole snapshot (external profile reload).
    pub fn replace(&self, profile: Vec<ActionMap>) {
        let next = Arc::new(profile);
        match self.profile.write() {
            Ok(mut guard) => *guard = next,
            Err(poisoned) => *poisoned.into_inner() = next,
        }
    }

    /// Rebuilds the profile through `edit`, persists if a backing file is
    /// configured, then swaps the snapshot. A persistence failure leaves the
    /// previous snapshot in place.
    fn commit<F>(&self, edit: F) -> Result<(), ProfileError>
    where
        F: FnOnce(&mut Vec<ActionMap>) -> Result<(), ProfileError>,
    {
        let mut next = (*self.snapshot()).clone();
        edit(&mut next)?;

        if let Some(path) = &self.path {
            let file = ProfileFile {
                action_maps: next.clone(),
            };
            let raw = toml::to_string_pretty(&file)
                .map_err(|e| ProfileError::Serialization(e.to_string()))?;
            if let Some(parent) = path.parent() {
                fs::create_dir_all(parent).map_err(|e| ProfileError::Io(e.to_string()))?;
            }
            fs::write(path, raw).map_err(|e| ProfileError::Io(e.to_string()))?;
        }

        self.replace(next);
        Ok(())
    }

    fn find_action<'a>(
        profile: &'a mut [ActionMap],
        action_map: &str,
        action: &str,
    ) -> Result<&'a mut crate::profile::Action, ProfileError> {
        let map = profile
            .iter_mut()
            .find(|m| m.name == action_map)
            .ok_or_else(|| ProfileError::MapNotFound(action_map.to_string()))?;
        map.actions
            .iter_mut()
            .find(|a| a.name == action)
            .ok_or_else(|| ProfileError::ActionNotFound(action.to_string()))
    }
}

impl ProfileStore for ProfilePortal {
    fn load_profile(&self) -> Result<Vec<ActionMap>, ProfileError> {
        Ok((*self.snapshot()).clone())
    }

    fn update_binding(
        &self,
        action_map: &str,
        action: &str,
        input: &str,
        multi_tap: Option<u32>,
        activation_mode: Option<&str>,
    ) -> Result<(), ProfileError> {
        let input_type = InputType::from_canonical(input);
        self.commit(|profile| {
            let target = Self::find_action(profile, action_map, action)?;
            // Canonical strings are unique binding keys within one action;
            // one custom binding per device class.
            target
                .bindings
                .retain(|b| b.is_default || (b.input_type != input_type && b.input != input));
            target.bindings.push(Binding {
                input: input.to_string(),
                input_type,
                display_name: input.to_string(),
                is_default: false,
                multi_tap,
                activation_mode: activation_mode.map(|s| s.to_string()),
            });
            info!("updated binding {}/{} -> {}", action_map, action, input);
            Ok(())
        })
    }

    fn clear_binding(
        &self,
        action_map: &str,
        action: &str,
        input_type: InputType,
    ) -> Result<(), ProfileError> {
        // The cleared form is an explicit "bound to nothing", distinct from
        // "no binding present".
        let cleared = format!("{}1_ ", input_type.prefix_stem());
        self.commit(|profile| {
            let target = Self::find_action(profile, action_map, action)?;
            target
                .bindings
                .retain(|b| b.is_default || b.input_type != input_type);
            target.bindings.push(Binding {
                input: cleared.clone(),
                input_type,
                display_name: String::new(),
                is_default: false,
                multi_tap: None,
                activation_mode: None,
            });
            info!("cleared {} binding on {}/{}", input_type, action_map, action);
            Ok(())
        })
    }

    fn reset_binding(&self, action_map: &str, action: &str) -> Result<(), ProfileError> {
        let pristine = self
            .defaults
            .iter()
            .find(|m| m.name == action_map)
            .and_then(|m| m.action(action))
            .map(|a| a.bindings.clone());
        self.commit(|profile| {
            let target = Self::find_action(profile, action_map, action)?;
            match pristine {
                Some(bindings) => target.bindings = bindings,
                None => target.bindings.retain(|b| b.is_default),
            }
            info!("reset bindings on {}/{}", action_map, action);
            Ok(())
        })
    }
}
