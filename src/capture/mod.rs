//! Interactive capture engine - "press an input to bind it".
//!
//! Built from two pieces:
//!
//! 1. [`session`] - the typestate machine for one bind attempt
//!    (`Armed -> Collecting -> Confirming -> [Selecting] -> Resolved ->
//!    Closed`, with cancel/timeout jumping straight to `Closed`).
//! 2. [`controller`] - the single worker task that owns the active session,
//!    all timers, and the shared source channel, driven through a command
//!    channel with oneshot replies.
//!
//! Exactly one session is active at a time; everything a late or foreign
//! event could corrupt is guarded by the session id stamped on every event.

pub mod controller;
pub mod session;

pub use controller::{CaptureChannels, CaptureController, CaptureHandle};
pub use session::ListenerGuard;

use crate::matching::BindingConflict;
use chrono::Local;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, warn};

/// Opaque id of one capture session. Fresh per bind attempt; monotonic per
/// process.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct SessionId(u64);

impl SessionId {
    pub(crate) fn fresh() -> Self {
        static COUNTER: AtomicU64 = AtomicU64::new(1);
        let count = COUNTER.fetch_add(1, Ordering::Relaxed);
        let micros = Local::now().timestamp_micros().max(0) as u64;
        SessionId((micros << 12) | (count & 0xfff))
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:x}", self.0)
    }
}

/// Timing configuration for capture sessions.
///
/// The worst-case session lifetime is bounded by
/// `initial_countdown + confirm_window + grace_delay`.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct CaptureSettings {
    /// Seconds the session waits for a first input before giving up.
    pub initial_countdown_secs: u64,
    /// Fixed secondary disambiguation window after the first candidate, in
    /// milliseconds.
    pub confirm_window_ms: u64,
    /// Delay before an empty session auto-closes after announcing
    /// "no input detected", in milliseconds.
    pub grace_delay_ms: u64,
}

impl Default for CaptureSettings {
    fn default() -> Self {
        Self {
            initial_countdown_secs: 10,
            confirm_window_ms: 1000,
            grace_delay_ms: 2000,
        }
    }
}

impl CaptureSettings {
    /// Loads settings from TOML, degrading to defaults on a missing file
    /// and logging and ignoring a corrupt one.
    pub fn load(path: &Path) -> Self {
        let raw = match std::fs::read_to_string(path) {
            Ok(raw) => raw,
            Err(e) => {
                debug!("no capture settings at {:?}: {}", path, e);
                return Self::default();
            }
        };
        match toml::from_str(&raw) {
            Ok(settings) => settings,
            Err(e) => {
                warn!("ignoring corrupt capture settings {:?}: {}", path, e);
                Self::default()
            }
        }
    }

    pub fn initial_countdown(&self) -> Duration {
        Duration::from_secs(self.initial_countdown_secs)
    }

    pub fn confirm_window(&self) -> Duration {
        Duration::from_millis(self.confirm_window_ms)
    }

    pub fn grace_delay(&self) -> Duration {
        Duration::from_millis(self.grace_delay_ms)
    }
}

/// One collected input, as the UI sees it while choosing.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Candidate {
    pub canonical: String,
    pub display_name: String,
    pub is_selected: bool,
}

/// User-visible progress events for the host UI.
#[derive(Clone, Debug)]
pub enum CaptureStatus {
    Listening {
        session_id: SessionId,
    },
    CandidateAdded {
        session_id: SessionId,
        candidate: Candidate,
    },
    AwaitingSelection {
        session_id: SessionId,
        candidates: Vec<Candidate>,
    },
    Resolved {
        session_id: SessionId,
        canonical: String,
        conflicts: Vec<BindingConflict>,
    },
    NoInputDetected {
        session_id: SessionId,
    },
    Saved {
        session_id: SessionId,
        canonical: String,
    },
    SaveFailed {
        session_id: SessionId,
        reason: String,
    },
    Closed {
        session_id: SessionId,
    },
}

/// Errors surfaced through the capture API. Nothing here is fatal to the
/// host; every failure degrades to "no binding changed".
#[derive(Debug, Error)]
pub enum CaptureError {
    #[error("a capture session is already active")]
    SessionActive,

    #[error("no active capture session matches id {0}")]
    StaleSession(SessionId),

    #[error("candidate not in this session: {0}")]
    UnknownCandidate(String),

    #[error("persistence failure: {0}")]
    Persistence(String),

    #[error("capture controller is not running: {0}")]
    ChannelClosed(String),
}
