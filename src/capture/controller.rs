//! Capture controller - single owner of the active session.
//!
//! One worker task holds the session typestate, the shared source channel,
//! and every timer, and is driven through a command channel with oneshot
//! replies. The public [`CaptureHandle`] is a thin, cloneable front over
//! that channel.
//!
//! # Architecture
//!
//! ```text
//! CaptureHandle ──[CaptureCommand]──► CaptureWorker ──► CaptureStatus
//!                                        ▲    │
//! keyboard/mouse/device sources ─[SourceEvent] │
//!                                             save
//!                                              ▼
//!                                        ProfileStore
//! ```

use crate::capture::session::{
    CaptureSession, Collecting, Confirming, ListenerGuard, Resolved, Selecting,
};
use crate::capture::{Candidate, CaptureError, CaptureSettings, CaptureStatus, SessionId};
use crate::devices::DeviceSlotResolver;
use crate::input::normalizer::normalize;
use crate::input::RawInputEvent;
use crate::matching::{self, BindingConflict, BindingMatch, ControlIdentifier, MatchFilters};
use crate::profile::ProfileStore;
use crate::sources::{self, KeyPress, MousePress, SourceEvent};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::time::{sleep_until, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Commands the worker understands. Every command carries a oneshot reply.
enum CaptureCommand {
    Start {
        action_map: String,
        action: String,
        reply: oneshot::Sender<Result<SessionId, CaptureError>>,
    },
    Candidates {
        session: SessionId,
        reply: oneshot::Sender<Result<Vec<Candidate>, CaptureError>>,
    },
    Select {
        session: SessionId,
        canonical: String,
        reply: oneshot::Sender<Result<(), CaptureError>>,
    },
    Save {
        session: SessionId,
        multi_tap: Option<u32>,
        activation_mode: Option<String>,
        reply: oneshot::Sender<Result<Vec<BindingConflict>, CaptureError>>,
    },
    Cancel {
        session: SessionId,
        reply: oneshot::Sender<Result<(), CaptureError>>,
    },
}

/// Runtime stage of the worker. `Idle` means no session in flight; the
/// other variants hold the session in its current typestate.
enum Stage {
    Idle,
    Collecting(CaptureSession<Collecting>),
    Confirming(CaptureSession<Confirming>),
    Selecting(CaptureSession<Selecting>),
    Resolved(CaptureSession<Resolved>),
}

impl Stage {
    fn session_id(&self) -> Option<SessionId> {
        match self {
            Stage::Idle => None,
            Stage::Collecting(s) => Some(s.id()),
            Stage::Confirming(s) => Some(s.id()),
            Stage::Selecting(s) => Some(s.id()),
            Stage::Resolved(s) => Some(s.id()),
        }
    }

    fn candidate_list(&self) -> Vec<Candidate> {
        match self {
            Stage::Idle => Vec::new(),
            Stage::Collecting(s) => s.candidate_list(),
            Stage::Confirming(s) => s.candidate_list(),
            Stage::Selecting(s) => s.candidate_list(),
            Stage::Resolved(s) => s.candidate_list(),
        }
    }

    fn name(&self) -> &'static str {
        match self {
            Stage::Idle => "idle",
            Stage::Collecting(_) => "collecting",
            Stage::Confirming(_) => "confirming",
            Stage::Selecting(_) => "selecting",
            Stage::Resolved(_) => "resolved",
        }
    }
}

struct CaptureWorker {
    stage: Stage,
    /// The single pending timer: countdown, confirm window, or grace delay,
    /// depending on the stage. Clearing it is timer cancellation, which
    /// makes cancellation trivially idempotent.
    deadline: Option<Instant>,
    /// Set once "no input detected" has been announced and the session is
    /// waiting out its grace delay.
    grace: bool,
    command_rx: mpsc::Receiver<CaptureCommand>,
    source_rx: mpsc::Receiver<SourceEvent>,
    armed: Arc<watch::Sender<Option<SessionId>>>,
    store: Arc<dyn ProfileStore>,
    resolver: Arc<DeviceSlotResolver>,
    settings: CaptureSettings,
    status_tx: mpsc::Sender<CaptureStatus>,
}

impl CaptureWorker {
    async fn run(mut self) {
        info!("capture worker running");
        loop {
            let deadline = self.deadline;
            tokio::select! {
                command = self.command_rx.recv() => {
                    let Some(command) = command else {
                        self.close_active();
                        info!("capture worker shutting down");
                        break;
                    };
                    self.handle_command(command);
                }
                event = self.source_rx.recv() => {
                    if let Some(event) = event {
                        self.handle_source(event);
                    }
                }
                _ = sleep_until(deadline.unwrap_or_else(far_future)), if deadline.is_some() => {
                    self.handle_deadline();
                }
            }
        }
    }

    fn emit(&self, status: CaptureStatus) {
        if self.status_tx.try_send(status).is_err() {
            debug!("status channel full or closed, dropping status event");
        }
    }

    fn conflicts_for(&self, action_map: &str, action: &str, canonical: &str) -> Vec<BindingConflict> {
        match self.store.load_profile() {
            Ok(profile) => matching::scan_conflicts(&profile, action_map, action, canonical),
            Err(e) => {
                warn!("conflict scan skipped, profile unavailable: {}", e);
                Vec::new()
            }
        }
    }

    fn handle_source(&mut self, event: SourceEvent) {
        match event {
            SourceEvent::Raw { session_id, event } => self.handle_raw(session_id, event),
            SourceEvent::DetectionComplete { session_id } => self.handle_complete(session_id),
        }
    }

    /// True if the event belongs to the currently active session. Stale and
    /// unsessioned events are dropped with a debug log only.
    fn accepts(&self, session_id: SessionId) -> bool {
        match self.stage.session_id() {
            Some(active) if active == session_id => true,
            Some(active) => {
                debug!(
                    "dropping stale event for session {} (active {})",
                    session_id, active
                );
                false
            }
            None => {
                debug!("dropping event for session {}, none active", session_id);
                false
            }
        }
    }

    fn handle_raw(&mut self, session_id: SessionId, event: RawInputEvent) {
        if !self.accepts(session_id) {
            return;
        }
        if self.grace {
            debug!("dropping event during close grace period");
            return;
        }
        let Some(detected) = normalize(&event, &self.resolver) else {
            debug!("dropping unnormalizable raw event");
            return;
        };

        match std::mem::replace(&mut self.stage, Stage::Idle) {
            Stage::Collecting(session) => {
                self.emit(CaptureStatus::CandidateAdded {
                    session_id,
                    candidate: Candidate {
                        canonical: detected.canonical.clone(),
                        display_name: detected.display_name.clone(),
                        is_selected: false,
                    },
                });
                let confirming = session.first_candidate(detected);
                // First candidate cancels the countdown and opens the fixed
                // disambiguation window.
                self.deadline = Some(Instant::now() + self.settings.confirm_window());
                self.stage = Stage::Confirming(confirming);
            }
            Stage::Confirming(session) => {
                if session.is_duplicate(&detected.canonical) {
                    debug!("deduplicating candidate {}", detected.canonical);
                    self.stage = Stage::Confirming(session);
                } else if session.chord_completes(&detected) {
                    let canonical = detected.canonical.clone();
                    let conflicts =
                        self.conflicts_for(session.action_map(), session.action(), &canonical);
                    let resolved = session.resolve_chord(detected, conflicts.clone());
                    self.deadline = None;
                    self.emit(CaptureStatus::Resolved {
                        session_id,
                        canonical,
                        conflicts,
                    });
                    self.stage = Stage::Resolved(resolved);
                } else {
                    self.emit(CaptureStatus::CandidateAdded {
                        session_id,
                        candidate: Candidate {
                            canonical: detected.canonical.clone(),
                            display_name: detected.display_name.clone(),
                            is_selected: true,
                        },
                    });
                    let selecting = session.open_selection(detected);
                    // No further auto-timeout once the user has to choose.
                    self.deadline = None;
                    self.emit(CaptureStatus::AwaitingSelection {
                        session_id,
                        candidates: selecting.candidate_list(),
                    });
                    self.stage = Stage::Selecting(selecting);
                }
            }
            other => {
                debug!("dropping raw event in state {}", other.name());
                self.stage = other;
            }
        }
    }

    fn handle_complete(&mut self, session_id: SessionId) {
        if !self.accepts(session_id) {
            return;
        }
        match std::mem::replace(&mut self.stage, Stage::Idle) {
            Stage::Collecting(session) => {
                if session.candidate_count() == 0 && !self.grace {
                    self.announce_no_input(session.id());
                }
                self.stage = Stage::Collecting(session);
            }
            Stage::Confirming(session) => self.resolve_sole(session),
            other => {
                debug!("ignoring detection-complete in state {}", other.name());
                self.stage = other;
            }
        }
    }

    fn handle_deadline(&mut self) {
        self.deadline = None;
        match std::mem::replace(&mut self.stage, Stage::Idle) {
            Stage::Collecting(session) => {
                if self.grace {
                    let id = session.id();
                    info!("session {} closed, no input detected", id);
                    let _ = session.close();
                    self.grace = false;
                    self.emit(CaptureStatus::Closed { session_id: id });
                } else {
                    let id = session.id();
                    self.announce_no_input(id);
                    self.stage = Stage::Collecting(session);
                }
            }
            Stage::Confirming(session) => self.resolve_sole(session),
            other => {
                debug!("spurious deadline in state {}", other.name());
                self.stage = other;
            }
        }
    }

    /// Countdown elapsed with zero candidates: announce and wait out a
    /// short grace delay before auto-closing.
    fn announce_no_input(&mut self, session_id: SessionId) {
        info!("session {} detected no input", session_id);
        self.grace = true;
        self.deadline = Some(Instant::now() + self.settings.grace_delay());
        self.emit(CaptureStatus::NoInputDetected { session_id });
    }

    /// Window elapsed with exactly one candidate: resolve to it.
    fn resolve_sole(&mut self, session: CaptureSession<Confirming>) {
        self.deadline = None;
        let Some(canonical) = session.sole_canonical() else {
            let id = session.id();
            let _ = session.close();
            self.emit(CaptureStatus::Closed { session_id: id });
            return;
        };
        let session_id = session.id();
        let conflicts = self.conflicts_for(session.action_map(), session.action(), &canonical);
        let resolved = session.resolve_sole(conflicts.clone());
        self.emit(CaptureStatus::Resolved {
            session_id,
            canonical,
            conflicts,
        });
        self.stage = Stage::Resolved(resolved);
    }

    fn handle_command(&mut self, command: CaptureCommand) {
        match command {
            CaptureCommand::Start {
                action_map,
                action,
                reply,
            } => {
                if !matches!(self.stage, Stage::Idle) {
                    debug!("start ignored, a session is already active");
                    let _ = reply.send(Err(CaptureError::SessionActive));
                    return;
                }
                let id = SessionId::fresh();
                let guard = ListenerGuard::arm(Arc::clone(&self.armed), id);
                let session = CaptureSession::create(id, action_map, action, guard).activate();
                self.grace = false;
                self.deadline = Some(Instant::now() + self.settings.initial_countdown());
                self.emit(CaptureStatus::Listening { session_id: id });
                self.stage = Stage::Collecting(session);
                let _ = reply.send(Ok(id));
            }

            CaptureCommand::Candidates { session, reply } => {
                let result = if self.stage.session_id() == Some(session) {
                    Ok(self.stage.candidate_list())
                } else {
                    debug!("candidate query for stale session {}", session);
                    Err(CaptureError::StaleSession(session))
                };
                let _ = reply.send(result);
            }

            CaptureCommand::Select {
                session,
                canonical,
                reply,
            } => match std::mem::replace(&mut self.stage, Stage::Idle) {
                Stage::Selecting(mut selecting) if selecting.id() == session => {
                    match selecting.select(&canonical) {
                        Ok(()) => {
                            let conflicts = self.conflicts_for(
                                selecting.action_map(),
                                selecting.action(),
                                &canonical,
                            );
                            let resolved = selecting.resolve(conflicts.clone());
                            self.emit(CaptureStatus::Resolved {
                                session_id: session,
                                canonical,
                                conflicts,
                            });
                            self.stage = Stage::Resolved(resolved);
                            let _ = reply.send(Ok(()));
                        }
                        Err(e) => {
                            self.stage = Stage::Selecting(selecting);
                            let _ = reply.send(Err(e));
                        }
                    }
                }
                other => {
                    debug!("select ignored in state {}", other.name());
                    self.stage = other;
                    let _ = reply.send(Err(CaptureError::StaleSession(session)));
                }
            },

            CaptureCommand::Save {
                session,
                multi_tap,
                activation_mode,
                reply,
            } => match std::mem::replace(&mut self.stage, Stage::Idle) {
                Stage::Resolved(resolved) if resolved.id() == session => {
                    let Some(canonical) = resolved.selected_canonical().map(str::to_string)
                    else {
                        self.stage = Stage::Resolved(resolved);
                        let _ = reply.send(Err(CaptureError::StaleSession(session)));
                        return;
                    };
                    match self.store.update_binding(
                        resolved.action_map(),
                        resolved.action(),
                        &canonical,
                        multi_tap,
                        activation_mode.as_deref(),
                    ) {
                        Ok(()) => {
                            let conflicts = resolved.conflicts().to_vec();
                            info!(
                                "session {} saved {} -> {}/{}",
                                session,
                                canonical,
                                resolved.action_map(),
                                resolved.action()
                            );
                            self.emit(CaptureStatus::Saved {
                                session_id: session,
                                canonical,
                            });
                            let _ = resolved.close();
                            self.deadline = None;
                            self.grace = false;
                            self.emit(CaptureStatus::Closed { session_id: session });
                            let _ = reply.send(Ok(conflicts));
                        }
                        Err(e) => {
                            // The session stays open so the user can retry.
                            warn!("session {} save failed: {}", session, e);
                            self.emit(CaptureStatus::SaveFailed {
                                session_id: session,
                                reason: e.to_string(),
                            });
                            self.stage = Stage::Resolved(resolved);
                            let _ = reply.send(Err(CaptureError::Persistence(e.to_string())));
                        }
                    }
                }
                other => {
                    debug!("save ignored in state {}", other.name());
                    self.stage = other;
                    let _ = reply.send(Err(CaptureError::StaleSession(session)));
                }
            },

            CaptureCommand::Cancel { session, reply } => {
                if self.stage.session_id() == Some(session) {
                    self.close_active();
                } else {
                    debug!("cancel for stale session {}", session);
                }
                // Cancellation is idempotent; a stale cancel is not an error.
                let _ = reply.send(Ok(()));
            }
        }
    }

    fn close_active(&mut self) {
        self.deadline = None;
        self.grace = false;
        let stage = std::mem::replace(&mut self.stage, Stage::Idle);
        let id = stage.session_id();
        match stage {
            Stage::Idle => {}
            Stage::Collecting(s) => {
                let _ = s.close();
            }
            Stage::Confirming(s) => {
                let _ = s.close();
            }
            Stage::Selecting(s) => {
                let _ = s.close();
            }
            Stage::Resolved(s) => {
                let _ = s.close();
            }
        }
        if let Some(session_id) = id {
            info!("session {} closed", session_id);
            self.emit(CaptureStatus::Closed { session_id });
        }
    }
}

fn far_future() -> Instant {
    Instant::now() + Duration::from_secs(86400)
}

/// Channels the host wires to its own event loops and collaborators.
pub struct CaptureChannels {
    /// Host keyboard keydown feed.
    pub keyboard_tx: mpsc::Sender<KeyPress>,
    /// Host mouse-down feed.
    pub mouse_tx: mpsc::Sender<MousePress>,
    /// Device-collaborator feed (raw device events, detection-complete).
    pub source_tx: mpsc::Sender<SourceEvent>,
    /// Armed-session gate for device sources.
    pub armed_rx: watch::Receiver<Option<SessionId>>,
    /// User-visible progress events.
    pub status_rx: mpsc::Receiver<CaptureStatus>,
    /// Cancels the host-source adapter tasks.
    pub cancel: CancellationToken,
}

impl CaptureChannels {
    /// Forwards the device collaborator's detection-complete signal for
    /// `session`. Stale ids are dropped by the worker like any other event.
    pub async fn notify_detection_complete(
        &self,
        session: SessionId,
    ) -> Result<(), CaptureError> {
        self.source_tx
            .send(SourceEvent::DetectionComplete {
                session_id: session,
            })
            .await
            .map_err(|e| CaptureError::ChannelClosed(e.to_string()))
    }
}

/// Factory for the capture subsystem.
pub struct CaptureController;

impl CaptureController {
    /// Spawns the worker and the keyboard/mouse adapters, returning the
    /// public handle and the wiring channels.
    pub fn spawn(
        store: Arc<dyn ProfileStore>,
        resolver: Arc<DeviceSlotResolver>,
        settings: CaptureSettings,
    ) -> (CaptureHandle, CaptureChannels) {
        let (command_tx, command_rx) = mpsc::channel(32);
        let (source_tx, source_rx) = mpsc::channel(256);
        let (status_tx, status_rx) = mpsc::channel(64);
        let (keyboard_tx, keyboard_rx) = mpsc::channel(64);
        let (mouse_tx, mouse_rx) = mpsc::channel(64);
        let (armed_tx, armed_rx) = watch::channel(None);
        let armed = Arc::new(armed_tx);
        let cancel = CancellationToken::new();

        let _keyboard_task = sources::spawn_keyboard_source(
            keyboard_rx,
            armed_rx.clone(),
            source_tx.clone(),
            cancel.child_token(),
        );
        let _mouse_task = sources::spawn_mouse_source(
            mouse_rx,
            armed_rx.clone(),
            source_tx.clone(),
            cancel.child_token(),
        );

        let worker = CaptureWorker {
            stage: Stage::Idle,
            deadline: None,
            grace: false,
            command_rx,
            source_rx,
            armed,
            store: Arc::clone(&store),
            resolver,
            settings,
            status_tx,
        };
        let _worker_task = tokio::spawn(worker.run());

        (
            CaptureHandle { command_tx, store },
            CaptureChannels {
                keyboard_tx,
                mouse_tx,
                source_tx,
                armed_rx,
                status_rx,
                cancel,
            },
        )
    }
}

/// Public API of the capture subsystem, cloneable and cheap.
#[derive(Clone)]
pub struct CaptureHandle {
    command_tx: mpsc::Sender<CaptureCommand>,
    store: Arc<dyn ProfileStore>,
}

impl CaptureHandle {
    async fn request<T>(
        &self,
        build: impl FnOnce(oneshot::Sender<Result<T, CaptureError>>) -> CaptureCommand,
    ) -> Result<T, CaptureError> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.command_tx
            .send(build(reply_tx))
            .await
            .map_err(|e| CaptureError::ChannelClosed(e.to_string()))?;
        reply_rx
            .await
            .map_err(|e| CaptureError::ChannelClosed(e.to_string()))?
    }

    /// Starts a capture for one action. A no-op (with an error reply) while
    /// another session is active.
    pub async fn start_capture(
        &self,
        action_map: &str,
        action: &str,
    ) -> Result<SessionId, CaptureError> {
        let action_map = action_map.to_string();
        let action = action.to_string();
        self.request(|reply| CaptureCommand::Start {
            action_map,
            action,
            reply,
        })
        .await
    }

    /// Insertion-ordered candidate list of the active session.
    pub async fn candidates(&self, session: SessionId) -> Result<Vec<Candidate>, CaptureError> {
        self.request(|reply| CaptureCommand::Candidates { session, reply })
            .await
    }

    /// Explicit user selection while the session is in `Selecting`.
    pub async fn select(
        &self,
        session: SessionId,
        canonical: &str,
    ) -> Result<(), CaptureError> {
        let canonical = canonical.to_string();
        self.request(|reply| CaptureCommand::Select {
            session,
            canonical,
            reply,
        })
        .await
    }

    /// Commits the resolved candidate through the persistence collaborator
    /// and closes the session. Returns the advisory conflict list; conflicts
    /// never block a save.
    pub async fn save(
        &self,
        session: SessionId,
        multi_tap: Option<u32>,
        activation_mode: Option<String>,
    ) -> Result<Vec<BindingConflict>, CaptureError> {
        self.request(|reply| CaptureCommand::Save {
            session,
            multi_tap,
            activation_mode,
            reply,
        })
        .await
    }

    /// Cancels the session from any state. Idempotent.
    pub async fn cancel(&self, session: SessionId) -> Result<(), CaptureError> {
        self.request(|reply| CaptureCommand::Cancel { session, reply })
            .await
    }

    /// Read-only binding lookup against the current profile snapshot. Runs
    /// concurrently with an active capture session without locking.
    pub fn find_bindings(
        &self,
        device_prefix: &str,
        identifier: &ControlIdentifier,
        filters: &MatchFilters,
    ) -> Result<Vec<BindingMatch>, CaptureError> {
        let profile = self
            .store
            .load_profile()
            .map_err(|e| CaptureError::Persistence(e.to_string()))?;
        Ok(matching::find_bindings(
            &profile,
            device_prefix,
            identifier,
            filters,
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::input::Modifier;
    use crate::profile::{default_profile, ProfileError, ProfilePortal, ProfileStore};

    fn harness() -> (CaptureHandle, CaptureChannels, Arc<ProfilePortal>) {
        let portal = Arc::new(ProfilePortal::new(default_profile()));
        let resolver = Arc::new(DeviceSlotResolver::default());
        let (handle, channels) = CaptureController::spawn(
            portal.clone(),
            resolver,
            CaptureSettings::default(),
        );
        (handle, channels, portal)
    }

    fn key(code: &str, held: Vec<Modifier>) -> RawInputEvent {
        RawInputEvent::Keyboard {
            code: code.to_string(),
            key: code.to_string(),
            held_modifiers: held,
        }
    }

    async fn inject(
        channels: &CaptureChannels,
        session: SessionId,
        event: RawInputEvent,
    ) {
        channels
            .source_tx
            .send(SourceEvent::Raw {
                session_id: session,
                event,
            })
            .await
            .unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn sole_candidate_auto_resolves_after_the_window() {
        let (handle, channels, portal) = harness();
        let id = handle
            .start_capture("spaceship_weapons", "v_weapon_cycle_missile_fwd")
            .await
            .unwrap();
        assert_eq!(*channels.armed_rx.borrow(), Some(id));

        inject(&channels, id, key("KeyX", vec![])).await;
        tokio::time::sleep(Duration::from_millis(1100)).await;

        let candidates = handle.candidates(id).await.unwrap();
        assert_eq!(candidates.len(), 1);
        assert_eq!(candidates[0].canonical, "kb1_x");
        assert!(candidates[0].is_selected);

        let conflicts = handle.save(id, None, None).await.unwrap();
        assert!(conflicts.is_empty());
        assert_eq!(*channels.armed_rx.borrow(), None);

        let snapshot = portal.snapshot();
        let action = snapshot[1].action("v_weapon_cycle_missile_fwd").unwrap();
        assert!(action
            .bindings
            .iter()
            .any(|b| b.input == "kb1_x" && !b.is_default));
    }

    #[tokio::test(start_paused = true)]
    async fn second_candidate_enters_selection_and_selection_commits() {
        let (handle, channels, portal) = harness();
        let id = handle
            .start_capture("spaceship_movement", "v_pitch")
            .await
            .unwrap();

        inject(&channels, id, key("KeyX", vec![])).await;
        tokio::time::sleep(Duration::from_millis(500)).await;
        inject(&channels, id, RawInputEvent::Mouse { button_index: 0 }).await;
        // Selection has no auto-timeout; waiting well past the window must
        // not close anything.
        tokio::time::sleep(Duration::from_secs(5)).await;

        let candidates = handle.candidates(id).await.unwrap();
        assert_eq!(candidates.len(), 2);
        assert_eq!(candidates[0].canonical, "kb1_x");
        assert_eq!(candidates[1].canonical, "mouse1_mouse1");
        assert!(candidates[1].is_selected);

        handle.select(id, "mouse1_mouse1").await.unwrap();
        let conflicts = handle.save(id, None, None).await.unwrap();
        // mouse1_mouse1 is the default fire binding; the conflict is
        // advisory and the save went through anyway.
        assert!(conflicts.iter().any(|c| c.action == "v_attack1_group1"));

        let snapshot = portal.snapshot();
        let action = snapshot[0].action("v_pitch").unwrap();
        assert!(action
            .bindings
            .iter()
            .any(|b| b.input == "mouse1_mouse1" && !b.is_default));
    }

    #[tokio::test(start_paused = true)]
    async fn stale_events_never_reach_a_newer_session() {
        let (handle, channels, _portal) = harness();
        let first = handle
            .start_capture("spaceship_movement", "v_pitch")
            .await
            .unwrap();
        handle.cancel(first).await.unwrap();
        let second = handle
            .start_capture("spaceship_movement", "v_yaw")
            .await
            .unwrap();
        assert_ne!(first, second);

        inject(&channels, first, key("KeyX", vec![])).await;
        tokio::time::sleep(Duration::from_millis(50)).await;

        let candidates = handle.candidates(second).await.unwrap();
        assert!(candidates.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn held_modifier_then_key_auto_resolves_the_chord() {
        let (handle, channels, _portal) = harness();
        let id = handle
            .start_capture("spaceship_movement", "v_afterburner")
            .await
            .unwrap();

        inject(&channels, id, key("AltLeft", vec![Modifier::LAlt])).await;
        tokio::time::sleep(Duration::from_millis(200)).await;
        inject(&channels, id, key("KeyX", vec![Modifier::LAlt])).await;
        tokio::time::sleep(Duration::from_millis(50)).await;

        // No selection step: the chord resolved directly.
        let candidates = handle.candidates(id).await.unwrap();
        assert_eq!(candidates.len(), 2);
        let selected: Vec<_> = candidates.iter().filter(|c| c.is_selected).collect();
        assert_eq!(selected.len(), 1);
        assert_eq!(selected[0].canonical, "kb1_lalt+x");

        let conflicts = handle.save(id, None, None).await.unwrap();
        assert!(conflicts.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn duplicate_raw_events_deduplicate_to_one_candidate() {
        let (handle, channels, _portal) = harness();
        let id = handle
            .start_capture("spaceship_movement", "v_pitch")
            .await
            .unwrap();

        inject(&channels, id, key("KeyX", vec![])).await;
        tokio::time::sleep(Duration::from_millis(100)).await;
        inject(&channels, id, key("KeyX", vec![])).await;
        tokio::time::sleep(Duration::from_millis(1000)).await;

        let candidates = handle.candidates(id).await.unwrap();
        assert_eq!(candidates.len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn no_input_announces_then_closes_after_grace() {
        let (handle, channels, _portal) = harness();
        let id = handle
            .start_capture("spaceship_movement", "v_pitch")
            .await
            .unwrap();

        // Countdown elapses with zero candidates.
        tokio::time::sleep(Duration::from_millis(10_500)).await;
        // Still open during the grace delay.
        assert!(handle.candidates(id).await.is_ok());

        tokio::time::sleep(Duration::from_millis(2_000)).await;
        assert!(matches!(
            handle.candidates(id).await,
            Err(CaptureError::StaleSession(_))
        ));
        assert_eq!(*channels.armed_rx.borrow(), None);

        // The controller is idle again and accepts a new session.
        let next = handle
            .start_capture("spaceship_movement", "v_yaw")
            .await
            .unwrap();
        assert_ne!(next, id);
    }

    #[tokio::test(start_paused = true)]
    async fn starting_while_active_is_a_noop() {
        let (handle, _channels, _portal) = harness();
        let id = handle
            .start_capture("spaceship_movement", "v_pitch")
            .await
            .unwrap();
        assert!(matches!(
            handle.start_capture("spaceship_movement", "v_yaw").await,
            Err(CaptureError::SessionActive)
        ));
        // The running session is untouched.
        assert!(handle.candidates(id).await.is_ok());
    }

    #[tokio::test(start_paused = true)]
    async fn selecting_an_unknown_candidate_is_rejected() {
        let (handle, channels, _portal) = harness();
        let id = handle
            .start_capture("spaceship_movement", "v_pitch")
            .await
            .unwrap();
        inject(&channels, id, key("KeyX", vec![])).await;
        tokio::time::sleep(Duration::from_millis(100)).await;
        inject(&channels, id, key("KeyY", vec![])).await;
        tokio::time::sleep(Duration::from_millis(50)).await;

        assert!(matches!(
            handle.select(id, "kb1_nope").await,
            Err(CaptureError::UnknownCandidate(_))
        ));
        // The session survives the bad selection.
        handle.select(id, "kb1_x").await.unwrap();
        assert!(handle.save(id, None, None).await.is_ok());
    }

    #[tokio::test(start_paused = true)]
    async fn detection_complete_resolves_the_sole_candidate_early() {
        let (handle, channels, _portal) = harness();
        let id = handle
            .start_capture("spaceship_movement", "v_pitch")
            .await
            .unwrap();
        inject(&channels, id, key("KeyX", vec![])).await;
        tokio::time::sleep(Duration::from_millis(100)).await;
        channels.notify_detection_complete(id).await.unwrap();
        tokio::time::sleep(Duration::from_millis(50)).await;

        // Resolved well before the 1000ms window would have elapsed.
        assert!(handle.save(id, None, None).await.is_ok());
    }

    struct FailingStore;

    impl ProfileStore for FailingStore {
        fn load_profile(&self) -> Result<Vec<crate::profile::ActionMap>, ProfileError> {
            Ok(default_profile())
        }

        fn update_binding(
            &self,
            _action_map: &str,
            _action: &str,
            _input: &str,
            _multi_tap: Option<u32>,
            _activation_mode: Option<&str>,
        ) -> Result<(), ProfileError> {
            Err(ProfileError::Io("disk unplugged".to_string()))
        }

        fn clear_binding(
            &self,
            _action_map: &str,
            _action: &str,
            _input_type: crate::input::InputType,
        ) -> Result<(), ProfileError> {
            Err(ProfileError::Io("disk unplugged".to_string()))
        }

        fn reset_binding(&self, _action_map: &str, _action: &str) -> Result<(), ProfileError> {
            Err(ProfileError::Io("disk unplugged".to_string()))
        }
    }

    #[tokio::test(start_paused = true)]
    async fn persistence_failure_keeps_the_session_open_for_retry() {
        let store: Arc<dyn ProfileStore> = Arc::new(FailingStore);
        let resolver = Arc::new(DeviceSlotResolver::default());
        let (handle, channels) =
            CaptureController::spawn(store, resolver, CaptureSettings::default());

        let id = handle
            .start_capture("spaceship_movement", "v_pitch")
            .await
            .unwrap();
        inject(&channels, id, key("KeyX", vec![])).await;
        tokio::time::sleep(Duration::from_millis(1100)).await;

        assert!(matches!(
            handle.save(id, None, None).await,
            Err(CaptureError::Persistence(_))
        ));
        // Session still open, listeners still armed, retry still possible.
        assert!(handle.candidates(id).await.is_ok());
        assert_eq!(*channels.armed_rx.borrow(), Some(id));
        assert!(matches!(
            handle.save(id, None, None).await,
            Err(CaptureError::Persistence(_))
        ));

        handle.cancel(id).await.unwrap();
        assert_eq!(*channels.armed_rx.borrow(), None);
    }

    #[tokio::test(start_paused = true)]
    async fn find_bindings_works_while_a_session_is_active() {
        let (handle, _channels, _portal) = harness();
        let _id = handle
            .start_capture("spaceship_movement", "v_pitch")
            .await
            .unwrap();

        let matches = handle
            .find_bindings(
                "js1",
                &ControlIdentifier::ByNumber(1),
                &MatchFilters::default(),
            )
            .unwrap();
        assert_eq!(matches.len(), 1);
        assert_eq!(matches[0].action_label, "Fire Weapon Group 1");
    }
}
