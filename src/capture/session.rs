//! Capture session typestate machine.
//!
//! One instance per bind attempt. States are compile-time types (statum);
//! transitions are monotonic, and every path into `Closed` runs through
//! [`ListenerGuard::release`], so listeners cannot leak across
//! save/cancel/timeout/error exits.
//!
//! # State Machine
//!
//! ```text
//! Armed ──► Collecting ──► Confirming ──► Resolved ──► Closed
//!                              │              ▲
//!                              └─► Selecting ─┘
//!              (any state ──► Closed on cancel/timeout)
//! ```

use crate::capture::{Candidate, CaptureError, SessionId};
use crate::input::DetectedInput;
use crate::matching::BindingConflict;
use chrono::{DateTime, Local};
use indexmap::IndexMap;
use statum::{machine, state};
use std::sync::Arc;
use tokio::sync::watch;
use tracing::{debug, info};

/// Scoped handle on the armed-listener gate.
///
/// Arming publishes the session id to every source adapter; releasing
/// clears it. Release is idempotent because multiple exit paths race to
/// close the same session, and the `Drop` impl is the structured-cleanup
/// backstop for the error path.
#[derive(Debug)]
pub struct ListenerGuard {
    armed: Arc<watch::Sender<Option<SessionId>>>,
    released: bool,
}

impl ListenerGuard {
    pub fn arm(armed: Arc<watch::Sender<Option<SessionId>>>, id: SessionId) -> Self {
        armed.send_replace(Some(id));
        debug!("listeners armed for session {}", id);
        Self {
            armed,
            released: false,
        }
    }

    pub fn release(&mut self) {
        if !self.released {
            self.armed.send_replace(None);
            self.released = true;
            debug!("listeners released");
        }
    }
}

impl Drop for ListenerGuard {
    fn drop(&mut self) {
        self.release();
    }
}

#[state]
#[derive(Debug, Clone)]
pub enum CaptureState {
    Armed,      // listeners published, no input yet accepted
    Collecting, // countdown running, waiting for the first candidate
    Confirming, // secondary disambiguation window open
    Selecting,  // several candidates, waiting for an explicit choice
    Resolved,   // one candidate chosen, conflicts scanned, save pending
    Closed,     // terminal; listeners released
}

#[machine]
#[derive(Debug)]
pub struct CaptureSession<S: CaptureState> {
    id: SessionId,
    action_map: String,
    action: String,
    // Insertion-ordered, keyed by canonical string: deduplication and
    // stable presentation order in one structure.
    candidates: IndexMap<String, DetectedInput>,
    selected: Option<String>,
    conflicts: Vec<BindingConflict>,
    guard: ListenerGuard,
    started_at: DateTime<Local>,
}

impl<S: CaptureState> CaptureSession<S> {
    pub fn id(&self) -> SessionId {
        self.id
    }

    pub fn action_map(&self) -> &str {
        &self.action_map
    }

    pub fn action(&self) -> &str {
        &self.action
    }

    pub fn candidate_count(&self) -> usize {
        self.candidates.len()
    }

    /// Snapshot of the candidate set in insertion order.
    pub fn candidate_list(&self) -> Vec<Candidate> {
        self.candidates
            .values()
            .map(|input| Candidate {
                canonical: input.canonical.clone(),
                display_name: input.display_name.clone(),
                is_selected: self.selected.as_deref() == Some(input.canonical.as_str()),
            })
            .collect()
    }

}

impl CaptureSession<Armed> {
    pub fn create(id: SessionId, action_map: String, action: String, guard: ListenerGuard) -> Self {
        info!("capture session {} armed for {}/{}", id, action_map, action);
        Self::new(
            id,
            action_map,
            action,
            IndexMap::new(),
            None,
            Vec::new(),
            guard,
            Local::now(),
        )
    }

    pub fn activate(self) -> CaptureSession<Collecting> {
        debug!("session {} collecting", self.id);
        self.transition()
    }

    pub fn close(mut self) -> CaptureSession<Closed> {
        self.guard.release();
        self.transition()
    }
}

impl CaptureSession<Collecting> {
    /// Accepts the first candidate and opens the disambiguation window.
    pub fn first_candidate(mut self, input: DetectedInput) -> CaptureSession<Confirming> {
        info!("session {} first candidate: {}", self.id, input.canonical);
        self.candidates.insert(input.canonical.clone(), input);
        self.transition()
    }

    pub fn close(mut self) -> CaptureSession<Closed> {
        self.guard.release();
        self.transition()
    }
}

impl CaptureSession<Confirming> {
    pub fn is_duplicate(&self, canonical: &str) -> bool {
        self.candidates.contains_key(canonical)
    }

    /// The chord exception: the first candidate was a held modifier alone
    /// and the second arrived while it is still held.
    pub fn chord_completes(&self, second: &DetectedInput) -> bool {
        match self
            .candidates
            .values()
            .next()
            .and_then(DetectedInput::base_modifier)
        {
            Some(modifier) => second.modifiers.contains(&modifier),
            None => false,
        }
    }

    /// Canonical string of the first (and so far only) candidate.
    pub fn sole_canonical(&self) -> Option<String> {
        self.candidates.keys().next().cloned()
    }

    /// Window elapsed with no second candidate: resolve to the sole one.
    pub fn resolve_sole(mut self, conflicts: Vec<BindingConflict>) -> CaptureSession<Resolved> {
        self.selected = self.candidates.keys().next().cloned();
        self.conflicts = conflicts;
        info!(
            "session {} resolved to sole candidate {:?}",
            self.id, self.selected
        );
        self.transition()
    }

    /// Chord auto-resolution: commit the combined chord without entering
    /// selection.
    pub fn resolve_chord(
        mut self,
        second: DetectedInput,
        conflicts: Vec<BindingConflict>,
    ) -> CaptureSession<Resolved> {
        info!(
            "session {} chord auto-resolve to {}",
            self.id, second.canonical
        );
        self.selected = Some(second.canonical.clone());
        self.candidates.insert(second.canonical.clone(), second);
        self.conflicts = conflicts;
        self.transition()
    }

    /// A second distinct candidate: every collected candidate becomes
    /// user-selectable, the most recent pre-selected.
    pub fn open_selection(mut self, second: DetectedInput) -> CaptureSession<Selecting> {
        info!(
            "session {} ambiguous, second candidate {}",
            self.id, second.canonical
        );
        self.selected = Some(second.canonical.clone());
        self.candidates.insert(second.canonical.clone(), second);
        self.transition()
    }

    pub fn close(mut self) -> CaptureSession<Closed> {
        self.guard.release();
        self.transition()
    }
}

impl CaptureSession<Selecting> {
    pub fn select(&mut self, canonical: &str) -> Result<(), CaptureError> {
        if !self.candidates.contains_key(canonical) {
            return Err(CaptureError::UnknownCandidate(canonical.to_string()));
        }
        self.selected = Some(canonical.to_string());
        Ok(())
    }

    pub fn selected_canonical(&self) -> Option<String> {
        self.selected.clone()
    }

    pub fn resolve(mut self, conflicts: Vec<BindingConflict>) -> CaptureSession<Resolved> {
        self.conflicts = conflicts;
        info!("session {} resolved by selection {:?}", self.id, self.selected);
        self.transition()
    }

    pub fn close(mut self) -> CaptureSession<Closed> {
        self.guard.release();
        self.transition()
    }
}

impl CaptureSession<Resolved> {
    pub fn selected_canonical(&self) -> Option<&str> {
        self.selected.as_deref()
    }

    pub fn selected_input(&self) -> Option<&DetectedInput> {
        self.selected
            .as_deref()
            .and_then(|canonical| self.candidates.get(canonical))
    }

    pub fn conflicts(&self) -> &[BindingConflict] {
        &self.conflicts
    }

    pub fn close(mut self) -> CaptureSession<Closed> {
        self.guard.release();
        self.transition()
    }
}

impl CaptureSession<Closed> {}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::input::{InputType, Modifier};

    fn guard_pair() -> (Arc<watch::Sender<Option<SessionId>>>, watch::Receiver<Option<SessionId>>) {
        let (tx, rx) = watch::channel(None);
        (Arc::new(tx), rx)
    }

    fn detected(canonical: &str, modifiers: Vec<Modifier>, is_modifier: bool) -> DetectedInput {
        DetectedInput {
            canonical: canonical.to_string(),
            input_type: InputType::from_canonical(canonical),
            display_name: canonical.to_string(),
            device_uuid: None,
            modifiers,
            axis_value: None,
            is_modifier,
            hid_axis_name: None,
            detected_at: Local::now(),
        }
    }

    #[test]
    fn guard_release_is_idempotent_and_drop_is_a_backstop() {
        let (tx, rx) = guard_pair();
        let id = SessionId::fresh();
        {
            let mut guard = ListenerGuard::arm(Arc::clone(&tx), id);
            assert_eq!(*rx.borrow(), Some(id));
            guard.release();
            guard.release();
            assert_eq!(*rx.borrow(), None);
        }
        // Drop after release must not re-arm or panic.
        assert_eq!(*rx.borrow(), None);

        let guard = ListenerGuard::arm(Arc::clone(&tx), id);
        assert_eq!(*rx.borrow(), Some(id));
        drop(guard);
        assert_eq!(*rx.borrow(), None);
    }

    #[test]
    fn candidates_deduplicate_and_keep_insertion_order() {
        let (tx, _rx) = guard_pair();
        let id = SessionId::fresh();
        let session = CaptureSession::create(
            id,
            "map".to_string(),
            "act".to_string(),
            ListenerGuard::arm(tx, id),
        )
        .activate();

        let session = session.first_candidate(detected("kb1_x", vec![], false));
        assert!(session.is_duplicate("kb1_x"));
        let session = session.open_selection(detected("js1_button2", vec![], false));

        let list = session.candidate_list();
        assert_eq!(list.len(), 2);
        assert_eq!(list[0].canonical, "kb1_x");
        assert_eq!(list[1].canonical, "js1_button2");
        // Most recent candidate is pre-selected.
        assert!(list[1].is_selected);
        assert!(!list[0].is_selected);
    }

    #[test]
    fn chord_exception_requires_the_held_modifier() {
        let (tx, _rx) = guard_pair();
        let id = SessionId::fresh();
        let session = CaptureSession::create(
            id,
            "map".to_string(),
            "act".to_string(),
            ListenerGuard::arm(tx, id),
        )
        .activate()
        .first_candidate(detected("kb1_lalt", vec![], true));

        assert!(session.chord_completes(&detected("kb1_lalt+x", vec![Modifier::LAlt], false)));
        assert!(!session.chord_completes(&detected("kb1_y", vec![], false)));
    }

    #[test]
    fn every_close_path_releases_listeners() {
        let (tx, rx) = guard_pair();
        let id = SessionId::fresh();

        let armed = CaptureSession::create(
            id,
            "map".to_string(),
            "act".to_string(),
            ListenerGuard::arm(Arc::clone(&tx), id),
        );
        assert_eq!(*rx.borrow(), Some(id));
        let _ = armed.close();
        assert_eq!(*rx.borrow(), None);

        let resolved = CaptureSession::create(
            id,
            "map".to_string(),
            "act".to_string(),
            ListenerGuard::arm(Arc::clone(&tx), id),
        )
        .activate()
        .first_candidate(detected("kb1_x", vec![], false))
        .resolve_sole(Vec::new());
        assert_eq!(*rx.borrow(), Some(id));
        let _ = resolved.close();
        assert_eq!(*rx.borrow(), None);
    }
}
