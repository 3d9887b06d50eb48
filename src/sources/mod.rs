//! Input source adapters.
//!
//! The three listeners of a capture session (keyboard keydown, mouse down,
//! backend device events) are source adapters feeding one shared
//! tagged-union channel, so the state machine can be exhaustively tested
//! without simulating real DOM/device events.
//!
//! ```text
//! keyboard ──┐
//! mouse ─────┼──► SourceEvent channel ──► capture worker
//! gilrs ─────┘         ▲
//!                      │ session id stamped from the armed-watch gate
//! ```
//!
//! Sources read the currently armed session id from a watch channel and
//! stamp every event with it; while no session is armed, events are dropped
//! on the floor. That single gate is what makes listener release idempotent
//! and uniform across save/cancel/timeout/error paths.

pub mod device;

pub use device::DeviceSourceHandle;

use crate::capture::SessionId;
use crate::input::{Modifier, RawInputEvent};
use thiserror::Error;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::debug;

/// One event on the shared source channel. Every variant carries the owning
/// session id; the capture worker silently drops mismatches.
#[derive(Clone, Debug)]
pub enum SourceEvent {
    Raw {
        session_id: SessionId,
        event: RawInputEvent,
    },
    DetectionComplete {
        session_id: SessionId,
    },
}

/// A host-forwarded keyboard keydown.
#[derive(Clone, Debug)]
pub struct KeyPress {
    pub code: String,
    pub key: String,
    pub held_modifiers: Vec<Modifier>,
}

/// A host-forwarded mouse button press (0-based platform index).
#[derive(Clone, Debug)]
pub struct MousePress {
    pub button_index: u8,
}

/// Errors from source adapters. None of these reach the capture worker;
/// a failed source just stops feeding events.
#[derive(Debug, Error)]
pub enum SourceError {
    #[error("failed to initialize input backend: {0}")]
    Initialization(String),

    #[error("source channel error: {0}")]
    Channel(String),
}

/// Spawns the keyboard adapter: host keydown events in, stamped raw events
/// out.
pub fn spawn_keyboard_source(
    input: mpsc::Receiver<KeyPress>,
    armed: watch::Receiver<Option<SessionId>>,
    output: mpsc::Sender<SourceEvent>,
    cancel: CancellationToken,
) -> JoinHandle<()> {
    spawn_host_source("keyboard", input, armed, output, cancel, |press: KeyPress| {
        RawInputEvent::Keyboard {
            code: press.code,
            key: press.key,
            held_modifiers: press.held_modifiers,
        }
    })
}

/// Spawns the mouse adapter: host mouse-down events in, stamped raw events
/// out.
pub fn spawn_mouse_source(
    input: mpsc::Receiver<MousePress>,
    armed: watch::Receiver<Option<SessionId>>,
    output: mpsc::Sender<SourceEvent>,
    cancel: CancellationToken,
) -> JoinHandle<()> {
    spawn_host_source("mouse", input, armed, output, cancel, |press: MousePress| {
        RawInputEvent::Mouse {
            button_index: press.button_index,
        }
    })
}

fn spawn_host_source<T, F>(
    name: &'static str,
    mut input: mpsc::Receiver<T>,
    armed: watch::Receiver<Option<SessionId>>,
    output: mpsc::Sender<SourceEvent>,
    cancel: CancellationToken,
    convert: F,
) -> JoinHandle<()>
where
    T: Send + 'static,
    F: Fn(T) -> RawInputEvent + Send + 'static,
{
    tokio::spawn(async move {
        loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    debug!("{} source cancelled", name);
                    break;
                }
                next = input.recv() => {
                    let Some(native) = next else {
                        debug!("{} source input closed", name);
                        break;
                    };
                    let Some(session_id) = *armed.borrow() else {
                        debug!("{} source dropping event, no session armed", name);
                        continue;
                    };
                    let event = SourceEvent::Raw {
                        session_id,
                        event: convert(native),
                    };
                    if output.send(event).await.is_err() {
                        debug!("{} source output closed", name);
                        break;
                    }
                }
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn host_source_stamps_events_with_the_armed_session() {
        let (kb_tx, kb_rx) = mpsc::channel(8);
        let (armed_tx, armed_rx) = watch::channel(None);
        let (out_tx, mut out_rx) = mpsc::channel(8);
        let cancel = CancellationToken::new();
        let _task = spawn_keyboard_source(kb_rx, armed_rx, out_tx, cancel.clone());

        let id = SessionId::fresh();
        armed_tx.send_replace(Some(id));
        kb_tx
            .send(KeyPress {
                code: "KeyX".to_string(),
                key: "x".to_string(),
                held_modifiers: Vec::new(),
            })
            .await
            .unwrap();

        match out_rx.recv().await.unwrap() {
            SourceEvent::Raw { session_id, event } => {
                assert_eq!(session_id, id);
                assert!(matches!(event, RawInputEvent::Keyboard { .. }));
            }
            other => panic!("unexpected event: {:?}", other),
        }
        cancel.cancel();
    }

    #[tokio::test]
    async fn host_source_drops_events_while_released() {
        let (kb_tx, kb_rx) = mpsc::channel(8);
        let (_armed_tx, armed_rx) = watch::channel(None);
        let (out_tx, mut out_rx) = mpsc::channel(8);
        let cancel = CancellationToken::new();
        let _task = spawn_keyboard_source(kb_rx, armed_rx, out_tx, cancel.clone());

        kb_tx
            .send(KeyPress {
                code: "KeyX".to_string(),
                key: "x".to_string(),
                held_modifiers: Vec::new(),
            })
            .await
            .unwrap();
        drop(kb_tx);

        // The adapter exits on input close without forwarding anything.
        assert!(out_rx.recv().await.is_none());
        cancel.cancel();
    }
}
