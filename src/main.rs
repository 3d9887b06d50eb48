pub mod capture;
pub mod devices;
pub mod input;
pub mod matching;
pub mod profile;
pub mod sources;

use crate::capture::{CaptureController, CaptureSettings, CaptureStatus};
use crate::devices::resolver::overrides_path;
use crate::devices::{enumerate_devices, DeviceSlotResolver, PrefixOverrides};
use crate::profile::{default_profile, ProfilePortal};
use crate::sources::DeviceSourceHandle;
use color_eyre::{eyre::eyre, Result};
use gilrs::Gilrs;
use std::sync::Arc;
use tokio::sync::watch;
use tracing::{error, info, warn, Level};
use tracing_subscriber::FmtSubscriber;

#[tokio::main]
async fn main() -> Result<()> {
    setup()?;

    // Profile snapshot, loaded wholesale from the config dir (or built-in
    // defaults when none exists yet).
    let portal = match dirs::config_dir() {
        Some(dir) => Arc::new(
            ProfilePortal::load_from(&dir.join("rebind").join("profile.toml"))
                .map_err(|e| eyre!("failed to load profile: {}", e))?,
        ),
        None => Arc::new(ProfilePortal::new(default_profile())),
    };

    // Device identity: enumerate once per start, apply persisted overrides.
    let overrides = overrides_path()
        .map(|path| PrefixOverrides::load(&path))
        .unwrap_or_default();
    let devices = match Gilrs::new() {
        Ok(gilrs) => enumerate_devices(&gilrs),
        Err(e) => {
            warn!("device enumeration unavailable: {}", e);
            Vec::new()
        }
    };
    let resolver = Arc::new(DeviceSlotResolver::from_enumeration(&devices, overrides));

    let settings = dirs::config_dir()
        .map(|dir| CaptureSettings::load(&dir.join("rebind").join("settings.toml")))
        .unwrap_or_default();

    info!("Starting capture controller");
    let (handle, mut channels) = CaptureController::spawn(portal, resolver, settings);

    // Device source; held-modifier state would be fed by a host UI, the
    // demo has none.
    let (_modifier_tx, modifier_rx) = watch::channel(Vec::new());
    if let Err(e) = DeviceSourceHandle::spawn(
        channels.armed_rx.clone(),
        modifier_rx,
        channels.source_tx.clone(),
        channels.cancel.child_token(),
    ) {
        warn!("device source unavailable, gamepad capture disabled: {}", e);
    }

    // Demo flow: capture one input for the action named on the command line
    // and save it.
    let mut args = std::env::args().skip(1);
    let action_map = args.next().unwrap_or_else(|| "spaceship_weapons".to_string());
    let action = args.next().unwrap_or_else(|| "v_attack1_group1".to_string());

    let session = handle
        .start_capture(&action_map, &action)
        .await
        .map_err(|e| eyre!("failed to start capture: {}", e))?;
    info!(
        "Capture session {} armed for {}/{}, press an input...",
        session, action_map, action
    );

    while let Some(status) = channels.status_rx.recv().await {
        match status {
            CaptureStatus::Listening { session_id } => {
                info!("session {} listening", session_id);
            }
            CaptureStatus::CandidateAdded { candidate, .. } => {
                info!("detected: {} ({})", candidate.display_name, candidate.canonical);
            }
            CaptureStatus::AwaitingSelection { candidates, .. } => {
                for (idx, candidate) in candidates.iter().enumerate() {
                    info!(
                        "  [{}] {}{}",
                        idx,
                        candidate.display_name,
                        if candidate.is_selected { " (selected)" } else { "" }
                    );
                }
                // Headless demo: accept the pre-selected candidate.
                if let Some(selected) = candidates.iter().find(|c| c.is_selected) {
                    handle
                        .select(session, &selected.canonical)
                        .await
                        .map_err(|e| eyre!("selection failed: {}", e))?;
                }
            }
            CaptureStatus::Resolved {
                canonical,
                conflicts,
                ..
            } => {
                info!("resolved to {}", canonical);
                for conflict in &conflicts {
                    warn!(
                        "also bound to {} / {}",
                        conflict.action_map_label, conflict.action_label
                    );
                }
                if let Err(e) = handle.save(session, None, None).await {
                    error!("save failed, binding unchanged: {}", e);
                    handle.cancel(session).await.ok();
                }
            }
            CaptureStatus::NoInputDetected { session_id } => {
                warn!("session {} detected no input", session_id);
            }
            CaptureStatus::Saved { canonical, .. } => {
                info!("saved binding {}", canonical);
            }
            CaptureStatus::SaveFailed { reason, .. } => {
                error!("save failed: {}", reason);
            }
            CaptureStatus::Closed { session_id } => {
                info!("session {} closed", session_id);
                break;
            }
        }
    }

    channels.cancel.cancel();
    Ok(())
}

fn setup() -> Result<()> {
    if std::env::var("RUST_LIB_BACKTRACE").is_err() {
        std::env::set_var("RUST_LIB_BACKTRACE", "0")
    }
    color_eyre::install()?;
    if std::env::var("RUST_LOG").is_err() {
        std::env::set_var("RUST_LOG", "info")
    }
    setup_logging_env();
    Ok(())
}

fn setup_logging_env() {
    FmtSubscriber::builder()
        .with_max_level(Level::INFO)
        .with_target(false)
        .with_thread_ids(true)
        .with_file(true)
        .with_line_number(true)
        .pretty()
        .init();
}
