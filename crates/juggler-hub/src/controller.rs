use crate::actor::RegistryHandle;
use crate::bridge::{self, BridgeError, SharedBridge};
use crate::registry::RegistryNotice;
use juggler_core::Session;
use tokio::sync::{broadcast, watch};
use tracing::{debug, info, warn};

/// Reacts to registry notices by activating sessions through the bridge.
pub async fn run(
    registry: RegistryHandle,
    mut notices: broadcast::Receiver<RegistryNotice>,
    bridge: SharedBridge,
    mut shutdown: watch::Receiver<bool>,
) {
    loop {
        tokio::select! {
            changed = shutdown.changed() => {
                if changed.is_err() || *shutdown.borrow() {
                    break;
                }
            }
            notice = notices.recv() => {
                match notice {
                    Ok(notice) => handle_notice(&registry, &bridge, notice).await,
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        warn!(event = "controller_lagged", skipped);
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
        }
    }
    debug!(event = "controller_stop");
}

async fn handle_notice(registry: &RegistryHandle, bridge: &SharedBridge, notice: RegistryNotice) {
    let target = match notice {
        RegistryNotice::ShouldAdvance { key } => {
            debug!(event = "auto_advance", from = %key);
            registry.cycle_forward(true).await
        }
        RegistryNotice::ShouldRestart { key } => {
            debug!(event = "auto_restart", session = %key);
            registry
                .fetch_snapshot()
                .await
                .session(&key)
                .filter(|session| session.state.is_included_in_cycle())
                .cloned()
        }
    };
    if let Some(target) = target {
        activate(registry, bridge, &target).await;
    }
}

/// Activation runs under the registry's activation guard so the focus
/// events the terminal emits while switching do not move the cursor.
pub async fn activate(registry: &RegistryHandle, bridge: &SharedBridge, session: &Session) {
    let id = session.id();
    registry.begin_activation(id.clone()).await;
    let cycling = registry.fetch_snapshot().await.cycling;
    let result = bridge::activate_and_highlight(bridge.clone(), session, cycling).await;
    registry.end_activation().await;
    match result {
        Ok(()) => {
            info!(event = "session_activated", session = %id);
            registry.update_focused_session(Some(id)).await;
        }
        Err(BridgeError::SessionNotFound(missing)) => {
            warn!(event = "session_vanished", session = %id, terminal = %missing);
            registry.remove_session(id).await;
        }
        Err(err) => {
            warn!(event = "activation_failed", session = %id, error = %err);
        }
    }
}
