//! Single-writer task that owns the `SessionRegistry`. Everything else talks
//! to it through a cloneable `RegistryHandle`.

use crate::bridge::TerminalSessionInfo;
use crate::registry::{RegistryNotice, RegistrySnapshot, SessionRegistry, SessionUpdate};
use juggler_core::cycling::CycleDirection;
use juggler_core::{QueueOrderMode, Session, SessionState, TerminalKind};
use std::sync::Arc;
use tokio::sync::{broadcast, mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

const NOTICE_CAPACITY: usize = 64;

#[derive(Debug)]
pub enum RegistryCommand {
    AddOrUpdate(SessionUpdate),
    UpdateState {
        id: String,
        state: SessionState,
    },
    Remove {
        id: String,
    },
    RemoveByTerminalId {
        raw_id: String,
    },
    UpdateFocused {
        id: Option<String>,
    },
    BeginActivation {
        target: String,
    },
    EndActivation,
    SetTerminalAppActive(bool),
    ReconcileFocus(TerminalKind),
    Cycle {
        direction: CycleDirection,
        was_terminal_frontmost: bool,
        reply: oneshot::Sender<Option<Session>>,
    },
    CurrentSession {
        reply: oneshot::Sender<Option<Session>>,
    },
    ReorderForMode(QueueOrderMode),
    Backburner {
        id: String,
    },
    Reactivate {
        id: String,
    },
    ReactivateAll,
    Rename {
        id: String,
        name: Option<String>,
    },
    UpdateTerminalInfo {
        terminal_id: String,
        info: TerminalSessionInfo,
    },
    Snapshot {
        reply: oneshot::Sender<Arc<RegistrySnapshot>>,
    },
}

#[derive(Clone)]
pub struct RegistryHandle {
    commands: mpsc::Sender<RegistryCommand>,
    snapshots: watch::Receiver<Arc<RegistrySnapshot>>,
    notices: broadcast::Sender<RegistryNotice>,
}

/// Moves `registry` onto its own task. The task ends once every handle is
/// dropped.
pub fn spawn(registry: SessionRegistry, capacity: usize) -> (RegistryHandle, JoinHandle<()>) {
    let (command_tx, command_rx) = mpsc::channel(capacity.max(1));
    let (snapshot_tx, snapshot_rx) = watch::channel(Arc::new(registry.snapshot()));
    let (notice_tx, _) = broadcast::channel(NOTICE_CAPACITY);
    let task = tokio::spawn(run(registry, command_rx, snapshot_tx, notice_tx.clone()));
    let handle = RegistryHandle {
        commands: command_tx,
        snapshots: snapshot_rx,
        notices: notice_tx,
    };
    (handle, task)
}

async fn run(
    mut registry: SessionRegistry,
    mut commands: mpsc::Receiver<RegistryCommand>,
    snapshots: watch::Sender<Arc<RegistrySnapshot>>,
    notices: broadcast::Sender<RegistryNotice>,
) {
    info!(event = "registry_start", settings = ?registry.settings());
    while let Some(command) = commands.recv().await {
        apply(&mut registry, command);
        for notice in registry.drain_notices() {
            info!(event = "registry_notice_sent", notice = ?notice);
            // No subscriber is fine; the notice is advisory.
            let _ = notices.send(notice);
        }
        snapshots.send_replace(Arc::new(registry.snapshot()));
    }
    info!(event = "registry_stop", sessions = registry.sessions().len());
}

fn apply(registry: &mut SessionRegistry, command: RegistryCommand) {
    match command {
        RegistryCommand::AddOrUpdate(update) => registry.add_or_update_session(update),
        RegistryCommand::UpdateState { id, state } => registry.update_session_state(&id, state),
        RegistryCommand::Remove { id } => registry.remove_session(&id),
        RegistryCommand::RemoveByTerminalId { raw_id } => {
            let removed = registry.remove_sessions_by_terminal_id(&raw_id);
            debug!(event = "terminal_closed", terminal = %raw_id, removed);
        }
        RegistryCommand::UpdateFocused { id } => registry.update_focused_session(id),
        RegistryCommand::BeginActivation { target } => registry.begin_activation(target),
        RegistryCommand::EndActivation => registry.end_activation(),
        RegistryCommand::SetTerminalAppActive(active) => registry.set_terminal_app_active(active),
        RegistryCommand::ReconcileFocus(kind) => registry.reconcile_focus_for_terminal(kind),
        RegistryCommand::Cycle {
            direction,
            was_terminal_frontmost,
            reply,
        } => {
            let target = match direction {
                CycleDirection::Forward => registry.cycle_forward(was_terminal_frontmost),
                CycleDirection::Backward => registry.cycle_backward(was_terminal_frontmost),
            };
            let _ = reply.send(target);
        }
        RegistryCommand::CurrentSession { reply } => {
            let _ = reply.send(registry.current_session().cloned());
        }
        RegistryCommand::ReorderForMode(mode) => registry.reorder_for_mode(mode),
        RegistryCommand::Backburner { id } => registry.backburner_session(&id),
        RegistryCommand::Reactivate { id } => registry.reactivate_session(&id),
        RegistryCommand::ReactivateAll => registry.reactivate_all_backburnered(),
        RegistryCommand::Rename { id, name } => registry.rename_session(&id, name),
        RegistryCommand::UpdateTerminalInfo { terminal_id, info } => {
            registry.update_session_terminal_info(&terminal_id, &info);
        }
        RegistryCommand::Snapshot { reply } => {
            let _ = reply.send(Arc::new(registry.snapshot()));
        }
    }
}

impl RegistryHandle {
    async fn send(&self, command: RegistryCommand) {
        if self.commands.send(command).await.is_err() {
            warn!(event = "registry_closed");
        }
    }

    async fn request<T>(
        &self,
        build: impl FnOnce(oneshot::Sender<T>) -> RegistryCommand,
    ) -> Option<T> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.send(build(reply_tx)).await;
        reply_rx.await.ok()
    }

    pub fn subscribe_notices(&self) -> broadcast::Receiver<RegistryNotice> {
        self.notices.subscribe()
    }

    /// Latest published snapshot, without waiting for queued commands.
    pub fn snapshot(&self) -> Arc<RegistrySnapshot> {
        self.snapshots.borrow().clone()
    }

    pub fn watch_snapshots(&self) -> watch::Receiver<Arc<RegistrySnapshot>> {
        self.snapshots.clone()
    }

    /// Snapshot taken after every command queued before this call.
    pub async fn fetch_snapshot(&self) -> Arc<RegistrySnapshot> {
        match self
            .request(|reply| RegistryCommand::Snapshot { reply })
            .await
        {
            Some(snapshot) => snapshot,
            None => self.snapshot(),
        }
    }

    pub async fn add_or_update_session(&self, update: SessionUpdate) {
        self.send(RegistryCommand::AddOrUpdate(update)).await;
    }

    pub async fn update_session_state(&self, id: String, state: SessionState) {
        self.send(RegistryCommand::UpdateState { id, state }).await;
    }

    pub async fn remove_session(&self, id: String) {
        self.send(RegistryCommand::Remove { id }).await;
    }

    pub async fn remove_sessions_by_terminal_id(&self, raw_id: String) {
        self.send(RegistryCommand::RemoveByTerminalId { raw_id })
            .await;
    }

    pub async fn update_focused_session(&self, id: Option<String>) {
        self.send(RegistryCommand::UpdateFocused { id }).await;
    }

    pub async fn begin_activation(&self, target: String) {
        self.send(RegistryCommand::BeginActivation { target }).await;
    }

    pub async fn end_activation(&self) {
        self.send(RegistryCommand::EndActivation).await;
    }

    pub async fn set_terminal_app_active(&self, active: bool) {
        self.send(RegistryCommand::SetTerminalAppActive(active))
            .await;
    }

    pub async fn reconcile_focus_for_terminal(&self, kind: TerminalKind) {
        self.send(RegistryCommand::ReconcileFocus(kind)).await;
    }

    pub async fn cycle_forward(&self, was_terminal_frontmost: bool) -> Option<Session> {
        self.cycle(CycleDirection::Forward, was_terminal_frontmost)
            .await
    }

    pub async fn cycle_backward(&self, was_terminal_frontmost: bool) -> Option<Session> {
        self.cycle(CycleDirection::Backward, was_terminal_frontmost)
            .await
    }

    async fn cycle(
        &self,
        direction: CycleDirection,
        was_terminal_frontmost: bool,
    ) -> Option<Session> {
        self.request(|reply| RegistryCommand::Cycle {
            direction,
            was_terminal_frontmost,
            reply,
        })
        .await
        .flatten()
    }

    pub async fn current_session(&self) -> Option<Session> {
        self.request(|reply| RegistryCommand::CurrentSession { reply })
            .await
            .flatten()
    }

    pub async fn reorder_for_mode(&self, mode: QueueOrderMode) {
        self.send(RegistryCommand::ReorderForMode(mode)).await;
    }

    pub async fn backburner_session(&self, id: String) {
        self.send(RegistryCommand::Backburner { id }).await;
    }

    pub async fn reactivate_session(&self, id: String) {
        self.send(RegistryCommand::Reactivate { id }).await;
    }

    pub async fn reactivate_all_backburnered(&self) {
        self.send(RegistryCommand::ReactivateAll).await;
    }

    pub async fn rename_session(&self, id: String, name: Option<String>) {
        self.send(RegistryCommand::Rename { id, name }).await;
    }

    pub async fn update_session_terminal_info(
        &self,
        terminal_id: String,
        info: TerminalSessionInfo,
    ) {
        self.send(RegistryCommand::UpdateTerminalInfo { terminal_id, info }).await;
    }
}
