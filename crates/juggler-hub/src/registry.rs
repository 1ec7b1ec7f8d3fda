use crate::bridge::TerminalSessionInfo;
use chrono::{DateTime, Utc};
use juggler_core::cycling::{self, CycleDirection, CyclingState};
use juggler_core::hook_events::{HookPayload, RESUME_EVENT};
use juggler_core::stats::format_duration_ms;
use juggler_core::{
    queue_order, resolve_focus, QueueOrderMode, Session, SessionKey, SessionState, TerminalKind,
};
use serde::Serialize;
use tracing::{debug, info};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RegistrySettings {
    pub queue_order: QueueOrderMode,
    pub auto_advance: bool,
    pub auto_restart: bool,
}

impl Default for RegistrySettings {
    fn default() -> Self {
        Self {
            queue_order: QueueOrderMode::Fair,
            auto_advance: false,
            auto_restart: true,
        }
    }
}

/// Signals for the outbound controller. The registry never waits on them.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RegistryNotice {
    ShouldAdvance { key: SessionKey },
    ShouldRestart { key: SessionKey },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionUpdate {
    pub key: SessionKey,
    pub agent: String,
    pub agent_session_id: String,
    pub terminal_kind: TerminalKind,
    pub terminal_address: Option<String>,
    pub project_path: String,
    pub git_branch: Option<String>,
    pub git_repo: Option<String>,
    pub transcript_path: Option<String>,
    pub mux_session_name: Option<String>,
    pub state: SessionState,
    /// Name of the agent event that produced this update.
    pub event: String,
}

impl SessionUpdate {
    pub fn new(key: SessionKey, state: SessionState, event: impl Into<String>) -> Self {
        Self {
            key,
            agent: String::new(),
            agent_session_id: String::new(),
            terminal_kind: TerminalKind::default(),
            terminal_address: None,
            project_path: String::new(),
            git_branch: None,
            git_repo: None,
            transcript_path: None,
            mux_session_name: None,
            state,
            event: event.into(),
        }
    }

    pub fn from_hook(payload: &HookPayload, state: SessionState) -> Self {
        Self {
            key: payload.session_key(),
            agent: payload.agent.clone(),
            agent_session_id: payload.agent_session_id().to_string(),
            terminal_kind: payload.terminal_kind(),
            terminal_address: payload.terminal_address().map(str::to_string),
            project_path: payload.project_path().to_string(),
            git_branch: payload.git_branch().map(str::to_string),
            git_repo: payload.git_repo().map(str::to_string),
            transcript_path: payload.transcript_path().map(str::to_string),
            mux_session_name: payload.mux_session_name().map(str::to_string),
            state,
            event: payload.event.clone(),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct RegistrySnapshot {
    pub sessions: Vec<Session>,
    pub cycling: CyclingState,
    pub focused_id: Option<String>,
    pub anchor: Option<SessionKey>,
    pub queue_order: QueueOrderMode,
    pub terminal_app_active: bool,
}

impl RegistrySnapshot {
    pub fn session(&self, key: &SessionKey) -> Option<&Session> {
        self.sessions.iter().find(|session| session.key == *key)
    }
}

fn overwrite(slot: &mut Option<String>, value: &Option<String>) {
    if let Some(value) = value.as_ref().filter(|v| !v.is_empty()) {
        *slot = Some(value.clone());
    }
}

fn apply_passive_metadata(session: &mut Session, update: &SessionUpdate) {
    overwrite(&mut session.git_branch, &update.git_branch);
    overwrite(&mut session.git_repo, &update.git_repo);
    overwrite(&mut session.transcript_path, &update.transcript_path);
    overwrite(&mut session.mux_session_name, &update.mux_session_name);
}

/// Owns every session row and the focus/cycling cursor. Mutated from a
/// single task only; see `actor`.
#[derive(Debug, Default)]
pub struct SessionRegistry {
    settings: RegistrySettings,
    sessions: Vec<Session>,
    cycling: CyclingState,
    focused_id: Option<String>,
    anchor: Option<SessionKey>,
    activation_target: Option<String>,
    terminal_app_active: bool,
    notices: Vec<RegistryNotice>,
}

impl SessionRegistry {
    pub fn new(settings: RegistrySettings) -> Self {
        Self {
            settings,
            ..Self::default()
        }
    }

    pub fn settings(&self) -> RegistrySettings {
        self.settings
    }

    pub fn set_auto_advance(&mut self, enabled: bool) {
        self.settings.auto_advance = enabled;
    }

    pub fn set_auto_restart(&mut self, enabled: bool) {
        self.settings.auto_restart = enabled;
    }

    pub fn sessions(&self) -> &[Session] {
        &self.sessions
    }

    pub fn cycling_state(&self) -> CyclingState {
        self.cycling
    }

    pub fn focused_id(&self) -> Option<&str> {
        self.focused_id.as_deref()
    }

    pub fn anchor(&self) -> Option<&SessionKey> {
        self.anchor.as_ref()
    }

    pub fn drain_notices(&mut self) -> Vec<RegistryNotice> {
        std::mem::take(&mut self.notices)
    }

    pub fn snapshot(&self) -> RegistrySnapshot {
        RegistrySnapshot {
            sessions: self.sessions.clone(),
            cycling: self.cycling,
            focused_id: self.focused_id.clone(),
            anchor: self.anchor.clone(),
            queue_order: self.settings.queue_order,
            terminal_app_active: self.terminal_app_active,
        }
    }

    fn position(&self, key: &SessionKey) -> Option<usize> {
        self.sessions.iter().position(|session| session.key == *key)
    }

    fn position_by_id(&self, id: &str) -> Option<usize> {
        self.sessions
            .iter()
            .position(|session| session.key.is_composite_id(id))
    }

    pub fn session(&self, id: &str) -> Option<&Session> {
        self.position_by_id(id).map(|index| &self.sessions[index])
    }

    fn focused_index(&self) -> Option<usize> {
        self.focused_id
            .as_deref()
            .and_then(|focused| resolve_focus(&self.sessions, focused))
    }

    fn is_focused(&self, key: &SessionKey) -> bool {
        self.focused_index()
            .is_some_and(|index| self.sessions[index].key == *key)
    }

    pub fn cyclable_sessions(&self) -> Vec<&Session> {
        self.sessions
            .iter()
            .filter(|session| session.state.is_included_in_cycle())
            .collect()
    }

    fn cyclable_count(&self) -> usize {
        self.sessions
            .iter()
            .filter(|session| session.state.is_included_in_cycle())
            .count()
    }

    fn sync_cursor(&mut self) {
        self.cycling =
            cycling::sync_to_focus(&self.sessions, self.focused_id.as_deref(), self.cycling);
    }

    pub fn add_or_update_session(&mut self, update: SessionUpdate) {
        self.add_or_update_session_at(update, Utc::now());
    }

    pub fn add_or_update_session_at(&mut self, update: SessionUpdate, now: DateTime<Utc>) {
        if let Some(index) = self.position(&update.key) {
            let session = &mut self.sessions[index];
            apply_passive_metadata(session, &update);
            session.last_updated = now;
            if session.state == SessionState::Backburner && update.event != RESUME_EVENT {
                debug!(
                    event = "backburner_preserved",
                    session = %session.key,
                    hook_event = %update.event
                );
                return;
            }
            if !update.agent_session_id.is_empty() {
                session.agent_session_id = update.agent_session_id;
            }
            if update.terminal_address.is_some() {
                session.terminal_address = update.terminal_address;
            }
            let old = session.state;
            if old != update.state {
                self.apply_state_change(index, old, update.state, now);
            }
            return;
        }

        let mut session = Session::new(
            update.key.clone(),
            update.agent.clone(),
            update.project_path.clone(),
            update.state,
            now,
        );
        session.agent_session_id = update.agent_session_id.clone();
        session.terminal_kind = update.terminal_kind;
        session.terminal_address = update.terminal_address.clone();
        apply_passive_metadata(&mut session, &update);
        info!(
            event = "session_added",
            session = %session.key,
            name = %session.display_name(),
            agent = %session.agent,
            state = %session.state,
            terminal = %session.terminal_kind
        );
        let cyclable = session.state.is_included_in_cycle();
        self.sessions.push(session);

        if self.is_focused(&update.key) {
            self.sync_cursor();
        }
        if cyclable && self.settings.auto_restart && self.cyclable_count() == 1 {
            self.emit(RegistryNotice::ShouldRestart { key: update.key });
        }
    }

    pub fn update_session_state(&mut self, id: &str, state: SessionState) {
        self.update_session_state_at(id, state, Utc::now());
    }

    pub fn update_session_state_at(&mut self, id: &str, state: SessionState, now: DateTime<Utc>) {
        let Some(index) = self.position_by_id(id) else {
            return;
        };
        let old = self.sessions[index].state;
        self.sessions[index].last_updated = now;
        if old != state {
            self.apply_state_change(index, old, state, now);
        }
    }

    fn apply_state_change(
        &mut self,
        index: usize,
        old: SessionState,
        new: SessionState,
        now: DateTime<Utc>,
    ) {
        let session = &mut self.sessions[index];
        let was_cyclable = old.is_included_in_cycle();
        let is_cyclable = new.is_included_in_cycle();

        if was_cyclable && !is_cyclable {
            if let Some(since) = session.last_became_idle {
                session.accumulated_idle_ms += (now - since).num_milliseconds().max(0);
            }
        } else if !was_cyclable && is_cyclable {
            session.last_became_idle = Some(now);
        }
        if old.is_busy() && !new.is_busy() {
            if let Some(since) = session.last_became_working {
                session.accumulated_working_ms += (now - since).num_milliseconds().max(0);
            }
        } else if !old.is_busy() && new.is_busy() {
            session.last_became_working = Some(now);
        }
        session.state = new;
        let key = session.key.clone();
        debug!(event = "session_state_change", session = %key, from = %old, to = %new);

        if let Some(slot) = queue_order::transition_slot(self.settings.queue_order, old, new) {
            queue_order::relocate(&mut self.sessions, index, slot);
        }

        // Snoozing is a deliberate move away from the session.
        if was_cyclable && !is_cyclable && new != SessionState::Backburner && self.is_focused(&key)
        {
            if self.settings.auto_advance {
                self.emit(RegistryNotice::ShouldAdvance { key: key.clone() });
            } else {
                debug!(event = "anchor_set", session = %key);
                self.anchor = Some(key.clone());
            }
        }
        if is_cyclable && self.anchor.as_ref() == Some(&key) {
            self.anchor = None;
        }
        if !was_cyclable && is_cyclable && self.settings.auto_restart && self.cyclable_count() == 1
        {
            self.emit(RegistryNotice::ShouldRestart { key });
        }
    }

    fn emit(&mut self, notice: RegistryNotice) {
        debug!(event = "registry_notice", notice = ?notice);
        self.notices.push(notice);
    }

    pub fn remove_session(&mut self, id: &str) {
        let Some(index) = self.position_by_id(id) else {
            return;
        };
        let removed = self.sessions.remove(index);
        self.forget(&removed, Utc::now());
    }

    /// Removes every session hosted by the terminal `raw_id`, including
    /// multiplexer panes keyed under it.
    pub fn remove_sessions_by_terminal_id(&mut self, raw_id: &str) -> usize {
        if raw_id.is_empty() {
            return 0;
        }
        let (removed, kept): (Vec<Session>, Vec<Session>) = std::mem::take(&mut self.sessions)
            .into_iter()
            .partition(|session| session.key.matches_terminal(raw_id));
        self.sessions = kept;
        let now = Utc::now();
        for session in &removed {
            self.forget(session, now);
        }
        removed.len()
    }

    fn forget(&mut self, removed: &Session, now: DateTime<Utc>) {
        info!(
            event = "session_removed",
            session = %removed.key,
            name = %removed.display_name(),
            idle = %format_duration_ms(removed.total_idle_ms(now)),
            working = %format_duration_ms(removed.total_working_ms(now))
        );
        let focus_lost = self.focused_id.as_deref().is_some_and(|focused| {
            removed.key.matches_focus(focused) && resolve_focus(&self.sessions, focused).is_none()
        });
        if focus_lost {
            self.focused_id = None;
        }
        if self.anchor.as_ref() == Some(&removed.key) {
            self.anchor = None;
        }
    }

    /// Records the session the terminal reports as focused. While an
    /// activation is in flight, reports for other sessions are dropped.
    pub fn update_focused_session(&mut self, id: Option<String>) {
        let id = id.filter(|value| !value.is_empty());
        if let (Some(target), Some(reported)) = (self.activation_target.as_deref(), id.as_deref())
        {
            let same_row = reported == target
                || resolve_focus(&self.sessions, reported)
                    .is_some_and(|row| Some(row) == resolve_focus(&self.sessions, target));
            if !same_row {
                debug!(event = "focus_suppressed", reported = %reported, target = %target);
                return;
            }
        }
        self.focused_id = id;
        self.sync_cursor();
    }

    pub fn begin_activation(&mut self, target: String) {
        self.activation_target = Some(target);
    }

    pub fn end_activation(&mut self) {
        self.activation_target = None;
    }

    pub fn set_terminal_app_active(&mut self, active: bool) {
        self.terminal_app_active = active;
    }

    pub fn is_session_focused(&self) -> bool {
        self.terminal_app_active && self.focused_index().is_some()
    }

    /// Points focus at the first session of `kind` when that terminal came
    /// to front without reporting which of its windows is focused.
    pub fn reconcile_focus_for_terminal(&mut self, kind: TerminalKind) {
        if !kind.reconciles_focus_on_activation() {
            return;
        }
        if let Some(index) = self.focused_index() {
            if self.sessions[index].terminal_kind == kind {
                return;
            }
        }
        let Some(first) = self
            .sessions
            .iter()
            .find(|session| session.terminal_kind == kind)
        else {
            return;
        };
        self.focused_id = Some(first.id());
        self.sync_cursor();
    }

    pub fn cycle_forward(&mut self, was_terminal_frontmost: bool) -> Option<Session> {
        self.cycle(CycleDirection::Forward, was_terminal_frontmost)
    }

    pub fn cycle_backward(&mut self, was_terminal_frontmost: bool) -> Option<Session> {
        self.cycle(CycleDirection::Backward, was_terminal_frontmost)
    }

    fn cycle(
        &mut self,
        direction: CycleDirection,
        was_terminal_frontmost: bool,
    ) -> Option<Session> {
        // Coming from another app the first press only brings the focused
        // session back.
        if !was_terminal_frontmost {
            if let Some(index) = self.focused_index() {
                let session = &self.sessions[index];
                if session.state.is_included_in_cycle() {
                    debug!(event = "cycle_snap_back", session = %session.key);
                    return Some(session.clone());
                }
            }
        }

        let anchor = self.anchor.take().map(|key| key.to_string());
        let focus = anchor.or_else(|| self.focused_id.clone());
        let outcome = cycling::cycle(&self.sessions, focus.as_deref(), self.cycling, direction);
        let target = outcome.target.cloned();
        self.cycling = outcome.state;
        if let Some(target) = &target {
            debug!(
                event = "cycle",
                direction = ?direction,
                session = %target.key,
                color = outcome.state.highlight_color_index
            );
            self.focused_id = Some(target.id());
        }
        target
    }

    pub fn current_session(&self) -> Option<&Session> {
        if !self.settings.auto_advance {
            if let Some(index) = self.anchor.as_ref().and_then(|key| self.position(key)) {
                return Some(&self.sessions[index]);
            }
        }
        let cyclable = self.cyclable_sessions();
        if cyclable.is_empty() {
            return None;
        }
        if let Some(index) = self
            .focused_id
            .as_deref()
            .and_then(|focused| resolve_focus(&cyclable, focused))
        {
            return Some(cyclable[index]);
        }
        Some(cyclable[self.cycling.current_index % cyclable.len()])
    }

    pub fn reorder_for_mode(&mut self, mode: QueueOrderMode) {
        self.settings.queue_order = mode;
        queue_order::reorder(&mut self.sessions, mode);
        self.sync_cursor();
        info!(event = "queue_reordered", mode = %mode, sessions = self.sessions.len());
    }

    pub fn backburner_session(&mut self, id: &str) {
        self.update_session_state(id, SessionState::Backburner);
    }

    pub fn reactivate_session(&mut self, id: &str) {
        self.reactivate_session_at(id, Utc::now());
    }

    fn reactivate_session_at(&mut self, id: &str, now: DateTime<Utc>) {
        let backburnered = self
            .session(id)
            .is_some_and(|session| session.state == SessionState::Backburner);
        if backburnered {
            self.update_session_state_at(id, SessionState::Idle, now);
        }
    }

    pub fn reactivate_all_backburnered(&mut self) {
        let now = Utc::now();
        let ids: Vec<String> = self
            .sessions
            .iter()
            .filter(|session| session.state == SessionState::Backburner)
            .map(Session::id)
            .collect();
        for id in ids {
            self.reactivate_session_at(&id, now);
        }
    }

    /// Sets or clears (with `None` or an empty name) the user-chosen name.
    pub fn rename_session(&mut self, id: &str, name: Option<String>) {
        let Some(index) = self.position_by_id(id) else {
            return;
        };
        self.sessions[index].custom_name = name.filter(|value| !value.is_empty());
    }

    /// Applies bridge-reported tab/pane details to every session in the
    /// terminal. Sessions removed in the meantime are simply not found.
    pub fn update_session_terminal_info(
        &mut self,
        terminal_id: &str,
        info: &TerminalSessionInfo,
    ) -> usize {
        let mut updated = 0;
        for session in self
            .sessions
            .iter_mut()
            .filter(|session| session.key.terminal_id == terminal_id)
        {
            if !info.tab_name.is_empty() {
                session.tab_name = Some(info.tab_name.clone());
            }
            overwrite(&mut session.window_name, &info.window_name);
            session.pane_index = info.pane_index;
            session.pane_count = info.pane_count.max(1);
            updated += 1;
        }
        if updated == 0 {
            debug!(event = "terminal_info_orphaned", terminal = %terminal_id);
        }
        updated
    }

    /// Display name with a ` (n)` suffix when other sessions share it,
    /// numbered by pane position.
    pub fn disambiguated_display_name(&self, session: &Session) -> String {
        let name = session.display_name();
        let mut twins: Vec<&Session> = self
            .sessions
            .iter()
            .filter(|other| other.display_name() == name)
            .collect();
        if twins.len() <= 1 {
            return name.to_string();
        }
        twins.sort_by_key(|other| other.pane_index);
        match twins.iter().position(|other| other.key == session.key) {
            Some(position) => format!("{name} ({})", position + 1),
            None => name.to_string(),
        }
    }
}
