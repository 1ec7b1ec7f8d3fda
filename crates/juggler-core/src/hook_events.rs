use crate::{SessionKey, SessionState, TerminalKind};
use serde::{Deserialize, Serialize};
use thiserror::Error;

pub const CLAUDE_CODE_AGENT: &str = "claude-code";
pub const OPENCODE_AGENT: &str = "opencode";

/// The event that signals the user answered a session, used to detect a
/// backburnered session being picked up again.
pub const RESUME_EVENT: &str = "UserPromptSubmit";

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct HookPayload {
    pub agent: String,
    pub event: String,
    #[serde(default, rename = "hookInput")]
    pub hook_input: Option<HookInput>,
    #[serde(default)]
    pub terminal: Option<TerminalInfo>,
    #[serde(default)]
    pub git: Option<GitInfo>,
    #[serde(default)]
    pub tmux: Option<TmuxInfo>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct HookInput {
    #[serde(default)]
    pub session_id: Option<String>,
    #[serde(default)]
    pub transcript_path: Option<String>,
    #[serde(default)]
    pub tool_name: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct TerminalInfo {
    #[serde(default)]
    pub session_id: Option<String>,
    #[serde(default)]
    pub cwd: Option<String>,
    #[serde(default)]
    pub terminal_type: Option<String>,
    #[serde(default)]
    pub kitty_listen_on: Option<String>,
    #[serde(default)]
    pub kitty_pid: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct GitInfo {
    #[serde(default)]
    pub branch: Option<String>,
    #[serde(default)]
    pub repo: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct TmuxInfo {
    #[serde(default)]
    pub pane: Option<String>,
    #[serde(default)]
    pub session_name: Option<String>,
}

fn non_empty(value: &Option<String>) -> Option<&str> {
    value.as_deref().filter(|v| !v.is_empty())
}

impl HookPayload {
    pub fn terminal_id(&self) -> &str {
        self.terminal
            .as_ref()
            .and_then(|t| non_empty(&t.session_id))
            .unwrap_or("")
    }

    pub fn pane(&self) -> Option<&str> {
        self.tmux.as_ref().and_then(|t| non_empty(&t.pane))
    }

    pub fn session_key(&self) -> SessionKey {
        SessionKey::new(self.terminal_id(), self.pane().map(str::to_string))
    }

    pub fn agent_session_id(&self) -> &str {
        self.hook_input
            .as_ref()
            .and_then(|h| non_empty(&h.session_id))
            .unwrap_or("")
    }

    pub fn project_path(&self) -> &str {
        self.terminal
            .as_ref()
            .and_then(|t| non_empty(&t.cwd))
            .unwrap_or("")
    }

    /// Unrecognised or missing terminal types fall back to the default kind.
    pub fn terminal_kind(&self) -> TerminalKind {
        self.terminal
            .as_ref()
            .and_then(|t| non_empty(&t.terminal_type))
            .and_then(|value| value.parse().ok())
            .unwrap_or_default()
    }

    pub fn terminal_address(&self) -> Option<&str> {
        self.terminal
            .as_ref()
            .and_then(|t| non_empty(&t.kitty_listen_on))
    }

    pub fn transcript_path(&self) -> Option<&str> {
        self.hook_input
            .as_ref()
            .and_then(|h| non_empty(&h.transcript_path))
    }

    pub fn git_branch(&self) -> Option<&str> {
        self.git.as_ref().and_then(|g| non_empty(&g.branch))
    }

    pub fn git_repo(&self) -> Option<&str> {
        self.git.as_ref().and_then(|g| non_empty(&g.repo))
    }

    pub fn mux_session_name(&self) -> Option<&str> {
        self.tmux.as_ref().and_then(|t| non_empty(&t.session_name))
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct KittyEvent {
    pub event: String,
    pub window_id: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KittyEventKind {
    FocusChanged,
    SessionTerminated,
    Other,
}

impl KittyEvent {
    pub fn kind(&self) -> KittyEventKind {
        match self.event.as_str() {
            "focus_changed" => KittyEventKind::FocusChanged,
            "session_terminated" => KittyEventKind::SessionTerminated,
            _ => KittyEventKind::Other,
        }
    }
}

#[derive(Debug, Error)]
pub enum DecodeError {
    #[error("invalid JSON: {0}")]
    InvalidJson(#[from] serde_json::Error),
}

pub fn decode_hook_payload(body: &str) -> Result<HookPayload, DecodeError> {
    Ok(serde_json::from_str(body)?)
}

pub fn decode_kitty_event(body: &str) -> Result<KittyEvent, DecodeError> {
    Ok(serde_json::from_str(body)?)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HookAction {
    UpdateState(SessionState),
    RemoveSession,
    Ignore,
}

type EventTable = &'static [(&'static str, HookAction)];

const CLAUDE_CODE_EVENTS: EventTable = &[
    ("SessionStart", HookAction::UpdateState(SessionState::Idle)),
    ("Stop", HookAction::UpdateState(SessionState::Idle)),
    ("UserPromptSubmit", HookAction::UpdateState(SessionState::Working)),
    ("PreToolUse", HookAction::UpdateState(SessionState::Working)),
    ("PostToolUse", HookAction::UpdateState(SessionState::Working)),
    ("PostToolUseFailure", HookAction::UpdateState(SessionState::Working)),
    ("SubagentStart", HookAction::UpdateState(SessionState::Working)),
    ("SubagentStop", HookAction::Ignore),
    ("PermissionRequest", HookAction::UpdateState(SessionState::Permission)),
    ("PreCompact", HookAction::UpdateState(SessionState::Compacting)),
    ("SessionEnd", HookAction::RemoveSession),
];

const OPENCODE_EVENTS: EventTable = &[
    ("session.created", HookAction::UpdateState(SessionState::Idle)),
    ("session.status.idle", HookAction::UpdateState(SessionState::Idle)),
    ("session.status.busy", HookAction::UpdateState(SessionState::Working)),
    ("session.status.retry", HookAction::UpdateState(SessionState::Working)),
    ("permission.asked", HookAction::UpdateState(SessionState::Permission)),
    ("session.compacted", HookAction::UpdateState(SessionState::Compacting)),
    ("session.deleted", HookAction::RemoveSession),
    ("server.instance.disposed", HookAction::RemoveSession),
];

fn event_table(agent: &str) -> EventTable {
    match agent {
        OPENCODE_AGENT => OPENCODE_EVENTS,
        _ => CLAUDE_CODE_EVENTS,
    }
}

/// Maps an agent event to the registry action it implies. Agents without a
/// table of their own use the claude-code table; unknown events are ignored.
pub fn map_event(event: &str, agent: &str) -> HookAction {
    event_table(agent)
        .iter()
        .find(|(name, _)| *name == event)
        .map(|(_, action)| *action)
        .unwrap_or(HookAction::Ignore)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decodes_full_hook_payload() {
        let body = r#"{
            "agent": "claude-code",
            "event": "PreToolUse",
            "hookInput": {"session_id": "abc", "transcript_path": "/tmp/t.jsonl", "tool_name": "Bash"},
            "terminal": {"sessionId": "w0t0p0:uuid", "cwd": "/Users/dev/api", "terminalType": "kitty", "kittyListenOn": "unix:/tmp/kitty", "kittyPid": "123"},
            "git": {"branch": "main", "repo": "api"},
            "tmux": {"pane": "%3", "sessionName": "work"}
        }"#;
        let payload = decode_hook_payload(body).expect("decode");
        assert_eq!(payload.session_key().to_string(), "w0t0p0:uuid:%3");
        assert_eq!(payload.agent_session_id(), "abc");
        assert_eq!(payload.project_path(), "/Users/dev/api");
        assert_eq!(payload.terminal_kind(), TerminalKind::Kitty);
        assert_eq!(payload.terminal_address(), Some("unix:/tmp/kitty"));
        assert_eq!(payload.git_branch(), Some("main"));
        assert_eq!(payload.mux_session_name(), Some("work"));
        assert_eq!(
            payload.hook_input.and_then(|h| h.tool_name).as_deref(),
            Some("Bash")
        );
    }

    #[test]
    fn minimal_payload_defaults_optional_groups() {
        let payload =
            decode_hook_payload(r#"{"agent":"claude-code","event":"Stop"}"#).expect("decode");
        assert_eq!(payload.terminal_id(), "");
        assert_eq!(payload.session_key(), SessionKey::terminal(""));
        assert_eq!(payload.terminal_kind(), TerminalKind::Iterm2);
        assert_eq!(payload.git_branch(), None);
    }

    #[test]
    fn empty_tmux_pane_yields_plain_key() {
        let payload = decode_hook_payload(
            r#"{"agent":"claude-code","event":"Stop","terminal":{"sessionId":"t1"},"tmux":{"pane":""}}"#,
        )
        .expect("decode");
        assert_eq!(payload.session_key().to_string(), "t1");
    }

    #[test]
    fn rejects_missing_required_fields_and_bad_json() {
        assert!(decode_hook_payload(r#"{"agent":"claude-code"}"#).is_err());
        assert!(decode_hook_payload("not json").is_err());
        assert!(decode_kitty_event(r#"{"event":"focus_changed"}"#).is_err());
    }

    #[test]
    fn kitty_event_kinds() {
        let event =
            decode_kitty_event(r#"{"event":"focus_changed","window_id":"7"}"#).expect("decode");
        assert_eq!(event.kind(), KittyEventKind::FocusChanged);
        let event = KittyEvent {
            event: "session_terminated".to_string(),
            window_id: "7".to_string(),
        };
        assert_eq!(event.kind(), KittyEventKind::SessionTerminated);
        let event = KittyEvent {
            event: "resize".to_string(),
            window_id: "7".to_string(),
        };
        assert_eq!(event.kind(), KittyEventKind::Other);
    }

    #[test]
    fn claude_code_event_table() {
        let agent = CLAUDE_CODE_AGENT;
        assert_eq!(map_event("SessionStart", agent), HookAction::UpdateState(SessionState::Idle));
        assert_eq!(map_event("Stop", agent), HookAction::UpdateState(SessionState::Idle));
        assert_eq!(
            map_event("PostToolUseFailure", agent),
            HookAction::UpdateState(SessionState::Working)
        );
        assert_eq!(
            map_event("PermissionRequest", agent),
            HookAction::UpdateState(SessionState::Permission)
        );
        assert_eq!(
            map_event("PreCompact", agent),
            HookAction::UpdateState(SessionState::Compacting)
        );
        assert_eq!(map_event("SubagentStop", agent), HookAction::Ignore);
        assert_eq!(map_event("SessionEnd", agent), HookAction::RemoveSession);
        assert_eq!(map_event("Notification", agent), HookAction::Ignore);
    }

    #[test]
    fn opencode_event_table() {
        assert_eq!(
            map_event("session.status.busy", OPENCODE_AGENT),
            HookAction::UpdateState(SessionState::Working)
        );
        assert_eq!(
            map_event("permission.asked", OPENCODE_AGENT),
            HookAction::UpdateState(SessionState::Permission)
        );
        assert_eq!(
            map_event("server.instance.disposed", OPENCODE_AGENT),
            HookAction::RemoveSession
        );
        assert_eq!(map_event("Stop", OPENCODE_AGENT), HookAction::Ignore);
    }

    #[test]
    fn unknown_agent_uses_claude_code_table() {
        assert_eq!(
            map_event(RESUME_EVENT, "some-future-agent"),
            HookAction::UpdateState(SessionState::Working)
        );
    }
}
