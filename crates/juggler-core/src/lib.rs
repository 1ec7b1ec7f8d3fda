pub mod cycling;
pub mod hook_events;
pub mod http_frame;
pub mod queue_order;
pub mod stats;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::borrow::Borrow;
use std::fmt;
use std::str::FromStr;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum SessionState {
    Working,
    Idle,
    Permission,
    Backburner,
    Compacting,
}

impl SessionState {
    pub fn as_str(&self) -> &'static str {
        match self {
            SessionState::Working => "working",
            SessionState::Idle => "idle",
            SessionState::Permission => "permission",
            SessionState::Backburner => "backburner",
            SessionState::Compacting => "compacting",
        }
    }

    /// Sessions in these states wait on the user and take part in cycling.
    pub fn is_included_in_cycle(&self) -> bool {
        matches!(self, SessionState::Idle | SessionState::Permission)
    }

    pub fn is_busy(&self) -> bool {
        matches!(self, SessionState::Working | SessionState::Compacting)
    }
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SessionState {
    type Err = String;

    fn from_str(input: &str) -> Result<Self, Self::Err> {
        match input.trim().to_lowercase().as_str() {
            "working" => Ok(SessionState::Working),
            "idle" => Ok(SessionState::Idle),
            "permission" => Ok(SessionState::Permission),
            "backburner" => Ok(SessionState::Backburner),
            "compacting" => Ok(SessionState::Compacting),
            other => Err(format!("Unknown session state: {other}")),
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, Default)]
#[serde(rename_all = "lowercase")]
pub enum QueueOrderMode {
    /// Sessions returning to idle go to the end of the idle bucket.
    #[default]
    Fair,
    /// Sessions returning to idle go to the top of the list.
    Prio,
    Static,
    /// Static ordering; grouping by window happens in the view.
    Grouped,
}

impl QueueOrderMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            QueueOrderMode::Fair => "fair",
            QueueOrderMode::Prio => "prio",
            QueueOrderMode::Static => "static",
            QueueOrderMode::Grouped => "grouped",
        }
    }

    pub fn reorders_on_events(&self) -> bool {
        matches!(self, QueueOrderMode::Fair | QueueOrderMode::Prio)
    }
}

impl fmt::Display for QueueOrderMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for QueueOrderMode {
    type Err = String;

    fn from_str(input: &str) -> Result<Self, Self::Err> {
        match input.trim().to_lowercase().as_str() {
            "fair" | "filo" => Ok(QueueOrderMode::Fair),
            "prio" | "fifo" => Ok(QueueOrderMode::Prio),
            "static" => Ok(QueueOrderMode::Static),
            "grouped" => Ok(QueueOrderMode::Grouped),
            other => Err(format!("Unknown queue order mode: {other}")),
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, Default)]
#[serde(rename_all = "lowercase")]
pub enum TerminalKind {
    #[default]
    Iterm2,
    Kitty,
    Ghostty,
    Wezterm,
}

impl TerminalKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            TerminalKind::Iterm2 => "iterm2",
            TerminalKind::Kitty => "kitty",
            TerminalKind::Ghostty => "ghostty",
            TerminalKind::Wezterm => "wezterm",
        }
    }

    /// Kitty does not report the focused window when the app itself is
    /// brought to front, so focus has to be reconciled on activation.
    pub fn reconciles_focus_on_activation(&self) -> bool {
        matches!(self, TerminalKind::Kitty)
    }
}

impl fmt::Display for TerminalKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TerminalKind {
    type Err = String;

    fn from_str(input: &str) -> Result<Self, Self::Err> {
        match input.trim().to_lowercase().as_str() {
            "iterm2" | "iterm" => Ok(TerminalKind::Iterm2),
            "kitty" => Ok(TerminalKind::Kitty),
            "ghostty" => Ok(TerminalKind::Ghostty),
            "wezterm" => Ok(TerminalKind::Wezterm),
            other => Err(format!("Unknown terminal kind: {other}")),
        }
    }
}

/// Composite identity of a session: the terminal session that hosts the
/// agent, optionally narrowed to a multiplexer pane inside it. The string
/// form `terminal:pane` only exists at the wire boundary.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub struct SessionKey {
    pub terminal_id: String,
    #[serde(default)]
    pub pane: Option<String>,
}

/// How specifically a reported id addressed a session, most specific first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum FocusMatch {
    Exact,
    Terminal,
    TerminalSuffix,
}

const FOCUS_MATCH_ORDER: [FocusMatch; 3] = [
    FocusMatch::Exact,
    FocusMatch::Terminal,
    FocusMatch::TerminalSuffix,
];

impl SessionKey {
    pub fn new(terminal_id: impl Into<String>, pane: Option<String>) -> Self {
        Self {
            terminal_id: terminal_id.into(),
            pane: pane.filter(|value| !value.is_empty()),
        }
    }

    pub fn terminal(terminal_id: impl Into<String>) -> Self {
        Self::new(terminal_id, None)
    }

    /// True when `id` is this key's string form.
    pub fn is_composite_id(&self, id: &str) -> bool {
        match &self.pane {
            None => self.terminal_id == id,
            Some(pane) => id
                .strip_suffix(pane.as_str())
                .and_then(|rest| rest.strip_suffix(':'))
                .is_some_and(|terminal| terminal == self.terminal_id),
        }
    }

    pub fn focus_match(&self, reported: &str) -> Option<FocusMatch> {
        if reported.is_empty() {
            return None;
        }
        if self.is_composite_id(reported) {
            Some(FocusMatch::Exact)
        } else if self.terminal_id == reported {
            Some(FocusMatch::Terminal)
        } else if self.terminal_id.ends_with(reported) {
            Some(FocusMatch::TerminalSuffix)
        } else {
            None
        }
    }

    pub fn matches_focus(&self, reported: &str) -> bool {
        self.focus_match(reported).is_some()
    }

    /// Terminal-close matching: exact terminal id, or a terminal id whose
    /// last `:`-separated segment is `raw_id`.
    pub fn matches_terminal(&self, raw_id: &str) -> bool {
        if raw_id.is_empty() {
            return false;
        }
        self.terminal_id == raw_id
            || self
                .terminal_id
                .strip_suffix(raw_id)
                .is_some_and(|rest| rest.ends_with(':'))
    }
}

impl fmt::Display for SessionKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.pane {
            Some(pane) => write!(f, "{}:{}", self.terminal_id, pane),
            None => f.write_str(&self.terminal_id),
        }
    }
}

/// Resolves a reported focus id against `sessions`, trying every session at
/// one tier before falling back to the next less specific tier.
pub fn resolve_focus<S: Borrow<Session>>(sessions: &[S], reported: &str) -> Option<usize> {
    if reported.is_empty() {
        return None;
    }
    FOCUS_MATCH_ORDER.iter().find_map(|tier| {
        sessions
            .iter()
            .position(|session| session.borrow().key.focus_match(reported) == Some(*tier))
    })
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Session {
    pub key: SessionKey,
    pub agent: String,
    pub agent_session_id: String,
    pub terminal_kind: TerminalKind,
    #[serde(default)]
    pub terminal_address: Option<String>,
    pub project_path: String,
    #[serde(default)]
    pub tab_name: Option<String>,
    #[serde(default)]
    pub window_name: Option<String>,
    #[serde(default)]
    pub custom_name: Option<String>,
    #[serde(default)]
    pub git_branch: Option<String>,
    #[serde(default)]
    pub git_repo: Option<String>,
    #[serde(default)]
    pub transcript_path: Option<String>,
    #[serde(default)]
    pub mux_session_name: Option<String>,
    pub state: SessionState,
    pub started_at: DateTime<Utc>,
    pub last_updated: DateTime<Utc>,
    #[serde(default)]
    pub last_became_idle: Option<DateTime<Utc>>,
    #[serde(default)]
    pub last_became_working: Option<DateTime<Utc>>,
    #[serde(default)]
    pub accumulated_idle_ms: i64,
    #[serde(default)]
    pub accumulated_working_ms: i64,
    #[serde(default)]
    pub pane_index: u32,
    #[serde(default = "default_pane_count")]
    pub pane_count: u32,
}

fn default_pane_count() -> u32 {
    1
}

impl Session {
    pub fn new(
        key: SessionKey,
        agent: impl Into<String>,
        project_path: impl Into<String>,
        state: SessionState,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            key,
            agent: agent.into(),
            agent_session_id: String::new(),
            terminal_kind: TerminalKind::default(),
            terminal_address: None,
            project_path: project_path.into(),
            tab_name: None,
            window_name: None,
            custom_name: None,
            git_branch: None,
            git_repo: None,
            transcript_path: None,
            mux_session_name: None,
            state,
            started_at: now,
            last_updated: now,
            last_became_idle: state.is_included_in_cycle().then_some(now),
            last_became_working: state.is_busy().then_some(now),
            accumulated_idle_ms: 0,
            accumulated_working_ms: 0,
            pane_index: 0,
            pane_count: 1,
        }
    }

    pub fn id(&self) -> String {
        self.key.to_string()
    }

    pub fn project_folder_name(&self) -> &str {
        self.project_path
            .split('/')
            .rfind(|segment| !segment.is_empty())
            .unwrap_or("Unknown")
    }

    pub fn display_name(&self) -> &str {
        if let Some(name) = self.custom_name.as_deref() {
            return name;
        }
        let contextual = if self.key.pane.is_some() {
            self.mux_session_name.as_deref()
        } else {
            self.tab_name.as_deref()
        };
        contextual.unwrap_or_else(|| self.project_folder_name())
    }

    pub fn full_display_name(&self) -> String {
        if self.pane_count > 1 {
            format!(
                "{} ({}/{})",
                self.display_name(),
                self.pane_index + 1,
                self.pane_count
            )
        } else {
            self.display_name().to_string()
        }
    }

    pub fn current_idle_ms(&self, now: DateTime<Utc>) -> Option<i64> {
        if !self.state.is_included_in_cycle() {
            return None;
        }
        self.last_became_idle
            .map(|since| (now - since).num_milliseconds().max(0))
    }

    pub fn total_idle_ms(&self, now: DateTime<Utc>) -> i64 {
        self.accumulated_idle_ms + self.current_idle_ms(now).unwrap_or(0)
    }

    pub fn current_working_ms(&self, now: DateTime<Utc>) -> Option<i64> {
        if !self.state.is_busy() {
            return None;
        }
        self.last_became_working
            .map(|since| (now - since).num_milliseconds().max(0))
    }

    pub fn total_working_ms(&self, now: DateTime<Utc>) -> i64 {
        self.accumulated_working_ms + self.current_working_ms(now).unwrap_or(0)
    }
}

// Timing fields change on every event and are left out so that change
// detection only fires on visible differences.
impl PartialEq for Session {
    fn eq(&self, other: &Self) -> bool {
        self.key == other.key
            && self.agent == other.agent
            && self.agent_session_id == other.agent_session_id
            && self.terminal_kind == other.terminal_kind
            && self.terminal_address == other.terminal_address
            && self.project_path == other.project_path
            && self.tab_name == other.tab_name
            && self.window_name == other.window_name
            && self.custom_name == other.custom_name
            && self.git_branch == other.git_branch
            && self.git_repo == other.git_repo
            && self.transcript_path == other.transcript_path
            && self.mux_session_name == other.mux_session_name
            && self.state == other.state
            && self.started_at == other.started_at
            && self.pane_index == other.pane_index
            && self.pane_count == other.pane_count
    }
}

impl Eq for Session {}
