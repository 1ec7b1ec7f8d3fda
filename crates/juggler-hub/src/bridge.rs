use juggler_core::cycling::CyclingState;
use juggler_core::{Session, TerminalKind};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

const TAB_HIGHLIGHT_DURATION: Duration = Duration::from_millis(2000);
const PANE_HIGHLIGHT_DURATION: Duration = Duration::from_millis(1000);

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TerminalSessionInfo {
    pub tab_name: String,
    pub window_name: Option<String>,
    pub pane_index: u32,
    pub pane_count: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HighlightStyle {
    pub color: [u8; 3],
    pub duration: Duration,
}

#[derive(Debug, Error)]
pub enum BridgeError {
    #[error("no terminal bridge configured for {0}")]
    Unavailable(TerminalKind),
    #[error("terminal session not found: {0}")]
    SessionNotFound(String),
    #[error("bridge command failed: {0}")]
    CommandFailed(String),
}

/// Terminal automation behind session activation and tab/pane lookups.
/// Implementations may block; callers run them on the blocking pool.
pub trait TerminalBridge: Send + Sync {
    fn activate(&self, kind: TerminalKind, terminal_id: &str) -> Result<(), BridgeError>;

    fn highlight(
        &self,
        kind: TerminalKind,
        terminal_id: &str,
        tab: Option<HighlightStyle>,
        pane: Option<HighlightStyle>,
    ) -> Result<(), BridgeError>;

    fn session_info(
        &self,
        kind: TerminalKind,
        terminal_id: &str,
    ) -> Result<Option<TerminalSessionInfo>, BridgeError>;
}

/// Bridge used when no terminal automation is wired in.
#[derive(Debug, Default, Clone, Copy)]
pub struct UnconfiguredBridge;

impl TerminalBridge for UnconfiguredBridge {
    fn activate(&self, kind: TerminalKind, _terminal_id: &str) -> Result<(), BridgeError> {
        Err(BridgeError::Unavailable(kind))
    }

    fn highlight(
        &self,
        kind: TerminalKind,
        _terminal_id: &str,
        _tab: Option<HighlightStyle>,
        _pane: Option<HighlightStyle>,
    ) -> Result<(), BridgeError> {
        Err(BridgeError::Unavailable(kind))
    }

    fn session_info(
        &self,
        kind: TerminalKind,
        _terminal_id: &str,
    ) -> Result<Option<TerminalSessionInfo>, BridgeError> {
        Err(BridgeError::Unavailable(kind))
    }
}

pub type SharedBridge = Arc<dyn TerminalBridge>;

pub fn highlight_styles(state: CyclingState) -> (HighlightStyle, HighlightStyle) {
    (
        HighlightStyle {
            color: state.tab_color(),
            duration: TAB_HIGHLIGHT_DURATION,
        },
        HighlightStyle {
            color: state.pane_color(),
            duration: PANE_HIGHLIGHT_DURATION,
        },
    )
}

async fn run_blocking<T, F>(bridge: SharedBridge, op: F) -> Result<T, BridgeError>
where
    T: Send + 'static,
    F: FnOnce(&dyn TerminalBridge) -> Result<T, BridgeError> + Send + 'static,
{
    tokio::task::spawn_blocking(move || op(bridge.as_ref()))
        .await
        .map_err(|err| BridgeError::CommandFailed(format!("join_error:{err}")))?
}

pub async fn fetch_session_info(
    bridge: SharedBridge,
    kind: TerminalKind,
    terminal_id: String,
) -> Result<Option<TerminalSessionInfo>, BridgeError> {
    run_blocking(bridge, move |bridge| bridge.session_info(kind, &terminal_id)).await
}

/// Brings the session's terminal to front, then flashes its tab and pane
/// in the current cycling colour.
pub async fn activate_and_highlight(
    bridge: SharedBridge,
    session: &Session,
    cycling: CyclingState,
) -> Result<(), BridgeError> {
    let kind = session.terminal_kind;
    let terminal_id = session.key.terminal_id.clone();
    let (tab, pane) = highlight_styles(cycling);
    let pane = session.key.pane.as_ref().map(|_| pane);
    run_blocking(bridge, move |bridge| {
        bridge.activate(kind, &terminal_id)?;
        bridge.highlight(kind, &terminal_id, Some(tab), pane)
    })
    .await
}

#[cfg(test)]
mod tests {
    use super::*;
    use juggler_core::{SessionKey, SessionState};
    use std::sync::Mutex;

    #[derive(Default)]
    struct RecordingBridge {
        calls: Mutex<Vec<String>>,
    }

    impl TerminalBridge for RecordingBridge {
        fn activate(&self, kind: TerminalKind, terminal_id: &str) -> Result<(), BridgeError> {
            self.calls
                .lock()
                .expect("calls lock")
                .push(format!("activate {kind} {terminal_id}"));
            Ok(())
        }

        fn highlight(
            &self,
            _kind: TerminalKind,
            terminal_id: &str,
            tab: Option<HighlightStyle>,
            pane: Option<HighlightStyle>,
        ) -> Result<(), BridgeError> {
            self.calls.lock().expect("calls lock").push(format!(
                "highlight {terminal_id} tab={:?} pane={:?}",
                tab.map(|s| s.color),
                pane.map(|s| s.color)
            ));
            Ok(())
        }

        fn session_info(
            &self,
            _kind: TerminalKind,
            terminal_id: &str,
        ) -> Result<Option<TerminalSessionInfo>, BridgeError> {
            if terminal_id == "missing" {
                return Err(BridgeError::SessionNotFound(terminal_id.to_string()));
            }
            Ok(Some(TerminalSessionInfo {
                tab_name: format!("tab-{terminal_id}"),
                window_name: None,
                pane_index: 0,
                pane_count: 1,
            }))
        }
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn unconfigured_bridge_reports_unavailable() {
        let bridge: SharedBridge = Arc::new(UnconfiguredBridge);
        let err = fetch_session_info(bridge, TerminalKind::Kitty, "1".to_string())
            .await
            .expect_err("unavailable");
        assert!(matches!(err, BridgeError::Unavailable(TerminalKind::Kitty)));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn activation_highlights_pane_only_for_multiplexed_sessions() {
        let recorder = Arc::new(RecordingBridge::default());
        let bridge: SharedBridge = recorder.clone();
        let mut session = Session::new(
            SessionKey::new("t1", Some("%2".to_string())),
            "claude-code",
            "/p",
            SessionState::Idle,
            chrono::Utc::now(),
        );
        session.terminal_kind = TerminalKind::Wezterm;
        let cycling = CyclingState {
            current_index: 0,
            highlight_color_index: 1,
        };
        activate_and_highlight(bridge.clone(), &session, cycling)
            .await
            .expect("activate");
        session.key.pane = None;
        activate_and_highlight(bridge, &session, cycling)
            .await
            .expect("activate");

        let calls = recorder.calls.lock().expect("calls lock").clone();
        assert_eq!(
            calls,
            vec![
                "activate wezterm t1".to_string(),
                "highlight t1 tab=Some([255, 180, 0]) pane=Some([128, 90, 0])".to_string(),
                "activate wezterm t1".to_string(),
                "highlight t1 tab=Some([255, 180, 0]) pane=None".to_string(),
            ]
        );
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn session_info_errors_propagate() {
        let bridge: SharedBridge = Arc::new(RecordingBridge::default());
        let info = fetch_session_info(bridge.clone(), TerminalKind::Iterm2, "t9".to_string())
            .await
            .expect("info")
            .expect("some info");
        assert_eq!(info.tab_name, "tab-t9");
        let err = fetch_session_info(bridge, TerminalKind::Iterm2, "missing".to_string())
            .await
            .expect_err("missing");
        assert!(matches!(err, BridgeError::SessionNotFound(_)));
    }
}
