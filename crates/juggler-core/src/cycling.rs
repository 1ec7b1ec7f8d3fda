use crate::{resolve_focus, Session};
use serde::{Deserialize, Serialize};

pub const HIGHLIGHT_COLOR_COUNT: usize = 5;

/// Tab highlight colours, one per cycling step.
pub const TAB_HIGHLIGHT_PALETTE: [[u8; 3]; HIGHLIGHT_COLOR_COUNT] = [
    [212, 67, 67],
    [255, 180, 0],
    [144, 104, 212],
    [75, 177, 223],
    [158, 212, 80],
];

/// Half-brightness variants used for the pane border.
pub const PANE_HIGHLIGHT_PALETTE: [[u8; 3]; HIGHLIGHT_COLOR_COUNT] = [
    [106, 34, 34],
    [128, 90, 0],
    [72, 52, 106],
    [38, 89, 112],
    [79, 106, 40],
];

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct CyclingState {
    pub current_index: usize,
    pub highlight_color_index: usize,
}

impl CyclingState {
    pub fn tab_color(&self) -> [u8; 3] {
        TAB_HIGHLIGHT_PALETTE[self.highlight_color_index % HIGHLIGHT_COLOR_COUNT]
    }

    pub fn pane_color(&self) -> [u8; 3] {
        PANE_HIGHLIGHT_PALETTE[self.highlight_color_index % HIGHLIGHT_COLOR_COUNT]
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CycleDirection {
    Forward,
    Backward,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CycleOutcome<'a> {
    pub target: Option<&'a Session>,
    pub state: CyclingState,
    pub color_changed: bool,
}

fn step(index: usize, len: usize, direction: CycleDirection) -> usize {
    let index = index % len;
    match direction {
        CycleDirection::Forward => (index + 1) % len,
        CycleDirection::Backward => (index + len - 1) % len,
    }
}

/// Picks the next cyclable session relative to the focused one.
///
/// A focus that resolves to a cyclable row steps from that row. A focus on a
/// real but non-cyclable row lands directly on the nearest cyclable row in
/// the cycling direction, wrapping at the ends. Anything else steps from the
/// persisted cursor.
pub fn cycle<'a>(
    sessions: &'a [Session],
    focused: Option<&str>,
    state: CyclingState,
    direction: CycleDirection,
) -> CycleOutcome<'a> {
    let cyclable: Vec<(usize, &Session)> = sessions
        .iter()
        .enumerate()
        .filter(|(_, session)| session.state.is_included_in_cycle())
        .collect();
    if cyclable.is_empty() {
        return CycleOutcome {
            target: None,
            state,
            color_changed: false,
        };
    }
    let len = cyclable.len();
    let rows: Vec<&Session> = cyclable.iter().map(|(_, session)| *session).collect();
    let focused = focused.filter(|id| !id.is_empty());

    let target_index = match focused {
        Some(id) => match resolve_focus(&rows, id) {
            Some(start) => step(start, len, direction),
            None => match resolve_focus(sessions, id) {
                Some(anchor) => nearest_cyclable(&cyclable, anchor, direction),
                None => step(state.current_index, len, direction),
            },
        },
        None => step(state.current_index, len, direction),
    };

    let color_changed = len > 1;
    let highlight_color_index = if color_changed {
        step(state.highlight_color_index, HIGHLIGHT_COLOR_COUNT, direction)
    } else {
        state.highlight_color_index
    };

    CycleOutcome {
        target: Some(rows[target_index]),
        state: CyclingState {
            current_index: target_index,
            highlight_color_index,
        },
        color_changed,
    }
}

fn nearest_cyclable(
    cyclable: &[(usize, &Session)],
    anchor: usize,
    direction: CycleDirection,
) -> usize {
    match direction {
        CycleDirection::Forward => cyclable
            .iter()
            .position(|(full_index, _)| *full_index > anchor)
            .unwrap_or(0),
        CycleDirection::Backward => cyclable
            .iter()
            .rposition(|(full_index, _)| *full_index < anchor)
            .unwrap_or(cyclable.len() - 1),
    }
}

pub fn cycle_forward<'a>(
    sessions: &'a [Session],
    focused: Option<&str>,
    state: CyclingState,
) -> CycleOutcome<'a> {
    cycle(sessions, focused, state, CycleDirection::Forward)
}

pub fn cycle_backward<'a>(
    sessions: &'a [Session],
    focused: Option<&str>,
    state: CyclingState,
) -> CycleOutcome<'a> {
    cycle(sessions, focused, state, CycleDirection::Backward)
}

/// Points the cursor at the focused cyclable session. Colour is untouched.
pub fn sync_to_focus(
    sessions: &[Session],
    focused: Option<&str>,
    state: CyclingState,
) -> CyclingState {
    let Some(id) = focused else {
        return state;
    };
    let rows: Vec<&Session> = sessions
        .iter()
        .filter(|session| session.state.is_included_in_cycle())
        .collect();
    match resolve_focus(&rows, id) {
        Some(index) => CyclingState {
            current_index: index,
            ..state
        },
        None => state,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{SessionKey, SessionState};
    use chrono::Utc;

    fn sessions(rows: &[(&str, SessionState)]) -> Vec<Session> {
        let now = Utc::now();
        rows.iter()
            .map(|(id, state)| {
                Session::new(SessionKey::terminal(*id), "claude-code", "/p", *state, now)
            })
            .collect()
    }

    fn target_id(outcome: &CycleOutcome<'_>) -> Option<String> {
        outcome.target.map(Session::id)
    }

    #[test]
    fn forward_walks_and_wraps() {
        let list = sessions(&[
            ("A", SessionState::Idle),
            ("B", SessionState::Idle),
            ("C", SessionState::Idle),
        ]);
        let mut state = CyclingState::default();
        let mut focus = "A".to_string();
        let mut seen = Vec::new();
        for _ in 0..3 {
            let outcome = cycle_forward(&list, Some(focus.as_str()), state);
            state = outcome.state;
            focus = target_id(&outcome).expect("target");
            seen.push(focus.clone());
        }
        assert_eq!(seen, ["B", "C", "A"]);
        assert_eq!(state.highlight_color_index, 3);
    }

    #[test]
    fn forward_then_backward_returns_to_start() {
        let list = sessions(&[
            ("A", SessionState::Idle),
            ("B", SessionState::Working),
            ("C", SessionState::Permission),
            ("D", SessionState::Idle),
        ]);
        for start in ["A", "C", "D"] {
            let forward = cycle_forward(&list, Some(start), CyclingState::default());
            let next = target_id(&forward).expect("target");
            let back = cycle_backward(&list, Some(next.as_str()), forward.state);
            assert_eq!(target_id(&back).as_deref(), Some(start));
            assert_eq!(back.state.highlight_color_index, 0);
        }
    }

    #[test]
    fn never_selects_non_cyclable_sessions() {
        let list = sessions(&[
            ("A", SessionState::Working),
            ("B", SessionState::Idle),
            ("C", SessionState::Backburner),
            ("D", SessionState::Compacting),
            ("E", SessionState::Permission),
        ]);
        let mut state = CyclingState::default();
        for _ in 0..6 {
            let outcome = cycle_forward(&list, None, state);
            let target = outcome.target.expect("target");
            assert!(target.state.is_included_in_cycle());
            state = outcome.state;
        }
    }

    #[test]
    fn single_cyclable_session_freezes_color() {
        let list = sessions(&[("A", SessionState::Working), ("B", SessionState::Idle)]);
        let state = CyclingState {
            current_index: 0,
            highlight_color_index: 2,
        };
        let outcome = cycle_forward(&list, Some("B"), state);
        assert_eq!(target_id(&outcome).as_deref(), Some("B"));
        assert_eq!(outcome.state, state);
        assert!(!outcome.color_changed);
    }

    #[test]
    fn nothing_cyclable_yields_no_target() {
        let list = sessions(&[("A", SessionState::Working), ("B", SessionState::Backburner)]);
        let state = CyclingState {
            current_index: 1,
            highlight_color_index: 4,
        };
        let outcome = cycle_backward(&list, Some("A"), state);
        assert_eq!(outcome.target, None);
        assert_eq!(outcome.state, state);
        assert!(!outcome.color_changed);
        assert_eq!(cycle_forward(&[], None, state).target, None);
    }

    #[test]
    fn unknown_focus_steps_from_cursor() {
        let list = sessions(&[
            ("A", SessionState::Idle),
            ("B", SessionState::Idle),
            ("C", SessionState::Idle),
        ]);
        let state = CyclingState {
            current_index: 2,
            highlight_color_index: 0,
        };
        let forward = cycle_forward(&list, Some("gone"), state);
        assert_eq!(target_id(&forward).as_deref(), Some("A"));
        let backward = cycle_backward(&list, None, state);
        assert_eq!(target_id(&backward).as_deref(), Some("B"));
        assert_eq!(backward.state.highlight_color_index, 4);
    }

    #[test]
    fn stale_cursor_beyond_list_wraps() {
        let list = sessions(&[("A", SessionState::Idle), ("B", SessionState::Idle)]);
        let state = CyclingState {
            current_index: 7,
            highlight_color_index: 0,
        };
        let outcome = cycle_forward(&list, None, state);
        assert_eq!(target_id(&outcome).as_deref(), Some("A"));
    }

    #[test]
    fn non_cyclable_focus_lands_on_nearest_cyclable() {
        let list = sessions(&[
            ("A", SessionState::Idle),
            ("B", SessionState::Working),
            ("C", SessionState::Idle),
            ("D", SessionState::Working),
        ]);
        let state = CyclingState::default();
        assert_eq!(
            target_id(&cycle_forward(&list, Some("B"), state)).as_deref(),
            Some("C")
        );
        assert_eq!(
            target_id(&cycle_backward(&list, Some("B"), state)).as_deref(),
            Some("A")
        );
        assert_eq!(
            target_id(&cycle_forward(&list, Some("D"), state)).as_deref(),
            Some("A")
        );
        let first_busy = sessions(&[
            ("X", SessionState::Working),
            ("Y", SessionState::Idle),
            ("Z", SessionState::Idle),
        ]);
        assert_eq!(
            target_id(&cycle_backward(&first_busy, Some("X"), state)).as_deref(),
            Some("Z")
        );
    }

    #[test]
    fn focus_resolves_by_terminal_suffix() {
        let list = sessions(&[
            ("w0t0p0:aaa", SessionState::Idle),
            ("w0t1p0:bbb", SessionState::Idle),
        ]);
        let outcome = cycle_forward(&list, Some("aaa"), CyclingState::default());
        assert_eq!(target_id(&outcome).as_deref(), Some("w0t1p0:bbb"));
    }

    #[test]
    fn sync_to_focus_moves_cursor_only() {
        let list = sessions(&[
            ("A", SessionState::Working),
            ("B", SessionState::Idle),
            ("C", SessionState::Idle),
        ]);
        let state = CyclingState {
            current_index: 0,
            highlight_color_index: 3,
        };
        let synced = sync_to_focus(&list, Some("C"), state);
        assert_eq!(synced.current_index, 1);
        assert_eq!(synced.highlight_color_index, 3);
        assert_eq!(sync_to_focus(&list, Some("A"), state), state);
        assert_eq!(sync_to_focus(&list, None, state), state);
    }

    #[test]
    fn palette_lookup_wraps() {
        let state = CyclingState {
            current_index: 0,
            highlight_color_index: 6,
        };
        assert_eq!(state.tab_color(), [255, 180, 0]);
        assert_eq!(state.pane_color(), [128, 90, 0]);
    }
}
