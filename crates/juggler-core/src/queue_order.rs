//! Registry ordering policy. In fair and prio modes the list is kept as
//! idle-like rows, then busy rows, then backburnered rows.

use crate::{QueueOrderMode, Session, SessionState};
use chrono::{DateTime, Utc};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueueSection {
    IdleLike,
    BusyLike,
    Backburner,
}

impl QueueSection {
    pub fn of(state: SessionState) -> Self {
        match state {
            SessionState::Idle | SessionState::Permission => QueueSection::IdleLike,
            SessionState::Working | SessionState::Compacting => QueueSection::BusyLike,
            SessionState::Backburner => QueueSection::Backburner,
        }
    }
}

/// Where a single row moves after a state change.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueueSlot {
    TopOfIdle,
    EndOfIdle,
    EndOfBusy,
    EndOfBackburner,
}

/// Slot for a row that moved from `old` to `new`, or `None` when the mode
/// keeps rows where they are or no section boundary was crossed.
pub fn transition_slot(
    mode: QueueOrderMode,
    old: SessionState,
    new: SessionState,
) -> Option<QueueSlot> {
    if !mode.reorders_on_events() {
        return None;
    }
    let (from, to) = (QueueSection::of(old), QueueSection::of(new));
    if from == to {
        return None;
    }
    match to {
        QueueSection::Backburner => Some(QueueSlot::EndOfBackburner),
        QueueSection::BusyLike => Some(QueueSlot::EndOfBusy),
        QueueSection::IdleLike if mode == QueueOrderMode::Prio => Some(QueueSlot::TopOfIdle),
        QueueSection::IdleLike => Some(QueueSlot::EndOfIdle),
    }
}

fn first_in(sessions: &[Session], section: QueueSection) -> Option<usize> {
    sessions
        .iter()
        .position(|session| QueueSection::of(session.state) == section)
}

/// Insertion index for `slot` in a list that does not contain the moving row.
pub fn slot_index(sessions: &[Session], slot: QueueSlot) -> usize {
    match slot {
        QueueSlot::TopOfIdle => 0,
        QueueSlot::EndOfIdle => first_in(sessions, QueueSection::BusyLike)
            .or_else(|| first_in(sessions, QueueSection::Backburner))
            .unwrap_or(sessions.len()),
        QueueSlot::EndOfBusy => {
            first_in(sessions, QueueSection::Backburner).unwrap_or(sessions.len())
        }
        QueueSlot::EndOfBackburner => sessions.len(),
    }
}

/// Moves the row at `index` to `slot` and returns its new index.
pub fn relocate(sessions: &mut Vec<Session>, index: usize, slot: QueueSlot) -> usize {
    if index >= sessions.len() {
        return index;
    }
    let row = sessions.remove(index);
    let target = slot_index(sessions, slot);
    sessions.insert(target, row);
    target
}

fn idle_since(session: &Session) -> DateTime<Utc> {
    session.last_became_idle.unwrap_or(DateTime::<Utc>::MIN_UTC)
}

/// Full resort used when the mode changes.
pub fn reorder(sessions: &mut Vec<Session>, mode: QueueOrderMode) {
    match mode {
        QueueOrderMode::Static | QueueOrderMode::Grouped => {
            sessions.sort_by_key(|session| session.started_at);
        }
        QueueOrderMode::Fair | QueueOrderMode::Prio => {
            let mut idle = Vec::new();
            let mut busy = Vec::new();
            let mut backburner = Vec::new();
            for session in sessions.drain(..) {
                match QueueSection::of(session.state) {
                    QueueSection::IdleLike => idle.push(session),
                    QueueSection::BusyLike => busy.push(session),
                    QueueSection::Backburner => backburner.push(session),
                }
            }
            if mode == QueueOrderMode::Fair {
                idle.sort_by_key(idle_since);
            } else {
                idle.sort_by_key(|session| std::cmp::Reverse(idle_since(session)));
            }
            sessions.extend(idle);
            sessions.extend(busy);
            sessions.extend(backburner);
        }
    }
}
