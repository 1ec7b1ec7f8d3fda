use crate::Session;
use chrono::{DateTime, Utc};

/// Formats whole seconds as `<1m`, `Nm` or `HhMM`.
pub fn format_duration(seconds: i64) -> String {
    let minutes = seconds.max(0) / 60;
    if minutes < 1 {
        return "<1m".to_string();
    }
    let hours = minutes / 60;
    if hours == 0 {
        format!("{minutes}m")
    } else {
        format!("{hours}h{:02}", minutes % 60)
    }
}

pub fn format_duration_ms(ms: i64) -> String {
    format_duration(ms / 1000)
}

/// Time accounting window for the stats view. Nothing counts while paused.
/// After a reset, sessions started earlier only contribute their current
/// stretch, and only if that stretch began after the reset.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StatsWindow {
    pub reset_at: Option<DateTime<Utc>>,
    pub paused: bool,
}

impl StatsWindow {
    fn measure(
        &self,
        session: &Session,
        stretch_start: Option<DateTime<Utc>>,
        total: i64,
        current: Option<i64>,
    ) -> i64 {
        let Some(reset) = self.reset_at else {
            return total;
        };
        if session.started_at >= reset {
            return total;
        }
        match stretch_start {
            Some(since) if since >= reset => current.unwrap_or(0),
            _ => 0,
        }
    }
}

pub fn total_idle_ms(sessions: &[Session], window: StatsWindow, now: DateTime<Utc>) -> i64 {
    if window.paused {
        return 0;
    }
    sessions
        .iter()
        .map(|session| {
            window.measure(
                session,
                session.last_became_idle,
                session.total_idle_ms(now),
                session.current_idle_ms(now),
            )
        })
        .sum()
}

pub fn total_working_ms(sessions: &[Session], window: StatsWindow, now: DateTime<Utc>) -> i64 {
    if window.paused {
        return 0;
    }
    sessions
        .iter()
        .map(|session| {
            window.measure(
                session,
                session.last_became_working,
                session.total_working_ms(now),
                session.current_working_ms(now),
            )
        })
        .sum()
}

/// Share of sessions waiting on the user. An empty registry reports fully idle.
pub fn idle_percentage(sessions: &[Session]) -> f64 {
    if sessions.is_empty() {
        return 1.0;
    }
    let waiting = sessions
        .iter()
        .filter(|session| session.state.is_included_in_cycle())
        .count();
    waiting as f64 / sessions.len() as f64
}
