// src/controller/window.rs

use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};

use crate::{
    config::ADMISSION_LEAD_MINUTES,
    models::{schedule::ExamSchedule, session::SessionPhase},
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WindowState {
    TooEarly,
    Open,
    Started,
    Ended,
}

impl From<WindowState> for SessionPhase {
    fn from(state: WindowState) -> Self {
        match state {
            WindowState::TooEarly => SessionPhase::TooEarly,
            WindowState::Open => SessionPhase::Open,
            WindowState::Started => SessionPhase::Started,
            WindowState::Ended => SessionPhase::Ended,
        }
    }
}

/// Where `now` falls relative to one schedule.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct AdmissionWindow {
    /// Whole minutes until start, rounded down. Negative once started.
    pub minutes_until_start: i64,
    /// Seconds until start, rounded up; `<= 0` exactly when start is reached.
    pub seconds_until_start: i64,
    /// Seconds until the scheduled end, rounded up.
    pub seconds_until_end: i64,
    pub state: WindowState,
}

impl AdmissionWindow {
    pub fn accepts_registration(&self) -> bool {
        self.state == WindowState::Open
    }
}

/// Evaluates the admission window of `schedule` at civil time `now`.
///
/// Open covers `[start - 15min, start]`, both ends inclusive. A pure function:
/// nothing but the two arguments is consulted.
pub fn evaluate(now: NaiveDateTime, schedule: &ExamSchedule) -> AdmissionWindow {
    let until_start_ms = (schedule.starts_at() - now).num_milliseconds();
    let until_end_ms = (schedule.ends_at() - now).num_milliseconds();

    let minutes_until_start = until_start_ms.div_euclid(60_000);
    let lead_ms = ADMISSION_LEAD_MINUTES * 60_000;

    // Ended also covers a start so far behind us that even a full sitting
    // would be over; this guards against stale schedule data.
    let state = if until_end_ms < 0 || minutes_until_start < -schedule.duration().num_minutes() {
        WindowState::Ended
    } else if (0..=lead_ms).contains(&until_start_ms) {
        WindowState::Open
    } else if until_start_ms < 0 {
        WindowState::Started
    } else {
        WindowState::TooEarly
    };

    AdmissionWindow {
        minutes_until_start,
        seconds_until_start: ceil_seconds(until_start_ms),
        seconds_until_end: ceil_seconds(until_end_ms),
        state,
    }
}

/// Picks the exam a client should count down to: the earliest-starting
/// schedule that has not ended, ties broken by lexically smallest id.
pub fn select_active_exam(now: NaiveDateTime, feed: &[ExamSchedule]) -> Option<&ExamSchedule> {
    feed.iter()
        .filter(|schedule| schedule.ends_at() >= now)
        .min_by(|a, b| {
            a.starts_at()
                .cmp(&b.starts_at())
                .then_with(|| a.id.cmp(&b.id))
        })
}

fn ceil_seconds(ms: i64) -> i64 {
    ms.div_euclid(1000) + i64::from(ms.rem_euclid(1000) > 0)
}
