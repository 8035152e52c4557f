// src/controller/countdown.rs

use std::time::Duration;

use chrono::{NaiveDateTime, TimeDelta};
use tokio::{
    sync::mpsc::{self, error::TrySendError},
    task::JoinHandle,
    time::MissedTickBehavior,
};

use crate::{
    controller::window::{AdmissionWindow, WindowState, evaluate},
    error::ControllerError,
    models::{schedule::ExamSchedule, session::SessionPhase},
};

/// Transitions reported by [`Countdown::tick`]. Each fires at most once.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CountdownEvent {
    /// The registration form may be enabled.
    WindowOpened,
    /// Start instant reached with a confirmed registration.
    AutoStart { registration_number: String },
    /// Session deadline reached; answers must be submitted now.
    ExamEnded,
}

/// How a catalog push affected the exam being counted down to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FeedImpact {
    Unchanged,
    Updated,
    /// Gone from the catalog with nobody waiting on it.
    Withdrawn,
}

#[derive(Debug, Clone, Copy, Default)]
struct Fired {
    window_opened: bool,
    auto_start: bool,
    exam_ended: bool,
}

/// Admission state machine for one scheduled exam.
///
/// Holds no timer of its own: the owner calls [`Countdown::tick`] with the
/// current wall-clock reading and every remaining duration is recomputed from
/// it, so a late or skipped tick never accumulates drift.
#[derive(Debug, Clone)]
pub struct Countdown {
    schedule: ExamSchedule,
    phase: SessionPhase,
    window: AdmissionWindow,
    confirmed: Option<String>,
    started_at: Option<NaiveDateTime>,
    time_limit: Option<TimeDelta>,
    fired: Fired,
}

impl Countdown {
    pub fn new(schedule: ExamSchedule, now: NaiveDateTime, time_limit: Option<TimeDelta>) -> Self {
        let window = evaluate(now, &schedule);
        Self {
            schedule,
            phase: SessionPhase::TooEarly,
            window,
            confirmed: None,
            started_at: None,
            time_limit,
            fired: Fired::default(),
        }
    }

    pub fn schedule(&self) -> &ExamSchedule {
        &self.schedule
    }

    pub fn exam_id(&self) -> &str {
        &self.schedule.id
    }

    pub fn phase(&self) -> SessionPhase {
        self.phase
    }

    /// Window as of the last tick.
    pub fn window(&self) -> AdmissionWindow {
        self.window
    }

    pub fn confirmed_registration(&self) -> Option<&str> {
        self.confirmed.as_deref()
    }

    pub fn session_started(&self) -> bool {
        self.fired.auto_start
    }

    /// A registration is confirmed or a session already exists.
    pub fn is_committed(&self) -> bool {
        self.confirmed.is_some() || self.fired.auto_start
    }

    /// Records a validated registration.
    ///
    /// `requested_at` is when the validation request was issued; it must fall
    /// inside the Open window even if the answer arrives after the start.
    pub fn confirm_registration(
        &mut self,
        registration_number: String,
        requested_at: NaiveDateTime,
    ) -> Result<(), ControllerError> {
        if self.fired.auto_start || self.phase >= SessionPhase::Ended {
            return Err(ControllerError::AdmissionClosed);
        }
        if !evaluate(requested_at, &self.schedule).accepts_registration() {
            return Err(ControllerError::AdmissionClosed);
        }
        if self.confirmed.is_none() {
            self.confirmed = Some(registration_number);
        }
        Ok(())
    }

    /// Recomputes the window from `now` and returns the transitions it crossed.
    pub fn tick(&mut self, now: NaiveDateTime) -> Vec<CountdownEvent> {
        let window = evaluate(now, &self.schedule);
        self.window = window;

        let mut events = Vec::new();
        if self.phase >= SessionPhase::Ended {
            return events;
        }

        if window.state == WindowState::Open && !self.fired.window_opened {
            self.fired.window_opened = true;
            events.push(CountdownEvent::WindowOpened);
        }

        if !self.fired.auto_start {
            if window.state == WindowState::Ended {
                if self.confirmed.take().is_some() {
                    tracing::warn!(
                        exam_id = %self.schedule.id,
                        "exam ended before the session started; registration cleared"
                    );
                }
            } else if window.seconds_until_start <= 0 {
                if let Some(registration_number) = self.confirmed.clone() {
                    self.fired.auto_start = true;
                    self.started_at = Some(now);
                    self.advance(SessionPhase::Started);
                    events.push(CountdownEvent::AutoStart { registration_number });
                }
            }
        }

        if self.fired.auto_start
            && !self.fired.exam_ended
            && self.deadline().is_some_and(|deadline| now >= deadline)
        {
            self.fired.exam_ended = true;
            self.advance(SessionPhase::Ended);
            events.push(CountdownEvent::ExamEnded);
        }

        self.advance(window.state.into());
        events
    }

    /// Applies a catalog push. Only schedule data changes; a started session
    /// is never touched.
    pub fn apply_feed(
        &mut self,
        feed: &[ExamSchedule],
        now: NaiveDateTime,
    ) -> Result<FeedImpact, ControllerError> {
        if self.fired.auto_start {
            return Ok(FeedImpact::Unchanged);
        }

        let Some(latest) = feed.iter().find(|s| s.id == self.schedule.id) else {
            if self.confirmed.take().is_some() {
                self.advance(SessionPhase::Ended);
                return Err(self.ended_mid_wait());
            }
            return Ok(FeedImpact::Withdrawn);
        };

        let impact = if *latest == self.schedule {
            FeedImpact::Unchanged
        } else {
            self.schedule = latest.clone();
            FeedImpact::Updated
        };

        if self.confirmed.is_some() && evaluate(now, &self.schedule).state == WindowState::Ended {
            self.confirmed = None;
            self.advance(SessionPhase::Ended);
            return Err(self.ended_mid_wait());
        }

        Ok(impact)
    }

    /// When the running session must be submitted.
    pub fn deadline(&self) -> Option<NaiveDateTime> {
        let started_at = self.started_at?;
        let end = self.schedule.ends_at();
        Some(match self.time_limit {
            Some(limit) => (started_at + limit).min(end),
            None => end,
        })
    }

    /// The next instant at which `tick` has a timed transition to fire: the
    /// start while a registration waits, then the session deadline.
    pub fn next_transition(&self) -> Option<NaiveDateTime> {
        if self.phase >= SessionPhase::Ended {
            return None;
        }
        if !self.fired.auto_start {
            return self.confirmed.as_ref().map(|_| self.schedule.starts_at());
        }
        if self.fired.exam_ended {
            return None;
        }
        self.deadline()
    }

    pub fn seconds_remaining(&self, now: NaiveDateTime) -> Option<i64> {
        self.deadline()
            .map(|deadline| (deadline - now).num_seconds().max(0))
    }

    pub fn mark_submitted(&mut self) {
        self.advance(SessionPhase::Submitted);
    }

    fn advance(&mut self, next: SessionPhase) {
        self.phase = self.phase.max(next);
    }

    fn ended_mid_wait(&self) -> ControllerError {
        tracing::warn!(exam_id = %self.schedule.id, "pending auto-start cancelled");
        ControllerError::ExamEndedMidWait {
            exam_id: self.schedule.id.clone(),
        }
    }
}

/// Periodic tick source with explicit start and cancel.
///
/// Ticks are delivered into a bounded channel with `try_send`; a tick that
/// arrives while the receiver is still busy is dropped rather than queued.
#[derive(Debug)]
pub struct TickTask {
    handle: JoinHandle<()>,
}

impl TickTask {
    pub fn start(period: Duration, sink: mpsc::Sender<()>) -> Self {
        let handle = tokio::spawn(async move {
            let mut interval = tokio::time::interval(period);
            interval.set_missed_tick_behavior(MissedTickBehavior::Skip);
            loop {
                interval.tick().await;
                match sink.try_send(()) {
                    Ok(()) | Err(TrySendError::Full(())) => {}
                    Err(TrySendError::Closed(())) => break,
                }
            }
        });
        Self { handle }
    }

    pub fn cancel(&self) {
        self.handle.abort();
    }

    pub fn is_running(&self) -> bool {
        !self.handle.is_finished()
    }
}

impl Drop for TickTask {
    fn drop(&mut self) {
        self.handle.abort();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{NaiveDate, NaiveTime};

    fn exam() -> ExamSchedule {
        ExamSchedule {
            id: "e1".to_string(),
            date: NaiveDate::from_ymd_opt(2026, 3, 1).unwrap(),
            start_time: NaiveTime::from_hms_opt(10, 0, 0).unwrap(),
            end_time: NaiveTime::from_hms_opt(12, 0, 0).unwrap(),
            total_marks: 100,
            price: 50,
        }
    }

    fn at(h: u32, m: u32, s: u32) -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2026, 3, 1)
            .unwrap()
            .and_hms_opt(h, m, s)
            .unwrap()
    }

    /// Ticks once per second over `[from, to]`, collecting (time, event) pairs.
    fn run(countdown: &mut Countdown, from: NaiveDateTime, to: NaiveDateTime) -> Vec<(NaiveDateTime, CountdownEvent)> {
        let mut out = Vec::new();
        let mut now = from;
        while now <= to {
            for event in countdown.tick(now) {
                out.push((now, event));
            }
            now += TimeDelta::seconds(1);
        }
        out
    }

    #[test]
    fn auto_start_fires_once_at_the_start_instant() {
        let mut countdown = Countdown::new(exam(), at(9, 50, 0), None);
        countdown.tick(at(9, 50, 0));
        countdown
            .confirm_registration("R-1".to_string(), at(9, 58, 0))
            .unwrap();

        let events = run(&mut countdown, at(9, 59, 50), at(10, 0, 30));
        let starts: Vec<_> = events
            .iter()
            .filter(|(_, e)| matches!(e, CountdownEvent::AutoStart { .. }))
            .collect();

        assert_eq!(starts.len(), 1);
        assert_eq!(starts[0].0, at(10, 0, 0));
        assert_eq!(countdown.phase(), SessionPhase::Started);
    }

    #[test]
    fn window_opened_fires_once() {
        let mut countdown = Countdown::new(exam(), at(9, 40, 0), None);
        let events = run(&mut countdown, at(9, 44, 0), at(9, 47, 0));
        let opened = events
            .iter()
            .filter(|(_, e)| *e == CountdownEvent::WindowOpened)
            .count();
        assert_eq!(opened, 1);
        assert_eq!(events[0].0, at(9, 45, 0));
    }

    #[test]
    fn without_confirmation_there_is_no_session() {
        let mut countdown = Countdown::new(exam(), at(9, 50, 0), None);
        let events = run(&mut countdown, at(9, 59, 0), at(10, 1, 0));
        assert!(!events.iter().any(|(_, e)| matches!(e, CountdownEvent::AutoStart { .. })));
        assert!(!countdown.session_started());
        assert_eq!(countdown.phase(), SessionPhase::Started);

        assert!(countdown.tick(at(12, 0, 1)).is_empty());
        assert_eq!(countdown.phase(), SessionPhase::Ended);
    }

    #[test]
    fn confirmation_outside_open_window_is_rejected() {
        let mut countdown = Countdown::new(exam(), at(9, 0, 0), None);
        assert_eq!(
            countdown.confirm_registration("R-1".to_string(), at(9, 44, 59)),
            Err(ControllerError::AdmissionClosed)
        );
        assert_eq!(
            countdown.confirm_registration("R-1".to_string(), at(10, 0, 1)),
            Err(ControllerError::AdmissionClosed)
        );
    }

    #[test]
    fn confirmation_landing_after_start_still_auto_starts() {
        let mut countdown = Countdown::new(exam(), at(9, 59, 0), None);
        countdown.tick(at(10, 0, 0));
        // Request went out at 09:59:59, response arrived at 10:00:02.
        countdown
            .confirm_registration("R-1".to_string(), at(9, 59, 59))
            .unwrap();
        let events = countdown.tick(at(10, 0, 2));
        assert_eq!(
            events,
            vec![CountdownEvent::AutoStart {
                registration_number: "R-1".to_string()
            }]
        );
    }

    #[test]
    fn exam_end_fires_once_and_only_for_started_sessions() {
        let mut countdown = Countdown::new(exam(), at(9, 59, 0), None);
        countdown
            .confirm_registration("R-1".to_string(), at(9, 59, 0))
            .unwrap();
        countdown.tick(at(10, 0, 0));

        let events = run(&mut countdown, at(11, 59, 58), at(12, 0, 5));
        let ended: Vec<_> = events
            .iter()
            .filter(|(_, e)| *e == CountdownEvent::ExamEnded)
            .collect();
        assert_eq!(ended.len(), 1);
        assert_eq!(ended[0].0, at(12, 0, 0));
    }

    #[test]
    fn time_limit_shortens_the_deadline() {
        let mut countdown = Countdown::new(exam(), at(9, 59, 0), Some(TimeDelta::minutes(20)));
        countdown
            .confirm_registration("R-1".to_string(), at(9, 59, 0))
            .unwrap();
        countdown.tick(at(10, 0, 0));
        assert_eq!(countdown.deadline(), Some(at(10, 20, 0)));
        assert_eq!(countdown.seconds_remaining(at(10, 19, 0)), Some(60));
        assert_eq!(countdown.tick(at(10, 20, 0)), vec![CountdownEvent::ExamEnded]);
    }

    #[test]
    fn next_transition_tracks_the_start_then_the_deadline() {
        let mut countdown = Countdown::new(exam(), at(9, 50, 0), Some(TimeDelta::minutes(20)));
        countdown.tick(at(9, 50, 0));
        assert_eq!(countdown.next_transition(), None);

        countdown
            .confirm_registration("R-1".to_string(), at(9, 58, 0))
            .unwrap();
        assert_eq!(countdown.next_transition(), Some(at(10, 0, 0)));

        let start = at(10, 0, 0) + TimeDelta::milliseconds(3);
        countdown.tick(start);
        assert_eq!(
            countdown.next_transition(),
            Some(start + TimeDelta::minutes(20))
        );

        countdown.tick(start + TimeDelta::minutes(20));
        assert_eq!(countdown.next_transition(), None);
    }

    #[test]
    fn submitted_sessions_stop_reporting() {
        let mut countdown = Countdown::new(exam(), at(9, 59, 0), None);
        countdown
            .confirm_registration("R-1".to_string(), at(9, 59, 0))
            .unwrap();
        countdown.tick(at(10, 0, 0));
        countdown.mark_submitted();
        assert!(countdown.tick(at(12, 0, 0)).is_empty());
        assert_eq!(countdown.phase(), SessionPhase::Submitted);
    }

    #[test]
    fn withdrawn_exam_cancels_pending_auto_start() {
        let mut countdown = Countdown::new(exam(), at(9, 50, 0), None);
        countdown
            .confirm_registration("R-1".to_string(), at(9, 50, 0))
            .unwrap();

        let err = countdown.apply_feed(&[], at(9, 55, 0)).unwrap_err();
        assert_eq!(
            err,
            ControllerError::ExamEndedMidWait {
                exam_id: "e1".to_string()
            }
        );
        assert!(countdown.tick(at(10, 0, 0)).is_empty());
        assert!(!countdown.session_started());
    }

    #[test]
    fn moved_end_time_in_the_past_cancels_pending_auto_start() {
        let mut countdown = Countdown::new(exam(), at(9, 50, 0), None);
        countdown
            .confirm_registration("R-1".to_string(), at(9, 50, 0))
            .unwrap();

        let mut moved = exam();
        moved.start_time = NaiveTime::from_hms_opt(9, 0, 0).unwrap();
        moved.end_time = NaiveTime::from_hms_opt(9, 30, 0).unwrap();
        assert!(matches!(
            countdown.apply_feed(&[moved], at(9, 55, 0)),
            Err(ControllerError::ExamEndedMidWait { .. })
        ));
    }

    #[test]
    fn withdrawal_without_registration_is_not_an_error() {
        let mut countdown = Countdown::new(exam(), at(9, 50, 0), None);
        assert_eq!(countdown.apply_feed(&[], at(9, 55, 0)), Ok(FeedImpact::Withdrawn));
    }

    #[test]
    fn feed_cannot_touch_a_started_session() {
        let mut countdown = Countdown::new(exam(), at(9, 59, 0), None);
        countdown
            .confirm_registration("R-1".to_string(), at(9, 59, 0))
            .unwrap();
        countdown.tick(at(10, 0, 0));

        assert_eq!(countdown.apply_feed(&[], at(10, 5, 0)), Ok(FeedImpact::Unchanged));
        assert_eq!(countdown.schedule(), &exam());
    }

    #[tokio::test(start_paused = true)]
    async fn tick_task_stops_after_cancel() {
        let (tx, mut rx) = mpsc::channel(1);
        let task = TickTask::start(Duration::from_secs(1), tx);
        assert!(rx.recv().await.is_some());
        assert!(rx.recv().await.is_some());

        assert!(task.is_running());
        task.cancel();
        assert!(rx.recv().await.is_none());
    }
}
