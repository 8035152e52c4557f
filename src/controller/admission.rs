// src/controller/admission.rs

use std::{collections::HashSet, error::Error, sync::Arc, time::Duration};

use chrono::{DateTime, NaiveDateTime, TimeDelta, Utc};
use rand::{SeedableRng, rngs::StdRng};
use tokio::{
    sync::{mpsc, oneshot, watch},
    task::{JoinHandle, JoinSet},
    time::Instant,
};
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::{
    config::ControllerConfig,
    controller::{
        countdown::{Countdown, CountdownEvent, FeedImpact, TickTask},
        feed::{CatalogSource, FeedEvent, FeedSubscription, WsCatalogSource},
        gateway::{GatewayError, HttpPortal, PortalBackend},
        outbox::{PendingSubmission, SubmissionOutbox},
        runtime::{Advance, ExamRuntime, QuestionView, RuntimeError},
        scoring::{SubmissionGuard, SubmissionTrigger},
        window::{AdmissionWindow, WindowState, evaluate, select_active_exam},
    },
    error::ControllerError,
    models::{
        registration::CandidateProfile,
        schedule::ExamSchedule,
        score::ScoreResult,
        session::{ExamSession, ExamStart, SessionPhase},
    },
    utils::clock::{Clock, PortalTime, SystemClock},
};

const COMMAND_CAPACITY: usize = 32;

type Reply = oneshot::Sender<Result<(), ControllerError>>;

/// What the candidate-facing UI renders.
#[derive(Debug, Clone, Default)]
pub struct Snapshot {
    /// Exam the controller is counting down to.
    pub exam: Option<ExamSchedule>,
    pub window: Option<AdmissionWindow>,
    pub phase: Option<SessionPhase>,
    pub candidate: Option<CandidateProfile>,
    pub session: Option<ExamSession>,
    pub question: Option<QuestionView>,
    pub result: Option<ScoreResult>,
    pub feed_connected: bool,
    /// Why the catalog feed is down. Reconnection runs in the background.
    pub feed_error: Option<ControllerError>,
    /// The exam is under way and this terminal has no confirmed registration.
    pub blocked: bool,
    pub last_error: Option<ControllerError>,
}

enum Command {
    Register {
        registration_number: String,
        reply: Reply,
    },
    Select {
        option: usize,
        reply: Reply,
    },
    Advance {
        reply: Reply,
    },
    Finish {
        reply: Reply,
    },
}

/// Results of portal calls made off the actor loop.
enum Completion {
    Validated {
        exam_id: String,
        registration_number: String,
        requested_at: NaiveDateTime,
        outcome: Result<CandidateProfile, GatewayError>,
    },
    Started {
        registration_number: String,
        attempt: u32,
        outcome: Result<ExamStart, GatewayError>,
    },
    Delivered {
        session_id: Uuid,
        outcome: Result<ScoreResult, GatewayError>,
    },
}

struct ActiveSession {
    session_id: Uuid,
    registration_number: String,
    exam_id: String,
    runtime: ExamRuntime,
    guard: SubmissionGuard,
}

struct Validation {
    registration_number: String,
    waiters: Vec<Reply>,
}

pub struct AdmissionController;

impl AdmissionController {
    /// Starts the controller task. It runs until the handle is dropped or
    /// cancelled.
    pub fn spawn(
        config: ControllerConfig,
        backend: Arc<dyn PortalBackend>,
        source: Arc<dyn CatalogSource>,
        clock: Arc<dyn Clock>,
        outbox: SubmissionOutbox,
    ) -> ControllerHandle {
        let (command_tx, command_rx) = mpsc::channel(COMMAND_CAPACITY);
        let (snapshot_tx, snapshot_rx) = watch::channel(Snapshot::default());

        let actor = Actor {
            time: PortalTime::new(config.utc_offset),
            time_limit: config.time_limit.and_then(|d| TimeDelta::from_std(d).ok()),
            feed: FeedSubscription::start(source, config.feed_retry),
            config,
            clock,
            backend,
            outbox,
            calls: JoinSet::new(),
            rng: StdRng::from_entropy(),
            catalog: Vec::new(),
            feed_connected: false,
            feed_error: None,
            countdown: None,
            candidate: None,
            validating: None,
            starting: false,
            end_reached: false,
            session: None,
            delivering: HashSet::new(),
            result: None,
            last_error: None,
            snapshots: snapshot_tx,
        };
        let task = tokio::spawn(actor.run(command_rx));

        ControllerHandle {
            commands: command_tx,
            snapshots: snapshot_rx,
            task,
        }
    }

    /// Wires the controller to a live portal: HTTP backend, WebSocket feed,
    /// system clock and the configured outbox.
    pub fn connect(config: ControllerConfig) -> Result<ControllerHandle, Box<dyn Error + Send + Sync>> {
        let portal = HttpPortal::new(&config.portal_url)?;
        let source = WsCatalogSource::new(portal.feed_url()?.to_string());
        let outbox = match &config.outbox_path {
            Some(path) => SubmissionOutbox::open(path)?,
            None => SubmissionOutbox::in_memory(),
        };
        Ok(Self::spawn(
            config,
            Arc::new(portal),
            Arc::new(source),
            Arc::new(SystemClock),
            outbox,
        ))
    }
}

/// Candidate-side handle to a running controller.
///
/// Dropping it stops the controller along with its tick task and feed reader.
#[derive(Debug)]
pub struct ControllerHandle {
    commands: mpsc::Sender<Command>,
    snapshots: watch::Receiver<Snapshot>,
    task: JoinHandle<()>,
}

impl ControllerHandle {
    /// Validates a registration for the exam being counted down to.
    /// Resolves once the portal has answered.
    pub async fn register(&self, registration_number: impl Into<String>) -> Result<(), ControllerError> {
        let registration_number = registration_number.into();
        self.request(|reply| Command::Register {
            registration_number,
            reply,
        })
        .await
    }

    pub async fn select(&self, option: usize) -> Result<(), ControllerError> {
        self.request(|reply| Command::Select { option, reply }).await
    }

    pub async fn advance(&self) -> Result<(), ControllerError> {
        self.request(|reply| Command::Advance { reply }).await
    }

    pub async fn finish(&self) -> Result<(), ControllerError> {
        self.request(|reply| Command::Finish { reply }).await
    }

    pub fn snapshot(&self) -> Snapshot {
        self.snapshots.borrow().clone()
    }

    pub fn watch(&self) -> watch::Receiver<Snapshot> {
        self.snapshots.clone()
    }

    /// Waits for the first snapshot satisfying `predicate`.
    pub async fn wait_until(
        &self,
        mut predicate: impl FnMut(&Snapshot) -> bool,
    ) -> Result<Snapshot, ControllerError> {
        let mut snapshots = self.snapshots.clone();
        let snapshot = snapshots
            .wait_for(|s| predicate(s))
            .await
            .map_err(|_| ControllerError::Stopped)?;
        Ok(snapshot.clone())
    }

    pub fn cancel(&self) {
        self.task.abort();
    }

    pub fn is_running(&self) -> bool {
        !self.task.is_finished()
    }

    async fn request(&self, make: impl FnOnce(Reply) -> Command) -> Result<(), ControllerError> {
        let (tx, rx) = oneshot::channel();
        self.commands
            .send(make(tx))
            .await
            .map_err(|_| ControllerError::Stopped)?;
        rx.await.map_err(|_| ControllerError::Stopped)?
    }
}

impl Drop for ControllerHandle {
    fn drop(&mut self) {
        self.task.abort();
    }
}

struct Actor {
    config: ControllerConfig,
    time: PortalTime,
    time_limit: Option<TimeDelta>,
    clock: Arc<dyn Clock>,
    backend: Arc<dyn PortalBackend>,
    feed: FeedSubscription,
    outbox: SubmissionOutbox,
    calls: JoinSet<Completion>,
    rng: StdRng,

    catalog: Vec<ExamSchedule>,
    feed_connected: bool,
    feed_error: Option<ControllerError>,
    countdown: Option<Countdown>,
    candidate: Option<CandidateProfile>,
    validating: Option<Validation>,
    starting: bool,
    /// The deadline passed while the session was still being created.
    end_reached: bool,
    session: Option<ActiveSession>,
    delivering: HashSet<Uuid>,
    result: Option<ScoreResult>,
    last_error: Option<ControllerError>,
    snapshots: watch::Sender<Snapshot>,
}

impl Actor {
    async fn run(mut self, mut commands: mpsc::Receiver<Command>) {
        let (tick_tx, mut ticks) = mpsc::channel(1);
        let _ticker = TickTask::start(self.config.tick_interval, tick_tx);
        self.replay_outbox();

        loop {
            let wake = self.next_wake();
            tokio::select! {
                Some(()) = ticks.recv() => {}
                () = tokio::time::sleep_until(wake.unwrap_or_else(Instant::now)), if wake.is_some() => {}
                Some(event) = self.feed.next() => self.on_feed(event),
                command = commands.recv() => match command {
                    Some(command) => self.on_command(command),
                    None => break,
                },
                Some(joined) = self.calls.join_next() => match joined {
                    Ok(completion) => self.on_completion(completion),
                    Err(e) => error!(error = %e, "portal call task failed"),
                },
            }
            self.step();
        }
        debug!("admission controller stopped");
    }

    /// Runtime instant of the countdown's next timed transition, so the start
    /// and the deadline are hit exactly instead of on the next periodic tick.
    fn next_wake(&self) -> Option<Instant> {
        let target = self.countdown.as_ref()?.next_transition()?;
        let until = self.time.instant(target) - self.clock.now();
        Some(Instant::now() + until.to_std().unwrap_or(Duration::ZERO))
    }

    fn civil_now(&self) -> NaiveDateTime {
        self.time.civil_now(self.clock.as_ref())
    }

    /// Re-evaluates the countdown against the clock and publishes a snapshot.
    fn step(&mut self) {
        let now = self.clock.now();
        let civil = self.time.civil(now);

        let finished = self.countdown.as_ref().and_then(|c| {
            let over = c.phase() >= SessionPhase::Ended
                || (!c.is_committed() && evaluate(civil, c.schedule()).state == WindowState::Ended);
            (over && self.session.is_none() && !self.starting).then(|| c.exam_id().to_string())
        });
        if let Some(exam_id) = finished {
            info!(%exam_id, "exam over without a session on this terminal; moving to the next one");
            self.countdown = None;
            self.candidate = None;
            self.end_reached = false;
            self.select_exam(civil, Some(&exam_id));
        }
        if self.countdown.is_none() {
            self.select_exam(civil, None);
        }

        let events = match self.countdown.as_mut() {
            Some(countdown) => countdown.tick(civil),
            None => Vec::new(),
        };
        for event in events {
            match event {
                CountdownEvent::WindowOpened => {
                    info!(exam_id = self.exam_id(), "admission window opened");
                }
                CountdownEvent::AutoStart {
                    registration_number,
                } => {
                    info!(exam_id = self.exam_id(), %registration_number, "auto-starting exam session");
                    self.spawn_start(registration_number, 1, Duration::ZERO);
                }
                CountdownEvent::ExamEnded => {
                    info!(exam_id = self.exam_id(), "exam ended");
                    self.submit(SubmissionTrigger::ExamEnded, now);
                }
            }
        }

        self.publish(civil);
    }

    fn exam_id(&self) -> &str {
        self.countdown.as_ref().map(|c| c.exam_id()).unwrap_or_default()
    }

    fn select_exam(&mut self, civil: NaiveDateTime, exclude: Option<&str>) {
        let eligible: Vec<ExamSchedule> = self
            .catalog
            .iter()
            .filter(|s| Some(s.id.as_str()) != exclude)
            .cloned()
            .collect();
        if let Some(schedule) = select_active_exam(civil, &eligible) {
            info!(exam_id = %schedule.id, starts_at = %schedule.starts_at(), "counting down to exam");
            self.countdown = Some(Countdown::new(schedule.clone(), civil, self.time_limit));
        }
    }

    fn on_feed(&mut self, event: FeedEvent) {
        match event {
            FeedEvent::Snapshot(catalog) => {
                if !self.feed_connected {
                    info!(exams = catalog.len(), "exam catalog received");
                }
                self.feed_connected = true;
                self.feed_error = None;
                self.catalog = catalog;

                let civil = self.civil_now();
                let Some(countdown) = self.countdown.as_mut() else {
                    return;
                };
                match countdown.apply_feed(&self.catalog, civil) {
                    Ok(FeedImpact::Unchanged) => {}
                    Ok(FeedImpact::Updated) => {
                        info!(exam_id = %countdown.exam_id(), "exam schedule updated");
                    }
                    Ok(FeedImpact::Withdrawn) => {
                        info!(exam_id = %countdown.exam_id(), "exam withdrawn");
                        self.countdown = None;
                    }
                    Err(e) => {
                        self.countdown = None;
                        self.candidate = None;
                        self.last_error = Some(e);
                    }
                }

                // Nobody is waiting on this exam yet, so follow the catalog's current pick.
                let switch = self.countdown.as_ref().is_some_and(|c| {
                    !c.is_committed()
                        && self.validating.is_none()
                        && select_active_exam(civil, &self.catalog).map(|s| s.id.as_str())
                            != Some(c.exam_id())
                });
                if switch {
                    self.countdown = None;
                }
            }
            FeedEvent::Disconnected(e) => {
                if self.feed_connected {
                    warn!(error = %e, "exam catalog disconnected; keeping last known schedule");
                }
                self.feed_connected = false;
                self.feed_error = Some(ControllerError::FeedDisconnected(e.to_string()));
            }
        }
    }

    fn on_command(&mut self, command: Command) {
        match command {
            Command::Register {
                registration_number,
                reply,
            } => self.register(registration_number, reply),
            Command::Select { option, reply } => {
                let now = self.clock.now();
                let result = match self.session.as_mut() {
                    Some(session) => session
                        .runtime
                        .select(option, now)
                        .map(|_| ())
                        .map_err(ControllerError::from),
                    None => Err(RuntimeError::Closed.into()),
                };
                let _ = reply.send(result);
            }
            Command::Advance { reply } => {
                let _ = reply.send(self.advance(false));
            }
            Command::Finish { reply } => {
                let _ = reply.send(self.advance(true));
            }
        }
    }

    fn register(&mut self, registration_number: String, reply: Reply) {
        let registration_number = registration_number.trim().to_string();
        let civil = self.civil_now();

        if registration_number.is_empty() {
            let _ = reply.send(Err(ControllerError::RegistrationNotFound));
            return;
        }

        let check = match self.countdown.as_ref() {
            None => Err(ControllerError::AdmissionClosed),
            Some(c) if c.session_started() => Err(ControllerError::AdmissionClosed),
            Some(c) => match c.confirmed_registration() {
                Some(confirmed) if confirmed == registration_number => Ok(None),
                Some(_) => Err(ControllerError::AdmissionClosed),
                None => Ok(Some(c.exam_id().to_string())),
            },
        };

        let exam_id = match check {
            Err(e) => {
                self.last_error = Some(e.clone());
                let _ = reply.send(Err(e));
                return;
            }
            Ok(None) => {
                let _ = reply.send(Ok(()));
                return;
            }
            Ok(Some(exam_id)) => exam_id,
        };

        if let Some(validation) = self.validating.as_mut() {
            if validation.registration_number == registration_number {
                validation.waiters.push(reply);
            } else {
                let _ = reply.send(Err(ControllerError::AdmissionClosed));
            }
            return;
        }

        let open = self
            .countdown
            .as_ref()
            .is_some_and(|c| evaluate(civil, c.schedule()).accepts_registration());
        if !open {
            self.last_error = Some(ControllerError::AdmissionClosed);
            let _ = reply.send(Err(ControllerError::AdmissionClosed));
            return;
        }

        debug!(%exam_id, %registration_number, "validating registration");
        self.validating = Some(Validation {
            registration_number: registration_number.clone(),
            waiters: vec![reply],
        });
        let backend = self.backend.clone();
        self.calls.spawn(async move {
            let outcome = backend
                .validate_registration(&exam_id, &registration_number)
                .await;
            Completion::Validated {
                exam_id,
                registration_number,
                requested_at: civil,
                outcome,
            }
        });
    }

    fn advance(&mut self, finish: bool) -> Result<(), ControllerError> {
        let now = self.clock.now();
        let session = self
            .session
            .as_mut()
            .ok_or(ControllerError::Runtime(RuntimeError::Closed))?;
        let step = if finish {
            session.runtime.finish(now)?
        } else {
            session.runtime.advance(now)?
        };
        if step == Advance::Completed {
            self.submit(SubmissionTrigger::Finish, now);
        }
        Ok(())
    }

    fn on_completion(&mut self, completion: Completion) {
        match completion {
            Completion::Validated {
                exam_id,
                registration_number,
                requested_at,
                outcome,
            } => {
                let waiters = self
                    .validating
                    .take()
                    .map(|v| v.waiters)
                    .unwrap_or_default();

                let result = match self.countdown.as_mut() {
                    Some(countdown) if countdown.exam_id() == exam_id => match outcome {
                        Ok(profile) => countdown
                            .confirm_registration(registration_number.clone(), requested_at)
                            .map(|()| self.candidate = Some(profile)),
                        Err(e) => Err(e.into()),
                    },
                    _ => Err(ControllerError::ExamEndedMidWait { exam_id }),
                };

                match &result {
                    Ok(()) => {
                        info!(%registration_number, "registration confirmed; waiting for start");
                        self.last_error = None;
                    }
                    Err(e) => {
                        warn!(%registration_number, error = %e, "registration refused");
                        self.last_error = Some(e.clone());
                    }
                }
                for waiter in waiters {
                    let _ = waiter.send(result.clone());
                }
            }
            Completion::Started {
                registration_number,
                attempt,
                outcome,
            } => {
                self.starting = false;
                match outcome {
                    Ok(start) => self.begin_session(registration_number, start),
                    Err(e) if e.is_retryable() => {
                        let delay = self
                            .config
                            .submission_retry
                            .jittered_delay(&mut self.rng, attempt);
                        warn!(error = %e, attempt, retry_in = ?delay, "could not start session");
                        self.last_error = Some(e.into());
                        self.spawn_start(registration_number, attempt + 1, delay);
                    }
                    Err(e) => {
                        error!(error = %e, %registration_number, "portal refused to start the session");
                        self.last_error = Some(e.into());
                    }
                }
            }
            Completion::Delivered {
                session_id,
                outcome,
            } => self.on_delivered(session_id, outcome),
        }
    }

    fn begin_session(&mut self, registration_number: String, start: ExamStart) {
        if self.session.is_some() {
            return;
        }
        info!(
            session_id = %start.session_id,
            questions = start.questions.len(),
            "exam session started"
        );
        self.last_error = None;
        self.session = Some(ActiveSession {
            session_id: start.session_id,
            registration_number,
            exam_id: start.exam_id,
            runtime: ExamRuntime::exam(start.questions),
            guard: SubmissionGuard::default(),
        });
        if self.end_reached {
            self.submit(SubmissionTrigger::ExamEnded, self.clock.now());
        }
    }

    fn spawn_start(&mut self, registration_number: String, attempt: u32, delay: Duration) {
        self.starting = true;
        let backend = self.backend.clone();
        self.calls.spawn(async move {
            if !delay.is_zero() {
                tokio::time::sleep(delay).await;
            }
            let outcome = backend.start_exam(&registration_number).await;
            Completion::Started {
                registration_number,
                attempt,
                outcome,
            }
        });
    }

    /// Freezes the runtime and hands the answers to the outbox. Runs at most
    /// once per session whatever the trigger.
    fn submit(&mut self, trigger: SubmissionTrigger, now: DateTime<Utc>) {
        let Some(session) = self.session.as_mut() else {
            if trigger == SubmissionTrigger::ExamEnded {
                self.end_reached = true;
            }
            return;
        };
        if !session.guard.begin(trigger) {
            return;
        }

        let answers = session.runtime.freeze(now);
        info!(
            session_id = %session.session_id,
            ?trigger,
            answered = answers.iter().filter(|a| !a.is_skipped()).count(),
            "submitting answers"
        );
        let pending = PendingSubmission {
            session_id: session.session_id,
            registration_number: session.registration_number.clone(),
            exam_id: session.exam_id.clone(),
            answers,
            queued_at: now,
            attempts: 0,
        };
        if let Err(e) = self.outbox.enqueue(pending.clone()) {
            error!(error = %e, session_id = %pending.session_id, "could not persist submission");
        }
        self.spawn_delivery(pending, Duration::ZERO);
    }

    fn replay_outbox(&mut self) {
        let pending = self.outbox.pending().to_vec();
        for submission in pending {
            info!(session_id = %submission.session_id, "replaying queued submission");
            self.spawn_delivery(submission, Duration::ZERO);
        }
    }

    fn spawn_delivery(&mut self, pending: PendingSubmission, delay: Duration) {
        if !self.delivering.insert(pending.session_id) {
            return;
        }
        let backend = self.backend.clone();
        self.calls.spawn(async move {
            if !delay.is_zero() {
                tokio::time::sleep(delay).await;
            }
            let outcome = backend
                .submit_exam_answers(pending.session_id, &pending.answers, pending.queued_at)
                .await;
            Completion::Delivered {
                session_id: pending.session_id,
                outcome,
            }
        });
    }

    fn on_delivered(&mut self, session_id: Uuid, outcome: Result<ScoreResult, GatewayError>) {
        self.delivering.remove(&session_id);
        let is_current = self
            .session
            .as_ref()
            .is_some_and(|s| s.session_id == session_id);

        match outcome {
            Ok(result) => {
                if let Err(e) = self.outbox.remove(session_id) {
                    error!(error = %e, %session_id, "could not clear delivered submission");
                }
                let Some(session) = self.session.as_mut().filter(|_| is_current) else {
                    info!(%session_id, "queued submission delivered");
                    return;
                };
                let result = session.guard.complete(result);
                info!(
                    %session_id,
                    correct = result.correct,
                    total = result.total_questions,
                    percentage = result.percentage,
                    "answers accepted"
                );
                self.result = Some(result);
                if let Some(countdown) = self.countdown.as_mut() {
                    countdown.mark_submitted();
                }
                if matches!(self.last_error, Some(ControllerError::ScoringSubmissionFailed(_))) {
                    self.last_error = None;
                }
            }
            Err(e) => {
                let attempts = match self.outbox.record_attempt(session_id) {
                    Ok(attempts) => attempts,
                    Err(err) => {
                        error!(error = %err, %session_id, "could not persist retry count");
                        self.outbox.get(session_id).map_or(1, |p| p.attempts)
                    }
                };
                if is_current {
                    self.last_error = Some(ControllerError::ScoringSubmissionFailed(e.to_string()));
                }
                if !e.is_retryable() {
                    error!(error = %e, %session_id, "submission rejected; kept in outbox");
                    return;
                }
                let delay = self
                    .config
                    .submission_retry
                    .jittered_delay(&mut self.rng, attempts.max(1));
                warn!(error = %e, %session_id, attempts, retry_in = ?delay, "submission failed");
                if let Some(pending) = self.outbox.get(session_id).cloned() {
                    self.spawn_delivery(pending, delay);
                }
            }
        }
    }

    fn publish(&self, civil: NaiveDateTime) {
        let countdown = self.countdown.as_ref();
        let session = self.session.as_ref().map(|s| ExamSession {
            session_id: s.session_id,
            registration_number: s.registration_number.clone(),
            exam_id: s.exam_id.clone(),
            phase: countdown.map_or(SessionPhase::Started, |c| c.phase()),
            seconds_remaining: countdown
                .and_then(|c| c.seconds_remaining(civil))
                .unwrap_or(0),
            answers: s.runtime.answers().to_vec(),
        });
        let blocked = countdown.is_some_and(|c| {
            !c.is_committed()
                && self.validating.is_none()
                && matches!(c.window().state, WindowState::Started | WindowState::Ended)
        });

        self.snapshots.send_replace(Snapshot {
            exam: countdown.map(|c| c.schedule().clone()),
            window: countdown.map(|c| c.window()),
            phase: countdown.map(|c| c.phase()),
            candidate: self.candidate.clone(),
            session,
            question: self.session.as_ref().and_then(|s| s.runtime.current()),
            result: self.result.clone(),
            feed_connected: self.feed_connected,
            feed_error: self.feed_error.clone(),
            blocked,
            last_error: self.last_error.clone(),
        });
    }
}
