// src/controller/practice.rs

use chrono::{DateTime, TimeDelta, Utc};

use crate::{
    controller::{
        runtime::{Advance, ExamRuntime, QuestionView, Reveal, RuntimeError},
        scoring::{SubmissionGuard, SubmissionTrigger, score},
    },
    models::{question::Question, score::ScoreResult},
};

/// Self-paced attempt scored locally against the bundled answer key.
///
/// Every selection reveals the key; the attempt is scored once, either when
/// the candidate moves past the last question or when the time limit runs out.
#[derive(Debug, Clone)]
pub struct PracticeSession {
    questions: Vec<Question>,
    runtime: ExamRuntime,
    started_at: DateTime<Utc>,
    time_limit: Option<TimeDelta>,
    guard: SubmissionGuard,
}

impl PracticeSession {
    pub fn new(
        questions: Vec<Question>,
        started_at: DateTime<Utc>,
        time_limit: Option<TimeDelta>,
    ) -> Result<Self, RuntimeError> {
        let runtime = ExamRuntime::practice(questions.clone())?;
        Ok(Self {
            questions,
            runtime,
            started_at,
            time_limit,
            guard: SubmissionGuard::default(),
        })
    }

    pub fn current(&self) -> Option<QuestionView> {
        self.runtime.current()
    }

    pub fn result(&self) -> Option<&ScoreResult> {
        self.guard.result()
    }

    pub fn deadline(&self) -> Option<DateTime<Utc>> {
        self.time_limit.map(|limit| self.started_at + limit)
    }

    pub fn seconds_remaining(&self, now: DateTime<Utc>) -> Option<i64> {
        self.deadline()
            .map(|deadline| (deadline - now).num_seconds().max(0))
    }

    /// Selects an option, returning the revealed key. Past the deadline the
    /// attempt is submitted instead and the selection is refused.
    pub fn select(&mut self, option: usize, now: DateTime<Utc>) -> Result<Reveal, RuntimeError> {
        if self.tick(now).is_some() {
            return Err(RuntimeError::Closed);
        }
        self.runtime
            .select(option, now)?
            .ok_or(RuntimeError::Closed)
    }

    /// Moves on; returns the score when the last question was left.
    pub fn advance(&mut self, now: DateTime<Utc>) -> Result<Option<ScoreResult>, RuntimeError> {
        if self.tick(now).is_some() {
            return Err(RuntimeError::Closed);
        }
        match self.runtime.advance(now)? {
            Advance::Next => Ok(None),
            Advance::Completed => Ok(self.submit(SubmissionTrigger::Finish, now)),
        }
    }

    /// Submits on time-limit expiry. Returns the result the first time only.
    pub fn tick(&mut self, now: DateTime<Utc>) -> Option<ScoreResult> {
        let expired = self.deadline().is_some_and(|deadline| now >= deadline);
        if !expired {
            return None;
        }
        self.submit(SubmissionTrigger::TimeLimit, now)
    }

    fn submit(&mut self, trigger: SubmissionTrigger, now: DateTime<Utc>) -> Option<ScoreResult> {
        if !self.guard.begin(trigger) {
            return None;
        }
        let answers = self.runtime.freeze(now);
        let result = score(&self.questions, &answers, now);
        tracing::info!(
            ?trigger,
            correct = result.correct,
            total = result.total_questions,
            "practice attempt scored"
        );
        Some(self.guard.complete(result))
    }
}
