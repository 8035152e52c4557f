// src/controller/scoring.rs

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::models::{question::Question, score::ScoreResult, session::AnswerRecord};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verdict {
    Correct,
    Wrong,
    Skipped,
}

/// What caused a submission.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SubmissionTrigger {
    /// Candidate finished the last question.
    Finish,
    /// Scheduled end reached.
    ExamEnded,
    /// Per-attempt time limit reached.
    TimeLimit,
}

pub fn judge(question: &Question, answer: Option<&AnswerRecord>) -> Verdict {
    match answer.and_then(|a| a.selected) {
        None => Verdict::Skipped,
        Some(selected) if selected == question.correct_index => Verdict::Correct,
        Some(_) => Verdict::Wrong,
    }
}

/// Tallies `answers` against the answer key.
///
/// Only the first record per question counts, records for unknown questions
/// are ignored, and questions without a record are skipped.
pub fn score(questions: &[Question], answers: &[AnswerRecord], submitted_at: DateTime<Utc>) -> ScoreResult {
    let mut by_question: HashMap<i64, &AnswerRecord> = HashMap::with_capacity(answers.len());
    for answer in answers {
        by_question.entry(answer.question_id).or_insert(answer);
    }

    let (mut correct, mut wrong, mut skipped) = (0u32, 0u32, 0u32);
    for question in questions {
        match judge(question, by_question.get(&question.id).copied()) {
            Verdict::Correct => correct += 1,
            Verdict::Wrong => wrong += 1,
            Verdict::Skipped => skipped += 1,
        }
    }

    let total_questions = correct + wrong + skipped;
    ScoreResult {
        correct,
        wrong,
        skipped,
        total_questions,
        percentage: percentage(correct, total_questions),
        submitted_at,
    }
}

/// `correct / total * 100` rounded to two decimals; zero for an empty exam.
pub fn percentage(correct: u32, total: u32) -> f64 {
    if total == 0 {
        return 0.0;
    }
    let raw = f64::from(correct) / f64::from(total) * 100.0;
    (raw * 100.0).round() / 100.0
}

/// Exactly-once gate for producing a [`ScoreResult`].
///
/// A tick-driven and a manual trigger may both arrive; only the first
/// `begin` wins and a stored result is never replaced.
#[derive(Debug, Clone, Default)]
pub struct SubmissionGuard {
    state: GuardState,
}

#[derive(Debug, Clone, Default)]
enum GuardState {
    #[default]
    Idle,
    InFlight(SubmissionTrigger),
    Done(ScoreResult),
}

impl SubmissionGuard {
    /// Claims the submission. Returns `false` if it was already claimed.
    pub fn begin(&mut self, trigger: SubmissionTrigger) -> bool {
        match self.state {
            GuardState::Idle => {
                self.state = GuardState::InFlight(trigger);
                true
            }
            _ => false,
        }
    }

    /// Stores the result; a second call returns the first result unchanged.
    pub fn complete(&mut self, result: ScoreResult) -> ScoreResult {
        if let GuardState::Done(stored) = &self.state {
            return stored.clone();
        }
        self.state = GuardState::Done(result.clone());
        result
    }

    pub fn trigger(&self) -> Option<SubmissionTrigger> {
        match self.state {
            GuardState::InFlight(trigger) => Some(trigger),
            _ => None,
        }
    }

    pub fn result(&self) -> Option<&ScoreResult> {
        match &self.state {
            GuardState::Done(result) => Some(result),
            _ => None,
        }
    }

    pub fn is_claimed(&self) -> bool {
        !matches!(self.state, GuardState::Idle)
    }
}
