// src/models/session.rs

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;
use validator::Validate;

use crate::models::{question::PublicQuestion, score::ScoreResult};

/// Admission/session lifecycle. Only ever moves forward.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionPhase {
    TooEarly,
    Open,
    Started,
    Ended,
    Submitted,
}

/// One question's outcome as recorded by the runtime.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AnswerRecord {
    pub question_id: i64,

    /// Selected option index; `None` means skipped.
    pub selected: Option<usize>,

    pub answered_at: DateTime<Utc>,
}

impl AnswerRecord {
    pub fn skipped(question_id: i64, at: DateTime<Utc>) -> Self {
        Self {
            question_id,
            selected: None,
            answered_at: at,
        }
    }

    pub fn is_skipped(&self) -> bool {
        self.selected.is_none()
    }
}

/// Read-only view of the candidate's running session.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ExamSession {
    pub session_id: Uuid,
    pub registration_number: String,
    pub exam_id: String,
    pub phase: SessionPhase,
    pub seconds_remaining: i64,
    pub answers: Vec<AnswerRecord>,
}

#[derive(Debug, Serialize, Deserialize, Validate)]
pub struct StartExamRequest {
    #[validate(length(min = 1, max = 64))]
    pub registration_number: String,
}

/// Returned by the backend when a registration is consumed.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExamStart {
    /// Idempotency key for the eventual submission.
    pub session_id: Uuid,
    pub exam_id: String,
    pub questions: Vec<PublicQuestion>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct SubmitAnswersRequest {
    pub answers: Vec<AnswerRecord>,

    /// When the terminal froze the answers. Absent means "now"; the server
    /// clamps it into the session's lifetime.
    #[serde(default)]
    pub submitted_at: Option<DateTime<Utc>>,
}

/// Represents the 'sessions' table. Score columns stay NULL until submission.
#[derive(Debug, Clone, FromRow)]
pub struct SessionRow {
    pub id: String,
    pub registration_number: String,
    pub exam_id: String,
    pub correct: Option<i64>,
    pub wrong: Option<i64>,
    pub skipped: Option<i64>,
    pub total: Option<i64>,
    pub percentage: Option<f64>,
    pub started_at: DateTime<Utc>,
    pub submitted_at: Option<DateTime<Utc>>,
}

impl SessionRow {
    /// The stored result, if this session was already submitted.
    pub fn score(&self) -> Option<ScoreResult> {
        Some(ScoreResult {
            correct: u32::try_from(self.correct?).ok()?,
            wrong: u32::try_from(self.wrong?).ok()?,
            skipped: u32::try_from(self.skipped?).ok()?,
            total_questions: u32::try_from(self.total?).ok()?,
            percentage: self.percentage?,
            submitted_at: self.submitted_at?,
        })
    }
}
