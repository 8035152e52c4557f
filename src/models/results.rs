// src/models/results.rs

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use validator::Validate;

/// Support-facing classification of a registration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CandidateStatus {
    Submitted,
    /// Registration never consumed.
    NotAttended,
    /// Consumed but never submitted (usually a network failure).
    Incomplete,
}

/// One registration's outcome within an exam.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CandidateOutcome {
    pub registration_number: String,
    pub candidate_name: String,
    pub district: String,
    pub correct_answers: u32,
    pub wrong_answers: u32,
    pub skipped_questions: u32,
    pub total_questions: u32,
    pub submitted: bool,
    pub used: bool,

    /// Submission time; absent until submitted.
    pub timestamp: Option<DateTime<Utc>>,
}

/// All outcomes for one exam.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExamResults {
    pub exam_id: String,
    pub candidates: Vec<CandidateOutcome>,
}

/// Row of the registrations/sessions join used to build [`ExamResults`].
#[derive(Debug, Clone, FromRow)]
pub struct OutcomeRow {
    pub exam_id: String,
    pub registration_number: String,
    pub candidate_name: String,
    pub district: String,
    pub used: bool,
    pub submitted: bool,
    pub correct: Option<i64>,
    pub wrong: Option<i64>,
    pub skipped: Option<i64>,
    pub total: Option<i64>,
    pub submitted_at: Option<DateTime<Utc>>,
}

impl From<OutcomeRow> for CandidateOutcome {
    fn from(row: OutcomeRow) -> Self {
        let count = |v: Option<i64>| v.and_then(|n| u32::try_from(n).ok()).unwrap_or(0);
        Self {
            registration_number: row.registration_number,
            candidate_name: row.candidate_name,
            district: row.district,
            correct_answers: count(row.correct),
            wrong_answers: count(row.wrong),
            skipped_questions: count(row.skipped),
            total_questions: count(row.total),
            submitted: row.submitted,
            used: row.used,
            timestamp: row.submitted_at,
        }
    }
}

/// A prize winner's chosen reward.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Validate)]
pub struct WinnerChoice {
    #[validate(length(min = 1, max = 64))]
    pub exam_id: String,
    #[validate(length(min = 1, max = 64))]
    pub registration_number: String,
    #[validate(range(min = 1, max = 3))]
    pub rank: u32,
    #[validate(length(min = 1, max = 100))]
    pub prize_option: String,
}
