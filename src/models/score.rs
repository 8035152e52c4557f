// src/models/score.rs

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Immutable tally of one submitted attempt.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScoreResult {
    pub correct: u32,
    pub wrong: u32,
    pub skipped: u32,
    pub total_questions: u32,

    /// `correct / total * 100`, rounded to two decimals.
    pub percentage: f64,

    pub submitted_at: DateTime<Utc>,
}
