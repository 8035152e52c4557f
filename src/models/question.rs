// src/models/question.rs

use serde::{Deserialize, Serialize};
use sqlx::{prelude::FromRow, types::Json};
use validator::Validate;

/// A multiple-choice question with its answer key.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Question {
    pub id: i64,

    /// Display position within the exam.
    pub order: i64,

    pub prompt: String,
    pub options: Vec<String>,

    /// Index into `options`.
    pub correct_index: usize,

    /// Explanation revealed in practice mode only.
    pub context: Option<String>,
}

impl Question {
    pub fn has_valid_key(&self) -> bool {
        self.correct_index < self.options.len()
    }

    pub fn public(&self) -> PublicQuestion {
        PublicQuestion {
            id: self.id,
            order: self.order,
            prompt: self.prompt.clone(),
            options: self.options.clone(),
        }
    }
}

/// DTO for sending a question to an exam-mode client (no answer key, no context).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PublicQuestion {
    pub id: i64,
    pub order: i64,
    pub prompt: String,
    pub options: Vec<String>,
}

/// Represents the 'questions' table.
#[derive(Debug, Clone, FromRow)]
pub struct QuestionRow {
    pub id: i64,
    pub exam_id: String,
    pub position: i64,
    pub prompt: String,
    pub options: Json<Vec<String>>,
    pub correct_index: i64,
    pub context: Option<String>,
}

impl From<QuestionRow> for Question {
    fn from(row: QuestionRow) -> Self {
        Self {
            id: row.id,
            order: row.position,
            prompt: row.prompt,
            options: row.options.0,
            correct_index: usize::try_from(row.correct_index).unwrap_or(usize::MAX),
            context: row.context,
        }
    }
}

/// DTO for adding a question to an exam.
#[derive(Debug, Serialize, Deserialize, Validate)]
pub struct CreateQuestionRequest {
    pub order: i64,
    #[validate(length(min = 1, max = 1000))]
    pub prompt: String,
    #[validate(custom(function = validate_options))]
    pub options: Vec<String>,
    pub correct_index: usize,
    #[validate(length(max = 2000))]
    pub context: Option<String>,
}

fn validate_options(options: &[String]) -> Result<(), validator::ValidationError> {
    if options.len() < 2 {
        return Err(validator::ValidationError::new("at_least_two_options"));
    }
    for opt in options {
        if opt.is_empty() || opt.len() > 500 {
            return Err(validator::ValidationError::new("option_length"));
        }
    }
    Ok(())
}
