// src/controller/runtime.rs

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::models::{
    question::{PublicQuestion, Question},
    session::AnswerRecord,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RuntimeMode {
    /// Answers stay opaque until scoring.
    Exam,
    /// Each selection reveals the key and locks the question.
    Practice,
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RuntimeError {
    #[error("option {option} does not exist on question {question_id}")]
    OptionOutOfRange { question_id: i64, option: usize },

    #[error("answer to question {0} is locked")]
    Locked(i64),

    #[error("finish is only available on the last question")]
    NotLastQuestion,

    #[error("question {0} has no valid answer key")]
    InvalidAnswerKey(i64),

    #[error("the session is closed")]
    Closed,
}

/// Answer key shown after a practice selection.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Reveal {
    pub correct_index: usize,
    pub context: Option<String>,
}

/// What the candidate currently sees.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct QuestionView {
    /// Zero-based position in the sequence.
    pub position: usize,
    pub total: usize,
    pub question: PublicQuestion,
    pub selected: Option<usize>,
    pub reveal: Option<Reveal>,
    pub is_last: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Advance {
    Next,
    /// Moved past the last question; the attempt should be scored.
    Completed,
}

#[derive(Debug, Clone)]
struct Item {
    question: PublicQuestion,
    key: Option<Reveal>,
}

/// Forward-only question sequencer.
///
/// Holds the current question's selection until the candidate advances; only
/// then is an [`AnswerRecord`] written, and it can never be revisited.
#[derive(Debug, Clone)]
pub struct ExamRuntime {
    mode: RuntimeMode,
    items: Vec<Item>,
    cursor: usize,
    selection: Option<(usize, DateTime<Utc>)>,
    revealed: bool,
    answers: Vec<AnswerRecord>,
    closed: bool,
}

impl ExamRuntime {
    /// Exam mode over questions delivered without answer keys.
    pub fn exam(questions: Vec<PublicQuestion>) -> Self {
        let items = questions
            .into_iter()
            .map(|question| Item {
                question,
                key: None,
            })
            .collect();
        Self::with_items(RuntimeMode::Exam, items)
    }

    /// Practice mode; every question must carry a key within its options.
    pub fn practice(questions: Vec<Question>) -> Result<Self, RuntimeError> {
        let mut items = Vec::with_capacity(questions.len());
        for q in questions {
            if !q.has_valid_key() {
                return Err(RuntimeError::InvalidAnswerKey(q.id));
            }
            items.push(Item {
                question: q.public(),
                key: Some(Reveal {
                    correct_index: q.correct_index,
                    context: q.context,
                }),
            });
        }
        Ok(Self::with_items(RuntimeMode::Practice, items))
    }

    fn with_items(mode: RuntimeMode, mut items: Vec<Item>) -> Self {
        items.sort_by_key(|item| (item.question.order, item.question.id));
        Self {
            mode,
            items,
            cursor: 0,
            selection: None,
            revealed: false,
            answers: Vec::new(),
            closed: false,
        }
    }

    pub fn mode(&self) -> RuntimeMode {
        self.mode
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn is_closed(&self) -> bool {
        self.closed
    }

    /// Records written so far, in question order.
    pub fn answers(&self) -> &[AnswerRecord] {
        &self.answers
    }

    pub fn current(&self) -> Option<QuestionView> {
        if self.closed {
            return None;
        }
        let item = self.items.get(self.cursor)?;
        Some(QuestionView {
            position: self.cursor,
            total: self.items.len(),
            question: item.question.clone(),
            selected: self.selection.map(|(option, _)| option),
            reveal: if self.revealed { item.key.clone() } else { None },
            is_last: self.cursor + 1 == self.items.len(),
        })
    }

    /// Selects an option on the current question.
    ///
    /// In practice mode the answer key is returned and the question locks.
    pub fn select(&mut self, option: usize, at: DateTime<Utc>) -> Result<Option<Reveal>, RuntimeError> {
        if self.closed {
            return Err(RuntimeError::Closed);
        }
        let item = self.items.get(self.cursor).ok_or(RuntimeError::Closed)?;
        if option >= item.question.options.len() {
            return Err(RuntimeError::OptionOutOfRange {
                question_id: item.question.id,
                option,
            });
        }
        if self.revealed {
            return Err(RuntimeError::Locked(item.question.id));
        }

        self.selection = Some((option, at));
        match self.mode {
            RuntimeMode::Exam => Ok(None),
            RuntimeMode::Practice => {
                self.revealed = true;
                Ok(item.key.clone())
            }
        }
    }

    /// Writes the current question's record (a skip if nothing is selected)
    /// and moves on.
    pub fn advance(&mut self, at: DateTime<Utc>) -> Result<Advance, RuntimeError> {
        if self.closed {
            return Err(RuntimeError::Closed);
        }
        self.record_current(at);
        if self.cursor >= self.items.len() {
            self.closed = true;
            return Ok(Advance::Completed);
        }
        Ok(Advance::Next)
    }

    /// Advances past the last question. Rejected anywhere else.
    pub fn finish(&mut self, at: DateTime<Utc>) -> Result<Advance, RuntimeError> {
        if self.closed {
            return Err(RuntimeError::Closed);
        }
        if self.cursor + 1 < self.items.len() {
            return Err(RuntimeError::NotLastQuestion);
        }
        self.advance(at)
    }

    /// Closes the runtime, keeping the pending selection and marking every
    /// unvisited question skipped. Returns one record per question.
    pub fn freeze(&mut self, at: DateTime<Utc>) -> Vec<AnswerRecord> {
        while !self.closed && self.cursor < self.items.len() {
            self.record_current(at);
        }
        self.closed = true;
        self.answers.clone()
    }

    fn record_current(&mut self, at: DateTime<Utc>) {
        let Some(item) = self.items.get(self.cursor) else {
            return;
        };
        let record = match self.selection.take() {
            Some((option, selected_at)) => AnswerRecord {
                question_id: item.question.id,
                selected: Some(option),
                answered_at: selected_at,
            },
            None => AnswerRecord::skipped(item.question.id, at),
        };
        self.answers.push(record);
        self.revealed = false;
        self.cursor += 1;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn question(id: i64, order: i64) -> Question {
        Question {
            id,
            order,
            prompt: format!("Question {id}"),
            options: vec!["A".into(), "B".into(), "C".into(), "D".into()],
            correct_index: 1,
            context: Some(format!("Because of {id}")),
        }
    }

    #[test]
    fn questions_are_presented_by_order() {
        let runtime = ExamRuntime::exam(vec![
            question(10, 3).public(),
            question(11, 1).public(),
            question(12, 2).public(),
        ]);
        assert_eq!(runtime.current().unwrap().question.id, 11);
    }

    #[test]
    fn selection_is_overwritable_until_advance() {
        let now = Utc::now();
        let mut runtime = ExamRuntime::exam(vec![question(1, 1).public(), question(2, 2).public()]);
        runtime.select(0, now).unwrap();
        runtime.select(3, now).unwrap();
        assert_eq!(runtime.current().unwrap().selected, Some(3));

        assert_eq!(runtime.advance(now).unwrap(), Advance::Next);
        assert_eq!(runtime.answers()[0].selected, Some(3));
        assert_eq!(runtime.current().unwrap().question.id, 2);
        assert_eq!(runtime.current().unwrap().selected, None);
    }

    #[test]
    fn advancing_without_selection_records_a_skip() {
        let now = Utc::now();
        let mut runtime = ExamRuntime::exam(vec![question(1, 1).public()]);
        assert_eq!(runtime.advance(now).unwrap(), Advance::Completed);
        assert!(runtime.answers()[0].is_skipped());
        assert!(runtime.is_closed());
        assert_eq!(runtime.advance(now), Err(RuntimeError::Closed));
    }

    #[test]
    fn exam_mode_reveals_nothing() {
        let now = Utc::now();
        let mut runtime = ExamRuntime::exam(vec![question(1, 1).public()]);
        assert_eq!(runtime.select(1, now).unwrap(), None);
        assert_eq!(runtime.current().unwrap().reveal, None);
    }

    #[test]
    fn practice_mode_reveals_and_locks() {
        let now = Utc::now();
        let mut runtime = ExamRuntime::practice(vec![question(1, 1), question(2, 2)]).unwrap();

        let reveal = runtime.select(0, now).unwrap().unwrap();
        assert_eq!(reveal.correct_index, 1);
        assert_eq!(reveal.context.as_deref(), Some("Because of 1"));
        assert_eq!(runtime.select(1, now), Err(RuntimeError::Locked(1)));
        assert!(runtime.current().unwrap().reveal.is_some());

        runtime.advance(now).unwrap();
        let view = runtime.current().unwrap();
        assert_eq!(view.question.id, 2);
        assert!(view.reveal.is_none());
    }

    #[test]
    fn practice_rejects_broken_answer_keys() {
        let mut broken = question(7, 1);
        broken.correct_index = 4;
        assert_eq!(
            ExamRuntime::practice(vec![broken]).unwrap_err(),
            RuntimeError::InvalidAnswerKey(7)
        );
    }

    #[test]
    fn out_of_range_option_is_rejected() {
        let mut runtime = ExamRuntime::exam(vec![question(1, 1).public()]);
        assert_eq!(
            runtime.select(4, Utc::now()),
            Err(RuntimeError::OptionOutOfRange {
                question_id: 1,
                option: 4
            })
        );
    }

    #[test]
    fn finish_only_on_last_question() {
        let now = Utc::now();
        let mut runtime = ExamRuntime::exam(vec![question(1, 1).public(), question(2, 2).public()]);
        assert_eq!(runtime.finish(now), Err(RuntimeError::NotLastQuestion));
        runtime.advance(now).unwrap();
        assert_eq!(runtime.finish(now).unwrap(), Advance::Completed);
    }

    #[test]
    fn freeze_keeps_pending_selection_and_skips_the_rest() {
        let now = Utc::now();
        let mut runtime = ExamRuntime::exam(vec![
            question(1, 1).public(),
            question(2, 2).public(),
            question(3, 3).public(),
        ]);
        runtime.select(2, now).unwrap();

        let answers = runtime.freeze(now);
        assert_eq!(answers.len(), 3);
        assert_eq!(answers[0].selected, Some(2));
        assert!(answers[1].is_skipped());
        assert!(answers[2].is_skipped());

        // Frozen: further input is refused and the records stay as they were.
        assert_eq!(runtime.select(0, now), Err(RuntimeError::Closed));
        assert_eq!(runtime.freeze(now), answers);
    }
}
