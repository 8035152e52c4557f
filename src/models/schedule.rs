// src/models/schedule.rs

use chrono::{NaiveDate, NaiveDateTime, NaiveTime, TimeDelta};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use validator::Validate;

/// Represents the 'exams' table: one published sitting of an exam.
///
/// Published schedules are never edited; a changed sitting is withdrawn and
/// published again under a new id.
#[derive(Debug, Clone, PartialEq, Eq, FromRow, Serialize, Deserialize)]
pub struct ExamSchedule {
    pub id: String,

    /// Civil date in the portal timezone.
    #[sqlx(rename = "exam_date")]
    pub date: NaiveDate,

    pub start_time: NaiveTime,

    /// When not after `start_time`, the sitting ends on the following day.
    pub end_time: NaiveTime,

    pub total_marks: i64,
    pub price: i64,
}

impl ExamSchedule {
    pub fn starts_at(&self) -> NaiveDateTime {
        self.date.and_time(self.start_time)
    }

    pub fn ends_at(&self) -> NaiveDateTime {
        let end = self.date.and_time(self.end_time);
        if self.end_time <= self.start_time {
            end + TimeDelta::days(1)
        } else {
            end
        }
    }

    pub fn duration(&self) -> TimeDelta {
        self.ends_at() - self.starts_at()
    }
}

/// DTO for publishing a new exam schedule.
#[derive(Debug, Deserialize, Validate)]
pub struct CreateExamRequest {
    #[validate(length(min = 1, max = 64))]
    pub id: String,
    pub date: NaiveDate,
    pub start_time: NaiveTime,
    pub end_time: NaiveTime,
    #[validate(range(min = 0))]
    pub total_marks: i64,
    #[validate(range(min = 0))]
    pub price: i64,
}
