// src/handlers/session.rs

use axum::{
    Json,
    extract::{Path, State},
    response::IntoResponse,
};
use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::{
    controller::scoring,
    error::AppError,
    handlers::registration::exam_questions,
    models::{
        schedule::ExamSchedule,
        score::ScoreResult,
        session::{SessionRow, SubmitAnswersRequest},
    },
    state::AppState,
};

const SESSION_COLUMNS: &str = "id, registration_number, exam_id, correct, wrong, skipped, total, \
     percentage, started_at, submitted_at";

/// Time a submission ranks by: the terminal's freeze time, held inside
/// `[started_at, latest]`. Missing means `latest`.
fn submission_time(
    frozen_at: Option<DateTime<Utc>>,
    started_at: DateTime<Utc>,
    latest: DateTime<Utc>,
) -> DateTime<Utc> {
    frozen_at.unwrap_or(latest).min(latest).max(started_at)
}

/// Scores and stores a session's answers.
///
/// Idempotent per session id: once a result is stored, every later call
/// returns it unchanged and the new answers are ignored. Submissions after
/// the scheduled end are still accepted, but rank by when the terminal froze
/// the answers, never later than the exam's end.
pub async fn submit_answers(
    State(state): State<AppState>,
    Path(session_id): Path<Uuid>,
    Json(payload): Json<SubmitAnswersRequest>,
) -> Result<impl IntoResponse, AppError> {
    let mut tx = state.pool.begin().await?;

    let session = sqlx::query_as::<_, SessionRow>(&format!(
        "SELECT {SESSION_COLUMNS} FROM sessions WHERE id = ?"
    ))
    .bind(session_id.to_string())
    .fetch_optional(&mut *tx)
    .await?
    .ok_or_else(|| AppError::NotFound("Session not found".to_string()))?;

    if let Some(stored) = session.score() {
        tracing::debug!(%session_id, "duplicate submission; returning stored result");
        return Ok(Json(stored));
    }

    // Withdrawn exams still bound their running sessions.
    let exam = sqlx::query_as::<_, ExamSchedule>(
        "SELECT id, exam_date, start_time, end_time, total_marks, price FROM exams WHERE id = ?",
    )
    .bind(&session.exam_id)
    .fetch_optional(&mut *tx)
    .await?;

    let now = state.clock.now();
    let latest = exam
        .map(|exam| state.portal_time().instant(exam.ends_at()).min(now))
        .unwrap_or(now);
    let submitted_at = submission_time(payload.submitted_at, session.started_at, latest);
    if payload.submitted_at.is_some_and(|claimed| claimed != submitted_at) {
        tracing::warn!(%session_id, claimed = ?payload.submitted_at, %submitted_at, "submission time clamped");
    }

    let questions = exam_questions(&mut tx, &session.exam_id).await?;
    let result: ScoreResult = scoring::score(&questions, &payload.answers, submitted_at);

    let updated = sqlx::query(
        r#"
        UPDATE sessions
        SET correct = ?, wrong = ?, skipped = ?, total = ?, percentage = ?, submitted_at = ?
        WHERE id = ? AND submitted_at IS NULL
        "#,
    )
    .bind(i64::from(result.correct))
    .bind(i64::from(result.wrong))
    .bind(i64::from(result.skipped))
    .bind(i64::from(result.total_questions))
    .bind(result.percentage)
    .bind(result.submitted_at)
    .bind(session_id.to_string())
    .execute(&mut *tx)
    .await?;

    if updated.rows_affected() == 0 {
        // Lost a race with a concurrent submission of the same session.
        let stored = sqlx::query_as::<_, SessionRow>(&format!(
            "SELECT {SESSION_COLUMNS} FROM sessions WHERE id = ?"
        ))
        .bind(session_id.to_string())
        .fetch_one(&mut *tx)
        .await?
        .score()
        .ok_or_else(|| AppError::InternalServerError("Session score missing".to_string()))?;
        return Ok(Json(stored));
    }

    sqlx::query("UPDATE registrations SET submitted = TRUE WHERE registration_number = ?")
        .bind(&session.registration_number)
        .execute(&mut *tx)
        .await?;

    tx.commit().await?;

    tracing::info!(
        %session_id,
        correct = result.correct,
        total = result.total_questions,
        "answers scored"
    );

    Ok(Json(result))
}
