// src/handlers/registration.rs

use axum::{Json, extract::State, http::StatusCode, response::IntoResponse};
use sqlx::{SqliteConnection, SqlitePool};
use uuid::Uuid;
use validator::Validate;

use crate::{
    config::START_SKEW_GRACE_SECONDS,
    controller::window::{WindowState, evaluate},
    error::AppError,
    models::{
        question::{PublicQuestion, Question, QuestionRow},
        registration::{
            CandidateProfile, Registration, ValidateRegistrationRequest,
            ValidateRegistrationResponse,
        },
        schedule::ExamSchedule,
        session::{ExamStart, SessionRow, StartExamRequest},
    },
    state::AppState,
};

pub(crate) async fn find_registration(
    conn: &mut SqliteConnection,
    registration_number: &str,
) -> Result<Option<Registration>, sqlx::Error> {
    sqlx::query_as::<_, Registration>(
        r#"
        SELECT registration_number, candidate_name, district, exam_id, used, submitted
        FROM registrations
        WHERE registration_number = ?
        "#,
    )
    .bind(registration_number)
    .fetch_optional(conn)
    .await
}

pub(crate) async fn find_exam(
    conn: &mut SqliteConnection,
    exam_id: &str,
) -> Result<Option<ExamSchedule>, sqlx::Error> {
    sqlx::query_as::<_, ExamSchedule>(
        r#"
        SELECT id, exam_date, start_time, end_time, total_marks, price
        FROM exams
        WHERE id = ? AND withdrawn = FALSE
        "#,
    )
    .bind(exam_id)
    .fetch_optional(conn)
    .await
}

/// Questions of an exam, answer keys included, in presentation order.
pub(crate) async fn exam_questions(
    conn: &mut SqliteConnection,
    exam_id: &str,
) -> Result<Vec<Question>, sqlx::Error> {
    let rows = sqlx::query_as::<_, QuestionRow>(
        r#"
        SELECT id, exam_id, position, prompt, options, correct_index, context
        FROM questions
        WHERE exam_id = ?
        ORDER BY position, id
        "#,
    )
    .bind(exam_id)
    .fetch_all(conn)
    .await?;

    Ok(rows.into_iter().map(Question::from).collect())
}

/// Checks a registration number against an exam without consuming it.
///
/// Always answers 200; `valid` is false for an unknown number or one issued
/// for another exam.
pub async fn validate_registration(
    State(pool): State<SqlitePool>,
    Json(payload): Json<ValidateRegistrationRequest>,
) -> Result<impl IntoResponse, AppError> {
    payload.validate()?;

    let mut conn = pool.acquire().await?;
    let registration = find_registration(&mut conn, payload.registration_number.trim())
        .await?
        .filter(|r| r.exam_id == payload.exam_id);

    let response = match registration {
        Some(reg) => ValidateRegistrationResponse {
            valid: !reg.used,
            used: reg.used,
            candidate_profile: Some(CandidateProfile::from(&reg)),
        },
        None => ValidateRegistrationResponse {
            valid: false,
            used: false,
            candidate_profile: None,
        },
    };

    Ok(Json(response))
}

/// Starts the exam session for a registration.
///
/// * Rejected with 403 unless the exam has started by the server's clock,
///   give or take `START_SKEW_GRACE_SECONDS`. The Open phase only admits
///   registrations; questions are not served before the start.
/// * Marks the registration used and returns the questions without keys.
/// * A used registration whose session was never submitted gets that same
///   session back, so a start lost in transit can be retried.
pub async fn start_exam(
    State(state): State<AppState>,
    Json(payload): Json<StartExamRequest>,
) -> Result<impl IntoResponse, AppError> {
    payload.validate()?;
    let registration_number = payload.registration_number.trim();

    let mut tx = state.pool.begin().await?;

    let registration = find_registration(&mut tx, registration_number)
        .await?
        .ok_or_else(|| AppError::NotFound("Registration not found".to_string()))?;

    let exam = find_exam(&mut tx, &registration.exam_id)
        .await?
        .ok_or_else(|| AppError::NotFound(format!("Exam '{}' not found", registration.exam_id)))?;

    let now = state.clock.now();
    let window = evaluate(state.portal_time().civil(now), &exam);
    let admissible = match window.state {
        WindowState::Started => true,
        WindowState::Open => window.seconds_until_start <= START_SKEW_GRACE_SECONDS,
        _ => false,
    };
    if !admissible {
        return Err(AppError::Forbidden(format!(
            "Exam '{}' is not open for admission",
            exam.id
        )));
    }

    let session_id = if registration.used {
        let existing = sqlx::query_as::<_, SessionRow>(
            r#"
            SELECT id, registration_number, exam_id, correct, wrong, skipped, total, percentage,
                   started_at, submitted_at
            FROM sessions
            WHERE registration_number = ?
            "#,
        )
        .bind(registration_number)
        .fetch_optional(&mut *tx)
        .await?;

        match existing {
            Some(session) if session.submitted_at.is_none() => {
                tracing::info!(session_id = %session.id, "resuming unsubmitted session");
                Uuid::parse_str(&session.id)
                    .map_err(|e| AppError::InternalServerError(e.to_string()))?
            }
            _ => {
                return Err(AppError::Conflict(
                    "Registration has already been used".to_string(),
                ));
            }
        }
    } else {
        let marked = sqlx::query(
            "UPDATE registrations SET used = TRUE WHERE registration_number = ? AND used = FALSE",
        )
        .bind(registration_number)
        .execute(&mut *tx)
        .await?;
        if marked.rows_affected() != 1 {
            return Err(AppError::Conflict(
                "Registration has already been used".to_string(),
            ));
        }

        let session_id = Uuid::new_v4();
        sqlx::query(
            r#"
            INSERT INTO sessions (id, registration_number, exam_id, started_at)
            VALUES (?, ?, ?, ?)
            "#,
        )
        .bind(session_id.to_string())
        .bind(registration_number)
        .bind(&exam.id)
        .bind(now)
        .execute(&mut *tx)
        .await
        .map_err(|e| {
            if crate::error::is_unique_violation(&e) {
                AppError::Conflict("Registration has already been used".to_string())
            } else {
                tracing::error!("Failed to create session: {:?}", e);
                AppError::InternalServerError(e.to_string())
            }
        })?;
        tracing::info!(%session_id, exam_id = %exam.id, "exam session created");
        session_id
    };

    let questions: Vec<PublicQuestion> = exam_questions(&mut tx, &exam.id)
        .await?
        .iter()
        .map(Question::public)
        .collect();

    tx.commit().await?;

    Ok((
        StatusCode::CREATED,
        Json(ExamStart {
            session_id,
            exam_id: exam.id,
            questions,
        }),
    ))
}
