// src/handlers/admin.rs

use axum::{
    Json,
    extract::{Path, State},
    http::StatusCode,
    response::IntoResponse,
};
use sqlx::types::Json as SqlJson;
use validator::Validate;

use crate::{
    error::{AppError, is_unique_violation},
    handlers::registration::find_exam,
    models::{
        question::{CreateQuestionRequest, Question},
        registration::{CreateRegistrationRequest, Registration},
        schedule::{CreateExamRequest, ExamSchedule},
    },
    state::AppState,
};

async fn publish_catalog(state: &AppState) {
    if let Err(e) = state.catalog.refresh(&state.pool).await {
        tracing::error!("Failed to refresh exam catalog: {:?}", e);
    }
}

/// Publishes a new exam sitting and pushes the catalog to every feed.
/// Admin only.
pub async fn create_exam(
    State(state): State<AppState>,
    Json(payload): Json<CreateExamRequest>,
) -> Result<impl IntoResponse, AppError> {
    if let Err(validation_errors) = payload.validate() {
        return Err(AppError::BadRequest(validation_errors.to_string()));
    }

    let exam = ExamSchedule {
        id: payload.id.trim().to_string(),
        date: payload.date,
        start_time: payload.start_time,
        end_time: payload.end_time,
        total_marks: payload.total_marks,
        price: payload.price,
    };

    sqlx::query(
        r#"
        INSERT INTO exams (id, exam_date, start_time, end_time, total_marks, price)
        VALUES (?, ?, ?, ?, ?, ?)
        "#,
    )
    .bind(&exam.id)
    .bind(exam.date)
    .bind(exam.start_time)
    .bind(exam.end_time)
    .bind(exam.total_marks)
    .bind(exam.price)
    .execute(&state.pool)
    .await
    .map_err(|e| {
        if is_unique_violation(&e) {
            AppError::Conflict(format!("Exam '{}' already exists", exam.id))
        } else {
            tracing::error!("Failed to create exam: {:?}", e);
            AppError::InternalServerError(e.to_string())
        }
    })?;

    tracing::info!(exam_id = %exam.id, starts_at = %exam.starts_at(), "exam published");
    publish_catalog(&state).await;

    Ok((StatusCode::CREATED, Json(exam)))
}

/// Withdraws an exam from the catalog. Its registrations and sessions are kept.
/// Admin only.
pub async fn withdraw_exam(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<impl IntoResponse, AppError> {
    let result = sqlx::query("UPDATE exams SET withdrawn = TRUE WHERE id = ? AND withdrawn = FALSE")
        .bind(&id)
        .execute(&state.pool)
        .await?;

    if result.rows_affected() == 0 {
        return Err(AppError::NotFound(format!("Exam '{}' not found", id)));
    }

    tracing::info!(exam_id = %id, "exam withdrawn");
    publish_catalog(&state).await;

    Ok(StatusCode::NO_CONTENT)
}

/// Adds a question to an exam.
/// Admin only.
pub async fn create_question(
    State(state): State<AppState>,
    Path(exam_id): Path<String>,
    Json(payload): Json<CreateQuestionRequest>,
) -> Result<impl IntoResponse, AppError> {
    if let Err(validation_errors) = payload.validate() {
        return Err(AppError::BadRequest(validation_errors.to_string()));
    }
    if payload.correct_index >= payload.options.len() {
        return Err(AppError::BadRequest(
            "correct_index must point at one of the options".to_string(),
        ));
    }

    let mut conn = state.pool.acquire().await?;
    if find_exam(&mut conn, &exam_id).await?.is_none() {
        return Err(AppError::NotFound(format!("Exam '{}' not found", exam_id)));
    }

    let correct_index = i64::try_from(payload.correct_index)
        .map_err(|_| AppError::BadRequest("correct_index out of range".to_string()))?;

    let (id,): (i64,) = sqlx::query_as(
        r#"
        INSERT INTO questions (exam_id, position, prompt, options, correct_index, context)
        VALUES (?, ?, ?, ?, ?, ?)
        RETURNING id
        "#,
    )
    .bind(&exam_id)
    .bind(payload.order)
    .bind(&payload.prompt)
    .bind(SqlJson(&payload.options))
    .bind(correct_index)
    .bind(&payload.context)
    .fetch_one(&mut *conn)
    .await
    .map_err(|e| {
        tracing::error!("Failed to create question: {:?}", e);
        AppError::InternalServerError(e.to_string())
    })?;

    let question = Question {
        id,
        order: payload.order,
        prompt: payload.prompt,
        options: payload.options,
        correct_index: payload.correct_index,
        context: payload.context,
    };

    Ok((StatusCode::CREATED, Json(question)))
}

/// Issues a registration number for an exam.
/// Admin only.
pub async fn create_registration(
    State(state): State<AppState>,
    Json(payload): Json<CreateRegistrationRequest>,
) -> Result<impl IntoResponse, AppError> {
    if let Err(validation_errors) = payload.validate() {
        return Err(AppError::BadRequest(validation_errors.to_string()));
    }

    let mut conn = state.pool.acquire().await?;
    if find_exam(&mut conn, &payload.exam_id).await?.is_none() {
        return Err(AppError::NotFound(format!("Exam '{}' not found", payload.exam_id)));
    }

    let registration = Registration {
        registration_number: payload.registration_number.trim().to_string(),
        candidate_name: payload.candidate_name,
        district: payload.district,
        exam_id: payload.exam_id,
        used: false,
        submitted: false,
    };

    sqlx::query(
        r#"
        INSERT INTO registrations (registration_number, candidate_name, district, exam_id)
        VALUES (?, ?, ?, ?)
        "#,
    )
    .bind(&registration.registration_number)
    .bind(&registration.candidate_name)
    .bind(&registration.district)
    .bind(&registration.exam_id)
    .execute(&mut *conn)
    .await
    .map_err(|e| {
        if is_unique_violation(&e) {
            AppError::Conflict(format!(
                "Registration '{}' already exists",
                registration.registration_number
            ))
        } else {
            tracing::error!("Failed to create registration: {:?}", e);
            AppError::InternalServerError(e.to_string())
        }
    })?;

    Ok((StatusCode::CREATED, Json(registration)))
}
