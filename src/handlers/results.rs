// src/handlers/results.rs

use axum::{
    Json,
    extract::{Path, State},
    http::StatusCode,
    response::IntoResponse,
};
use sqlx::{SqliteConnection, SqlitePool};
use validator::Validate;

use crate::{
    controller::ranking::rank_exam,
    error::AppError,
    models::results::{CandidateOutcome, ExamResults, OutcomeRow, WinnerChoice},
    state::AppState,
};

/// Every registration with its session outcome, grouped per exam.
///
/// Exams are ordered by id and candidates by registration number.
pub(crate) async fn load_results(
    conn: &mut SqliteConnection,
    exam_id: Option<&str>,
) -> Result<Vec<ExamResults>, sqlx::Error> {
    let rows = sqlx::query_as::<_, OutcomeRow>(
        r#"
        SELECT
            r.exam_id, r.registration_number, r.candidate_name, r.district,
            r.used, r.submitted,
            s.correct, s.wrong, s.skipped, s.total, s.submitted_at
        FROM registrations r
        LEFT JOIN sessions s ON s.registration_number = r.registration_number
        WHERE (?1 IS NULL OR r.exam_id = ?1)
        ORDER BY r.exam_id, r.registration_number
        "#,
    )
    .bind(exam_id)
    .fetch_all(conn)
    .await?;

    let mut results: Vec<ExamResults> = Vec::new();
    for row in rows {
        let exam_id = row.exam_id.clone();
        let outcome = CandidateOutcome::from(row);
        match results.last_mut() {
            Some(group) if group.exam_id == exam_id => group.candidates.push(outcome),
            _ => results.push(ExamResults {
                exam_id,
                candidates: vec![outcome],
            }),
        }
    }
    Ok(results)
}

async fn exam_exists(conn: &mut SqliteConnection, exam_id: &str) -> Result<bool, sqlx::Error> {
    let found: Option<(String,)> = sqlx::query_as("SELECT id FROM exams WHERE id = ?")
        .bind(exam_id)
        .fetch_optional(conn)
        .await?;
    Ok(found.is_some())
}

/// All candidate outcomes for every exam.
/// Admin only.
pub async fn list_results(State(pool): State<SqlitePool>) -> Result<impl IntoResponse, AppError> {
    let mut conn = pool.acquire().await?;
    let results = load_results(&mut conn, None).await.map_err(|e| {
        tracing::error!("Failed to load results: {:?}", e);
        AppError::InternalServerError(e.to_string())
    })?;

    Ok(Json(results))
}

/// Final ranking of one exam with prizes for the top three.
/// Admin only.
pub async fn exam_ranking(
    State(pool): State<SqlitePool>,
    Path(exam_id): Path<String>,
) -> Result<impl IntoResponse, AppError> {
    let mut conn = pool.acquire().await?;
    if !exam_exists(&mut conn, &exam_id).await? {
        return Err(AppError::NotFound(format!("Exam '{}' not found", exam_id)));
    }

    let results = load_results(&mut conn, Some(exam_id.as_str()))
        .await?
        .pop()
        .unwrap_or_else(|| ExamResults {
            exam_id: exam_id.clone(),
            candidates: Vec::new(),
        });

    Ok(Json(rank_exam(&results)))
}

/// Records a winner's prize choice.
///
/// Accepted only when the candidate currently holds `rank` and that rank is
/// paid. Choosing again for the same rank replaces the earlier choice.
/// Admin only.
pub async fn save_winner_choice(
    State(state): State<AppState>,
    Path(exam_id): Path<String>,
    Json(payload): Json<WinnerChoice>,
) -> Result<impl IntoResponse, AppError> {
    payload.validate()?;
    if payload.exam_id != exam_id {
        return Err(AppError::BadRequest(
            "Exam id in path and body differ".to_string(),
        ));
    }

    let mut tx = state.pool.begin().await?;
    if !exam_exists(&mut tx, &exam_id).await? {
        return Err(AppError::NotFound(format!("Exam '{}' not found", exam_id)));
    }

    let results = load_results(&mut tx, Some(exam_id.as_str()))
        .await?
        .pop()
        .unwrap_or_else(|| ExamResults {
            exam_id: exam_id.clone(),
            candidates: Vec::new(),
        });
    let ranking = rank_exam(&results);

    let holds_rank = ranking.holder_of(payload.rank).is_some_and(|holder| {
        holder.prize.is_some() && holder.candidate.registration_number == payload.registration_number
    });
    if !holds_rank {
        return Err(AppError::BadRequest(format!(
            "Candidate '{}' does not hold prize rank {}",
            payload.registration_number, payload.rank
        )));
    }

    sqlx::query(
        r#"
        INSERT INTO winner_choices (exam_id, winner_rank, registration_number, prize_option, chosen_at)
        VALUES (?, ?, ?, ?, ?)
        ON CONFLICT (exam_id, winner_rank) DO UPDATE SET
            registration_number = excluded.registration_number,
            prize_option = excluded.prize_option,
            chosen_at = excluded.chosen_at
        "#,
    )
    .bind(&payload.exam_id)
    .bind(i64::from(payload.rank))
    .bind(&payload.registration_number)
    .bind(&payload.prize_option)
    .bind(state.clock.now())
    .execute(&mut *tx)
    .await?;

    tx.commit().await?;

    tracing::info!(
        exam_id = %payload.exam_id,
        rank = payload.rank,
        registration_number = %payload.registration_number,
        "winner choice saved"
    );

    Ok((StatusCode::CREATED, Json(payload)))
}
