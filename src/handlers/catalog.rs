// src/handlers/catalog.rs

use axum::{
    Json,
    extract::{
        State,
        ws::{Message, WebSocket, WebSocketUpgrade},
    },
    response::IntoResponse,
};
use sqlx::SqlitePool;
use tokio::sync::watch;

use crate::{error::AppError, models::schedule::ExamSchedule, state::CatalogHub};

/// Every exam that has not been withdrawn, in start order.
pub async fn published_exams(pool: &SqlitePool) -> Result<Vec<ExamSchedule>, sqlx::Error> {
    sqlx::query_as::<_, ExamSchedule>(
        r#"
        SELECT id, exam_date, start_time, end_time, total_marks, price
        FROM exams
        WHERE withdrawn = FALSE
        ORDER BY exam_date, start_time, id
        "#,
    )
    .fetch_all(pool)
    .await
}

/// Lists the published exam catalog.
pub async fn list_exams(State(pool): State<SqlitePool>) -> Result<impl IntoResponse, AppError> {
    let exams = published_exams(&pool).await.map_err(|e| {
        tracing::error!("Failed to list exams: {:?}", e);
        AppError::InternalServerError(e.to_string())
    })?;

    Ok(Json(exams))
}

/// Live catalog feed.
///
/// Sends the full catalog as a JSON array right after the upgrade and again
/// after every publish or withdrawal.
pub async fn exam_feed(ws: WebSocketUpgrade, State(catalog): State<CatalogHub>) -> impl IntoResponse {
    ws.on_upgrade(move |socket| stream_catalog(socket, catalog.subscribe()))
}

async fn stream_catalog(mut socket: WebSocket, mut updates: watch::Receiver<Vec<ExamSchedule>>) {
    loop {
        let payload = match serde_json::to_string(&*updates.borrow_and_update()) {
            Ok(payload) => payload,
            Err(e) => {
                tracing::error!("Failed to encode exam catalog: {:?}", e);
                return;
            }
        };
        if socket.send(Message::Text(payload.into())).await.is_err() {
            return;
        }

        // Wait for the next catalog change; drain (and ignore) client frames meanwhile.
        loop {
            tokio::select! {
                changed = updates.changed() => {
                    if changed.is_err() {
                        return;
                    }
                    break;
                }
                incoming = socket.recv() => match incoming {
                    Some(Ok(Message::Close(_))) | Some(Err(_)) | None => return,
                    Some(Ok(_)) => {}
                },
            }
        }
    }
}
