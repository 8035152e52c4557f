// src/routes.rs

use axum::{
    Router,
    http::{HeaderValue, Method},
    middleware,
    routing::{delete, get, post},
};
use tower_http::{cors::CorsLayer, trace::TraceLayer};

use crate::{
    handlers::{admin, catalog, registration, results, session},
    state::AppState,
    utils::jwt::{admin_middleware, auth_middleware},
};

/// Assembles the main application router.
///
/// * Merges all sub-routers (catalog, registrations, sessions, admin).
/// * Applies global middleware (Trace, CORS).
/// * Injects global state (pool, config, clock, catalog hub).
pub fn create_router(state: AppState) -> Router {
    let origins = [
        HeaderValue::from_static("http://localhost:3000"),
        HeaderValue::from_static("http://127.0.0.1:3000"),
    ];

    let cors = CorsLayer::new()
        .allow_origin(origins)
        .allow_methods([Method::GET, Method::POST, Method::DELETE])
        .allow_headers([
            axum::http::header::AUTHORIZATION,
            axum::http::header::CONTENT_TYPE,
        ]);

    let exam_routes = Router::new()
        .route("/", get(catalog::list_exams))
        .route("/feed", get(catalog::exam_feed));

    let registration_routes =
        Router::new().route("/validate", post(registration::validate_registration));

    let session_routes = Router::new()
        .route("/", post(registration::start_exam))
        .route("/{id}/submit", post(session::submit_answers));

    let admin_routes = Router::new()
        .route("/exams", post(admin::create_exam))
        .route("/exams/{id}", delete(admin::withdraw_exam))
        .route("/exams/{id}/questions", post(admin::create_question))
        .route("/registrations", post(admin::create_registration))
        .route("/results", get(results::list_results))
        .route("/results/{exam_id}/ranking", get(results::exam_ranking))
        .route("/results/{exam_id}/winners", post(results::save_winner_choice))
        // Double middleware protection: Auth first, then Admin check
        .layer(middleware::from_fn(admin_middleware))
        .layer(middleware::from_fn_with_state(state.clone(), auth_middleware));

    Router::new()
        .nest("/api/exams", exam_routes)
        .nest("/api/registrations", registration_routes)
        .nest("/api/sessions", session_routes)
        .nest("/api/admin", admin_routes)
        // Global Middleware (applied from outside in)
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .with_state(state)
}
