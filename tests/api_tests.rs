// tests/api_tests.rs

use std::{net::SocketAddr, sync::Arc, time::Duration};

use chrono::{DateTime, FixedOffset, NaiveDate, Utc};
use exam_portal::{
    config::{Config, ControllerConfig},
    controller::{
        AdmissionController, Snapshot,
        feed::{CatalogSource, ReconnectPolicy, WsCatalogSource},
        gateway::{GatewayError, HttpPortal, PortalBackend},
        outbox::SubmissionOutbox,
        ranking::rank_all,
        window::WindowState,
    },
    models::{
        results::{CandidateStatus, WinnerChoice},
        session::AnswerRecord,
    },
    routes,
    state::{AppState, CatalogHub},
    utils::{
        clock::{ManualClock, PortalTime},
        jwt::{ADMIN_ROLE, sign_jwt},
    },
};
use futures::StreamExt;
use serde_json::json;
use sqlx::{SqlitePool, sqlite::SqlitePoolOptions};

const JWT_SECRET: &str = "test_secret_for_integration_tests";

struct TestApp {
    address: String,
    clock: ManualClock,
    pool: SqlitePool,
    admin_token: String,
    client: reqwest::Client,
}

fn portal_time() -> PortalTime {
    PortalTime::new(FixedOffset::east_opt(6 * 3600).unwrap())
}

/// Instant of a civil time on 2026-03-01 in the portal timezone.
fn civil(h: u32, m: u32, s: u32) -> DateTime<Utc> {
    portal_time().instant(
        NaiveDate::from_ymd_opt(2026, 3, 1)
            .unwrap()
            .and_hms_opt(h, m, s)
            .unwrap(),
    )
}

/// Helper function to spawn the app on a random port for testing.
/// Uses a private in-memory database and a clock parked at 09:50.
async fn spawn_app() -> TestApp {
    // A single connection that never expires keeps the in-memory database alive.
    let pool = SqlitePoolOptions::new()
        .max_connections(1)
        .min_connections(1)
        .idle_timeout(None)
        .max_lifetime(None)
        .connect("sqlite::memory:")
        .await
        .expect("Failed to open in-memory sqlite");

    sqlx::migrate!("./migrations")
        .run(&pool)
        .await
        .expect("Failed to migrate database");

    let config = Config {
        database_url: "sqlite::memory:".to_string(),
        jwt_secret: JWT_SECRET.to_string(),
        jwt_expiration: 600, // 10 minutes for tests
        rust_log: "error".to_string(),
        bind_addr: SocketAddr::from(([127, 0, 0, 1], 0)),
        utc_offset: portal_time().offset(),
    };

    let clock = ManualClock::new(civil(9, 50, 0));
    let catalog = CatalogHub::new();
    catalog.refresh(&pool).await.unwrap();

    let state = AppState {
        pool: pool.clone(),
        config,
        clock: Arc::new(clock.clone()),
        catalog,
    };
    let app = routes::create_router(state);

    // Bind to port 0 to get a random available port
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
        .await
        .expect("Failed to bind random port");
    let port = listener.local_addr().unwrap().port();

    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });

    TestApp {
        address: format!("http://127.0.0.1:{}", port),
        clock,
        pool,
        admin_token: sign_jwt("tests", ADMIN_ROLE, JWT_SECRET, 600).unwrap(),
        client: reqwest::Client::new(),
    }
}

impl TestApp {
    fn portal(&self) -> HttpPortal {
        HttpPortal::new(&self.address)
            .unwrap()
            .with_admin_token(self.admin_token.clone())
    }

    async fn admin_post(&self, path: &str, body: serde_json::Value) -> reqwest::Response {
        self.client
            .post(format!("{}{}", self.address, path))
            .bearer_auth(&self.admin_token)
            .json(&body)
            .send()
            .await
            .expect("Failed to execute request")
    }

    async fn create_exam(&self, id: &str, start: &str, end: &str) {
        let response = self
            .admin_post(
                "/api/admin/exams",
                json!({
                    "id": id,
                    "date": "2026-03-01",
                    "start_time": start,
                    "end_time": end,
                    "total_marks": 30,
                    "price": 50
                }),
            )
            .await;
        assert_eq!(response.status().as_u16(), 201);
    }

    /// Adds three questions whose correct option is index 1.
    async fn add_questions(&self, exam_id: &str) {
        for order in 1..=3 {
            let response = self
                .admin_post(
                    &format!("/api/admin/exams/{}/questions", exam_id),
                    json!({
                        "order": order,
                        "prompt": format!("Question {order}"),
                        "options": ["A", "B", "C", "D"],
                        "correct_index": 1,
                        "context": "B is correct"
                    }),
                )
                .await;
            assert_eq!(response.status().as_u16(), 201);
        }
    }

    async fn register(&self, exam_id: &str, registration_number: &str, name: &str) {
        let response = self
            .admin_post(
                "/api/admin/registrations",
                json!({
                    "registration_number": registration_number,
                    "candidate_name": name,
                    "district": "Dhaka",
                    "exam_id": exam_id
                }),
            )
            .await;
        assert_eq!(response.status().as_u16(), 201);
    }

    async fn seed(&self) {
        self.create_exam("math-1", "10:00:00", "12:00:00").await;
        self.add_questions("math-1").await;
        self.register("math-1", "R-100", "Alice").await;
        self.register("math-1", "R-200", "Bob").await;
    }
}

async fn wait_for(
    handle: &exam_portal::controller::ControllerHandle,
    predicate: impl FnMut(&Snapshot) -> bool,
) -> Snapshot {
    tokio::time::timeout(Duration::from_secs(10), handle.wait_until(predicate))
        .await
        .expect("controller did not reach the expected state in time")
        .expect("controller stopped")
}

#[tokio::test]
async fn health_check_404() {
    let app = spawn_app().await;

    let response = app
        .client
        .get(format!("{}/random_path_that_does_not_exist", app.address))
        .send()
        .await
        .expect("Failed to execute request");

    assert_eq!(response.status().as_u16(), 404);
}

#[tokio::test]
async fn admin_routes_require_an_admin_token() {
    let app = spawn_app().await;
    let body = json!({
        "id": "x",
        "date": "2026-03-01",
        "start_time": "10:00:00",
        "end_time": "11:00:00",
        "total_marks": 10,
        "price": 0
    });

    let anonymous = app
        .client
        .post(format!("{}/api/admin/exams", app.address))
        .json(&body)
        .send()
        .await
        .unwrap();
    assert_eq!(anonymous.status().as_u16(), 401);

    let candidate_token = sign_jwt("someone", "candidate", JWT_SECRET, 600).unwrap();
    let candidate = app
        .client
        .post(format!("{}/api/admin/exams", app.address))
        .bearer_auth(candidate_token)
        .json(&body)
        .send()
        .await
        .unwrap();
    assert_eq!(candidate.status().as_u16(), 403);
}

#[tokio::test]
async fn exam_creation_fails_validation() {
    let app = spawn_app().await;
    let response = app
        .admin_post(
            "/api/admin/exams",
            json!({
                "id": "",
                "date": "2026-03-01",
                "start_time": "10:00:00",
                "end_time": "11:00:00",
                "total_marks": 10,
                "price": 0
            }),
        )
        .await;
    assert_eq!(response.status().as_u16(), 400);
}

#[tokio::test]
async fn question_key_must_point_at_an_option() {
    let app = spawn_app().await;
    app.create_exam("math-1", "10:00:00", "12:00:00").await;

    let response = app
        .admin_post(
            "/api/admin/exams/math-1/questions",
            json!({
                "order": 1,
                "prompt": "Broken",
                "options": ["A", "B"],
                "correct_index": 2
            }),
        )
        .await;
    assert_eq!(response.status().as_u16(), 400);
}

#[tokio::test]
async fn catalog_lists_published_exams_and_drops_withdrawn_ones() {
    let app = spawn_app().await;
    app.create_exam("late", "14:00:00", "15:00:00").await;
    app.create_exam("early", "10:00:00", "12:00:00").await;

    let exams: Vec<serde_json::Value> = app
        .client
        .get(format!("{}/api/exams", app.address))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    let ids: Vec<_> = exams.iter().map(|e| e["id"].as_str().unwrap()).collect();
    assert_eq!(ids, vec!["early", "late"]);

    let response = app
        .client
        .delete(format!("{}/api/admin/exams/early", app.address))
        .bearer_auth(&app.admin_token)
        .send()
        .await
        .unwrap();
    assert_eq!(response.status().as_u16(), 204);

    let exams: Vec<serde_json::Value> = app
        .client
        .get(format!("{}/api/exams", app.address))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(exams.len(), 1);
    assert_eq!(exams[0]["id"], "late");
}

#[tokio::test]
async fn feed_pushes_the_catalog_on_connect_and_on_change() {
    let app = spawn_app().await;
    app.create_exam("math-1", "10:00:00", "12:00:00").await;

    let source = WsCatalogSource::new(app.portal().feed_url().unwrap().to_string());
    let mut stream = source.connect().await.unwrap();

    let first = stream.next().await.unwrap().unwrap();
    assert_eq!(first.len(), 1);
    assert_eq!(first[0].id, "math-1");

    app.create_exam("math-2", "13:00:00", "14:00:00").await;
    let second = stream.next().await.unwrap().unwrap();
    assert_eq!(second.len(), 2);
}

#[tokio::test]
async fn registration_validation_maps_to_gateway_errors() {
    let app = spawn_app().await;
    app.seed().await;
    let portal = app.portal();

    let profile = portal.validate_registration("math-1", "R-100").await.unwrap();
    assert_eq!(profile.candidate_name, "Alice");

    assert_eq!(
        portal.validate_registration("math-1", "NOPE").await.unwrap_err(),
        GatewayError::NotFound
    );
    // Issued for another exam.
    assert_eq!(
        portal.validate_registration("math-2", "R-100").await.unwrap_err(),
        GatewayError::NotFound
    );

    app.clock.set(civil(10, 0, 0));
    portal.start_exam("R-100").await.unwrap();
    assert_eq!(
        portal.validate_registration("math-1", "R-100").await.unwrap_err(),
        GatewayError::AlreadyUsed
    );
}

#[tokio::test]
async fn questions_are_not_served_before_the_exam_starts() {
    let app = spawn_app().await;
    app.seed().await;
    let portal = app.portal();

    // Registration is open, the exam is not.
    app.clock.set(civil(9, 46, 0));
    portal.validate_registration("math-1", "R-100").await.unwrap();
    assert_eq!(
        portal.start_exam("R-100").await.unwrap_err(),
        GatewayError::AdmissionClosed
    );

    app.clock.set(civil(9, 59, 50));
    assert_eq!(
        portal.start_exam("R-100").await.unwrap_err(),
        GatewayError::AdmissionClosed
    );

    // A terminal whose clock runs a second or two ahead is still let in.
    app.clock.set(civil(9, 59, 58));
    let start = portal.start_exam("R-100").await.unwrap();
    assert_eq!(start.questions.len(), 3);
}

#[tokio::test]
async fn session_start_follows_the_server_clock() {
    let app = spawn_app().await;
    app.seed().await;
    let portal = app.portal();

    app.clock.set(civil(9, 40, 0));
    assert_eq!(
        portal.start_exam("R-100").await.unwrap_err(),
        GatewayError::AdmissionClosed
    );

    app.clock.set(civil(10, 0, 0));
    let start = portal.start_exam("R-100").await.unwrap();
    assert_eq!(start.exam_id, "math-1");
    assert_eq!(start.questions.len(), 3);

    // A start lost in transit can be retried and yields the same session.
    let again = portal.start_exam("R-100").await.unwrap();
    assert_eq!(again.session_id, start.session_id);

    app.clock.set(civil(12, 0, 1));
    assert_eq!(
        portal.start_exam("R-200").await.unwrap_err(),
        GatewayError::AdmissionClosed
    );
    assert_eq!(
        portal.start_exam("R-999").await.unwrap_err(),
        GatewayError::NotFound
    );
}

#[tokio::test]
async fn submission_is_idempotent_per_session() {
    let app = spawn_app().await;
    app.seed().await;
    let portal = app.portal();
    app.clock.set(civil(10, 0, 0));

    let start = portal.start_exam("R-100").await.unwrap();
    let now = Utc::now();
    let answers: Vec<AnswerRecord> = start
        .questions
        .iter()
        .map(|q| AnswerRecord {
            question_id: q.id,
            selected: Some(1),
            answered_at: now,
        })
        .collect();

    let first = portal
        .submit_exam_answers(start.session_id, &answers, civil(10, 10, 0))
        .await
        .unwrap();
    assert_eq!((first.correct, first.wrong, first.skipped), (3, 0, 0));
    assert_eq!(first.percentage, 100.0);

    let second = portal
        .submit_exam_answers(start.session_id, &[], civil(10, 11, 0))
        .await
        .unwrap();
    assert_eq!(second, first);

    // Used and submitted: no second session.
    assert_eq!(
        portal.start_exam("R-100").await.unwrap_err(),
        GatewayError::AlreadyUsed
    );
    assert_eq!(
        portal
            .submit_exam_answers(uuid::Uuid::new_v4(), &answers, civil(10, 10, 0))
            .await
            .unwrap_err(),
        GatewayError::NotFound
    );
}

#[tokio::test]
async fn results_rank_candidates_and_guard_winner_choices() {
    let app = spawn_app().await;
    app.seed().await;
    app.register("math-1", "R-300", "Carol").await;
    let portal = app.portal();

    app.clock.set(civil(10, 0, 0));
    let alice = portal.start_exam("R-100").await.unwrap();
    let bob = portal.start_exam("R-200").await.unwrap();

    let answers = |start: &exam_portal::models::session::ExamStart, right: usize| -> Vec<AnswerRecord> {
        start
            .questions
            .iter()
            .enumerate()
            .map(|(i, q)| AnswerRecord {
                question_id: q.id,
                selected: Some(if i < right { 1 } else { 0 }),
                answered_at: Utc::now(),
            })
            .collect()
    };

    app.clock.set(civil(10, 30, 0));
    portal
        .submit_exam_answers(alice.session_id, &answers(&alice, 2), civil(10, 30, 0))
        .await
        .unwrap();
    app.clock.set(civil(10, 20, 0));
    portal
        .submit_exam_answers(bob.session_id, &answers(&bob, 2), civil(10, 20, 0))
        .await
        .unwrap();

    let results = portal.get_all_exam_results().await.unwrap();
    assert_eq!(results.len(), 1);
    let carol = results[0]
        .candidates
        .iter()
        .find(|c| c.registration_number == "R-300")
        .unwrap();
    assert!(!carol.used && !carol.submitted);

    let ranking = &rank_all(&results)[0];
    let holder = ranking.holder_of(1).unwrap();
    // Same score; Bob submitted earlier.
    assert_eq!(holder.candidate.registration_number, "R-200");
    assert_eq!(holder.prize, Some(1000));
    assert_eq!(ranking.unranked[0].status, CandidateStatus::NotAttended);

    let served: serde_json::Value = app
        .client
        .get(format!("{}/api/admin/results/math-1/ranking", app.address))
        .bearer_auth(&app.admin_token)
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(served["ranked"][0]["candidate"]["registration_number"], "R-200");

    let choice = |reg: &str, rank: u32| WinnerChoice {
        exam_id: "math-1".to_string(),
        registration_number: reg.to_string(),
        rank,
        prize_option: "cash".to_string(),
    };
    app.clock.set(civil(13, 0, 0));
    portal.save_winner_choice(&choice("R-200", 1)).await.unwrap();
    let chosen_at: DateTime<Utc> = sqlx::query_scalar(
        "SELECT chosen_at FROM winner_choices WHERE exam_id = ? AND winner_rank = 1",
    )
    .bind("math-1")
    .fetch_one(&app.pool)
    .await
    .unwrap();
    assert_eq!(chosen_at, civil(13, 0, 0));
    assert!(matches!(
        portal.save_winner_choice(&choice("R-100", 1)).await,
        Err(GatewayError::Rejected(_))
    ));
    assert!(matches!(
        portal.save_winner_choice(&choice("R-300", 3)).await,
        Err(GatewayError::Rejected(_))
    ));
}

#[tokio::test]
async fn late_deliveries_rank_by_when_answers_were_frozen() {
    let app = spawn_app().await;
    app.seed().await;
    app.register("math-1", "R-300", "Carol").await;
    let portal = app.portal();

    app.clock.set(civil(10, 0, 0));
    let alice = portal.start_exam("R-100").await.unwrap();
    let bob = portal.start_exam("R-200").await.unwrap();
    let carol = portal.start_exam("R-300").await.unwrap();

    let all_right = |start: &exam_portal::models::session::ExamStart| -> Vec<AnswerRecord> {
        start
            .questions
            .iter()
            .map(|q| AnswerRecord {
                question_id: q.id,
                selected: Some(1),
                answered_at: civil(11, 0, 0),
            })
            .collect()
    };

    app.clock.set(civil(11, 59, 30));
    portal
        .submit_exam_answers(alice.session_id, &all_right(&alice), civil(11, 59, 30))
        .await
        .unwrap();

    // Bob's answers froze first, but reached the portal after the end.
    app.clock.set(civil(12, 30, 0));
    let late = portal
        .submit_exam_answers(bob.session_id, &all_right(&bob), civil(11, 59, 0))
        .await
        .unwrap();
    assert_eq!(late.submitted_at, civil(11, 59, 0));

    // A claim past the end is held at the end.
    let skewed = portal
        .submit_exam_answers(carol.session_id, &all_right(&carol), civil(13, 0, 0))
        .await
        .unwrap();
    assert_eq!(skewed.submitted_at, civil(12, 0, 0));

    let results = portal.get_all_exam_results().await.unwrap();
    let ranking = &rank_all(&results)[0];
    let order: Vec<_> = (1..=3)
        .map(|rank| {
            ranking
                .holder_of(rank)
                .unwrap()
                .candidate
                .registration_number
                .clone()
        })
        .collect();
    assert_eq!(order, vec!["R-200", "R-100", "R-300"]);
}

#[tokio::test]
async fn controller_admits_auto_starts_and_submits_over_http() {
    let app = spawn_app().await;
    app.seed().await;
    app.clock.set(civil(9, 58, 0));

    let config = ControllerConfig {
        portal_url: app.address.clone(),
        utc_offset: portal_time().offset(),
        tick_interval: Duration::from_millis(20),
        feed_retry: ReconnectPolicy {
            delay: Duration::from_millis(100),
        },
        ..ControllerConfig::default()
    };
    let portal = HttpPortal::new(&app.address).unwrap();
    let source = WsCatalogSource::new(portal.feed_url().unwrap().to_string());
    let handle = AdmissionController::spawn(
        config,
        Arc::new(portal),
        Arc::new(source),
        Arc::new(app.clock.clone()),
        SubmissionOutbox::in_memory(),
    );

    let snapshot = wait_for(&handle, |s| {
        s.feed_connected && s.window.is_some_and(|w| w.state == WindowState::Open)
    })
    .await;
    assert_eq!(snapshot.exam.unwrap().id, "math-1");
    assert_eq!(snapshot.window.unwrap().minutes_until_start, 2);

    handle.register("R-100").await.unwrap();
    let snapshot = wait_for(&handle, |s| s.candidate.is_some()).await;
    assert_eq!(snapshot.candidate.unwrap().candidate_name, "Alice");

    app.clock.set(civil(10, 0, 0));
    let snapshot = wait_for(&handle, |s| s.question.is_some()).await;
    let session = snapshot.session.unwrap();
    assert_eq!(session.registration_number, "R-100");
    assert_eq!(session.seconds_remaining, 2 * 3600);

    handle.select(1).await.unwrap();
    handle.advance().await.unwrap();
    handle.select(3).await.unwrap();
    handle.advance().await.unwrap();
    handle.select(1).await.unwrap();
    handle.finish().await.unwrap();

    let snapshot = wait_for(&handle, |s| s.result.is_some()).await;
    let result = snapshot.result.unwrap();
    assert_eq!((result.correct, result.wrong, result.skipped), (2, 1, 0));
    assert_eq!(result.percentage, 66.67);

    let results = app.portal().get_all_exam_results().await.unwrap();
    let alice = results[0]
        .candidates
        .iter()
        .find(|c| c.registration_number == "R-100")
        .unwrap();
    assert!(alice.submitted);
    assert_eq!(alice.correct_answers, 2);
}
