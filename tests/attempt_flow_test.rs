use std::collections::HashSet;
use std::env;
use std::sync::Arc;

use axum::{
    body::{to_bytes, Body},
    http::{Request, StatusCode},
    Router,
};
use jsonwebtoken::{encode, EncodingKey, Header};
use chrono::{DateTime, TimeZone, Utc};
use proficiency_backend::dto::question_dto::{OptionPayload, QuestionPayload};
use proficiency_backend::error::Error;
use proficiency_backend::middleware::auth::Claims;
use proficiency_backend::models::level::{Level, LevelMap};
use proficiency_backend::models::settings::TestSettings;
use proficiency_backend::services::attempt_service::AttemptService;
use proficiency_backend::services::clock::{Clock, SystemClock};
use proficiency_backend::services::settings_service::SettingsService;
use serde_json::{json, Value as JsonValue};
use sqlx::PgPool;
use tokio::sync::OnceCell;
use tower::ServiceExt;
use uuid::Uuid;

const JWT_SECRET: &str = "test_secret_key";
const WEBHOOK_SECRET: &str = "whsec_flow_test";

static SEEDED: OnceCell<()> = OnceCell::const_new();

/// `None` when no database is configured; the test then has nothing to run
/// against and returns early. Each test gets its own pool since pools are
/// bound to the runtime that opened them.
async fn setup() -> Option<(Router, PgPool)> {
    dotenvy::dotenv().ok();
    env::var("DATABASE_URL").ok()?;

    SEEDED
        .get_or_init(|| async {
            env::set_var("SERVER_ADDRESS", "127.0.0.1:0");
            env::set_var("JWT_SECRET", JWT_SECRET);
            env::set_var("STRIPE_WEBHOOK_SECRET", WEBHOOK_SECRET);
            env::set_var("REQUIRE_PAYMENT", "false");
            env::set_var("PUBLIC_RPS", "1000");
            env::set_var("ADMIN_RPS", "1000");
            proficiency_backend::config::init_config().expect("init config");

            let pool = proficiency_backend::database::pool::create_pool()
                .await
                .expect("pool");
            sqlx::migrate!("./migrations")
                .run(&pool)
                .await
                .expect("migrations");
            seed_question_bank(&pool).await;
            pool.close().await;
        })
        .await;

    let pool = proficiency_backend::database::pool::create_pool()
        .await
        .expect("pool");
    let app = proficiency_backend::routes::router(proficiency_backend::AppState::new(pool.clone()));
    Some((app, pool))
}

/// One single-select question per level, and quotas of one per level.
async fn seed_question_bank(pool: &PgPool) {
    let questions = proficiency_backend::services::question_service::QuestionService::new(pool.clone());
    for level in Level::ALL {
        questions
            .create(QuestionPayload {
                text: format!("Pick the right {level} form"),
                level,
                allow_multiple: false,
                options: vec![
                    OptionPayload { id: None, text: "right".into(), is_correct: true },
                    OptionPayload { id: None, text: "wrong".into(), is_correct: false },
                    OptionPayload { id: None, text: "also wrong".into(), is_correct: false },
                ],
            })
            .await
            .expect("seed question");
    }

    let settings = proficiency_backend::services::settings_service::SettingsService::new(pool.clone());
    settings
        .update(TestSettings {
            duration_min: 30,
            quotas: LevelMap::splat(1),
            thresholds: LevelMap::splat(60),
        })
        .await
        .expect("seed settings");
}

async fn seed_candidate(pool: &PgPool) -> (Uuid, String) {
    let id = Uuid::new_v4();
    let email = format!("flow_{id}@example.com");
    sqlx::query(
        r#"INSERT INTO users (id, full_name, email, password_hash, role) VALUES ($1, $2, $3, 'x', 'CANDIDATE')"#,
    )
    .bind(id)
    .bind("flow candidate")
    .bind(&email)
    .execute(pool)
    .await
    .expect("seed user");

    let claims = Claims {
        sub: id.to_string(),
        exp: (chrono::Utc::now().timestamp() + 3600) as usize,
        role: "CANDIDATE".into(),
        email,
        name: "Flow Candidate".into(),
    };
    let token = encode(
        &Header::default(),
        &claims,
        &EncodingKey::from_secret(JWT_SECRET.as_bytes()),
    )
    .expect("sign token");
    (id, token)
}

async fn call(app: &Router, method: &str, uri: &str, token: &str, body: Option<JsonValue>) -> (StatusCode, JsonValue) {
    let builder = Request::builder()
        .method(method)
        .uri(uri)
        .header("authorization", format!("Bearer {token}"))
        .header("content-type", "application/json");
    let req = builder
        .body(body.map(|b| Body::from(b.to_string())).unwrap_or_else(Body::empty))
        .unwrap();
    let resp = app.clone().oneshot(req).await.unwrap();
    let status = resp.status();
    let bytes = to_bytes(resp.into_body(), 1024 * 1024).await.unwrap();
    let json = serde_json::from_slice(&bytes).unwrap_or(JsonValue::Null);
    (status, json)
}

struct FixedClock(DateTime<Utc>);

impl Clock for FixedClock {
    fn now(&self) -> DateTime<Utc> {
        self.0
    }
}

async fn start_attempt(app: &Router, token: &str) -> Uuid {
    let (status, started) = call(app, "POST", "/api/candidate/attempts/start", token, None).await;
    assert_eq!(status, StatusCode::CREATED, "start: {started}");
    started["attempt_id"].as_str().unwrap().parse().unwrap()
}

async fn item_flags(pool: &PgPool, attempt_id: Uuid) -> Vec<(Uuid, Option<bool>)> {
    sqlx::query_as(r#"SELECT id, is_correct FROM attempt_items WHERE attempt_id = $1 ORDER BY position"#)
        .bind(attempt_id)
        .fetch_all(pool)
        .await
        .expect("item flags")
}

async fn selected(pool: &PgPool, item_id: Uuid) -> Vec<String> {
    let stored: sqlx::types::Json<Vec<String>> =
        sqlx::query_scalar(r#"SELECT selected_option_ids FROM attempt_items WHERE id = $1"#)
            .bind(item_id)
            .fetch_one(pool)
            .await
            .expect("selection");
    stored.0
}

async fn correct_options(pool: &PgPool, attempt_id: Uuid) -> Vec<(Uuid, Vec<String>)> {
    let rows: Vec<(Uuid, sqlx::types::Json<Vec<String>>)> = sqlx::query_as(
        r#"SELECT id, correct_option_ids FROM attempt_items WHERE attempt_id = $1 ORDER BY position"#,
    )
    .bind(attempt_id)
    .fetch_all(pool)
    .await
    .expect("items");
    rows.into_iter().map(|(id, json)| (id, json.0)).collect()
}

#[tokio::test]
async fn unpaid_attempt_runs_from_start_to_certificate() {
    let Some((app, pool)) = setup().await else {
        return;
    };
    let (_user_id, token) = seed_candidate(&pool).await;

    let (status, started) = call(&app, "POST", "/api/candidate/attempts/start", &token, None).await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(started["status"], "IN_PROGRESS");
    let attempt_id: Uuid = started["attempt_id"].as_str().unwrap().parse().unwrap();

    // Starting again resumes the same attempt.
    let (status, again) = call(&app, "POST", "/api/candidate/attempts/start", &token, None).await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(again["attempt_id"], started["attempt_id"]);

    let (status, state) = call(&app, "GET", &format!("/api/candidate/attempts/{attempt_id}"), &token, None).await;
    assert_eq!(status, StatusCode::OK);
    let items = state["items"].as_array().unwrap();
    assert_eq!(items.len(), 6);
    assert!(state["remaining_seconds"].as_i64().unwrap() > 0);
    assert!(items[0]["options"][0].get("is_correct").is_none());

    // Populating twice never duplicates items.
    let mut conn = pool.acquire().await.unwrap();
    let added = proficiency_backend::services::attempt_service::AttemptService::populate_items_if_absent(
        &mut *conn,
        attempt_id,
        &LevelMap::splat(1),
    )
    .await
    .unwrap();
    assert_eq!(added, 0);
    drop(conn);

    let answers = correct_options(&pool, attempt_id).await;
    assert_eq!(answers.len(), 6);

    // Single-select keeps only the first valid id.
    let (first_item, correct) = &answers[0];
    let all_ids: Vec<String> = items[0]["options"]
        .as_array()
        .unwrap()
        .iter()
        .map(|o| o["id"].as_str().unwrap().to_string())
        .collect();
    let mut both = correct.clone();
    both.extend(all_ids.iter().filter(|id| !correct.contains(id)).cloned());
    let (status, _) = call(
        &app,
        "PATCH",
        &format!("/api/candidate/attempts/{attempt_id}/items/{first_item}"),
        &token,
        Some(json!({ "selected_option_ids": both })),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    let stored: sqlx::types::Json<Vec<String>> =
        sqlx::query_scalar(r#"SELECT selected_option_ids FROM attempt_items WHERE id = $1"#)
            .bind(first_item)
            .fetch_one(&pool)
            .await
            .unwrap();
    assert_eq!(stored.0, vec![correct[0].clone()]);

    for (item_id, correct) in &answers {
        let (status, _) = call(
            &app,
            "PATCH",
            &format!("/api/candidate/attempts/{attempt_id}/items/{item_id}"),
            &token,
            Some(json!({ "selected_option_ids": correct })),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
    }

    let (status, result) = call(&app, "GET", &format!("/api/candidate/attempts/{attempt_id}/result"), &token, None).await;
    assert_eq!(status, StatusCode::CONFLICT, "result before submit: {result}");

    let (status, submitted) = call(&app, "POST", &format!("/api/candidate/attempts/{attempt_id}/submit"), &token, None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(submitted["level"], "C2");
    assert_eq!(submitted["per_level"]["A1"]["passed"], true);

    let (status, _) = call(&app, "POST", &format!("/api/candidate/attempts/{attempt_id}/submit"), &token, None).await;
    assert_eq!(status, StatusCode::CONFLICT);

    let (first_item, correct) = &answers[0];
    let (status, _) = call(
        &app,
        "PATCH",
        &format!("/api/candidate/attempts/{attempt_id}/items/{first_item}"),
        &token,
        Some(json!({ "selected_option_ids": correct })),
    )
    .await;
    assert_eq!(status, StatusCode::CONFLICT);

    let (status, result) = call(&app, "GET", &format!("/api/candidate/attempts/{attempt_id}/result"), &token, None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(result["level"], "C2");
    assert_eq!(result["ladder"].as_array().unwrap().len(), 6);

    let (status, cert) = call(&app, "GET", &format!("/api/candidate/attempts/{attempt_id}/certificate"), &token, None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(cert["holder_name"], "Flow Candidate");
    assert!(cert["certificate_id"].as_str().unwrap().starts_with("T-"));

    let (_, cert_again) = call(&app, "GET", &format!("/api/candidate/attempts/{attempt_id}/certificate"), &token, None).await;
    assert_eq!(cert_again["certificate_id"], cert["certificate_id"]);
    assert_eq!(cert_again["verify_url"], cert["verify_url"]);

    let slug = cert["verify_url"].as_str().unwrap().rsplit('/').next().unwrap().to_string();
    let resp = app
        .clone()
        .oneshot(Request::builder().uri(format!("/api/verify/{slug}")).body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::OK);
}

#[tokio::test]
async fn paid_checkout_is_recorded_once_and_claimed() {
    let Some((app, pool)) = setup().await else {
        return;
    };
    let (user_id, token) = seed_candidate(&pool).await;
    let session_id = format!("cs_test_{}", Uuid::new_v4().simple());

    let (status, _) = call(
        &app,
        "POST",
        "/api/candidate/attempts/claim",
        &token,
        Some(json!({ "stripe_session_id": session_id })),
    )
    .await;
    assert_eq!(status, StatusCode::CONFLICT);

    let event = json!({
        "id": "evt_flow",
        "type": "checkout.session.completed",
        "data": { "object": {
            "id": session_id,
            "client_reference_id": user_id.to_string(),
            "payment_intent": "pi_flow",
            "amount_total": 4900,
            "currency": "eur",
            "payment_status": "paid",
            "metadata": { "region": "EU" }
        }}
    })
    .to_string();

    for _ in 0..2 {
        let signature = proficiency_backend::utils::stripe_signature::sign_payload(
            event.as_bytes(),
            chrono::Utc::now().timestamp(),
            WEBHOOK_SECRET,
        )
        .unwrap();
        let resp = app
            .clone()
            .oneshot(
                Request::builder()
                    .method("POST")
                    .uri("/api/stripe/webhook")
                    .header("stripe-signature", signature)
                    .body(Body::from(event.clone()))
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
    }

    let count: i64 = sqlx::query_scalar(r#"SELECT COUNT(*) FROM attempts WHERE stripe_session_id = $1"#)
        .bind(&session_id)
        .fetch_one(&pool)
        .await
        .unwrap();
    assert_eq!(count, 1);

    let (status, claimed) = call(
        &app,
        "POST",
        "/api/candidate/attempts/claim",
        &token,
        Some(json!({ "stripe_session_id": session_id })),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(claimed["status"], "IN_PROGRESS");

    let (other_id, other_token) = seed_candidate(&pool).await;
    assert_ne!(other_id, user_id);
    let (status, _) = call(
        &app,
        "POST",
        "/api/candidate/attempts/claim",
        &other_token,
        Some(json!({ "stripe_session_id": session_id })),
    )
    .await;
    assert_eq!(status, StatusCode::FORBIDDEN);

    let (amount, currency): (Option<i64>, Option<String>) =
        sqlx::query_as(r#"SELECT amount_cents, currency FROM attempts WHERE stripe_session_id = $1"#)
            .bind(&session_id)
            .fetch_one(&pool)
            .await
            .unwrap();
    assert_eq!(amount, Some(4900));
    assert_eq!(currency.as_deref(), Some("EUR"));
}

#[tokio::test]
async fn overdue_attempt_is_submitted_on_read_and_then_frozen() {
    let Some((app, pool)) = setup().await else {
        return;
    };
    let (_user_id, token) = seed_candidate(&pool).await;
    let attempt_id = start_attempt(&app, &token).await;

    let answers = correct_options(&pool, attempt_id).await;
    let (first_item, correct) = &answers[0];
    let (status, _) = call(
        &app,
        "PATCH",
        &format!("/api/candidate/attempts/{attempt_id}/items/{first_item}"),
        &token,
        Some(json!({ "selected_option_ids": correct })),
    )
    .await;
    assert_eq!(status, StatusCode::OK);

    sqlx::query(r#"UPDATE attempts SET started_at = NOW() - INTERVAL '31 minutes' WHERE id = $1"#)
        .bind(attempt_id)
        .execute(&pool)
        .await
        .unwrap();

    let (status, state) = call(&app, "GET", &format!("/api/candidate/attempts/{attempt_id}"), &token, None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(state["status"], "SUBMITTED");
    assert!(state["remaining_seconds"].is_null());
    assert!(state["level"].is_string());

    let (second_item, correct) = &answers[1];
    let (status, _) = call(
        &app,
        "PATCH",
        &format!("/api/candidate/attempts/{attempt_id}/items/{second_item}"),
        &token,
        Some(json!({ "selected_option_ids": correct })),
    )
    .await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert!(selected(&pool, *second_item).await.is_empty());

    let finished_before: Option<DateTime<Utc>> =
        sqlx::query_scalar(r#"SELECT finished_at FROM attempts WHERE id = $1"#)
            .bind(attempt_id)
            .fetch_one(&pool)
            .await
            .unwrap();
    let flags_before = item_flags(&pool, attempt_id).await;
    assert!(finished_before.is_some());
    assert_eq!(flags_before[0].1, Some(true));
    assert_eq!(flags_before[1].1, Some(false));

    let (status, _) = call(&app, "POST", &format!("/api/candidate/attempts/{attempt_id}/submit"), &token, None).await;
    assert_eq!(status, StatusCode::CONFLICT);

    let finished_after: Option<DateTime<Utc>> =
        sqlx::query_scalar(r#"SELECT finished_at FROM attempts WHERE id = $1"#)
            .bind(attempt_id)
            .fetch_one(&pool)
            .await
            .unwrap();
    assert_eq!(finished_after, finished_before);
    assert_eq!(item_flags(&pool, attempt_id).await, flags_before);
}

#[tokio::test]
async fn deadline_submission_is_stamped_with_the_read_instant() {
    let Some((_app, pool)) = setup().await else {
        return;
    };
    let (user_id, _token) = seed_candidate(&pool).await;
    let settings = SettingsService::new(pool.clone()).load().await.unwrap();
    let at = Utc.timestamp_opt(Utc::now().timestamp(), 0).unwrap();
    let service = AttemptService::new(pool.clone(), Arc::new(FixedClock(at)));

    let attempt = service.start_unpaid(user_id, &settings, false).await.unwrap();
    assert_eq!(attempt.started_at, Some(at));

    let overdue = at - chrono::Duration::minutes(i64::from(settings.duration_min));
    sqlx::query(r#"UPDATE attempts SET started_at = $2 WHERE id = $1"#)
        .bind(attempt.id)
        .bind(overdue)
        .execute(&pool)
        .await
        .unwrap();

    let state = service.get_state(user_id, attempt.id, &settings).await.unwrap();
    assert_eq!(state.status, "SUBMITTED");
    assert_eq!(state.remaining_seconds, None);
    assert_eq!(state.finished_at, Some(at));

    let items = correct_options(&pool, attempt.id).await;
    let (item_id, correct) = &items[0];
    let err = service
        .save_selection(user_id, attempt.id, *item_id, correct, &settings)
        .await
        .unwrap_err();
    assert!(matches!(err, Error::Conflict(_)), "{err:?}");
}

#[tokio::test]
async fn items_of_another_attempt_read_as_not_found() {
    let Some((app, pool)) = setup().await else {
        return;
    };
    let (_owner_id, owner_token) = seed_candidate(&pool).await;
    let (_other_id, other_token) = seed_candidate(&pool).await;
    let owner_attempt = start_attempt(&app, &owner_token).await;
    let other_attempt = start_attempt(&app, &other_token).await;

    let owner_items = correct_options(&pool, owner_attempt).await;
    let other_items = correct_options(&pool, other_attempt).await;
    let (owner_item, correct) = &owner_items[0];
    let body = json!({ "selected_option_ids": correct });

    let (status, _) = call(
        &app,
        "PATCH",
        &format!("/api/candidate/attempts/{owner_attempt}/items/{owner_item}"),
        &other_token,
        Some(body.clone()),
    )
    .await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    let (status, _) = call(
        &app,
        "PATCH",
        &format!("/api/candidate/attempts/{other_attempt}/items/{owner_item}"),
        &other_token,
        Some(body.clone()),
    )
    .await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    let (other_item, _) = &other_items[0];
    let (status, _) = call(
        &app,
        "PATCH",
        &format!("/api/candidate/attempts/{owner_attempt}/items/{other_item}"),
        &owner_token,
        Some(body),
    )
    .await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    let (status, _) = call(&app, "GET", &format!("/api/candidate/attempts/{owner_attempt}"), &other_token, None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    assert!(selected(&pool, *owner_item).await.is_empty());
    assert!(selected(&pool, *other_item).await.is_empty());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_starts_resume_a_single_attempt() {
    let Some((_app, pool)) = setup().await else {
        return;
    };
    let (user_id, _token) = seed_candidate(&pool).await;
    let settings = SettingsService::new(pool.clone()).load().await.unwrap();
    let service = AttemptService::new(pool.clone(), Arc::new(SystemClock));

    let handles: Vec<_> = (0..8)
        .map(|_| {
            let service = service.clone();
            tokio::spawn(async move {
                service
                    .start_unpaid(user_id, &settings, false)
                    .await
                    .map(|attempt| attempt.id)
            })
        })
        .collect();

    let mut ids = HashSet::new();
    for handle in handles {
        ids.insert(handle.await.unwrap().unwrap());
    }
    assert_eq!(ids.len(), 1);

    let rows: i64 = sqlx::query_scalar(r#"SELECT COUNT(*) FROM attempts WHERE user_id = $1"#)
        .bind(user_id)
        .fetch_one(&pool)
        .await
        .unwrap();
    assert_eq!(rows, 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn capture_waits_for_a_submission_holding_the_attempt() {
    let Some((app, pool)) = setup().await else {
        return;
    };
    let (user_id, token) = seed_candidate(&pool).await;
    let attempt_id = start_attempt(&app, &token).await;
    let settings = SettingsService::new(pool.clone()).load().await.unwrap();
    let service = AttemptService::new(pool.clone(), Arc::new(SystemClock));

    let answers = correct_options(&pool, attempt_id).await;
    let (item_id, correct) = answers[0].clone();

    // Same locking and grading order a submission uses.
    let mut submitting = pool.begin().await.unwrap();
    sqlx::query(r#"SELECT id FROM attempts WHERE id = $1 FOR UPDATE"#)
        .bind(attempt_id)
        .execute(&mut *submitting)
        .await
        .unwrap();

    let capture = tokio::spawn({
        let service = service.clone();
        async move {
            service
                .save_selection(user_id, attempt_id, item_id, &correct, &settings)
                .await
        }
    });

    tokio::time::sleep(std::time::Duration::from_millis(300)).await;
    assert!(!capture.is_finished());

    sqlx::query(r#"UPDATE attempt_items SET is_correct = (selected_option_ids = correct_option_ids) WHERE attempt_id = $1"#)
        .bind(attempt_id)
        .execute(&mut *submitting)
        .await
        .unwrap();
    sqlx::query(r#"UPDATE attempts SET status = 'SUBMITTED', finished_at = NOW(), level = 'A1' WHERE id = $1"#)
        .bind(attempt_id)
        .execute(&mut *submitting)
        .await
        .unwrap();
    submitting.commit().await.unwrap();

    let outcome = capture.await.unwrap();
    assert!(matches!(outcome, Err(Error::Conflict(_))), "{outcome:?}");
    assert!(selected(&pool, item_id).await.is_empty());
    assert_eq!(item_flags(&pool, attempt_id).await[0].1, Some(false));
}
