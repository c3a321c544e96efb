pub mod admin;
pub mod agents;
pub mod attempts;
pub mod auth;
pub mod checkout;
pub mod health;
pub mod openapi;

use axum::{
    extract::DefaultBodyLimit,
    middleware::{from_fn, from_fn_with_state},
    routing::{get, patch, post},
    Router,
};
use tower_http::trace::TraceLayer;

use crate::config::get_config;
use crate::middleware::{
    auth::{require_admin, require_auth, require_candidate},
    cors::api_cors,
    rate_limit::{new_rps_state, rps_middleware},
};
use crate::AppState;

/// Two KYC images plus form fields.
const MAX_BODY_BYTES: usize = 12 * 1024 * 1024;

pub fn router(state: AppState) -> Router {
    let config = get_config();

    let public_api = Router::new()
        .route("/health", get(health::health))
        .route("/api/openapi.json", get(openapi::openapi_json))
        .route("/api/auth/register", post(auth::register))
        .route("/api/auth/login", post(auth::login))
        .route("/api/auth/logout", post(auth::logout))
        .route("/api/candidate/referrals/validate", post(agents::validate_referral))
        .route("/api/verify/:slug", get(attempts::verify_certificate))
        .route("/api/stripe/webhook", post(checkout::stripe_webhook))
        .layer(from_fn_with_state(new_rps_state(config.public_rps), rps_middleware));

    let signed_in_api = Router::new()
        .route("/api/auth/me", get(auth::me))
        .route("/api/candidate/attempts/:id/certificate", get(attempts::certificate))
        .layer(from_fn(require_auth))
        .layer(from_fn_with_state(new_rps_state(config.public_rps), rps_middleware));

    let candidate_api = Router::new()
        .route("/api/candidate/test-settings", get(admin::candidate_test_settings))
        .route("/api/candidate/checkout/context", get(checkout::checkout_context))
        .route("/api/candidate/checkout", post(checkout::create_checkout))
        .route("/api/candidate/attempts", get(attempts::list_attempts))
        .route("/api/candidate/attempts/start", post(attempts::start_attempt))
        .route("/api/candidate/attempts/claim", post(attempts::claim_attempt))
        .route("/api/candidate/attempts/:id", get(attempts::get_attempt))
        .route("/api/candidate/attempts/:id/start", post(attempts::begin_attempt))
        .route(
            "/api/candidate/attempts/:id/items/:item_id",
            patch(attempts::save_selection),
        )
        .route("/api/candidate/attempts/:id/submit", post(attempts::submit_attempt))
        .route("/api/candidate/attempts/:id/result", get(attempts::attempt_result))
        .layer(from_fn(require_candidate))
        .layer(from_fn_with_state(new_rps_state(config.public_rps), rps_middleware));

    let admin_api = Router::new()
        .route(
            "/api/admin/questions",
            get(admin::list_questions).post(admin::create_question),
        )
        .route(
            "/api/admin/questions/:id",
            get(admin::get_question)
                .put(admin::update_question)
                .delete(admin::archive_question),
        )
        .route(
            "/api/admin/settings",
            get(admin::get_settings).put(admin::update_settings),
        )
        .route(
            "/api/admin/agents",
            get(agents::list_agents).post(agents::create_agent),
        )
        .route(
            "/api/admin/agents/:id",
            get(agents::get_agent)
                .patch(agents::update_agent)
                .delete(agents::delete_agent),
        )
        .route("/api/admin/agents/:id/payouts", post(agents::create_payout))
        .route("/api/admin/referrals/attempts", get(agents::referral_attempts))
        .route(
            "/api/admin/referrals/attempts/:id/assign_agent",
            post(agents::assign_agent),
        )
        .route(
            "/api/admin/referrals/attempts/:id/eligible_agents",
            get(agents::eligible_agents),
        )
        .route("/api/admin/analytics/system", get(admin::system_analytics))
        .route("/api/admin/analytics/candidates", get(admin::candidate_analytics))
        .route("/api/admin/analytics/candidates/:id", get(admin::candidate_detail))
        .route("/api/admin/countries", get(admin::countries))
        .layer(from_fn(require_admin))
        .layer(from_fn_with_state(new_rps_state(config.admin_rps), rps_middleware));

    Router::new()
        .merge(public_api)
        .merge(signed_in_api)
        .merge(candidate_api)
        .merge(admin_api)
        .with_state(state)
        .layer(api_cors())
        .layer(TraceLayer::new_for_http())
        .layer(DefaultBodyLimit::max(MAX_BODY_BYTES))
}
