use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::IntoResponse,
    Extension, Json,
};
use uuid::Uuid;
use validator::Validate;

use crate::config::get_config;
use crate::dto::attempt_dto::{
    ClaimAttemptRequest, SaveSelectionRequest, SaveSelectionResponse, StartAttemptResponse,
};
use crate::dto::pagination::{Page, PageQuery};
use crate::error::Result;
use crate::middleware::auth::Claims;
use crate::AppState;

#[axum::debug_handler]
pub async fn list_attempts(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Query(query): Query<PageQuery>,
) -> Result<impl IntoResponse> {
    let page = Page::from(&query);
    let attempts = state
        .attempt_service
        .list_for_user(claims.user_id()?, page)
        .await?;
    Ok(Json(attempts))
}

#[utoipa::path(
    post,
    path = "/api/candidate/attempts/start",
    responses(
        (status = 201, description = "Attempt started or resumed", body = StartAttemptResponse),
        (status = 409, description = "Payment required, or no questions configured"),
    ),
)]
pub async fn start_attempt(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
) -> Result<impl IntoResponse> {
    let settings = state.settings_service.load().await?;
    let attempt = state
        .attempt_service
        .start_unpaid(claims.user_id()?, &settings, get_config().require_payment)
        .await?;
    Ok((StatusCode::CREATED, Json(StartAttemptResponse::from(attempt))))
}

#[utoipa::path(
    post,
    path = "/api/candidate/attempts/claim",
    request_body = ClaimAttemptRequest,
    responses(
        (status = 200, description = "Paid attempt started", body = StartAttemptResponse),
        (status = 403, description = "Checkout belongs to another account"),
        (status = 409, description = "Payment not confirmed yet, or attempt already submitted"),
    ),
)]
pub async fn claim_attempt(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Json(payload): Json<ClaimAttemptRequest>,
) -> Result<impl IntoResponse> {
    payload.validate()?;
    let settings = state.settings_service.load().await?;
    let attempt = state
        .attempt_service
        .claim(claims.user_id()?, payload.stripe_session_id.trim(), &settings)
        .await?;
    Ok(Json(StartAttemptResponse::from(attempt)))
}

#[utoipa::path(
    post,
    path = "/api/candidate/attempts/{id}/start",
    params(("id" = Uuid, Path, description = "Attempt ID")),
    responses(
        (status = 200, description = "Attempt in progress", body = StartAttemptResponse),
        (status = 404, description = "Attempt not found"),
        (status = 409, description = "Attempt unpaid or already submitted"),
    ),
)]
pub async fn begin_attempt(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Path(id): Path<Uuid>,
) -> Result<impl IntoResponse> {
    let settings = state.settings_service.load().await?;
    let attempt = state
        .attempt_service
        .begin(claims.user_id()?, id, &settings)
        .await?;
    Ok(Json(StartAttemptResponse::from(attempt)))
}

#[utoipa::path(
    get,
    path = "/api/candidate/attempts/{id}",
    params(("id" = Uuid, Path, description = "Attempt ID")),
    responses(
        (status = 200, description = "Attempt state with items and remaining time"),
        (status = 404, description = "Attempt not found"),
    ),
)]
pub async fn get_attempt(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Path(id): Path<Uuid>,
) -> Result<impl IntoResponse> {
    let settings = state.settings_service.load().await?;
    let view = state
        .attempt_service
        .get_state(claims.user_id()?, id, &settings)
        .await?;
    Ok(Json(view))
}

#[utoipa::path(
    patch,
    path = "/api/candidate/attempts/{id}/items/{item_id}",
    params(
        ("id" = Uuid, Path, description = "Attempt ID"),
        ("item_id" = Uuid, Path, description = "Attempt item ID"),
    ),
    request_body = SaveSelectionRequest,
    responses(
        (status = 200, description = "Selection saved", body = SaveSelectionResponse),
        (status = 404, description = "Item not found"),
        (status = 409, description = "Attempt not in progress or time is up"),
    ),
)]
pub async fn save_selection(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Path((id, item_id)): Path<(Uuid, Uuid)>,
    Json(payload): Json<SaveSelectionRequest>,
) -> Result<impl IntoResponse> {
    payload.validate()?;
    let settings = state.settings_service.load().await?;
    state
        .attempt_service
        .save_selection(
            claims.user_id()?,
            id,
            item_id,
            &payload.selected_option_ids,
            &settings,
        )
        .await?;
    Ok(Json(SaveSelectionResponse { ok: true }))
}

#[utoipa::path(
    post,
    path = "/api/candidate/attempts/{id}/submit",
    params(("id" = Uuid, Path, description = "Attempt ID")),
    responses(
        (status = 200, description = "Attempt scored"),
        (status = 409, description = "Attempt already submitted or never started"),
    ),
)]
pub async fn submit_attempt(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Path(id): Path<Uuid>,
) -> Result<impl IntoResponse> {
    let settings = state.settings_service.load().await?;
    let outcome = state
        .attempt_service
        .submit(claims.user_id()?, id, &settings)
        .await?;
    Ok(Json(outcome))
}

#[utoipa::path(
    get,
    path = "/api/candidate/attempts/{id}/result",
    params(("id" = Uuid, Path, description = "Attempt ID")),
    responses(
        (status = 200, description = "Awarded level and ladder"),
        (status = 409, description = "Attempt not submitted"),
    ),
)]
pub async fn attempt_result(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Path(id): Path<Uuid>,
) -> Result<impl IntoResponse> {
    let result = state.attempt_service.result(claims.user_id()?, id).await?;
    Ok(Json(result))
}

#[axum::debug_handler]
pub async fn certificate(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Path(id): Path<Uuid>,
) -> Result<impl IntoResponse> {
    let document = state
        .certificate_service
        .document(claims.user_id()?, claims.is_admin(), id)
        .await?;
    Ok(Json(document))
}

#[axum::debug_handler]
pub async fn verify_certificate(
    State(state): State<AppState>,
    Path(slug): Path<String>,
) -> Result<impl IntoResponse> {
    let verified = state.certificate_service.verify(slug.trim()).await?;
    Ok(Json(verified))
}
