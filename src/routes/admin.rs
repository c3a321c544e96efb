use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::IntoResponse,
    Json,
};
use serde_json::json;
use uuid::Uuid;

use crate::dto::analytics_dto::{CandidateListQuery, SystemAnalyticsQuery};
use crate::dto::question_dto::{QuestionListQuery, QuestionPayload};
use crate::dto::settings_dto::{CandidateTestSettings, SettingsResponse, UpdateSettingsPayload};
use crate::error::Result;
use crate::AppState;

#[axum::debug_handler]
pub async fn list_questions(
    State(state): State<AppState>,
    Query(query): Query<QuestionListQuery>,
) -> Result<impl IntoResponse> {
    let questions = state.question_service.list(&query).await?;
    Ok(Json(questions))
}

#[axum::debug_handler]
pub async fn create_question(
    State(state): State<AppState>,
    Json(payload): Json<QuestionPayload>,
) -> Result<impl IntoResponse> {
    let question = state.question_service.create(payload).await?;
    Ok((StatusCode::CREATED, Json(question)))
}

#[axum::debug_handler]
pub async fn get_question(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<impl IntoResponse> {
    let question = state.question_service.get(id).await?;
    Ok(Json(question))
}

#[axum::debug_handler]
pub async fn update_question(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    Json(payload): Json<QuestionPayload>,
) -> Result<impl IntoResponse> {
    let question = state.question_service.update(id, payload).await?;
    Ok(Json(question))
}

#[axum::debug_handler]
pub async fn archive_question(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<impl IntoResponse> {
    state.question_service.archive(id).await?;
    Ok(Json(json!({ "ok": true })))
}

#[axum::debug_handler]
pub async fn get_settings(State(state): State<AppState>) -> Result<impl IntoResponse> {
    let settings = state.settings_service.load().await?;
    let available = state.question_service.available_by_level().await?;
    Ok(Json(SettingsResponse::new(settings, available)))
}

#[axum::debug_handler]
pub async fn update_settings(
    State(state): State<AppState>,
    Json(payload): Json<UpdateSettingsPayload>,
) -> Result<impl IntoResponse> {
    let settings = state.settings_service.update(payload.into()).await?;
    let available = state.question_service.available_by_level().await?;
    Ok(Json(SettingsResponse::new(settings, available)))
}

/// Candidates only see the time limit.
#[axum::debug_handler]
pub async fn candidate_test_settings(State(state): State<AppState>) -> Result<impl IntoResponse> {
    let settings = state.settings_service.load().await?;
    Ok(Json(CandidateTestSettings {
        duration_min: settings.duration_min,
    }))
}

#[axum::debug_handler]
pub async fn system_analytics(
    State(state): State<AppState>,
    Query(query): Query<SystemAnalyticsQuery>,
) -> Result<impl IntoResponse> {
    let stats = state.analytics_service.system(&query).await?;
    Ok(Json(stats))
}

#[axum::debug_handler]
pub async fn candidate_analytics(
    State(state): State<AppState>,
    Query(query): Query<CandidateListQuery>,
) -> Result<impl IntoResponse> {
    let candidates = state.analytics_service.candidates(&query).await?;
    Ok(Json(candidates))
}

#[axum::debug_handler]
pub async fn candidate_detail(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<impl IntoResponse> {
    let detail = state.analytics_service.candidate(id).await?;
    Ok(Json(detail))
}

#[axum::debug_handler]
pub async fn countries(State(state): State<AppState>) -> Result<impl IntoResponse> {
    let countries = state.analytics_service.countries().await?;
    Ok(Json(countries))
}
