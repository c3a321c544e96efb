use axum::{
    extract::{Multipart, State},
    http::StatusCode,
    response::IntoResponse,
    Extension, Json,
};
use bytes::Bytes;
use serde_json::json;

use crate::dto::auth_dto::{LoginRequest, RegisterForm, UserSummary};
use crate::error::{Error, Result};
use crate::middleware::auth::Claims;
use crate::utils::uploads::MAX_KYC_FILE_BYTES;
use crate::AppState;

fn is_checked(value: &str) -> bool {
    matches!(
        value.trim().to_ascii_lowercase().as_str(),
        "true" | "1" | "on" | "yes"
    )
}

fn non_empty(value: String) -> Option<String> {
    let trimmed = value.trim();
    (!trimmed.is_empty()).then(|| trimmed.to_string())
}

/// Multipart registration: profile fields plus `selfie` and `id_doc` images.
#[axum::debug_handler]
pub async fn register(
    State(state): State<AppState>,
    mut multipart: Multipart,
) -> Result<impl IntoResponse> {
    let mut form = RegisterForm::default();
    let mut selfie: Option<Bytes> = None;
    let mut id_doc: Option<Bytes> = None;

    while let Some(field) = multipart.next_field().await.map_err(|e| {
        tracing::warn!(error = %e, "malformed registration form");
        Error::BadRequest("Malformed multipart body".into())
    })? {
        let name = field.name().unwrap_or_default().to_string();
        match name.as_str() {
            "selfie" | "id_doc" => {
                let data = field.bytes().await?;
                if data.len() > MAX_KYC_FILE_BYTES {
                    return Err(Error::Invalid(format!("{name} exceeds the 5 MB limit")));
                }
                if name == "selfie" {
                    selfie = Some(data);
                } else {
                    id_doc = Some(data);
                }
            }
            "full_name" => form.full_name = field.text().await?,
            "email" => form.email = field.text().await?,
            "password" => form.password = field.text().await?,
            "phone" => form.phone = non_empty(field.text().await?),
            "country" => form.country = non_empty(field.text().await?),
            "city" => form.city = non_empty(field.text().await?),
            "consent" => form.consent = is_checked(&field.text().await?),
            "referral_code" => form.referral_code = non_empty(field.text().await?),
            _ => {}
        }
    }

    let selfie = selfie
        .filter(|b| !b.is_empty())
        .ok_or_else(|| Error::Invalid("A selfie is required".into()))?;
    let id_doc = id_doc
        .filter(|b| !b.is_empty())
        .ok_or_else(|| Error::Invalid("An identity document is required".into()))?;

    let session = state.auth_service.register(form, selfie, id_doc).await?;
    Ok((StatusCode::CREATED, Json(session)))
}

#[axum::debug_handler]
pub async fn login(
    State(state): State<AppState>,
    Json(payload): Json<LoginRequest>,
) -> Result<impl IntoResponse> {
    let session = state.auth_service.login(payload).await?;
    Ok(Json(session))
}

/// Tokens are stateless; the client discards its copy.
#[axum::debug_handler]
pub async fn logout() -> impl IntoResponse {
    Json(json!({ "ok": true }))
}

#[axum::debug_handler]
pub async fn me(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
) -> Result<impl IntoResponse> {
    let user = state.auth_service.find_user(claims.user_id()?).await?;
    Ok(Json(UserSummary::from(user)))
}
