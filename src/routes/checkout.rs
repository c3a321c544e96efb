use axum::{
    extract::State,
    http::HeaderMap,
    response::IntoResponse,
    Extension, Json,
};
use bytes::Bytes;
use serde_json::json;

use crate::dto::checkout_dto::CreateCheckoutRequest;
use crate::error::Result;
use crate::middleware::auth::Claims;
use crate::services::payment_service::WebhookOutcome;
use crate::AppState;

#[axum::debug_handler]
pub async fn checkout_context(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
) -> Result<impl IntoResponse> {
    let context = state
        .payment_service
        .checkout_context(claims.user_id()?)
        .await?;
    Ok(Json(context))
}

#[axum::debug_handler]
pub async fn create_checkout(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Json(payload): Json<CreateCheckoutRequest>,
) -> Result<impl IntoResponse> {
    let session = state
        .payment_service
        .create_checkout(claims.user_id()?, &claims.email, payload)
        .await?;
    Ok(Json(session))
}

/// Raw body is required: the signature covers the exact bytes sent.
#[axum::debug_handler]
pub async fn stripe_webhook(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<impl IntoResponse> {
    let signature = headers
        .get("stripe-signature")
        .and_then(|v| v.to_str().ok());
    let outcome = state.payment_service.handle_webhook(&body, signature).await?;
    let recorded = matches!(outcome, WebhookOutcome::Recorded(_));
    Ok(Json(json!({ "received": true, "recorded": recorded })))
}
