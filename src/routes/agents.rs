use std::net::{IpAddr, SocketAddr};

use axum::{
    extract::{ConnectInfo, Path, Query, State},
    http::{header, HeaderMap, StatusCode},
    response::IntoResponse,
    Extension, Json,
};
use serde_json::json;
use uuid::Uuid;
use validator::Validate;

use crate::dto::agent_dto::{
    AgentDetailQuery, AgentListQuery, AssignAgentPayload, CreateAgentPayload, PayoutPayload,
    ReferralAgentView, ReferralAttemptQuery, UpdateAgentPayload, ValidateReferralRequest,
    ValidateReferralResponse,
};
use crate::error::Result;
use crate::middleware::auth::Claims;
use crate::services::audit_service::RequestMeta;
use crate::AppState;

/// First `X-Forwarded-For` hop, else the socket peer.
fn client_ip(headers: &HeaderMap, peer: Option<SocketAddr>) -> Option<IpAddr> {
    headers
        .get("x-forwarded-for")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.split(',').next())
        .and_then(|v| v.trim().parse().ok())
        .or_else(|| peer.map(|p| p.ip()))
}

fn request_meta(
    claims: &Claims,
    headers: &HeaderMap,
    peer: Option<ConnectInfo<SocketAddr>>,
) -> RequestMeta {
    RequestMeta {
        actor_id: claims.user_id().ok(),
        ip: client_ip(headers, peer.map(|ConnectInfo(addr)| addr)),
        user_agent: headers
            .get(header::USER_AGENT)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string),
    }
}

#[axum::debug_handler]
pub async fn list_agents(
    State(state): State<AppState>,
    Query(query): Query<AgentListQuery>,
) -> Result<impl IntoResponse> {
    let agents = state.agent_service.list(&query).await?;
    Ok(Json(agents))
}

#[axum::debug_handler]
pub async fn create_agent(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    peer: Option<ConnectInfo<SocketAddr>>,
    headers: HeaderMap,
    Json(payload): Json<CreateAgentPayload>,
) -> Result<impl IntoResponse> {
    let meta = request_meta(&claims, &headers, peer);
    let agent = state.agent_service.create(payload, &meta).await?;
    Ok((StatusCode::CREATED, Json(agent)))
}

#[axum::debug_handler]
pub async fn get_agent(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    Query(query): Query<AgentDetailQuery>,
) -> Result<impl IntoResponse> {
    let detail = state.agent_service.detail(id, &query).await?;
    Ok(Json(detail))
}

#[axum::debug_handler]
pub async fn update_agent(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    peer: Option<ConnectInfo<SocketAddr>>,
    headers: HeaderMap,
    Path(id): Path<Uuid>,
    Json(payload): Json<UpdateAgentPayload>,
) -> Result<impl IntoResponse> {
    let meta = request_meta(&claims, &headers, peer);
    let agent = state.agent_service.update(id, payload, &meta).await?;
    Ok(Json(agent))
}

#[axum::debug_handler]
pub async fn delete_agent(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    peer: Option<ConnectInfo<SocketAddr>>,
    headers: HeaderMap,
    Path(id): Path<Uuid>,
) -> Result<impl IntoResponse> {
    let meta = request_meta(&claims, &headers, peer);
    state.agent_service.delete(id, &meta).await?;
    Ok(Json(json!({ "ok": true })))
}

#[axum::debug_handler]
pub async fn create_payout(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    peer: Option<ConnectInfo<SocketAddr>>,
    headers: HeaderMap,
    Path(id): Path<Uuid>,
    Json(payload): Json<PayoutPayload>,
) -> Result<impl IntoResponse> {
    let meta = request_meta(&claims, &headers, peer);
    let payout = state.agent_service.create_payout(id, payload, &meta).await?;
    Ok((StatusCode::CREATED, Json(payout)))
}

#[axum::debug_handler]
pub async fn referral_attempts(
    State(state): State<AppState>,
    Query(query): Query<ReferralAttemptQuery>,
) -> Result<impl IntoResponse> {
    let attempts = state.agent_service.referral_attempts(&query).await?;
    Ok(Json(attempts))
}

#[axum::debug_handler]
pub async fn assign_agent(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    peer: Option<ConnectInfo<SocketAddr>>,
    headers: HeaderMap,
    Path(id): Path<Uuid>,
    Json(payload): Json<AssignAgentPayload>,
) -> Result<impl IntoResponse> {
    let meta = request_meta(&claims, &headers, peer);
    let assigned = state.agent_service.assign_agent(id, payload, &meta).await?;
    Ok(Json(assigned))
}

#[axum::debug_handler]
pub async fn eligible_agents(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<impl IntoResponse> {
    let agents = state.agent_service.eligible_agents(id).await?;
    Ok(Json(json!({ "agents": agents })))
}

/// Public lookup used by the registration form.
#[axum::debug_handler]
pub async fn validate_referral(
    State(state): State<AppState>,
    Json(payload): Json<ValidateReferralRequest>,
) -> Result<impl IntoResponse> {
    payload.validate()?;
    let code = payload.code.trim().to_uppercase();
    let agent = state.auth_service.active_agent_by_code(&code).await?;
    Ok(Json(ValidateReferralResponse {
        valid: agent.is_some(),
        agent: agent.map(|a| ReferralAgentView {
            name: a.name,
            code: a.code,
            currency: a.currency,
        }),
    }))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn forwarded_for_wins_over_peer() {
        let mut headers = HeaderMap::new();
        headers.insert("x-forwarded-for", "203.0.113.9, 10.0.0.1".parse().unwrap());
        let peer: SocketAddr = "127.0.0.1:4000".parse().unwrap();
        assert_eq!(
            client_ip(&headers, Some(peer)),
            Some("203.0.113.9".parse().unwrap())
        );
        assert_eq!(
            client_ip(&HeaderMap::new(), Some(peer)),
            Some("127.0.0.1".parse().unwrap())
        );
        assert_eq!(client_ip(&HeaderMap::new(), None), None);
    }
}
