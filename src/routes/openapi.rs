use axum::{response::IntoResponse, Json};
use utoipa::OpenApi;

use crate::routes::attempts;

#[derive(OpenApi)]
#[openapi(
    info(title = "Proficiency test API", description = "Candidate attempt lifecycle"),
    paths(
        attempts::start_attempt,
        attempts::claim_attempt,
        attempts::begin_attempt,
        attempts::get_attempt,
        attempts::save_selection,
        attempts::submit_attempt,
        attempts::attempt_result,
    )
)]
pub struct ApiDoc;

pub async fn openapi_json() -> impl IntoResponse {
    Json(ApiDoc::openapi())
}
