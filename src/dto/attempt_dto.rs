use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;
use validator::Validate;

use crate::models::attempt::Attempt;
use crate::models::level::{Level, LevelMap};
use crate::models::option_set::OptionIdSet;
use crate::services::grading_service::{LadderStep, LevelResult};

#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct ClaimAttemptRequest {
    #[validate(length(min = 1, max = 255))]
    pub stripe_session_id: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StartAttemptResponse {
    pub attempt_id: Uuid,
    pub status: String,
    pub started_at: Option<DateTime<Utc>>,
}

impl From<Attempt> for StartAttemptResponse {
    fn from(a: Attempt) -> Self {
        Self {
            attempt_id: a.id,
            status: a.status,
            started_at: a.started_at,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct SaveSelectionRequest {
    #[validate(length(max = 64))]
    pub selected_option_ids: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SaveSelectionResponse {
    pub ok: bool,
}

/// An option as shown to the candidate, without correctness.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ItemOptionView {
    pub id: String,
    pub text: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct AttemptItemView {
    pub id: Uuid,
    pub position: i32,
    pub question_id: Uuid,
    pub level: String,
    pub allow_multiple: bool,
    pub text: String,
    pub options: Vec<ItemOptionView>,
    pub selected_option_ids: OptionIdSet,
}

#[derive(Debug, Clone, Serialize)]
pub struct AttemptStateResponse {
    pub id: Uuid,
    pub status: String,
    pub level: Option<String>,
    pub duration_min: i32,
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
    /// Only reported while the attempt is in progress.
    pub remaining_seconds: Option<i64>,
    pub items: Vec<AttemptItemView>,
}

#[derive(Debug, Clone, Serialize)]
pub struct SubmitAttemptResponse {
    pub ok: bool,
    pub attempt_id: Uuid,
    pub level: Level,
    pub per_level: LevelMap<LevelResult>,
}

#[derive(Debug, Clone, Serialize)]
pub struct AttemptResultResponse {
    pub id: Uuid,
    pub status: String,
    pub level: Level,
    pub label: &'static str,
    pub finished_at: Option<DateTime<Utc>>,
    pub ladder: Vec<LadderStep>,
}

#[derive(Debug, Clone, Serialize)]
pub struct AttemptSummary {
    pub id: Uuid,
    pub status: String,
    pub payment_status: String,
    pub amount_cents: Option<i64>,
    pub currency: Option<String>,
    pub region: Option<String>,
    pub level: Option<String>,
    pub paid_at: Option<DateTime<Utc>>,
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
    pub certificate_id: Option<String>,
}

impl From<Attempt> for AttemptSummary {
    fn from(a: Attempt) -> Self {
        Self {
            id: a.id,
            status: a.status,
            payment_status: a.payment_status,
            amount_cents: a.amount_cents,
            currency: a.currency,
            region: a.region,
            level: a.level,
            paid_at: a.paid_at,
            started_at: a.started_at,
            finished_at: a.finished_at,
            certificate_id: a.certificate_id,
        }
    }
}
