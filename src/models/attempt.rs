use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::types::Json;
use sqlx::FromRow;
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

use crate::error::{Error, Result};
use crate::models::level::Level;
use crate::models::option_set::OptionIdSet;

/// Attempt lifecycle. Transitions only move forward:
/// `AwaitingStart -> InProgress -> Submitted`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AttemptStatus {
    AwaitingStart,
    InProgress,
    Submitted,
}

impl AttemptStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            AttemptStatus::AwaitingStart => "AWAITING_START",
            AttemptStatus::InProgress => "IN_PROGRESS",
            AttemptStatus::Submitted => "SUBMITTED",
        }
    }

    pub fn can_transition_to(&self, next: AttemptStatus) -> bool {
        matches!(
            (self, next),
            (AttemptStatus::AwaitingStart, AttemptStatus::InProgress)
                | (AttemptStatus::InProgress, AttemptStatus::Submitted)
        )
    }
}

impl fmt::Display for AttemptStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for AttemptStatus {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "AWAITING_START" => Ok(AttemptStatus::AwaitingStart),
            "IN_PROGRESS" => Ok(AttemptStatus::InProgress),
            "SUBMITTED" => Ok(AttemptStatus::Submitted),
            other => Err(format!("unknown attempt status: {}", other)),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PaymentStatus {
    Pending,
    Paid,
    NotRequired,
}

impl PaymentStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            PaymentStatus::Pending => "PENDING",
            PaymentStatus::Paid => "PAID",
            PaymentStatus::NotRequired => "NOT_REQUIRED",
        }
    }

    /// Whether an attempt with this payment state may be started.
    pub fn allows_start(&self) -> bool {
        matches!(self, PaymentStatus::Paid | PaymentStatus::NotRequired)
    }
}

impl FromStr for PaymentStatus {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "PENDING" => Ok(PaymentStatus::Pending),
            "PAID" => Ok(PaymentStatus::Paid),
            "NOT_REQUIRED" => Ok(PaymentStatus::NotRequired),
            other => Err(format!("unknown payment status: {}", other)),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Attempt {
    pub id: Uuid,
    pub user_id: Uuid,
    pub status: String,
    pub payment_status: String,
    pub amount_cents: Option<i64>,
    pub currency: Option<String>,
    pub region: Option<String>,
    pub paid_at: Option<DateTime<Utc>>,
    pub stripe_session_id: Option<String>,
    pub stripe_payment_id: Option<String>,
    pub agent_id: Option<Uuid>,
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
    pub level: Option<String>,
    pub certificate_id: Option<String>,
    pub verify_slug: Option<String>,
    pub issued_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Attempt {
    pub fn status(&self) -> Result<AttemptStatus> {
        self.status.parse().map_err(Error::Internal)
    }

    pub fn payment_status(&self) -> Result<PaymentStatus> {
        self.payment_status.parse().map_err(Error::Internal)
    }

    pub fn level(&self) -> Result<Option<Level>> {
        self.level
            .as_deref()
            .map(|raw| raw.parse().map_err(Error::Internal))
            .transpose()
    }
}

/// One sampled question inside an attempt. The option ids, the correct
/// subset, the level and the multi-select flag are frozen at sampling time.
#[derive(Debug, Clone, FromRow)]
pub struct AttemptItem {
    pub id: Uuid,
    pub attempt_id: Uuid,
    pub question_id: Uuid,
    pub level: String,
    pub allow_multiple: bool,
    pub option_ids: Json<OptionIdSet>,
    pub correct_option_ids: Json<OptionIdSet>,
    pub selected_option_ids: Json<OptionIdSet>,
    pub position: i32,
    pub is_correct: Option<bool>,
}

impl AttemptItem {
    pub fn level(&self) -> Result<Level> {
        self.level.parse().map_err(Error::Internal)
    }
}
