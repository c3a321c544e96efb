use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

pub const AGENT_ACTIVE: &str = "ACTIVE";
pub const AGENT_INACTIVE: &str = "INACTIVE";

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Agent {
    pub id: Uuid,
    pub name: String,
    pub email: String,
    pub code: String,
    pub commission_pct: Decimal,
    pub currency: String,
    pub status: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Agent {
    pub fn is_active(&self) -> bool {
        self.status == AGENT_ACTIVE
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct AgentPayout {
    pub id: Uuid,
    pub agent_id: Uuid,
    pub amount_cents: i64,
    pub currency: String,
    pub notes: Option<String>,
    pub created_by: Option<Uuid>,
    pub created_at: DateTime<Utc>,
}
