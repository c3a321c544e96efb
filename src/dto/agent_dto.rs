use std::str::FromStr;

use chrono::{DateTime, Utc};
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;
use validator::Validate;

use crate::error::{Error, Result};
use crate::models::agent::{Agent, AgentPayout};
use crate::dto::pagination::Paged;

#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct CreateAgentPayload {
    #[validate(length(min = 1, max = 200))]
    pub name: String,
    #[validate(email)]
    pub email: String,
    pub commission_pct: Decimal,
    #[validate(custom(function = "crate::utils::validation::validate_currency"))]
    pub currency: String,
    #[validate(custom(function = "crate::utils::validation::validate_agent_status"))]
    pub status: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, Validate)]
pub struct UpdateAgentPayload {
    #[validate(length(min = 1, max = 200))]
    pub name: Option<String>,
    #[validate(email)]
    pub email: Option<String>,
    pub commission_pct: Option<Decimal>,
    #[validate(custom(function = "crate::utils::validation::validate_currency"))]
    pub currency: Option<String>,
    #[validate(custom(function = "crate::utils::validation::validate_agent_status"))]
    pub status: Option<String>,
}

pub fn check_commission_pct(pct: Decimal) -> Result<()> {
    if pct < Decimal::ZERO || pct > Decimal::ONE_HUNDRED {
        return Err(Error::Invalid(
            "Commission percent must be between 0 and 100".into(),
        ));
    }
    Ok(())
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct AgentListQuery {
    pub search: Option<String>,
    pub status: Option<String>,
    pub page: Option<i64>,
    pub page_size: Option<i64>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct AgentDetailQuery {
    pub attempts_page: Option<i64>,
    pub payouts_page: Option<i64>,
    pub page_size: Option<i64>,
}

/// Commission figures in minor units of the agent's currency.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct AgentMetrics {
    pub referrals: i64,
    pub paid_tests: i64,
    pub revenue_cents: i64,
    pub earned_cents: i64,
    pub paid_cents: i64,
    pub outstanding_cents: i64,
}

impl AgentMetrics {
    pub fn compute(
        referrals: i64,
        paid_tests: i64,
        revenue_cents: i64,
        commission_pct: Decimal,
        paid_cents: i64,
    ) -> Self {
        let earned_cents = commission_cents(revenue_cents, commission_pct);
        Self {
            referrals,
            paid_tests,
            revenue_cents,
            earned_cents,
            paid_cents,
            outstanding_cents: (earned_cents - paid_cents).max(0),
        }
    }
}

/// `floor(revenue * pct / 100)`.
pub fn commission_cents(revenue_cents: i64, pct: Decimal) -> i64 {
    (Decimal::from(revenue_cents) * pct / Decimal::ONE_HUNDRED)
        .floor()
        .to_i64()
        .unwrap_or(0)
}

#[derive(Debug, Clone, Serialize)]
pub struct AgentResponse {
    #[serde(flatten)]
    pub agent: Agent,
    pub metrics: AgentMetrics,
}

#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct PayoutPayload {
    /// Major units, as a decimal string or a JSON number.
    pub amount: serde_json::Value,
    #[validate(length(max = 1000))]
    pub notes: Option<String>,
}

/// Converts a payout amount to cents, truncating anything below a cent.
pub fn parse_amount_cents(value: &serde_json::Value) -> Result<i64> {
    let raw = match value {
        serde_json::Value::String(s) => s.trim().to_string(),
        serde_json::Value::Number(n) => n.to_string(),
        _ => return Err(Error::Invalid("Amount must be a number".into())),
    };
    let amount = Decimal::from_str(&raw)
        .or_else(|_| Decimal::from_scientific(&raw))
        .map_err(|_| Error::Invalid("Amount must be a number".into()))?;
    let cents = (amount * Decimal::ONE_HUNDRED)
        .trunc()
        .to_i64()
        .ok_or_else(|| Error::Invalid("Amount is out of range".into()))?;
    if cents <= 0 {
        return Err(Error::Invalid("Amount must be greater than zero".into()));
    }
    Ok(cents)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Assignment {
    Manual,
    Default,
    None,
}

/// Attribution of a referral attempt as listed for administrators.
#[derive(Debug, Clone, FromRow)]
pub struct ReferralAttemptRecord {
    pub attempt_id: Uuid,
    pub candidate_id: Uuid,
    pub candidate_name: String,
    pub candidate_email: String,
    pub status: String,
    pub payment_status: String,
    pub amount_cents: Option<i64>,
    pub currency: Option<String>,
    pub paid_at: Option<DateTime<Utc>>,
    pub manual_agent_id: Option<Uuid>,
    pub manual_agent_name: Option<String>,
    pub linked_agent_id: Option<Uuid>,
    pub linked_agent_name: Option<String>,
    pub linked_agent_status: Option<String>,
    pub linked_agent_currency: Option<String>,
}

impl ReferralAttemptRecord {
    /// MANUAL wins; DEFAULT needs an active linked agent whose currency
    /// matches a paid attempt.
    pub fn assignment(&self) -> Assignment {
        if self.manual_agent_id.is_some() {
            return Assignment::Manual;
        }
        let linked_applies = self.linked_agent_id.is_some()
            && self.linked_agent_status.as_deref() == Some(crate::models::agent::AGENT_ACTIVE)
            && self.payment_status == "PAID"
            && self.currency.is_some()
            && self.currency == self.linked_agent_currency;
        if linked_applies {
            Assignment::Default
        } else {
            Assignment::None
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct ReferralAttemptRow {
    pub attempt_id: Uuid,
    pub candidate_id: Uuid,
    pub candidate_name: String,
    pub candidate_email: String,
    pub status: String,
    pub payment_status: String,
    pub amount_cents: Option<i64>,
    pub currency: Option<String>,
    pub paid_at: Option<DateTime<Utc>>,
    pub assignment: Assignment,
    pub agent_id: Option<Uuid>,
    pub agent_name: Option<String>,
}

impl From<ReferralAttemptRecord> for ReferralAttemptRow {
    fn from(r: ReferralAttemptRecord) -> Self {
        let assignment = r.assignment();
        let (agent_id, agent_name) = match assignment {
            Assignment::Manual => (r.manual_agent_id, r.manual_agent_name),
            Assignment::Default => (r.linked_agent_id, r.linked_agent_name),
            Assignment::None => (None, None),
        };
        Self {
            attempt_id: r.attempt_id,
            candidate_id: r.candidate_id,
            candidate_name: r.candidate_name,
            candidate_email: r.candidate_email,
            status: r.status,
            payment_status: r.payment_status,
            amount_cents: r.amount_cents,
            currency: r.currency,
            paid_at: r.paid_at,
            assignment,
            agent_id,
            agent_name,
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ReferralAttemptQuery {
    pub search: Option<String>,
    pub page: Option<i64>,
    pub page_size: Option<i64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AssignAgentPayload {
    /// An agent id, or null / "" / "none" / "null" to clear.
    pub agent_id: Option<String>,
}

impl AssignAgentPayload {
    /// `Ok(None)` means clear the manual assignment.
    pub fn target(&self) -> Result<Option<Uuid>> {
        let Some(raw) = self.agent_id.as_deref().map(str::trim) else {
            return Ok(None);
        };
        if raw.is_empty() || raw.eq_ignore_ascii_case("none") || raw.eq_ignore_ascii_case("null") {
            return Ok(None);
        }
        Uuid::parse_str(raw)
            .map(Some)
            .map_err(|_| Error::Invalid("agent_id must be a valid id".into()))
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct AssignAgentResponse {
    pub ok: bool,
    pub attempt_id: Uuid,
    pub agent_id: Option<Uuid>,
}

#[derive(Debug, Clone, Serialize)]
pub struct EligibleAgent {
    pub id: Uuid,
    pub name: String,
    pub code: String,
    pub currency: String,
    pub manual: bool,
    pub default: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct AgentDetailResponse {
    pub agent: AgentResponse,
    pub attempts: Paged<ReferralAttemptRow>,
    pub payouts: Paged<AgentPayout>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct ValidateReferralRequest {
    #[validate(length(min = 1, max = 32))]
    pub code: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReferralAgentView {
    pub name: String,
    pub code: String,
    pub currency: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ValidateReferralResponse {
    pub valid: bool,
    pub agent: Option<ReferralAgentView>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn commission_is_floored() {
        // 3 x 49.99 at 12.5% = 18.74625
        assert_eq!(commission_cents(14_997, Decimal::new(125, 1)), 1_874);
        assert_eq!(commission_cents(0, Decimal::new(50, 0)), 0);
    }

    #[test]
    fn outstanding_never_negative() {
        let m = AgentMetrics::compute(4, 2, 10_000, Decimal::new(10, 0), 1_500);
        assert_eq!(m.earned_cents, 1_000);
        assert_eq!(m.outstanding_cents, 0);

        let m = AgentMetrics::compute(4, 2, 10_000, Decimal::new(10, 0), 400);
        assert_eq!(m.outstanding_cents, 600);
    }

    #[test]
    fn payout_amount_parsing() {
        assert_eq!(parse_amount_cents(&json!("12.345")).unwrap(), 1_234);
        assert_eq!(parse_amount_cents(&json!(7)).unwrap(), 700);
        assert_eq!(parse_amount_cents(&json!(0.5)).unwrap(), 50);
        assert!(parse_amount_cents(&json!("0.004")).is_err());
        assert!(parse_amount_cents(&json!("-3")).is_err());
        assert!(parse_amount_cents(&json!("abc")).is_err());
        assert!(parse_amount_cents(&json!(null)).is_err());
    }

    #[test]
    fn commission_pct_bounds() {
        assert!(check_commission_pct(Decimal::ZERO).is_ok());
        assert!(check_commission_pct(Decimal::ONE_HUNDRED).is_ok());
        assert!(check_commission_pct(Decimal::new(1001, 1)).is_err());
        assert!(check_commission_pct(Decimal::new(-1, 0)).is_err());
    }

    #[test]
    fn clear_values_for_assignment() {
        for raw in [None, Some(""), Some("none"), Some("NULL"), Some("  ")] {
            let payload = AssignAgentPayload { agent_id: raw.map(str::to_string) };
            assert_eq!(payload.target().unwrap(), None);
        }
        let id = Uuid::new_v4();
        let payload = AssignAgentPayload { agent_id: Some(id.to_string()) };
        assert_eq!(payload.target().unwrap(), Some(id));
        let payload = AssignAgentPayload { agent_id: Some("agent-7".into()) };
        assert!(payload.target().is_err());
    }

    fn record() -> ReferralAttemptRecord {
        ReferralAttemptRecord {
            attempt_id: Uuid::new_v4(),
            candidate_id: Uuid::new_v4(),
            candidate_name: "Jo".into(),
            candidate_email: "jo@example.com".into(),
            status: "SUBMITTED".into(),
            payment_status: "PAID".into(),
            amount_cents: Some(4_900),
            currency: Some("EUR".into()),
            paid_at: None,
            manual_agent_id: None,
            manual_agent_name: None,
            linked_agent_id: Some(Uuid::new_v4()),
            linked_agent_name: Some("Linked".into()),
            linked_agent_status: Some("ACTIVE".into()),
            linked_agent_currency: Some("EUR".into()),
        }
    }

    #[test]
    fn linked_active_matching_agent_is_default() {
        assert_eq!(record().assignment(), Assignment::Default);
    }

    #[test]
    fn manual_assignment_wins() {
        let mut r = record();
        r.manual_agent_id = Some(Uuid::new_v4());
        assert_eq!(r.assignment(), Assignment::Manual);
    }

    #[test]
    fn default_requires_active_agent_paid_attempt_and_same_currency() {
        let mut r = record();
        r.linked_agent_status = Some("INACTIVE".into());
        assert_eq!(r.assignment(), Assignment::None);

        let mut r = record();
        r.linked_agent_currency = Some("GBP".into());
        assert_eq!(r.assignment(), Assignment::None);

        let mut r = record();
        r.payment_status = "NOT_REQUIRED".into();
        assert_eq!(r.assignment(), Assignment::None);
    }
}
