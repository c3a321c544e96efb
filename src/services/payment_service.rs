use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use reqwest::Client;
use serde::Deserialize;
use sqlx::PgPool;
use uuid::Uuid;
use validator::Validate;

use crate::config::{get_config, Config};
use crate::dto::checkout_dto::{
    CheckoutContextResponse, CheckoutResponse, CheckoutSessionObject, CreateCheckoutRequest,
    LinkedAgentSummary, RegionOption, StripeEvent,
};
use crate::error::{Error, Result};
use crate::services::agent_service::AgentService;
use crate::services::clock::Clock;
use crate::utils::stripe_signature::{verify_signature, DEFAULT_TOLERANCE_SECS};

const CHECKOUT_SESSIONS_URL: &str = "https://api.stripe.com/v1/checkout/sessions";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Region {
    Eu,
    Uk,
    Us,
}

impl Region {
    pub const ALL: [Region; 3] = [Region::Eu, Region::Uk, Region::Us];

    pub fn code(&self) -> &'static str {
        match self {
            Region::Eu => "EU",
            Region::Uk => "UK",
            Region::Us => "US",
        }
    }

    pub fn currency(&self) -> &'static str {
        match self {
            Region::Eu => "EUR",
            Region::Uk => "GBP",
            Region::Us => "USD",
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Region::Eu => "Europe (EUR)",
            Region::Uk => "United Kingdom (GBP)",
            Region::Us => "United States (USD)",
        }
    }

    pub fn price_id<'a>(&self, config: &'a Config) -> Option<&'a str> {
        let price = match self {
            Region::Eu => &config.stripe_price_eu,
            Region::Uk => &config.stripe_price_uk,
            Region::Us => &config.stripe_price_us,
        };
        price.as_deref().filter(|p| !p.trim().is_empty())
    }
}

impl FromStr for Region {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.trim().to_ascii_uppercase().as_str() {
            "EU" => Ok(Region::Eu),
            "UK" | "GB" => Ok(Region::Uk),
            "US" => Ok(Region::Us),
            other => Err(format!("unknown region '{other}'")),
        }
    }
}

/// A completed checkout that should become a paid attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PaidSession {
    pub session_id: String,
    pub user_id: Uuid,
    pub amount_cents: i64,
    pub currency: Option<String>,
    pub region: Option<String>,
    pub payment_id: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WebhookOutcome {
    Recorded(Uuid),
    Duplicate,
    Ignored,
}

/// `Ok(None)` for events that do not grant a test. `Err` carries the reason a
/// relevant event could not be used; such events are acknowledged anyway.
pub fn parse_paid_session(event: &StripeEvent) -> std::result::Result<Option<PaidSession>, String> {
    let completed = match event.event_type.as_str() {
        "checkout.session.completed" => true,
        "checkout.session.async_payment_succeeded" => false,
        _ => return Ok(None),
    };

    let session: CheckoutSessionObject = serde_json::from_value(event.data.object.clone())
        .map_err(|e| format!("malformed checkout session: {e}"))?;

    // Delayed payment methods complete the session before the money arrives.
    if completed && session.payment_status.as_deref().is_some_and(|s| s != "paid") {
        return Ok(None);
    }

    let reference = session
        .client_reference_id
        .as_deref()
        .ok_or_else(|| format!("session {} has no client reference", session.id))?;
    let user_id = Uuid::parse_str(reference)
        .map_err(|_| format!("session {} has an invalid client reference", session.id))?;

    let payment_id = session.payment_intent_id();
    Ok(Some(PaidSession {
        user_id,
        amount_cents: session.amount_total.unwrap_or(0),
        currency: session
            .currency
            .as_deref()
            .map(str::to_uppercase)
            .filter(|c| !c.is_empty()),
        region: session.metadata.get("region").cloned(),
        payment_id,
        session_id: session.id,
    }))
}

#[derive(Debug, Deserialize)]
struct CreatedSession {
    id: String,
    url: Option<String>,
}

#[derive(Clone)]
pub struct PaymentService {
    pool: PgPool,
    client: Client,
    agents: AgentService,
    clock: Arc<dyn Clock>,
}

impl PaymentService {
    pub fn new(pool: PgPool, agents: AgentService, clock: Arc<dyn Clock>) -> Self {
        let client = Client::builder()
            .timeout(Duration::from_secs(15))
            .build()
            .unwrap_or_else(|_| Client::new());
        Self {
            pool,
            client,
            agents,
            clock,
        }
    }

    pub async fn checkout_context(&self, user_id: Uuid) -> Result<CheckoutContextResponse> {
        let config = get_config();
        let agent = self.agents.linked_active_agent(user_id).await?;

        let regions = Region::ALL
            .iter()
            .map(|r| RegionOption {
                code: r.code().to_string(),
                name: r.name().to_string(),
                currency: r.currency().to_string(),
                available: r.price_id(config).is_some()
                    && agent.as_ref().map_or(true, |a| a.currency == r.currency()),
            })
            .collect();

        Ok(CheckoutContextResponse {
            has_agent: agent.is_some(),
            agent: agent.map(|a| LinkedAgentSummary {
                name: a.name,
                code: a.code,
                currency: a.currency,
            }),
            regions,
        })
    }

    /// Opens a hosted checkout for one test. The session carries the user id
    /// as client reference so the webhook can credit the right account.
    pub async fn create_checkout(
        &self,
        user_id: Uuid,
        email: &str,
        req: CreateCheckoutRequest,
    ) -> Result<CheckoutResponse> {
        req.validate()?;
        let config = get_config();
        let region: Region = req
            .region
            .parse()
            .map_err(|_| Error::BadRequest("Invalid region".into()))?;
        let price_id = region
            .price_id(config)
            .ok_or_else(|| Error::BadRequest("Invalid region".into()))?;

        let agent = self.agents.linked_active_agent(user_id).await?;
        if let Some(agent) = &agent {
            if agent.currency != region.currency() {
                return Err(Error::BadRequest(format!(
                    "Your agent requires payment in {}.",
                    agent.currency
                )));
            }
        }

        let secret = config
            .stripe_secret_key
            .as_deref()
            .ok_or_else(|| Error::Config("Payments are not configured".into()))?;

        let base = &config.public_base_url;
        let form: Vec<(&str, String)> = vec![
            ("mode", "payment".to_string()),
            ("line_items[0][price]", price_id.to_string()),
            ("line_items[0][quantity]", "1".to_string()),
            ("client_reference_id", user_id.to_string()),
            ("customer_email", email.to_string()),
            (
                "success_url",
                format!("{base}/candidate/instructions?cs={{CHECKOUT_SESSION_ID}}"),
            ),
            ("cancel_url", format!("{base}/candidate/checkout")),
            ("metadata[candidate_id]", user_id.to_string()),
            ("metadata[region]", region.code().to_string()),
            ("metadata[currency]", region.currency().to_string()),
            (
                "metadata[agent_id]",
                agent.as_ref().map(|a| a.id.to_string()).unwrap_or_default(),
            ),
        ];

        let res = self
            .client
            .post(CHECKOUT_SESSIONS_URL)
            .bearer_auth(secret)
            .form(&form)
            .send()
            .await?;

        if !res.status().is_success() {
            let status = res.status();
            let text = res.text().await.unwrap_or_default();
            tracing::error!(%status, body = %text, "checkout session creation failed");
            return Err(anyhow::anyhow!("Payment provider error {}", status).into());
        }

        let created: CreatedSession = res.json().await?;
        let url = created
            .url
            .ok_or_else(|| anyhow::anyhow!("Payment provider returned no checkout URL"))?;

        tracing::info!(%user_id, session_id = %created.id, region = region.code(), "checkout session created");
        Ok(CheckoutResponse {
            session_id: created.id,
            url,
        })
    }

    /// Verifies and applies a provider event. Only persistence failures are
    /// returned as errors so the provider retries them.
    pub async fn handle_webhook(&self, payload: &[u8], signature: Option<&str>) -> Result<WebhookOutcome> {
        let secret = get_config()
            .stripe_webhook_secret
            .as_deref()
            .ok_or_else(|| Error::Internal("Webhook secret is not configured".into()))?;
        let signature = signature.ok_or_else(|| Error::BadRequest("Missing signature".into()))?;

        verify_signature(
            payload,
            signature,
            secret,
            self.clock.now().timestamp(),
            DEFAULT_TOLERANCE_SECS,
        )
        .map_err(|e| {
            tracing::warn!(reason = ?e, "webhook signature verification failed");
            Error::BadRequest("Invalid signature".into())
        })?;

        let event: StripeEvent = serde_json::from_slice(payload)
            .map_err(|_| Error::BadRequest("Malformed event".into()))?;

        let session = match parse_paid_session(&event) {
            Ok(Some(session)) => session,
            Ok(None) => {
                tracing::debug!(event_type = %event.event_type, "webhook event ignored");
                return Ok(WebhookOutcome::Ignored);
            }
            Err(reason) => {
                tracing::warn!(event_id = ?event.id, %reason, "unusable checkout event acknowledged");
                return Ok(WebhookOutcome::Ignored);
            }
        };

        self.record_paid_session(&session).await
    }

    /// One attempt per checkout session, however often the event arrives.
    pub async fn record_paid_session(&self, session: &PaidSession) -> Result<WebhookOutcome> {
        let user_exists: bool =
            sqlx::query_scalar(r#"SELECT EXISTS (SELECT 1 FROM users WHERE id = $1)"#)
                .bind(session.user_id)
                .fetch_one(&self.pool)
                .await?;
        if !user_exists {
            tracing::warn!(user_id = %session.user_id, session_id = %session.session_id, "checkout for unknown user acknowledged");
            return Ok(WebhookOutcome::Ignored);
        }

        let inserted: Option<Uuid> = sqlx::query_scalar(
            r#"
            INSERT INTO attempts (
                user_id, status, payment_status, amount_cents, currency, region,
                paid_at, stripe_session_id, stripe_payment_id
            )
            VALUES ($1, 'AWAITING_START', 'PAID', $2, $3, $4, $5, $6, $7)
            ON CONFLICT (stripe_session_id) DO NOTHING
            RETURNING id
            "#,
        )
        .bind(session.user_id)
        .bind(session.amount_cents)
        .bind(session.currency.as_deref())
        .bind(session.region.as_deref())
        .bind(self.clock.now())
        .bind(&session.session_id)
        .bind(session.payment_id.as_deref())
        .fetch_optional(&self.pool)
        .await?;

        match inserted {
            Some(attempt_id) => {
                tracing::info!(
                    %attempt_id,
                    user_id = %session.user_id,
                    session_id = %session.session_id,
                    amount_cents = session.amount_cents,
                    "paid attempt recorded"
                );
                Ok(WebhookOutcome::Recorded(attempt_id))
            }
            None => Ok(WebhookOutcome::Duplicate),
        }
    }
}
