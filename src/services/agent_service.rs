use serde_json::json;
use sqlx::{PgConnection, PgPool};
use uuid::Uuid;
use validator::Validate;

use crate::dto::agent_dto::{
    check_commission_pct, parse_amount_cents, AgentDetailQuery, AgentDetailResponse,
    AgentListQuery, AgentMetrics, AgentResponse, AssignAgentPayload, AssignAgentResponse,
    CreateAgentPayload, EligibleAgent, PayoutPayload, ReferralAttemptQuery,
    ReferralAttemptRecord, ReferralAttemptRow, UpdateAgentPayload,
};
use crate::dto::pagination::{Page, Paged};
use crate::error::{Error, Result};
use crate::models::agent::{Agent, AgentPayout, AGENT_ACTIVE};
use crate::models::attempt::{Attempt, PaymentStatus};
use crate::services::audit_service::{AuditEntry, AuditService, RequestMeta};
use crate::utils::token::generate_agent_code;

const CODE_ATTEMPTS: usize = 5;

/// Attribution rule shared by metrics and the detail view: a manual
/// assignment, or no manual assignment and a default link, always in the
/// agent's currency.
const ATTRIBUTED_TO_AGENT: &str = r#"
    a.payment_status = 'PAID'
    AND a.currency = ag.currency
    AND (
        a.agent_id = ag.id
        OR (a.agent_id IS NULL AND ag.status = 'ACTIVE' AND EXISTS (
            SELECT 1 FROM candidate_agent_links l
            WHERE l.candidate_id = a.user_id AND l.agent_id = ag.id
        ))
    )
"#;

const REFERRAL_SELECT: &str = r#"
    SELECT
        a.id AS attempt_id,
        a.user_id AS candidate_id,
        u.full_name AS candidate_name,
        u.email AS candidate_email,
        a.status,
        a.payment_status,
        a.amount_cents,
        a.currency,
        a.paid_at,
        a.agent_id AS manual_agent_id,
        ma.name AS manual_agent_name,
        l.agent_id AS linked_agent_id,
        la.name AS linked_agent_name,
        la.status AS linked_agent_status,
        la.currency AS linked_agent_currency
    FROM attempts a
    JOIN users u ON u.id = a.user_id
    LEFT JOIN agents ma ON ma.id = a.agent_id
    LEFT JOIN candidate_agent_links l ON l.candidate_id = a.user_id
    LEFT JOIN agents la ON la.id = l.agent_id
"#;

#[derive(Clone)]
pub struct AgentService {
    pool: PgPool,
    audit: AuditService,
}

impl AgentService {
    pub fn new(pool: PgPool) -> Self {
        let audit = AuditService::new(pool.clone());
        Self { pool, audit }
    }

    pub async fn find(&self, id: Uuid) -> Result<Agent> {
        sqlx::query_as::<_, Agent>(r#"SELECT * FROM agents WHERE id = $1"#)
            .bind(id)
            .fetch_optional(&self.pool)
            .await?
            .ok_or_else(|| Error::NotFound("Agent not found".into()))
    }

    pub async fn list(&self, query: &AgentListQuery) -> Result<Paged<AgentResponse>> {
        let page = Page::new(query.page, query.page_size);
        let search = query
            .search
            .as_deref()
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(|s| format!("%{s}%"));
        let status = query.status.as_deref().map(str::to_uppercase);

        let agents = sqlx::query_as::<_, Agent>(
            r#"
            SELECT * FROM agents
            WHERE ($1::text IS NULL OR name ILIKE $1 OR email ILIKE $1 OR code ILIKE $1)
              AND ($2::text IS NULL OR status = $2)
            ORDER BY created_at DESC, id DESC
            LIMIT $3 OFFSET $4
            "#,
        )
        .bind(search.as_deref())
        .bind(status.as_deref())
        .bind(page.page_size)
        .bind(page.offset())
        .fetch_all(&self.pool)
        .await?;

        let total: i64 = sqlx::query_scalar(
            r#"
            SELECT COUNT(*) FROM agents
            WHERE ($1::text IS NULL OR name ILIKE $1 OR email ILIKE $1 OR code ILIKE $1)
              AND ($2::text IS NULL OR status = $2)
            "#,
        )
        .bind(search.as_deref())
        .bind(status.as_deref())
        .fetch_one(&self.pool)
        .await?;

        let mut conn = self.pool.acquire().await?;
        let mut items = Vec::with_capacity(agents.len());
        for agent in agents {
            let metrics = Self::metrics(&mut *conn, &agent).await?;
            items.push(AgentResponse { agent, metrics });
        }
        Ok(Paged::new(items, page, total))
    }

    pub async fn create(&self, mut payload: CreateAgentPayload, meta: &RequestMeta) -> Result<AgentResponse> {
        payload.email = payload.email.trim().to_lowercase();
        payload.currency = payload.currency.trim().to_uppercase();
        payload.name = payload.name.trim().to_string();
        payload.validate()?;
        check_commission_pct(payload.commission_pct)?;
        let status = payload.status.clone().unwrap_or_else(|| AGENT_ACTIVE.to_string());

        let mut created = None;
        for _ in 0..CODE_ATTEMPTS {
            let code = generate_agent_code();
            let inserted = sqlx::query_as::<_, Agent>(
                r#"
                INSERT INTO agents (name, email, code, commission_pct, currency, status)
                VALUES ($1, $2, $3, $4, $5, $6)
                RETURNING *
                "#,
            )
            .bind(&payload.name)
            .bind(&payload.email)
            .bind(&code)
            .bind(payload.commission_pct)
            .bind(&payload.currency)
            .bind(&status)
            .fetch_one(&self.pool)
            .await;

            match inserted {
                Ok(agent) => {
                    created = Some(agent);
                    break;
                }
                Err(sqlx::Error::Database(db)) if db.constraint() == Some("agents_code_key") => {
                    tracing::debug!(%code, "agent code collision, retrying");
                }
                Err(sqlx::Error::Database(db)) if db.constraint() == Some("agents_email_key") => {
                    return Err(Error::Conflict("Agent email already exists".into()));
                }
                Err(e) => return Err(e.into()),
            }
        }
        let agent = created
            .ok_or_else(|| Error::Internal("Could not allocate a unique agent code".into()))?;

        self.audit
            .record(
                meta,
                AuditEntry {
                    action: "agent.create",
                    entity_type: "agent",
                    entity_id: agent.id,
                    changes: Some(json!({ "after": &agent })),
                },
            )
            .await;
        tracing::info!(agent_id = %agent.id, code = %agent.code, "agent created");

        let mut conn = self.pool.acquire().await?;
        let metrics = Self::metrics(&mut *conn, &agent).await?;
        Ok(AgentResponse { agent, metrics })
    }

    pub async fn update(&self, id: Uuid, mut payload: UpdateAgentPayload, meta: &RequestMeta) -> Result<AgentResponse> {
        payload.email = payload.email.map(|e| e.trim().to_lowercase());
        payload.currency = payload.currency.map(|c| c.trim().to_uppercase());
        payload.name = payload.name.map(|n| n.trim().to_string());
        payload.validate()?;
        if let Some(pct) = payload.commission_pct {
            check_commission_pct(pct)?;
        }

        let before = self.find(id).await?;
        let updated = sqlx::query_as::<_, Agent>(
            r#"
            UPDATE agents SET
                name = COALESCE($2, name),
                email = COALESCE($3, email),
                commission_pct = COALESCE($4, commission_pct),
                currency = COALESCE($5, currency),
                status = COALESCE($6, status),
                updated_at = NOW()
            WHERE id = $1
            RETURNING *
            "#,
        )
        .bind(id)
        .bind(payload.name.as_deref())
        .bind(payload.email.as_deref())
        .bind(payload.commission_pct)
        .bind(payload.currency.as_deref())
        .bind(payload.status.as_deref())
        .fetch_optional(&self.pool)
        .await;

        let agent = match updated {
            Ok(Some(agent)) => agent,
            Ok(None) => return Err(Error::NotFound("Agent not found".into())),
            Err(sqlx::Error::Database(db)) if db.constraint() == Some("agents_email_key") => {
                return Err(Error::Conflict("Agent email already exists".into()));
            }
            Err(e) => return Err(e.into()),
        };

        self.audit
            .record(
                meta,
                AuditEntry {
                    action: "agent.update",
                    entity_type: "agent",
                    entity_id: agent.id,
                    changes: Some(json!({ "before": &before, "after": &agent })),
                },
            )
            .await;

        let mut conn = self.pool.acquire().await?;
        let metrics = Self::metrics(&mut *conn, &agent).await?;
        Ok(AgentResponse { agent, metrics })
    }

    /// Links and payouts go with the agent; manual assignments are cleared.
    pub async fn delete(&self, id: Uuid, meta: &RequestMeta) -> Result<()> {
        let agent = sqlx::query_as::<_, Agent>(r#"DELETE FROM agents WHERE id = $1 RETURNING *"#)
            .bind(id)
            .fetch_optional(&self.pool)
            .await?
            .ok_or_else(|| Error::NotFound("Agent not found".into()))?;

        self.audit
            .record(
                meta,
                AuditEntry {
                    action: "agent.delete",
                    entity_type: "agent",
                    entity_id: agent.id,
                    changes: Some(json!({ "before": &agent })),
                },
            )
            .await;
        tracing::info!(agent_id = %id, "agent deleted");
        Ok(())
    }

    pub async fn detail(&self, id: Uuid, query: &AgentDetailQuery) -> Result<AgentDetailResponse> {
        let agent = self.find(id).await?;
        let attempts_page = Page::new(query.attempts_page, query.page_size);
        let payouts_page = Page::new(query.payouts_page, query.page_size);

        let mut conn = self.pool.acquire().await?;
        let metrics = Self::metrics(&mut *conn, &agent).await?;

        let attempts_sql = format!(
            r#"{REFERRAL_SELECT}
            JOIN agents ag ON ag.id = $1
            WHERE {ATTRIBUTED_TO_AGENT}
            ORDER BY a.paid_at DESC NULLS LAST, a.created_at DESC
            LIMIT $2 OFFSET $3"#
        );
        let attempts: Vec<ReferralAttemptRow> = sqlx::query_as::<_, ReferralAttemptRecord>(&attempts_sql)
            .bind(id)
            .bind(attempts_page.page_size)
            .bind(attempts_page.offset())
            .fetch_all(&mut *conn)
            .await?
            .into_iter()
            .map(ReferralAttemptRow::from)
            .collect();

        let payouts = sqlx::query_as::<_, AgentPayout>(
            r#"
            SELECT * FROM agent_payouts WHERE agent_id = $1
            ORDER BY created_at DESC, id DESC
            LIMIT $2 OFFSET $3
            "#,
        )
        .bind(id)
        .bind(payouts_page.page_size)
        .bind(payouts_page.offset())
        .fetch_all(&mut *conn)
        .await?;

        let payout_total: i64 =
            sqlx::query_scalar(r#"SELECT COUNT(*) FROM agent_payouts WHERE agent_id = $1"#)
                .bind(id)
                .fetch_one(&mut *conn)
                .await?;

        Ok(AgentDetailResponse {
            agent: AgentResponse { agent, metrics },
            attempts: Paged::new(attempts, attempts_page, metrics.paid_tests),
            payouts: Paged::new(payouts, payouts_page, payout_total),
        })
    }

    /// Records a payout no larger than the current outstanding balance.
    pub async fn create_payout(&self, agent_id: Uuid, payload: PayoutPayload, meta: &RequestMeta) -> Result<AgentPayout> {
        payload.validate()?;
        let amount_cents = parse_amount_cents(&payload.amount)?;
        let notes = payload
            .notes
            .as_deref()
            .map(str::trim)
            .filter(|n| !n.is_empty());

        let mut tx = self.pool.begin().await?;
        let agent = sqlx::query_as::<_, Agent>(r#"SELECT * FROM agents WHERE id = $1 FOR UPDATE"#)
            .bind(agent_id)
            .fetch_optional(&mut *tx)
            .await?
            .ok_or_else(|| Error::NotFound("Agent not found".into()))?;

        let metrics = Self::metrics(&mut *tx, &agent).await?;
        if amount_cents > metrics.outstanding_cents {
            return Err(Error::Invalid(format!(
                "Amount exceeds the outstanding balance of {} cents",
                metrics.outstanding_cents
            )));
        }

        let payout = sqlx::query_as::<_, AgentPayout>(
            r#"
            INSERT INTO agent_payouts (agent_id, amount_cents, currency, notes, created_by)
            VALUES ($1, $2, $3, $4, $5)
            RETURNING *
            "#,
        )
        .bind(agent.id)
        .bind(amount_cents)
        .bind(&agent.currency)
        .bind(notes)
        .bind(meta.actor_id)
        .fetch_one(&mut *tx)
        .await?;
        tx.commit().await?;

        self.audit
            .record(
                meta,
                AuditEntry {
                    action: "agent.payout",
                    entity_type: "agent",
                    entity_id: agent.id,
                    changes: Some(json!({ "payout": &payout })),
                },
            )
            .await;
        tracing::info!(agent_id = %agent.id, amount_cents, "agent payout recorded");
        Ok(payout)
    }

    pub async fn referral_attempts(&self, query: &ReferralAttemptQuery) -> Result<Paged<ReferralAttemptRow>> {
        let page = Page::new(query.page, query.page_size);
        let search = query
            .search
            .as_deref()
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(|s| format!("%{s}%"));

        let sql = format!(
            r#"{REFERRAL_SELECT}
            WHERE ($1::text IS NULL OR u.full_name ILIKE $1 OR u.email ILIKE $1)
            ORDER BY a.paid_at DESC NULLS LAST, a.created_at DESC
            LIMIT $2 OFFSET $3"#
        );
        let items = sqlx::query_as::<_, ReferralAttemptRecord>(&sql)
            .bind(search.as_deref())
            .bind(page.page_size)
            .bind(page.offset())
            .fetch_all(&self.pool)
            .await?
            .into_iter()
            .map(ReferralAttemptRow::from)
            .collect();

        let total: i64 = sqlx::query_scalar(
            r#"
            SELECT COUNT(*) FROM attempts a JOIN users u ON u.id = a.user_id
            WHERE ($1::text IS NULL OR u.full_name ILIKE $1 OR u.email ILIKE $1)
            "#,
        )
        .bind(search.as_deref())
        .fetch_one(&self.pool)
        .await?;

        Ok(Paged::new(items, page, total))
    }

    /// Sets or clears the manual agent of a paid attempt.
    pub async fn assign_agent(
        &self,
        attempt_id: Uuid,
        payload: AssignAgentPayload,
        meta: &RequestMeta,
    ) -> Result<AssignAgentResponse> {
        let target = payload.target()?;
        let mut tx = self.pool.begin().await?;
        let attempt = sqlx::query_as::<_, Attempt>(r#"SELECT * FROM attempts WHERE id = $1 FOR UPDATE"#)
            .bind(attempt_id)
            .fetch_optional(&mut *tx)
            .await?
            .ok_or_else(|| Error::NotFound("Attempt not found".into()))?;

        if let Some(agent_id) = target {
            let agent = sqlx::query_as::<_, Agent>(r#"SELECT * FROM agents WHERE id = $1"#)
                .bind(agent_id)
                .fetch_optional(&mut *tx)
                .await?
                .ok_or_else(|| Error::NotFound("Agent not found".into()))?;
            if !agent.is_active() {
                return Err(Error::Invalid("Agent is inactive".into()));
            }
            if attempt.payment_status()? != PaymentStatus::Paid {
                return Err(Error::Conflict("Only paid attempts can be assigned to an agent".into()));
            }
            if attempt.currency.as_deref() != Some(agent.currency.as_str()) {
                return Err(Error::Invalid("Agent currency does not match the attempt".into()));
            }
        }

        sqlx::query(r#"UPDATE attempts SET agent_id = $2, updated_at = NOW() WHERE id = $1"#)
            .bind(attempt_id)
            .bind(target)
            .execute(&mut *tx)
            .await?;
        tx.commit().await?;

        self.audit
            .record(
                meta,
                AuditEntry {
                    action: "attempt.assign_agent",
                    entity_type: "attempt",
                    entity_id: attempt_id,
                    changes: Some(json!({ "before": attempt.agent_id, "after": target })),
                },
            )
            .await;
        tracing::info!(%attempt_id, agent_id = ?target, "attempt agent assignment changed");

        Ok(AssignAgentResponse {
            ok: true,
            attempt_id,
            agent_id: target,
        })
    }

    /// Active agents in the attempt's currency. Unpaid attempts have none.
    pub async fn eligible_agents(&self, attempt_id: Uuid) -> Result<Vec<EligibleAgent>> {
        let attempt = sqlx::query_as::<_, Attempt>(r#"SELECT * FROM attempts WHERE id = $1"#)
            .bind(attempt_id)
            .fetch_optional(&self.pool)
            .await?
            .ok_or_else(|| Error::NotFound("Attempt not found".into()))?;

        let Some(currency) = attempt.currency.as_deref() else {
            return Ok(Vec::new());
        };
        if attempt.payment_status()? != PaymentStatus::Paid {
            return Ok(Vec::new());
        }

        let default_agent: Option<Uuid> = sqlx::query_scalar(
            r#"SELECT agent_id FROM candidate_agent_links WHERE candidate_id = $1"#,
        )
        .bind(attempt.user_id)
        .fetch_optional(&self.pool)
        .await?;

        let agents = sqlx::query_as::<_, Agent>(
            r#"SELECT * FROM agents WHERE status = 'ACTIVE' AND currency = $1 ORDER BY name, id"#,
        )
        .bind(currency)
        .fetch_all(&self.pool)
        .await?;

        Ok(agents
            .into_iter()
            .map(|a| EligibleAgent {
                manual: attempt.agent_id == Some(a.id),
                default: default_agent == Some(a.id),
                id: a.id,
                name: a.name,
                code: a.code,
                currency: a.currency,
            })
            .collect())
    }

    /// The candidate's referring agent, if it is still active.
    pub async fn linked_active_agent(&self, candidate_id: Uuid) -> Result<Option<Agent>> {
        let agent = sqlx::query_as::<_, Agent>(
            r#"
            SELECT ag.* FROM candidate_agent_links l
            JOIN agents ag ON ag.id = l.agent_id
            WHERE l.candidate_id = $1 AND ag.status = 'ACTIVE'
            "#,
        )
        .bind(candidate_id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(agent)
    }

    async fn metrics(conn: &mut PgConnection, agent: &Agent) -> Result<AgentMetrics> {
        let referrals: i64 = sqlx::query_scalar(
            r#"SELECT COUNT(*) FROM candidate_agent_links WHERE agent_id = $1"#,
        )
        .bind(agent.id)
        .fetch_one(&mut *conn)
        .await?;

        let sql = format!(
            r#"
            SELECT COUNT(*), COALESCE(SUM(a.amount_cents), 0)::BIGINT
            FROM attempts a
            JOIN agents ag ON ag.id = $1
            WHERE {ATTRIBUTED_TO_AGENT}
            "#
        );
        let (paid_tests, revenue_cents): (i64, i64) = sqlx::query_as(&sql)
            .bind(agent.id)
            .fetch_one(&mut *conn)
            .await?;

        let paid_cents: i64 = sqlx::query_scalar(
            r#"SELECT COALESCE(SUM(amount_cents), 0)::BIGINT FROM agent_payouts WHERE agent_id = $1"#,
        )
        .bind(agent.id)
        .fetch_one(&mut *conn)
        .await?;

        Ok(AgentMetrics::compute(
            referrals,
            paid_tests,
            revenue_cents,
            agent.commission_pct,
            paid_cents,
        ))
    }
}
