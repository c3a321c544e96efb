use std::net::IpAddr;

use serde_json::Value as JsonValue;
use sqlx::types::ipnetwork::IpNetwork;
use sqlx::PgPool;
use uuid::Uuid;

/// Who performed an administrative change and from where.
#[derive(Debug, Clone, Default)]
pub struct RequestMeta {
    pub actor_id: Option<Uuid>,
    pub ip: Option<IpAddr>,
    pub user_agent: Option<String>,
}

#[derive(Debug, Clone)]
pub struct AuditEntry<'a> {
    pub action: &'a str,
    pub entity_type: &'a str,
    pub entity_id: Uuid,
    pub changes: Option<JsonValue>,
}

#[derive(Clone)]
pub struct AuditService {
    pool: PgPool,
}

impl AuditService {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Failures are logged and swallowed; the audited change has already
    /// been committed.
    pub async fn record(&self, meta: &RequestMeta, entry: AuditEntry<'_>) {
        let result = sqlx::query(
            r#"
            INSERT INTO audit_logs (user_id, action, entity_type, entity_id, changes, ip_address, user_agent)
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            "#,
        )
        .bind(meta.actor_id)
        .bind(entry.action)
        .bind(entry.entity_type)
        .bind(entry.entity_id)
        .bind(entry.changes)
        .bind(meta.ip.map(IpNetwork::from))
        .bind(meta.user_agent.as_deref())
        .execute(&self.pool)
        .await;

        if let Err(e) = result {
            tracing::warn!(
                error = %e,
                action = entry.action,
                entity_id = %entry.entity_id,
                "failed to write audit log"
            );
        }
    }
}
