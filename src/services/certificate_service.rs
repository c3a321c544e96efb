use chrono::{DateTime, Utc};
use sqlx::{FromRow, PgPool};
use uuid::Uuid;

use crate::config::get_config;
use crate::dto::certificate_dto::{CertificateDocument, VerifyCertificateResponse, DEFAULT_REGION};
use crate::error::{Error, Result};
use crate::models::attempt::{Attempt, AttemptStatus};
use crate::models::level::Level;
use crate::services::grading_service::GradingService;
use crate::utils::time::format_issue_date;
use crate::utils::token::generate_certificate_id;
use crate::utils::validation::title_case;

#[derive(Debug, FromRow)]
struct IssuedCertificate {
    certificate_id: String,
    verify_slug: String,
    issued_at: DateTime<Utc>,
}

#[derive(Debug, FromRow)]
struct VerifiedRow {
    id: Uuid,
    full_name: String,
    level: Option<String>,
    certificate_id: Option<String>,
    issued_at: Option<DateTime<Utc>>,
    region: Option<String>,
}

#[derive(Clone)]
pub struct CertificateService {
    pool: PgPool,
}

impl CertificateService {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Issues the certificate on first request; later requests return the
    /// same identifiers. Other candidates' attempts read as not found.
    pub async fn document(&self, requester: Uuid, is_admin: bool, attempt_id: Uuid) -> Result<CertificateDocument> {
        let attempt = sqlx::query_as::<_, Attempt>(r#"SELECT * FROM attempts WHERE id = $1"#)
            .bind(attempt_id)
            .fetch_optional(&self.pool)
            .await?
            .filter(|a| is_admin || a.user_id == requester)
            .ok_or_else(|| Error::NotFound("Attempt not found".into()))?;

        if attempt.status()? != AttemptStatus::Submitted {
            return Err(Error::Conflict("Attempt is not submitted".into()));
        }
        let level = attempt.level()?.unwrap_or(Level::A1);

        let issued = self.issue(attempt.id).await?;
        let holder: String = sqlx::query_scalar(r#"SELECT full_name FROM users WHERE id = $1"#)
            .bind(attempt.user_id)
            .fetch_one(&self.pool)
            .await?;

        let base = &get_config().public_base_url;
        Ok(CertificateDocument {
            holder_name: title_case(&holder),
            level,
            label: level.label(),
            descriptor: level.descriptor(),
            ladder: GradingService::ladder(level),
            certificate_id: issued.certificate_id,
            attempt_id: attempt.id,
            issue_date: format_issue_date(issued.issued_at),
            region: region_or_default(attempt.region.as_deref()),
            verify_url: format!("{base}/verify/{}", issued.verify_slug),
        })
    }

    /// Concurrent first requests race on the COALESCE; whichever commits
    /// first fixes the values for everyone.
    async fn issue(&self, attempt_id: Uuid) -> Result<IssuedCertificate> {
        let mut last_err = None;
        for _ in 0..3 {
            let result = sqlx::query_as::<_, IssuedCertificate>(
                r#"
                UPDATE attempts SET
                    certificate_id = COALESCE(certificate_id, $2),
                    verify_slug = COALESCE(verify_slug, $3),
                    issued_at = COALESCE(issued_at, NOW()),
                    updated_at = NOW()
                WHERE id = $1
                RETURNING certificate_id, verify_slug, issued_at
                "#,
            )
            .bind(attempt_id)
            .bind(generate_certificate_id())
            .bind(Uuid::new_v4().to_string())
            .fetch_one(&self.pool)
            .await;

            match result {
                Ok(issued) => return Ok(issued),
                Err(sqlx::Error::Database(db)) if db.constraint() == Some("attempts_certificate_id_key") => {
                    tracing::debug!(%attempt_id, "certificate id collision, retrying");
                    last_err = Some(sqlx::Error::Database(db));
                }
                Err(e) => return Err(e.into()),
            }
        }
        Err(last_err
            .map(Error::from)
            .unwrap_or_else(|| Error::Internal("Could not issue certificate".into())))
    }

    pub async fn verify(&self, slug: &str) -> Result<VerifyCertificateResponse> {
        let row = sqlx::query_as::<_, VerifiedRow>(
            r#"
            SELECT a.id, u.full_name, a.level, a.certificate_id, a.issued_at, a.region
            FROM attempts a
            JOIN users u ON u.id = a.user_id
            WHERE a.verify_slug = $1 AND a.status = 'SUBMITTED'
            "#,
        )
        .bind(slug)
        .fetch_optional(&self.pool)
        .await?
        .ok_or_else(|| Error::NotFound("Invalid or unknown certificate".into()))?;

        let (Some(certificate_id), Some(issued_at)) = (row.certificate_id, row.issued_at) else {
            return Err(Error::NotFound("Invalid or unknown certificate".into()));
        };
        let level = row
            .level
            .as_deref()
            .map(str::parse::<Level>)
            .transpose()
            .map_err(Error::Internal)?
            .unwrap_or(Level::A1);

        Ok(VerifyCertificateResponse {
            valid: true,
            holder_name: title_case(&row.full_name),
            level,
            label: level.label(),
            attempt_id: row.id,
            certificate_id,
            issue_date: format_issue_date(issued_at),
            region: region_or_default(row.region.as_deref()),
        })
    }
}

fn region_or_default(region: Option<&str>) -> String {
    match region.map(str::trim).filter(|r| !r.is_empty()) {
        Some("EU") | None => DEFAULT_REGION.to_string(),
        Some("UK") => "United Kingdom".to_string(),
        Some("US") => "United States".to_string(),
        Some(other) => other.to_string(),
    }
}
