use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use sqlx::{FromRow, PgPool};
use uuid::Uuid;

use crate::dto::analytics_dto::{
    percent, section_percentages, AnalyticsParams, CandidateAttemptHistory, CandidateDetail,
    CandidateListItem, CandidateListQuery, CandidateProfile, CandidateTotals, CountriesResponse,
    LevelPercent, QuickSummary, SystemAnalytics, SystemAnalyticsQuery, SystemKpis,
};
use crate::dto::pagination::{Page, Paged};
use crate::error::{Error, Result};
use crate::models::level::{Level, LevelMap};
use crate::models::user::ROLE_CANDIDATE;
use crate::services::clock::Clock;

// $1 = window start, $2 = optional country.
const IN_SCOPE: &str = "JOIN users u ON u.id = a.user_id WHERE ($2::text IS NULL OR u.country = $2)";
const STARTED: &str = "a.started_at >= $1";
const SUBMITTED: &str = "a.status = 'SUBMITTED' AND (a.finished_at >= $1 OR a.started_at >= $1)";

#[derive(Debug, FromRow)]
struct HistoryRow {
    id: Uuid,
    started_at: Option<DateTime<Utc>>,
    finished_at: Option<DateTime<Utc>>,
    status: String,
    level: Option<String>,
    amount_cents: Option<i64>,
    currency: Option<String>,
}

/// Start of a trailing window of `days` whole days ending now.
fn window_start(clock: &dyn Clock, days: i64) -> DateTime<Utc> {
    clock.now() - Duration::days(days.max(1))
}

#[derive(Clone)]
pub struct AnalyticsService {
    pool: PgPool,
    clock: Arc<dyn Clock>,
}

impl AnalyticsService {
    pub fn new(pool: PgPool, clock: Arc<dyn Clock>) -> Self {
        Self { pool, clock }
    }

    pub async fn system(&self, query: &SystemAnalyticsQuery) -> Result<SystemAnalytics> {
        let days = query.window_days();
        let country = query.country_filter();
        let since = window_start(self.clock.as_ref(), days);

        let (tests_purchased, revenue_cents): (i64, i64) = sqlx::query_as(&format!(
            "SELECT COUNT(*), COALESCE(SUM(a.amount_cents), 0)::BIGINT FROM attempts a {IN_SCOPE} \
             AND a.payment_status = 'PAID' AND a.paid_at >= $1"
        ))
        .bind(since)
        .bind(country.as_deref())
        .fetch_one(&self.pool)
        .await?;

        let started: i64 = sqlx::query_scalar(&format!(
            "SELECT COUNT(*) FROM attempts a {IN_SCOPE} AND {STARTED}"
        ))
        .bind(since)
        .bind(country.as_deref())
        .fetch_one(&self.pool)
        .await?;

        let levels: Vec<(Option<String>, i64)> = sqlx::query_as(&format!(
            "SELECT a.level, COUNT(*) FROM attempts a {IN_SCOPE} AND {SUBMITTED} GROUP BY a.level"
        ))
        .bind(since)
        .bind(country.as_deref())
        .fetch_all(&self.pool)
        .await?;
        let submitted: i64 = levels.iter().map(|(_, n)| n).sum();
        let passed: i64 = levels
            .iter()
            .filter(|(level, _)| {
                level
                    .as_deref()
                    .and_then(|l| l.parse::<Level>().ok())
                    .is_some_and(|l| l.is_pass())
            })
            .map(|(_, n)| n)
            .sum();

        let (retakers, candidates): (i64, i64) = sqlx::query_as(&format!(
            "SELECT COUNT(*) FILTER (WHERE n >= 2), COUNT(*) FROM ( \
                SELECT a.user_id, COUNT(*) AS n FROM attempts a {IN_SCOPE} AND {STARTED} GROUP BY a.user_id \
             ) per_user"
        ))
        .bind(since)
        .bind(country.as_deref())
        .fetch_one(&self.pool)
        .await?;

        let active_candidates: i64 = sqlx::query_scalar(&format!(
            "SELECT COUNT(DISTINCT a.user_id) FROM attempts a {IN_SCOPE} \
             AND a.status = 'SUBMITTED' AND a.finished_at >= $1"
        ))
        .bind(since)
        .bind(country.as_deref())
        .fetch_one(&self.pool)
        .await?;

        let item_rows: Vec<(String, i64, i64)> = sqlx::query_as(&format!(
            "SELECT i.level, COUNT(*) FILTER (WHERE i.is_correct), COUNT(*) \
             FROM attempt_items i JOIN attempts a ON a.id = i.attempt_id {IN_SCOPE} AND {SUBMITTED} \
             GROUP BY i.level"
        ))
        .bind(since)
        .bind(country.as_deref())
        .fetch_all(&self.pool)
        .await?;
        let mut counts: LevelMap<(i64, i64)> = LevelMap::default();
        for (level, ok, total) in item_rows {
            let level: Level = level.parse().map_err(Error::Internal)?;
            *counts.get_mut(level) = (ok, total);
        }

        let retake_rate_pct = percent(retakers, candidates);
        Ok(SystemAnalytics {
            params: AnalyticsParams {
                days,
                country: country.unwrap_or_else(|| "ALL".to_string()),
                since,
            },
            kpis: SystemKpis {
                tests_purchased,
                revenue_cents,
                completion_rate_pct: percent(submitted, started),
                retake_rate_pct,
                active_candidates,
            },
            section_averages: section_percentages(&counts),
            quick_summary: QuickSummary {
                total_tests_purchased: tests_purchased,
                total_revenue_cents: revenue_cents,
                avg_revenue_per_test_cents: if tests_purchased > 0 {
                    revenue_cents / tests_purchased
                } else {
                    0
                },
                unique_candidates: candidates,
                overall_pass_rate_pct: percent(passed, submitted),
                candidate_retake_rate_pct: retake_rate_pct,
            },
        })
    }

    pub async fn candidates(&self, query: &CandidateListQuery) -> Result<Paged<CandidateListItem>> {
        let page = Page::new(query.page, query.page_size);
        let search = query
            .search
            .as_deref()
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(|s| format!("%{s}%"));

        let items = sqlx::query_as::<_, CandidateListItem>(
            r#"
            SELECT
                u.id,
                u.full_name AS name,
                u.email,
                (SELECT COUNT(*) FROM attempts a WHERE a.user_id = u.id) AS attempts,
                last.level AS last_result,
                (SELECT COALESCE(SUM(a.amount_cents), 0)::BIGINT FROM attempts a
                  WHERE a.user_id = u.id AND a.payment_status = 'PAID') AS revenue_cents,
                COALESCE(last.finished_at, last.paid_at) AS last_completed_at
            FROM users u
            LEFT JOIN LATERAL (
                SELECT a.level, a.finished_at, a.paid_at FROM attempts a
                WHERE a.user_id = u.id AND a.status = 'SUBMITTED'
                ORDER BY a.finished_at DESC NULLS LAST, a.paid_at DESC NULLS LAST, a.id DESC
                LIMIT 1
            ) last ON TRUE
            WHERE u.role = $1
              AND ($2::text IS NULL OR u.full_name ILIKE $2 OR u.email ILIKE $2)
            ORDER BY u.created_at DESC, u.id DESC
            LIMIT $3 OFFSET $4
            "#,
        )
        .bind(ROLE_CANDIDATE)
        .bind(search.as_deref())
        .bind(page.page_size)
        .bind(page.offset())
        .fetch_all(&self.pool)
        .await?;

        let total: i64 = sqlx::query_scalar(
            r#"SELECT COUNT(*) FROM users u WHERE u.role = $1 AND ($2::text IS NULL OR u.full_name ILIKE $2 OR u.email ILIKE $2)"#,
        )
        .bind(ROLE_CANDIDATE)
        .bind(search.as_deref())
        .fetch_one(&self.pool)
        .await?;

        Ok(Paged::new(items, page, total))
    }

    pub async fn candidate(&self, id: Uuid) -> Result<CandidateDetail> {
        let user = sqlx::query_as::<_, CandidateProfile>(
            r#"
            SELECT u.id, u.full_name, u.email, u.phone, u.country, u.city, u.kyc_status, u.created_at,
                   iv.selfie_path, iv.id_doc_path
            FROM users u
            LEFT JOIN identity_verifications iv ON iv.user_id = u.id
            WHERE u.id = $1
            "#,
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?
        .ok_or_else(|| Error::NotFound("Candidate not found".into()))?;

        let history = sqlx::query_as::<_, HistoryRow>(
            r#"
            SELECT id, started_at, finished_at, status, level, amount_cents, currency
            FROM attempts WHERE user_id = $1
            ORDER BY started_at DESC NULLS LAST, id DESC
            "#,
        )
        .bind(id)
        .fetch_all(&self.pool)
        .await?;

        let item_rows: Vec<(Uuid, String, i64, i64)> = sqlx::query_as(
            r#"
            SELECT i.attempt_id, i.level, COUNT(*) FILTER (WHERE i.is_correct), COUNT(*)
            FROM attempt_items i JOIN attempts a ON a.id = i.attempt_id
            WHERE a.user_id = $1
            GROUP BY i.attempt_id, i.level
            "#,
        )
        .bind(id)
        .fetch_all(&self.pool)
        .await?;

        let mut sections: HashMap<Uuid, BTreeMap<Level, LevelPercent>> = HashMap::new();
        for (attempt_id, level, ok, total) in item_rows {
            let level: Level = level.parse().map_err(Error::Internal)?;
            sections.entry(attempt_id).or_default().insert(
                level,
                LevelPercent {
                    level,
                    percent: percent(ok, total),
                },
            );
        }

        let total_revenue_cents: i64 = sqlx::query_scalar(
            r#"SELECT COALESCE(SUM(amount_cents), 0)::BIGINT FROM attempts WHERE user_id = $1 AND payment_status = 'PAID'"#,
        )
        .bind(id)
        .fetch_one(&self.pool)
        .await?;

        let attempts: Vec<CandidateAttemptHistory> = history
            .into_iter()
            .map(|a| CandidateAttemptHistory {
                sections: sections
                    .remove(&a.id)
                    .map(|m| m.into_values().collect())
                    .unwrap_or_default(),
                id: a.id,
                started_at: a.started_at,
                finished_at: a.finished_at,
                status: a.status,
                result: a.level,
                amount_cents: a.amount_cents.unwrap_or(0),
                currency: a.currency,
            })
            .collect();

        Ok(CandidateDetail {
            user,
            totals: CandidateTotals {
                total_attempts: attempts.len() as i64,
                total_revenue_cents,
            },
            attempts,
        })
    }

    pub async fn countries(&self) -> Result<CountriesResponse> {
        let countries: Vec<String> = sqlx::query_scalar(
            r#"
            SELECT DISTINCT country FROM users
            WHERE role = $1 AND country IS NOT NULL AND country <> ''
            ORDER BY country
            "#,
        )
        .bind(ROLE_CANDIDATE)
        .fetch_all(&self.pool)
        .await?;
        Ok(CountriesResponse { countries })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::clock::MockClock;
    use chrono::TimeZone;

    #[test]
    fn window_counts_back_from_the_clock() {
        let mut clock = MockClock::new();
        clock
            .expect_now()
            .returning(|| Utc.with_ymd_and_hms(2026, 3, 31, 12, 0, 0).unwrap());

        assert_eq!(
            window_start(&clock, 30),
            Utc.with_ymd_and_hms(2026, 3, 1, 12, 0, 0).unwrap()
        );
        assert_eq!(
            window_start(&clock, 0),
            Utc.with_ymd_and_hms(2026, 3, 30, 12, 0, 0).unwrap()
        );
    }
}
