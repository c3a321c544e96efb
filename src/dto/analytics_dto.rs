use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

use crate::models::level::{Level, LevelMap};

pub const DEFAULT_WINDOW_DAYS: i64 = 30;

/// Rounded percentage, 0 when there is nothing to divide by.
pub fn percent(num: i64, den: i64) -> i64 {
    if den <= 0 {
        return 0;
    }
    ((num as f64 / den as f64) * 100.0).round() as i64
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct SystemAnalyticsQuery {
    pub days: Option<i64>,
    /// A country name, or `ALL`.
    pub country: Option<String>,
}

impl SystemAnalyticsQuery {
    pub fn window_days(&self) -> i64 {
        self.days.unwrap_or(DEFAULT_WINDOW_DAYS).max(1)
    }

    pub fn country_filter(&self) -> Option<String> {
        self.country
            .as_deref()
            .map(str::trim)
            .filter(|c| !c.is_empty() && !c.eq_ignore_ascii_case("ALL"))
            .map(str::to_string)
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct AnalyticsParams {
    pub days: i64,
    pub country: String,
    pub since: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize)]
pub struct SystemKpis {
    pub tests_purchased: i64,
    pub revenue_cents: i64,
    pub completion_rate_pct: i64,
    pub retake_rate_pct: i64,
    pub active_candidates: i64,
}

#[derive(Debug, Clone, Serialize)]
pub struct SectionAverage {
    pub level: Level,
    pub avg_percent: i64,
}

#[derive(Debug, Clone, Serialize)]
pub struct QuickSummary {
    pub total_tests_purchased: i64,
    pub total_revenue_cents: i64,
    pub avg_revenue_per_test_cents: i64,
    pub unique_candidates: i64,
    pub overall_pass_rate_pct: i64,
    pub candidate_retake_rate_pct: i64,
}

#[derive(Debug, Clone, Serialize)]
pub struct SystemAnalytics {
    pub params: AnalyticsParams,
    pub kpis: SystemKpis,
    pub section_averages: Vec<SectionAverage>,
    pub quick_summary: QuickSummary,
}

/// Correct / total item counts per level.
pub fn section_percentages(counts: &LevelMap<(i64, i64)>) -> Vec<SectionAverage> {
    counts
        .iter()
        .map(|(level, &(ok, total))| SectionAverage {
            level,
            avg_percent: percent(ok, total),
        })
        .collect()
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct CandidateListQuery {
    pub search: Option<String>,
    pub page: Option<i64>,
    pub page_size: Option<i64>,
}

#[derive(Debug, Clone, Serialize, FromRow)]
pub struct CandidateListItem {
    pub id: Uuid,
    pub name: String,
    pub email: String,
    pub attempts: i64,
    pub last_result: Option<String>,
    pub revenue_cents: i64,
    pub last_completed_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Serialize, FromRow)]
pub struct CandidateProfile {
    pub id: Uuid,
    pub full_name: String,
    pub email: String,
    pub phone: Option<String>,
    pub country: Option<String>,
    pub city: Option<String>,
    pub kyc_status: String,
    pub created_at: DateTime<Utc>,
    pub selfie_path: Option<String>,
    pub id_doc_path: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct CandidateTotals {
    pub total_attempts: i64,
    pub total_revenue_cents: i64,
}

#[derive(Debug, Clone, Serialize)]
pub struct LevelPercent {
    pub level: Level,
    pub percent: i64,
}

#[derive(Debug, Clone, Serialize)]
pub struct CandidateAttemptHistory {
    pub id: Uuid,
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
    pub status: String,
    pub result: Option<String>,
    pub amount_cents: i64,
    pub currency: Option<String>,
    /// Only levels the attempt actually sampled.
    pub sections: Vec<LevelPercent>,
}

#[derive(Debug, Clone, Serialize)]
pub struct CandidateDetail {
    pub user: CandidateProfile,
    pub totals: CandidateTotals,
    pub attempts: Vec<CandidateAttemptHistory>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CountriesResponse {
    pub countries: Vec<String>,
}
