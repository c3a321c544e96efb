use std::borrow::Cow;

use sqlx::types::Json;
use sqlx::PgPool;
use validator::{ValidationError, ValidationErrors};

use crate::error::{Error, Result};
use crate::models::level::{Level, LevelMap};
use crate::models::settings::{TestSettings, TestSettingsRow};
use crate::services::question_service::QuestionService;

pub const MIN_DURATION_MIN: i32 = 1;
pub const MAX_DURATION_MIN: i32 = 600;

#[derive(Clone)]
pub struct SettingsService {
    pool: PgPool,
}

impl SettingsService {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Reads the singleton, creating it with defaults on first use.
    pub async fn load(&self) -> Result<TestSettings> {
        let defaults = TestSettings::default();
        sqlx::query(
            r#"
            INSERT INTO test_settings (id, duration_min, quotas, thresholds)
            VALUES (1, $1, $2, $3)
            ON CONFLICT (id) DO NOTHING
            "#,
        )
        .bind(defaults.duration_min)
        .bind(Json(defaults.quotas))
        .bind(Json(defaults.thresholds))
        .execute(&self.pool)
        .await?;

        let row = sqlx::query_as::<_, TestSettingsRow>(
            r#"SELECT * FROM test_settings WHERE id = 1"#,
        )
        .fetch_one(&self.pool)
        .await?;
        Ok(row.into())
    }

    pub async fn update(&self, next: TestSettings) -> Result<TestSettings> {
        let mut tx = self.pool.begin().await?;
        let available = QuestionService::count_available(&mut *tx).await?;
        validate_settings(&next, &available)?;

        let row = sqlx::query_as::<_, TestSettingsRow>(
            r#"
            INSERT INTO test_settings (id, duration_min, quotas, thresholds, updated_at)
            VALUES (1, $1, $2, $3, NOW())
            ON CONFLICT (id) DO UPDATE
            SET duration_min = EXCLUDED.duration_min,
                quotas = EXCLUDED.quotas,
                thresholds = EXCLUDED.thresholds,
                updated_at = NOW()
            RETURNING *
            "#,
        )
        .bind(next.duration_min)
        .bind(Json(next.quotas))
        .bind(Json(next.thresholds))
        .fetch_one(&mut *tx)
        .await?;
        tx.commit().await?;

        tracing::info!(duration_min = next.duration_min, "test settings updated");
        Ok(row.into())
    }
}

fn quota_field(level: Level) -> &'static str {
    match level {
        Level::A1 => "quotas.A1",
        Level::A2 => "quotas.A2",
        Level::B1 => "quotas.B1",
        Level::B2 => "quotas.B2",
        Level::C1 => "quotas.C1",
        Level::C2 => "quotas.C2",
    }
}

fn threshold_field(level: Level) -> &'static str {
    match level {
        Level::A1 => "thresholds.A1",
        Level::A2 => "thresholds.A2",
        Level::B1 => "thresholds.B1",
        Level::B2 => "thresholds.B2",
        Level::C1 => "thresholds.C1",
        Level::C2 => "thresholds.C2",
    }
}

fn field_error(code: &'static str, message: String) -> ValidationError {
    let mut err = ValidationError::new(code);
    err.message = Some(Cow::from(message));
    err
}

/// Duration 1..=600, each quota 0..=available, each threshold 0..=100 and
/// at least one question sampled overall.
pub fn validate_settings(settings: &TestSettings, available: &LevelMap<i64>) -> Result<()> {
    let mut errors = ValidationErrors::new();

    if !(MIN_DURATION_MIN..=MAX_DURATION_MIN).contains(&settings.duration_min) {
        errors.add(
            "duration_min",
            field_error(
                "range",
                format!(
                    "Duration must be between {} and {} minutes",
                    MIN_DURATION_MIN, MAX_DURATION_MIN
                ),
            ),
        );
    }

    for (level, quota) in settings.quotas.iter() {
        let have = *available.get(level);
        if *quota < 0 {
            errors.add(
                quota_field(level),
                field_error("range", format!("{} quota cannot be negative", level)),
            );
        } else if i64::from(*quota) > have {
            errors.add(
                quota_field(level),
                field_error(
                    "exceeds_available",
                    format!("{} quota {} exceeds the {} available questions", level, quota, have),
                ),
            );
        }
    }

    for (level, threshold) in settings.thresholds.iter() {
        if !(0..=100).contains(threshold) {
            errors.add(
                threshold_field(level),
                field_error("range", format!("{} threshold must be between 0 and 100", level)),
            );
        }
    }

    let total: i64 = settings.quotas.iter().map(|(_, q)| i64::from((*q).max(0))).sum();
    if total == 0 {
        errors.add(
            "quotas",
            field_error("empty", "At least one question must be sampled".to_string()),
        );
    }

    if errors.errors().is_empty() {
        Ok(())
    } else {
        Err(Error::Validation(errors))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn valid() -> (TestSettings, LevelMap<i64>) {
        let mut settings = TestSettings::default();
        settings.quotas.a1 = 2;
        settings.quotas.b2 = 1;
        (settings, LevelMap::splat(5))
    }

    fn failed_fields(result: Result<()>) -> Vec<String> {
        match result {
            Err(Error::Validation(errors)) => {
                let mut fields: Vec<String> =
                    errors.errors().keys().map(|k| k.to_string()).collect();
                fields.sort();
                fields
            }
            other => panic!("expected validation error, got {:?}", other),
        }
    }

    #[test]
    fn accepts_reasonable_settings() {
        let (settings, available) = valid();
        assert!(validate_settings(&settings, &available).is_ok());
    }

    #[test]
    fn defaults_alone_are_rejected_for_sampling_nothing() {
        let settings = TestSettings::default();
        assert_eq!(
            failed_fields(validate_settings(&settings, &LevelMap::splat(10))),
            vec!["quotas"]
        );
    }

    #[test]
    fn duration_bounds() {
        let (mut settings, available) = valid();
        settings.duration_min = 0;
        assert_eq!(failed_fields(validate_settings(&settings, &available)), vec!["duration_min"]);
        settings.duration_min = 601;
        assert!(validate_settings(&settings, &available).is_err());
        settings.duration_min = 600;
        assert!(validate_settings(&settings, &available).is_ok());
    }

    #[test]
    fn quota_above_available_or_negative() {
        let (mut settings, available) = valid();
        settings.quotas.c1 = 6;
        settings.quotas.a2 = -1;
        assert_eq!(
            failed_fields(validate_settings(&settings, &available)),
            vec!["quotas.A2", "quotas.C1"]
        );
    }

    #[test]
    fn threshold_range() {
        let (mut settings, available) = valid();
        settings.thresholds.b1 = 101;
        settings.thresholds.c2 = -5;
        assert_eq!(
            failed_fields(validate_settings(&settings, &available)),
            vec!["thresholds.B1", "thresholds.C2"]
        );
    }
}
