use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::types::Json;
use sqlx::FromRow;

use crate::models::level::LevelMap;

pub const DEFAULT_DURATION_MIN: i32 = 30;
pub const DEFAULT_THRESHOLD: i32 = 60;

/// The stored settings singleton (`id = 1`).
#[derive(Debug, Clone, FromRow)]
pub struct TestSettingsRow {
    pub id: i32,
    pub duration_min: i32,
    pub quotas: Json<LevelMap<i32>>,
    pub thresholds: Json<LevelMap<i32>>,
    pub updated_at: DateTime<Utc>,
}

/// Settings snapshot read once per request and handed to the lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TestSettings {
    pub duration_min: i32,
    pub quotas: LevelMap<i32>,
    pub thresholds: LevelMap<i32>,
}

impl Default for TestSettings {
    fn default() -> Self {
        Self {
            duration_min: DEFAULT_DURATION_MIN,
            quotas: LevelMap::splat(0),
            thresholds: LevelMap::splat(DEFAULT_THRESHOLD),
        }
    }
}

impl From<TestSettingsRow> for TestSettings {
    fn from(row: TestSettingsRow) -> Self {
        Self {
            duration_min: row.duration_min,
            quotas: row.quotas.0,
            thresholds: row.thresholds.0,
        }
    }
}
