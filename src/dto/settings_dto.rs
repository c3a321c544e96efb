use serde::{Deserialize, Serialize};

use crate::models::level::LevelMap;
use crate::models::settings::TestSettings;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UpdateSettingsPayload {
    pub duration_min: i32,
    pub quotas: LevelMap<i32>,
    pub thresholds: LevelMap<i32>,
}

impl From<UpdateSettingsPayload> for TestSettings {
    fn from(p: UpdateSettingsPayload) -> Self {
        Self {
            duration_min: p.duration_min,
            quotas: p.quotas,
            thresholds: p.thresholds,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct SettingsResponse {
    pub duration_min: i32,
    pub quotas: LevelMap<i32>,
    pub thresholds: LevelMap<i32>,
    /// Non-archived questions per level.
    pub available: LevelMap<i64>,
}

impl SettingsResponse {
    pub fn new(settings: TestSettings, available: LevelMap<i64>) -> Self {
        Self {
            duration_min: settings.duration_min,
            quotas: settings.quotas,
            thresholds: settings.thresholds,
            available,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct CandidateTestSettings {
    pub duration_min: i32,
}
