use rand::seq::SliceRandom;
use rand::Rng;
use uuid::Uuid;

use crate::error::{Error, Result};
use crate::models::level::{Level, LevelMap};
use crate::models::option_set::OptionIdSet;

/// A non-archived question eligible for sampling, with its option ids and
/// correct subset as they are right now.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PoolQuestion {
    pub question_id: Uuid,
    pub allow_multiple: bool,
    pub option_ids: OptionIdSet,
    pub correct_option_ids: OptionIdSet,
}

/// A question chosen for an attempt. `position` is the zero-based order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlannedItem {
    pub position: i32,
    pub level: Level,
    pub question: PoolQuestion,
}

pub struct SamplingService;

impl SamplingService {
    /// Draws `quota` random questions per level, lowest level first, capped
    /// at what the pool holds for that level.
    pub fn plan<R: Rng + ?Sized>(
        pool: &LevelMap<Vec<PoolQuestion>>,
        quotas: &LevelMap<i32>,
        rng: &mut R,
    ) -> Result<Vec<PlannedItem>> {
        let mut planned = Vec::new();
        for (level, questions) in pool.iter() {
            let need = (*quotas.get(level)).max(0) as usize;
            if need == 0 || questions.is_empty() {
                continue;
            }
            let mut drawn = questions.clone();
            drawn.shuffle(rng);
            drawn.truncate(need);
            for question in drawn {
                planned.push(PlannedItem {
                    position: planned.len() as i32,
                    level,
                    question,
                });
            }
        }

        if planned.is_empty() {
            return Err(Error::Config("No questions configured.".to_string()));
        }
        Ok(planned)
    }
}
