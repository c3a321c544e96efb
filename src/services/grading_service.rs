use serde::{Deserialize, Serialize};

use crate::models::level::{Level, LevelMap};
use crate::models::option_set::OptionIdSet;

/// Per-level outcome of a submitted attempt.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LevelResult {
    pub total: i64,
    pub correct: i64,
    /// `None` when the attempt had no items of this level.
    pub pct: Option<f64>,
    pub threshold: i32,
    pub passed: Option<bool>,
}

/// One rung of the six-level ladder shown with a result.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LadderStep {
    pub level: Level,
    pub label: &'static str,
    pub achieved: bool,
    pub current: bool,
}

pub struct GradingService;

impl GradingService {
    /// Restricts a requested selection to the item's frozen option ids.
    /// Single-select items keep only the first surviving id.
    pub fn normalize_selection(
        requested: &[String],
        allowed: &OptionIdSet,
        allow_multiple: bool,
    ) -> OptionIdSet {
        let mut selection: OptionIdSet = requested
            .iter()
            .filter(|id| allowed.contains(id))
            .cloned()
            .collect();
        if !allow_multiple {
            selection = selection.first().map(str::to_string).into_iter().collect();
        }
        selection
    }

    /// Exact set match. An item with no correct options can never be correct.
    pub fn is_correct(selected: &OptionIdSet, correct: &OptionIdSet) -> bool {
        !correct.is_empty() && selected.same_members(correct)
    }

    pub fn breakdown(
        outcomes: &[(Level, bool)],
        thresholds: &LevelMap<i32>,
    ) -> LevelMap<LevelResult> {
        let mut counts: LevelMap<(i64, i64)> = LevelMap::default();
        for (level, correct) in outcomes {
            let entry = counts.get_mut(*level);
            entry.0 += 1;
            if *correct {
                entry.1 += 1;
            }
        }

        counts.map(|level, &(total, correct)| {
            let threshold = *thresholds.get(level);
            if total == 0 {
                return LevelResult {
                    total,
                    correct,
                    pct: None,
                    threshold,
                    passed: None,
                };
            }
            let pct = (correct as f64 * 10_000.0 / total as f64).round() / 100.0;
            LevelResult {
                total,
                correct,
                pct: Some(pct),
                threshold,
                // integer comparison: correct / total >= threshold / 100
                passed: Some(correct * 100 >= i64::from(threshold) * total),
            }
        })
    }

    /// Climbs from the lowest level, skipping levels without items, and
    /// stops at the first level that has items and failed.
    pub fn evaluate_ladder(breakdown: &LevelMap<LevelResult>) -> Level {
        let mut achieved = Level::A1;
        for (level, result) in breakdown.iter() {
            match result.passed {
                None => continue,
                Some(true) => achieved = level,
                Some(false) => break,
            }
        }
        achieved
    }

    pub fn ladder(achieved: Level) -> Vec<LadderStep> {
        Level::ALL
            .into_iter()
            .map(|level| LadderStep {
                level,
                label: level.label(),
                achieved: level <= achieved,
                current: level == achieved,
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn set(ids: &[&str]) -> OptionIdSet {
        ids.iter().copied().collect()
    }

    fn ids(raw: &[&str]) -> Vec<String> {
        raw.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn selection_drops_unknown_ids() {
        let allowed = set(&["a", "b", "c"]);
        let got = GradingService::normalize_selection(&ids(&["z", "b", "a"]), &allowed, true);
        assert_eq!(got, set(&["b", "a"]));
        assert!(got.iter().all(|id| allowed.contains(id)));
    }

    #[test]
    fn single_select_keeps_first_valid_id() {
        let allowed = set(&["a", "b", "c"]);
        let got = GradingService::normalize_selection(&ids(&["x", "c", "a"]), &allowed, false);
        assert_eq!(got, set(&["c"]));

        let none = GradingService::normalize_selection(&ids(&["x", "y"]), &allowed, false);
        assert!(none.is_empty());
    }

    #[test]
    fn multi_select_deduplicates() {
        let allowed = set(&["a", "b"]);
        let got = GradingService::normalize_selection(&ids(&["a", "a", "b", "a"]), &allowed, true);
        assert_eq!(got.len(), 2);
    }

    #[test]
    fn correctness_is_order_independent_set_equality() {
        assert!(GradingService::is_correct(&set(&["b", "a"]), &set(&["a", "b"])));
        assert!(!GradingService::is_correct(&set(&["a"]), &set(&["a", "b"])));
        assert!(!GradingService::is_correct(&set(&["a", "b", "c"]), &set(&["a", "b"])));
    }

    #[test]
    fn empty_correct_set_is_never_correct() {
        assert!(!GradingService::is_correct(&set(&[]), &set(&[])));
    }

    #[test]
    fn passes_two_of_two_a1_and_fails_a2() {
        let mut thresholds = LevelMap::splat(60);
        thresholds.a1 = 50;
        thresholds.a2 = 50;
        let outcomes = [
            (Level::A1, true),
            (Level::A1, true),
            (Level::A2, false),
            (Level::A2, false),
        ];
        let breakdown = GradingService::breakdown(&outcomes, &thresholds);
        assert_eq!(breakdown.a1.passed, Some(true));
        assert_eq!(breakdown.a1.pct, Some(100.0));
        assert_eq!(breakdown.a2.passed, Some(false));
        assert_eq!(breakdown.a2.pct, Some(0.0));
        assert_eq!(breakdown.b1.passed, None);
        assert_eq!(breakdown.b1.pct, None);
        assert_eq!(GradingService::evaluate_ladder(&breakdown), Level::A1);
    }

    #[test]
    fn threshold_is_inclusive() {
        let thresholds = LevelMap::splat(50);
        let breakdown =
            GradingService::breakdown(&[(Level::B1, true), (Level::B1, false)], &thresholds);
        assert_eq!(breakdown.b1.passed, Some(true));
    }

    #[test]
    fn one_third_meets_a_33_threshold_but_not_34() {
        let outcomes = [(Level::A1, true), (Level::A1, false), (Level::A1, false)];
        let at_33 = GradingService::breakdown(&outcomes, &LevelMap::splat(33));
        let at_34 = GradingService::breakdown(&outcomes, &LevelMap::splat(34));
        assert_eq!(at_33.a1.passed, Some(true));
        assert_eq!(at_34.a1.passed, Some(false));
        assert_eq!(at_33.a1.pct, Some(33.33));
    }

    #[test]
    fn zero_thresholds_reach_highest_level_with_items() {
        let outcomes = [(Level::A1, false), (Level::B2, false), (Level::C1, false)];
        let breakdown = GradingService::breakdown(&outcomes, &LevelMap::splat(0));
        assert_eq!(GradingService::evaluate_ladder(&breakdown), Level::C1);
    }

    #[test]
    fn full_thresholds_with_a_miss_fall_to_lowest_band() {
        let outcomes = [(Level::A1, false), (Level::A2, true), (Level::B1, true)];
        let breakdown = GradingService::breakdown(&outcomes, &LevelMap::splat(100));
        assert_eq!(GradingService::evaluate_ladder(&breakdown), Level::A1);
    }

    #[test]
    fn empty_levels_do_not_block_the_climb() {
        let outcomes = [(Level::A1, true), (Level::B2, true)];
        let breakdown = GradingService::breakdown(&outcomes, &LevelMap::splat(60));
        assert_eq!(GradingService::evaluate_ladder(&breakdown), Level::B2);
    }

    #[test]
    fn first_failure_stops_the_climb() {
        let outcomes = [(Level::A1, true), (Level::A2, false), (Level::B1, true)];
        let breakdown = GradingService::breakdown(&outcomes, &LevelMap::splat(60));
        assert_eq!(GradingService::evaluate_ladder(&breakdown), Level::A1);
    }

    #[test]
    fn ladder_marks_achieved_rungs() {
        let ladder = GradingService::ladder(Level::B1);
        assert_eq!(ladder.len(), 6);
        assert!(ladder[2].achieved && ladder[2].current);
        assert!(ladder[0].achieved && !ladder[0].current);
        assert!(!ladder[3].achieved);
        assert_eq!(ladder[3].label, "Upper Intermediate");
    }
}
