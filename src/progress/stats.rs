use serde::Serialize;
use utoipa::ToSchema;

use super::UserProgress;

/// Items at or above this level count as mastered.
pub const MASTERED_THRESHOLD: i64 = 90;

#[derive(Debug, Clone, PartialEq, Serialize, ToSchema)]
pub struct MasteryStats {
    pub mastered_items_count: usize,
    /// Unrounded mean over all item records
    pub average_mastery: f64,
    /// Minutes
    pub total_study_time: i64,
    pub sessions_completed: i64,
    pub average_test_score: f64,
}

pub fn mastery_stats(progress: &UserProgress) -> MasteryStats {
    let records = &progress.item_progress;
    let mastered_items_count = records
        .iter()
        .filter(|r| r.mastery_level >= MASTERED_THRESHOLD)
        .count();
    let average_mastery = if records.is_empty() {
        0.0
    } else {
        records.iter().map(|r| r.mastery_level as f64).sum::<f64>() / records.len() as f64
    };
    MasteryStats {
        mastered_items_count,
        average_mastery,
        total_study_time: progress.stats.study_time_minutes,
        sessions_completed: progress.stats.completed_tests,
        average_test_score: progress.stats.average_test_score,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::progress::mastery::first_attempt;
    use time::OffsetDateTime;

    #[test]
    fn empty_progress() {
        let progress = UserProgress::empty(1, OffsetDateTime::now_utc());
        let stats = mastery_stats(&progress);
        assert_eq!(stats.mastered_items_count, 0);
        assert_eq!(stats.average_mastery, 0.0);
    }

    #[test]
    fn counts_and_means() {
        let now = OffsetDateTime::now_utc();
        let mut progress = UserProgress::empty(1, now);
        for (id, level) in [(1, 90), (2, 100), (3, 45)] {
            let mut record = first_attempt(id, true, now);
            record.mastery_level = level;
            progress.item_progress.push(record);
        }
        progress.stats.study_time_minutes = 75;
        progress.stats.completed_tests = 3;
        progress.stats.average_test_score = 62.5;

        let stats = mastery_stats(&progress);
        assert_eq!(stats.mastered_items_count, 2);
        assert!((stats.average_mastery - 235.0 / 3.0).abs() < 1e-9);
        assert_eq!(stats.total_study_time, 75);
        assert_eq!(stats.sessions_completed, 3);
        assert_eq!(stats.average_test_score, 62.5);
    }
}
