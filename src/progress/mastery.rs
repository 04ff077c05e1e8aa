//! Mastery and review scheduling rules.

use time::{Duration, OffsetDateTime, UtcOffset};

use super::{ItemProgress, UserStats};
use crate::utils::calendar_day;

pub const MAX_MASTERY: i64 = 100;
const FIRST_CORRECT_MASTERY: i64 = 20;
const CORRECT_STEP: i64 = 10;
const INCORRECT_STEP: i64 = 5;
/// Extra review delay per mastery point: one day for every 20 points.
const SECONDS_PER_MASTERY_POINT: i64 = 86_400 / 20;

/// Delay until the next review after an answer on an item that already
/// had a record.
pub fn review_interval(mastery: i64, correct: bool) -> Duration {
    if correct {
        Duration::days(1) + Duration::seconds(SECONDS_PER_MASTERY_POINT * mastery)
    } else {
        Duration::hours(12)
    }
}

pub fn first_attempt(item_id: i64, correct: bool, now: OffsetDateTime) -> ItemProgress {
    let (mastery_level, correct_attempts, incorrect_attempts, delay) = if correct {
        (FIRST_CORRECT_MASTERY, 1, 0, Duration::hours(24))
    } else {
        (0, 0, 1, Duration::hours(12))
    };
    ItemProgress {
        item_id,
        mastery_level,
        correct_attempts,
        incorrect_attempts,
        last_reviewed_at: Some(now),
        next_review_due: now + delay,
    }
}

pub fn apply_attempt(record: &mut ItemProgress, correct: bool, now: OffsetDateTime) {
    if correct {
        record.correct_attempts += 1;
        record.mastery_level = (record.mastery_level + CORRECT_STEP).min(MAX_MASTERY);
    } else {
        record.incorrect_attempts += 1;
        record.mastery_level = (record.mastery_level - INCORRECT_STEP).max(0);
    }
    record.last_reviewed_at = Some(now);
    record.next_review_due = now + review_interval(record.mastery_level, correct);
}

/// Mean mastery rounded half up. Zero when there are no records.
pub fn average_mastery(records: &[ItemProgress]) -> i64 {
    if records.is_empty() {
        return 0;
    }
    let n = records.len() as i64;
    let sum: i64 = records.iter().map(|r| r.mastery_level).sum();
    (sum * 2 + n) / (n * 2)
}

/// Advances the daily streak for a study event at `now`. Days are compared
/// in `offset`, not UTC.
pub fn update_streak(stats: &mut UserStats, now: OffsetDateTime, offset: UtcOffset) {
    let today = calendar_day(now, offset);
    stats.streak_days = match stats.last_study_date {
        Some(last) => match (today - calendar_day(last, offset)).whole_days() {
            0 => stats.streak_days,
            1 => stats.streak_days + 1,
            _ => 1,
        },
        None => 1,
    };
    stats.last_study_date = Some(now);
}
