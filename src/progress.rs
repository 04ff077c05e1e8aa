//! Per-user learning progress.
//!
//! Every user owns one [`UserProgress`] aggregate holding one record per
//! studied item plus summary stats. It is created lazily on first access
//! and written back in a single statement. Writes for one user are
//! serialized in-process by [`ProgressTracker`] and guarded across
//! processes by a version check on the row.

pub mod mastery;
pub mod stats;

use std::sync::Arc;

use moka::future::Cache;
use serde::{Deserialize, Serialize};
use sqlx::{SqlitePool, types::Json};
use time::{OffsetDateTime, UtcOffset};
use tokio::sync::{Mutex, OwnedMutexGuard};
use tracing::{info, warn};
use utoipa::ToSchema;

use crate::error::{Error, Result};
use mastery::{MAX_MASTERY, apply_attempt, average_mastery, first_attempt, review_interval, update_streak};
use stats::{MasteryStats, mastery_stats};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct ItemProgress {
    pub item_id: i64,
    /// 0..=100
    pub mastery_level: i64,
    pub correct_attempts: i64,
    pub incorrect_attempts: i64,
    #[serde(with = "time::serde::rfc3339::option")]
    pub last_reviewed_at: Option<OffsetDateTime>,
    #[serde(with = "time::serde::rfc3339")]
    pub next_review_due: OffsetDateTime,
}

impl ItemProgress {
    /// Placeholder for an item the user has never answered.
    pub fn unseen(item_id: i64, now: OffsetDateTime) -> Self {
        Self {
            item_id,
            mastery_level: 0,
            correct_attempts: 0,
            incorrect_attempts: 0,
            last_reviewed_at: None,
            next_review_due: now,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct UserStats {
    pub total_items_studied: i64,
    pub total_correct_attempts: i64,
    pub total_incorrect_attempts: i64,
    pub average_mastery: i64,
    pub streak_days: i64,
    #[serde(with = "time::serde::rfc3339::option")]
    pub last_study_date: Option<OffsetDateTime>,
    pub study_time_minutes: i64,
    pub completed_tests: i64,
    pub average_test_score: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct UserProgress {
    pub user_id: i64,
    pub item_progress: Vec<ItemProgress>,
    pub stats: UserStats,
    pub achievements: Vec<String>,
    pub version: i64,
    #[serde(with = "time::serde::rfc3339")]
    pub last_updated: OffsetDateTime,
}

impl UserProgress {
    pub fn empty(user_id: i64, now: OffsetDateTime) -> Self {
        Self {
            user_id,
            item_progress: Vec::new(),
            stats: UserStats::default(),
            achievements: Vec::new(),
            version: 0,
            last_updated: now,
        }
    }

    pub fn item(&self, item_id: i64) -> Option<&ItemProgress> {
        self.item_progress.iter().find(|r| r.item_id == item_id)
    }

    fn item_mut(&mut self, item_id: i64) -> Option<&mut ItemProgress> {
        self.item_progress.iter_mut().find(|r| r.item_id == item_id)
    }

    /// Applies one answer and refreshes the derived stats.
    pub fn record_attempt(&mut self, item_id: i64, correct: bool, now: OffsetDateTime, offset: UtcOffset) {
        match self.item_mut(item_id) {
            Some(record) => apply_attempt(record, correct, now),
            None => self.item_progress.push(first_attempt(item_id, correct, now)),
        }
        if correct {
            self.stats.total_correct_attempts += 1;
        } else {
            self.stats.total_incorrect_attempts += 1;
        }
        update_streak(&mut self.stats, now, offset);
        self.refresh(now);
    }

    /// Overrides an item's mastery as if it had just been answered
    /// correctly at that level.
    pub fn set_mastery(&mut self, item_id: i64, mastery: i64, now: OffsetDateTime) -> ItemProgress {
        let index = match self.item_progress.iter().position(|r| r.item_id == item_id) {
            Some(index) => {
                self.item_progress[index].correct_attempts += 1;
                index
            }
            None => {
                self.item_progress.push(ItemProgress {
                    correct_attempts: 1,
                    ..ItemProgress::unseen(item_id, now)
                });
                self.item_progress.len() - 1
            }
        };
        let record = &mut self.item_progress[index];
        record.mastery_level = mastery;
        record.last_reviewed_at = Some(now);
        record.next_review_due = now + review_interval(mastery, true);
        let record = record.clone();
        self.refresh(now);
        record
    }

    fn refresh(&mut self, now: OffsetDateTime) {
        self.stats.total_items_studied = self.item_progress.len() as i64;
        self.stats.average_mastery = average_mastery(&self.item_progress);
        self.last_updated = now;
    }

    /// Records whose review is due at `now`, soonest first.
    pub fn due_items(&self, now: OffsetDateTime) -> Vec<ItemProgress> {
        let mut due: Vec<ItemProgress> = self
            .item_progress
            .iter()
            .filter(|r| r.next_review_due <= now)
            .cloned()
            .collect();
        due.sort_by_key(|r| r.next_review_due);
        due
    }
}

#[derive(sqlx::FromRow)]
struct ProgressRow {
    user_id: i64,
    item_progress: Json<Vec<ItemProgress>>,
    stats: Json<UserStats>,
    achievements: Json<Vec<String>>,
    version: i64,
    last_updated: OffsetDateTime,
}

impl From<ProgressRow> for UserProgress {
    fn from(row: ProgressRow) -> Self {
        Self {
            user_id: row.user_id,
            item_progress: row.item_progress.0,
            stats: row.stats.0,
            achievements: row.achievements.0,
            version: row.version,
            last_updated: row.last_updated,
        }
    }
}

async fn load(database: &SqlitePool, user_id: i64) -> Result<Option<UserProgress>> {
    let row = sqlx::query_as::<_, ProgressRow>(
        "SELECT user_id, item_progress, stats, achievements, version, last_updated FROM user_progress WHERE user_id = ?",
    )
    .bind(user_id)
    .fetch_optional(database)
    .await?;
    Ok(row.map(UserProgress::from))
}

async fn load_or_create(database: &SqlitePool, user_id: i64) -> Result<UserProgress> {
    if let Some(progress) = load(database, user_id).await? {
        return Ok(progress);
    }
    let empty = UserProgress::empty(user_id, OffsetDateTime::now_utc());
    let inserted = sqlx::query(
        "INSERT OR IGNORE INTO user_progress (user_id, item_progress, stats, achievements, version, last_updated, created_at) VALUES (?, ?, ?, ?, 0, ?, ?)",
    )
    .bind(user_id)
    .bind(Json(&empty.item_progress))
    .bind(Json(&empty.stats))
    .bind(Json(&empty.achievements))
    .bind(empty.last_updated)
    .bind(empty.last_updated)
    .execute(database)
    .await?
    .rows_affected();
    if inserted > 0 {
        info!("created progress for user {}", user_id);
    }
    load(database, user_id)
        .await?
        .ok_or_else(|| Error::not_found("User progress"))
}

/// Writes the aggregate back if nobody else wrote since it was loaded.
async fn store(database: &SqlitePool, progress: &mut UserProgress) -> Result<()> {
    let updated = sqlx::query(
        "UPDATE user_progress SET item_progress = ?, stats = ?, achievements = ?, last_updated = ?, version = version + 1 WHERE user_id = ? AND version = ?",
    )
    .bind(Json(&progress.item_progress))
    .bind(Json(&progress.stats))
    .bind(Json(&progress.achievements))
    .bind(progress.last_updated)
    .bind(progress.user_id)
    .bind(progress.version)
    .execute(database)
    .await?
    .rows_affected();
    if updated == 0 {
        let exists: bool =
            sqlx::query_scalar("SELECT EXISTS(SELECT 1 FROM user_progress WHERE user_id = ?)")
                .bind(progress.user_id)
                .fetch_one(database)
                .await?;
        if !exists {
            return Err(Error::not_found("User progress"));
        }
        warn!(
            "progress of user {} changed concurrently, version {} is stale",
            progress.user_id, progress.version
        );
        return Err(Error::Conflict(
            "progress was modified concurrently, retry the request".to_string(),
        ));
    }
    progress.version += 1;
    Ok(())
}

/// Entry point for every progress read and write.
pub struct ProgressTracker {
    database: SqlitePool,
    locks: Cache<i64, Arc<Mutex<()>>>,
    offset: UtcOffset,
}

impl ProgressTracker {
    pub fn new(database: SqlitePool, offset: UtcOffset) -> Self {
        Self {
            database,
            locks: Cache::builder()
                .max_capacity(10_000)
                .time_to_idle(std::time::Duration::from_secs(600))
                .build(),
            offset,
        }
    }

    async fn lock(&self, user_id: i64) -> OwnedMutexGuard<()> {
        let lock = self
            .locks
            .get_with(user_id, async { Arc::new(Mutex::new(())) })
            .await;
        lock.lock_owned().await
    }

    /// Load, modify and store one user's aggregate while holding that
    /// user's lock.
    async fn modify<T>(
        &self,
        user_id: i64,
        f: impl FnOnce(&mut UserProgress, OffsetDateTime) -> Result<T>,
    ) -> Result<(UserProgress, T)> {
        let _guard = self.lock(user_id).await;
        let mut progress = load_or_create(&self.database, user_id).await?;
        let out = f(&mut progress, OffsetDateTime::now_utc())?;
        store(&self.database, &mut progress).await?;
        Ok((progress, out))
    }

    /// The caller checks that the item exists.
    pub async fn record_attempt(&self, user_id: i64, item_id: i64, correct: bool) -> Result<UserProgress> {
        let offset = self.offset;
        let (progress, ()) = self
            .modify(user_id, |progress, now| {
                progress.record_attempt(item_id, correct, now, offset);
                Ok(())
            })
            .await?;
        info!(
            "user {} answered item {} {}",
            user_id,
            item_id,
            if correct { "correctly" } else { "incorrectly" }
        );
        Ok(progress)
    }

    pub async fn get_user_progress(&self, user_id: i64) -> Result<UserProgress> {
        load_or_create(&self.database, user_id).await
    }

    pub async fn get_item_progress(&self, user_id: i64, item_id: i64) -> Result<ItemProgress> {
        let now = OffsetDateTime::now_utc();
        let progress = load(&self.database, user_id).await?;
        Ok(progress
            .and_then(|p| p.item(item_id).cloned())
            .unwrap_or_else(|| ItemProgress::unseen(item_id, now)))
    }

    pub async fn get_user_stats(&self, user_id: i64) -> Result<UserStats> {
        Ok(load(&self.database, user_id)
            .await?
            .map(|p| p.stats)
            .unwrap_or_default())
    }

    pub async fn mastery_stats(&self, user_id: i64) -> Result<MasteryStats> {
        let progress = match load(&self.database, user_id).await? {
            Some(progress) => progress,
            None => UserProgress::empty(user_id, OffsetDateTime::now_utc()),
        };
        Ok(mastery_stats(&progress))
    }

    pub async fn set_item_mastery(&self, user_id: i64, item_id: i64, mastery: i64) -> Result<ItemProgress> {
        if !(0..=MAX_MASTERY).contains(&mastery) {
            return Err(Error::invalid(
                "mastery_level",
                format!("must be between 0 and {MAX_MASTERY}"),
            ));
        }
        let (_, record) = self
            .modify(user_id, |progress, now| {
                Ok(progress.set_mastery(item_id, mastery, now))
            })
            .await?;
        info!("user {} set mastery of item {} to {}", user_id, item_id, mastery);
        Ok(record)
    }

    /// Adds study minutes and counts one more completed session.
    pub async fn log_study_time(&self, user_id: i64, minutes: i64) -> Result<UserStats> {
        if minutes <= 0 {
            return Err(Error::invalid("minutes", "must be positive"));
        }
        let (progress, ()) = self
            .modify(user_id, |progress, now| {
                progress.stats.study_time_minutes += minutes;
                progress.stats.completed_tests += 1;
                progress.last_updated = now;
                Ok(())
            })
            .await?;
        Ok(progress.stats)
    }

    pub async fn record_test_score(&self, user_id: i64, average: f64) -> Result<UserStats> {
        let (progress, ()) = self
            .modify(user_id, |progress, now| {
                progress.stats.average_test_score = average;
                progress.last_updated = now;
                Ok(())
            })
            .await?;
        Ok(progress.stats)
    }

    pub async fn reset(&self, user_id: i64) -> Result<UserProgress> {
        let (progress, ()) = self
            .modify(user_id, |progress, now| {
                let version = progress.version;
                *progress = UserProgress {
                    version,
                    ..UserProgress::empty(user_id, now)
                };
                Ok(())
            })
            .await?;
        info!("progress of user {} reset", user_id);
        Ok(progress)
    }

    pub async fn due_items(&self, user_id: i64, now: OffsetDateTime) -> Result<Vec<ItemProgress>> {
        Ok(load(&self.database, user_id)
            .await?
            .map(|p| p.due_items(now))
            .unwrap_or_default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::testing::{memory_pool, seed_user};
    use time::Duration;

    async fn tracker() -> (ProgressTracker, i64) {
        let database = memory_pool().await;
        let user = seed_user(&database, "alice").await;
        (ProgressTracker::new(database, UtcOffset::UTC), user)
    }

    #[tokio::test]
    async fn lazy_creation() {
        let (tracker, user) = tracker().await;
        assert_eq!(tracker.get_user_stats(user).await.unwrap(), UserStats::default());
        let progress = tracker.get_user_progress(user).await.unwrap();
        assert!(progress.item_progress.is_empty());
        assert_eq!(progress.version, 0);
        let unseen = tracker.get_item_progress(user, 5).await.unwrap();
        assert_eq!(unseen.mastery_level, 0);
        assert!(unseen.last_reviewed_at.is_none());
    }

    #[tokio::test]
    async fn attempts_update_records_and_stats() {
        let (tracker, user) = tracker().await;
        tracker.record_attempt(user, 1, true).await.unwrap();
        tracker.record_attempt(user, 1, true).await.unwrap();
        let progress = tracker.record_attempt(user, 2, false).await.unwrap();

        assert_eq!(progress.version, 3);
        assert_eq!(progress.item(1).unwrap().mastery_level, 30);
        assert_eq!(progress.item(2).unwrap().mastery_level, 0);
        let stats = &progress.stats;
        assert_eq!(stats.total_items_studied, 2);
        assert_eq!(stats.total_correct_attempts, 2);
        assert_eq!(stats.total_incorrect_attempts, 1);
        assert_eq!(stats.average_mastery, 15);
        assert_eq!(stats.streak_days, 1);
        assert!(stats.last_study_date.is_some());

        let stored = tracker.get_item_progress(user, 1).await.unwrap();
        assert_eq!(stored, *progress.item(1).unwrap());
    }

    #[tokio::test]
    async fn concurrent_attempts_are_serialized() {
        let (tracker, user) = tracker().await;
        let tracker = Arc::new(tracker);
        let mut handles = Vec::new();
        for _ in 0..8 {
            let tracker = tracker.clone();
            handles.push(tokio::spawn(async move {
                tracker.record_attempt(user, 1, true).await
            }));
        }
        for handle in handles {
            handle.await.unwrap().unwrap();
        }
        let progress = tracker.get_user_progress(user).await.unwrap();
        assert_eq!(progress.item(1).unwrap().correct_attempts, 8);
        assert_eq!(progress.stats.total_correct_attempts, 8);
        assert_eq!(progress.version, 8);
    }

    #[tokio::test]
    async fn stale_version_conflicts() {
        let (tracker, user) = tracker().await;
        let mut stale = tracker.get_user_progress(user).await.unwrap();
        tracker.record_attempt(user, 1, true).await.unwrap();
        stale.record_attempt(2, true, OffsetDateTime::now_utc(), UtcOffset::UTC);
        assert!(matches!(
            store(&tracker.database, &mut stale).await,
            Err(Error::Conflict(_))
        ));

        let mut ghost = UserProgress::empty(user + 100, OffsetDateTime::now_utc());
        assert!(matches!(
            store(&tracker.database, &mut ghost).await,
            Err(Error::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn mastery_override_and_due_items() {
        let (tracker, user) = tracker().await;
        assert!(matches!(
            tracker.set_item_mastery(user, 1, 101).await,
            Err(Error::Validation(_))
        ));
        tracker.record_attempt(user, 1, false).await.unwrap();
        let record = tracker.set_item_mastery(user, 1, 80).await.unwrap();
        assert_eq!(record.mastery_level, 80);
        assert_eq!(record.correct_attempts, 1);
        assert_eq!(record.incorrect_attempts, 1);
        let fresh = tracker.set_item_mastery(user, 2, 40).await.unwrap();
        assert_eq!(fresh.correct_attempts, 1);
        assert_eq!(tracker.get_user_stats(user).await.unwrap().average_mastery, 60);

        let now = OffsetDateTime::now_utc();
        assert!(tracker.due_items(user, now).await.unwrap().is_empty());
        let due = tracker.due_items(user, now + Duration::days(30)).await.unwrap();
        let ids: Vec<i64> = due.iter().map(|r| r.item_id).collect();
        // item 2 has lower mastery so it comes due first
        assert_eq!(ids, vec![2, 1]);
    }

    #[tokio::test]
    async fn study_time_scores_and_reset() {
        let (tracker, user) = tracker().await;
        assert!(matches!(
            tracker.log_study_time(user, 0).await,
            Err(Error::Validation(_))
        ));
        tracker.log_study_time(user, 25).await.unwrap();
        let stats = tracker.log_study_time(user, 5).await.unwrap();
        assert_eq!(stats.study_time_minutes, 30);
        assert_eq!(stats.completed_tests, 2);
        tracker.record_test_score(user, 75.0).await.unwrap();
        tracker.record_attempt(user, 3, true).await.unwrap();

        let summary = tracker.mastery_stats(user).await.unwrap();
        assert_eq!(summary.total_study_time, 30);
        assert_eq!(summary.sessions_completed, 2);
        assert_eq!(summary.average_test_score, 75.0);
        assert_eq!(summary.average_mastery, 20.0);

        let reset = tracker.reset(user).await.unwrap();
        assert!(reset.item_progress.is_empty());
        assert_eq!(reset.stats, UserStats::default());
        assert_eq!(tracker.get_user_stats(user).await.unwrap(), UserStats::default());
    }
}
