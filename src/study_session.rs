//! Study sessions move `active <-> paused -> completed`. A completed
//! session is final.

use std::fmt;

use serde::{Deserialize, Serialize};
use sqlx::{SqlitePool, types::Json};
use time::OffsetDateTime;
use tracing::{info, warn};
use utoipa::ToSchema;

use crate::{
    error::{Error, Result, ensure_owner},
    validation::{Validate, ValidationErrors, Validator},
    vocab_list,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema, sqlx::Type)]
#[serde(rename_all = "lowercase")]
#[sqlx(rename_all = "lowercase")]
pub enum SessionStatus {
    Active,
    Paused,
    Completed,
}

impl fmt::Display for SessionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            SessionStatus::Active => "active",
            SessionStatus::Paused => "paused",
            SessionStatus::Completed => "completed",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct SessionSettings {
    #[serde(default = "default_true")]
    pub use_spaced_repetition: bool,
    #[serde(default)]
    pub focus_on_difficult: bool,
    #[serde(default = "default_true")]
    pub study_both_languages: bool,
}

fn default_true() -> bool {
    true
}

impl Default for SessionSettings {
    fn default() -> Self {
        Self {
            use_spaced_repetition: true,
            focus_on_difficult: false,
            study_both_languages: true,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct StudySession {
    pub id: i64,
    pub user_id: i64,
    pub title: String,
    pub vocab_list_ids: Vec<i64>,
    pub status: SessionStatus,
    pub settings: SessionSettings,
    #[serde(with = "time::serde::rfc3339")]
    pub start_time: OffsetDateTime,
    #[serde(with = "time::serde::rfc3339::option")]
    pub completed_at: Option<OffsetDateTime>,
    /// Minutes, fixed once the session completes
    pub duration: Option<i64>,
    pub items_studied: i64,
    pub correct_answers: i64,
    /// Percentage
    pub accuracy: f64,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
    #[serde(with = "time::serde::rfc3339")]
    pub updated_at: OffsetDateTime,
}

/// Figures reported when a session ends.
#[derive(Debug, Clone, Copy, Default, PartialEq, Deserialize, ToSchema)]
pub struct SessionOutcome {
    /// Minutes; derived from the start time when omitted
    pub duration: Option<i64>,
    #[serde(default)]
    pub items_studied: i64,
    #[serde(default)]
    pub correct_answers: i64,
}

impl Validate for SessionOutcome {
    type Valid = SessionOutcome;

    fn validate(self) -> std::result::Result<SessionOutcome, ValidationErrors> {
        let mut v = Validator::new();
        if let Some(duration) = self.duration {
            v.check(duration >= 0, "duration", "must not be negative");
        }
        v.check(self.items_studied >= 0, "items_studied", "must not be negative");
        v.check(self.correct_answers >= 0, "correct_answers", "must not be negative");
        v.check(
            self.correct_answers <= self.items_studied,
            "correct_answers",
            "cannot exceed items_studied",
        );
        v.finish(self)
    }
}

impl StudySession {
    fn invalid_transition(&self, action: &str) -> Error {
        warn!("session {} cannot {} while {}", self.id, action, self.status);
        Error::InvalidState(format!(
            "Study session is {}, cannot {}",
            self.status, action
        ))
    }

    /// Ends the session. Leaves `self` untouched on error.
    pub fn complete(&mut self, outcome: SessionOutcome, now: OffsetDateTime) -> Result<()> {
        if self.status == SessionStatus::Completed {
            warn!("session {} is already completed", self.id);
            return Err(Error::InvalidState(
                "Study session is already completed".to_string(),
            ));
        }
        let duration = self
            .duration
            .or(outcome.duration)
            .unwrap_or_else(|| elapsed_minutes(self.start_time, now));
        self.status = SessionStatus::Completed;
        self.completed_at = Some(now);
        self.duration = Some(duration);
        self.items_studied = outcome.items_studied;
        self.correct_answers = outcome.correct_answers;
        self.accuracy = accuracy(outcome.correct_answers, outcome.items_studied);
        self.updated_at = now;
        Ok(())
    }

    pub fn pause(&mut self, now: OffsetDateTime) -> Result<()> {
        if self.status != SessionStatus::Active {
            return Err(self.invalid_transition("pause"));
        }
        self.status = SessionStatus::Paused;
        self.updated_at = now;
        Ok(())
    }

    pub fn resume(&mut self, now: OffsetDateTime) -> Result<()> {
        if self.status != SessionStatus::Paused {
            return Err(self.invalid_transition("resume"));
        }
        self.status = SessionStatus::Active;
        self.updated_at = now;
        Ok(())
    }
}

pub fn accuracy(correct: i64, items: i64) -> f64 {
    if items == 0 {
        0.0
    } else {
        correct as f64 / items as f64 * 100.0
    }
}

/// Whole minutes between two instants, rounded to nearest.
fn elapsed_minutes(start: OffsetDateTime, end: OffsetDateTime) -> i64 {
    let seconds = (end - start).whole_seconds().max(0);
    (seconds + 30) / 60
}

#[derive(sqlx::FromRow)]
struct StudySessionRow {
    id: i64,
    user_id: i64,
    title: String,
    vocab_list_ids: Json<Vec<i64>>,
    status: SessionStatus,
    settings: Json<SessionSettings>,
    start_time: OffsetDateTime,
    completed_at: Option<OffsetDateTime>,
    duration: Option<i64>,
    items_studied: i64,
    correct_answers: i64,
    accuracy: f64,
    created_at: OffsetDateTime,
    updated_at: OffsetDateTime,
}

impl From<StudySessionRow> for StudySession {
    fn from(row: StudySessionRow) -> Self {
        Self {
            id: row.id,
            user_id: row.user_id,
            title: row.title,
            vocab_list_ids: row.vocab_list_ids.0,
            status: row.status,
            settings: row.settings.0,
            start_time: row.start_time,
            completed_at: row.completed_at,
            duration: row.duration,
            items_studied: row.items_studied,
            correct_answers: row.correct_answers,
            accuracy: row.accuracy,
            created_at: row.created_at,
            updated_at: row.updated_at,
        }
    }
}

#[derive(Debug, Clone, Deserialize, ToSchema)]
pub struct StartSessionRequest {
    pub title: Option<String>,
    #[serde(default)]
    pub vocab_list_ids: Vec<i64>,
    pub settings: Option<SessionSettings>,
}

#[derive(Debug, Clone)]
pub struct NewSession {
    pub title: String,
    pub vocab_list_ids: Vec<i64>,
    pub settings: SessionSettings,
}

impl Validate for StartSessionRequest {
    type Valid = NewSession;

    fn validate(self) -> std::result::Result<NewSession, ValidationErrors> {
        let mut v = Validator::new();
        let title = match self.title {
            Some(title) => v.length("title", title, 1, 100),
            None => "Study session".to_string(),
        };
        v.check(
            !self.vocab_list_ids.is_empty(),
            "vocab_list_ids",
            "must contain at least one vocabulary list",
        );
        let mut vocab_list_ids = self.vocab_list_ids;
        let mut seen = Vec::with_capacity(vocab_list_ids.len());
        vocab_list_ids.retain(|id| {
            let fresh = !seen.contains(id);
            seen.push(*id);
            fresh
        });
        v.finish(NewSession {
            title,
            vocab_list_ids,
            settings: self.settings.unwrap_or_default(),
        })
    }
}

const SELECT_SESSION: &str = "SELECT id, user_id, title, vocab_list_ids, status, settings, start_time, completed_at, duration, items_studied, correct_answers, accuracy, created_at, updated_at FROM study_session";

pub async fn start_session(database: &SqlitePool, user_id: i64, new: NewSession) -> Result<StudySession> {
    for &list_id in &new.vocab_list_ids {
        if !vocab_list::list_exists(database, list_id).await? {
            return Err(Error::not_found(format!("Vocabulary list {list_id}")));
        }
    }
    let now = OffsetDateTime::now_utc();
    let id = sqlx::query(
        "INSERT INTO study_session (user_id, title, vocab_list_ids, status, settings, start_time, items_studied, correct_answers, accuracy, created_at, updated_at) VALUES (?, ?, ?, ?, ?, ?, 0, 0, 0, ?, ?)",
    )
    .bind(user_id)
    .bind(&new.title)
    .bind(Json(&new.vocab_list_ids))
    .bind(SessionStatus::Active)
    .bind(Json(&new.settings))
    .bind(now)
    .bind(now)
    .bind(now)
    .execute(database)
    .await?
    .last_insert_rowid();
    info!("user {} started study session {}", user_id, id);
    fetch(database, id).await
}

async fn fetch(database: &SqlitePool, id: i64) -> Result<StudySession> {
    sqlx::query_as::<_, StudySessionRow>(&format!("{SELECT_SESSION} WHERE id = ?"))
        .bind(id)
        .fetch_optional(database)
        .await?
        .map(StudySession::from)
        .ok_or_else(|| Error::not_found("Study session"))
}

pub async fn get_session(database: &SqlitePool, id: i64, caller_id: i64) -> Result<StudySession> {
    let session = fetch(database, id).await?;
    ensure_owner(session.user_id, caller_id, "view this session")?;
    Ok(session)
}

/// Newest first.
pub async fn sessions_by_user(database: &SqlitePool, user_id: i64) -> Result<Vec<StudySession>> {
    let rows = sqlx::query_as::<_, StudySessionRow>(&format!(
        "{SELECT_SESSION} WHERE user_id = ? ORDER BY start_time DESC, id DESC"
    ))
    .bind(user_id)
    .fetch_all(database)
    .await?;
    Ok(rows.into_iter().map(StudySession::from).collect())
}

/// The caller's sessions that include the given list, newest first.
pub async fn sessions_by_list(database: &SqlitePool, user_id: i64, list_id: i64) -> Result<Vec<StudySession>> {
    let rows = sqlx::query_as::<_, StudySessionRow>(&format!(
        "{SELECT_SESSION} WHERE user_id = ? AND EXISTS (SELECT 1 FROM json_each(study_session.vocab_list_ids) WHERE json_each.value = ?) ORDER BY start_time DESC, id DESC"
    ))
    .bind(user_id)
    .bind(list_id)
    .fetch_all(database)
    .await?;
    Ok(rows.into_iter().map(StudySession::from).collect())
}

/// Writes the session back only if its stored status is still `expected`.
async fn save(database: &SqlitePool, session: &StudySession, expected: SessionStatus) -> Result<bool> {
    let updated = sqlx::query(
        "UPDATE study_session SET status = ?, completed_at = ?, duration = ?, items_studied = ?, correct_answers = ?, accuracy = ?, updated_at = ? WHERE id = ? AND status = ?",
    )
    .bind(session.status)
    .bind(session.completed_at)
    .bind(session.duration)
    .bind(session.items_studied)
    .bind(session.correct_answers)
    .bind(session.accuracy)
    .bind(session.updated_at)
    .bind(session.id)
    .bind(expected)
    .execute(database)
    .await?
    .rows_affected();
    Ok(updated == 1)
}

/// Loads a session owned by the caller, applies `f` and saves it.
async fn transition(
    database: &SqlitePool,
    id: i64,
    caller_id: i64,
    action: &str,
    f: impl FnOnce(&mut StudySession, OffsetDateTime) -> Result<()>,
) -> Result<StudySession> {
    let mut session = fetch(database, id).await?;
    ensure_owner(session.user_id, caller_id, &format!("{action} this session"))?;
    let expected = session.status;
    f(&mut session, OffsetDateTime::now_utc())?;
    if !save(database, &session, expected).await? {
        warn!("study session {} changed state during {}", id, action);
        return Err(Error::InvalidState(format!(
            "Study session is no longer {expected}"
        )));
    }
    info!("study session {} is now {}", id, session.status);
    Ok(session)
}

pub async fn complete_session(
    database: &SqlitePool,
    id: i64,
    caller_id: i64,
    outcome: SessionOutcome,
) -> Result<StudySession> {
    transition(database, id, caller_id, "complete", |s, now| s.complete(outcome, now)).await
}

pub async fn pause_session(database: &SqlitePool, id: i64, caller_id: i64) -> Result<StudySession> {
    transition(database, id, caller_id, "pause", |s, now| s.pause(now)).await
}

pub async fn resume_session(database: &SqlitePool, id: i64, caller_id: i64) -> Result<StudySession> {
    transition(database, id, caller_id, "resume", |s, now| s.resume(now)).await
}

pub async fn delete_session(database: &SqlitePool, id: i64, caller_id: i64) -> Result<()> {
    let session = fetch(database, id).await?;
    ensure_owner(session.user_id, caller_id, "delete this session")?;
    sqlx::query("DELETE FROM study_session WHERE id = ?")
        .bind(id)
        .execute(database)
        .await?;
    info!("user {} deleted study session {}", caller_id, id);
    Ok(())
}
