use serde::{Deserialize, Serialize};
use sqlx::SqlitePool;
use time::OffsetDateTime;
use tracing::info;
use utoipa::ToSchema;

use crate::{
    auth,
    error::{Error, Result},
    validation::{Validate, ValidationErrors, Validator},
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, ToSchema, sqlx::Type)]
#[serde(rename_all = "lowercase")]
#[sqlx(rename_all = "lowercase")]
pub enum NativeLanguage {
    #[default]
    En,
    Zh,
}

impl NativeLanguage {
    fn parse(v: &mut Validator, path: &str, value: &str) -> Self {
        match value.trim().to_lowercase().as_str() {
            "en" => NativeLanguage::En,
            "zh" => NativeLanguage::Zh,
            _ => {
                v.error(path, "must be one of: en, zh");
                NativeLanguage::En
            }
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct Preferences {
    #[serde(default)]
    pub dark_mode: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct UserInfo {
    pub id: i64,
    pub username: String,
    pub email: String,
    pub native_language: NativeLanguage,
    pub preferences: Preferences,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
}

#[derive(sqlx::FromRow)]
struct UserRow {
    id: i64,
    username: String,
    email: String,
    password: String,
    native_language: NativeLanguage,
    dark_mode: bool,
    created_at: OffsetDateTime,
}

impl From<UserRow> for UserInfo {
    fn from(row: UserRow) -> Self {
        Self {
            id: row.id,
            username: row.username,
            email: row.email,
            native_language: row.native_language,
            preferences: Preferences {
                dark_mode: row.dark_mode,
            },
            created_at: row.created_at,
        }
    }
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct RegisterRequest {
    pub username: String,
    pub email: String,
    pub password: String,
    pub native_language: Option<String>,
    pub preferences: Option<Preferences>,
}

#[derive(Debug)]
pub struct NewUser {
    pub username: String,
    pub email: String,
    pub password: String,
    pub native_language: NativeLanguage,
    pub preferences: Preferences,
}

impl Validate for RegisterRequest {
    type Valid = NewUser;

    fn validate(self) -> std::result::Result<NewUser, ValidationErrors> {
        let mut v = Validator::new();
        let username = v.length("username", self.username, 3, 30);
        let email = v.email("email", self.email);
        v.check(
            self.password.chars().count() >= 8,
            "password",
            "must be at least 8 characters long",
        );
        let native_language = match self.native_language {
            Some(lang) => NativeLanguage::parse(&mut v, "native_language", &lang),
            None => NativeLanguage::default(),
        };
        v.finish(NewUser {
            username,
            email,
            password: self.password,
            native_language,
            preferences: self.preferences.unwrap_or_default(),
        })
    }
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct LoginRequest {
    pub email: String,
    pub password: String,
}

impl Validate for LoginRequest {
    type Valid = LoginRequest;

    fn validate(self) -> std::result::Result<LoginRequest, ValidationErrors> {
        let mut v = Validator::new();
        let email = v.email("email", self.email);
        v.check(!self.password.is_empty(), "password", "must not be empty");
        v.finish(LoginRequest {
            email,
            password: self.password,
        })
    }
}

#[derive(Debug, Default, Deserialize, ToSchema)]
pub struct UpdateUserRequest {
    pub username: Option<String>,
    pub email: Option<String>,
    pub native_language: Option<String>,
    pub preferences: Option<Preferences>,
}

#[derive(Debug, Default)]
pub struct UserUpdate {
    pub username: Option<String>,
    pub email: Option<String>,
    pub native_language: Option<NativeLanguage>,
    pub preferences: Option<Preferences>,
}

impl Validate for UpdateUserRequest {
    type Valid = UserUpdate;

    fn validate(self) -> std::result::Result<UserUpdate, ValidationErrors> {
        let mut v = Validator::new();
        v.check(
            self.username.is_some()
                || self.email.is_some()
                || self.native_language.is_some()
                || self.preferences.is_some(),
            "input",
            "at least one field must be provided",
        );
        let update = UserUpdate {
            username: self.username.map(|u| v.length("username", u, 3, 30)),
            email: self.email.map(|e| v.email("email", e)),
            native_language: self
                .native_language
                .map(|l| NativeLanguage::parse(&mut v, "native_language", &l)),
            preferences: self.preferences,
        };
        v.finish(update)
    }
}

const SELECT_USER: &str = "SELECT id, username, email, password, native_language, dark_mode, created_at FROM user";

async fn ensure_unique(
    database: &SqlitePool,
    username: Option<&str>,
    email: Option<&str>,
    except: Option<i64>,
) -> Result<()> {
    let taken: i64 = sqlx::query_scalar(
        "SELECT COUNT(*) FROM user WHERE (username = ? OR email = ?) AND id != ?",
    )
    .bind(username)
    .bind(email)
    .bind(except.unwrap_or(-1))
    .fetch_one(database)
    .await?;
    if taken > 0 {
        return Err(Error::Conflict(
            "User already exists with that email or username".to_string(),
        ));
    }
    Ok(())
}

pub async fn create_user(database: &SqlitePool, new: NewUser) -> Result<UserInfo> {
    ensure_unique(database, Some(&new.username), Some(&new.email), None).await?;
    let password_hash = auth::hash_password(&new.password)?;
    let now = OffsetDateTime::now_utc();
    let id = sqlx::query(
        "INSERT INTO user (username, email, password, native_language, dark_mode, created_at, updated_at) VALUES (?, ?, ?, ?, ?, ?, ?)",
    )
    .bind(&new.username)
    .bind(&new.email)
    .bind(password_hash)
    .bind(new.native_language)
    .bind(new.preferences.dark_mode)
    .bind(now)
    .bind(now)
    .execute(database)
    .await?
    .last_insert_rowid();
    info!("registered user {}-{}", id, new.username);
    get_user(database, id).await
}

/// Checks credentials. Unknown email and wrong password look the same.
pub async fn authenticate(database: &SqlitePool, email: &str, password: &str) -> Result<UserInfo> {
    let row = sqlx::query_as::<_, UserRow>(&format!("{SELECT_USER} WHERE email = ?"))
        .bind(email)
        .fetch_optional(database)
        .await?;
    match row {
        Some(row) if auth::verify_password(password, &row.password) => Ok(row.into()),
        _ => Err(Error::Unauthenticated),
    }
}

pub async fn get_user(database: &SqlitePool, id: i64) -> Result<UserInfo> {
    sqlx::query_as::<_, UserRow>(&format!("{SELECT_USER} WHERE id = ?"))
        .bind(id)
        .fetch_optional(database)
        .await?
        .map(UserInfo::from)
        .ok_or_else(|| Error::not_found("User"))
}

pub async fn update_user(database: &SqlitePool, id: i64, update: UserUpdate) -> Result<UserInfo> {
    let mut user = get_user(database, id).await?;
    if update.username.is_some() || update.email.is_some() {
        ensure_unique(
            database,
            update.username.as_deref(),
            update.email.as_deref(),
            Some(id),
        )
        .await?;
    }
    if let Some(username) = update.username {
        user.username = username;
    }
    if let Some(email) = update.email {
        user.email = email;
    }
    if let Some(lang) = update.native_language {
        user.native_language = lang;
    }
    if let Some(preferences) = update.preferences {
        user.preferences = preferences;
    }
    sqlx::query(
        "UPDATE user SET username = ?, email = ?, native_language = ?, dark_mode = ?, updated_at = ? WHERE id = ?",
    )
    .bind(&user.username)
    .bind(&user.email)
    .bind(user.native_language)
    .bind(user.preferences.dark_mode)
    .bind(OffsetDateTime::now_utc())
    .bind(id)
    .execute(database)
    .await?;
    Ok(user)
}
