use std::fmt;

use serde::{Deserialize, Serialize};
use sqlx::{SqlitePool, types::Json};
use time::OffsetDateTime;
use tracing::{debug, info};
use utoipa::ToSchema;

use crate::{
    error::{Error, Result, ensure_owner},
    validation::{Validate, ValidationErrors, Validator},
    vocab_item::{self, VocabItem},
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, ToSchema, sqlx::Type)]
#[serde(rename_all = "lowercase")]
#[sqlx(rename_all = "lowercase")]
pub enum Level {
    #[default]
    Beginner,
    Intermediate,
    Advanced,
}

impl Level {
    /// Maps the many spellings found in imported lists onto a level.
    /// Anything unrecognised is treated as beginner.
    pub fn normalize(raw: &str) -> Level {
        match raw.trim().to_lowercase().as_str() {
            "beginner" | "b" | "beg" | "1" | "easy" | "basic" | "entry" => Level::Beginner,
            "intermediate" | "i" | "int" | "2" | "medium" | "mid" | "moderate" => {
                Level::Intermediate
            }
            "advanced" | "a" | "adv" | "3" | "hard" | "difficult" | "expert" => Level::Advanced,
            "" => Level::Beginner,
            other => {
                debug!("unknown level {:?}, using beginner", other);
                Level::Beginner
            }
        }
    }
}

impl fmt::Display for Level {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Level::Beginner => "beginner",
            Level::Intermediate => "intermediate",
            Level::Advanced => "advanced",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct VocabList {
    pub id: i64,
    pub title: String,
    pub description: String,
    pub level: Level,
    pub item_ids: Vec<i64>,
    pub creator_id: i64,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
    #[serde(with = "time::serde::rfc3339")]
    pub updated_at: OffsetDateTime,
}

#[derive(sqlx::FromRow)]
struct VocabListRow {
    id: i64,
    title: String,
    description: String,
    level: Level,
    item_ids: Json<Vec<i64>>,
    creator_id: i64,
    created_at: OffsetDateTime,
    updated_at: OffsetDateTime,
}

impl From<VocabListRow> for VocabList {
    fn from(row: VocabListRow) -> Self {
        Self {
            id: row.id,
            title: row.title,
            description: row.description,
            level: row.level,
            item_ids: row.item_ids.0,
            creator_id: row.creator_id,
            created_at: row.created_at,
            updated_at: row.updated_at,
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize, ToSchema)]
pub struct VocabListInput {
    pub title: Option<String>,
    pub description: Option<String>,
    /// Free-form level; normalized to beginner, intermediate or advanced
    pub level: Option<String>,
    pub items: Option<Vec<i64>>,
}

#[derive(Debug, Clone)]
pub struct NewVocabList {
    pub title: String,
    pub description: String,
    pub level: Level,
    pub item_ids: Vec<i64>,
}

#[derive(Debug, Clone, Default)]
pub struct VocabListPatch {
    pub title: Option<String>,
    pub description: Option<String>,
    pub level: Option<Level>,
    pub item_ids: Option<Vec<i64>>,
}

fn dedup_ids(ids: Vec<i64>) -> Vec<i64> {
    let mut out = Vec::with_capacity(ids.len());
    for id in ids {
        if !out.contains(&id) {
            out.push(id);
        }
    }
    out
}

impl Validate for VocabListInput {
    type Valid = NewVocabList;

    fn validate(self) -> std::result::Result<NewVocabList, ValidationErrors> {
        let mut v = Validator::new();
        let title = v.length("title", self.title.unwrap_or_default(), 1, 100);
        v.finish(NewVocabList {
            title,
            description: self.description.unwrap_or_default().trim().to_string(),
            level: self
                .level
                .as_deref()
                .map(Level::normalize)
                .unwrap_or_default(),
            item_ids: dedup_ids(self.items.unwrap_or_default()),
        })
    }
}

/// Partial form of [`VocabListInput`] used by updates.
#[derive(Debug, Clone, Default, Deserialize, ToSchema)]
#[serde(transparent)]
pub struct VocabListPatchInput(pub VocabListInput);

impl Validate for VocabListPatchInput {
    type Valid = VocabListPatch;

    fn validate(self) -> std::result::Result<VocabListPatch, ValidationErrors> {
        let input = self.0;
        let mut v = Validator::new();
        let patch = VocabListPatch {
            title: input.title.map(|t| v.length("title", t, 1, 100)),
            description: input.description.map(|d| d.trim().to_string()),
            level: input.level.as_deref().map(Level::normalize),
            item_ids: input.items.map(dedup_ids),
        };
        v.finish(patch)
    }
}

async fn ensure_items_exist(database: &SqlitePool, ids: &[i64]) -> Result<()> {
    if vocab_item::count_existing(database, ids).await? != ids.len() {
        return Err(Error::invalid(
            "items",
            "One or more vocabulary items do not exist",
        ));
    }
    Ok(())
}

const SELECT_LIST: &str =
    "SELECT id, title, description, level, item_ids, creator_id, created_at, updated_at FROM vocab_list";

pub async fn create_list(database: &SqlitePool, creator_id: i64, new: NewVocabList) -> Result<VocabList> {
    ensure_items_exist(database, &new.item_ids).await?;
    let now = OffsetDateTime::now_utc();
    let id = sqlx::query(
        "INSERT INTO vocab_list (title, description, level, item_ids, creator_id, created_at, updated_at) VALUES (?, ?, ?, ?, ?, ?, ?)",
    )
    .bind(&new.title)
    .bind(&new.description)
    .bind(new.level)
    .bind(Json(&new.item_ids))
    .bind(creator_id)
    .bind(now)
    .bind(now)
    .execute(database)
    .await?
    .last_insert_rowid();
    info!("user {} created vocab list {}-{} ({})", creator_id, id, new.title, new.level);
    get_list(database, id).await
}

pub async fn get_list(database: &SqlitePool, id: i64) -> Result<VocabList> {
    sqlx::query_as::<_, VocabListRow>(&format!("{SELECT_LIST} WHERE id = ?"))
        .bind(id)
        .fetch_optional(database)
        .await?
        .map(VocabList::from)
        .ok_or_else(|| Error::not_found("Vocabulary list"))
}

pub async fn list_exists(database: &SqlitePool, id: i64) -> Result<bool> {
    let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM vocab_list WHERE id = ?")
        .bind(id)
        .fetch_one(database)
        .await?;
    Ok(count > 0)
}

pub async fn list_lists(database: &SqlitePool) -> Result<Vec<VocabList>> {
    let rows = sqlx::query_as::<_, VocabListRow>(&format!("{SELECT_LIST} ORDER BY id"))
        .fetch_all(database)
        .await?;
    Ok(rows.into_iter().map(VocabList::from).collect())
}

pub async fn lists_by_creator(database: &SqlitePool, creator_id: i64) -> Result<Vec<VocabList>> {
    let rows = sqlx::query_as::<_, VocabListRow>(&format!(
        "{SELECT_LIST} WHERE creator_id = ? ORDER BY id"
    ))
    .bind(creator_id)
    .fetch_all(database)
    .await?;
    Ok(rows.into_iter().map(VocabList::from).collect())
}

/// The list's items in list order.
pub async fn list_items(database: &SqlitePool, id: i64) -> Result<Vec<VocabItem>> {
    let list = get_list(database, id).await?;
    vocab_item::items_by_ids(database, &list.item_ids).await
}

async fn save(database: &SqlitePool, list: &VocabList) -> Result<()> {
    sqlx::query(
        "UPDATE vocab_list SET title = ?, description = ?, level = ?, item_ids = ?, updated_at = ? WHERE id = ?",
    )
    .bind(&list.title)
    .bind(&list.description)
    .bind(list.level)
    .bind(Json(&list.item_ids))
    .bind(list.updated_at)
    .bind(list.id)
    .execute(database)
    .await?;
    Ok(())
}

pub async fn update_list(
    database: &SqlitePool,
    id: i64,
    caller_id: i64,
    patch: VocabListPatch,
) -> Result<VocabList> {
    let mut list = get_list(database, id).await?;
    ensure_owner(list.creator_id, caller_id, "update this vocabulary list")?;
    if let Some(item_ids) = patch.item_ids {
        ensure_items_exist(database, &item_ids).await?;
        list.item_ids = item_ids;
    }
    if let Some(title) = patch.title {
        list.title = title;
    }
    if let Some(description) = patch.description {
        list.description = description;
    }
    if let Some(level) = patch.level {
        list.level = level;
    }
    list.updated_at = OffsetDateTime::now_utc();
    save(database, &list).await?;
    Ok(list)
}

pub async fn delete_list(database: &SqlitePool, id: i64, caller_id: i64) -> Result<()> {
    let list = get_list(database, id).await?;
    ensure_owner(list.creator_id, caller_id, "delete this vocabulary list")?;
    sqlx::query("DELETE FROM vocab_list WHERE id = ?")
        .bind(id)
        .execute(database)
        .await?;
    info!("user {} deleted vocab list {}", caller_id, id);
    Ok(())
}

pub async fn add_item(database: &SqlitePool, list_id: i64, item_id: i64, caller_id: i64) -> Result<VocabList> {
    if !vocab_item::item_exists(database, item_id).await? {
        return Err(Error::not_found("Vocabulary item"));
    }
    let mut list = get_list(database, list_id).await?;
    ensure_owner(list.creator_id, caller_id, "modify this vocabulary list")?;
    if list.item_ids.contains(&item_id) {
        return Err(Error::invalid("item_id", "Item already exists in the list"));
    }
    list.item_ids.push(item_id);
    list.updated_at = OffsetDateTime::now_utc();
    save(database, &list).await?;
    Ok(list)
}

pub async fn remove_item(database: &SqlitePool, list_id: i64, item_id: i64, caller_id: i64) -> Result<VocabList> {
    let mut list = get_list(database, list_id).await?;
    ensure_owner(list.creator_id, caller_id, "modify this vocabulary list")?;
    let Some(pos) = list.item_ids.iter().position(|id| *id == item_id) else {
        return Err(Error::invalid("item_id", "Item does not exist in the list"));
    };
    list.item_ids.remove(pos);
    list.updated_at = OffsetDateTime::now_utc();
    save(database, &list).await?;
    Ok(list)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        db::testing::{memory_pool, seed_user},
        vocab_item::{create_item, tests::sample},
    };

    #[test]
    fn level_normalization() {
        let cases = [
            ("beginner", Level::Beginner),
            ("INTERMEDIATE", Level::Intermediate),
            ("Advanced", Level::Advanced),
            ("  beginner  ", Level::Beginner),
            ("b", Level::Beginner),
            ("int", Level::Intermediate),
            ("adv", Level::Advanced),
            ("1", Level::Beginner),
            ("2", Level::Intermediate),
            ("3", Level::Advanced),
            ("easy", Level::Beginner),
            ("entry", Level::Beginner),
            ("mid", Level::Intermediate),
            ("moderate", Level::Intermediate),
            ("hard", Level::Advanced),
            ("expert", Level::Advanced),
            ("", Level::Beginner),
            ("unknown_value", Level::Beginner),
            ("123", Level::Beginner),
        ];
        for (raw, expected) in cases {
            assert_eq!(Level::normalize(raw), expected, "{raw:?}");
        }
    }

    #[test]
    fn input_defaults() {
        let new = VocabListInput {
            title: Some(" Fruits ".into()),
            items: Some(vec![3, 1, 3]),
            ..Default::default()
        }
        .validate()
        .unwrap();
        assert_eq!(new.title, "Fruits");
        assert_eq!(new.level, Level::Beginner);
        assert_eq!(new.item_ids, vec![3, 1]);
        assert!(VocabListInput::default().validate().is_err());
    }

    #[tokio::test]
    async fn stored_level_defaults_to_beginner() {
        let database = memory_pool().await;
        let alice = seed_user(&database, "alice").await;
        let now = OffsetDateTime::now_utc();
        let id = sqlx::query(
            "INSERT INTO vocab_list (title, creator_id, created_at, updated_at) VALUES ('Imported', ?, ?, ?)",
        )
        .bind(alice)
        .bind(now)
        .bind(now)
        .execute(&database)
        .await
        .unwrap()
        .last_insert_rowid();
        assert_eq!(get_list(&database, id).await.unwrap().level, Level::Beginner);
    }

    #[tokio::test]
    async fn items_must_exist() {
        let database = memory_pool().await;
        let alice = seed_user(&database, "alice").await;
        let new = NewVocabList {
            title: "t".into(),
            description: String::new(),
            level: Level::Beginner,
            item_ids: vec![404],
        };
        assert!(matches!(
            create_list(&database, alice, new).await,
            Err(Error::Validation(_))
        ));
    }

    #[tokio::test]
    async fn add_and_remove_items() {
        let database = memory_pool().await;
        let alice = seed_user(&database, "alice").await;
        let bob = seed_user(&database, "bob").await;
        let cat = create_item(&database, alice, sample("cat", "animal", &[])).await.unwrap();
        let dog = create_item(&database, alice, sample("dog", "animal", &[])).await.unwrap();
        let list = create_list(
            &database,
            alice,
            NewVocabList {
                title: "Pets".into(),
                description: String::new(),
                level: Level::normalize("easy"),
                item_ids: vec![cat.id],
            },
        )
        .await
        .unwrap();

        let list = add_item(&database, list.id, dog.id, alice).await.unwrap();
        assert_eq!(list.item_ids, vec![cat.id, dog.id]);
        assert!(matches!(
            add_item(&database, list.id, dog.id, alice).await,
            Err(Error::Validation(_))
        ));
        assert!(matches!(
            add_item(&database, list.id, 999, alice).await,
            Err(Error::NotFound(_))
        ));
        assert!(matches!(
            add_item(&database, list.id, dog.id, bob).await,
            Err(Error::Forbidden(_))
        ));

        let items = list_items(&database, list.id).await.unwrap();
        assert_eq!(items.iter().map(|i| i.term.as_str()).collect::<Vec<_>>(), vec!["cat", "dog"]);

        let list = remove_item(&database, list.id, cat.id, alice).await.unwrap();
        assert_eq!(list.item_ids, vec![dog.id]);
        assert!(matches!(
            remove_item(&database, list.id, cat.id, alice).await,
            Err(Error::Validation(_))
        ));

        let patch = VocabListPatchInput(VocabListInput {
            level: Some("HARD".into()),
            ..Default::default()
        })
        .validate()
        .unwrap();
        let list = update_list(&database, list.id, alice, patch).await.unwrap();
        assert_eq!(list.level, Level::Advanced);
        assert_eq!(lists_by_creator(&database, alice).await.unwrap().len(), 1);
        assert!(lists_by_creator(&database, bob).await.unwrap().is_empty());
    }
}
