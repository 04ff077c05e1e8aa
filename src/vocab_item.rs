use serde::{Deserialize, Serialize};
use sqlx::{QueryBuilder, Sqlite, SqlitePool, types::Json};
use time::OffsetDateTime;
use tracing::info;
use utoipa::ToSchema;

use crate::{
    error::{Error, Result, ensure_owner},
    validation::{self, Validate, ValidationErrors, Validator},
};

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct VocabItem {
    pub id: i64,
    pub term: String,
    pub definition_en: String,
    pub definition_zh: String,
    pub example_sentence: String,
    pub part_of_speech: String,
    /// 1 (easy) to 5 (hard)
    pub difficulty_rating: i64,
    pub tags: Vec<String>,
    pub creator_id: i64,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
    #[serde(with = "time::serde::rfc3339")]
    pub updated_at: OffsetDateTime,
}

#[derive(sqlx::FromRow)]
struct VocabItemRow {
    id: i64,
    term: String,
    definition_en: String,
    definition_zh: String,
    example_sentence: String,
    part_of_speech: String,
    difficulty_rating: i64,
    tags: Json<Vec<String>>,
    creator_id: i64,
    created_at: OffsetDateTime,
    updated_at: OffsetDateTime,
}

impl From<VocabItemRow> for VocabItem {
    fn from(row: VocabItemRow) -> Self {
        Self {
            id: row.id,
            term: row.term,
            definition_en: row.definition_en,
            definition_zh: row.definition_zh,
            example_sentence: row.example_sentence,
            part_of_speech: row.part_of_speech,
            difficulty_rating: row.difficulty_rating,
            tags: row.tags.0,
            creator_id: row.creator_id,
            created_at: row.created_at,
            updated_at: row.updated_at,
        }
    }
}

#[derive(Debug, Clone, Deserialize, ToSchema)]
pub struct VocabItemInput {
    pub term: String,
    pub definition_en: String,
    pub definition_zh: String,
    pub example_sentence: String,
    pub part_of_speech: String,
    pub difficulty_rating: i64,
    pub tags: Option<Vec<String>>,
}

#[derive(Debug, Clone)]
pub struct NewVocabItem {
    pub term: String,
    pub definition_en: String,
    pub definition_zh: String,
    pub example_sentence: String,
    pub part_of_speech: String,
    pub difficulty_rating: i64,
    pub tags: Vec<String>,
}

fn clean_tags(tags: Vec<String>) -> Vec<String> {
    let mut out: Vec<String> = Vec::with_capacity(tags.len());
    for tag in tags {
        let tag = tag.trim().to_string();
        if !tag.is_empty() && !out.contains(&tag) {
            out.push(tag);
        }
    }
    out
}

impl Validate for VocabItemInput {
    type Valid = NewVocabItem;

    fn validate(self) -> std::result::Result<NewVocabItem, ValidationErrors> {
        let mut v = Validator::new();
        let item = NewVocabItem {
            term: v.required("term", self.term),
            definition_en: v.required("definition_en", self.definition_en),
            definition_zh: v.required("definition_zh", self.definition_zh),
            example_sentence: v.required("example_sentence", self.example_sentence),
            part_of_speech: v.required("part_of_speech", self.part_of_speech),
            difficulty_rating: validation::difficulty(&mut v, "difficulty_rating", self.difficulty_rating),
            tags: clean_tags(self.tags.unwrap_or_default()),
        };
        v.finish(item)
    }
}

#[derive(Debug, Clone, Default, Deserialize, ToSchema)]
pub struct VocabItemPatch {
    pub term: Option<String>,
    pub definition_en: Option<String>,
    pub definition_zh: Option<String>,
    pub example_sentence: Option<String>,
    pub part_of_speech: Option<String>,
    pub difficulty_rating: Option<i64>,
    pub tags: Option<Vec<String>>,
}

impl Validate for VocabItemPatch {
    type Valid = VocabItemPatch;

    fn validate(self) -> std::result::Result<VocabItemPatch, ValidationErrors> {
        let mut v = Validator::new();
        let patch = VocabItemPatch {
            term: self.term.map(|s| v.required("term", s)),
            definition_en: self.definition_en.map(|s| v.required("definition_en", s)),
            definition_zh: self.definition_zh.map(|s| v.required("definition_zh", s)),
            example_sentence: self.example_sentence.map(|s| v.required("example_sentence", s)),
            part_of_speech: self.part_of_speech.map(|s| v.required("part_of_speech", s)),
            difficulty_rating: self
                .difficulty_rating
                .map(|d| validation::difficulty(&mut v, "difficulty_rating", d)),
            tags: self.tags.map(clean_tags),
        };
        v.finish(patch)
    }
}

const SELECT_ITEM: &str = "SELECT id, term, definition_en, definition_zh, example_sentence, part_of_speech, difficulty_rating, tags, creator_id, created_at, updated_at FROM vocab_item";

pub async fn create_item(database: &SqlitePool, creator_id: i64, new: NewVocabItem) -> Result<VocabItem> {
    let now = OffsetDateTime::now_utc();
    let id = sqlx::query(
        "INSERT INTO vocab_item (term, definition_en, definition_zh, example_sentence, part_of_speech, difficulty_rating, tags, creator_id, created_at, updated_at) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
    )
    .bind(&new.term)
    .bind(&new.definition_en)
    .bind(&new.definition_zh)
    .bind(&new.example_sentence)
    .bind(&new.part_of_speech)
    .bind(new.difficulty_rating)
    .bind(Json(&new.tags))
    .bind(creator_id)
    .bind(now)
    .bind(now)
    .execute(database)
    .await?
    .last_insert_rowid();
    info!("user {} created vocab item {}-{}", creator_id, id, new.term);
    get_item(database, id).await
}

pub async fn get_item(database: &SqlitePool, id: i64) -> Result<VocabItem> {
    sqlx::query_as::<_, VocabItemRow>(&format!("{SELECT_ITEM} WHERE id = ?"))
        .bind(id)
        .fetch_optional(database)
        .await?
        .map(VocabItem::from)
        .ok_or_else(|| Error::not_found("Vocabulary item"))
}

pub async fn item_exists(database: &SqlitePool, id: i64) -> Result<bool> {
    let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM vocab_item WHERE id = ?")
        .bind(id)
        .fetch_one(database)
        .await?;
    Ok(count > 0)
}

pub async fn list_items(database: &SqlitePool) -> Result<Vec<VocabItem>> {
    let rows = sqlx::query_as::<_, VocabItemRow>(&format!("{SELECT_ITEM} ORDER BY id"))
        .fetch_all(database)
        .await?;
    Ok(rows.into_iter().map(VocabItem::from).collect())
}

/// Items with the given ids, in the order of `ids`. Unknown ids are skipped.
pub async fn items_by_ids(database: &SqlitePool, ids: &[i64]) -> Result<Vec<VocabItem>> {
    if ids.is_empty() {
        return Ok(Vec::new());
    }
    let mut query: QueryBuilder<Sqlite> = QueryBuilder::new(format!("{SELECT_ITEM} WHERE id IN ("));
    let mut separated = query.separated(", ");
    for id in ids {
        separated.push_bind(*id);
    }
    separated.push_unseparated(")");
    let rows = query.build_query_as::<VocabItemRow>().fetch_all(database).await?;
    let mut items: Vec<VocabItem> = rows.into_iter().map(VocabItem::from).collect();
    items.sort_by_key(|item| ids.iter().position(|id| *id == item.id));
    Ok(items)
}

/// Number of distinct ids in `ids` that name an existing item.
pub async fn count_existing(database: &SqlitePool, ids: &[i64]) -> Result<usize> {
    let mut distinct = ids.to_vec();
    distinct.sort_unstable();
    distinct.dedup();
    Ok(items_by_ids(database, &distinct).await?.len())
}

pub async fn search_items(database: &SqlitePool, query: &str) -> Result<Vec<VocabItem>> {
    let escaped = query
        .trim()
        .to_lowercase()
        .replace('\\', "\\\\")
        .replace('%', "\\%")
        .replace('_', "\\_");
    let pattern = format!("%{escaped}%");
    let rows = sqlx::query_as::<_, VocabItemRow>(&format!(
        r"{SELECT_ITEM} WHERE LOWER(term) LIKE ? ESCAPE '\' OR LOWER(definition_en) LIKE ? ESCAPE '\' OR LOWER(definition_zh) LIKE ? ESCAPE '\' ORDER BY id"
    ))
    .bind(&pattern)
    .bind(&pattern)
    .bind(&pattern)
    .fetch_all(database)
    .await?;
    Ok(rows.into_iter().map(VocabItem::from).collect())
}

/// Items carrying at least one of `tags`.
pub async fn items_by_tags(database: &SqlitePool, tags: &[String]) -> Result<Vec<VocabItem>> {
    if tags.is_empty() {
        return Ok(Vec::new());
    }
    let mut query: QueryBuilder<Sqlite> = QueryBuilder::new(format!(
        "{SELECT_ITEM} WHERE EXISTS (SELECT 1 FROM json_each(vocab_item.tags) WHERE json_each.value IN ("
    ));
    let mut separated = query.separated(", ");
    for tag in tags {
        separated.push_bind(tag.clone());
    }
    separated.push_unseparated(")) ORDER BY id");
    let rows = query.build_query_as::<VocabItemRow>().fetch_all(database).await?;
    Ok(rows.into_iter().map(VocabItem::from).collect())
}

pub async fn items_by_difficulty(database: &SqlitePool, difficulty: i64) -> Result<Vec<VocabItem>> {
    if !(1..=5).contains(&difficulty) {
        return Err(Error::invalid("difficulty", "Difficulty must be between 1 and 5"));
    }
    let rows = sqlx::query_as::<_, VocabItemRow>(&format!(
        "{SELECT_ITEM} WHERE difficulty_rating = ? ORDER BY id"
    ))
    .bind(difficulty)
    .fetch_all(database)
    .await?;
    Ok(rows.into_iter().map(VocabItem::from).collect())
}

pub async fn update_item(
    database: &SqlitePool,
    id: i64,
    caller_id: i64,
    patch: VocabItemPatch,
) -> Result<VocabItem> {
    let mut item = get_item(database, id).await?;
    ensure_owner(item.creator_id, caller_id, "update this vocabulary item")?;
    if let Some(term) = patch.term {
        item.term = term;
    }
    if let Some(definition_en) = patch.definition_en {
        item.definition_en = definition_en;
    }
    if let Some(definition_zh) = patch.definition_zh {
        item.definition_zh = definition_zh;
    }
    if let Some(example_sentence) = patch.example_sentence {
        item.example_sentence = example_sentence;
    }
    if let Some(part_of_speech) = patch.part_of_speech {
        item.part_of_speech = part_of_speech;
    }
    if let Some(difficulty_rating) = patch.difficulty_rating {
        item.difficulty_rating = difficulty_rating;
    }
    if let Some(tags) = patch.tags {
        item.tags = tags;
    }
    item.updated_at = OffsetDateTime::now_utc();
    sqlx::query(
        "UPDATE vocab_item SET term = ?, definition_en = ?, definition_zh = ?, example_sentence = ?, part_of_speech = ?, difficulty_rating = ?, tags = ?, updated_at = ? WHERE id = ?",
    )
    .bind(&item.term)
    .bind(&item.definition_en)
    .bind(&item.definition_zh)
    .bind(&item.example_sentence)
    .bind(&item.part_of_speech)
    .bind(item.difficulty_rating)
    .bind(Json(&item.tags))
    .bind(item.updated_at)
    .bind(id)
    .execute(database)
    .await?;
    Ok(item)
}

pub async fn delete_item(database: &SqlitePool, id: i64, caller_id: i64) -> Result<()> {
    let item = get_item(database, id).await?;
    ensure_owner(item.creator_id, caller_id, "delete this vocabulary item")?;
    sqlx::query("DELETE FROM vocab_item WHERE id = ?")
        .bind(id)
        .execute(database)
        .await?;
    info!("user {} deleted vocab item {}", caller_id, id);
    Ok(())
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::db::testing::{memory_pool, seed_user};

    pub(crate) fn sample(term: &str, definition: &str, tags: &[&str]) -> NewVocabItem {
        NewVocabItem {
            term: term.to_string(),
            definition_en: definition.to_string(),
            definition_zh: format!("{term}的定义"),
            example_sentence: format!("An example with {term}."),
            part_of_speech: "noun".to_string(),
            difficulty_rating: 3,
            tags: tags.iter().map(|t| t.to_string()).collect(),
        }
    }

    #[test]
    fn input_validation() {
        let errors = VocabItemInput {
            term: " ".into(),
            definition_en: "a".into(),
            definition_zh: "b".into(),
            example_sentence: "c".into(),
            part_of_speech: "d".into(),
            difficulty_rating: 9,
            tags: None,
        }
        .validate()
        .unwrap_err();
        let paths: Vec<&str> = errors.0.iter().map(|e| e.path.as_str()).collect();
        assert_eq!(paths, vec!["term", "difficulty_rating"]);
    }

    #[tokio::test]
    async fn search_tags_and_difficulty() {
        let database = memory_pool().await;
        let user = seed_user(&database, "alice").await;
        let apple = create_item(&database, user, sample("Apple", "a red fruit", &["food", "fruit"]))
            .await
            .unwrap();
        let mut hard = sample("Ephemeral", "lasting 100% briefly", &["adjective"]);
        hard.difficulty_rating = 5;
        let ephemeral = create_item(&database, user, hard).await.unwrap();

        let found = search_items(&database, "FRUIT").await.unwrap();
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].id, apple.id);
        assert_eq!(search_items(&database, "100%").await.unwrap().len(), 1);
        assert!(search_items(&database, "_").await.unwrap().is_empty());

        let tagged = items_by_tags(&database, &["fruit".into(), "adjective".into()])
            .await
            .unwrap();
        assert_eq!(tagged.len(), 2);
        assert!(items_by_tags(&database, &[]).await.unwrap().is_empty());

        let hard = items_by_difficulty(&database, 5).await.unwrap();
        assert_eq!(hard.len(), 1);
        assert_eq!(hard[0].id, ephemeral.id);
        assert!(matches!(
            items_by_difficulty(&database, 6).await,
            Err(Error::Validation(_))
        ));

        let ordered = items_by_ids(&database, &[ephemeral.id, 999, apple.id]).await.unwrap();
        assert_eq!(
            ordered.iter().map(|i| i.id).collect::<Vec<_>>(),
            vec![ephemeral.id, apple.id]
        );
        assert_eq!(count_existing(&database, &[apple.id, apple.id, 999]).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn only_creator_may_modify() {
        let database = memory_pool().await;
        let alice = seed_user(&database, "alice").await;
        let bob = seed_user(&database, "bob").await;
        let item = create_item(&database, alice, sample("cat", "a small animal", &[]))
            .await
            .unwrap();
        let patch = VocabItemPatch {
            difficulty_rating: Some(1),
            ..Default::default()
        };
        assert!(matches!(
            update_item(&database, item.id, bob, patch.clone()).await,
            Err(Error::Forbidden(_))
        ));
        let updated = update_item(&database, item.id, alice, patch).await.unwrap();
        assert_eq!(updated.difficulty_rating, 1);
        assert_eq!(updated.term, "cat");

        assert!(matches!(
            delete_item(&database, item.id, bob).await,
            Err(Error::Forbidden(_))
        ));
        delete_item(&database, item.id, alice).await.unwrap();
        assert!(matches!(
            get_item(&database, item.id).await,
            Err(Error::NotFound(_))
        ));
    }
}
