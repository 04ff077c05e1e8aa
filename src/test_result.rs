use serde::{Deserialize, Serialize};
use sqlx::{SqlitePool, types::Json};
use time::{Duration, OffsetDateTime};
use tracing::info;
use utoipa::ToSchema;

use crate::{
    error::{Error, Result, ensure_owner},
    progress::ProgressTracker,
    validation::{Validate, ValidationErrors, Validator},
    vocab_test::{self, Answer},
};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct QuestionResponse {
    pub question_index: usize,
    pub user_answer: Answer,
    pub is_correct: bool,
    /// Seconds
    pub time_spent: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct TestResult {
    pub id: i64,
    pub test_id: i64,
    pub user_id: i64,
    /// Percentage of questions answered correctly
    pub score: f64,
    pub total_questions: i64,
    pub correct_answers: i64,
    /// Seconds
    pub completion_time: i64,
    pub responses: Vec<QuestionResponse>,
    pub completed: bool,
    #[serde(with = "time::serde::rfc3339")]
    pub started_at: OffsetDateTime,
    #[serde(with = "time::serde::rfc3339::option")]
    pub completed_at: Option<OffsetDateTime>,
}

#[derive(sqlx::FromRow)]
struct TestResultRow {
    id: i64,
    test_id: i64,
    user_id: i64,
    score: f64,
    total_questions: i64,
    correct_answers: i64,
    completion_time: i64,
    responses: Json<Vec<QuestionResponse>>,
    completed: bool,
    started_at: OffsetDateTime,
    completed_at: Option<OffsetDateTime>,
}

impl From<TestResultRow> for TestResult {
    fn from(row: TestResultRow) -> Self {
        Self {
            id: row.id,
            test_id: row.test_id,
            user_id: row.user_id,
            score: row.score,
            total_questions: row.total_questions,
            correct_answers: row.correct_answers,
            completion_time: row.completion_time,
            responses: row.responses.0,
            completed: row.completed,
            started_at: row.started_at,
            completed_at: row.completed_at,
        }
    }
}

#[derive(Debug, Clone, Deserialize, ToSchema)]
pub struct SubmittedAnswer {
    pub question_index: usize,
    pub answer: Answer,
    #[serde(default)]
    pub time_spent: i64,
}

/// Longest accepted completion time, in seconds.
pub const MAX_COMPLETION_TIME: i64 = 7 * 86_400;

#[derive(Debug, Clone, Deserialize, ToSchema)]
pub struct TestSubmission {
    pub test_id: i64,
    pub responses: Vec<SubmittedAnswer>,
    #[serde(default)]
    pub completion_time: i64,
}

impl Validate for TestSubmission {
    type Valid = TestSubmission;

    fn validate(self) -> std::result::Result<TestSubmission, ValidationErrors> {
        let mut v = Validator::new();
        v.range("completion_time", self.completion_time, 0, MAX_COMPLETION_TIME);
        let mut seen = Vec::with_capacity(self.responses.len());
        for (i, response) in self.responses.iter().enumerate() {
            v.check(
                response.time_spent >= 0,
                format!("responses.{i}.time_spent"),
                "must not be negative",
            );
            v.check(
                !seen.contains(&response.question_index),
                format!("responses.{i}.question_index"),
                "question answered twice",
            );
            seen.push(response.question_index);
        }
        v.finish(self)
    }
}

/// Percentage of correct answers, 0 for a test without questions.
pub fn score(correct: usize, total: usize) -> f64 {
    if total == 0 {
        0.0
    } else {
        correct as f64 / total as f64 * 100.0
    }
}

const SELECT_RESULT: &str = "SELECT id, test_id, user_id, score, total_questions, correct_answers, completion_time, responses, completed, started_at, completed_at FROM test_result";

/// Grades the answers against the stored test, saves the result and
/// refreshes the user's average test score.
pub async fn submit_result(
    database: &SqlitePool,
    tracker: &ProgressTracker,
    user_id: i64,
    submission: TestSubmission,
) -> Result<TestResult> {
    let test = vocab_test::get_test(database, submission.test_id).await?;
    let mut responses = Vec::with_capacity(submission.responses.len());
    for (i, submitted) in submission.responses.into_iter().enumerate() {
        let Some(question) = test.questions.get(submitted.question_index) else {
            return Err(Error::invalid(
                format!("responses.{i}.question_index"),
                "no such question in this test",
            ));
        };
        responses.push(QuestionResponse {
            question_index: submitted.question_index,
            is_correct: question.is_correct(&submitted.answer),
            user_answer: submitted.answer,
            time_spent: submitted.time_spent,
        });
    }
    let correct = responses.iter().filter(|r| r.is_correct).count();
    let total = test.questions.len();
    let score = score(correct, total);
    let now = OffsetDateTime::now_utc();
    let started_at = now
        .checked_sub(Duration::seconds(submission.completion_time))
        .ok_or_else(|| Error::invalid("completion_time", "out of range"))?;
    let id = sqlx::query(
        "INSERT INTO test_result (test_id, user_id, score, total_questions, correct_answers, completion_time, responses, completed, started_at, completed_at) VALUES (?, ?, ?, ?, ?, ?, ?, 1, ?, ?)",
    )
    .bind(test.id)
    .bind(user_id)
    .bind(score)
    .bind(total as i64)
    .bind(correct as i64)
    .bind(submission.completion_time)
    .bind(Json(&responses))
    .bind(started_at)
    .bind(now)
    .execute(database)
    .await?
    .last_insert_rowid();
    info!(
        "user {} scored {:.1} on test {} ({}/{})",
        user_id, score, test.id, correct, total
    );

    let average: f64 =
        sqlx::query_scalar("SELECT COALESCE(AVG(score), 0.0) FROM test_result WHERE user_id = ?")
            .bind(user_id)
            .fetch_one(database)
            .await?;
    tracker.record_test_score(user_id, average).await?;
    get_by_id(database, id).await
}

async fn get_by_id(database: &SqlitePool, id: i64) -> Result<TestResult> {
    sqlx::query_as::<_, TestResultRow>(&format!("{SELECT_RESULT} WHERE id = ?"))
        .bind(id)
        .fetch_optional(database)
        .await?
        .map(TestResult::from)
        .ok_or_else(|| Error::not_found("Test result"))
}

/// Only the submitter may read a result.
pub async fn get_result(database: &SqlitePool, id: i64, caller_id: i64) -> Result<TestResult> {
    let result = get_by_id(database, id).await?;
    ensure_owner(result.user_id, caller_id, "view this result")?;
    Ok(result)
}

pub async fn results_by_user(database: &SqlitePool, user_id: i64) -> Result<Vec<TestResult>> {
    let rows = sqlx::query_as::<_, TestResultRow>(&format!(
        "{SELECT_RESULT} WHERE user_id = ? ORDER BY completed_at DESC, id DESC"
    ))
    .bind(user_id)
    .fetch_all(database)
    .await?;
    Ok(rows.into_iter().map(TestResult::from).collect())
}

/// The test's creator sees every result, anyone else only their own.
pub async fn results_by_test(database: &SqlitePool, test_id: i64, caller_id: i64) -> Result<Vec<TestResult>> {
    let test = vocab_test::get_test(database, test_id).await?;
    let rows = if test.creator_id == caller_id {
        sqlx::query_as::<_, TestResultRow>(&format!(
            "{SELECT_RESULT} WHERE test_id = ? ORDER BY id DESC"
        ))
        .bind(test_id)
        .fetch_all(database)
        .await?
    } else {
        sqlx::query_as::<_, TestResultRow>(&format!(
            "{SELECT_RESULT} WHERE test_id = ? AND user_id = ? ORDER BY id DESC"
        ))
        .bind(test_id)
        .bind(caller_id)
        .fetch_all(database)
        .await?
    };
    Ok(rows.into_iter().map(TestResult::from).collect())
}

pub async fn delete_result(database: &SqlitePool, id: i64, caller_id: i64) -> Result<()> {
    let result = get_by_id(database, id).await?;
    ensure_owner(result.user_id, caller_id, "delete this result")?;
    sqlx::query("DELETE FROM test_result WHERE id = ?")
        .bind(id)
        .execute(database)
        .await?;
    info!("user {} deleted test result {}", caller_id, id);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        db::testing::{memory_pool, seed_user},
        vocab_item::{create_item, tests::sample},
        vocab_test::{NewTest, TestQuestion, TestSettings, TestType, create_test},
    };
    use time::UtcOffset;

    async fn fixture() -> (SqlitePool, ProgressTracker, i64, i64, i64) {
        let database = memory_pool().await;
        let alice = seed_user(&database, "alice").await;
        let bob = seed_user(&database, "bob").await;
        let cat = create_item(&database, alice, sample("cat", "a feline", &[])).await.unwrap();
        let test = create_test(
            &database,
            alice,
            NewTest {
                title: "Cats".into(),
                description: String::new(),
                test_type: TestType::MultipleChoice,
                questions: vec![
                    TestQuestion::MultipleChoice {
                        vocab_item_id: cat.id,
                        difficulty_rating: 1,
                        prompt: "cat?".into(),
                        options: vec!["a canine".into(), "a feline".into()],
                        correct_option_index: 1,
                    },
                    TestQuestion::FillInBlank {
                        vocab_item_id: cat.id,
                        difficulty_rating: 1,
                        sentence: "The ___ purrs.".into(),
                        blank_index: 1,
                        correct_answer: "cat".into(),
                    },
                ],
                settings: TestSettings::default(),
                vocab_list_id: None,
            },
        )
        .await
        .unwrap();
        let tracker = ProgressTracker::new(database.clone(), UtcOffset::UTC);
        (database, tracker, alice, bob, test.id)
    }

    fn submission(test_id: i64, answers: Vec<(usize, Answer)>) -> TestSubmission {
        TestSubmission {
            test_id,
            responses: answers
                .into_iter()
                .map(|(question_index, answer)| SubmittedAnswer {
                    question_index,
                    answer,
                    time_spent: 5,
                })
                .collect(),
            completion_time: 10,
        }
    }

    #[test]
    fn scores() {
        assert_eq!(score(0, 0), 0.0);
        assert_eq!(score(1, 2), 50.0);
        assert_eq!(score(3, 3), 100.0);
    }

    #[test]
    fn duplicate_answers_are_rejected() {
        let errors = submission(1, vec![(0, Answer::Option(1)), (0, Answer::Option(0))])
            .validate()
            .unwrap_err();
        assert_eq!(errors.0[0].path, "responses.1.question_index");
    }

    #[tokio::test]
    async fn oversized_completion_time_is_rejected() {
        let (database, tracker, _alice, bob, test_id) = fixture().await;
        let mut sub = submission(test_id, vec![(0, Answer::Option(1))]);
        sub.completion_time = i64::MAX / 2;
        let errors = sub.clone().validate().unwrap_err();
        assert_eq!(errors.0[0].path, "completion_time");

        assert!(matches!(
            submit_result(&database, &tracker, bob, sub).await,
            Err(Error::Validation(_))
        ));
        assert!(results_by_user(&database, bob).await.unwrap().is_empty());

        let mut week = submission(test_id, vec![(0, Answer::Option(1))]);
        week.completion_time = MAX_COMPLETION_TIME;
        assert!(week.validate().is_ok());
    }

    #[tokio::test]
    async fn submit_grades_and_updates_average() {
        let (database, tracker, _alice, bob, test_id) = fixture().await;
        let first = submit_result(
            &database,
            &tracker,
            bob,
            submission(test_id, vec![(0, Answer::Option(1)), (1, Answer::Text(" CAT".into()))]),
        )
        .await
        .unwrap();
        assert_eq!(first.correct_answers, 2);
        assert_eq!(first.score, 100.0);
        assert!(first.responses.iter().all(|r| r.is_correct));

        let second = submit_result(
            &database,
            &tracker,
            bob,
            submission(test_id, vec![(0, Answer::Option(0))]),
        )
        .await
        .unwrap();
        assert_eq!(second.score, 0.0);
        assert_eq!(tracker.get_user_stats(bob).await.unwrap().average_test_score, 50.0);

        assert!(matches!(
            submit_result(&database, &tracker, bob, submission(test_id, vec![(5, Answer::Option(0))])).await,
            Err(Error::Validation(_))
        ));
        assert!(matches!(
            submit_result(&database, &tracker, bob, submission(999, Vec::new())).await,
            Err(Error::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn visibility_and_deletion() {
        let (database, tracker, alice, bob, test_id) = fixture().await;
        let result = submit_result(
            &database,
            &tracker,
            bob,
            submission(test_id, vec![(0, Answer::Option(1))]),
        )
        .await
        .unwrap();
        submit_result(&database, &tracker, alice, submission(test_id, Vec::new()))
            .await
            .unwrap();

        assert_eq!(results_by_test(&database, test_id, alice).await.unwrap().len(), 2);
        assert_eq!(results_by_test(&database, test_id, bob).await.unwrap().len(), 1);
        assert_eq!(results_by_user(&database, bob).await.unwrap().len(), 1);
        assert!(matches!(
            get_result(&database, result.id, alice).await,
            Err(Error::Forbidden(_))
        ));
        assert!(matches!(
            delete_result(&database, result.id, alice).await,
            Err(Error::Forbidden(_))
        ));
        delete_result(&database, result.id, bob).await.unwrap();
        assert!(matches!(
            get_result(&database, result.id, bob).await,
            Err(Error::NotFound(_))
        ));
    }
}
