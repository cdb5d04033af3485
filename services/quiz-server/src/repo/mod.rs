pub mod pg;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::error::EngineError;
use crate::models::{Question, Quiz, QuizResult, QuizStatus, RefreshTokenRecord, User, UserAnswer};

type Result<T> = std::result::Result<T, EngineError>;

/// The only persistence contract the runtime sees (spec.md §6): every
/// repository is a trait so `AppState` can hold `Arc<dyn ...>` the way the
/// teacher holds `Arc<RwLock<...>>` registries, and Postgres never leaks
/// into `hub`/`scheduler`/`quiz_runtime`/`scoring`/`token`.
#[async_trait]
pub trait UserRepo: Send + Sync {
    async fn get_by_id(&self, id: Uuid) -> Result<Option<User>>;
    async fn get_by_email(&self, email: &str) -> Result<Option<User>>;
    async fn create(&self, user: &User) -> Result<User>;
    async fn update(&self, user: &User) -> Result<()>;
}

#[async_trait]
pub trait QuizRepo: Send + Sync {
    async fn get(&self, id: Uuid) -> Result<Option<Quiz>>;
    async fn create(&self, quiz: &Quiz) -> Result<Quiz>;
    async fn update(&self, quiz: &Quiz) -> Result<()>;
    async fn get_scheduled(&self) -> Result<Vec<Quiz>>;
    async fn set_status(&self, id: Uuid, status: QuizStatus) -> Result<()>;
}

#[async_trait]
pub trait QuestionRepo: Send + Sync {
    async fn get(&self, id: Uuid) -> Result<Option<Question>>;
    async fn list_for_quiz(&self, quiz_id: Uuid) -> Result<Vec<Question>>;
    async fn create(&self, question: &Question) -> Result<Question>;
}

#[async_trait]
pub trait ResultRepo: Send + Sync {
    async fn save_user_answer(&self, answer: &UserAnswer) -> Result<()>;
    async fn list_answers(&self, quiz_id: Uuid) -> Result<Vec<UserAnswer>>;
    async fn save_result(&self, result: &QuizResult) -> Result<()>;
    async fn get_leaderboard(&self, quiz_id: Uuid) -> Result<Vec<QuizResult>>;
    /// §4.7's on-completion aggregation: rolls `user_answers` up into one
    /// `Result` row per user (`score = Σ score_earned`, `correct_answers =
    /// count(is_correct)`, `total_questions` as given), computes dense ranks
    /// over the rolled-up set, and persists both in one step. Returns the
    /// ranked set.
    async fn calculate_ranks(&self, quiz_id: Uuid, total_questions: i32) -> Result<Vec<QuizResult>>;
}

#[async_trait]
pub trait InvalidTokenRepo: Send + Sync {
    async fn add(&self, user_id: Uuid, at: DateTime<Utc>) -> Result<()>;
    async fn is_invalid(&self, user_id: Uuid, iat: i64) -> Result<bool>;
    async fn remove(&self, user_id: Uuid) -> Result<()>;
    async fn all(&self) -> Result<Vec<(Uuid, DateTime<Utc>)>>;
    async fn cleanup_older(&self, cutoff: DateTime<Utc>) -> Result<u64>;
}

#[async_trait]
pub trait RefreshTokenRepo: Send + Sync {
    async fn create(&self, record: &RefreshTokenRecord) -> Result<()>;
    async fn get_by_value(&self, token: &str) -> Result<Option<RefreshTokenRecord>>;
    async fn mark_expired(&self, token: &str) -> Result<()>;
    async fn mark_all_expired_for_user(&self, user_id: Uuid) -> Result<()>;
    async fn mark_oldest_expired(&self, user_id: Uuid, keep_n: i64) -> Result<()>;
    async fn count_live(&self, user_id: Uuid) -> Result<i64>;
    async fn cleanup_expired(&self, cutoff: DateTime<Utc>) -> Result<u64>;
}

/// Optional accelerator with no correctness dependence (spec.md §6). Not
/// implemented against anything in this workspace today — see DESIGN.md.
#[async_trait]
pub trait Cache: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<String>>;
    async fn set(&self, key: &str, value: &str, ttl: std::time::Duration) -> Result<()>;
    async fn del(&self, key: &str) -> Result<()>;
}
