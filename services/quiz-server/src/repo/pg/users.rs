use async_trait::async_trait;
use sqlx::PgPool;
use uuid::Uuid;

use crate::error::EngineError;
use crate::models::{User, UserRole};
use crate::repo::UserRepo;

pub struct PgUserRepo {
    pool: PgPool,
}

impl PgUserRepo {
    #[must_use]
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

fn row_to_user(
    id: Uuid,
    username: String,
    email: String,
    password_hash: String,
    role: String,
    quizzes_played: i32,
    total_score: i64,
) -> User {
    User {
        id,
        username,
        email,
        password_hash,
        role: if role == "admin" { UserRole::Admin } else { UserRole::User },
        quizzes_played,
        total_score,
    }
}

#[async_trait]
impl UserRepo for PgUserRepo {
    async fn get_by_id(&self, id: Uuid) -> Result<Option<User>, EngineError> {
        let row = sqlx::query!(
            r#"SELECT id, username, email, password_hash, role, quizzes_played, total_score FROM users WHERE id = $1"#,
            id
        )
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(|r| {
            row_to_user(
                r.id,
                r.username,
                r.email,
                r.password_hash,
                r.role,
                r.quizzes_played,
                r.total_score,
            )
        }))
    }

    async fn get_by_email(&self, email: &str) -> Result<Option<User>, EngineError> {
        let row = sqlx::query!(
            r#"SELECT id, username, email, password_hash, role, quizzes_played, total_score FROM users WHERE email = $1"#,
            email
        )
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(|r| {
            row_to_user(
                r.id,
                r.username,
                r.email,
                r.password_hash,
                r.role,
                r.quizzes_played,
                r.total_score,
            )
        }))
    }

    async fn create(&self, user: &User) -> Result<User, EngineError> {
        let role = match user.role {
            UserRole::Admin => "admin",
            UserRole::User => "user",
        };
        let row = sqlx::query!(
            r#"INSERT INTO users (id, username, email, password_hash, role, quizzes_played, total_score)
               VALUES ($1, $2, $3, $4, $5, $6, $7)
               RETURNING id, username, email, password_hash, role, quizzes_played, total_score"#,
            user.id,
            user.username,
            user.email,
            user.password_hash,
            role,
            user.quizzes_played,
            user.total_score,
        )
        .fetch_one(&self.pool)
        .await?;

        Ok(row_to_user(
            row.id,
            row.username,
            row.email,
            row.password_hash,
            row.role,
            row.quizzes_played,
            row.total_score,
        ))
    }

    async fn update(&self, user: &User) -> Result<(), EngineError> {
        let role = match user.role {
            UserRole::Admin => "admin",
            UserRole::User => "user",
        };
        sqlx::query!(
            r#"UPDATE users SET username = $2, email = $3, password_hash = $4, role = $5,
               quizzes_played = $6, total_score = $7 WHERE id = $1"#,
            user.id,
            user.username,
            user.email,
            user.password_hash,
            role,
            user.quizzes_played,
            user.total_score,
        )
        .execute(&self.pool)
        .await?;
        Ok(())
    }
}
