use async_trait::async_trait;
use sqlx::PgPool;
use uuid::Uuid;

use crate::error::EngineError;
use crate::models::{Quiz, QuizStatus};
use crate::repo::QuizRepo;

pub struct PgQuizRepo {
    pool: PgPool,
}

impl PgQuizRepo {
    #[must_use]
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

fn parse_status(s: &str) -> QuizStatus {
    match s {
        "countdown" => QuizStatus::Countdown,
        "in_progress" => QuizStatus::InProgress,
        "completed" => QuizStatus::Completed,
        "cancelled" => QuizStatus::Cancelled,
        _ => QuizStatus::Scheduled,
    }
}

fn status_str(s: QuizStatus) -> &'static str {
    match s {
        QuizStatus::Scheduled => "scheduled",
        QuizStatus::Countdown => "countdown",
        QuizStatus::InProgress => "in_progress",
        QuizStatus::Completed => "completed",
        QuizStatus::Cancelled => "cancelled",
    }
}

#[async_trait]
impl QuizRepo for PgQuizRepo {
    async fn get(&self, id: Uuid) -> Result<Option<Quiz>, EngineError> {
        let row = sqlx::query!(
            r#"SELECT id, title, description, scheduled_time, status FROM quizzes WHERE id = $1"#,
            id
        )
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(|r| Quiz {
            id: r.id,
            title: r.title,
            description: r.description,
            scheduled_time: r.scheduled_time,
            status: parse_status(&r.status),
        }))
    }

    async fn create(&self, quiz: &Quiz) -> Result<Quiz, EngineError> {
        let row = sqlx::query!(
            r#"INSERT INTO quizzes (id, title, description, scheduled_time, status)
               VALUES ($1, $2, $3, $4, $5)
               RETURNING id, title, description, scheduled_time, status"#,
            quiz.id,
            quiz.title,
            quiz.description,
            quiz.scheduled_time,
            status_str(quiz.status),
        )
        .fetch_one(&self.pool)
        .await?;

        Ok(Quiz {
            id: row.id,
            title: row.title,
            description: row.description,
            scheduled_time: row.scheduled_time,
            status: parse_status(&row.status),
        })
    }

    async fn update(&self, quiz: &Quiz) -> Result<(), EngineError> {
        sqlx::query!(
            r#"UPDATE quizzes SET title = $2, description = $3, scheduled_time = $4, status = $5 WHERE id = $1"#,
            quiz.id,
            quiz.title,
            quiz.description,
            quiz.scheduled_time,
            status_str(quiz.status),
        )
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn get_scheduled(&self) -> Result<Vec<Quiz>, EngineError> {
        let rows = sqlx::query!(
            r#"SELECT id, title, description, scheduled_time, status FROM quizzes
               WHERE status IN ('scheduled', 'countdown') ORDER BY scheduled_time ASC"#
        )
        .fetch_all(&self.pool)
        .await?;

        Ok(rows
            .into_iter()
            .map(|r| Quiz {
                id: r.id,
                title: r.title,
                description: r.description,
                scheduled_time: r.scheduled_time,
                status: parse_status(&r.status),
            })
            .collect())
    }

    async fn set_status(&self, id: Uuid, status: QuizStatus) -> Result<(), EngineError> {
        let result = sqlx::query!(
            "UPDATE quizzes SET status = $2 WHERE id = $1",
            id,
            status_str(status),
        )
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(EngineError::QuizNotFound);
        }
        Ok(())
    }
}
