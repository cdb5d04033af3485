use async_trait::async_trait;
use sqlx::PgPool;
use uuid::Uuid;

use crate::error::EngineError;
use crate::models::Question;
use crate::repo::QuestionRepo;

pub struct PgQuestionRepo {
    pool: PgPool,
}

impl PgQuestionRepo {
    #[must_use]
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl QuestionRepo for PgQuestionRepo {
    async fn get(&self, id: Uuid) -> Result<Option<Question>, EngineError> {
        let row = sqlx::query!(
            r#"SELECT id, quiz_id, position, text, options, correct_option, time_limit_sec, point_value
               FROM questions WHERE id = $1"#,
            id
        )
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(|r| Question {
            id: r.id,
            quiz_id: r.quiz_id,
            position: r.position,
            text: r.text,
            options: r.options,
            correct_option: r.correct_option,
            time_limit_sec: r.time_limit_sec,
            point_value: r.point_value,
        }))
    }

    async fn list_for_quiz(&self, quiz_id: Uuid) -> Result<Vec<Question>, EngineError> {
        let rows = sqlx::query!(
            r#"SELECT id, quiz_id, position, text, options, correct_option, time_limit_sec, point_value
               FROM questions WHERE quiz_id = $1 ORDER BY position ASC"#,
            quiz_id
        )
        .fetch_all(&self.pool)
        .await?;

        Ok(rows
            .into_iter()
            .map(|r| Question {
                id: r.id,
                quiz_id: r.quiz_id,
                position: r.position,
                text: r.text,
                options: r.options,
                correct_option: r.correct_option,
                time_limit_sec: r.time_limit_sec,
                point_value: r.point_value,
            })
            .collect())
    }

    async fn create(&self, question: &Question) -> Result<Question, EngineError> {
        let row = sqlx::query!(
            r#"INSERT INTO questions (id, quiz_id, position, text, options, correct_option, time_limit_sec, point_value)
               VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
               RETURNING id, quiz_id, position, text, options, correct_option, time_limit_sec, point_value"#,
            question.id,
            question.quiz_id,
            question.position,
            question.text,
            &question.options,
            question.correct_option,
            question.time_limit_sec,
            question.point_value,
        )
        .fetch_one(&self.pool)
        .await?;

        Ok(Question {
            id: row.id,
            quiz_id: row.quiz_id,
            position: row.position,
            text: row.text,
            options: row.options,
            correct_option: row.correct_option,
            time_limit_sec: row.time_limit_sec,
            point_value: row.point_value,
        })
    }
}
