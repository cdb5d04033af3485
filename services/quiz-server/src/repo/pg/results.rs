use async_trait::async_trait;
use sqlx::PgPool;
use uuid::Uuid;

use crate::error::EngineError;
use crate::models::{QuizResult, UserAnswer};
use crate::repo::ResultRepo;
use crate::scoring::dense_rank;

pub struct PgResultRepo {
    pool: PgPool,
}

impl PgResultRepo {
    #[must_use]
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl ResultRepo for PgResultRepo {
    async fn save_user_answer(&self, answer: &UserAnswer) -> Result<(), EngineError> {
        let result = sqlx::query!(
            r#"INSERT INTO user_answers
               (user_id, quiz_id, question_id, selected_option, is_correct, response_time_ms, score_earned, submitted_at)
               VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
               ON CONFLICT (user_id, question_id) DO NOTHING"#,
            answer.user_id,
            answer.quiz_id,
            answer.question_id,
            answer.selected_option,
            answer.is_correct,
            answer.response_time_ms,
            answer.score_earned,
            answer.submitted_at,
        )
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(EngineError::DuplicateAnswer);
        }
        Ok(())
    }

    async fn list_answers(&self, quiz_id: Uuid) -> Result<Vec<UserAnswer>, EngineError> {
        let rows = sqlx::query!(
            r#"SELECT user_id, quiz_id, question_id, selected_option, is_correct, response_time_ms, score_earned, submitted_at
               FROM user_answers WHERE quiz_id = $1"#,
            quiz_id
        )
        .fetch_all(&self.pool)
        .await?;

        Ok(rows
            .into_iter()
            .map(|r| UserAnswer {
                user_id: r.user_id,
                quiz_id: r.quiz_id,
                question_id: r.question_id,
                selected_option: r.selected_option,
                is_correct: r.is_correct,
                response_time_ms: r.response_time_ms,
                score_earned: r.score_earned,
                submitted_at: r.submitted_at,
            })
            .collect())
    }

    async fn save_result(&self, result: &QuizResult) -> Result<(), EngineError> {
        sqlx::query!(
            r#"INSERT INTO results (user_id, quiz_id, username, score, correct_answers, total_questions, rank, completed_at)
               VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
               ON CONFLICT (user_id, quiz_id) DO UPDATE SET
                   score = EXCLUDED.score,
                   correct_answers = EXCLUDED.correct_answers,
                   total_questions = EXCLUDED.total_questions,
                   rank = EXCLUDED.rank,
                   completed_at = EXCLUDED.completed_at"#,
            result.user_id,
            result.quiz_id,
            result.username,
            result.score,
            result.correct_answers,
            result.total_questions,
            result.rank,
            result.completed_at,
        )
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn get_leaderboard(&self, quiz_id: Uuid) -> Result<Vec<QuizResult>, EngineError> {
        let rows = sqlx::query!(
            r#"SELECT user_id, quiz_id, username, score, correct_answers, total_questions, rank, completed_at
               FROM results WHERE quiz_id = $1 ORDER BY rank ASC"#,
            quiz_id
        )
        .fetch_all(&self.pool)
        .await?;

        Ok(rows
            .into_iter()
            .map(|r| QuizResult {
                user_id: r.user_id,
                quiz_id: r.quiz_id,
                username: r.username,
                score: r.score,
                correct_answers: r.correct_answers,
                total_questions: r.total_questions,
                rank: r.rank,
                completed_at: r.completed_at,
            })
            .collect())
    }

    async fn calculate_ranks(&self, quiz_id: Uuid, total_questions: i32) -> Result<Vec<QuizResult>, EngineError> {
        // Roll `user_answers` up into one `results` row per user before
        // ranking: without this, `get_leaderboard` below would have nothing
        // to rank for a quiz whose finish hasn't run before.
        sqlx::query!(
            r#"INSERT INTO results (user_id, quiz_id, username, score, correct_answers, total_questions, rank, completed_at)
               SELECT ua.user_id, ua.quiz_id, u.username,
                      SUM(ua.score_earned), COUNT(*) FILTER (WHERE ua.is_correct), $2, 0, now()
               FROM user_answers ua JOIN users u ON u.id = ua.user_id
               WHERE ua.quiz_id = $1
               GROUP BY ua.user_id, ua.quiz_id, u.username
               ON CONFLICT (user_id, quiz_id) DO UPDATE SET
                   score = EXCLUDED.score,
                   correct_answers = EXCLUDED.correct_answers,
                   total_questions = EXCLUDED.total_questions,
                   completed_at = EXCLUDED.completed_at"#,
            quiz_id,
            total_questions,
        )
        .execute(&self.pool)
        .await?;

        let mut results = self.get_leaderboard(quiz_id).await?;
        let answers = self.list_answers(quiz_id).await?;

        let mut total_rt: std::collections::HashMap<Uuid, i64> = std::collections::HashMap::new();
        for a in &answers {
            *total_rt.entry(a.user_id).or_insert(0) += a.response_time_ms;
        }

        dense_rank(&mut results, &total_rt);

        for result in &results {
            self.save_result(result).await?;
        }
        Ok(results)
    }
}
