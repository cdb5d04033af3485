use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::PgPool;
use uuid::Uuid;

use crate::error::EngineError;
use crate::repo::InvalidTokenRepo;

pub struct PgInvalidTokenRepo {
    pool: PgPool,
}

impl PgInvalidTokenRepo {
    #[must_use]
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl InvalidTokenRepo for PgInvalidTokenRepo {
    async fn add(&self, user_id: Uuid, at: DateTime<Utc>) -> Result<(), EngineError> {
        sqlx::query!(
            r#"INSERT INTO user_invalidations (user_id, invalidated_at) VALUES ($1, $2)
               ON CONFLICT (user_id) DO UPDATE SET invalidated_at = EXCLUDED.invalidated_at"#,
            user_id,
            at,
        )
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn is_invalid(&self, user_id: Uuid, iat: i64) -> Result<bool, EngineError> {
        let row = sqlx::query!(
            "SELECT invalidated_at FROM user_invalidations WHERE user_id = $1",
            user_id
        )
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.is_some_and(|r| iat <= r.invalidated_at.timestamp()))
    }

    async fn remove(&self, user_id: Uuid) -> Result<(), EngineError> {
        sqlx::query!("DELETE FROM user_invalidations WHERE user_id = $1", user_id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn all(&self) -> Result<Vec<(Uuid, DateTime<Utc>)>, EngineError> {
        let rows = sqlx::query!("SELECT user_id, invalidated_at FROM user_invalidations")
            .fetch_all(&self.pool)
            .await?;
        Ok(rows.into_iter().map(|r| (r.user_id, r.invalidated_at)).collect())
    }

    async fn cleanup_older(&self, cutoff: DateTime<Utc>) -> Result<u64, EngineError> {
        let result = sqlx::query!(
            "DELETE FROM user_invalidations WHERE invalidated_at < $1",
            cutoff
        )
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected())
    }
}
