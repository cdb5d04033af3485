use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::PgPool;
use uuid::Uuid;

use crate::error::EngineError;
use crate::models::RefreshTokenRecord;
use crate::repo::RefreshTokenRepo;

pub struct PgRefreshTokenRepo {
    pool: PgPool,
}

impl PgRefreshTokenRepo {
    #[must_use]
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl RefreshTokenRepo for PgRefreshTokenRepo {
    async fn create(&self, record: &RefreshTokenRecord) -> Result<(), EngineError> {
        sqlx::query!(
            r#"INSERT INTO refresh_tokens (token, user_id, device_id, ip, user_agent, issued_at, expires_at, is_expired)
               VALUES ($1, $2, $3, $4, $5, $6, $7, $8)"#,
            record.token,
            record.user_id,
            record.device_id,
            record.ip,
            record.user_agent,
            record.issued_at,
            record.expires_at,
            record.is_expired,
        )
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn get_by_value(&self, token: &str) -> Result<Option<RefreshTokenRecord>, EngineError> {
        let row = sqlx::query!(
            r#"SELECT token, user_id, device_id, ip, user_agent, issued_at, expires_at, is_expired
               FROM refresh_tokens WHERE token = $1"#,
            token
        )
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(|r| RefreshTokenRecord {
            token: r.token,
            user_id: r.user_id,
            device_id: r.device_id,
            ip: r.ip,
            user_agent: r.user_agent,
            issued_at: r.issued_at,
            expires_at: r.expires_at,
            is_expired: r.is_expired,
        }))
    }

    async fn mark_expired(&self, token: &str) -> Result<(), EngineError> {
        sqlx::query!(
            "UPDATE refresh_tokens SET is_expired = true WHERE token = $1",
            token
        )
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn mark_all_expired_for_user(&self, user_id: Uuid) -> Result<(), EngineError> {
        sqlx::query!(
            "UPDATE refresh_tokens SET is_expired = true WHERE user_id = $1 AND is_expired = false",
            user_id
        )
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn mark_oldest_expired(&self, user_id: Uuid, keep_n: i64) -> Result<(), EngineError> {
        sqlx::query!(
            r#"UPDATE refresh_tokens SET is_expired = true
               WHERE token IN (
                   SELECT token FROM refresh_tokens
                   WHERE user_id = $1 AND is_expired = false AND expires_at > now()
                   ORDER BY issued_at ASC
                   OFFSET $2
               )"#,
            user_id,
            keep_n,
        )
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn count_live(&self, user_id: Uuid) -> Result<i64, EngineError> {
        let row = sqlx::query!(
            r#"SELECT COUNT(*) AS "count!" FROM refresh_tokens
               WHERE user_id = $1 AND is_expired = false AND expires_at > now()"#,
            user_id
        )
        .fetch_one(&self.pool)
        .await?;
        Ok(row.count)
    }

    async fn cleanup_expired(&self, cutoff: DateTime<Utc>) -> Result<u64, EngineError> {
        let result = sqlx::query!(
            "DELETE FROM refresh_tokens WHERE is_expired = true AND issued_at < $1",
            cutoff
        )
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected())
    }
}
