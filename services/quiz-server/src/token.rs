//! Token Service (C4): HMAC-SHA256 access tokens via `jsonwebtoken` (the one
//! pack repo with a real token-signing dependency is `estuary-flow`'s
//! `crates/tokens`; the teacher itself only ever compares SHA-256 hashes of
//! opaque bearer strings, which is not sufficient for a self-describing
//! `{user_id, email, iat, exp}` claim set). Refresh tokens stay opaque random
//! hex, handed to the caller raw and persisted only as their `sha2` digest —
//! exactly the way `http/admin.rs::create_token` hashes device tokens before
//! storing them — so a leaked `refresh_tokens` row can't be replayed as a
//! bearer credential.

use chrono::Utc;
use hex::ToHex;
use jsonwebtoken::{decode, encode, DecodingKey, EncodingKey, Header, Validation};
use rand::RngCore;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::sync::Arc;
use std::time::Duration;
use uuid::Uuid;

use crate::config::Config;
use crate::error::EngineError;
use crate::models::{AccessClaims, RefreshTokenRecord, User, WsTicketClaims};
use crate::repo::{InvalidTokenRepo, RefreshTokenRepo};

#[derive(Debug, Serialize, Deserialize)]
struct AccessJwtClaims {
    user_id: Uuid,
    email: String,
    iat: i64,
    exp: i64,
}

#[derive(Debug, Serialize, Deserialize)]
struct WsTicketJwtClaims {
    user_id: Uuid,
    iat: i64,
    exp: i64,
    purpose: String,
}

pub struct TokenService {
    config: Config,
    invalid_tokens: Arc<dyn InvalidTokenRepo>,
    refresh_tokens: Arc<dyn RefreshTokenRepo>,
}

pub struct IssuedRefresh {
    pub token: String,
    pub expires_at: chrono::DateTime<Utc>,
}

impl TokenService {
    #[must_use]
    pub fn new(
        config: Config,
        invalid_tokens: Arc<dyn InvalidTokenRepo>,
        refresh_tokens: Arc<dyn RefreshTokenRepo>,
    ) -> Self {
        Self { config, invalid_tokens, refresh_tokens }
    }

    fn encoding_key(&self) -> EncodingKey {
        EncodingKey::from_secret(self.config.jwt_secret.as_bytes())
    }

    fn decoding_key(&self) -> DecodingKey {
        DecodingKey::from_secret(self.config.jwt_secret.as_bytes())
    }

    /// §4.4 `IssueAccessToken`.
    pub fn issue_access_token(&self, user: &User) -> Result<String, EngineError> {
        let now = Utc::now();
        let claims = AccessJwtClaims {
            user_id: user.id,
            email: user.email.clone(),
            iat: now.timestamp(),
            exp: (now + self.config.access_ttl).timestamp(),
        };
        encode(&Header::default(), &claims, &self.encoding_key())
            .map_err(|e| EngineError::TokenMalformed.context(e))
    }

    /// §4.4 `ParseAccessToken`. Invalidated iff there exists
    /// `UserInvalidation(user_id, t) ∧ iat ≤ t` — skipped entirely for
    /// WS-tickets, which are validated through `parse_ws_ticket` instead.
    pub async fn parse_access_token(&self, token: &str) -> Result<AccessClaims, EngineError> {
        let mut validation = Validation::default();
        validation.validate_exp = true;
        let data = decode::<AccessJwtClaims>(token, &self.decoding_key(), &validation).map_err(|e| {
            use jsonwebtoken::errors::ErrorKind;
            match e.kind() {
                ErrorKind::ExpiredSignature => EngineError::TokenExpired,
                ErrorKind::InvalidSignature => EngineError::TokenMalformed,
                _ => EngineError::TokenMalformed,
            }
        })?;

        if self.invalid_tokens.is_invalid(data.claims.user_id, data.claims.iat).await? {
            return Err(EngineError::TokenInvalidated);
        }

        Ok(AccessClaims {
            user_id: data.claims.user_id,
            email: data.claims.email,
            iat: data.claims.iat,
            exp: data.claims.exp,
        })
    }

    /// §4.4 `IssueRefresh`: random 256-bit hex handed back to the caller;
    /// only its `sha2` digest is persisted. If the user's live count exceeds
    /// `max_refresh_per_user` after insert, the oldest live ones are marked
    /// expired until the count matches.
    pub async fn issue_refresh(
        &self,
        user_id: Uuid,
        device_id: &str,
        ip: &str,
        user_agent: &str,
    ) -> Result<IssuedRefresh, EngineError> {
        let mut bytes = [0u8; 32];
        rand::rngs::OsRng.fill_bytes(&mut bytes);
        let token: String = bytes.encode_hex();

        let now = Utc::now();
        let expires_at = now + self.config.refresh_ttl;
        let record = RefreshTokenRecord {
            token: hash_refresh_token(&token),
            user_id,
            device_id: device_id.to_owned(),
            ip: ip.to_owned(),
            user_agent: user_agent.to_owned(),
            issued_at: now,
            expires_at,
            is_expired: false,
        };
        self.refresh_tokens.create(&record).await?;

        let live = self.refresh_tokens.count_live(user_id).await?;
        if live > self.config.max_refresh_per_user {
            self.refresh_tokens
                .mark_oldest_expired(user_id, self.config.max_refresh_per_user)
                .await?;
        }

        Ok(IssuedRefresh { token, expires_at })
    }

    /// §4.4 `RotateRefresh`: on success marks the old token expired and
    /// returns the user id so the caller can mint a fresh access+refresh
    /// pair. Single-use (invariant 7, testable property) — the second call
    /// with the same token finds it already marked expired.
    pub async fn rotate_refresh(&self, token: &str) -> Result<Uuid, EngineError> {
        let hashed = hash_refresh_token(token);
        let record = self
            .refresh_tokens
            .get_by_value(&hashed)
            .await?
            .ok_or(EngineError::NotFound)?;

        if record.is_expired {
            return Err(EngineError::Conflict("refresh token already expired".to_owned()));
        }
        if Utc::now() >= record.expires_at {
            return Err(EngineError::TokenExpired);
        }

        self.refresh_tokens.mark_expired(&hashed).await?;
        Ok(record.user_id)
    }

    /// §4.4 `InvalidateAllForUser`: writes `UserInvalidation(user, now)` and
    /// expires all live refreshes for the user.
    pub async fn invalidate_all_for_user(&self, user_id: Uuid) -> Result<(), EngineError> {
        self.invalid_tokens.add(user_id, Utc::now()).await?;
        self.refresh_tokens.mark_all_expired_for_user(user_id).await?;
        Ok(())
    }

    /// §4.4 `ResetInvalidation` (admin only).
    pub async fn reset_invalidation(&self, user_id: Uuid) -> Result<(), EngineError> {
        self.invalid_tokens.remove(user_id).await
    }

    /// §4.4 `CleanupInvalidations`: removes entries older than
    /// `invalidation_retention`, run every `cleanup_interval`.
    pub async fn cleanup_invalidations(&self) -> Result<u64, EngineError> {
        let cutoff = Utc::now() - self.config.invalidation_retention;
        self.invalid_tokens.cleanup_older(cutoff).await
    }

    /// §4.4 `IssueWSTicket`: a 30-second signed token carrying
    /// `purpose="ws"`. Single-use is not enforced; short expiry is the
    /// guarantee.
    pub fn issue_ws_ticket(&self, user_id: Uuid) -> Result<String, EngineError> {
        let now = Utc::now();
        let claims = WsTicketJwtClaims {
            user_id,
            iat: now.timestamp(),
            exp: (now + self.config.ws_ticket_ttl).timestamp(),
            purpose: "ws".to_owned(),
        };
        encode(&Header::default(), &claims, &self.encoding_key())
            .map_err(|e| EngineError::TokenMalformed.context(e))
    }

    /// Validates a WS-ticket. Accepted regardless of `UserInvalidation`
    /// (it is issued *after* auth, spec.md §3's `WSTicket` invariant).
    pub fn parse_ws_ticket(&self, token: &str) -> Result<WsTicketClaims, EngineError> {
        let mut validation = Validation::default();
        validation.validate_exp = true;
        let data = decode::<WsTicketJwtClaims>(token, &self.decoding_key(), &validation)
            .map_err(|_| EngineError::TokenMalformed)?;

        if data.claims.purpose != "ws" {
            return Err(EngineError::TokenMalformed);
        }

        Ok(WsTicketClaims {
            user_id: data.claims.user_id,
            iat: data.claims.iat,
            exp: data.claims.exp,
        })
    }

    #[must_use]
    pub fn ws_ticket_ttl(&self) -> Duration {
        self.config.ws_ticket_ttl
    }
}

/// The persisted lookup key for a refresh token is its digest, never the raw
/// value a client holds.
fn hash_refresh_token(raw: &str) -> String {
    Sha256::digest(raw.as_bytes()).encode_hex()
}

impl EngineError {
    /// Attach a lower-level error's message while keeping the public kind,
    /// mirroring how the teacher's HTTP handlers surface `e.to_string()`
    /// from `sqlx::Error` without changing the outward status mapping.
    fn context(self, err: impl std::fmt::Display) -> Self {
        tracing::warn!(error = %err, "token operation failed");
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::UserRole;
    use async_trait::async_trait;
    use std::sync::Mutex;

    struct FakeInvalidTokens {
        invalidated_at: Mutex<Option<i64>>,
    }

    #[async_trait]
    impl InvalidTokenRepo for FakeInvalidTokens {
        async fn add(&self, _user_id: Uuid, at: chrono::DateTime<Utc>) -> Result<(), EngineError> {
            *self.invalidated_at.lock().unwrap() = Some(at.timestamp());
            Ok(())
        }
        async fn is_invalid(&self, _user_id: Uuid, iat: i64) -> Result<bool, EngineError> {
            Ok(self.invalidated_at.lock().unwrap().is_some_and(|t| iat <= t))
        }
        async fn remove(&self, _user_id: Uuid) -> Result<(), EngineError> {
            *self.invalidated_at.lock().unwrap() = None;
            Ok(())
        }
        async fn all(&self) -> Result<Vec<(Uuid, chrono::DateTime<Utc>)>, EngineError> {
            Ok(vec![])
        }
        async fn cleanup_older(&self, _cutoff: chrono::DateTime<Utc>) -> Result<u64, EngineError> {
            Ok(0)
        }
    }

    struct FakeRefreshTokens {
        records: Mutex<Vec<RefreshTokenRecord>>,
    }

    #[async_trait]
    impl RefreshTokenRepo for FakeRefreshTokens {
        async fn create(&self, record: &RefreshTokenRecord) -> Result<(), EngineError> {
            self.records.lock().unwrap().push(record.clone());
            Ok(())
        }
        async fn get_by_value(&self, token: &str) -> Result<Option<RefreshTokenRecord>, EngineError> {
            Ok(self.records.lock().unwrap().iter().find(|r| r.token == token).cloned())
        }
        async fn mark_expired(&self, token: &str) -> Result<(), EngineError> {
            for r in self.records.lock().unwrap().iter_mut() {
                if r.token == token {
                    r.is_expired = true;
                }
            }
            Ok(())
        }
        async fn mark_all_expired_for_user(&self, user_id: Uuid) -> Result<(), EngineError> {
            for r in self.records.lock().unwrap().iter_mut() {
                if r.user_id == user_id {
                    r.is_expired = true;
                }
            }
            Ok(())
        }
        async fn mark_oldest_expired(&self, _user_id: Uuid, _keep_n: i64) -> Result<(), EngineError> {
            Ok(())
        }
        async fn count_live(&self, user_id: Uuid) -> Result<i64, EngineError> {
            let now = Utc::now();
            Ok(self
                .records
                .lock()
                .unwrap()
                .iter()
                .filter(|r| r.user_id == user_id && r.is_live(now))
                .count() as i64)
        }
        async fn cleanup_expired(&self, _cutoff: chrono::DateTime<Utc>) -> Result<u64, EngineError> {
            Ok(0)
        }
    }

    fn service() -> TokenService {
        let config = Config {
            jwt_secret: "test-secret".to_owned(),
            ..test_config()
        };
        TokenService::new(
            config,
            Arc::new(FakeInvalidTokens { invalidated_at: Mutex::new(None) }),
            Arc::new(FakeRefreshTokens { records: Mutex::new(vec![]) }),
        )
    }

    fn test_config() -> Config {
        Config {
            shard_count: 4,
            max_clients_per_shard: 5000,
            client_queue_high: 256,
            client_queue_normal: 128,
            client_queue_low: 64,
            broadcast_buffer: 128,
            ping_interval: Duration::from_secs(30),
            pong_wait: Duration::from_secs(60),
            write_wait: Duration::from_secs(10),
            max_message_size: 65536,
            max_connections_per_ip: 100,
            access_ttl: Duration::from_secs(3600),
            refresh_ttl: Duration::from_secs(3600 * 24 * 30),
            ws_ticket_ttl: Duration::from_secs(30),
            max_refresh_per_user: 10,
            invalidation_retention: Duration::from_secs(3600 * 48),
            cleanup_interval: Duration::from_secs(1800),
            countdown_lead: Duration::from_secs(10),
            reconnect_grace: Duration::from_secs(15),
            answer_grace: Duration::from_millis(500),
            shutdown_grace: Duration::from_secs(10),
            jwt_secret: "test-secret".to_owned(),
        }
    }

    fn user() -> User {
        User {
            id: Uuid::new_v4(),
            username: "alice".to_owned(),
            email: "alice@example.com".to_owned(),
            password_hash: String::new(),
            role: UserRole::User,
            quizzes_played: 0,
            total_score: 0,
        }
    }

    #[tokio::test]
    async fn issue_then_parse_access_token_round_trips_claims() {
        let svc = service();
        let u = user();
        let token = svc.issue_access_token(&u).expect("issue");
        let claims = svc.parse_access_token(&token).await.expect("parse");
        assert_eq!(claims.user_id, u.id);
        assert_eq!(claims.email, u.email);
    }

    #[tokio::test]
    async fn ws_ticket_is_unaffected_by_invalidation() {
        let svc = service();
        let u = user();
        svc.invalidate_all_for_user(u.id).await.unwrap();
        let ticket = svc.issue_ws_ticket(u.id).expect("issue ticket");
        let claims = svc.parse_ws_ticket(&ticket).expect("parse ticket");
        assert_eq!(claims.user_id, u.id);
    }

    #[tokio::test]
    async fn refresh_rotation_is_single_use() {
        let svc = service();
        let u = user();
        let issued = svc.issue_refresh(u.id, "device-1", "127.0.0.1", "test-agent").await.unwrap();
        let rotated_user = svc.rotate_refresh(&issued.token).await.unwrap();
        assert_eq!(rotated_user, u.id);

        let second = svc.rotate_refresh(&issued.token).await;
        assert!(matches!(second, Err(EngineError::Conflict(_))));
    }

}
