//! Admission Gateway (C9): validates the WS handshake before handing off to
//! `ws::upgrade`, mirroring `ws_forwarder_handler`'s header extraction +
//! `validate_token` call, generalized to the ticket-or-bearer rule of §4.9
//! and the per-IP cap.

use axum::http::HeaderMap;
use std::net::IpAddr;
use std::sync::Arc;
use tokio::sync::RwLock;
use uuid::Uuid;

use crate::config::Config;
use crate::error::EngineError;
use crate::token::TokenService;

#[derive(Debug, Clone, Copy)]
pub struct AdmittedIdentity {
    pub user_id: Uuid,
}

/// §4.9's per-IP connection counter, the shape `active_forwarders` already
/// has in the teacher (an `Arc<RwLock<HashMap<...>>>` guarding a count).
#[derive(Default)]
pub struct PerIpCounter {
    counts: RwLock<std::collections::HashMap<IpAddr, usize>>,
}

impl PerIpCounter {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn try_acquire(&self, ip: IpAddr, max: usize) -> bool {
        let mut counts = self.counts.write().await;
        let entry = counts.entry(ip).or_insert(0);
        if *entry >= max {
            return false;
        }
        *entry += 1;
        true
    }

    pub async fn release(&self, ip: IpAddr) {
        let mut counts = self.counts.write().await;
        if let Some(entry) = counts.get_mut(&ip) {
            *entry = entry.saturating_sub(1);
            if *entry == 0 {
                counts.remove(&ip);
            }
        }
    }
}

/// Extracts `Bearer <token>` from an `Authorization` header value, same
/// helper shape as the teacher's `auth::extract_bearer`.
#[must_use]
pub fn extract_bearer(header_value: &str) -> Option<&str> {
    header_value.strip_prefix("Bearer ").map(str::trim)
}

/// §4.9: admits via `token=` query parameter (a WS-ticket) OR
/// `Authorization: Bearer <access>`.
pub async fn admit(
    token_service: &TokenService,
    ticket_query: Option<&str>,
    headers: &HeaderMap,
) -> Result<AdmittedIdentity, EngineError> {
    if let Some(ticket) = ticket_query {
        let claims = token_service.parse_ws_ticket(ticket)?;
        return Ok(AdmittedIdentity { user_id: claims.user_id });
    }

    let bearer = headers
        .get("authorization")
        .and_then(|v| v.to_str().ok())
        .and_then(extract_bearer)
        .ok_or(EngineError::Unauthenticated)?;

    let claims = token_service.parse_access_token(bearer).await?;
    Ok(AdmittedIdentity { user_id: claims.user_id })
}

#[must_use]
pub fn client_ip(headers: &HeaderMap, remote: IpAddr) -> IpAddr {
    headers
        .get("x-forwarded-for")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.split(',').next())
        .and_then(|v| v.trim().parse().ok())
        .unwrap_or(remote)
}

#[must_use]
pub fn max_connections_per_ip(config: &Config) -> usize {
    config.max_connections_per_ip
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn per_ip_counter_enforces_the_cap_then_releases() {
        let counter = PerIpCounter::new();
        let ip: IpAddr = "127.0.0.1".parse().unwrap();

        assert!(counter.try_acquire(ip, 2).await);
        assert!(counter.try_acquire(ip, 2).await);
        assert!(!counter.try_acquire(ip, 2).await);

        counter.release(ip).await;
        assert!(counter.try_acquire(ip, 2).await);
    }

    #[test]
    fn extract_bearer_strips_the_scheme_prefix() {
        assert_eq!(extract_bearer("Bearer abc123"), Some("abc123"));
        assert_eq!(extract_bearer("Basic abc123"), None);
    }
}
