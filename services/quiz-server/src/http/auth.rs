//! The one auth endpoint this core owns (§6.1): issuing a short-lived
//! WS-ticket for an already-authenticated bearer, the load-bearing half of
//! the admission handshake in `admission.rs`.

use axum::extract::State;
use axum::http::HeaderMap;
use axum::response::IntoResponse;
use axum::Json;
use serde::Serialize;

use crate::admission::extract_bearer;
use crate::error::EngineError;
use crate::http::response;
use crate::state::AppState;

#[derive(Serialize)]
struct WsTicketBody {
    ticket: String,
    expires_in_secs: u64,
}

pub async fn issue_ws_ticket(State(state): State<AppState>, headers: HeaderMap) -> impl IntoResponse {
    let result: Result<WsTicketBody, EngineError> = async {
        let bearer = headers
            .get("authorization")
            .and_then(|v| v.to_str().ok())
            .and_then(extract_bearer)
            .ok_or(EngineError::Unauthenticated)?;
        let claims = state.token_service.parse_access_token(bearer).await?;
        let ticket = state.token_service.issue_ws_ticket(claims.user_id)?;
        Ok(WsTicketBody { ticket, expires_in_secs: state.token_service.ws_ticket_ttl().as_secs() })
    }
    .await;

    match result {
        Ok(body) => Json(body).into_response(),
        Err(e) => response::HttpResponse::from(e).into_response(),
    }
}
