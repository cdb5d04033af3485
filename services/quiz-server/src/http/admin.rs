//! Admin/ops endpoints (§6.1): thin proxies over C4/C5, the same
//! `State<AppState>` + `Path`-extractor shape as the teacher's
//! `http::admin::revoke_token`.

use axum::extract::{Path, State};
use axum::http::HeaderMap;
use axum::response::IntoResponse;
use axum::Json;
use serde::Serialize;
use uuid::Uuid;

use crate::admission::extract_bearer;
use crate::error::EngineError;
use crate::http::response;
use crate::models::UserRole;
use crate::state::AppState;

async fn require_admin(state: &AppState, headers: &HeaderMap) -> Result<(), EngineError> {
    let bearer = headers
        .get("authorization")
        .and_then(|v| v.to_str().ok())
        .and_then(extract_bearer)
        .ok_or(EngineError::Unauthenticated)?;
    let claims = state.token_service.parse_access_token(bearer).await?;
    let user = state.user_repo.get_by_id(claims.user_id).await?.ok_or(EngineError::Unauthenticated)?;
    if user.role != UserRole::Admin {
        return Err(EngineError::Forbidden);
    }
    Ok(())
}

pub async fn cancel_quiz(State(state): State<AppState>, headers: HeaderMap, Path(quiz_id): Path<Uuid>) -> impl IntoResponse {
    if let Err(e) = require_admin(&state, &headers).await {
        return response::HttpResponse::from(e).into_response();
    }
    match state.scheduler.cancel(quiz_id, "cancelled by admin").await {
        Ok(()) => axum::http::StatusCode::NO_CONTENT.into_response(),
        Err(e) => response::HttpResponse::from(e).into_response(),
    }
}

#[derive(Serialize)]
struct RuntimeSnapshotBody {
    quiz_id: Uuid,
    current_question_index: usize,
    answered: Vec<Uuid>,
    eliminated: Vec<Uuid>,
}

pub async fn quiz_runtime(State(state): State<AppState>, headers: HeaderMap, Path(quiz_id): Path<Uuid>) -> impl IntoResponse {
    if let Err(e) = require_admin(&state, &headers).await {
        return response::HttpResponse::from(e).into_response();
    }
    match state.scheduler.runtime_snapshot(quiz_id).await {
        Some(rt) => Json(RuntimeSnapshotBody {
            quiz_id,
            current_question_index: rt.current_question_index,
            answered: rt.answered.into_iter().collect(),
            eliminated: rt.eliminated.into_iter().collect(),
        })
        .into_response(),
        None => response::not_found("no live runtime for this quiz").into_response(),
    }
}

pub async fn invalidate_all_tokens(State(state): State<AppState>, headers: HeaderMap, Path(user_id): Path<Uuid>) -> impl IntoResponse {
    if let Err(e) = require_admin(&state, &headers).await {
        return response::HttpResponse::from(e).into_response();
    }
    match state.token_service.invalidate_all_for_user(user_id).await {
        Ok(()) => axum::http::StatusCode::NO_CONTENT.into_response(),
        Err(e) => response::HttpResponse::from(e).into_response(),
    }
}

pub async fn reset_invalidation(State(state): State<AppState>, headers: HeaderMap, Path(user_id): Path<Uuid>) -> impl IntoResponse {
    if let Err(e) = require_admin(&state, &headers).await {
        return response::HttpResponse::from(e).into_response();
    }
    match state.token_service.reset_invalidation(user_id).await {
        Ok(()) => axum::http::StatusCode::NO_CONTENT.into_response(),
        Err(e) => response::HttpResponse::from(e).into_response(),
    }
}
