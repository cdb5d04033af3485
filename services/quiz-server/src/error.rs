use crate::http::response::{HttpResponse, json_error};
use axum::http::StatusCode;
use thiserror::Error;

/// The domain error kinds named by the error-handling design, collected into
/// one enum instead of the ad hoc `StatusCode`/JSON pairs the rest of this
/// codebase's HTTP handlers build by hand — grouped here because the quiz
/// runtime, unlike a CRUD admin surface, has one caller (the scheduler/hub)
/// instead of many independent handlers, so a shared enum pulls its weight.
#[derive(Debug, Error)]
pub enum EngineError {
    #[error("unauthenticated")]
    Unauthenticated,
    #[error("forbidden")]
    Forbidden,
    #[error("token expired")]
    TokenExpired,
    #[error("token malformed")]
    TokenMalformed,
    #[error("token invalidated")]
    TokenInvalidated,

    #[error("too many connections from this address")]
    TooManyConnections,
    #[error("bad websocket handshake: {0}")]
    BadHandshake(String),

    #[error("slow consumer")]
    SlowConsumer,
    #[error("protocol violation: {0}")]
    ProtocolViolation(String),
    #[error("payload too large")]
    PayloadTooLarge,
    #[error("unknown message type: {0}")]
    UnknownMessageType(String),

    #[error("quiz not found")]
    QuizNotFound,
    #[error("quiz not joinable")]
    QuizNotJoinable,
    #[error("answer window closed")]
    AnswerWindowClosed,
    #[error("duplicate answer")]
    DuplicateAnswer,
    #[error("invalid option")]
    InvalidOption,
    #[error("player eliminated")]
    PlayerEliminated,

    #[error("transition not allowed: {0}")]
    TransitionNotAllowed(String),
    #[error("scheduler busy")]
    SchedulerBusy,

    #[error("not found")]
    NotFound,
    #[error("conflict: {0}")]
    Conflict(String),
    #[error("transient I/O error: {0}")]
    TransientIo(String),

    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
}

impl EngineError {
    #[must_use]
    pub fn status(&self) -> StatusCode {
        match self {
            EngineError::Unauthenticated
            | EngineError::TokenExpired
            | EngineError::TokenMalformed
            | EngineError::TokenInvalidated => StatusCode::UNAUTHORIZED,
            EngineError::Forbidden | EngineError::PlayerEliminated => StatusCode::FORBIDDEN,
            EngineError::TooManyConnections => StatusCode::TOO_MANY_REQUESTS,
            EngineError::BadHandshake(_) => StatusCode::BAD_REQUEST,
            EngineError::QuizNotFound | EngineError::NotFound => StatusCode::NOT_FOUND,
            EngineError::QuizNotJoinable
            | EngineError::AnswerWindowClosed
            | EngineError::DuplicateAnswer
            | EngineError::InvalidOption
            | EngineError::UnknownMessageType(_)
            | EngineError::ProtocolViolation(_)
            | EngineError::PayloadTooLarge
            | EngineError::TransitionNotAllowed(_) => StatusCode::BAD_REQUEST,
            EngineError::Conflict(_) => StatusCode::CONFLICT,
            EngineError::SchedulerBusy | EngineError::SlowConsumer => StatusCode::SERVICE_UNAVAILABLE,
            EngineError::TransientIo(_) | EngineError::Database(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }

    #[must_use]
    pub fn code(&self) -> &'static str {
        match self {
            EngineError::Unauthenticated => "UNAUTHENTICATED",
            EngineError::Forbidden => "FORBIDDEN",
            EngineError::TokenExpired => "TOKEN_EXPIRED",
            EngineError::TokenMalformed => "TOKEN_MALFORMED",
            EngineError::TokenInvalidated => "TOKEN_INVALIDATED",
            EngineError::TooManyConnections => "TOO_MANY_CONNECTIONS",
            EngineError::BadHandshake(_) => "BAD_HANDSHAKE",
            EngineError::SlowConsumer => "SLOW_CONSUMER",
            EngineError::ProtocolViolation(_) => "PROTOCOL_VIOLATION",
            EngineError::PayloadTooLarge => "PAYLOAD_TOO_LARGE",
            EngineError::UnknownMessageType(_) => "UNKNOWN_MESSAGE_TYPE",
            EngineError::QuizNotFound => "QUIZ_NOT_FOUND",
            EngineError::QuizNotJoinable => "QUIZ_NOT_JOINABLE",
            EngineError::AnswerWindowClosed => "ANSWER_WINDOW_CLOSED",
            EngineError::DuplicateAnswer => "DUPLICATE_ANSWER",
            EngineError::InvalidOption => "INVALID_OPTION",
            EngineError::PlayerEliminated => "PLAYER_ELIMINATED",
            EngineError::TransitionNotAllowed(_) => "TRANSITION_NOT_ALLOWED",
            EngineError::SchedulerBusy => "SCHEDULER_BUSY",
            EngineError::NotFound => "NOT_FOUND",
            EngineError::Conflict(_) => "CONFLICT",
            EngineError::TransientIo(_) | EngineError::Database(_) => "INTERNAL_ERROR",
        }
    }
}

impl From<EngineError> for HttpResponse {
    fn from(err: EngineError) -> Self {
        json_error(err.status(), err.code(), err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn token_invalidated_maps_to_401() {
        assert_eq!(EngineError::TokenInvalidated.status(), StatusCode::UNAUTHORIZED);
        assert_eq!(EngineError::TokenInvalidated.code(), "TOKEN_INVALIDATED");
    }

    #[test]
    fn too_many_connections_maps_to_429() {
        assert_eq!(EngineError::TooManyConnections.status(), StatusCode::TOO_MANY_REQUESTS);
    }

    #[test]
    fn player_eliminated_maps_to_403() {
        assert_eq!(EngineError::PlayerEliminated.status(), StatusCode::FORBIDDEN);
    }
}
