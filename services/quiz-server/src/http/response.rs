use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use quiz_protocol::HttpErrorEnvelope;
use std::fmt::Display;

pub type HttpResponse = Response;
pub type HttpResult<T = ()> = Result<T, HttpResponse>;

pub(crate) fn json_error(
    status: StatusCode,
    code: impl Into<String>,
    message: impl Into<String>,
) -> HttpResponse {
    (
        status,
        Json(HttpErrorEnvelope {
            code: code.into(),
            message: message.into(),
            details: None,
        }),
    )
        .into_response()
}

pub fn internal_error(err: impl Display) -> HttpResponse {
    json_error(
        StatusCode::INTERNAL_SERVER_ERROR,
        "INTERNAL_ERROR",
        err.to_string(),
    )
}

pub fn bad_request(message: impl Into<String>) -> HttpResponse {
    json_error(StatusCode::BAD_REQUEST, "BAD_REQUEST", message)
}

pub fn not_found(message: impl Into<String>) -> HttpResponse {
    json_error(StatusCode::NOT_FOUND, "NOT_FOUND", message)
}

pub fn forbidden(message: impl Into<String>) -> HttpResponse {
    json_error(StatusCode::FORBIDDEN, "FORBIDDEN", message)
}

pub fn unauthorized(message: impl Into<String>) -> HttpResponse {
    json_error(StatusCode::UNAUTHORIZED, "UNAUTHENTICATED", message)
}

pub fn too_many_requests(message: impl Into<String>) -> HttpResponse {
    json_error(StatusCode::TOO_MANY_REQUESTS, "TOO_MANY_REQUESTS", message)
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::to_bytes;

    async fn assert_error_response(
        response: Response,
        expected_status: StatusCode,
        expected_code: &str,
        expected_message: &str,
    ) {
        assert_eq!(response.status(), expected_status);

        let body = to_bytes(response.into_body(), usize::MAX)
            .await
            .expect("response body should be readable");
        let parsed: HttpErrorEnvelope =
            serde_json::from_slice(&body).expect("response body should be valid error json");

        assert_eq!(parsed.code, expected_code);
        assert_eq!(parsed.message, expected_message);
        assert_eq!(parsed.details, None);
    }

    #[tokio::test]
    async fn internal_error_sets_internal_contract() {
        let response = internal_error("database unavailable");
        assert_error_response(
            response,
            StatusCode::INTERNAL_SERVER_ERROR,
            "INTERNAL_ERROR",
            "database unavailable",
        )
        .await;
    }

    #[tokio::test]
    async fn too_many_requests_sets_429_contract() {
        let response = too_many_requests("per-IP cap exceeded");
        assert_error_response(
            response,
            StatusCode::TOO_MANY_REQUESTS,
            "TOO_MANY_REQUESTS",
            "per-IP cap exceeded",
        )
        .await;
    }
}
