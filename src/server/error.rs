use crate::core::ReplayError;
use axum::Json;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde::Serialize;

#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error: String,
    pub code: String,
}

/// Error returned by the invocation endpoints.
#[derive(Debug)]
pub struct ApiError(pub ReplayError);

impl From<ReplayError> for ApiError {
    fn from(err: ReplayError) -> Self {
        Self(err)
    }
}

impl ApiError {
    fn status_and_code(&self) -> (StatusCode, &'static str) {
        match &self.0 {
            ReplayError::InvalidCursor { .. } => (StatusCode::BAD_REQUEST, "INVALID_CURSOR"),
            ReplayError::MalformedScript(_) => (StatusCode::BAD_REQUEST, "MALFORMED_SCRIPT"),
            ReplayError::Config(_) => (StatusCode::BAD_REQUEST, "CONFIG"),
            ReplayError::NotFound(_) => (StatusCode::NOT_FOUND, "NOT_FOUND"),
            ReplayError::Dispatch(_) => (StatusCode::BAD_GATEWAY, "DISPATCH"),
            ReplayError::StatementExecution { .. } => {
                (StatusCode::UNPROCESSABLE_ENTITY, "STATEMENT_EXECUTION")
            }
            ReplayError::Driver(_) => (StatusCode::BAD_GATEWAY, "DRIVER"),
            ReplayError::Storage(_) | ReplayError::Io(_) => {
                (StatusCode::INTERNAL_SERVER_ERROR, "STORAGE")
            }
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, code) = self.status_and_code();
        let body = ErrorResponse {
            error: self.0.to_string(),
            code: code.to_string(),
        };
        (status, Json(body)).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::Sequence;

    #[test]
    fn test_status_mapping() {
        let cases = [
            (
                ReplayError::InvalidCursor {
                    transaction: 0,
                    total: 1,
                },
                StatusCode::BAD_REQUEST,
            ),
            (ReplayError::NotFound(Sequence::FIRST), StatusCode::NOT_FOUND),
            (ReplayError::dispatch("down"), StatusCode::BAD_GATEWAY),
            (ReplayError::storage("disk"), StatusCode::INTERNAL_SERVER_ERROR),
        ];

        for (err, expected) in cases {
            assert_eq!(ApiError(err).into_response().status(), expected);
        }
    }
}
