//! API error types with HTTP response mapping.

use axum::extract::rejection::{JsonRejection, QueryRejection};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use projections::ProjectionError;
use thiserror::Error;

/// What callers see when a store failure should be retried.
const UNAVAILABLE: &str = "results unavailable, retry";

/// API-level error type that maps to HTTP responses.
#[derive(Debug, Error)]
pub enum ApiError {
    /// Resource not found.
    #[error("{0}")]
    NotFound(String),
    /// Bad request from the client.
    #[error("{0}")]
    BadRequest(String),
    /// The request body could not be read as JSON of the expected shape.
    #[error(transparent)]
    Body(#[from] JsonRejection),
    /// The query string could not be read into the expected parameters.
    #[error(transparent)]
    Query(#[from] QueryRejection),
    /// Projection or query failure.
    #[error(transparent)]
    Projection(#[from] ProjectionError),
}

impl ApiError {
    fn status_and_message(&self) -> (StatusCode, String, bool) {
        match self {
            ApiError::NotFound(msg) => (StatusCode::NOT_FOUND, msg.clone(), false),
            ApiError::BadRequest(msg) => (StatusCode::BAD_REQUEST, msg.clone(), false),
            ApiError::Body(rejection) => (rejection.status(), rejection.body_text(), false),
            ApiError::Query(rejection) => (rejection.status(), rejection.body_text(), false),
            ApiError::Projection(err) => match err {
                ProjectionError::MalformedRequest(_) => {
                    (StatusCode::BAD_REQUEST, err.to_string(), false)
                }
                ProjectionError::MalformedEvent(_) | ProjectionError::Deserialization(_) => {
                    (StatusCode::UNPROCESSABLE_ENTITY, err.to_string(), false)
                }
                _ if err.is_retryable() => {
                    (StatusCode::SERVICE_UNAVAILABLE, UNAVAILABLE.to_string(), true)
                }
                _ => (StatusCode::INTERNAL_SERVER_ERROR, err.to_string(), false),
            },
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, message, retryable) = self.status_and_message();

        if status.is_server_error() {
            tracing::error!(error = %self, %status, "request failed");
        } else {
            tracing::debug!(error = %self, %status, "request rejected");
        }

        let body = serde_json::json!({ "error": message, "retryable": retryable });
        (status, axum::Json(body)).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use read_model::{ReadModelError, Sequence};
    use std::time::Duration;

    #[test]
    fn maps_projection_errors_to_statuses() {
        let cases = [
            (
                ApiError::from(ProjectionError::MalformedRequest("limit".into())),
                StatusCode::BAD_REQUEST,
            ),
            (
                ApiError::from(ProjectionError::MalformedEvent("no name".into())),
                StatusCode::UNPROCESSABLE_ENTITY,
            ),
            (
                ApiError::from(ProjectionError::Timeout(Duration::from_millis(5))),
                StatusCode::SERVICE_UNAVAILABLE,
            ),
            (
                ApiError::from(ProjectionError::from(ReadModelError::StoreUnavailable(
                    "down".into(),
                ))),
                StatusCode::SERVICE_UNAVAILABLE,
            ),
            (
                ApiError::from(ProjectionError::from(ReadModelError::SequenceOutOfRange(
                    Sequence::new(u64::MAX),
                ))),
                StatusCode::INTERNAL_SERVER_ERROR,
            ),
            (
                ApiError::NotFound("orders".into()),
                StatusCode::NOT_FOUND,
            ),
        ];
        for (err, expected) in cases {
            assert_eq!(err.into_response().status(), expected);
        }
    }
}
