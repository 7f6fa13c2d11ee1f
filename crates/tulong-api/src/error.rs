use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use tracing::error;

use tulong_lifecycle::LifecycleError;
use tulong_types::api::ErrorResponse;

/// Error returned by every handler: a status code plus a JSON body carrying
/// the message shown to the user. There is no retry machinery; each failure
/// is terminal for that user action.
#[derive(Debug)]
pub struct ApiError {
    pub status: StatusCode,
    pub message: String,
}

impl ApiError {
    pub fn new(status: StatusCode, message: impl Into<String>) -> Self {
        Self {
            status,
            message: message.into(),
        }
    }

    pub fn bad_request(message: impl Into<String>) -> Self {
        Self::new(StatusCode::BAD_REQUEST, message)
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self::new(StatusCode::NOT_FOUND, message)
    }

    pub fn forbidden(message: impl Into<String>) -> Self {
        Self::new(StatusCode::FORBIDDEN, message)
    }

    pub fn internal() -> Self {
        Self::new(StatusCode::INTERNAL_SERVER_ERROR, "internal server error")
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (
            self.status,
            Json(ErrorResponse {
                error: self.message,
            }),
        )
            .into_response()
    }
}

impl From<anyhow::Error> for ApiError {
    fn from(err: anyhow::Error) -> Self {
        error!("storage error: {:#}", err);
        Self::internal()
    }
}

impl From<LifecycleError> for ApiError {
    fn from(err: LifecycleError) -> Self {
        let status = match &err {
            LifecycleError::NotFound => StatusCode::NOT_FOUND,
            LifecycleError::OwnErrand
            | LifecycleError::NotHelper
            | LifecycleError::Forbidden => StatusCode::FORBIDDEN,
            LifecycleError::WrongStatus { .. } => StatusCode::CONFLICT,
            LifecycleError::Storage(inner) => {
                error!("lifecycle storage error: {:#}", inner);
                return Self::internal();
            }
        };
        Self::new(status, err.to_string())
    }
}

/// spawn_blocking join failures are bugs, not user errors.
pub fn join_error(err: tokio::task::JoinError) -> ApiError {
    error!("spawn_blocking join error: {}", err);
    ApiError::internal()
}
