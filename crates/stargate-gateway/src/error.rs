use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use stargate_redirector::ResolveError;
use stargate_shortener::ShortenerError;
use tracing::error;

use crate::model::ErrorResponse;

pub type Result<T> = std::result::Result<T, AppError>;

#[derive(Debug, thiserror::Error)]
pub enum AppError {
    #[error(transparent)]
    Resolve(#[from] ResolveError),
    #[error(transparent)]
    Shortener(#[from] ShortenerError),
    #[error("link not found: {0}")]
    LinkNotFound(String),
}

impl AppError {
    fn status(&self) -> StatusCode {
        match self {
            AppError::Resolve(ResolveError::NotFound) | AppError::LinkNotFound(_) => {
                StatusCode::NOT_FOUND
            }
            AppError::Resolve(ResolveError::Forbidden) => StatusCode::FORBIDDEN,
            AppError::Resolve(ResolveError::Internal(_)) => StatusCode::INTERNAL_SERVER_ERROR,
            AppError::Shortener(err) => match err {
                ShortenerError::InvalidUrl(_)
                | ShortenerError::InvalidValidDate(_)
                | ShortenerError::InvalidShortCode(_) => {
                    StatusCode::BAD_REQUEST
                }
                ShortenerError::Conflict(_) => StatusCode::CONFLICT,
                ShortenerError::CodeSpaceExhausted { .. } => StatusCode::SERVICE_UNAVAILABLE,
                ShortenerError::Storage(_) | ShortenerError::Filter(_) | ShortenerError::Id(_) => {
                    StatusCode::INTERNAL_SERVER_ERROR
                }
            },
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() {
            error!(error = %self, "request failed");
        }
        // internal details stay in the log
        let message = if status == StatusCode::INTERNAL_SERVER_ERROR {
            "internal error".to_string()
        } else {
            self.to_string()
        };
        (status, Json(ErrorResponse { error: message })).into_response()
    }
}
