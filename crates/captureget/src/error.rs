use std::fmt;

use axum::extract::multipart::MultipartError;
use axum::extract::rejection::{JsonRejection, QueryRejection};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Serialize;
use tracing::error;

use crate::config::ConfigError;
use crate::identity::TokenError;
use crate::pagination::PaginationError;
use crate::pipeline::{BlobError, PipelineError, RepositoryError};
use crate::telemetry::TelemetryError;

/// Startup and process-level failures.
#[derive(Debug)]
pub enum AppError {
    Config(ConfigError),
    Telemetry(TelemetryError),
    Io(std::io::Error),
    Server(axum::Error),
    Store(RepositoryError),
    Token(TokenError),
}

impl fmt::Display for AppError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AppError::Config(err) => write!(f, "configuration error: {}", err),
            AppError::Telemetry(err) => write!(f, "telemetry error: {}", err),
            AppError::Io(err) => write!(f, "io error: {}", err),
            AppError::Server(err) => write!(f, "server error: {}", err),
            AppError::Store(err) => write!(f, "store error: {}", err),
            AppError::Token(err) => write!(f, "token error: {}", err),
        }
    }
}

impl std::error::Error for AppError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            AppError::Config(err) => Some(err),
            AppError::Telemetry(err) => Some(err),
            AppError::Io(err) => Some(err),
            AppError::Server(err) => Some(err),
            AppError::Store(err) => Some(err),
            AppError::Token(err) => Some(err),
        }
    }
}

impl From<ConfigError> for AppError {
    fn from(value: ConfigError) -> Self {
        Self::Config(value)
    }
}

impl From<TelemetryError> for AppError {
    fn from(value: TelemetryError) -> Self {
        Self::Telemetry(value)
    }
}

impl From<std::io::Error> for AppError {
    fn from(value: std::io::Error) -> Self {
        Self::Io(value)
    }
}

impl From<axum::Error> for AppError {
    fn from(value: axum::Error) -> Self {
        Self::Server(value)
    }
}

impl From<RepositoryError> for AppError {
    fn from(value: RepositoryError) -> Self {
        Self::Store(value)
    }
}

impl From<TokenError> for AppError {
    fn from(value: TokenError) -> Self {
        Self::Token(value)
    }
}

/// Request-level failure rendered as `{"message": ...}` with the matching status.
#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error("{0}")]
    Validation(String),
    #[error("{0}")]
    Unauthorized(String),
    #[error("{0}")]
    Forbidden(String),
    #[error("{0}")]
    NotFound(String),
    #[error("{0}")]
    Conflict(String),
    #[error("{0}")]
    Internal(String),
}

#[derive(Serialize)]
struct ErrorBody {
    message: String,
}

impl ApiError {
    pub fn status_code(&self) -> StatusCode {
        match self {
            ApiError::Validation(_) => StatusCode::BAD_REQUEST,
            ApiError::Unauthorized(_) => StatusCode::UNAUTHORIZED,
            ApiError::Forbidden(_) => StatusCode::FORBIDDEN,
            ApiError::NotFound(_) => StatusCode::NOT_FOUND,
            ApiError::Conflict(_) => StatusCode::CONFLICT,
            ApiError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Internal details stay in the logs.
    fn public_message(&self) -> String {
        match self {
            ApiError::Internal(_) => "internal server error".to_string(),
            other => other.to_string(),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        if let ApiError::Internal(detail) = &self {
            error!(status = %status, error = %detail, "request failed");
        }
        let body = Json(ErrorBody {
            message: self.public_message(),
        });
        (status, body).into_response()
    }
}

impl From<PipelineError> for ApiError {
    fn from(value: PipelineError) -> Self {
        let message = value.to_string();
        match value {
            PipelineError::ApplicationNotFound
            | PipelineError::StepNotFound
            | PipelineError::JobNotFound
            | PipelineError::CustomFieldNotFound
            | PipelineError::CandidateNotFound
            | PipelineError::CompanyNotFound => ApiError::NotFound(message),
            PipelineError::Invalid(_) | PipelineError::CustomField(_) => {
                ApiError::Validation(message)
            }
            PipelineError::DuplicateStep(_) | PipelineError::ConcurrentUpdate => {
                ApiError::Conflict(message)
            }
            PipelineError::Repository(err) => err.into(),
            PipelineError::Blob(err) => err.into(),
        }
    }
}

impl From<RepositoryError> for ApiError {
    fn from(value: RepositoryError) -> Self {
        match value {
            RepositoryError::Conflict | RepositoryError::StaleRevision => {
                ApiError::Conflict(value.to_string())
            }
            RepositoryError::NotFound => ApiError::NotFound(value.to_string()),
            RepositoryError::Unavailable(_) | RepositoryError::Corrupt(_) => {
                ApiError::Internal(value.to_string())
            }
        }
    }
}

impl From<BlobError> for ApiError {
    fn from(value: BlobError) -> Self {
        match value {
            BlobError::Rejected(_) => ApiError::Validation(value.to_string()),
            BlobError::NotFound(_) => ApiError::NotFound(value.to_string()),
            BlobError::Unavailable(_) => ApiError::Internal(value.to_string()),
        }
    }
}

impl From<PaginationError> for ApiError {
    fn from(value: PaginationError) -> Self {
        ApiError::Validation(value.to_string())
    }
}

impl From<JsonRejection> for ApiError {
    fn from(value: JsonRejection) -> Self {
        ApiError::Validation(value.body_text())
    }
}

impl From<QueryRejection> for ApiError {
    fn from(value: QueryRejection) -> Self {
        ApiError::Validation(value.body_text())
    }
}

impl From<MultipartError> for ApiError {
    fn from(value: MultipartError) -> Self {
        ApiError::Validation(value.body_text())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::InvalidInput;

    async fn body_of(response: Response) -> serde_json::Value {
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .expect("body reads");
        serde_json::from_slice(&bytes).expect("body is json")
    }

    #[tokio::test]
    async fn internal_details_are_not_exposed() {
        let response = ApiError::from(RepositoryError::Unavailable("disk /var/db full".into()))
            .into_response();
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
        let body = body_of(response).await;
        assert_eq!(body["message"], "internal server error");
    }

    #[tokio::test]
    async fn pipeline_errors_map_to_statuses() {
        let cases = [
            (PipelineError::JobNotFound, StatusCode::NOT_FOUND),
            (
                PipelineError::Invalid(InvalidInput("title too short".into())),
                StatusCode::BAD_REQUEST,
            ),
            (
                PipelineError::DuplicateStep("Phone Screen".into()),
                StatusCode::CONFLICT,
            ),
            (PipelineError::ConcurrentUpdate, StatusCode::CONFLICT),
            (
                PipelineError::Blob(BlobError::Rejected("file type not allowed".into())),
                StatusCode::BAD_REQUEST,
            ),
        ];
        for (err, status) in cases {
            assert_eq!(ApiError::from(err).status_code(), status);
        }

        let body = body_of(ApiError::from(PipelineError::JobNotFound).into_response()).await;
        assert_eq!(body["message"], "job not found");
    }
}
