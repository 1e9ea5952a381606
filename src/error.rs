//! Domain errors surfaced to API clients.
//!
//! Every variant carries a stable code. Clients receive
//! `{"error": {"code": ..., "message": ...}}`; unclassified failures are
//! logged and reported with a generic message only.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use thiserror::Error;
use tracing::error;

use crate::storage::StoreError;

/// Result type for service operations
pub type ApiResult<T> = Result<T, ApiError>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorCode {
    InvalidRequest,
    UserNotInit,
    Unauthorized,
    InvalidCredentials,
    Forbidden,
    NonExistentAccount,
    NotFound,
    ChallengeStarted,
    ChallengeOver,
    ChallengeNotOver,
    ChallengeNotRunning,
    ExistingUsername,
    ExistingAccount,
    UnknownError,
}

#[derive(Error, Debug)]
pub enum ApiError {
    #[error("{0}")]
    InvalidRequest(String),

    #[error("{0}")]
    UserNotInit(String),

    #[error("Unauthorised request.")]
    Unauthorized,

    #[error("Invalid credentials given.")]
    InvalidCredentials,

    #[error("{0}")]
    Forbidden(String),

    #[error("{0}")]
    NonExistentAccount(String),

    #[error("{0}")]
    NotFound(String),

    #[error("Challenge has already started.")]
    ChallengeStarted,

    #[error("Challenge is over.")]
    ChallengeOver,

    #[error("Challenge is not over.")]
    ChallengeNotOver,

    #[error("Challenge is not running.")]
    ChallengeNotRunning,

    #[error("Username already exists.")]
    ExistingUsername,

    #[error("Account already exists.")]
    ExistingAccount,

    #[error("Internal error: {0}")]
    Internal(String),
}

impl ApiError {
    pub fn code(&self) -> ErrorCode {
        match self {
            Self::InvalidRequest(_) => ErrorCode::InvalidRequest,
            Self::UserNotInit(_) => ErrorCode::UserNotInit,
            Self::Unauthorized => ErrorCode::Unauthorized,
            Self::InvalidCredentials => ErrorCode::InvalidCredentials,
            Self::Forbidden(_) => ErrorCode::Forbidden,
            Self::NonExistentAccount(_) => ErrorCode::NonExistentAccount,
            Self::NotFound(_) => ErrorCode::NotFound,
            Self::ChallengeStarted => ErrorCode::ChallengeStarted,
            Self::ChallengeOver => ErrorCode::ChallengeOver,
            Self::ChallengeNotOver => ErrorCode::ChallengeNotOver,
            Self::ChallengeNotRunning => ErrorCode::ChallengeNotRunning,
            Self::ExistingUsername => ErrorCode::ExistingUsername,
            Self::ExistingAccount => ErrorCode::ExistingAccount,
            Self::Internal(_) => ErrorCode::UnknownError,
        }
    }

    pub fn status_code(&self) -> StatusCode {
        match self {
            Self::InvalidRequest(_) | Self::UserNotInit(_) => StatusCode::BAD_REQUEST,
            Self::Unauthorized | Self::InvalidCredentials => StatusCode::UNAUTHORIZED,
            Self::Forbidden(_) => StatusCode::FORBIDDEN,
            Self::NonExistentAccount(_) | Self::NotFound(_) => StatusCode::NOT_FOUND,
            Self::ChallengeStarted
            | Self::ChallengeOver
            | Self::ChallengeNotOver
            | Self::ChallengeNotRunning
            | Self::ExistingUsername
            | Self::ExistingAccount => StatusCode::CONFLICT,
            Self::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    pub fn challenge_not_found() -> Self {
        Self::NotFound("Challenge was not found.".to_string())
    }

    pub fn not_participant() -> Self {
        Self::NotFound("Participant was not found.".to_string())
    }

    /// Client-facing message; internal details never leave the process
    fn public_message(&self) -> String {
        match self {
            Self::Internal(_) => "Something unexpected happened.".to_string(),
            other => other.to_string(),
        }
    }
}

#[derive(Debug, Serialize)]
struct ErrorBody {
    error: ErrorDetail,
}

#[derive(Debug, Serialize)]
struct ErrorDetail {
    code: ErrorCode,
    message: String,
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        if let Self::Internal(detail) = &self {
            error!("Unhandled error: {}", detail);
        }

        let body = ErrorBody {
            error: ErrorDetail {
                code: self.code(),
                message: self.public_message(),
            },
        };

        (self.status_code(), Json(body)).into_response()
    }
}

impl From<StoreError> for ApiError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::UniqueViolation { constraint } if constraint.contains("username") => {
                ApiError::ExistingUsername
            }
            StoreError::UniqueViolation { constraint } if constraint.contains("email") => {
                ApiError::ExistingAccount
            }
            StoreError::RowMissing => ApiError::NotFound("Record was not found.".to_string()),
            other => ApiError::Internal(other.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_internal_error_hides_detail() {
        let response = ApiError::Internal("connection reset by peer".to_string()).into_response();
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);

        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        let body: serde_json::Value = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(body["error"]["code"], "UNKNOWN_ERROR");
        assert_eq!(body["error"]["message"], "Something unexpected happened.");
    }

    #[tokio::test]
    async fn test_domain_error_body() {
        let response = ApiError::ChallengeOver.into_response();
        assert_eq!(response.status(), StatusCode::CONFLICT);

        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        let body: serde_json::Value = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(body["error"]["code"], "CHALLENGE_OVER");
        assert_eq!(body["error"]["message"], "Challenge is over.");
    }

    #[test]
    fn test_store_error_mapping() {
        let err: ApiError = StoreError::UniqueViolation {
            constraint: "users_username_key".to_string(),
        }
        .into();
        assert_eq!(err.code(), ErrorCode::ExistingUsername);

        let err: ApiError = StoreError::UniqueViolation {
            constraint: "users_email_key".to_string(),
        }
        .into();
        assert_eq!(err.code(), ErrorCode::ExistingAccount);

        let err: ApiError = StoreError::RowMissing.into();
        assert_eq!(err.code(), ErrorCode::NotFound);

        let err: ApiError = StoreError::Backend("pool timed out".to_string()).into();
        assert_eq!(err.code(), ErrorCode::UnknownError);
        assert_eq!(err.status_code(), StatusCode::INTERNAL_SERVER_ERROR);
    }
}
