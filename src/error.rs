//! Error types for Lending Desk

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use thiserror::Error;

/// Stable numeric error codes exposed to API clients
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u32)]
pub enum ErrorCode {
    Failure = 1,
    NotFound = 2,
    InvalidArgument = 3,
    NoCopiesAvailable = 4,
    NoActiveLoan = 5,
    LoanAlreadyReturned = 6,
    CorruptState = 7,
    Conflict = 8,
    DbFailure = 9,
    CacheFailure = 10,
    QueueFailure = 11,
}

/// Main application error type
#[derive(Error, Debug)]
pub enum AppError {
    /// The addressed resource does not exist
    #[error("Not found: {0}")]
    NotFound(String),

    /// An entity referenced from a request body does not exist
    #[error("{0}")]
    UnknownReference(String),

    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    #[error("No available copies of book {book_id}")]
    NoCopiesAvailable { book_id: i32 },

    #[error("Active loan does not exist for book {book_id} and member {member_id}")]
    NoActiveLoan { book_id: i32, member_id: i32 },

    #[error("Loan {loan_id} has already been returned")]
    LoanAlreadyReturned { loan_id: i32 },

    /// A stored invariant no longer holds; points at an earlier atomicity failure
    #[error("Corrupt state: {0}")]
    CorruptState(String),

    #[error("Conflict: {0}")]
    Conflict(String),

    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Cache error: {0}")]
    Cache(String),

    #[error("Task queue error: {0}")]
    Queue(String),

    #[error("Internal server error: {0}")]
    Internal(String),
}

impl AppError {
    pub fn code(&self) -> ErrorCode {
        match self {
            AppError::NotFound(_) | AppError::UnknownReference(_) => ErrorCode::NotFound,
            AppError::InvalidArgument(_) => ErrorCode::InvalidArgument,
            AppError::NoCopiesAvailable { .. } => ErrorCode::NoCopiesAvailable,
            AppError::NoActiveLoan { .. } => ErrorCode::NoActiveLoan,
            AppError::LoanAlreadyReturned { .. } => ErrorCode::LoanAlreadyReturned,
            AppError::CorruptState(_) => ErrorCode::CorruptState,
            AppError::Conflict(_) => ErrorCode::Conflict,
            AppError::Database(_) => ErrorCode::DbFailure,
            AppError::Cache(_) => ErrorCode::CacheFailure,
            AppError::Queue(_) => ErrorCode::QueueFailure,
            AppError::Internal(_) => ErrorCode::Failure,
        }
    }

    pub fn status(&self) -> StatusCode {
        match self {
            AppError::NotFound(_) => StatusCode::NOT_FOUND,
            AppError::UnknownReference(_)
            | AppError::InvalidArgument(_)
            | AppError::NoCopiesAvailable { .. }
            | AppError::NoActiveLoan { .. }
            | AppError::LoanAlreadyReturned { .. } => StatusCode::BAD_REQUEST,
            AppError::Conflict(_) => StatusCode::CONFLICT,
            AppError::CorruptState(_)
            | AppError::Database(_)
            | AppError::Cache(_)
            | AppError::Queue(_)
            | AppError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl From<redis::RedisError> for AppError {
    fn from(e: redis::RedisError) -> Self {
        AppError::Cache(e.to_string())
    }
}

impl From<validator::ValidationErrors> for AppError {
    fn from(e: validator::ValidationErrors) -> Self {
        AppError::InvalidArgument(e.to_string())
    }
}

/// Error response body
#[derive(Serialize, utoipa::ToSchema)]
pub struct ErrorResponse {
    pub code: u32,
    pub kind: String,
    pub error: String,
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = self.status();
        let code = self.code();

        let error = match &self {
            AppError::CorruptState(msg) => {
                tracing::error!("Corrupt state reported to client: {}", msg);
                self.to_string()
            }
            AppError::Database(e) => {
                tracing::error!("Database error: {:?}", e);
                "Database error".to_string()
            }
            AppError::Cache(msg) => {
                tracing::error!("Cache error: {}", msg);
                "Cache error".to_string()
            }
            AppError::Queue(msg) => {
                tracing::error!("Task queue error: {}", msg);
                "Task queue error".to_string()
            }
            AppError::Internal(msg) => {
                tracing::error!("Internal error: {}", msg);
                "Internal server error".to_string()
            }
            _ => self.to_string(),
        };

        let body = Json(ErrorResponse {
            code: code as u32,
            kind: format!("{:?}", code),
            error,
        });

        (status, body).into_response()
    }
}

/// Result type alias for application operations
pub type AppResult<T> = Result<T, AppError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lending_rule_failures_are_client_errors() {
        assert_eq!(
            AppError::NoCopiesAvailable { book_id: 1 }.status(),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            AppError::NoActiveLoan { book_id: 1, member_id: 2 }.status(),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            AppError::LoanAlreadyReturned { loan_id: 3 }.status(),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            AppError::UnknownReference("Member 9 does not exist".into()).status(),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(AppError::NotFound("Book 9".into()).status(), StatusCode::NOT_FOUND);
    }

    #[test]
    fn unknown_reference_shares_the_not_found_code() {
        let err = AppError::UnknownReference("Member 4 does not exist".into());
        assert_eq!(err.code(), ErrorCode::NotFound);
        assert_eq!(err.to_string(), "Member 4 does not exist");
    }

    #[test]
    fn corrupt_state_is_a_server_error() {
        let err = AppError::CorruptState("book 1 above total".into());
        assert_eq!(err.status(), StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(err.code(), ErrorCode::CorruptState);
    }
}
