use thiserror::Error;
use tonic::Status;

/// SQLSTATE codes the transaction wrapper treats as retryable.
const SERIALIZATION_FAILURE: &str = "40001";
const DEADLOCK_DETECTED: &str = "40P01";
const UNIQUE_VIOLATION: &str = "23505";

#[derive(Error, Debug)]
pub enum AppError {
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Forbidden: {0}")]
    Forbidden(String),

    #[error("Invalid state: {0}")]
    InvalidState(String),

    #[error("Already exists: {0}")]
    AlreadyExists(String),

    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    #[error("Authentication required: {0}")]
    Unauthenticated(String),

    #[error("Transient failure: {0}")]
    Transient(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl AppError {
    /// True for conflicts that a fresh transaction attempt may resolve.
    pub fn is_retryable(&self) -> bool {
        match self {
            AppError::Database(e) => {
                matches!(sql_state(e).as_deref(), Some(SERIALIZATION_FAILURE | DEADLOCK_DETECTED))
            }
            _ => false,
        }
    }

    /// Maps a unique-constraint violation to `AlreadyExists`, leaving other errors untouched.
    pub fn on_unique_violation(err: sqlx::Error, what: &str) -> Self {
        if sql_state(&err).as_deref() == Some(UNIQUE_VIOLATION) {
            AppError::AlreadyExists(what.to_string())
        } else {
            AppError::Database(err)
        }
    }
}

fn sql_state(err: &sqlx::Error) -> Option<String> {
    match err {
        sqlx::Error::Database(db) => db.code().map(|c| c.into_owned()),
        _ => None,
    }
}

impl From<AppError> for Status {
    fn from(err: AppError) -> Self {
        match err {
            AppError::Database(e) => {
                tracing::error!("Database error: {}", e);
                Status::internal(format!("Database error: {}", e))
            }
            AppError::NotFound(msg) => Status::not_found(msg),
            AppError::Forbidden(msg) => Status::permission_denied(msg),
            AppError::InvalidState(msg) => Status::failed_precondition(msg),
            AppError::AlreadyExists(msg) => Status::already_exists(msg),
            AppError::InvalidArgument(msg) => Status::invalid_argument(msg),
            AppError::Unauthenticated(msg) => Status::unauthenticated(msg),
            AppError::Transient(msg) => Status::unavailable(msg),
            AppError::Internal(msg) => Status::internal(msg),
        }
    }
}

pub type AppResult<T> = Result<T, AppError>;
