//! Database error types

use thiserror::Error;

#[derive(Debug, Error)]
pub enum DbError {
    #[error("Database error: {0}")]
    Sqlx(#[from] sqlx::Error),

    #[error("Record not found: {0}")]
    NotFound(i64),

    #[error("Session is closed")]
    SessionClosed,

    #[error("Invalid stored value in {column}: {message}")]
    Decode {
        column: &'static str,
        message: String,
    },

    #[error("Unsupported database URL scheme: {0}")]
    UnsupportedScheme(String),
}
