//! Crawler error taxonomy

use crate::models::TranscriptKind;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum CrawlerError {
    #[error("Missing required field {field}")]
    Data { field: String },

    #[error("Invalid {field}: {raw}")]
    Parsing { field: String, raw: String },

    #[error("Network error for {url}: {message}")]
    Network { url: String, message: String },

    #[error("TLS error for {url}: {message}")]
    Ssl { url: String, message: String },

    #[error("Request to {url} timed out")]
    Timeout { url: String },

    #[error("API error for ivod {ivod_id}: {message}")]
    Api { ivod_id: i64, message: String },

    #[error("Empty {kind} transcript for ivod {ivod_id}")]
    Transcript { ivod_id: i64, kind: TranscriptKind },

    #[error("Retry limit reached for ivod {ivod_id} ({retries}/{max_retries})")]
    RetryLimit {
        ivod_id: i64,
        retries: i32,
        max_retries: i32,
    },
}

impl CrawlerError {
    /// Whether the failure is transport-level and worth an immediate retry
    #[must_use]
    pub const fn is_transient(&self) -> bool {
        matches!(
            self,
            Self::Network { .. } | Self::Ssl { .. } | Self::Timeout { .. }
        )
    }
}
