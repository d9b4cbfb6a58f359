//! Risk mitigation error types

use thiserror::Error;

/// Risk mitigation error types
#[derive(Debug, Error)]
pub enum MitigationError {
    /// Malformed attribute vector, lever definition or lever value
    #[error("Validation failed: {field} - {reason}")]
    Validation { field: String, reason: String },

    /// External scorer unreachable, timed out or answered with garbage
    #[error("Scoring unavailable: {reason}")]
    ScoringUnavailable { reason: String },

    /// Lever id not present in the catalog
    #[error("Unknown lever: {lever_id}")]
    UnknownLever { lever_id: String },

    /// Session id not present in the registry
    #[error("Unknown session: {session_id}")]
    UnknownSession { session_id: String },

    /// Snapshot could not be restored
    #[error("Snapshot error: {reason}")]
    Snapshot { reason: String },

    /// Configuration error
    #[error("Configuration error: {message}")]
    Configuration { message: String },

    /// JSON serialization/deserialization error
    #[error("JSON error: {source}")]
    Json {
        #[from]
        source: serde_json::Error,
    },

    /// I/O error
    #[error("I/O error: {source}")]
    Io {
        #[from]
        source: std::io::Error,
    },
}

impl MitigationError {
    pub(crate) fn validation(field: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Validation {
            field: field.into(),
            reason: reason.into(),
        }
    }

    pub(crate) fn scoring_unavailable(reason: impl Into<String>) -> Self {
        Self::ScoringUnavailable {
            reason: reason.into(),
        }
    }

    /// Whether the caller can keep working with the last known state
    pub fn is_recoverable(&self) -> bool {
        matches!(self, Self::ScoringUnavailable { .. })
    }
}

impl From<reqwest::Error> for MitigationError {
    fn from(source: reqwest::Error) -> Self {
        Self::ScoringUnavailable {
            reason: source.to_string(),
        }
    }
}

/// Risk mitigation result type
pub type MitigationResult<T> = Result<T, MitigationError>;
