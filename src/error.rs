//! Error types for animedl

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Main error type for animedl operations
#[derive(Debug, Error)]
pub enum AnimedlError {
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Insufficient disk space: {available} bytes free, {required} required")]
    InsufficientSpace { available: u64, required: u64 },

    #[error("No candidate media URLs found on {0}")]
    NoCandidatesFound(String),

    #[error("Rate limited: {0}")]
    RateLimited(String),

    #[error("Transfer failed: {0}")]
    TransientTransferError(String),

    #[error("All candidates exhausted: {0}")]
    AllCandidatesExhausted(String),

    /// Raw failure reported by a transfer engine, before classification
    #[error("Transfer engine error: {0}")]
    Engine(String),

    #[error("Cancelled")]
    Cancelled,

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    JsonError(#[from] serde_json::Error),

    #[error("URL parsing error: {0}")]
    UrlError(#[from] url::ParseError),

    #[error("Regex error: {0}")]
    RegexError(#[from] regex::Error),

    #[error("Generic error: {0}")]
    Generic(String),
}

/// Serializable failure category reported in download results
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    InvalidInput,
    InsufficientSpace,
    NoCandidatesFound,
    RateLimited,
    TransientTransferError,
    AllCandidatesExhausted,
    Cancelled,
}

impl AnimedlError {
    /// Map the error onto its reporting category
    pub fn kind(&self) -> ErrorKind {
        match self {
            AnimedlError::InvalidInput(_) | AnimedlError::UrlError(_) => ErrorKind::InvalidInput,
            AnimedlError::InsufficientSpace { .. } => ErrorKind::InsufficientSpace,
            AnimedlError::NoCandidatesFound(_) => ErrorKind::NoCandidatesFound,
            AnimedlError::RateLimited(_) => ErrorKind::RateLimited,
            AnimedlError::AllCandidatesExhausted(_) => ErrorKind::AllCandidatesExhausted,
            AnimedlError::Cancelled => ErrorKind::Cancelled,
            AnimedlError::TransientTransferError(_)
            | AnimedlError::Engine(_)
            | AnimedlError::Http(_)
            | AnimedlError::IoError(_)
            | AnimedlError::JsonError(_)
            | AnimedlError::RegexError(_)
            | AnimedlError::Generic(_) => ErrorKind::TransientTransferError,
        }
    }

    /// Check if retrying cannot help
    pub fn is_fail_fast(&self) -> bool {
        matches!(
            self,
            AnimedlError::InvalidInput(_)
                | AnimedlError::UrlError(_)
                | AnimedlError::InsufficientSpace { .. }
        )
    }
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            ErrorKind::InvalidInput => "invalid input",
            ErrorKind::InsufficientSpace => "insufficient space",
            ErrorKind::NoCandidatesFound => "no candidates found",
            ErrorKind::RateLimited => "rate limited",
            ErrorKind::TransientTransferError => "transfer error",
            ErrorKind::AllCandidatesExhausted => "all candidates exhausted",
            ErrorKind::Cancelled => "cancelled",
        };
        f.write_str(name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_kind_mapping() {
        assert_eq!(
            AnimedlError::RateLimited("429".into()).kind(),
            ErrorKind::RateLimited
        );
        assert_eq!(
            AnimedlError::Engine("boom".into()).kind(),
            ErrorKind::TransientTransferError
        );
        assert_eq!(
            AnimedlError::InsufficientSpace {
                available: 1,
                required: 2
            }
            .kind(),
            ErrorKind::InsufficientSpace
        );
    }

    #[test]
    fn test_fail_fast() {
        assert!(AnimedlError::InvalidInput("x".into()).is_fail_fast());
        assert!(!AnimedlError::RateLimited("x".into()).is_fail_fast());
        assert!(!AnimedlError::Cancelled.is_fail_fast());
    }

    #[test]
    fn test_error_kind_serializes_snake_case() {
        let json = serde_json::to_string(&ErrorKind::AllCandidatesExhausted).unwrap();
        assert_eq!(json, "\"all_candidates_exhausted\"");
    }
}
