// src/error.rs

use thiserror::Error;

/// Why a single page request did not yield records.
#[derive(Debug, Error)]
pub enum PageError {
    #[error("request to {url} failed: {message}")]
    Transport { url: String, message: String },

    #[error("{url} returned HTTP {status}")]
    Status { url: String, status: u16 },

    #[error("could not decode page body from {url}: {message}")]
    Decode { url: String, message: String },
}

impl PageError {
    /// Transport errors, throttling and server errors are worth another attempt.
    pub fn is_retryable(&self) -> bool {
        match self {
            PageError::Transport { .. } => true,
            PageError::Status { status, .. } => *status == 429 || *status >= 500,
            PageError::Decode { .. } => false,
        }
    }

    pub fn status(&self) -> Option<u16> {
        match self {
            PageError::Status { status, .. } => Some(*status),
            _ => None,
        }
    }
}

/// Fatal failures of a pipeline run.
#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("page {page} (offset {offset}) failed after {attempts} attempt(s): {source}")]
    PageFailed {
        page: usize,
        offset: usize,
        attempts: u32,
        #[source]
        source: PageError,
    },

    #[error("date column `{column}` is missing from the extracted table")]
    MissingDateColumn { column: String },

    #[error("row {row}: `{value}` in column `{column}` is not a date")]
    DateNormalization {
        column: String,
        row: usize,
        value: String,
    },

    #[error("another run holds the lock at {path}")]
    RunLocked { path: String },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn server_errors_and_throttling_are_retryable() {
        let url = "http://x".to_string();
        assert!(PageError::Status { url: url.clone(), status: 503 }.is_retryable());
        assert!(PageError::Status { url: url.clone(), status: 429 }.is_retryable());
        assert!(!PageError::Status { url: url.clone(), status: 404 }.is_retryable());
        assert!(!PageError::Decode { url, message: "eof".into() }.is_retryable());
    }
}
