//! Error types for docforge.
//!
//! Library crates use [`DocforgeError`] via `thiserror`.
//! The CLI wraps this with `color-eyre` for rich diagnostics.
//!
//! Per-item failures (one asset, one output, one token) are caught and
//! recorded by the pipelines; only the batch-fatal variants
//! ([`DocforgeError::Embedding`], [`DocforgeError::ZeroChunks`]) abort a run.

use std::path::PathBuf;

/// Top-level error type for all docforge operations.
#[derive(Debug, thiserror::Error)]
pub enum DocforgeError {
    /// Configuration loading or validation error.
    #[error("config error: {message}")]
    Config { message: String },

    /// Malformed caller input, rejected before any work.
    #[error("validation error: {message}")]
    Validation { message: String },

    /// A referenced document set, asset, or package is missing.
    #[error("not found: {message}")]
    NotFound { message: String },

    /// Database or storage layer error.
    #[error("storage error: {0}")]
    Storage(String),

    /// Per-asset text extraction failure. Isolated and counted; the
    /// enclosing ingestion run continues.
    #[error("extraction error: {message}")]
    Extraction { message: String },

    /// Batch embedding call failure. Fatal to the enclosing ingestion run.
    #[error("embedding service unavailable: {0}")]
    Embedding(String),

    /// A package index produced no chunks at all. Fatal.
    #[error("ingestion produced zero chunks for document set {set_id}")]
    ZeroChunks { set_id: String },

    /// Per-output rendering failure, isolated into that output's result.
    #[error("render error: {message}")]
    Render { message: String },

    /// The completion service returned no parseable JSON object after
    /// the bounded retries.
    #[error("AI response invalid: {0}")]
    AiResponse(String),

    /// Zip archive read/write error while rewriting a structured document.
    #[error("archive error: {0}")]
    Archive(String),

    /// Filesystem I/O error.
    #[error("I/O error at {path:?}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },
}

/// Convenience alias used throughout the codebase.
pub type Result<T> = std::result::Result<T, DocforgeError>;

impl DocforgeError {
    /// Create a config error from any displayable message.
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config {
            message: msg.into(),
        }
    }

    /// Create a validation error from any displayable message.
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation {
            message: msg.into(),
        }
    }

    /// Create a not-found error from any displayable message.
    pub fn not_found(msg: impl Into<String>) -> Self {
        Self::NotFound {
            message: msg.into(),
        }
    }

    /// Create an extraction error from any displayable message.
    pub fn extraction(msg: impl Into<String>) -> Self {
        Self::Extraction {
            message: msg.into(),
        }
    }

    /// Create a render error from any displayable message.
    pub fn render(msg: impl Into<String>) -> Self {
        Self::Render {
            message: msg.into(),
        }
    }

    /// Wrap a `std::io::Error` with a path for context.
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }

    /// Whether this error aborts a whole ingestion run rather than a
    /// single item.
    pub fn is_run_fatal(&self) -> bool {
        matches!(self, Self::Embedding(_) | Self::ZeroChunks { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_display_formatting() {
        let err = DocforgeError::config("missing API key");
        assert_eq!(err.to_string(), "config error: missing API key");

        let err = DocforgeError::validation("package code must not be empty");
        assert!(err.to_string().contains("package code"));
    }

    #[test]
    fn fatal_classification() {
        assert!(DocforgeError::Embedding("timeout".into()).is_run_fatal());
        assert!(
            DocforgeError::ZeroChunks {
                set_id: "abc".into()
            }
            .is_run_fatal()
        );
        assert!(!DocforgeError::extraction("bad pdf").is_run_fatal());
        assert!(!DocforgeError::render("broken archive").is_run_fatal());
    }
}
