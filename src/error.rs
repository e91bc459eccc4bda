//! Error taxonomy shared by the store, registries, and orchestrator.
//!
//! Storage-level components return [`Result`] directly. Collaborators and
//! the workflow layer work with `anyhow::Error`, and the orchestrator
//! recovers the variant with `downcast_ref::<DocflowError>()` when it maps
//! an outcome onto a terminal task status.

use thiserror::Error;

/// Result alias for storage and registry operations.
pub type Result<T> = std::result::Result<T, DocflowError>;

#[derive(Debug, Error)]
pub enum DocflowError {
    /// Requested content, artifact, task, or document is absent.
    #[error("{kind} not found: {key}")]
    NotFound { kind: &'static str, key: String },

    /// The loader spec was already registered; carries the existing hash.
    #[error("document already registered as {hash}")]
    DuplicateRegistration { hash: String },

    #[error("no loader can process url: {0}")]
    UnsupportedUrl(String),

    #[error("no content could be extracted from {url}")]
    NoContentExtracted { url: String },

    /// Analysis ran but produced nothing usable.
    #[error("{0}")]
    ProcessingFailure(String),

    #[error("task {task_name} for {hash} cannot move from {from} to {to}")]
    InvalidTransition {
        hash: String,
        task_name: String,
        from: String,
        to: String,
    },

    #[error("task deadline exceeded")]
    Timeout,

    #[error("task cancelled")]
    Cancelled,

    /// The worker queue cannot take more jobs right now.
    #[error("worker queue is full")]
    QueueFull,

    #[error("storage error: {0}")]
    Storage(#[from] std::io::Error),

    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl DocflowError {
    pub fn not_found(kind: &'static str, key: impl Into<String>) -> Self {
        DocflowError::NotFound {
            kind,
            key: key.into(),
        }
    }

    /// True for errors a caller should treat as "not yet processed".
    pub fn is_not_found(&self) -> bool {
        matches!(self, DocflowError::NotFound { .. })
    }
}

/// Returns true if `err` wraps a [`DocflowError::NotFound`].
pub fn is_not_found(err: &anyhow::Error) -> bool {
    err.downcast_ref::<DocflowError>()
        .map(DocflowError::is_not_found)
        .unwrap_or(false)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_not_found_survives_anyhow_wrapping() {
        let err: anyhow::Error = DocflowError::not_found("summary", "abc").into();
        assert!(is_not_found(&err));
        assert_eq!(err.to_string(), "summary not found: abc");
    }

    #[test]
    fn test_context_does_not_hide_variant() {
        let err = anyhow::Error::from(DocflowError::Cancelled).context("running summarize");
        assert!(matches!(
            err.downcast_ref::<DocflowError>(),
            Some(DocflowError::Cancelled)
        ));
        assert!(!is_not_found(&err));
    }
}
