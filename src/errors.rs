//! Application error model
//!
//! Defines a typed error hierarchy using `thiserror` for internal error
//! handling. Per-mailbox protocol errors carry the mailbox name so the
//! engine can format the aggregated error list the way the rest of the
//! CLI expects (`"<mailbox>: <err>"`).

use thiserror::Error;

/// Application error type
///
/// Covers all error cases the sync engine and CLI commands may encounter.
#[derive(Debug, Error)]
pub enum AppError {
    /// Invalid user input (validation failed, malformed flag value)
    #[error("invalid input: {0}")]
    InvalidInput(String),
    /// Resource not found (mailbox, mbox file)
    #[error("not found: {0}")]
    NotFound(String),
    /// Authentication failure (bad credentials, login rejected)
    #[error("authentication failed: {0}")]
    AuthFailed(String),
    /// Connection failure (TCP dial, TLS handshake, STARTTLS upgrade)
    #[error("connection failed: {0}")]
    Connect(String),
    /// Per-mailbox protocol failure (SELECT/SEARCH/FETCH/CREATE/APPEND)
    #[error("{mailbox}: {source}")]
    Protocol {
        /// Mailbox the failure occurred against
        mailbox: String,
        /// Underlying error text
        source: String,
    },
    /// Filesystem or state-file I/O failure
    #[error("I/O error: {0}")]
    Io(String),
    /// Run was cancelled before completing
    #[error("cancelled")]
    Cancelled,
    /// Internal error (unexpected failure, external crate error)
    #[error("internal error: {0}")]
    Internal(String),
}

impl AppError {
    /// Convenience constructor for `InvalidInput`
    pub fn invalid(msg: impl Into<String>) -> Self {
        Self::InvalidInput(msg.into())
    }

    /// Convenience constructor for a per-mailbox `Protocol` error
    pub fn protocol(mailbox: impl Into<String>, source: impl std::fmt::Display) -> Self {
        Self::Protocol {
            mailbox: mailbox.into(),
            source: source.to_string(),
        }
    }
}

impl From<std::io::Error> for AppError {
    fn from(err: std::io::Error) -> Self {
        Self::Io(err.to_string())
    }
}

impl From<serde_json::Error> for AppError {
    fn from(err: serde_json::Error) -> Self {
        Self::Io(format!("state file is not valid JSON: {err}"))
    }
}

/// Type alias for fallible return values
///
/// Use this for all internal functions that can fail. Provides a consistent
/// error type throughout the codebase.
pub type AppResult<T> = Result<T, AppError>;
