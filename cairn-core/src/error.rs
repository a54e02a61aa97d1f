//! Error types shared across the cairn workspace.

use thiserror::Error;

/// Result type for cairn operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Stable classification of an [`Error`], independent of its payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// An append or event arrived outside the expected index sequence.
    OutOfOrder,
    /// A post-condition or data invariant was violated.
    Invariant,
    /// Block bytes do not rehash to their claimed CID.
    CidMismatch,
    /// A block, log, or record is not present.
    NotFound,
    /// The operation was aborted by a cancellation signal.
    Cancelled,
    /// Transient network or I/O failure.
    Transport,
    /// Unreachable or misconfigured endpoint at start-up.
    Config,
}

/// Errors that can occur while mirroring the dataset.
#[derive(Debug, Error)]
pub enum Error {
    /// Sequencing violation.
    #[error("out of order: {0}")]
    OutOfOrder(String),

    /// Invariant violation.
    #[error("invariant violated: {0}")]
    Invariant(String),

    /// Content address verification failure.
    #[error("cid mismatch: expected {expected}, computed {computed}")]
    CidMismatch {
        /// The CID the bytes were claimed to hash to.
        expected: String,
        /// The CID actually computed from the bytes.
        computed: String,
    },

    /// Missing block, log, or record.
    #[error("not found: {0}")]
    NotFound(String),

    /// Aborted by a cancellation signal.
    #[error("operation cancelled")]
    Cancelled,

    /// Transient transport failure, already retried where applicable.
    #[error("transport error: {0}")]
    Transport(String),

    /// Start-up configuration failure.
    #[error("configuration error: {0}")]
    Config(String),
}

impl Error {
    /// Classify this error.
    pub fn kind(&self) -> ErrorKind {
        match self {
            Error::OutOfOrder(_) => ErrorKind::OutOfOrder,
            Error::Invariant(_) => ErrorKind::Invariant,
            Error::CidMismatch { .. } => ErrorKind::CidMismatch,
            Error::NotFound(_) => ErrorKind::NotFound,
            Error::Cancelled => ErrorKind::Cancelled,
            Error::Transport(_) => ErrorKind::Transport,
            Error::Config(_) => ErrorKind::Config,
        }
    }

    /// Whether a retry has any chance of succeeding.
    pub fn is_retryable(&self) -> bool {
        matches!(self.kind(), ErrorKind::Transport)
    }

    /// Create an OutOfOrder error.
    pub fn out_of_order(message: impl Into<String>) -> Self {
        Error::OutOfOrder(message.into())
    }

    /// Create an Invariant error.
    pub fn invariant(message: impl Into<String>) -> Self {
        Error::Invariant(message.into())
    }

    /// Create a NotFound error.
    pub fn not_found(message: impl Into<String>) -> Self {
        Error::NotFound(message.into())
    }

    /// Create a Transport error.
    pub fn transport(message: impl Into<String>) -> Self {
        Error::Transport(message.into())
    }

    /// Create a Config error.
    pub fn config(message: impl Into<String>) -> Self {
        Error::Config(message.into())
    }
}

impl From<std::io::Error> for Error {
    fn from(e: std::io::Error) -> Self {
        Error::Transport(e.to_string())
    }
}

impl From<hex::FromHexError> for Error {
    fn from(e: hex::FromHexError) -> Self {
        Error::Invariant(format!("invalid hex: {e}"))
    }
}

impl From<serde_json::Error> for Error {
    fn from(e: serde_json::Error) -> Self {
        Error::Invariant(format!("json: {e}"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kind_classification() {
        assert_eq!(Error::out_of_order("x").kind(), ErrorKind::OutOfOrder);
        assert_eq!(Error::Cancelled.kind(), ErrorKind::Cancelled);
        assert_eq!(Error::transport("x").kind(), ErrorKind::Transport);
    }

    #[test]
    fn retryable() {
        assert!(Error::transport("flaky").is_retryable());
        assert!(!Error::invariant("broken").is_retryable());
        assert!(!Error::Cancelled.is_retryable());
    }

    #[test]
    fn display_includes_detail() {
        let e = Error::not_found("leaf 42");
        assert!(e.to_string().contains("leaf 42"));
    }
}
