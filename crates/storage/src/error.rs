//! Storage error types and result alias.
//!
//! Every storage backend maps its internal failures onto [`StorageError`], so
//! callers in the exchange layer can tell a definitive answer (not found, a
//! lost compare-and-set race) from a backend that is temporarily unreachable.
//!
//! # Example
//!
//! ```
//! use enverify_storage::{StorageError, StorageResult};
//!
//! fn lookup(key: &str) -> StorageResult<Vec<u8>> {
//!     Err(StorageError::not_found(key))
//! }
//!
//! assert!(matches!(lookup("codes/123"), Err(StorageError::NotFound { .. })));
//! ```

use std::sync::Arc;

use thiserror::Error;

/// A shareable boxed error used to keep source chains intact.
pub type BoxError = Arc<dyn std::error::Error + Send + Sync>;

/// Result type alias for storage operations.
pub type StorageResult<T> = Result<T, StorageError>;

/// Errors that can occur during storage operations.
///
/// Errors preserve their source chain via `#[source]`, so structured logging
/// can print the full context of a backend failure.
///
/// # Non-exhaustive
///
/// New variants may be added in minor releases. Downstream match expressions
/// must include a wildcard arm (`_ =>`).
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum StorageError {
    /// The requested key does not exist.
    #[error("Key not found: {key}")]
    NotFound {
        /// The key that was not found.
        key: String,
    },

    /// A transaction precondition failed at commit time.
    ///
    /// Raised when a compare-and-set condition no longer holds because a
    /// concurrent writer committed first. Not retried automatically.
    #[error("Transaction conflict")]
    Conflict,

    /// The backend could not be reached.
    #[error("Connection error: {message}")]
    Connection {
        /// Description of the connection error.
        message: String,
        /// The underlying error that caused this connection failure.
        #[source]
        source: Option<BoxError>,
    },

    /// A stored record could not be encoded or decoded.
    #[error("Serialization error: {message}")]
    Serialization {
        /// Description of the serialization error.
        message: String,
        /// The underlying error that caused serialization to fail.
        #[source]
        source: Option<BoxError>,
    },

    /// Catch-all for backend-specific failures.
    #[error("Internal error: {message}")]
    Internal {
        /// Description of the internal error.
        message: String,
        /// The underlying error that caused this internal failure.
        #[source]
        source: Option<BoxError>,
    },

    /// The operation exceeded its deadline.
    #[error("Operation timeout")]
    Timeout,
}

impl StorageError {
    /// Creates a new `NotFound` error for the given key.
    #[must_use]
    pub fn not_found(key: impl Into<String>) -> Self {
        Self::NotFound { key: key.into() }
    }

    /// Creates a new `Conflict` error.
    #[must_use]
    pub fn conflict() -> Self {
        Self::Conflict
    }

    /// Creates a new `Connection` error with the given message.
    #[must_use]
    pub fn connection(message: impl Into<String>) -> Self {
        Self::Connection { message: message.into(), source: None }
    }

    /// Creates a new `Serialization` error with the given message.
    #[must_use]
    pub fn serialization(message: impl Into<String>) -> Self {
        Self::Serialization { message: message.into(), source: None }
    }

    /// Creates a new `Serialization` error with a message and source error.
    #[must_use]
    pub fn serialization_with_source(
        message: impl Into<String>,
        source: impl std::error::Error + Send + Sync + 'static,
    ) -> Self {
        Self::Serialization { message: message.into(), source: Some(Arc::new(source)) }
    }

    /// Creates a new `Internal` error with the given message.
    #[must_use]
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal { message: message.into(), source: None }
    }

    /// Creates a new `Timeout` error.
    #[must_use]
    pub fn timeout() -> Self {
        Self::Timeout
    }

    /// Returns `true` when the backend was unreachable or slow rather than
    /// giving a definitive answer.
    ///
    /// `Conflict` is deliberately not transient: it means another writer won,
    /// and blindly retrying a code consumption is unsafe.
    #[must_use]
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Connection { .. } | Self::Timeout)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use std::error::Error;

    use super::*;

    #[test]
    fn test_error_display() {
        assert_eq!(StorageError::not_found("codes/1").to_string(), "Key not found: codes/1");
        assert_eq!(StorageError::conflict().to_string(), "Transaction conflict");
        assert_eq!(StorageError::timeout().to_string(), "Operation timeout");
        assert_eq!(
            StorageError::connection("refused").to_string(),
            "Connection error: refused"
        );
    }

    #[test]
    fn test_is_transient() {
        assert!(StorageError::connection("down").is_transient());
        assert!(StorageError::timeout().is_transient());
        assert!(!StorageError::conflict().is_transient());
        assert!(!StorageError::not_found("k").is_transient());
        assert!(!StorageError::internal("boom").is_transient());
    }

    #[test]
    fn test_serialization_source_chain() {
        let json_err = serde_json::from_slice::<u32>(b"not json").unwrap_err();
        let err = StorageError::serialization_with_source("decode record", json_err);
        let source = err.source().expect("source should be preserved");
        assert!(!source.to_string().is_empty());
    }
}
