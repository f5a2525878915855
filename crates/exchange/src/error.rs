//! Error types for the token exchange.
//!
//! Each component has its own error so that callers can tell validation
//! failures apart from infrastructure failures. [`ExchangeError`] is the
//! outward-facing type and knows its HTTP status and public message.

use std::sync::Arc;

use enverify_storage::StorageError;
use http::StatusCode;
use thiserror::Error;

/// Public message for every unauthorized outcome.
pub const UNAUTHORIZED_MESSAGE: &str = "unauthorized: API Key invalid";

/// Public message for internal-class failures.
pub const INTERNAL_MESSAGE: &str = "internal server error";

/// Public message when no signer can be resolved.
pub const KEY_UNAVAILABLE_MESSAGE: &str = "internal server error - unable to sign tokens";

/// Public message when signing fails after the code was consumed.
pub const SIGNING_FAILURE_MESSAGE: &str = "error signing token, must obtain new verification code";

/// Invalid exchange configuration.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[non_exhaustive]
pub enum ConfigError {
    /// A required field is empty.
    #[error("{field} is required")]
    Missing {
        /// Name of the field.
        field: &'static str,
    },

    /// A numeric or duration field is below its minimum.
    #[error("{field} must be at least {min}, got {value}")]
    BelowMinimum {
        /// Name of the field.
        field: &'static str,
        /// Smallest accepted value.
        min: String,
        /// The rejected value.
        value: String,
    },

    /// A field is out of the representable range.
    #[error("{field} is out of range: {value}")]
    OutOfRange {
        /// Name of the field.
        field: &'static str,
        /// The rejected value.
        value: String,
    },
}

/// Errors raised by key managers and signers.
///
/// # Non-exhaustive
///
/// New variants may be added in minor releases. Downstream match expressions
/// must include a wildcard arm (`_ =>`).
#[derive(Debug, Clone, Error)]
#[non_exhaustive]
pub enum SignerError {
    /// The key reference could not be resolved to usable key material.
    #[error("signing key unavailable: {reference}: {reason}")]
    KeyUnavailable {
        /// The configured key reference.
        reference: String,
        /// Why the key could not be loaded.
        reason: String,
    },

    /// The signing operation itself failed.
    #[error("signing failed: {0}")]
    SigningFailure(String),

    /// A remote signing call exceeded its deadline.
    #[error("signing operation timed out")]
    Timeout,
}

impl SignerError {
    /// Creates a new `KeyUnavailable` error.
    #[must_use]
    pub fn key_unavailable(reference: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::KeyUnavailable { reference: reference.into(), reason: reason.into() }
    }

    /// Creates a new `SigningFailure` error.
    #[must_use]
    pub fn signing_failure(message: impl Into<String>) -> Self {
        Self::SigningFailure(message.into())
    }
}

/// Errors raised when decoding or verifying an issued token.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum TokenError {
    /// The token is not three base64url segments of valid JSON.
    #[error("invalid token format: {0}")]
    InvalidFormat(String),

    /// The signature does not match the claims.
    #[error("invalid signature")]
    InvalidSignature,

    /// The token's `exp` is in the past.
    #[error("token expired")]
    Expired,

    /// The `iss` claim does not match.
    #[error("invalid issuer")]
    InvalidIssuer,

    /// The `aud` claim does not match.
    #[error("invalid audience")]
    InvalidAudience,

    /// The header names an algorithm other than ES256.
    #[error("unsupported algorithm")]
    UnsupportedAlgorithm,
}

impl TokenError {
    /// Creates a new `InvalidFormat` error.
    #[must_use]
    pub fn invalid_format(message: impl Into<String>) -> Self {
        Self::InvalidFormat(message.into())
    }
}

impl From<jsonwebtoken::errors::Error> for TokenError {
    fn from(err: jsonwebtoken::errors::Error) -> Self {
        use jsonwebtoken::errors::ErrorKind;

        match err.kind() {
            ErrorKind::InvalidSignature => Self::InvalidSignature,
            ErrorKind::ExpiredSignature => Self::Expired,
            ErrorKind::InvalidIssuer => Self::InvalidIssuer,
            ErrorKind::InvalidAudience => Self::InvalidAudience,
            ErrorKind::InvalidAlgorithm => Self::UnsupportedAlgorithm,
            _ => Self::invalid_format(format!("JWT error: {err}")),
        }
    }
}

/// Errors raised by [`AuthorizationCache::lookup`](crate::AuthorizationCache::lookup).
///
/// Cloneable so a single failed fetch can be handed to every waiter.
#[derive(Debug, Clone, Error)]
#[non_exhaustive]
pub enum LookupError {
    /// No app is registered under the key.
    #[error("authorized app not found")]
    NotFound,

    /// The backing store failed.
    #[error("authorized app lookup failed: {0}")]
    Backend(#[source] Arc<StorageError>),

    /// The fetch exceeded the configured fetch timeout.
    #[error("authorized app lookup timed out")]
    Timeout,
}

impl From<StorageError> for LookupError {
    fn from(err: StorageError) -> Self {
        Self::Backend(Arc::new(err))
    }
}

/// Errors raised by [`VerificationLedger::consume`](crate::VerificationLedger::consume).
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum ConsumeError {
    /// No code with this value exists.
    #[error("verification code not found")]
    NotFound,

    /// The code is past its expiry.
    #[error("verification code expired")]
    Expired,

    /// The code has already been exchanged.
    #[error("verification code used")]
    AlreadyUsed,

    /// Persistence failed for a reason unrelated to the code's state.
    #[error("verification code storage error: {0}")]
    Storage(#[source] StorageError),
}

/// Outcome of a failed exchange, as seen by callers.
///
/// Internal-class variants carry detail for logs only;
/// [`public_message`](Self::public_message) never exposes it.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum ExchangeError {
    /// The request body was missing fields or was not valid JSON.
    #[error("invalid request: {0}")]
    MalformedRequest(String),

    /// The API key is unknown, deleted, or could not be checked.
    #[error("{}", UNAUTHORIZED_MESSAGE)]
    Unauthorized,

    /// The verification code is expired.
    #[error("verification code expired")]
    CodeExpired,

    /// The verification code was already used.
    #[error("verification code used")]
    CodeAlreadyUsed,

    /// No signer could be resolved for the configured key.
    #[error("signing key unavailable: {0}")]
    KeyUnavailable(#[source] SignerError),

    /// Signing failed after the code was consumed.
    #[error("token signing failed: {0}")]
    SigningFailure(#[source] SignerError),

    /// Any other internal failure.
    #[error("internal error: {0}")]
    Internal(String),

    /// The exchange exceeded the request timeout.
    #[error("exchange timed out")]
    Timeout,

    /// The caller cancelled the exchange.
    #[error("exchange cancelled")]
    Cancelled,
}

impl ExchangeError {
    /// Creates a new `MalformedRequest` error.
    #[must_use]
    pub fn malformed_request(message: impl Into<String>) -> Self {
        Self::MalformedRequest(message.into())
    }

    /// Creates a new `Internal` error.
    #[must_use]
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal(message.into())
    }

    /// HTTP status class for this error.
    #[must_use]
    pub fn status_code(&self) -> StatusCode {
        match self {
            Self::MalformedRequest(_) | Self::CodeExpired | Self::CodeAlreadyUsed => {
                StatusCode::BAD_REQUEST
            },
            Self::Unauthorized => StatusCode::UNAUTHORIZED,
            Self::KeyUnavailable(_)
            | Self::SigningFailure(_)
            | Self::Internal(_)
            | Self::Timeout
            | Self::Cancelled => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Returns `true` for failures that are the server's fault.
    #[must_use]
    pub fn is_internal(&self) -> bool {
        self.status_code().is_server_error()
    }

    /// Message safe to return to the caller.
    #[must_use]
    pub fn public_message(&self) -> String {
        match self {
            Self::MalformedRequest(_) | Self::CodeExpired | Self::CodeAlreadyUsed => {
                self.to_string()
            },
            Self::Unauthorized => UNAUTHORIZED_MESSAGE.to_owned(),
            Self::KeyUnavailable(_) => KEY_UNAVAILABLE_MESSAGE.to_owned(),
            Self::SigningFailure(_) => SIGNING_FAILURE_MESSAGE.to_owned(),
            Self::Internal(_) | Self::Timeout | Self::Cancelled => INTERNAL_MESSAGE.to_owned(),
        }
    }
}

impl From<ConsumeError> for ExchangeError {
    fn from(err: ConsumeError) -> Self {
        match err {
            ConsumeError::Expired => Self::CodeExpired,
            ConsumeError::AlreadyUsed => Self::CodeAlreadyUsed,
            ConsumeError::NotFound => Self::internal("verification code not found"),
            ConsumeError::Storage(source) => Self::internal(source.to_string()),
        }
    }
}

/// Result type alias for exchange operations.
pub type Result<T> = std::result::Result<T, ExchangeError>;
