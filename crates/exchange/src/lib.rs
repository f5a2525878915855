//! Verification code to signed token exchange.
//!
//! A calling app presents its API key and a human-entered verification
//! code. If the app is authorized and the code is valid and unused, the code
//! is consumed and an ES256-signed verification token is returned.
//!
//! # Components
//!
//! - [`AuthorizationCache`]: API key to [`AuthorizedApp`](enverify_storage::AuthorizedApp) with
//!   single-flight fetches, TTL expiry and optional background refresh
//! - [`VerificationLedger`]: exactly-once code consumption
//! - [`TokenCodec`]: claim building, compact ES256 encoding and verification
//! - [`KeyManager`] / [`KeySigner`]: pluggable signing backends
//! - [`TokenExchangeService`]: the orchestrator
//!
//! # Status mapping
//!
//! | Outcome | Status |
//! |---------|--------|
//! | token issued | 200 |
//! | malformed request, expired or used code | 400 |
//! | unknown or deleted API key | 401 |
//! | key unavailable, signing failure, storage, timeout | 500 |
//!
//! # Feature Flags
//!
//! - **`testutil`**: Enables the `testutil` module with key helpers, a wired test harness and
//!   the `assert_exchange_error!` macro.
//! - **`failpoints`**: Activates `fail` fail-points in the cache and exchange paths.

#![deny(unsafe_code)]

pub mod api;
pub mod app_cache;
pub mod clock;
pub mod config;
pub mod error;
pub mod exchange;
pub mod ledger;
pub mod signer;
#[cfg(any(test, feature = "testutil"))]
#[allow(clippy::expect_used)]
pub mod testutil;
pub mod token;

pub use api::{VerifyCodeRequest, VerifyCodeResponse, VerifyCodeSuccess};
pub use app_cache::AuthorizationCache;
pub use clock::{Clock, ManualClock, SystemClock};
pub use config::ExchangeConfig;
pub use error::{
    ConfigError, ConsumeError, ExchangeError, LookupError, Result, SignerError, TokenError,
};
pub use exchange::TokenExchangeService;
pub use ledger::VerificationLedger;
pub use signer::{
    KeyManager, KeyManagerConfig, KeyManagerKind, KeySigner, LocalKeyManager, RemoteKeyManager,
    RemoteSigningClient,
};
pub use token::{TokenCodec, VerificationClaims, decode_claims};
