//! Shared test utilities for the token exchange.
//!
//! P-256 key helpers, remote signing clients that fail on purpose, a fully wired
//! [`TestHarness`] over a seeded in-memory store, and the
//! [`assert_exchange_error!`](crate::assert_exchange_error) macro. Gated
//! behind the `testutil` feature.
//!
//! # Usage
//!
//! ```toml
//! [dev-dependencies]
//! enverify-exchange = { path = "../exchange", features = ["testutil"] }
//! ```
//!
//! ```no_run
//! // Requires the `testutil` feature to be enabled.
//! use enverify_exchange::testutil::{TestHarness, generate_test_keypair};
//! ```

use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use enverify_storage::{
    BackendVerificationStore, MemoryBackend, VerificationStore,
    testutil::{CountingStore, seeded_store},
};
use jsonwebtoken::DecodingKey;
use p256::{
    ecdsa::SigningKey,
    pkcs8::{EncodePrivateKey, EncodePublicKey, LineEnding},
};
use rand_core::OsRng;
use zeroize::Zeroizing;

use crate::{
    ExchangeConfig, TokenExchangeService,
    api::VerifyCodeRequest,
    clock::{Clock, ManualClock},
    error::SignerError,
    signer::{KeyManagerConfig, KeyManagerKind, LocalKeyManager, RemoteSigningClient},
};

/// Issuer used by [`TestHarness`].
pub const TEST_ISSUER: &str = "test.enverify.example";

/// Key reference used by [`TestHarness`].
pub const TEST_SIGNING_KEY: &str = "token-key-1";

/// Generates a P-256 key pair.
///
/// Returns `(pkcs8_pem, public_key_pem)`. The private PEM is wrapped in
/// [`Zeroizing`].
///
/// # Panics
///
/// Panics if PEM encoding fails (should not happen).
pub fn generate_test_keypair() -> (Zeroizing<String>, String) {
    let signing_key = SigningKey::random(&mut OsRng);
    let private_pem = signing_key.to_pkcs8_pem(LineEnding::LF).expect("encode private key");
    let public_pem =
        signing_key.verifying_key().to_public_key_pem(LineEnding::LF).expect("encode public key");
    (private_pem, public_pem)
}

/// Returns a [`DecodingKey`] for the public half of `key_reference`.
///
/// # Panics
///
/// Panics if `manager` holds no such key.
pub fn decoding_key(manager: &LocalKeyManager, key_reference: &str) -> DecodingKey {
    let pem = manager.public_key_pem(key_reference).expect("key is registered");
    DecodingKey::from_ec_pem(pem.as_bytes()).expect("valid public key PEM")
}

/// Remote signing client that resolves no keys.
#[derive(Debug, Default)]
pub struct UnavailableSigningClient;

#[async_trait]
impl RemoteSigningClient for UnavailableSigningClient {
    async fn resolve_key(&self, key_reference: &str) -> Result<String, SignerError> {
        Err(SignerError::key_unavailable(key_reference, "key disabled"))
    }

    async fn asymmetric_sign(
        &self,
        _key_version: &str,
        _message: &[u8],
    ) -> Result<Vec<u8>, SignerError> {
        Err(SignerError::signing_failure("key disabled"))
    }
}

/// Remote signing client that resolves every key but rejects every signing
/// request.
#[derive(Debug, Default)]
pub struct RejectingSigningClient;

#[async_trait]
impl RemoteSigningClient for RejectingSigningClient {
    async fn resolve_key(&self, key_reference: &str) -> Result<String, SignerError> {
        Ok(format!("{key_reference}/versions/1"))
    }

    async fn asymmetric_sign(
        &self,
        _key_version: &str,
        _message: &[u8],
    ) -> Result<Vec<u8>, SignerError> {
        Err(SignerError::signing_failure("signing backend rejected the request"))
    }
}

/// Store type behind [`TestHarness`].
pub type HarnessStore = CountingStore<BackendVerificationStore<MemoryBackend>>;

/// A [`TokenExchangeService`] wired to a seeded in-memory store, a local
/// key manager holding [`TEST_SIGNING_KEY`], and a manual clock.
pub struct TestHarness {
    /// The service under test.
    pub service: TokenExchangeService,
    /// Seeded store, wrapped to count app lookups.
    pub store: Arc<HarnessStore>,
    /// Local key manager holding [`TEST_SIGNING_KEY`].
    pub keys: Arc<LocalKeyManager>,
    /// Clock shared by the ledger and the codec.
    pub clock: Arc<ManualClock>,
}

impl TestHarness {
    /// Builds a harness with default configuration.
    ///
    /// # Panics
    ///
    /// Panics if the default configuration is invalid (should not happen).
    pub async fn new() -> Self {
        let config = ExchangeConfig::builder()
            .token_issuer(TEST_ISSUER)
            .token_signing_key(TEST_SIGNING_KEY)
            .build()
            .expect("valid test config");
        Self::with_config(config).await
    }

    /// Builds a harness around `config`, signing with a fresh local key.
    ///
    /// # Panics
    ///
    /// Panics if `config` is invalid or selects the remote backend.
    pub async fn with_config(config: ExchangeConfig) -> Self {
        let keys = Arc::new(LocalKeyManager::new());
        keys.generate(config.token_signing_key());
        Self::build(config, keys, None).await
    }

    /// Builds a harness configured for the remote backend, signing through
    /// `client`.
    ///
    /// # Panics
    ///
    /// Panics if the default configuration is invalid (should not happen).
    pub async fn with_remote_signer(client: Arc<dyn RemoteSigningClient>) -> Self {
        let config = ExchangeConfig::builder()
            .token_issuer(TEST_ISSUER)
            .token_signing_key(TEST_SIGNING_KEY)
            .key_manager(KeyManagerConfig::builder().kind(KeyManagerKind::Remote).build())
            .build()
            .expect("valid test config");
        Self::build(config, Arc::new(LocalKeyManager::new()), Some(client)).await
    }

    async fn build(
        config: ExchangeConfig,
        keys: Arc<LocalKeyManager>,
        remote_signer: Option<Arc<dyn RemoteSigningClient>>,
    ) -> Self {
        let store = Arc::new(CountingStore::new(seeded_store().await));
        let clock = Arc::new(ManualClock::new(Utc::now()));
        let service = TokenExchangeService::builder()
            .config(config)
            .store(Arc::clone(&store) as Arc<dyn VerificationStore>)
            .local_keys(Arc::clone(&keys))
            .maybe_remote_signer(remote_signer)
            .clock(Arc::clone(&clock) as Arc<dyn Clock>)
            .build()
            .expect("valid service config");
        Self { service, store, keys, clock }
    }

    /// Shorthand for [`VerifyCodeRequest::new`].
    pub fn request(&self, api_key: &str, code: &str) -> VerifyCodeRequest {
        VerifyCodeRequest::new(api_key, code)
    }

    /// Returns a [`DecodingKey`] for [`TEST_SIGNING_KEY`].
    ///
    /// # Panics
    ///
    /// Panics if the harness signs through a remote client.
    pub fn decoding_key(&self) -> DecodingKey {
        decoding_key(&self.keys, TEST_SIGNING_KEY)
    }
}

/// Assert that an exchange result is a specific [`ExchangeError`](crate::ExchangeError)
/// variant.
///
/// # Examples
///
/// ```no_run
/// // Requires the `testutil` feature to be enabled.
/// use enverify_exchange::{ExchangeError, assert_exchange_error};
///
/// let result: Result<(), ExchangeError> = Err(ExchangeError::CodeAlreadyUsed);
/// assert_exchange_error!(result, CodeAlreadyUsed);
/// ```
#[macro_export]
macro_rules! assert_exchange_error {
    ($result:expr, $variant:ident) => {
        assert!(
            matches!($result, Err($crate::error::ExchangeError::$variant { .. })),
            "expected ExchangeError::{}, got: {:?}",
            stringify!($variant),
            $result,
        );
    };
}
