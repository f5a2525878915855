//! The code-for-token exchange.
//!
//! # Flow
//!
//! ```text
//! VerifyCodeRequest
//!   → validate shape                      (400 on empty fields)
//!   → KeyManager::new_signer              (500, nothing consumed)
//!   → AuthorizationCache::lookup          (401, nothing consumed)
//!   → VerificationLedger::consume         (400 expired / used)
//!   → TokenCodec::build + sign            (500, code already spent)
//!   → VerifyCodeSuccess
//! ```
//!
//! The signer is resolved before anything else so that a missing key never
//! burns a code.

use std::{sync::Arc, time::Duration};

use chrono::TimeDelta;
use enverify_storage::VerificationStore;
use fail::fail_point;
use http::StatusCode;
use tokio_util::sync::CancellationToken;

use crate::{
    api::{VerifyCodeRequest, VerifyCodeResponse, VerifyCodeSuccess},
    app_cache::AuthorizationCache,
    clock::{Clock, SystemClock},
    config::ExchangeConfig,
    error::{ConfigError, ExchangeError, Result},
    ledger::VerificationLedger,
    signer::{KeyManager, LocalKeyManager, RemoteSigningClient},
    token::TokenCodec,
};

/// Exchanges verification codes for signed verification tokens.
///
/// # Examples
///
/// ```
/// use std::sync::Arc;
///
/// use enverify_exchange::{
///     ExchangeConfig, LocalKeyManager, TokenExchangeService, VerifyCodeRequest,
/// };
/// use enverify_storage::{BackendVerificationStore, MemoryBackend};
///
/// # #[tokio::main]
/// # async fn main() -> Result<(), Box<dyn std::error::Error>> {
/// let keys = Arc::new(LocalKeyManager::new());
/// keys.generate("token-key-1");
///
/// let config = ExchangeConfig::builder()
///     .token_issuer("gov.example.verify")
///     .token_signing_key("token-key-1")
///     .build()?;
/// let store = Arc::new(BackendVerificationStore::new(MemoryBackend::new()));
/// let service = TokenExchangeService::builder()
///     .config(config)
///     .store(store)
///     .local_keys(keys)
///     .build()?;
///
/// let (status, body) = service.handle(&VerifyCodeRequest::new("unknown", "123456")).await;
/// assert_eq!(status.as_u16(), 401);
/// assert_eq!(body.error.as_deref(), Some("unauthorized: API Key invalid"));
/// # Ok(())
/// # }
/// ```
pub struct TokenExchangeService {
    cache: Arc<AuthorizationCache>,
    ledger: VerificationLedger,
    codec: TokenCodec,
    key_manager: Arc<dyn KeyManager>,
    signing_key: String,
    token_duration: TimeDelta,
    request_timeout: Duration,
}

#[bon::bon]
impl TokenExchangeService {
    /// Wires the exchange from `config`.
    ///
    /// The signing backend is chosen by
    /// [`key_manager`](ExchangeConfig::key_manager): `local_keys` serves the
    /// local kind and `remote_signer` is required for the remote kind.
    /// Starts the authorized app refresh task when
    /// [`api_key_refresh_interval`](ExchangeConfig::api_key_refresh_interval)
    /// is set.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] if `config` fails validation or selects the
    /// remote backend without a `remote_signer`.
    ///
    /// # Panics
    ///
    /// Must be called within a Tokio runtime context when background refresh
    /// is enabled.
    #[builder]
    pub fn new(
        config: ExchangeConfig,
        store: Arc<dyn VerificationStore>,
        #[builder(default)] local_keys: Arc<LocalKeyManager>,
        remote_signer: Option<Arc<dyn RemoteSigningClient>>,
        #[builder(default = Arc::new(SystemClock) as Arc<dyn Clock>)] clock: Arc<dyn Clock>,
    ) -> std::result::Result<Self, ConfigError> {
        config.validate()?;
        let token_duration = config.token_duration()?;
        let key_manager = config.key_manager().build(local_keys, remote_signer)?;

        let cache = AuthorizationCache::with_capacity(
            Arc::clone(&store),
            config.api_key_cache_ttl(),
            config.api_key_cache_capacity(),
        )
        .with_fetch_timeout(config.api_key_fetch_timeout());
        let mut cache = Arc::new(cache);
        if let Some(interval) = config.api_key_refresh_interval() {
            cache = cache.with_refresh_interval(interval);
        }

        Ok(Self {
            cache,
            ledger: VerificationLedger::new(store, Arc::clone(&clock)),
            codec: TokenCodec::new(config.token_issuer(), config.token_audience(), clock),
            key_manager,
            signing_key: config.token_signing_key().to_owned(),
            token_duration,
            request_timeout: config.request_timeout(),
        })
    }

    /// Runs one exchange, bounded by the request timeout.
    ///
    /// # Errors
    ///
    /// Returns an [`ExchangeError`] whose
    /// [`status_code`](ExchangeError::status_code) and
    /// [`public_message`](ExchangeError::public_message) are safe to hand to
    /// the caller.
    #[tracing::instrument(skip_all)]
    pub async fn execute(&self, request: &VerifyCodeRequest) -> Result<VerifyCodeSuccess> {
        let outcome = tokio::time::timeout(self.request_timeout, self.exchange(request))
            .await
            .unwrap_or(Err(ExchangeError::Timeout));
        log_outcome(&outcome);
        outcome
    }

    /// Like [`execute`](Self::execute), but aborts when `cancel` fires.
    ///
    /// An aborted exchange may or may not have consumed the code, depending
    /// on how far it got.
    ///
    /// # Errors
    ///
    /// Returns [`ExchangeError::Cancelled`] if `cancel` fires first, or any
    /// error [`execute`](Self::execute) returns.
    pub async fn execute_with_cancellation(
        &self,
        request: &VerifyCodeRequest,
        cancel: &CancellationToken,
    ) -> Result<VerifyCodeSuccess> {
        tokio::select! {
            biased;
            () = cancel.cancelled() => {
                tracing::warn!("exchange cancelled by caller");
                Err(ExchangeError::Cancelled)
            }
            outcome = self.execute(request) => outcome,
        }
    }

    /// Runs one exchange and renders the outcome as status and body.
    pub async fn handle(&self, request: &VerifyCodeRequest) -> (StatusCode, VerifyCodeResponse) {
        render(self.execute(request).await)
    }

    /// Decodes a JSON request body and runs one exchange.
    ///
    /// A body that is not a JSON object with string fields yields 400.
    pub async fn handle_json(&self, body: &[u8]) -> (StatusCode, VerifyCodeResponse) {
        match serde_json::from_slice::<VerifyCodeRequest>(body) {
            Ok(request) => self.handle(&request).await,
            Err(err) => {
                tracing::warn!(error = %err, "rejected undecodable request body");
                render(Err(ExchangeError::malformed_request(err.to_string())))
            },
        }
    }

    async fn exchange(&self, request: &VerifyCodeRequest) -> Result<VerifyCodeSuccess> {
        request.validate()?;

        let signer = self
            .key_manager
            .new_signer(&self.signing_key)
            .await
            .map_err(ExchangeError::KeyUnavailable)?;

        let app = match self.cache.lookup(&request.api_key).await {
            Ok(app) => app,
            Err(err) => {
                tracing::debug!(error = %err, "authorized app lookup failed");
                return Err(ExchangeError::Unauthorized);
            },
        };
        if !app.is_active() {
            tracing::debug!(realm_id = %app.realm_id, "authorized app is deleted");
            return Err(ExchangeError::Unauthorized);
        }

        let token = self.ledger.consume(&request.code, self.token_duration).await?;

        fail_point!("exchange-before-sign", |_| {
            Err(ExchangeError::SigningFailure(crate::error::SignerError::signing_failure(
                "injected failure before signing",
            )))
        });

        let claims = self.codec.build(&token);
        let verification_token = self
            .codec
            .sign(&claims, signer.as_ref())
            .await
            .map_err(ExchangeError::SigningFailure)?;

        tracing::info!(
            realm_id = %token.realm_id,
            test_type = %token.test_type,
            "issued verification token"
        );

        Ok(VerifyCodeSuccess {
            test_type: token.test_type.clone(),
            test_date: token.format_test_date(),
            verification_token,
        })
    }

    /// Returns the authorized app cache.
    #[must_use]
    pub fn cache(&self) -> &Arc<AuthorizationCache> {
        &self.cache
    }

    /// Returns the token codec.
    #[must_use]
    pub fn codec(&self) -> &TokenCodec {
        &self.codec
    }

    /// Stops background work and drops cached state.
    pub async fn shutdown(&self) {
        self.cache.shutdown().await;
    }
}

impl std::fmt::Debug for TokenExchangeService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TokenExchangeService")
            .field("cache", &self.cache)
            .field("codec", &self.codec)
            .field("token_duration", &self.token_duration)
            .field("request_timeout", &self.request_timeout)
            .finish_non_exhaustive()
    }
}

fn render(outcome: Result<VerifyCodeSuccess>) -> (StatusCode, VerifyCodeResponse) {
    match outcome {
        Ok(success) => (StatusCode::OK, success.into()),
        Err(err) => (err.status_code(), VerifyCodeResponse::from(&err)),
    }
}

fn log_outcome(outcome: &Result<VerifyCodeSuccess>) {
    let Err(err) = outcome else {
        return;
    };
    if err.is_internal() {
        tracing::error!(error = %err, status = err.status_code().as_u16(), "exchange failed");
    } else {
        tracing::warn!(error = %err, status = err.status_code().as_u16(), "exchange rejected");
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]
mod tests {
    use chrono::Utc;
    use enverify_storage::{
        BackendVerificationStore, MemoryBackend,
        testutil::{ACTIVE_API_KEY, DELETED_API_KEY, VALID_CODE, seeded_store},
    };

    use super::*;
    use crate::{
        clock::ManualClock,
        error::SignerError,
        signer::{KeyManagerConfig, KeyManagerKind},
    };

    const KEY: &str = "token-key-1";

    type Store = Arc<BackendVerificationStore<MemoryBackend>>;

    fn config(kind: KeyManagerKind) -> ExchangeConfig {
        ExchangeConfig::builder()
            .token_issuer("iss")
            .token_signing_key(KEY)
            .key_manager(KeyManagerConfig::builder().kind(kind).build())
            .build()
            .unwrap()
    }

    async fn service() -> (TokenExchangeService, Store) {
        let keys = Arc::new(LocalKeyManager::new());
        keys.generate(KEY);
        service_with(config(KeyManagerKind::Local), keys, None).await
    }

    async fn service_with(
        config: ExchangeConfig,
        local_keys: Arc<LocalKeyManager>,
        remote_signer: Option<Arc<dyn RemoteSigningClient>>,
    ) -> (TokenExchangeService, Store) {
        let store = Arc::new(seeded_store().await);
        let service = TokenExchangeService::builder()
            .config(config)
            .store(Arc::clone(&store) as Arc<dyn VerificationStore>)
            .local_keys(local_keys)
            .maybe_remote_signer(remote_signer)
            .clock(Arc::new(ManualClock::new(Utc::now())))
            .build()
            .unwrap();
        (service, store)
    }

    /// Remote client that knows no keys.
    struct NoRemoteKeys;

    #[async_trait::async_trait]
    impl RemoteSigningClient for NoRemoteKeys {
        async fn resolve_key(
            &self,
            key_reference: &str,
        ) -> std::result::Result<String, SignerError> {
            Err(SignerError::key_unavailable(key_reference, "no such key"))
        }

        async fn asymmetric_sign(
            &self,
            _key_version: &str,
            _message: &[u8],
        ) -> std::result::Result<Vec<u8>, SignerError> {
            Err(SignerError::signing_failure("unreachable"))
        }
    }

    #[tokio::test]
    async fn test_success() {
        let (service, _) = service().await;

        let success = service.execute(&VerifyCodeRequest::new(ACTIVE_API_KEY, VALID_CODE)).await;
        let success = success.unwrap();

        assert_eq!(success.test_type, "confirmed");
        assert_eq!(success.test_date, "2020-07-01");
        let claims = crate::token::decode_claims(&success.verification_token).unwrap();
        assert_eq!(claims.sub, "confirmed.2020-07-01");
        assert_eq!(claims.aud, "iss");
    }

    #[tokio::test]
    async fn test_empty_fields_are_malformed() {
        let (service, _) = service().await;

        let err = service.execute(&VerifyCodeRequest::new("", VALID_CODE)).await.unwrap_err();
        assert!(matches!(err, ExchangeError::MalformedRequest(_)));
        let err = service.execute(&VerifyCodeRequest::new(ACTIVE_API_KEY, "")).await.unwrap_err();
        assert!(matches!(err, ExchangeError::MalformedRequest(_)));
    }

    #[tokio::test]
    async fn test_deleted_and_unknown_keys_look_the_same() {
        let (service, _) = service().await;

        let (deleted_status, deleted) =
            service.handle(&VerifyCodeRequest::new(DELETED_API_KEY, VALID_CODE)).await;
        let (unknown_status, unknown) =
            service.handle(&VerifyCodeRequest::new("K-nope", VALID_CODE)).await;

        assert_eq!(deleted_status, StatusCode::UNAUTHORIZED);
        assert_eq!(unknown_status, StatusCode::UNAUTHORIZED);
        assert_eq!(deleted, unknown);
    }

    #[tokio::test]
    async fn test_missing_local_key_leaves_code_unused() {
        let empty = Arc::new(LocalKeyManager::new());
        let (service, store) = service_with(config(KeyManagerKind::Local), empty, None).await;

        let (status, body) =
            service.handle(&VerifyCodeRequest::new(ACTIVE_API_KEY, VALID_CODE)).await;

        assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(body.error.as_deref(), Some(crate::error::KEY_UNAVAILABLE_MESSAGE));
        let code = store.find_code_by_value(VALID_CODE).await.unwrap().unwrap();
        assert!(!code.is_used());
    }

    #[tokio::test]
    async fn test_remote_kind_without_client_fails_construction() {
        let store = Arc::new(seeded_store().await);
        let result = TokenExchangeService::builder()
            .config(config(KeyManagerKind::Remote))
            .store(store as Arc<dyn VerificationStore>)
            .build();

        assert!(matches!(result, Err(ConfigError::Missing { field: "remote_signing_client" })));
    }

    #[tokio::test]
    async fn test_remote_kind_ignores_local_keys() {
        let keys = Arc::new(LocalKeyManager::new());
        keys.generate(KEY);
        let remote: Arc<dyn RemoteSigningClient> = Arc::new(NoRemoteKeys);
        let (service, store) =
            service_with(config(KeyManagerKind::Remote), keys, Some(remote)).await;

        let result = service.execute(&VerifyCodeRequest::new(ACTIVE_API_KEY, VALID_CODE)).await;

        assert!(matches!(result, Err(ExchangeError::KeyUnavailable(_))));
        let code = store.find_code_by_value(VALID_CODE).await.unwrap().unwrap();
        assert!(!code.is_used());
    }

    #[tokio::test]
    async fn test_handle_json_rejects_garbage() {
        let (service, _) = service().await;

        let (status, body) = service.handle_json(b"{not json").await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert!(body.error.unwrap().starts_with("invalid request: "));
        assert!(body.verification_token.is_none());
    }

    #[tokio::test]
    async fn test_handle_json_rejects_array_body() {
        let (service, store) = service().await;

        let (status, body) = service.handle_json(br#"["K1","123456"]"#).await;

        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert!(body.verification_token.is_none());
        let code = store.find_code_by_value(VALID_CODE).await.unwrap().unwrap();
        assert!(!code.is_used());
    }

    #[tokio::test]
    async fn test_cancelled_before_start() {
        let (service, store) = service().await;
        let cancel = CancellationToken::new();
        cancel.cancel();

        let result = service
            .execute_with_cancellation(&VerifyCodeRequest::new(ACTIVE_API_KEY, VALID_CODE), &cancel)
            .await;

        assert!(matches!(result, Err(ExchangeError::Cancelled)));
        let code = store.find_code_by_value(VALID_CODE).await.unwrap().unwrap();
        assert!(!code.is_used());
    }
}
