//! Persistence contract for verification records.
//!
//! [`VerificationStore`] is what the exchange layer depends on.
//! [`BackendVerificationStore`] implements it over any [`StorageBackend`]
//! by storing records as JSON under fixed key prefixes.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, TimeDelta, Utc};
use serde::{Serialize, de::DeserializeOwned};

use crate::{
    backend::StorageBackend,
    error::{StorageError, StorageResult},
    verification::records::{AuthorizedApp, VerificationCode, VerificationToken},
};

/// Storage key prefix for authorized apps, keyed by API key.
pub const AUTHORIZED_APP_PREFIX: &str = "authorized-apps/";

/// Storage key prefix for verification codes, keyed by code value.
pub const VERIFICATION_CODE_PREFIX: &str = "verification-codes/";

/// Storage key prefix for issued tokens, keyed by token id.
pub const VERIFICATION_TOKEN_PREFIX: &str = "verification-tokens/";

/// Persistence layer for authorized apps and the code-to-token exchange.
///
/// Lookups return `Ok(None)` for missing records. Callers decide what an
/// absent record means.
///
/// # Atomicity
///
/// [`consume_code_and_issue_token`](Self::consume_code_and_issue_token) must
/// mark the code used and persist the new token in a single transaction. Of
/// any number of concurrent calls for one code, at most one may succeed.
#[async_trait]
pub trait VerificationStore: Send + Sync {
    /// Looks up an authorized app by its exact API key.
    ///
    /// Soft-deleted apps are returned as stored; filtering is the caller's
    /// job.
    async fn find_authorized_app_by_key(
        &self,
        api_key: &str,
    ) -> StorageResult<Option<AuthorizedApp>>;

    /// Looks up a verification code by its value.
    async fn find_code_by_value(&self, code: &str) -> StorageResult<Option<VerificationCode>>;

    /// Marks `code` used at `now` and persists a new token expiring at
    /// `now + token_duration`, atomically.
    ///
    /// # Errors
    ///
    /// - [`StorageError::NotFound`] if the code does not exist
    /// - [`StorageError::Conflict`] if the code is already used, or another
    ///   caller consumed it between the read and the commit
    /// - Other [`StorageError`] variants on backend failures
    async fn consume_code_and_issue_token(
        &self,
        code: &str,
        token_duration: TimeDelta,
        now: DateTime<Utc>,
    ) -> StorageResult<VerificationToken>;

    /// Creates or replaces an authorized app.
    async fn save_authorized_app(&self, app: &AuthorizedApp) -> StorageResult<()>;

    /// Creates or replaces a verification code.
    async fn save_code(&self, code: &VerificationCode) -> StorageResult<()>;

    /// Looks up an issued token by id.
    async fn find_token_by_id(&self, token_id: &str) -> StorageResult<Option<VerificationToken>>;
}

/// [`VerificationStore`] over any [`StorageBackend`].
///
/// Cheap to clone when the backend is.
#[derive(Clone)]
pub struct BackendVerificationStore<B> {
    backend: B,
}

impl<B: StorageBackend> BackendVerificationStore<B> {
    /// Wraps `backend`.
    pub fn new(backend: B) -> Self {
        Self { backend }
    }

    /// Returns the underlying backend.
    pub fn backend(&self) -> &B {
        &self.backend
    }

    async fn get_record<T: DeserializeOwned>(&self, key: &[u8]) -> StorageResult<Option<T>> {
        match self.backend.get(key).await? {
            Some(bytes) => decode(&bytes).map(Some),
            None => Ok(None),
        }
    }

    async fn put_record<T: Serialize>(&self, key: Vec<u8>, record: &T) -> StorageResult<()> {
        self.backend.set(key, encode(record)?).await
    }
}

fn app_key(api_key: &str) -> Vec<u8> {
    format!("{AUTHORIZED_APP_PREFIX}{api_key}").into_bytes()
}

fn code_key(code: &str) -> Vec<u8> {
    format!("{VERIFICATION_CODE_PREFIX}{code}").into_bytes()
}

fn token_key(token_id: &str) -> Vec<u8> {
    format!("{VERIFICATION_TOKEN_PREFIX}{token_id}").into_bytes()
}

fn encode<T: Serialize>(record: &T) -> StorageResult<Vec<u8>> {
    serde_json::to_vec(record).map_err(|e| {
        StorageError::serialization_with_source("failed to encode record", e)
    })
}

fn decode<T: DeserializeOwned>(bytes: &[u8]) -> StorageResult<T> {
    serde_json::from_slice(bytes).map_err(|e| {
        StorageError::serialization_with_source("failed to decode record", e)
    })
}

#[async_trait]
impl<B: StorageBackend> VerificationStore for BackendVerificationStore<B> {
    #[tracing::instrument(skip_all)]
    async fn find_authorized_app_by_key(
        &self,
        api_key: &str,
    ) -> StorageResult<Option<AuthorizedApp>> {
        self.get_record(&app_key(api_key)).await
    }

    #[tracing::instrument(skip_all)]
    async fn find_code_by_value(&self, code: &str) -> StorageResult<Option<VerificationCode>> {
        self.get_record(&code_key(code)).await
    }

    #[tracing::instrument(
        skip_all,
        fields(token_duration_secs = token_duration.num_seconds())
    )]
    async fn consume_code_and_issue_token(
        &self,
        code: &str,
        token_duration: TimeDelta,
        now: DateTime<Utc>,
    ) -> StorageResult<VerificationToken> {
        let key = code_key(code);
        let mut txn = self.backend.transaction().await?;

        let snapshot =
            txn.get(&key).await?.ok_or_else(|| StorageError::not_found("verification code"))?;
        let mut record: VerificationCode = decode(&snapshot)?;
        if record.is_used() {
            return Err(StorageError::conflict());
        }

        record.used_at = Some(now);
        let token = VerificationToken::issue(&record, now, token_duration);

        fail::fail_point!("consume-before-commit", |_| {
            Err(StorageError::connection("injected failure while consuming code"))
        });

        txn.compare_and_set(key, Some(snapshot.to_vec()), encode(&record)?)?;
        txn.compare_and_set(token_key(&token.token_id), None, encode(&token)?)?;
        txn.commit().await?;

        tracing::debug!(realm_id = %token.realm_id, "verification code consumed");
        Ok(token)
    }

    #[tracing::instrument(skip_all, fields(realm_id = %app.realm_id))]
    async fn save_authorized_app(&self, app: &AuthorizedApp) -> StorageResult<()> {
        self.put_record(app_key(&app.api_key), app).await
    }

    #[tracing::instrument(skip_all, fields(realm_id = %code.realm_id))]
    async fn save_code(&self, code: &VerificationCode) -> StorageResult<()> {
        self.put_record(code_key(&code.code), code).await
    }

    #[tracing::instrument(skip(self))]
    async fn find_token_by_id(&self, token_id: &str) -> StorageResult<Option<VerificationToken>> {
        self.get_record(&token_key(token_id)).await
    }
}

#[async_trait]
impl<S: VerificationStore + ?Sized> VerificationStore for Arc<S> {
    async fn find_authorized_app_by_key(
        &self,
        api_key: &str,
    ) -> StorageResult<Option<AuthorizedApp>> {
        (**self).find_authorized_app_by_key(api_key).await
    }

    async fn find_code_by_value(&self, code: &str) -> StorageResult<Option<VerificationCode>> {
        (**self).find_code_by_value(code).await
    }

    async fn consume_code_and_issue_token(
        &self,
        code: &str,
        token_duration: TimeDelta,
        now: DateTime<Utc>,
    ) -> StorageResult<VerificationToken> {
        (**self).consume_code_and_issue_token(code, token_duration, now).await
    }

    async fn save_authorized_app(&self, app: &AuthorizedApp) -> StorageResult<()> {
        (**self).save_authorized_app(app).await
    }

    async fn save_code(&self, code: &VerificationCode) -> StorageResult<()> {
        (**self).save_code(code).await
    }

    async fn find_token_by_id(&self, token_id: &str) -> StorageResult<Option<VerificationToken>> {
        (**self).find_token_by_id(token_id).await
    }
}
