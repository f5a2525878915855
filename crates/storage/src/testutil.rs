//! Shared test utilities for verification storage.
//!
//! Feature-gated behind `testutil` so helpers never leak into production
//! builds.
//!
//! # Usage
//!
//! ```toml
//! [dev-dependencies]
//! enverify-storage = { path = "../storage", features = ["testutil"] }
//! ```
//!
//! ```no_run
//! // Requires the `testutil` feature to be enabled.
//! use enverify_storage::testutil::{CountingStore, seeded_store};
//! ```

use std::{
    sync::atomic::{AtomicBool, AtomicUsize, Ordering},
    time::Duration,
};

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, TimeDelta, Utc};
use parking_lot::Mutex;

use crate::{
    error::{StorageError, StorageResult},
    memory::MemoryBackend,
    types::RealmId,
    verification::{
        AuthorizedApp, BackendVerificationStore, VerificationCode, VerificationStore,
        VerificationToken,
    },
};

/// API key of the active app in [`seeded_store`].
pub const ACTIVE_API_KEY: &str = "K1";

/// API key of the soft-deleted app in [`seeded_store`].
pub const DELETED_API_KEY: &str = "K-deleted";

/// Code value of the valid code in [`seeded_store`].
pub const VALID_CODE: &str = "123456";

/// Realm used by every seeded record.
pub const TEST_REALM: RealmId = RealmId(1);

/// Builds an active app for `api_key` in [`TEST_REALM`].
#[must_use]
pub fn active_app(api_key: &str) -> AuthorizedApp {
    AuthorizedApp::builder()
        .name(format!("app {api_key}"))
        .api_key(api_key.to_owned())
        .realm_id(TEST_REALM)
        .build()
}

/// Builds an app for `api_key` that was soft-deleted a minute ago.
#[must_use]
pub fn deleted_app(api_key: &str) -> AuthorizedApp {
    AuthorizedApp { deleted_at: Some(Utc::now() - TimeDelta::minutes(1)), ..active_app(api_key) }
}

/// Builds an unused `confirmed` code dated 2020-07-01 expiring at `expires_at`.
#[must_use]
pub fn code_expiring_at(code: &str, expires_at: DateTime<Utc>) -> VerificationCode {
    VerificationCode::builder()
        .code(code)
        .realm_id(TEST_REALM)
        .test_type("confirmed")
        .maybe_test_date(NaiveDate::from_ymd_opt(2020, 7, 1))
        .expires_at(expires_at)
        .build()
}

/// Builds an unused code valid for the next hour.
#[must_use]
pub fn valid_code(code: &str) -> VerificationCode {
    code_expiring_at(code, Utc::now() + TimeDelta::hours(1))
}

/// Builds a code that expired an hour ago.
#[must_use]
pub fn expired_code(code: &str) -> VerificationCode {
    code_expiring_at(code, Utc::now() - TimeDelta::hours(1))
}

/// Builds an unexpired code that has already been used.
#[must_use]
pub fn used_code(code: &str) -> VerificationCode {
    VerificationCode { used_at: Some(Utc::now() - TimeDelta::minutes(5)), ..valid_code(code) }
}

/// Creates a store holding [`ACTIVE_API_KEY`], [`DELETED_API_KEY`] and
/// [`VALID_CODE`].
///
/// # Panics
///
/// Panics if seeding fails (should not happen with `MemoryBackend`).
pub async fn seeded_store() -> BackendVerificationStore<MemoryBackend> {
    let store = BackendVerificationStore::new(MemoryBackend::new());
    store.save_authorized_app(&active_app(ACTIVE_API_KEY)).await.expect("seed active app");
    store.save_authorized_app(&deleted_app(DELETED_API_KEY)).await.expect("seed deleted app");
    store.save_code(&valid_code(VALID_CODE)).await.expect("seed valid code");
    store
}

/// [`VerificationStore`] wrapper that counts app lookups and can inject
/// latency and failures into them.
///
/// Only `find_authorized_app_by_key` is instrumented; everything else is
/// forwarded unchanged.
pub struct CountingStore<S> {
    inner: S,
    app_lookups: AtomicUsize,
    fail_app_lookups: AtomicBool,
    lookup_delay: Mutex<Option<Duration>>,
}

impl<S: VerificationStore> CountingStore<S> {
    /// Wraps `inner`.
    pub fn new(inner: S) -> Self {
        Self {
            inner,
            app_lookups: AtomicUsize::new(0),
            fail_app_lookups: AtomicBool::new(false),
            lookup_delay: Mutex::new(None),
        }
    }

    /// Number of app lookups that reached this store.
    pub fn app_lookups(&self) -> usize {
        self.app_lookups.load(Ordering::SeqCst)
    }

    /// Makes every subsequent app lookup fail with a connection error.
    pub fn fail_app_lookups(&self, fail: bool) {
        self.fail_app_lookups.store(fail, Ordering::SeqCst);
    }

    /// Delays every subsequent app lookup by `delay`.
    pub fn set_lookup_delay(&self, delay: Option<Duration>) {
        *self.lookup_delay.lock() = delay;
    }

    /// Returns the wrapped store.
    pub fn inner(&self) -> &S {
        &self.inner
    }
}

#[async_trait]
impl<S: VerificationStore> VerificationStore for CountingStore<S> {
    async fn find_authorized_app_by_key(
        &self,
        api_key: &str,
    ) -> StorageResult<Option<AuthorizedApp>> {
        self.app_lookups.fetch_add(1, Ordering::SeqCst);

        let delay = *self.lookup_delay.lock();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }

        if self.fail_app_lookups.load(Ordering::SeqCst) {
            return Err(StorageError::connection("injected lookup failure"));
        }
        self.inner.find_authorized_app_by_key(api_key).await
    }

    async fn find_code_by_value(&self, code: &str) -> StorageResult<Option<VerificationCode>> {
        self.inner.find_code_by_value(code).await
    }

    async fn consume_code_and_issue_token(
        &self,
        code: &str,
        token_duration: TimeDelta,
        now: DateTime<Utc>,
    ) -> StorageResult<VerificationToken> {
        self.inner.consume_code_and_issue_token(code, token_duration, now).await
    }

    async fn save_authorized_app(&self, app: &AuthorizedApp) -> StorageResult<()> {
        self.inner.save_authorized_app(app).await
    }

    async fn save_code(&self, code: &VerificationCode) -> StorageResult<()> {
        self.inner.save_code(code).await
    }

    async fn find_token_by_id(&self, token_id: &str) -> StorageResult<Option<VerificationToken>> {
        self.inner.find_token_by_id(token_id).await
    }
}

/// Assert that a [`StorageResult`] is a [`StorageError::Conflict`].
///
/// # Examples
///
/// ```no_run
/// // Requires the `testutil` feature to be enabled.
/// use enverify_storage::assert_conflict;
/// use enverify_storage::error::{StorageError, StorageResult};
///
/// let result: StorageResult<()> = Err(StorageError::Conflict);
/// assert_conflict!(result);
/// ```
#[macro_export]
macro_rules! assert_conflict {
    ($result:expr) => {
        assert!(
            matches!($result, Err($crate::error::StorageError::Conflict)),
            "expected StorageError::Conflict, got: {:?}",
            $result,
        );
    };
}

/// Assert that a [`StorageResult`] is a [`StorageError::NotFound`].
#[macro_export]
macro_rules! assert_not_found {
    ($result:expr) => {
        assert!(
            matches!($result, Err($crate::error::StorageError::NotFound { .. })),
            "expected StorageError::NotFound, got: {:?}",
            $result,
        );
    };
}
