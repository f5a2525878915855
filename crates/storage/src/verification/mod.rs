//! Verification-code domain records and their persistence contract.
//!
//! The exchange layer never touches raw bytes. It talks to a
//! [`VerificationStore`], which maps three record types onto any
//! [`StorageBackend`](crate::StorageBackend):
//!
//! | Record | Key |
//! |--------|-----|
//! | [`AuthorizedApp`] | `authorized-apps/{api_key}` |
//! | [`VerificationCode`] | `verification-codes/{code}` |
//! | [`VerificationToken`] | `verification-tokens/{token_id}` |
//!
//! # Code lifecycle
//!
//! ```text
//! ┌─────────────┐  consume (atomic)  ┌─────────────┐
//! │    Valid    │───────────────────►│    Used     │
//! │ (unexpired) │                    │ (terminal)  │
//! └──────┬──────┘                    └─────────────┘
//!        │ now > expires_at
//!        ▼
//! ┌─────────────┐
//! │   Expired   │  computed, never written
//! └─────────────┘
//! ```
//!
//! # Examples
//!
//! ```
//! use chrono::{Duration, Utc};
//! use enverify_storage::{
//!     MemoryBackend, RealmId,
//!     verification::{BackendVerificationStore, VerificationCode, VerificationStore},
//! };
//!
//! # tokio::runtime::Builder::new_current_thread().enable_all().build().unwrap().block_on(async {
//! let store = BackendVerificationStore::new(MemoryBackend::new());
//!
//! let code = VerificationCode::builder()
//!     .code("123456")
//!     .realm_id(RealmId::from(1))
//!     .test_type("confirmed")
//!     .expires_at(Utc::now() + Duration::hours(1))
//!     .build();
//! store.save_code(&code).await.unwrap();
//!
//! let token = store
//!     .consume_code_and_issue_token("123456", Duration::hours(24), Utc::now())
//!     .await
//!     .unwrap();
//! assert_eq!(token.test_type, "confirmed");
//! # });
//! ```

mod records;
mod store;

pub use records::{AuthorizedApp, CodeState, VerificationCode, VerificationToken};
pub use store::{
    AUTHORIZED_APP_PREFIX, BackendVerificationStore, VERIFICATION_CODE_PREFIX,
    VERIFICATION_TOKEN_PREFIX, VerificationStore,
};
