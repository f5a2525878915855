//! Storage abstraction and verification-code persistence for enverify
//! services.
//!
//! This crate provides the byte-level [`StorageBackend`] trait plus the
//! domain records and [`VerificationStore`] contract that the token
//! exchange builds on.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                 enverify-exchange                           │
//! │   AuthorizationCache │ VerificationLedger │ TokenCodec      │
//! ├─────────────────────────────────────────────────────────────┤
//! │              verification::VerificationStore                │
//! │   (JSON records, atomic consume-and-issue transaction)      │
//! ├─────────────────────────────────────────────────────────────┤
//! │                   StorageBackend                            │
//! │           (get, set, compare-and-set transactions)          │
//! ├─────────────────────────────────────────────────────────────┤
//! │                   MemoryBackend                             │
//! └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! # Quick Start
//!
//! ```
//! use enverify_storage::{MemoryBackend, StorageBackend};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let backend = MemoryBackend::new();
//!
//!     let mut txn = backend.transaction().await?;
//!     txn.compare_and_set(b"lock".to_vec(), None, b"held".to_vec())?;
//!     txn.commit().await?;
//!
//!     assert!(backend.get(b"lock").await?.is_some());
//!     Ok(())
//! }
//! ```
//!
//! # Feature Flags
//!
//! - **`testutil`**: Enables the `testutil` module with seeded stores, record
//!   builders, a lookup-counting store wrapper and assertion macros.
//! - **`failpoints`**: Activates `fail` fail-points inside commit paths.

#![deny(unsafe_code)]

pub mod backend;
pub mod error;
pub mod memory;
#[cfg(any(test, feature = "testutil"))]
#[allow(clippy::expect_used)]
pub mod testutil;
pub mod transaction;
pub mod types;
pub mod verification;

pub use backend::StorageBackend;
pub use error::{BoxError, StorageError, StorageResult};
pub use memory::MemoryBackend;
pub use transaction::Transaction;
pub use types::RealmId;
pub use verification::{
    AuthorizedApp, BackendVerificationStore, CodeState, VerificationCode, VerificationStore,
    VerificationToken,
};
pub use zeroize::Zeroizing;
