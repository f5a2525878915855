//! Storage backend trait definition.
//!
//! [`StorageBackend`] is a minimal byte-oriented key-value interface. Domain
//! logic (authorized apps, verification codes, tokens) lives one layer up in
//! [`crate::verification`], which serializes records and relies only on
//! `get`, `set` and compare-and-set transactions from this trait.
//!
//! To implement a new backend:
//!
//! 1. Implement [`StorageBackend`]
//! 2. Implement a corresponding [`Transaction`] type with commit-time
//!    compare-and-set checks
//! 3. Map backend-specific errors to [`StorageError`](crate::StorageError)
//!
//! See [`MemoryBackend`](crate::MemoryBackend) for a reference implementation.

use async_trait::async_trait;
use bytes::Bytes;

use crate::{error::StorageResult, transaction::Transaction};

/// Abstract storage backend for key-value operations.
///
/// Backends must be thread-safe (`Send + Sync`) and support concurrent
/// operations.
///
/// # Example
///
/// ```
/// use bytes::Bytes;
/// use enverify_storage::{MemoryBackend, StorageBackend};
///
/// # tokio::runtime::Builder::new_current_thread().enable_all().build().unwrap().block_on(async {
/// let backend = MemoryBackend::new();
///
/// backend.set(b"key".to_vec(), b"value".to_vec()).await.unwrap();
/// let value = backend.get(b"key").await.unwrap();
/// assert_eq!(value, Some(Bytes::from("value")));
/// # });
/// ```
#[async_trait]
pub trait StorageBackend: Send + Sync {
    /// Retrieves a value by key.
    ///
    /// # Returns
    ///
    /// - `Ok(Some(bytes))` if the key exists
    /// - `Ok(None)` if the key doesn't exist
    /// - `Err(...)` on storage errors
    #[must_use = "storage operations may fail and errors must be handled"]
    async fn get(&self, key: &[u8]) -> StorageResult<Option<Bytes>>;

    /// Stores a key-value pair, overwriting any existing value.
    #[must_use = "storage operations may fail and errors must be handled"]
    async fn set(&self, key: Vec<u8>, value: Vec<u8>) -> StorageResult<()>;

    /// Begins a new transaction.
    #[must_use = "storage operations may fail and errors must be handled"]
    async fn transaction(&self) -> StorageResult<Box<dyn Transaction>>;
}
