//! Transaction trait for atomic storage operations.
//!
//! A transaction buffers compare-and-set writes until
//! [`commit`](Transaction::commit) and then applies them all-or-nothing.
//! Preconditions are evaluated at commit time, which is what lets two racing
//! code consumptions resolve to a single winner.
//!
//! # Example
//!
//! ```
//! use enverify_storage::{MemoryBackend, StorageBackend};
//!
//! # tokio::runtime::Builder::new_current_thread().enable_all().build().unwrap().block_on(async {
//! let backend = MemoryBackend::new();
//! backend.set(b"verification-codes/123456".to_vec(), b"unused".to_vec()).await.unwrap();
//!
//! let mut txn = backend.transaction().await.unwrap();
//! txn.compare_and_set(
//!     b"verification-codes/123456".to_vec(),
//!     Some(b"unused".to_vec()),
//!     b"used".to_vec(),
//! )
//! .unwrap();
//! txn.compare_and_set(b"verification-tokens/t-1".to_vec(), None, b"token".to_vec()).unwrap();
//! txn.commit().await.unwrap();
//!
//! let code = backend.get(b"verification-codes/123456").await.unwrap().unwrap();
//! assert_eq!(&code[..], b"used");
//! # });
//! ```

use async_trait::async_trait;
use bytes::Bytes;

use crate::error::StorageResult;

/// Transaction handle for atomic multi-operation commits.
///
/// Reads see the transaction's own pending writes. Compare-and-set
/// operations are buffered and applied together on commit.
///
/// # Concurrency
///
/// If any buffered compare-and-set precondition no longer holds at commit
/// time, the commit fails with [`StorageError::Conflict`](crate::StorageError::Conflict)
/// and none of the buffered operations are applied.
#[async_trait]
pub trait Transaction: Send + Sync {
    /// Gets a value, preferring this transaction's pending writes.
    ///
    /// # Returns
    ///
    /// - `Ok(Some(bytes))` if the key exists
    /// - `Ok(None)` if the key doesn't exist
    /// - `Err(...)` on storage errors
    async fn get(&self, key: &[u8]) -> StorageResult<Option<Bytes>>;

    /// Buffers a conditional set evaluated at commit time.
    ///
    /// `expected: None` requires the key to be absent (insert-if-absent).
    /// `expected: Some(bytes)` requires an exact byte match.
    ///
    /// # Errors
    ///
    /// Returns an error only if the operation cannot be buffered. A failed
    /// condition surfaces from [`commit`](Transaction::commit).
    fn compare_and_set(
        &mut self,
        key: Vec<u8>,
        expected: Option<Vec<u8>>,
        new_value: Vec<u8>,
    ) -> StorageResult<()>;

    /// Commits all buffered operations atomically.
    ///
    /// # Errors
    ///
    /// - [`StorageError::Conflict`](crate::StorageError::Conflict) if a
    ///   compare-and-set precondition failed
    /// - Other [`StorageError`](crate::StorageError) variants on backend failures
    async fn commit(self: Box<Self>) -> StorageResult<()>;
}
