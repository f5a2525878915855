//! In-memory storage backend implementation.
//!
//! [`MemoryBackend`] keeps data in a [`BTreeMap`] behind a
//! [`parking_lot::RwLock`]. Transactions buffer writes and validate every
//! compare-and-set precondition under the write lock at commit time, so two
//! transactions racing on the same key can never both commit.
//!
//! # Example
//!
//! ```
//! use enverify_storage::{MemoryBackend, StorageBackend};
//!
//! #[tokio::main]
//! async fn main() {
//!     let backend = MemoryBackend::new();
//!
//!     backend.set(b"greeting".to_vec(), b"hello".to_vec()).await.unwrap();
//!     let value = backend.get(b"greeting").await.unwrap();
//!
//!     assert_eq!(value.unwrap().as_ref(), b"hello");
//! }
//! ```
//!
//! # Limitations
//!
//! - Data is not persisted; all data is lost when the process exits
//! - No replication or distributed features

use std::{collections::BTreeMap, sync::Arc};

use async_trait::async_trait;
use bytes::Bytes;
use fail::fail_point;
use parking_lot::RwLock;

use crate::{
    backend::StorageBackend,
    error::{StorageError, StorageResult},
    transaction::Transaction,
};

/// In-memory storage backend using [`BTreeMap`].
///
/// # Cloning
///
/// `MemoryBackend` is cheaply cloneable via [`Arc`]. All clones share the
/// same underlying data.
#[derive(Clone, Default)]
pub struct MemoryBackend {
    data: Arc<RwLock<BTreeMap<Vec<u8>, Bytes>>>,
}

impl MemoryBackend {
    /// Creates a new, empty in-memory backend.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the number of stored keys.
    #[must_use]
    pub fn len(&self) -> usize {
        self.data.read().len()
    }

    /// Returns `true` if no keys are stored.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.data.read().is_empty()
    }
}

#[async_trait]
impl StorageBackend for MemoryBackend {
    #[tracing::instrument(skip_all)]
    async fn get(&self, key: &[u8]) -> StorageResult<Option<Bytes>> {
        let data = self.data.read();
        Ok(data.get(key).cloned())
    }

    #[tracing::instrument(skip_all)]
    async fn set(&self, key: Vec<u8>, value: Vec<u8>) -> StorageResult<()> {
        let mut data = self.data.write();
        data.insert(key, Bytes::from(value));
        Ok(())
    }

    async fn transaction(&self) -> StorageResult<Box<dyn Transaction>> {
        Ok(Box::new(MemoryTransaction::new(self.clone())))
    }
}

/// A compare-and-set operation verified at commit time.
#[derive(Debug, Clone)]
struct CasOperation {
    key: Vec<u8>,
    expected: Option<Vec<u8>>,
    new_value: Vec<u8>,
}

/// In-memory transaction with read-your-writes semantics.
struct MemoryTransaction {
    backend: MemoryBackend,
    pending_cas: Vec<CasOperation>,
}

impl MemoryTransaction {
    fn new(backend: MemoryBackend) -> Self {
        Self { backend, pending_cas: Vec::new() }
    }
}

#[async_trait]
impl Transaction for MemoryTransaction {
    async fn get(&self, key: &[u8]) -> StorageResult<Option<Bytes>> {
        // The newest buffered write for a key wins
        if let Some(cas) = self.pending_cas.iter().rev().find(|cas| cas.key == key) {
            return Ok(Some(Bytes::copy_from_slice(&cas.new_value)));
        }

        self.backend.get(key).await
    }

    fn compare_and_set(
        &mut self,
        key: Vec<u8>,
        expected: Option<Vec<u8>>,
        new_value: Vec<u8>,
    ) -> StorageResult<()> {
        self.pending_cas.push(CasOperation { key, expected, new_value });
        Ok(())
    }

    #[tracing::instrument(skip_all)]
    async fn commit(self: Box<Self>) -> StorageResult<()> {
        fail_point!("memory-before-commit", |_| {
            Err(StorageError::connection("injected failure before commit"))
        });

        let mut data = self.backend.data.write();

        // Verify every precondition before touching any data
        for cas in &self.pending_cas {
            let matches = match (&cas.expected, data.get(&cas.key)) {
                (None, None) => true,
                (Some(expected_bytes), Some(current_bytes)) => {
                    expected_bytes.as_slice() == &current_bytes[..]
                },
                _ => false,
            };

            if !matches {
                tracing::debug!("commit rejected: compare-and-set precondition failed");
                return Err(StorageError::Conflict);
            }
        }

        for cas in self.pending_cas {
            data.insert(cas.key, Bytes::from(cas.new_value));
        }

        Ok(())
    }
}
