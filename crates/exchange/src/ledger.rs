//! Verification code state machine.
//!
//! ```text
//! Valid ──consume──▶ Used     (terminal, token issued)
//!   │
//!   └──now > expires_at──▶ Expired  (terminal, computed)
//! ```

use std::sync::Arc;

use chrono::TimeDelta;
use enverify_storage::{CodeState, StorageError, VerificationStore, VerificationToken};

use crate::{clock::Clock, error::ConsumeError};

/// Consumes verification codes exactly once.
#[derive(Clone)]
pub struct VerificationLedger {
    store: Arc<dyn VerificationStore>,
    clock: Arc<dyn Clock>,
}

impl VerificationLedger {
    /// Creates a ledger over `store`, reading time from `clock`.
    #[must_use]
    pub fn new(store: Arc<dyn VerificationStore>, clock: Arc<dyn Clock>) -> Self {
        Self { store, clock }
    }

    /// Marks `code` used and issues a token valid for `token_duration`.
    ///
    /// Expiry is checked before use, so a code that is both expired and
    /// used reports [`ConsumeError::Expired`]. Nothing is retried.
    ///
    /// # Errors
    ///
    /// - [`ConsumeError::NotFound`] if no such code exists
    /// - [`ConsumeError::Expired`] if the code is past its expiry
    /// - [`ConsumeError::AlreadyUsed`] if the code was used, including by a concurrent caller that
    ///   committed first
    /// - [`ConsumeError::Storage`] on any other persistence failure
    #[tracing::instrument(skip_all)]
    pub async fn consume(
        &self,
        code: &str,
        token_duration: TimeDelta,
    ) -> Result<VerificationToken, ConsumeError> {
        let record = self
            .store
            .find_code_by_value(code)
            .await
            .map_err(ConsumeError::Storage)?
            .ok_or(ConsumeError::NotFound)?;

        let now = self.clock.now();
        match record.state_at(now) {
            CodeState::Expired => {
                tracing::debug!(realm_id = %record.realm_id, "verification code expired");
                return Err(ConsumeError::Expired);
            },
            CodeState::Used => {
                tracing::debug!(realm_id = %record.realm_id, "verification code already used");
                return Err(ConsumeError::AlreadyUsed);
            },
            CodeState::Valid => {},
        }

        match self.store.consume_code_and_issue_token(code, token_duration, now).await {
            Ok(token) => {
                tracing::debug!(realm_id = %token.realm_id, "verification code consumed");
                Ok(token)
            },
            Err(StorageError::Conflict) => {
                tracing::debug!("lost consume race, code already used");
                Err(ConsumeError::AlreadyUsed)
            },
            Err(StorageError::NotFound { .. }) => Err(ConsumeError::NotFound),
            Err(err) => Err(ConsumeError::Storage(err)),
        }
    }
}

impl std::fmt::Debug for VerificationLedger {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("VerificationLedger").field("clock", &self.clock).finish_non_exhaustive()
    }
}
