//! Authorized apps, verification codes and verification tokens.

use chrono::{DateTime, NaiveDate, TimeDelta, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;
use zeroize::Zeroizing;

use crate::types::RealmId;

/// Date format used for test dates in token subjects and responses.
const TEST_DATE_FORMAT: &str = "%Y-%m-%d";

/// A registered calling application, identified by its API key.
///
/// Created and soft-deleted by administrative flows. The exchange only reads
/// it, and treats any app with `deleted_at` set as unauthorized even when a
/// cached copy is still around.
///
/// # Example
///
/// ```
/// use enverify_storage::{RealmId, verification::AuthorizedApp};
///
/// let app = AuthorizedApp::builder()
///     .name("Android app")
///     .api_key("K1".to_owned())
///     .realm_id(RealmId::from(1))
///     .build();
///
/// assert!(app.is_active());
/// ```
#[derive(Clone, PartialEq, Serialize, Deserialize, bon::Builder)]
#[serde(deny_unknown_fields)]
pub struct AuthorizedApp {
    /// Human-readable name shown on admin screens.
    #[builder(into)]
    pub name: String,

    /// Shared secret presented by the app. Compared by exact match.
    #[builder(into)]
    pub api_key: Zeroizing<String>,

    /// Realm this app belongs to.
    pub realm_id: RealmId,

    /// When the app was registered.
    #[builder(default = Utc::now())]
    pub created_at: DateTime<Utc>,

    /// Soft-deletion marker.
    pub deleted_at: Option<DateTime<Utc>>,
}

impl AuthorizedApp {
    /// Returns `true` unless the app has been soft-deleted.
    #[must_use]
    pub fn is_active(&self) -> bool {
        self.deleted_at.is_none()
    }
}

impl std::fmt::Debug for AuthorizedApp {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AuthorizedApp")
            .field("name", &self.name)
            .field("api_key", &"[REDACTED]")
            .field("realm_id", &self.realm_id)
            .field("created_at", &self.created_at)
            .field("deleted_at", &self.deleted_at)
            .finish()
    }
}

/// Lifecycle state of a [`VerificationCode`] at a given instant.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CodeState {
    /// Unused and not yet expired.
    Valid,
    /// Past its expiry. Checked before `Used`.
    Expired,
    /// Already exchanged for a token.
    Used,
}

/// A short-lived, human-entered code proving a test result context.
#[derive(Clone, PartialEq, Serialize, Deserialize, bon::Builder)]
#[serde(deny_unknown_fields)]
pub struct VerificationCode {
    /// The code value the user types in.
    #[builder(into)]
    pub code: String,

    /// Realm that issued the code.
    pub realm_id: RealmId,

    /// Test type, e.g. `confirmed` or `likely`.
    #[builder(into)]
    pub test_type: String,

    /// Date of the test, if known.
    pub test_date: Option<NaiveDate>,

    /// When the code was issued.
    #[builder(default = Utc::now())]
    pub created_at: DateTime<Utc>,

    /// After this instant the code can no longer be consumed.
    pub expires_at: DateTime<Utc>,

    /// Set exactly once, when the code is exchanged for a token.
    pub used_at: Option<DateTime<Utc>>,
}

impl VerificationCode {
    /// Returns `true` if `now` is past the expiry timestamp.
    #[must_use]
    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        now > self.expires_at
    }

    /// Returns `true` if the code has been consumed.
    #[must_use]
    pub fn is_used(&self) -> bool {
        self.used_at.is_some()
    }

    /// Computes the lifecycle state at `now`.
    ///
    /// Expiry wins over use so that a used-and-expired code reports
    /// [`CodeState::Expired`].
    #[must_use]
    pub fn state_at(&self, now: DateTime<Utc>) -> CodeState {
        if self.is_expired_at(now) {
            CodeState::Expired
        } else if self.is_used() {
            CodeState::Used
        } else {
            CodeState::Valid
        }
    }
}

impl std::fmt::Debug for VerificationCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("VerificationCode")
            .field("code", &"[REDACTED]")
            .field("realm_id", &self.realm_id)
            .field("test_type", &self.test_type)
            .field("test_date", &self.test_date)
            .field("created_at", &self.created_at)
            .field("expires_at", &self.expires_at)
            .field("used_at", &self.used_at)
            .finish()
    }
}

/// The long-term token record issued once per consumed code.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct VerificationToken {
    /// Unique token id, carried as the `jti` claim.
    pub token_id: String,
    /// Realm of the consumed code.
    pub realm_id: RealmId,
    /// Test type copied from the code.
    pub test_type: String,
    /// Test date copied from the code.
    pub test_date: Option<NaiveDate>,
    /// When the token was issued.
    pub issued_at: DateTime<Utc>,
    /// When the token stops being accepted downstream.
    pub expires_at: DateTime<Utc>,
}

impl VerificationToken {
    /// Creates a token for `code` with a fresh random id.
    #[must_use]
    pub fn issue(code: &VerificationCode, now: DateTime<Utc>, duration: TimeDelta) -> Self {
        Self {
            token_id: Uuid::new_v4().to_string(),
            realm_id: code.realm_id,
            test_type: code.test_type.clone(),
            test_date: code.test_date,
            issued_at: now,
            expires_at: now + duration,
        }
    }

    /// Formats the test date as `YYYY-MM-DD`, or an empty string if unknown.
    #[must_use]
    pub fn format_test_date(&self) -> String {
        self.test_date.map(|d| d.format(TEST_DATE_FORMAT).to_string()).unwrap_or_default()
    }
}
