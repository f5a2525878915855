//! Configuration for [`TokenExchangeService`](crate::TokenExchangeService).
//!
//! [`ExchangeConfig`] deserializes from any serde source, with durations in
//! `humantime` form (`"24h"`, `"5m"`). Configs built with
//! [`ExchangeConfig::builder`] are validated on `build()`; deserialized
//! configs should be checked with [`ExchangeConfig::validate`].
//!
//! # Example
//!
//! ```
//! use std::time::Duration;
//!
//! use enverify_exchange::ExchangeConfig;
//!
//! let config = ExchangeConfig::builder()
//!     .token_issuer("gov.example.verify")
//!     .token_signing_key("token-key-1")
//!     .api_key_refresh_interval(Duration::from_secs(60))
//!     .build()?;
//!
//! assert_eq!(config.token_audience(), "gov.example.verify");
//! assert_eq!(config.verification_token_duration(), Duration::from_secs(24 * 60 * 60));
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! ```

use std::time::Duration;

use chrono::TimeDelta;
use serde::{Deserialize, Serialize};

use crate::{
    app_cache::{DEFAULT_CACHE_CAPACITY, DEFAULT_CACHE_TTL, DEFAULT_FETCH_TIMEOUT},
    error::ConfigError,
    signer::KeyManagerConfig,
};

/// Default lifetime of an issued verification token (24 hours).
pub const DEFAULT_TOKEN_DURATION: Duration = Duration::from_secs(24 * 60 * 60);

/// Default bound on a whole exchange (30 seconds).
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// Settings for the token exchange.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ExchangeConfig {
    /// `iss` claim of issued tokens.
    pub(crate) token_issuer: String,

    /// `aud` claim of issued tokens. Falls back to the issuer.
    #[serde(default)]
    pub(crate) token_audience: Option<String>,

    /// Key reference handed to the key manager.
    pub(crate) token_signing_key: String,

    /// Lifetime of an issued token.
    #[serde(with = "humantime_serde", default = "default_token_duration")]
    pub(crate) verification_token_duration: Duration,

    /// TTL of cached authorized apps.
    #[serde(with = "humantime_serde", default = "default_cache_ttl")]
    pub(crate) api_key_cache_ttl: Duration,

    /// Maximum number of cached authorized apps.
    #[serde(default = "default_cache_capacity")]
    pub(crate) api_key_cache_capacity: u64,

    /// Bound on a single authorized app fetch.
    #[serde(with = "humantime_serde", default = "default_fetch_timeout")]
    pub(crate) api_key_fetch_timeout: Duration,

    /// Background refresh interval for recently used API keys.
    #[serde(with = "humantime_serde", default)]
    pub(crate) api_key_refresh_interval: Option<Duration>,

    /// Bound on a whole exchange.
    #[serde(with = "humantime_serde", default = "default_request_timeout")]
    pub(crate) request_timeout: Duration,

    /// Key manager backend.
    #[serde(default)]
    pub(crate) key_manager: KeyManagerConfig,
}

fn default_token_duration() -> Duration {
    DEFAULT_TOKEN_DURATION
}

fn default_cache_ttl() -> Duration {
    DEFAULT_CACHE_TTL
}

fn default_cache_capacity() -> u64 {
    DEFAULT_CACHE_CAPACITY
}

fn default_fetch_timeout() -> Duration {
    DEFAULT_FETCH_TIMEOUT
}

fn default_request_timeout() -> Duration {
    DEFAULT_REQUEST_TIMEOUT
}

#[bon::bon]
impl ExchangeConfig {
    /// Creates a new configuration, validating every field.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] if a required field is empty, a duration is
    /// zero, or the token duration does not fit in a timestamp offset.
    #[builder]
    pub fn new(
        #[builder(into)] token_issuer: String,
        #[builder(into)] token_audience: Option<String>,
        #[builder(into)] token_signing_key: String,
        #[builder(default = DEFAULT_TOKEN_DURATION)] verification_token_duration: Duration,
        #[builder(default = DEFAULT_CACHE_TTL)] api_key_cache_ttl: Duration,
        #[builder(default = DEFAULT_CACHE_CAPACITY)] api_key_cache_capacity: u64,
        #[builder(default = DEFAULT_FETCH_TIMEOUT)] api_key_fetch_timeout: Duration,
        api_key_refresh_interval: Option<Duration>,
        #[builder(default = DEFAULT_REQUEST_TIMEOUT)] request_timeout: Duration,
        #[builder(default)] key_manager: KeyManagerConfig,
    ) -> Result<Self, ConfigError> {
        let config = Self {
            token_issuer,
            token_audience,
            token_signing_key,
            verification_token_duration,
            api_key_cache_ttl,
            api_key_cache_capacity,
            api_key_fetch_timeout,
            api_key_refresh_interval,
            request_timeout,
            key_manager,
        };
        config.validate()?;
        Ok(config)
    }

    /// Checks every field.
    ///
    /// # Errors
    ///
    /// Returns the first [`ConfigError`] found.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.token_issuer.is_empty() {
            return Err(ConfigError::Missing { field: "token_issuer" });
        }
        if self.token_audience.as_deref() == Some("") {
            return Err(ConfigError::Missing { field: "token_audience" });
        }
        if self.token_signing_key.is_empty() {
            return Err(ConfigError::Missing { field: "token_signing_key" });
        }
        if self.api_key_cache_capacity == 0 {
            return Err(ConfigError::BelowMinimum {
                field: "api_key_cache_capacity",
                min: "1".to_owned(),
                value: "0".to_owned(),
            });
        }

        for (field, value) in [
            ("verification_token_duration", self.verification_token_duration),
            ("api_key_cache_ttl", self.api_key_cache_ttl),
            ("api_key_fetch_timeout", self.api_key_fetch_timeout),
            ("request_timeout", self.request_timeout),
            ("key_manager.remote_timeout", self.key_manager.remote_timeout),
        ] {
            require_positive(field, value)?;
        }
        if let Some(interval) = self.api_key_refresh_interval {
            require_positive("api_key_refresh_interval", interval)?;
        }

        self.token_duration()?;
        Ok(())
    }

    /// Returns the issuer.
    #[must_use]
    pub fn token_issuer(&self) -> &str {
        &self.token_issuer
    }

    /// Returns the audience, or the issuer when none is configured.
    #[must_use]
    pub fn token_audience(&self) -> &str {
        self.token_audience.as_deref().unwrap_or(&self.token_issuer)
    }

    /// Returns the signing key reference.
    #[must_use]
    pub fn token_signing_key(&self) -> &str {
        &self.token_signing_key
    }

    /// Returns the token lifetime.
    #[must_use]
    pub fn verification_token_duration(&self) -> Duration {
        self.verification_token_duration
    }

    /// Returns the token lifetime as a timestamp offset.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::OutOfRange`] if the duration is too large.
    pub fn token_duration(&self) -> Result<TimeDelta, ConfigError> {
        TimeDelta::from_std(self.verification_token_duration).map_err(|_| {
            ConfigError::OutOfRange {
                field: "verification_token_duration",
                value: format!("{}s", self.verification_token_duration.as_secs()),
            }
        })
    }

    /// Returns the authorized app cache TTL.
    #[must_use]
    pub fn api_key_cache_ttl(&self) -> Duration {
        self.api_key_cache_ttl
    }

    /// Returns the authorized app cache capacity.
    #[must_use]
    pub fn api_key_cache_capacity(&self) -> u64 {
        self.api_key_cache_capacity
    }

    /// Returns the authorized app fetch timeout.
    #[must_use]
    pub fn api_key_fetch_timeout(&self) -> Duration {
        self.api_key_fetch_timeout
    }

    /// Returns the background refresh interval, if enabled.
    #[must_use]
    pub fn api_key_refresh_interval(&self) -> Option<Duration> {
        self.api_key_refresh_interval
    }

    /// Returns the whole-exchange timeout.
    #[must_use]
    pub fn request_timeout(&self) -> Duration {
        self.request_timeout
    }

    /// Returns the key manager selection.
    #[must_use]
    pub fn key_manager(&self) -> &KeyManagerConfig {
        &self.key_manager
    }
}

fn require_positive(field: &'static str, value: Duration) -> Result<(), ConfigError> {
    if value.is_zero() {
        return Err(ConfigError::BelowMinimum {
            field,
            min: "1ms".to_owned(),
            value: "0ms".to_owned(),
        });
    }
    Ok(())
}
