//! Request and response bodies for the verify endpoint.

use std::fmt;

use serde::{
    Deserialize, Deserializer, Serialize,
    de::{MapAccess, Visitor, value::MapAccessDeserializer},
};

use crate::error::ExchangeError;

/// Body of a code exchange request.
///
/// Both fields are secrets; [`Debug`] redacts them. Only a JSON object
/// decodes into a request; arrays and scalars are rejected.
#[derive(Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct VerifyCodeRequest {
    /// API key of the calling app.
    pub api_key: String,
    /// The verification code to exchange.
    pub code: String,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct RequestFields {
    #[serde(default)]
    api_key: String,
    #[serde(default)]
    code: String,
}

impl<'de> Deserialize<'de> for VerifyCodeRequest {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        struct RequestVisitor;

        impl<'de> Visitor<'de> for RequestVisitor {
            type Value = VerifyCodeRequest;

            fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str("an object with apiKey and code")
            }

            fn visit_map<A: MapAccess<'de>>(self, map: A) -> Result<Self::Value, A::Error> {
                let fields = RequestFields::deserialize(MapAccessDeserializer::new(map))?;
                Ok(VerifyCodeRequest { api_key: fields.api_key, code: fields.code })
            }
        }

        deserializer.deserialize_map(RequestVisitor)
    }
}

impl VerifyCodeRequest {
    /// Creates a request.
    #[must_use]
    pub fn new(api_key: impl Into<String>, code: impl Into<String>) -> Self {
        Self { api_key: api_key.into(), code: code.into() }
    }

    /// Checks that both fields are present.
    ///
    /// # Errors
    ///
    /// Returns [`ExchangeError::MalformedRequest`] naming the first empty
    /// field.
    pub fn validate(&self) -> Result<(), ExchangeError> {
        if self.api_key.is_empty() {
            return Err(ExchangeError::malformed_request("apiKey is required"));
        }
        if self.code.is_empty() {
            return Err(ExchangeError::malformed_request("code is required"));
        }
        Ok(())
    }
}

impl fmt::Debug for VerifyCodeRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("VerifyCodeRequest")
            .field("api_key", &"[REDACTED]")
            .field("code", &"[REDACTED]")
            .finish()
    }
}

/// A successful exchange.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VerifyCodeSuccess {
    /// Test type echoed from the code.
    pub test_type: String,
    /// Test date as `YYYY-MM-DD`, or empty when unknown.
    pub test_date: String,
    /// The signed verification token.
    pub verification_token: String,
}

/// Response body for both outcomes.
///
/// On success the three token fields are set and `error` is absent. On
/// failure only `error` is set.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VerifyCodeResponse {
    /// Test type of the consumed code.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub test_type: Option<String>,
    /// Test date of the consumed code.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub test_date: Option<String>,
    /// Signed token.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub verification_token: Option<String>,
    /// Public error message.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl VerifyCodeResponse {
    /// Builds an error response carrying `message`.
    #[must_use]
    pub fn error(message: impl Into<String>) -> Self {
        Self { error: Some(message.into()), ..Self::default() }
    }
}

impl From<VerifyCodeSuccess> for VerifyCodeResponse {
    fn from(success: VerifyCodeSuccess) -> Self {
        Self {
            test_type: Some(success.test_type),
            test_date: Some(success.test_date),
            verification_token: Some(success.verification_token),
            error: None,
        }
    }
}

impl From<&ExchangeError> for VerifyCodeResponse {
    fn from(err: &ExchangeError) -> Self {
        Self::error(err.public_message())
    }
}
