//! Verification token claims and compact ES256 encoding.
//!
//! A signed token looks like:
//!
//! ```text
//! base64url({"typ":"JWT","alg":"ES256","kid":"<key id>"})
//!   . base64url({"aud":..,"exp":..,"jti":..,"iat":..,"iss":..,"sub":"confirmed.2020-07-01"})
//!   . base64url(r || s)
//! ```
//!
//! Encoding goes through a [`KeySigner`] so the private key can live
//! anywhere. Decoding and verification use `jsonwebtoken`, as a downstream
//! consumer would.

use std::sync::Arc;

use base64::{Engine, engine::general_purpose::URL_SAFE_NO_PAD};
use enverify_storage::VerificationToken;
use jsonwebtoken::{Algorithm, DecodingKey, Header, Validation};
use serde::{Deserialize, Serialize};

use crate::{
    clock::Clock,
    error::{SignerError, TokenError},
    signer::KeySigner,
};

/// Claims carried by a verification token.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct VerificationClaims {
    /// Audience.
    pub aud: String,
    /// Expiry, seconds since the Unix epoch.
    pub exp: i64,
    /// Token id, matching the persisted token record.
    pub jti: String,
    /// Issued at, seconds since the Unix epoch.
    pub iat: i64,
    /// Issuer.
    pub iss: String,
    /// `<testType>.<testDate>`.
    pub sub: String,
}

/// Formats the `sub` claim from a test type and formatted test date.
#[must_use]
pub fn format_subject(test_type: &str, test_date: &str) -> String {
    format!("{test_type}.{test_date}")
}

/// Builds, signs and checks verification tokens for one issuer.
#[derive(Clone, Debug)]
pub struct TokenCodec {
    issuer: String,
    audience: String,
    clock: Arc<dyn Clock>,
}

impl TokenCodec {
    /// Creates a codec stamping `issuer` and `audience` into every token.
    pub fn new(
        issuer: impl Into<String>,
        audience: impl Into<String>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self { issuer: issuer.into(), audience: audience.into(), clock }
    }

    /// Configured issuer.
    #[must_use]
    pub fn issuer(&self) -> &str {
        &self.issuer
    }

    /// Configured audience.
    #[must_use]
    pub fn audience(&self) -> &str {
        &self.audience
    }

    /// Builds the claim set for `token`.
    #[must_use]
    pub fn build(&self, token: &VerificationToken) -> VerificationClaims {
        VerificationClaims {
            aud: self.audience.clone(),
            exp: token.expires_at.timestamp(),
            jti: token.token_id.clone(),
            iat: self.clock.now().timestamp(),
            iss: self.issuer.clone(),
            sub: format_subject(&token.test_type, &token.format_test_date()),
        }
    }

    /// Encodes `claims` and signs them with `signer`.
    ///
    /// # Errors
    ///
    /// Returns [`SignerError::SigningFailure`] if encoding or signing fails,
    /// or [`SignerError::Timeout`] from a remote signer.
    pub async fn sign(
        &self,
        claims: &VerificationClaims,
        signer: &dyn KeySigner,
    ) -> Result<String, SignerError> {
        let mut header = Header::new(Algorithm::ES256);
        header.kid = Some(signer.key_id().to_owned());

        let header_json = serde_json::to_vec(&header)
            .map_err(|e| SignerError::signing_failure(format!("failed to encode header: {e}")))?;
        let claims_json = serde_json::to_vec(claims)
            .map_err(|e| SignerError::signing_failure(format!("failed to encode claims: {e}")))?;

        let signing_input = format!(
            "{}.{}",
            URL_SAFE_NO_PAD.encode(header_json),
            URL_SAFE_NO_PAD.encode(claims_json)
        );
        let signature = signer.sign(signing_input.as_bytes()).await?;

        Ok(format!("{signing_input}.{}", URL_SAFE_NO_PAD.encode(signature)))
    }

    /// Verifies signature, issuer, audience and expiry of `token`.
    ///
    /// # Errors
    ///
    /// Returns a [`TokenError`] describing the first failed check.
    pub fn verify(&self, token: &str, key: &DecodingKey) -> Result<VerificationClaims, TokenError> {
        let mut validation = Validation::new(Algorithm::ES256);
        validation.set_issuer(&[&self.issuer]);
        validation.set_audience(&[&self.audience]);
        validation.set_required_spec_claims(&["exp", "iss", "aud", "sub"]);
        validation.validate_exp = true;
        validation.validate_nbf = false;

        let data = jsonwebtoken::decode::<VerificationClaims>(token, key, &validation)?;
        Ok(data.claims)
    }
}

/// Decodes claims without verifying the signature.
///
/// # Errors
///
/// Returns [`TokenError::InvalidFormat`] if the token does not have three
/// segments or the payload is not valid base64url JSON.
pub fn decode_claims(token: &str) -> Result<VerificationClaims, TokenError> {
    let parts: Vec<&str> = token.split('.').collect();
    let [_, payload, _] = parts.as_slice() else {
        return Err(TokenError::invalid_format("token must have 3 parts separated by dots"));
    };

    let payload_bytes = URL_SAFE_NO_PAD
        .decode(payload)
        .map_err(|e| TokenError::invalid_format(format!("failed to decode payload: {e}")))?;

    serde_json::from_slice(&payload_bytes)
        .map_err(|e| TokenError::invalid_format(format!("failed to parse claims: {e}")))
}
