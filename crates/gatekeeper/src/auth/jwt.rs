//! Bearer token verification.
//!
//! Validates incoming JWTs against RSA keys supplied by the [`KeySource`] and
//! turns the verified claims into a [`Principal`].
//!
//! # Security
//!
//! - Tokens are size-checked BEFORE parsing (DoS prevention)
//! - Only `RS256`, `RS384` and `RS512` are accepted
//! - A token without a `kid` is rejected before any key lookup
//! - `iss` must equal the configured issuer exactly
//! - `exp` must be strictly in the future; there is no leeway
//! - Reasons are logged server-side; callers only ever see a generic failure

use crate::auth::jwks::KeySource;
use crate::auth::principal::Principal;
use crate::auth::signing_key::SigningKey;
use crate::observability::metrics;
use chrono::{DateTime, Utc};
use common::jwt::{inspect_header, rsa_algorithm};
use jsonwebtoken::{decode, Algorithm, Validation};
use serde_json::{Map, Value};
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Instant;
use thiserror::Error;
use tracing::instrument;

/// Token verification failures.
///
/// The `InvalidToken` reason is for logs only and must never reach a client.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum VerifyError {
    #[error("No token supplied")]
    NoToken,

    #[error("Invalid token: {0}")]
    InvalidToken(String),

    #[error("Token issuer does not match")]
    InvalidIssuer,

    #[error("Token has no subject")]
    MissingSubject,
}

impl VerifyError {
    /// Bounded label for the validation metric.
    pub fn outcome(&self) -> &'static str {
        match self {
            VerifyError::NoToken => "no_token",
            VerifyError::InvalidToken(_) => "invalid_token",
            VerifyError::InvalidIssuer => "invalid_issuer",
            VerifyError::MissingSubject => "missing_subject",
        }
    }
}

/// Verifies bearer tokens for a single issuer.
pub struct TokenVerifier {
    /// Source of RSA verification keys.
    key_source: Arc<KeySource>,

    /// Exact expected `iss` claim.
    issuer: String,
}

impl TokenVerifier {
    /// Create a new verifier.
    ///
    /// # Arguments
    ///
    /// * `key_source` - Shared key source, already initialized
    /// * `issuer` - Expected `iss` value, compared byte-for-byte
    pub fn new(key_source: Arc<KeySource>, issuer: impl Into<String>) -> Self {
        Self {
            key_source,
            issuer: issuer.into(),
        }
    }

    /// The expected issuer.
    pub fn issuer(&self) -> &str {
        &self.issuer
    }

    /// Verify a token against the current time.
    ///
    /// # Errors
    ///
    /// See [`TokenVerifier::verify_at`].
    pub async fn verify(&self, token: &str) -> Result<Principal, VerifyError> {
        self.verify_at(token, Utc::now()).await
    }

    /// Verify a token as of `now`.
    ///
    /// # Checks
    ///
    /// 1. Size check, then non-empty after trimming
    /// 2. Header `alg` is an RSA PKCS#1 v1.5 algorithm
    /// 3. Header carries a `kid`
    /// 4. Key lookup by `kid` and signature verification
    /// 5. `iss` equals the configured issuer
    /// 6. `exp` is after `now`
    /// 7. `sub` is a non-empty string
    ///
    /// # Errors
    ///
    /// `NoToken` for an empty token, `InvalidIssuer` and `MissingSubject` for
    /// those specific claim failures, `InvalidToken` for everything else.
    #[instrument(skip_all)]
    pub async fn verify_at(&self, token: &str, now: DateTime<Utc>) -> Result<Principal, VerifyError> {
        let start = Instant::now();
        let result = self.verify_inner(token, now).await;

        let outcome = match &result {
            Ok(_) => "success",
            Err(e) => {
                tracing::debug!(target: "gatekeeper.auth.jwt", error = %e, "Token verification failed");
                e.outcome()
            }
        };
        metrics::record_token_validation(outcome, start.elapsed());

        result
    }

    async fn verify_inner(&self, token: &str, now: DateTime<Utc>) -> Result<Principal, VerifyError> {
        // 1. Size check happens inside inspect_header; emptiness first so a
        //    blank token reads as "no token" rather than "malformed".
        let token = token.trim();
        if token.is_empty() {
            return Err(VerifyError::NoToken);
        }

        let header = inspect_header(token).map_err(|e| invalid(format!("header: {e:?}")))?;

        // 2. Algorithm family
        let algorithm = rsa_algorithm(&header.alg).map_err(|e| invalid(format!("{e:?}")))?;

        // 3. kid before any key lookup
        let kid = header.kid().map_err(|e| invalid(format!("{e:?}")))?;

        // 4. Key lookup (may refresh) and signature
        let key = self
            .key_source
            .get(kid)
            .await
            .map_err(|e| invalid(format!("key lookup: {e}")))?;
        let claims = verify_signature(token, &key, algorithm)?;

        // 5-7. Claims
        check_issuer(&claims, &self.issuer)?;
        check_expiry(&claims, now)?;
        let subject = extract_subject(&claims)?;

        tracing::debug!(target: "gatekeeper.auth.jwt", kid = %kid, "Token validated successfully");
        Ok(Principal::from_verified_claims(subject, claims))
    }
}

fn invalid(reason: String) -> VerifyError {
    VerifyError::InvalidToken(reason)
}

/// Verify the signature with `key` and return the raw claims.
///
/// Registered claims are checked by the caller, not by `jsonwebtoken`, so the
/// exact issuer and no-leeway expiry rules apply.
fn verify_signature(
    token: &str,
    key: &SigningKey,
    algorithm: Algorithm,
) -> Result<Map<String, Value>, VerifyError> {
    if let Some(advertised) = key.alg() {
        if rsa_algorithm(advertised).ok() != Some(algorithm) {
            tracing::warn!(
                target: "gatekeeper.auth.jwt",
                kid = %key.kid(),
                advertised = %advertised,
                "Token algorithm does not match the key's advertised algorithm"
            );
            return Err(invalid(format!(
                "token alg {algorithm:?} does not match key alg {advertised}"
            )));
        }
    }

    let mut validation = Validation::new(algorithm);
    validation.validate_exp = false;
    validation.validate_nbf = false;
    validation.validate_aud = false;
    validation.required_spec_claims = HashSet::new();

    decode::<Map<String, Value>>(token, &key.decoding_key(), &validation)
        .map(|data| data.claims)
        .map_err(|e| invalid(format!("signature: {e}")))
}

/// `iss` must equal `expected` exactly.
fn check_issuer(claims: &Map<String, Value>, expected: &str) -> Result<(), VerifyError> {
    match claims.get("iss").and_then(Value::as_str) {
        Some(iss) if iss == expected => Ok(()),
        _ => Err(VerifyError::InvalidIssuer),
    }
}

/// `exp` (integer or fractional seconds) must be strictly after `now`.
fn check_expiry(claims: &Map<String, Value>, now: DateTime<Utc>) -> Result<(), VerifyError> {
    let exp = claims
        .get("exp")
        .and_then(Value::as_f64)
        .ok_or_else(|| invalid("missing or non-numeric exp".to_string()))?;

    #[allow(clippy::cast_precision_loss)] // millisecond timestamps fit in f64 exactly
    let now_seconds = now.timestamp_millis() as f64 / 1000.0;

    if exp > now_seconds {
        Ok(())
    } else {
        Err(invalid("token expired".to_string()))
    }
}

/// `sub` must be a non-empty string.
fn extract_subject(claims: &Map<String, Value>) -> Result<String, VerifyError> {
    claims
        .get("sub")
        .and_then(Value::as_str)
        .filter(|sub| !sub.is_empty())
        .map(str::to_string)
        .ok_or(VerifyError::MissingSubject)
}
