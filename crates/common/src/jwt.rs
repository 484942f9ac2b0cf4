//! JWT utilities shared across Gatekeeper crates.
//!
//! This module provides the pre-verification helpers used before any
//! cryptographic work happens:
//! - Size limits for DoS prevention
//! - Unverified header inspection (`alg`, `kid`)
//! - The accepted signature algorithm family (RSA PKCS#1 v1.5)
//! - Base64url decoding of JWK key components
//!
//! # Security
//!
//! - Tokens are size-checked BEFORE parsing (DoS prevention)
//! - Only `RS256`, `RS384` and `RS512` are accepted; `none`, HMAC, ECDSA,
//!   RSA-PSS and `EdDSA` are all rejected
//! - Generic error messages prevent information leakage
//!
//! # Usage
//!
//! ```rust,ignore
//! use common::jwt::{inspect_header, rsa_algorithm};
//!
//! let header = inspect_header(token)?;
//! let algorithm = rsa_algorithm(&header.alg)?;
//! let kid = header.kid()?;
//! // look up the verification key by kid, then verify with `algorithm`
//! ```

use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine};
use jsonwebtoken::Algorithm;
use thiserror::Error;

// =============================================================================
// Constants
// =============================================================================

/// Maximum allowed JWT size in bytes (8KB).
///
/// JWTs larger than this size are rejected BEFORE any parsing or cryptographic
/// operations.
///
/// # Rationale
///
/// - Typical identity-provider access tokens are 800-2000 bytes (RS256
///   signature plus realm role claims)
/// - 8KB leaves room for large role lists while bounding base64 decode cost
///
/// Per OWASP API Security Top 10 - API4:2023 (Unrestricted Resource Consumption)
pub const MAX_JWT_SIZE_BYTES: usize = 8192; // 8KB

/// Signature algorithms accepted by the verifier.
pub const ALLOWED_ALGORITHMS: [Algorithm; 3] =
    [Algorithm::RS256, Algorithm::RS384, Algorithm::RS512];

// =============================================================================
// Error Types
// =============================================================================

/// Errors that can occur while inspecting a JWT before signature verification.
///
/// Note: Error messages are intentionally generic to prevent information leakage.
/// Detailed information is logged at debug level for troubleshooting.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum JwtValidationError {
    /// Token size exceeds maximum allowed.
    #[error("The access token is invalid or expired")]
    TokenTooLarge,

    /// Token format is invalid (not a valid JWT structure).
    #[error("The access token is invalid or expired")]
    MalformedToken,

    /// Token header names an algorithm outside the accepted family.
    #[error("The access token is invalid or expired")]
    DisallowedAlgorithm(String),

    /// Token is missing required `kid` header.
    #[error("The access token is invalid or expired")]
    MissingKid,
}

// =============================================================================
// Header Types
// =============================================================================

/// JWT header fields read without verifying the signature.
///
/// Nothing in here is trusted. `alg` decides which verification algorithm is
/// attempted and `kid` selects a key from the trusted key set; the signature
/// must still be verified with that key.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnverifiedHeader {
    /// Raw `alg` header value.
    pub alg: String,

    /// `kid` header value, `None` when absent, empty or not a string.
    pub kid: Option<String>,
}

impl UnverifiedHeader {
    /// Returns the key ID or `MissingKid`.
    ///
    /// # Errors
    ///
    /// Returns `JwtValidationError::MissingKid` if the header carried no usable `kid`.
    pub fn kid(&self) -> Result<&str, JwtValidationError> {
        self.kid.as_deref().ok_or(JwtValidationError::MissingKid)
    }
}

// =============================================================================
// Functions
// =============================================================================

/// Read the `alg` and `kid` fields from a JWT header without verifying the signature.
///
/// # Security
///
/// - Token size is checked BEFORE any parsing (denial-of-service prevention)
/// - This function does NOT validate the token signature
/// - The `kid` value should only be used for key lookup in a trusted JWKS
///
/// # Errors
///
/// Returns `JwtValidationError` variants:
/// - `TokenTooLarge` - Token exceeds `MAX_JWT_SIZE_BYTES`
/// - `MalformedToken` - Wrong structure, bad base64, invalid JSON, or `alg` missing
pub fn inspect_header(token: &str) -> Result<UnverifiedHeader, JwtValidationError> {
    // Check token size first (DoS prevention)
    if token.len() > MAX_JWT_SIZE_BYTES {
        tracing::debug!(
            target: "common.jwt",
            token_size = token.len(),
            max_size = MAX_JWT_SIZE_BYTES,
            "Token rejected: size exceeds maximum allowed"
        );
        return Err(JwtValidationError::TokenTooLarge);
    }

    // JWT format: header.payload.signature
    let parts: Vec<&str> = token.split('.').collect();
    if parts.len() != 3 {
        tracing::debug!(
            target: "common.jwt",
            parts = parts.len(),
            "Token rejected: invalid JWT format"
        );
        return Err(JwtValidationError::MalformedToken);
    }

    let header_part = parts.first().ok_or(JwtValidationError::MalformedToken)?;
    let header_bytes = URL_SAFE_NO_PAD.decode(header_part).map_err(|e| {
        tracing::debug!(target: "common.jwt", error = %e, "Failed to decode JWT header base64");
        JwtValidationError::MalformedToken
    })?;

    let header: serde_json::Value = serde_json::from_slice(&header_bytes).map_err(|e| {
        tracing::debug!(target: "common.jwt", error = %e, "Failed to parse JWT header JSON");
        JwtValidationError::MalformedToken
    })?;

    let alg = header
        .get("alg")
        .and_then(|v| v.as_str())
        .map(ToString::to_string)
        .ok_or_else(|| {
            tracing::debug!(target: "common.jwt", "Token rejected: header has no alg");
            JwtValidationError::MalformedToken
        })?;

    // Empty kid values are treated as absent
    let kid = header
        .get("kid")
        .and_then(|v| v.as_str())
        .filter(|s| !s.is_empty())
        .map(ToString::to_string);

    Ok(UnverifiedHeader { alg, kid })
}

/// Map a header `alg` value onto the accepted RSA algorithm family.
///
/// Matching is exact (`rs256` is not `RS256`).
///
/// # Errors
///
/// Returns `JwtValidationError::DisallowedAlgorithm` for anything outside
/// [`ALLOWED_ALGORITHMS`], including `none`.
pub fn rsa_algorithm(alg: &str) -> Result<Algorithm, JwtValidationError> {
    let allowed = alg
        .parse::<Algorithm>()
        .ok()
        .filter(|algorithm| ALLOWED_ALGORITHMS.contains(algorithm));

    allowed.ok_or_else(|| {
        tracing::debug!(target: "common.jwt", alg = %alg, "Token rejected: algorithm not allowed");
        JwtValidationError::DisallowedAlgorithm(alg.to_string())
    })
}

/// Decode an RSA key component (`n` or `e`) from a JWK.
///
/// Components are unsigned big-endian integers in base64url encoding without
/// padding.
///
/// # Errors
///
/// Returns `base64::DecodeError` if the base64url content cannot be decoded.
pub fn decode_key_component(b64url: &str) -> Result<Vec<u8>, base64::DecodeError> {
    URL_SAFE_NO_PAD.decode(b64url)
}

// =============================================================================
// Tests
// =============================================================================
