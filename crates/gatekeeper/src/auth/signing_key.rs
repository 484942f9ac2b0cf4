//! RSA verification keys parsed from a JWKS document.
//!
//! Only `kty == "RSA"` entries become [`SigningKey`]s. Other key types are
//! skipped. A malformed RSA entry rejects the whole document so a refresh
//! never installs a partially-valid key set.

use crate::auth::jwks::KeySourceError;
use common::jwt::decode_key_component;
use jsonwebtoken::DecodingKey;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

/// JSON Web Key as published by the identity provider.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Jwk {
    /// Key type ("RSA" is the only usable value).
    pub kty: String,

    /// Key ID. Required for RSA entries.
    #[serde(default)]
    pub kid: Option<String>,

    /// Advertised algorithm (e.g. "RS256").
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub alg: Option<String>,

    /// RSA modulus, base64url without padding.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub n: Option<String>,

    /// RSA public exponent, base64url without padding.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub e: Option<String>,

    /// Key use (should be "sig").
    #[serde(default, rename = "use", skip_serializing_if = "Option::is_none")]
    pub key_use: Option<String>,
}

impl Jwk {
    /// Build an RSA signature JWK from already-encoded components.
    pub fn rsa(kid: impl Into<String>, n: impl Into<String>, e: impl Into<String>) -> Self {
        Self {
            kty: "RSA".to_string(),
            kid: Some(kid.into()),
            alg: Some("RS256".to_string()),
            n: Some(n.into()),
            e: Some(e.into()),
            key_use: Some("sig".to_string()),
        }
    }
}

/// JWKS document body.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct JwkSet {
    /// Published keys.
    pub keys: Vec<Jwk>,
}

/// A public RSA verification key. Immutable once constructed.
#[derive(Clone, PartialEq, Eq)]
pub struct SigningKey {
    kid: String,
    alg: Option<String>,
    modulus: Vec<u8>,
    exponent: Vec<u8>,
}

impl fmt::Debug for SigningKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SigningKey")
            .field("kid", &self.kid)
            .field("alg", &self.alg)
            .field("modulus_bits", &(self.modulus.len() * 8))
            .field("public_exponent", &self.public_exponent())
            .finish()
    }
}

impl SigningKey {
    /// Parse a JWK into a signing key.
    ///
    /// Returns `Ok(None)` for non-RSA key types.
    ///
    /// # Errors
    ///
    /// Returns `KeySourceError::MalformedKey` if an RSA entry has no `kid`,
    /// is missing `n` or `e`, or carries components that are not valid
    /// base64url or decode to zero.
    pub fn from_jwk(jwk: &Jwk) -> Result<Option<Self>, KeySourceError> {
        if jwk.kty != "RSA" {
            tracing::debug!(
                target: "gatekeeper.auth.jwks",
                kty = %jwk.kty,
                kid = jwk.kid.as_deref().unwrap_or(""),
                "Skipping non-RSA JWK"
            );
            return Ok(None);
        }

        let kid = jwk
            .kid
            .as_deref()
            .filter(|kid| !kid.is_empty())
            .ok_or_else(|| KeySourceError::MalformedKey {
                kid: String::new(),
                reason: "missing kid".to_string(),
            })?;

        let modulus = decode_component(kid, "n", jwk.n.as_deref())?;
        let exponent = decode_component(kid, "e", jwk.e.as_deref())?;

        Ok(Some(Self {
            kid: kid.to_string(),
            alg: jwk.alg.clone(),
            modulus,
            exponent,
        }))
    }

    /// Key ID.
    pub fn kid(&self) -> &str {
        &self.kid
    }

    /// Algorithm advertised by the publisher, if any.
    pub fn alg(&self) -> Option<&str> {
        self.alg.as_deref()
    }

    /// Modulus as a minimal big-endian byte string.
    pub fn modulus(&self) -> &[u8] {
        &self.modulus
    }

    /// Public exponent as a minimal big-endian byte string.
    pub fn exponent(&self) -> &[u8] {
        &self.exponent
    }

    /// Public exponent as an integer, `None` if it does not fit in 64 bits.
    pub fn public_exponent(&self) -> Option<u64> {
        if self.exponent.len() > 8 {
            return None;
        }
        Some(
            self.exponent
                .iter()
                .fold(0u64, |acc, byte| (acc << 8) | u64::from(*byte)),
        )
    }

    /// Key material in the form `jsonwebtoken` verifies with.
    pub fn decoding_key(&self) -> DecodingKey {
        DecodingKey::from_rsa_raw_components(&self.modulus, &self.exponent)
    }
}

/// Decode one RSA component and strip leading zero bytes.
fn decode_component(kid: &str, name: &str, value: Option<&str>) -> Result<Vec<u8>, KeySourceError> {
    let encoded = value.ok_or_else(|| KeySourceError::MalformedKey {
        kid: kid.to_string(),
        reason: format!("missing {name}"),
    })?;

    let bytes = decode_key_component(encoded).map_err(|e| KeySourceError::MalformedKey {
        kid: kid.to_string(),
        reason: format!("invalid {name} encoding: {e}"),
    })?;

    let first_significant = bytes.iter().position(|b| *b != 0).ok_or_else(|| {
        KeySourceError::MalformedKey {
            kid: kid.to_string(),
            reason: format!("{name} is zero"),
        }
    })?;

    Ok(bytes.get(first_significant..).unwrap_or_default().to_vec())
}

/// Parse a whole JWKS document, all-or-nothing.
///
/// # Errors
///
/// Returns the first `KeySourceError::MalformedKey` encountered; no keys from
/// the document are returned in that case.
pub fn parse_key_set(set: &JwkSet) -> Result<HashMap<String, Arc<SigningKey>>, KeySourceError> {
    let mut keys = HashMap::with_capacity(set.keys.len());

    for jwk in &set.keys {
        if let Some(key) = SigningKey::from_jwk(jwk)? {
            if keys.contains_key(key.kid()) {
                tracing::warn!(
                    target: "gatekeeper.auth.jwks",
                    kid = %key.kid(),
                    "Duplicate kid in JWKS, keeping the last entry"
                );
            }
            keys.insert(key.kid().to_string(), Arc::new(key));
        }
    }

    Ok(keys)
}
