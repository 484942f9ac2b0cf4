//! Deterministic RSA fixtures for testing
//!
//! Provides reproducible RSA keypairs that sign tokens and publish matching
//! JWKS entries. The same seed always produces the same key. Keys are cached
//! per seed because 2048-bit generation is slow.

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use gatekeeper::auth::Jwk;
use jsonwebtoken::{encode, Algorithm, EncodingKey, Header};
use rand::rngs::StdRng;
use rand::SeedableRng;
use rsa::pkcs1::{EncodeRsaPrivateKey, LineEnding};
use rsa::traits::PublicKeyParts;
use rsa::RsaPrivateKey;
use serde_json::{json, Value};
use std::collections::HashMap;
use std::sync::{Arc, Mutex, OnceLock};

/// Base64url of 65537.
pub const STANDARD_EXPONENT_B64: &str = "AQAB";

static KEY_CACHE: OnceLock<Mutex<HashMap<u64, Arc<RsaPrivateKey>>>> = OnceLock::new();

fn private_key_for_seed(seed: u64) -> Arc<RsaPrivateKey> {
    let cache = KEY_CACHE.get_or_init(|| Mutex::new(HashMap::new()));
    let mut cache = cache.lock().unwrap_or_else(std::sync::PoisonError::into_inner);

    cache
        .entry(seed)
        .or_insert_with(|| {
            let mut rng = StdRng::seed_from_u64(seed);
            Arc::new(RsaPrivateKey::new(&mut rng, 2048).expect("RSA key generation failed"))
        })
        .clone()
}

/// RSA keypair with a key ID, for signing test tokens.
///
/// # Example
/// ```rust,ignore
/// let keypair = TestRsaKeypair::new(1, "k1");
/// let token = keypair.sign(&TestTokenBuilder::new().build());
/// let jwks = json!({"keys": [keypair.jwk_json()]});
/// ```
#[derive(Clone)]
pub struct TestRsaKeypair {
    kid: String,
    private_key: Arc<RsaPrivateKey>,
    encoding_key: EncodingKey,
}

impl TestRsaKeypair {
    /// Deterministic keypair for `seed`, published under `kid`.
    pub fn new(seed: u64, kid: &str) -> Self {
        let private_key = private_key_for_seed(seed);
        let pem = private_key
            .to_pkcs1_pem(LineEnding::LF)
            .expect("PKCS#1 PEM encoding failed");
        let encoding_key =
            EncodingKey::from_rsa_pem(pem.as_bytes()).expect("jsonwebtoken rejected RSA PEM");

        Self {
            kid: kid.to_string(),
            private_key,
            encoding_key,
        }
    }

    /// Key ID placed in token headers and the JWK.
    pub fn kid(&self) -> &str {
        &self.kid
    }

    /// Modulus, base64url without padding.
    pub fn modulus_b64(&self) -> String {
        URL_SAFE_NO_PAD.encode(self.private_key.n().to_bytes_be())
    }

    /// Public exponent, base64url without padding.
    pub fn exponent_b64(&self) -> String {
        URL_SAFE_NO_PAD.encode(self.private_key.e().to_bytes_be())
    }

    /// Public half as a gatekeeper JWK (advertised alg RS256).
    pub fn jwk(&self) -> Jwk {
        Jwk::rsa(&self.kid, self.modulus_b64(), self.exponent_b64())
    }

    /// Public half as a JWKS entry, advertising `alg`.
    pub fn jwk_json_with_alg(&self, alg: &str) -> Value {
        json!({
            "kty": "RSA",
            "kid": self.kid,
            "use": "sig",
            "alg": alg,
            "n": self.modulus_b64(),
            "e": self.exponent_b64(),
        })
    }

    /// Public half as a JWKS entry advertising RS256.
    pub fn jwk_json(&self) -> Value {
        self.jwk_json_with_alg("RS256")
    }

    /// Sign `claims` with RS256 and this key's `kid`.
    pub fn sign(&self, claims: &Value) -> String {
        self.sign_with_alg(Algorithm::RS256, claims)
    }

    /// Sign `claims` with `alg` (an RSA algorithm) and this key's `kid`.
    pub fn sign_with_alg(&self, alg: Algorithm, claims: &Value) -> String {
        let mut header = Header::new(alg);
        header.kid = Some(self.kid.clone());
        self.sign_with_header(&header, claims)
    }

    /// Sign `claims` with an arbitrary header (e.g. no `kid`).
    pub fn sign_with_header(&self, header: &Header, claims: &Value) -> String {
        encode(header, claims, &self.encoding_key).expect("token signing failed")
    }
}

/// Token with the given header and payload and a junk signature.
///
/// For tests that must be rejected before any signature check (e.g.
/// `alg: none`).
pub fn unsigned_token(header: &Value, claims: &Value) -> String {
    format!(
        "{}.{}.{}",
        URL_SAFE_NO_PAD.encode(header.to_string()),
        URL_SAFE_NO_PAD.encode(claims.to_string()),
        URL_SAFE_NO_PAD.encode(b"not-a-signature"),
    )
}
