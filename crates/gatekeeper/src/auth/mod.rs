//! Authentication for Gatekeeper.
//!
//! # Components
//!
//! - `signing_key` - JWK parsing into RSA verification keys
//! - `jwks` - Key source with background and on-miss refresh
//! - `jwt` - Token verification
//! - `principal` - Verified identity attached to requests

pub mod jwks;
pub mod jwt;
pub mod principal;
pub mod signing_key;

#[cfg(any(test, feature = "test-utils"))]
pub mod testing;

pub use jwks::{HttpKeyFetcher, KeyFetcher, KeySource, KeySourceError};
pub use jwt::{TokenVerifier, VerifyError};
pub use principal::Principal;
pub use signing_key::{Jwk, JwkSet, SigningKey};
