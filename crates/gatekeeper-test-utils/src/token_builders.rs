//! Builder patterns for test data construction
//!
//! Provides a fluent API for creating identity-provider style token claims.

use chrono::{Duration, Utc};
use serde_json::{json, Map, Value};

/// Issuer used by the test harness unless a test overrides it.
pub const TEST_ISSUER: &str = "http://localhost:8180/realms/care";

/// Builder for creating test JWT claims
///
/// # Example
/// ```rust,ignore
/// let claims = TestTokenBuilder::new()
///     .for_user("alice")
///     .with_roles(&["CAREGIVER"])
///     .with_organization("org-1")
///     .expires_in(3600)
///     .build();
/// ```
pub struct TestTokenBuilder {
    claims: Map<String, Value>,
}

impl TestTokenBuilder {
    /// Create a new token builder with defaults: subject `test-subject`,
    /// issuer [`TEST_ISSUER`], one hour to expiry, no roles.
    pub fn new() -> Self {
        let now = Utc::now();
        let mut claims = Map::new();
        claims.insert("sub".to_string(), json!("test-subject"));
        claims.insert("iss".to_string(), json!(TEST_ISSUER));
        claims.insert("iat".to_string(), json!(now.timestamp()));
        claims.insert(
            "exp".to_string(),
            json!((now + Duration::seconds(3600)).timestamp()),
        );
        Self { claims }
    }

    /// Set the subject
    pub fn for_user(self, subject: &str) -> Self {
        self.with_claim("sub", json!(subject))
    }

    /// Remove the subject
    pub fn without_subject(mut self) -> Self {
        self.claims.remove("sub");
        self
    }

    /// Set the issuer
    pub fn issued_by(self, issuer: &str) -> Self {
        self.with_claim("iss", json!(issuer))
    }

    /// Set expiration in seconds from now (negative for expired tokens)
    pub fn expires_in(self, seconds: i64) -> Self {
        self.with_claim("exp", json!((Utc::now() + Duration::seconds(seconds)).timestamp()))
    }

    /// Set `realm_access.roles`
    pub fn with_roles(self, roles: &[&str]) -> Self {
        self.with_claim("realm_access", json!({ "roles": roles }))
    }

    /// Set `organizationId`
    pub fn with_organization(self, organization_id: &str) -> Self {
        self.with_claim("organizationId", json!(organization_id))
    }

    /// Set any claim
    pub fn with_claim(mut self, name: &str, value: Value) -> Self {
        self.claims.insert(name.to_string(), value);
        self
    }

    /// Build the claims as a JSON value
    pub fn build(self) -> Value {
        Value::Object(self.claims)
    }
}

impl Default for TestTokenBuilder {
    fn default() -> Self {
        Self::new()
    }
}
