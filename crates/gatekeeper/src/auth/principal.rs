//! Authenticated identity extracted from a verified token.
//!
//! A `Principal` only exists for a request whose token passed every
//! verification check. The subject and the raw claims are redacted in Debug
//! output to prevent exposure in logs.

use serde_json::{Map, Value};
use std::fmt;

/// Organization id claim names, in priority order.
const ORGANIZATION_ID_CLAIMS: [&str; 2] = ["organizationId", "organizationID"];

/// Organization schema claim names, in priority order.
const ORGANIZATION_SCHEMA_CLAIMS: [&str; 2] = ["organizationSchemaName", "organizationSchema"];

/// Request-scoped identity.
#[derive(Clone, PartialEq)]
pub struct Principal {
    subject: String,
    roles: Vec<String>,
    organization_id: Option<String>,
    organization_schema_name: Option<String>,
    claims: Map<String, Value>,
}

/// Redacts `subject` and the raw claim map.
impl fmt::Debug for Principal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Principal")
            .field("subject", &"[REDACTED]")
            .field("roles", &self.roles)
            .field("organization_id", &self.organization_id)
            .field("organization_schema_name", &self.organization_schema_name)
            .field("claims", &format_args!("[{} claims]", self.claims.len()))
            .finish()
    }
}

impl Principal {
    /// Build a principal from claims whose signature, issuer, expiry and
    /// subject have already been checked.
    ///
    /// Optional claims never fail extraction: missing, empty, or non-string
    /// values are treated as absent.
    pub(crate) fn from_verified_claims(subject: String, claims: Map<String, Value>) -> Self {
        let roles = realm_roles(&claims);
        let organization_id = first_string_claim(&claims, &ORGANIZATION_ID_CLAIMS);
        let organization_schema_name = first_string_claim(&claims, &ORGANIZATION_SCHEMA_CLAIMS);

        Self {
            subject,
            roles,
            organization_id,
            organization_schema_name,
            claims,
        }
    }

    /// Build a principal directly, bypassing verification.
    #[cfg(any(test, feature = "test-utils"))]
    pub fn for_testing(
        subject: impl Into<String>,
        roles: &[&str],
        organization_id: Option<&str>,
    ) -> Self {
        Self {
            subject: subject.into(),
            roles: roles.iter().map(|r| (*r).to_string()).collect(),
            organization_id: organization_id.map(str::to_string),
            organization_schema_name: None,
            claims: Map::new(),
        }
    }

    /// The `sub` claim.
    pub fn subject(&self) -> &str {
        &self.subject
    }

    /// Realm roles, in token order.
    pub fn roles(&self) -> &[String] {
        &self.roles
    }

    /// Tenant organization id, if the token carries one.
    pub fn organization_id(&self) -> Option<&str> {
        self.organization_id.as_deref()
    }

    /// Tenant schema name, if the token carries one.
    pub fn organization_schema_name(&self) -> Option<&str> {
        self.organization_schema_name.as_deref()
    }

    /// Raw claim map for collaborators that need other claims.
    pub fn claims(&self) -> &Map<String, Value> {
        &self.claims
    }

    /// Look up a single raw claim.
    pub fn claim(&self, name: &str) -> Option<&Value> {
        self.claims.get(name)
    }
}

/// `realm_access.roles`, skipping non-string entries.
fn realm_roles(claims: &Map<String, Value>) -> Vec<String> {
    claims
        .get("realm_access")
        .and_then(|access| access.get("roles"))
        .and_then(Value::as_array)
        .map(|roles| {
            roles
                .iter()
                .filter_map(Value::as_str)
                .map(str::to_string)
                .collect()
        })
        .unwrap_or_default()
}

/// First non-empty string value among `names`.
///
/// When a later alias carries a different non-empty value, the first one
/// still wins and the mismatch is logged.
fn first_string_claim(claims: &Map<String, Value>, names: &[&str]) -> Option<String> {
    let mut found: Option<(&str, &str)> = None;

    for name in names {
        let Some(value) = non_empty_str(claims.get(*name)) else {
            continue;
        };
        match found {
            None => found = Some((name, value)),
            Some((winner, kept)) if kept != value => {
                tracing::warn!(
                    target: "gatekeeper.auth.jwt",
                    kept_claim = %winner,
                    ignored_claim = %name,
                    "Token carries conflicting organization claims, using the first"
                );
            }
            Some(_) => {}
        }
    }

    found.map(|(_, value)| value.to_string())
}

fn non_empty_str(value: Option<&Value>) -> Option<&str> {
    value.and_then(Value::as_str).filter(|s| !s.is_empty())
}
