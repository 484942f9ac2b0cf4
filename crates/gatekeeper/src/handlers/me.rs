//! Current principal handlers.
//!
//! Return what the gate established about the caller.

use crate::auth::Principal;
use crate::routes::AppState;
use axum::{extract::State, Json};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::instrument;

/// Response for `/api/v1/me`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MeResponse {
    /// Subject (`sub` claim).
    pub sub: String,

    /// Realm roles, in token order.
    pub roles: Vec<String>,

    /// Permissions granted by those roles, sorted.
    pub permissions: Vec<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub organization_id: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub organization_schema_name: Option<String>,
}

/// Response for `/api/v1/me/organization`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrganizationResponse {
    pub organization_id: Option<String>,
    pub organization_schema_name: Option<String>,
}

/// Handler for GET /api/v1/me
///
/// Requires the auth middleware.
///
/// ## Response
///
/// ```json
/// {
///   "sub": "4f9c...",
///   "roles": ["CAREGIVER"],
///   "permissions": ["caregiver:read", "organization:read", "patient:read", "patient:update"],
///   "organization_id": "org-42",
///   "organization_schema_name": "org_42"
/// }
/// ```
#[instrument(skip_all, name = "gatekeeper.handlers.me")]
pub async fn get_me(State(state): State<Arc<AppState>>, principal: Principal) -> Json<MeResponse> {
    tracing::debug!(target: "gatekeeper.handlers.me", "Returning principal");

    Json(MeResponse {
        sub: principal.subject().to_string(),
        roles: principal.roles().to_vec(),
        permissions: state.registry.effective_permissions(&principal),
        organization_id: principal.organization_id().map(str::to_string),
        organization_schema_name: principal.organization_schema_name().map(str::to_string),
    })
}

/// Handler for GET /api/v1/me/organization
///
/// Requires the auth middleware and the `organization:read` permission.
#[instrument(skip_all, name = "gatekeeper.handlers.me_organization")]
pub async fn get_my_organization(principal: Principal) -> Json<OrganizationResponse> {
    Json(OrganizationResponse {
        organization_id: principal.organization_id().map(str::to_string),
        organization_schema_name: principal.organization_schema_name().map(str::to_string),
    })
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[test]
    fn test_me_response_serialization() {
        let response = MeResponse {
            sub: "user123".to_string(),
            roles: vec!["PATIENT".to_string()],
            permissions: vec!["patient:read".to_string()],
            organization_id: None,
            organization_schema_name: None,
        };

        let json = serde_json::to_string(&response).unwrap();

        assert!(json.contains("\"sub\":\"user123\""));
        assert!(json.contains("\"roles\":[\"PATIENT\"]"));
        assert!(!json.contains("organization_id"));
    }

    #[tokio::test]
    async fn test_get_my_organization() {
        let principal = Principal::for_testing("u", &["CAREGIVER"], Some("org-42"));

        let Json(response) = get_my_organization(principal).await;

        assert_eq!(response.organization_id.as_deref(), Some("org-42"));
        assert_eq!(response.organization_schema_name, None);
    }
}
