//! Permission gate integration tests.
//!
//! Registry decisions on their own, then the full auth + permission chain on
//! `/api/v1/me/organization`.

// Test code is allowed to use expect/unwrap for assertions
#![allow(clippy::unwrap_used, clippy::expect_used)]

use anyhow::Result;
use gatekeeper::auth::Principal;
use gatekeeper::handlers::me::OrganizationResponse;
use gatekeeper::rbac::PermissionRegistry;
use gatekeeper_test_utils::{MockJwksServer, TestGatekeeperServer, TestRsaKeypair, TestTokenBuilder};
use reqwest::StatusCode;
use std::collections::HashMap;

fn single_role_registry() -> PermissionRegistry {
    PermissionRegistry::from_map(HashMap::from([(
        "SUPER_ADMIN".to_string(),
        vec!["organization:create".to_string()],
    )]))
}

// ============================================================================
// Registry decisions
// ============================================================================

#[test]
fn test_role_with_permission_is_allowed() {
    let registry = single_role_registry();
    let principal = Principal::for_testing("admin", &["SUPER_ADMIN"], None);

    assert!(registry.has_permission(&principal, "organization:create"));
}

#[test]
fn test_role_outside_registry_is_denied() {
    let registry = single_role_registry();
    let principal = Principal::for_testing("org-admin", &["ORG_ADMIN"], None);

    assert!(!registry.has_permission(&principal, "organization:create"));
}

#[test]
fn test_no_roles_is_denied() {
    let registry = single_role_registry();
    let principal = Principal::for_testing("nobody", &[], None);

    assert!(!registry.has_permission(&principal, "organization:create"));
}

#[test]
fn test_permission_match_is_case_sensitive() {
    let registry = single_role_registry();
    let principal = Principal::for_testing("admin", &["SUPER_ADMIN"], None);

    assert!(!registry.has_permission(&principal, "Organization:Create"));
}

#[test]
fn test_lowercase_role_matches_uppercase_registry_entry() {
    let registry = single_role_registry();
    let principal = Principal::for_testing("admin", &["super_admin"], None);

    assert!(registry.has_permission(&principal, "organization:create"));
}

#[test]
fn test_builtin_registry_hierarchy() -> Result<()> {
    let registry = PermissionRegistry::builtin()?;
    let super_admin = Principal::for_testing("s", &["SUPER_ADMIN"], None);
    let org_admin = Principal::for_testing("o", &["ORG_ADMIN"], Some("org-1"));
    let patient = Principal::for_testing("p", &["PATIENT"], Some("org-1"));

    assert!(registry.has_permission(&super_admin, "organization:delete"));
    assert!(!registry.has_permission(&org_admin, "organization:delete"));
    assert!(registry.has_permission(&org_admin, "user:create"));
    assert!(registry.has_permission(&patient, "patient:read"));
    assert!(!registry.has_permission(&patient, "patient:update"));
    Ok(())
}

#[test]
fn test_effective_permissions_union_of_roles() -> Result<()> {
    let registry = PermissionRegistry::builtin()?;
    let principal = Principal::for_testing("both", &["PATIENT", "CAREGIVER"], None);

    assert_eq!(
        registry.effective_permissions(&principal),
        vec!["caregiver:read", "organization:read", "patient:read", "patient:update"]
    );
    Ok(())
}

// ============================================================================
// HTTP chain
// ============================================================================

async fn get_organization(
    server: &TestGatekeeperServer,
    token: Option<&str>,
) -> Result<reqwest::Response> {
    let mut request = reqwest::Client::new().get(format!("{}/api/v1/me/organization", server.url()));
    if let Some(token) = token {
        request = request.bearer_auth(token);
    }
    Ok(request.send().await?)
}

#[tokio::test]
async fn test_lowercase_caregiver_role_can_read_organization() -> Result<()> {
    let keypair = TestRsaKeypair::new(1, "k1");
    let jwks = MockJwksServer::start(&[&keypair]).await;
    let server = TestGatekeeperServer::spawn(&jwks.url()).await?;

    let token = keypair.sign(
        &TestTokenBuilder::new()
            .with_roles(&["caregiver"])
            .with_organization("org-3")
            .build(),
    );
    let response = get_organization(&server, Some(&token)).await?;

    assert_eq!(response.status(), StatusCode::OK);
    let body: OrganizationResponse = response.json().await?;
    assert_eq!(body.organization_id.as_deref(), Some("org-3"));
    Ok(())
}

#[tokio::test]
async fn test_patient_cannot_read_organization() -> Result<()> {
    let keypair = TestRsaKeypair::new(1, "k1");
    let jwks = MockJwksServer::start(&[&keypair]).await;
    let server = TestGatekeeperServer::spawn(&jwks.url()).await?;

    let token = keypair.sign(&TestTokenBuilder::new().with_roles(&["PATIENT"]).build());
    let response = get_organization(&server, Some(&token)).await?;

    assert_eq!(response.status(), StatusCode::FORBIDDEN);
    assert!(response.headers().get("www-authenticate").is_none());
    assert_eq!(response.text().await?, "forbidden");
    Ok(())
}

#[tokio::test]
async fn test_gated_route_authenticates_first() -> Result<()> {
    let keypair = TestRsaKeypair::new(1, "k1");
    let jwks = MockJwksServer::start(&[&keypair]).await;
    let server = TestGatekeeperServer::spawn(&jwks.url()).await?;

    let response = get_organization(&server, None).await?;

    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    assert_eq!(response.text().await?, "missing authorization");
    Ok(())
}

#[tokio::test]
async fn test_custom_registry_controls_access() -> Result<()> {
    let keypair = TestRsaKeypair::new(1, "k1");
    let jwks = MockJwksServer::start(&[&keypair]).await;
    let registry = PermissionRegistry::from_map(HashMap::from([(
        "AUDITOR".to_string(),
        vec!["organization:read".to_string()],
    )]));
    let server = TestGatekeeperServer::spawn_with_registry(&jwks.url(), registry).await?;

    let auditor = keypair.sign(&TestTokenBuilder::new().with_roles(&["AUDITOR"]).build());
    let caregiver = keypair.sign(&TestTokenBuilder::new().with_roles(&["CAREGIVER"]).build());

    assert_eq!(
        get_organization(&server, Some(&auditor)).await?.status(),
        StatusCode::OK
    );
    assert_eq!(
        get_organization(&server, Some(&caregiver)).await?.status(),
        StatusCode::FORBIDDEN
    );
    Ok(())
}
