//! Permission middleware.
//!
//! Runs after [`require_auth`](super::require_auth) and checks the request's
//! `Principal` against the [`PermissionRegistry`] for one required permission.
//!
//! Apply with `route_layer` beneath the auth layer so it always sees the
//! principal:
//!
//! ```rust,ignore
//! Router::new()
//!     .route("/api/v1/organizations", post(create_organization))
//!     .route_layer(middleware::from_fn_with_state(gate, require_permission))
//!     .route_layer(middleware::from_fn_with_state(auth, require_auth))
//! ```

use crate::auth::Principal;
use crate::errors::GateError;
use crate::observability::metrics;
use crate::rbac::PermissionRegistry;
use axum::{
    extract::{Request, State},
    middleware::Next,
    response::IntoResponse,
};
use std::sync::Arc;
use tracing::instrument;

/// State for one permission gate.
#[derive(Clone)]
pub struct PermissionGateState {
    /// Shared role → permission mapping.
    pub registry: Arc<PermissionRegistry>,

    /// Permission every request through this gate must hold.
    pub permission: Arc<str>,
}

impl PermissionGateState {
    pub fn new(registry: Arc<PermissionRegistry>, permission: &str) -> Self {
        Self {
            registry,
            permission: Arc::from(permission),
        }
    }
}

/// Permission middleware.
///
/// # Response
///
/// - 401 `unauthenticated` if no principal is attached
/// - 403 `forbidden` if none of the principal's roles grants the permission
/// - Otherwise continues to the next handler
#[instrument(skip_all, name = "gatekeeper.middleware.permission", fields(permission = %state.permission))]
pub async fn require_permission(
    State(state): State<Arc<PermissionGateState>>,
    req: Request,
    next: Next,
) -> Result<impl IntoResponse, GateError> {
    let Some(principal) = req.extensions().get::<Principal>() else {
        tracing::warn!(
            target: "gatekeeper.middleware.permission",
            "No principal on request, auth layer missing or out of order"
        );
        metrics::record_authorization_decision("unauthenticated");
        return Err(GateError::Unauthenticated);
    };

    if !state.registry.has_permission(principal, &state.permission) {
        tracing::info!(
            target: "gatekeeper.middleware.permission",
            roles = ?principal.roles(),
            "Permission denied"
        );
        metrics::record_authorization_decision("deny");
        return Err(GateError::Forbidden);
    }

    metrics::record_authorization_decision("allow");
    Ok(next.run(req).await)
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use axum::{
        body::Body,
        http::StatusCode,
        middleware::{self, Next},
        routing::get,
        Router,
    };
    use std::collections::HashMap;
    use tower::ServiceExt;

    fn registry() -> Arc<PermissionRegistry> {
        Arc::new(PermissionRegistry::from_map(HashMap::from([(
            "SUPER_ADMIN".to_string(),
            vec!["organization:create".to_string()],
        )])))
    }

    /// Router where a stub layer plays the part of the auth middleware.
    fn app(principal: Option<Principal>) -> Router {
        let gate = Arc::new(PermissionGateState::new(registry(), "organization:create"));

        Router::new()
            .route("/organizations", get(|| async { "created" }))
            .route_layer(middleware::from_fn_with_state(gate, require_permission))
            .route_layer(middleware::from_fn(move |mut req: Request, next: Next| {
                let principal = principal.clone();
                async move {
                    if let Some(principal) = principal {
                        req.extensions_mut().insert(principal);
                    }
                    next.run(req).await
                }
            }))
    }

    async fn status_for(principal: Option<Principal>) -> StatusCode {
        app(principal)
            .oneshot(
                axum::http::Request::builder()
                    .uri("/organizations")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap()
            .status()
    }

    #[test]
    fn test_gate_state_is_clone() {
        fn assert_clone<T: Clone>() {}
        assert_clone::<PermissionGateState>();
    }

    #[tokio::test]
    async fn test_granted_permission_passes() {
        let status = status_for(Some(Principal::for_testing("u", &["SUPER_ADMIN"], None))).await;
        assert_eq!(status, StatusCode::OK);
    }

    #[tokio::test]
    async fn test_lowercase_role_passes() {
        let status = status_for(Some(Principal::for_testing("u", &["super_admin"], None))).await;
        assert_eq!(status, StatusCode::OK);
    }

    #[tokio::test]
    async fn test_missing_permission_is_403() {
        let status = status_for(Some(Principal::for_testing("u", &["ORG_ADMIN"], None))).await;
        assert_eq!(status, StatusCode::FORBIDDEN);
    }

    #[tokio::test]
    async fn test_missing_principal_is_401() {
        assert_eq!(status_for(None).await, StatusCode::UNAUTHORIZED);
    }
}
