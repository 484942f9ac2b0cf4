//! HTTP routes for Gatekeeper.
//!
//! Defines the Axum router and application state.

use crate::auth::{KeySource, TokenVerifier};
use crate::handlers;
use crate::middleware::{require_auth, require_permission, AuthState, PermissionGateState};
use crate::rbac::PermissionRegistry;
use axum::{middleware, routing::get, Router};
use metrics_exporter_prometheus::PrometheusHandle;
use std::sync::Arc;
use std::time::Duration;
use tower_http::{timeout::TimeoutLayer, trace::TraceLayer};

/// Permission required by `/api/v1/me/organization`.
pub const ORGANIZATION_READ: &str = "organization:read";

/// Application state shared across all handlers.
#[derive(Clone)]
pub struct AppState {
    /// Verification key source, also consulted for readiness.
    pub key_source: Arc<KeySource>,

    /// Token verifier bound to the configured issuer.
    pub verifier: Arc<TokenVerifier>,

    /// Role → permission mapping.
    pub registry: Arc<PermissionRegistry>,
}

/// Build the application routes.
///
/// Creates an Axum router with:
/// - `/health` - Liveness probe (simple "OK") - public, unversioned
/// - `/ready` - Readiness probe (key cache non-empty) - public, unversioned
/// - `/metrics` - Prometheus metrics endpoint - public, unversioned
/// - `/api/v1/me` - Current principal - requires authentication
/// - `/api/v1/me/organization` - Caller's organization - requires
///   authentication and `organization:read`
/// - TraceLayer for request logging
/// - 30 second request timeout
pub fn build_routes(state: Arc<AppState>, metrics_handle: PrometheusHandle) -> Router {
    let auth_state = Arc::new(AuthState {
        verifier: Arc::clone(&state.verifier),
    });
    let organization_gate = Arc::new(PermissionGateState::new(
        Arc::clone(&state.registry),
        ORGANIZATION_READ,
    ));

    // Public routes (no authentication required)
    let public_routes = Router::new()
        .route("/health", get(handlers::health_check))
        .route("/ready", get(handlers::readiness_check))
        .with_state(state.clone());

    // Metrics route with its own state
    let metrics_routes = Router::new()
        .route("/metrics", get(handlers::metrics_handler))
        .with_state(metrics_handle);

    // Permission-gated routes. route_layer order: the last layer added runs
    // first, so auth always precedes the permission check.
    let gated_routes = Router::new()
        .route("/api/v1/me/organization", get(handlers::get_my_organization))
        .route_layer(middleware::from_fn_with_state(
            organization_gate,
            require_permission,
        ))
        .route_layer(middleware::from_fn_with_state(
            auth_state.clone(),
            require_auth,
        ));

    // Authenticated routes
    let protected_routes = Router::new()
        .route("/api/v1/me", get(handlers::get_me))
        .route_layer(middleware::from_fn_with_state(auth_state, require_auth))
        .with_state(state);

    // Layer order (bottom-to-top execution):
    // 1. TimeoutLayer - Timeout the request (innermost)
    // 2. TraceLayer - Log request details
    public_routes
        .merge(metrics_routes)
        .merge(gated_routes)
        .merge(protected_routes)
        .layer(TimeoutLayer::new(Duration::from_secs(30)))
        .layer(TraceLayer::new_for_http())
}
