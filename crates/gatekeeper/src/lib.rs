//! Gatekeeper Service Library
//!
//! Token verification and authorization gate for the multi-tenant care
//! platform API. Every request to a protected route passes through:
//!
//! ```text
//! require_auth -> TokenVerifier -> KeySource -> Principal -> require_permission -> handler
//! ```
//!
//! # Modules
//!
//! - `auth` - Key source, token verification, principal
//! - `rbac` - Role → permission registry
//! - `middleware` - AuthGate and PermissionGate axum middleware
//! - `errors` - Gate errors with HTTP status code mapping
//! - `config` - Service configuration from environment
//! - `handlers` - HTTP request handlers
//! - `observability` - Prometheus metrics
//! - `routes` - Axum router setup

pub mod auth;
pub mod config;
pub mod errors;
pub mod handlers;
pub mod middleware;
pub mod observability;
pub mod rbac;
pub mod routes;
