//! Middleware for Gatekeeper.
//!
//! # Components
//!
//! - `auth` - Bearer token authentication (AuthGate)
//! - `permission` - Per-route permission check (PermissionGate)

pub mod auth;
pub mod permission;

pub use auth::{extract_bearer_token, require_auth, AuthState};
pub use permission::{require_permission, PermissionGateState};
