//! HTTP request handlers for Gatekeeper.

pub mod health;
pub mod me;
pub mod metrics;

pub use health::{health_check, readiness_check};
pub use me::{get_me, get_my_organization};
pub use metrics::metrics_handler;
