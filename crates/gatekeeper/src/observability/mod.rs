//! Observability for Gatekeeper.
//!
//! - `metrics` - Prometheus metric definitions and recorder setup

pub mod metrics;
