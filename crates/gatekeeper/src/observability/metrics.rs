//! Metrics definitions for Gatekeeper.
//!
//! All metrics follow Prometheus naming conventions:
//! - `gatekeeper_` prefix
//! - `_total` suffix for counters
//! - `_seconds` suffix for duration histograms
//!
//! # Cardinality
//!
//! Every label value comes from a fixed set chosen in code:
//! - `trigger`: startup, periodic, miss, manual
//! - `status`: success, error, superseded
//! - `outcome`: success, no_token, invalid_token, invalid_issuer, missing_subject
//! - `decision`: allow, deny, unauthenticated
//!
//! Subjects, key ids, and role names are never used as labels.

use metrics::{counter, gauge, histogram};
use metrics_exporter_prometheus::{Matcher, PrometheusBuilder, PrometheusHandle};
use std::time::Duration;

/// Install the Prometheus recorder and return the handle used by `/metrics`.
///
/// Must be called before any metrics are recorded.
///
/// # Errors
///
/// Returns error if the recorder fails to install (e.g., already installed).
pub fn init_metrics_recorder() -> Result<PrometheusHandle, String> {
    PrometheusBuilder::new()
        // Verification is dominated by the RSA check unless a refresh runs
        .set_buckets_for_metric(
            Matcher::Full("gatekeeper_token_validation_duration_seconds".to_string()),
            &[
                0.0005, 0.001, 0.002, 0.005, 0.010, 0.025, 0.050, 0.100, 0.250, 0.500, 1.000,
                2.500, 5.000, 10.000,
            ],
        )
        .map_err(|e| format!("Failed to set token validation buckets: {e}"))?
        .install_recorder()
        .map_err(|e| format!("Failed to install Prometheus recorder: {e}"))
}

// ============================================================================
// Key Source Metrics
// ============================================================================

/// Record a JWKS refresh attempt.
///
/// Metric: `gatekeeper_jwks_refresh_total`
/// Labels: `trigger`, `status`
pub fn record_jwks_refresh(trigger: &'static str, status: &'static str) {
    counter!("gatekeeper_jwks_refresh_total",
        "trigger" => trigger,
        "status" => status
    )
    .increment(1);
}

/// Set the number of cached verification keys.
///
/// Metric: `gatekeeper_jwks_keys`
#[allow(clippy::cast_precision_loss)] // key counts are tiny
pub fn set_jwks_key_count(count: usize) {
    gauge!("gatekeeper_jwks_keys").set(count as f64);
}

// ============================================================================
// Token Verification Metrics
// ============================================================================

/// Record a token verification outcome and its duration.
///
/// Metric: `gatekeeper_token_validations_total`,
/// `gatekeeper_token_validation_duration_seconds`
/// Labels: `outcome`
pub fn record_token_validation(outcome: &'static str, duration: Duration) {
    counter!("gatekeeper_token_validations_total", "outcome" => outcome).increment(1);
    histogram!("gatekeeper_token_validation_duration_seconds", "outcome" => outcome)
        .record(duration.as_secs_f64());
}

// ============================================================================
// Authorization Metrics
// ============================================================================

/// Record a permission gate decision.
///
/// Metric: `gatekeeper_authorization_decisions_total`
/// Labels: `decision`
pub fn record_authorization_decision(decision: &'static str) {
    counter!("gatekeeper_authorization_decisions_total", "decision" => decision).increment(1);
}
