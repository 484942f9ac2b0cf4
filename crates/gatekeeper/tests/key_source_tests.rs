//! Key source integration tests.
//!
//! Exercises `KeySource` against a mocked key-publication endpoint over HTTP.

// Test code is allowed to use expect/unwrap for assertions
#![allow(clippy::unwrap_used, clippy::expect_used)]

use anyhow::Result;
use gatekeeper::auth::jwks::DEFAULT_REFRESH_INTERVAL;
use gatekeeper::auth::{HttpKeyFetcher, KeySource, KeySourceError};
use gatekeeper_test_utils::{jwks_body, InMemoryKeyFetcher, MockJwksServer, TestRsaKeypair};
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;

async fn key_source_for(jwks: &MockJwksServer) -> Result<KeySource, KeySourceError> {
    let fetcher = Arc::new(HttpKeyFetcher::new(jwks.url(), Duration::from_secs(5)));
    KeySource::initialize(fetcher, DEFAULT_REFRESH_INTERVAL).await
}

#[tokio::test]
async fn test_rsa_key_with_standard_exponent() -> Result<()> {
    let keypair = TestRsaKeypair::new(1, "k1");
    let jwks = MockJwksServer::start_with_body(json!({
        "keys": [{
            "kty": "RSA",
            "kid": "k1",
            "n": keypair.modulus_b64(),
            "e": "AQAB"
        }]
    }))
    .await;

    let source = key_source_for(&jwks).await?;
    let key = source.get("k1").await?;

    assert_eq!(key.public_exponent(), Some(65537));
    assert_eq!(key.modulus().len(), 256, "2048-bit modulus");
    source.shutdown().await;
    Ok(())
}

#[tokio::test]
async fn test_startup_fetch_happens_once() -> Result<()> {
    let keypair = TestRsaKeypair::new(1, "k1");
    let jwks = MockJwksServer::start(&[&keypair]).await;

    let source = key_source_for(&jwks).await?;

    assert_eq!(jwks.request_count().await, 1);
    assert_eq!(source.key_count().await, 1);
    assert_eq!(source.refresh_interval(), DEFAULT_REFRESH_INTERVAL);
    source.shutdown().await;
    Ok(())
}

#[tokio::test]
async fn test_startup_fails_on_error_status() {
    let jwks = MockJwksServer::start(&[]).await;
    jwks.fail_with_status(503).await;

    let result = key_source_for(&jwks).await;

    assert!(matches!(result, Err(KeySourceError::UnexpectedStatus(503))));
}

#[tokio::test]
async fn test_startup_fails_on_invalid_body() {
    let jwks = MockJwksServer::start_with_body(json!({"not_keys": []})).await;

    let result = key_source_for(&jwks).await;

    assert!(matches!(result, Err(KeySourceError::Fetch(_))));
}

#[tokio::test]
async fn test_startup_fails_when_endpoint_unreachable() {
    // Port 9 (discard) on localhost is closed in test environments
    let fetcher = Arc::new(HttpKeyFetcher::new(
        "http://127.0.0.1:9/certs".to_string(),
        Duration::from_secs(2),
    ));

    let result = KeySource::initialize(fetcher, DEFAULT_REFRESH_INTERVAL).await;

    assert!(matches!(result, Err(KeySourceError::Fetch(_))));
}

#[tokio::test]
async fn test_cached_kid_does_not_refetch() -> Result<()> {
    let keypair = TestRsaKeypair::new(1, "k1");
    let jwks = MockJwksServer::start(&[&keypair]).await;
    let source = key_source_for(&jwks).await?;

    for _ in 0..5 {
        source.get("k1").await?;
    }

    assert_eq!(jwks.request_count().await, 1);
    source.shutdown().await;
    Ok(())
}

#[tokio::test]
async fn test_unknown_kid_triggers_exactly_one_refresh() -> Result<()> {
    let keypair = TestRsaKeypair::new(1, "k1");
    let jwks = MockJwksServer::start(&[&keypair]).await;
    let source = key_source_for(&jwks).await?;

    let result = source.get("k-unknown").await;

    assert!(matches!(result, Err(KeySourceError::KeyNotFound(_))));
    assert_eq!(jwks.request_count().await, 2);
    source.shutdown().await;
    Ok(())
}

#[tokio::test]
async fn test_rotated_key_is_found_after_one_refresh() -> Result<()> {
    let old_key = TestRsaKeypair::new(1, "k1");
    let new_key = TestRsaKeypair::new(2, "k2");
    let jwks = MockJwksServer::start(&[&old_key]).await;
    let source = key_source_for(&jwks).await?;

    jwks.set_keys(&[&new_key]).await;
    let key = source.get("k2").await?;

    assert_eq!(key.kid(), "k2");
    assert_eq!(jwks.request_count().await, 2);
    // The swap replaced the map, so the retired key is gone
    assert_eq!(source.key_count().await, 1);
    source.shutdown().await;
    Ok(())
}

#[tokio::test]
async fn test_non_rsa_entries_are_skipped() -> Result<()> {
    let keypair = TestRsaKeypair::new(1, "k1");
    let jwks = MockJwksServer::start_with_body(json!({
        "keys": [
            {"kty": "EC", "kid": "ec-1", "crv": "P-256", "x": "abc", "y": "def"},
            keypair.jwk_json(),
            {"kty": "OKP", "kid": "ed-1", "crv": "Ed25519", "x": "abc"}
        ]
    }))
    .await;

    let source = key_source_for(&jwks).await?;

    assert_eq!(source.key_count().await, 1);
    assert!(source.get("k1").await.is_ok());
    source.shutdown().await;
    Ok(())
}

#[tokio::test]
async fn test_malformed_refresh_keeps_previous_keys() -> Result<()> {
    let keypair = TestRsaKeypair::new(1, "k1");
    let jwks = MockJwksServer::start(&[&keypair]).await;
    let source = key_source_for(&jwks).await?;

    let mut body = jwks_body(&[&keypair]);
    body["keys"]
        .as_array_mut()
        .unwrap()
        .push(json!({"kty": "RSA", "kid": "broken", "n": "***", "e": "AQAB"}));
    jwks.set_body(body).await;

    let result = source.refresh().await;

    assert!(matches!(result, Err(KeySourceError::MalformedKey { kid, .. }) if kid == "broken"));
    assert_eq!(source.key_count().await, 1);
    assert!(source.get("k1").await.is_ok());
    source.shutdown().await;
    Ok(())
}

#[tokio::test]
async fn test_failed_refresh_on_miss_reports_error() -> Result<()> {
    let keypair = TestRsaKeypair::new(1, "k1");
    let jwks = MockJwksServer::start(&[&keypair]).await;
    let source = key_source_for(&jwks).await?;

    jwks.fail_with_status(500).await;
    let result = source.get("k2").await;

    assert!(matches!(result, Err(KeySourceError::UnexpectedStatus(500))));
    assert!(source.get("k1").await.is_ok(), "cached key still served");
    source.shutdown().await;
    Ok(())
}

#[tokio::test]
async fn test_shutdown_then_drop() -> Result<()> {
    let fetcher = Arc::new(InMemoryKeyFetcher::new(
        serde_json::from_value(jwks_body(&[&TestRsaKeypair::new(1, "k1")]))?,
    ));
    let source = KeySource::initialize(fetcher.clone(), Duration::from_secs(1)).await?;

    source.shutdown().await;
    source.shutdown().await;
    assert!(!source.is_running().await);
    drop(source);

    // No refreshes after shutdown
    tokio::time::sleep(Duration::from_millis(1500)).await;
    assert_eq!(fetcher.fetch_count(), 1);
    Ok(())
}

#[tokio::test]
async fn test_drop_without_shutdown_stops_refreshing() -> Result<()> {
    let fetcher = Arc::new(InMemoryKeyFetcher::new(
        serde_json::from_value(jwks_body(&[&TestRsaKeypair::new(1, "k1")]))?,
    ));
    let source = KeySource::initialize(fetcher.clone(), Duration::from_millis(200)).await?;

    drop(source);
    tokio::time::sleep(Duration::from_millis(700)).await;

    assert_eq!(fetcher.fetch_count(), 1);
    Ok(())
}

#[tokio::test]
async fn test_background_refresh_picks_up_new_keys() -> Result<()> {
    let old_key = TestRsaKeypair::new(1, "k1");
    let new_key = TestRsaKeypair::new(2, "k2");
    let jwks = MockJwksServer::start(&[&old_key]).await;
    let fetcher = Arc::new(HttpKeyFetcher::new(jwks.url(), Duration::from_secs(5)));
    let source = KeySource::initialize(fetcher, Duration::from_millis(200)).await?;

    jwks.set_keys(&[&new_key]).await;
    tokio::time::sleep(Duration::from_millis(700)).await;

    let requests_before_get = jwks.request_count().await;
    assert!(requests_before_get >= 2, "background task refreshed");
    assert!(source.get("k2").await.is_ok());
    assert_eq!(
        jwks.request_count().await,
        requests_before_get,
        "k2 was already cached by the background refresh"
    );
    source.shutdown().await;
    Ok(())
}
