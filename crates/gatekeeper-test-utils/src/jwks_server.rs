//! Mock key-publication endpoint
//!
//! Wraps a wiremock server that serves a JWKS document at [`JWKS_PATH`] and
//! can be switched to new keys or failures mid-test.

use crate::crypto_fixtures::TestRsaKeypair;
use serde_json::{json, Value};
use std::sync::atomic::{AtomicUsize, Ordering};
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

/// Path the mock serves keys from.
pub const JWKS_PATH: &str = "/realms/care/protocol/openid-connect/certs";

/// Mock JWKS endpoint.
///
/// # Example
/// ```rust,ignore
/// let keypair = TestRsaKeypair::new(1, "k1");
/// let jwks = MockJwksServer::start(&[&keypair]).await;
/// let fetcher = HttpKeyFetcher::new(jwks.url(), Duration::from_secs(5));
/// ```
pub struct MockJwksServer {
    server: MockServer,
    /// Requests received before the last `reset`, which clears the journal.
    earlier_requests: AtomicUsize,
}

impl MockJwksServer {
    /// Start a server publishing `keys`.
    pub async fn start(keys: &[&TestRsaKeypair]) -> Self {
        Self::start_with_body(jwks_body(keys)).await
    }

    /// Start a server publishing an arbitrary JSON body.
    pub async fn start_with_body(body: Value) -> Self {
        let server = MockServer::start().await;
        let jwks = Self {
            server,
            earlier_requests: AtomicUsize::new(0),
        };
        jwks.respond_with(ResponseTemplate::new(200).set_body_json(body))
            .await;
        jwks
    }

    /// Full URL of the JWKS endpoint.
    pub fn url(&self) -> String {
        format!("{}{}", self.server.uri(), JWKS_PATH)
    }

    /// Publish `keys` from now on.
    pub async fn set_keys(&self, keys: &[&TestRsaKeypair]) {
        self.set_body(jwks_body(keys)).await;
    }

    /// Publish an arbitrary JSON body from now on.
    pub async fn set_body(&self, body: Value) {
        self.respond_with(ResponseTemplate::new(200).set_body_json(body))
            .await;
    }

    /// Answer every request with `status` and an empty body from now on.
    pub async fn fail_with_status(&self, status: u16) {
        self.respond_with(ResponseTemplate::new(status)).await;
    }

    /// Number of JWKS requests received so far.
    pub async fn request_count(&self) -> usize {
        self.earlier_requests.load(Ordering::SeqCst) + self.journal_len().await
    }

    async fn journal_len(&self) -> usize {
        self.server
            .received_requests()
            .await
            .map(|requests| requests.len())
            .unwrap_or(0)
    }

    /// Replace the current mock. The request count survives the reset.
    async fn respond_with(&self, response: ResponseTemplate) {
        let seen = self.journal_len().await;
        self.earlier_requests.fetch_add(seen, Ordering::SeqCst);
        self.server.reset().await;

        Mock::given(method("GET"))
            .and(path(JWKS_PATH))
            .respond_with(response)
            .mount(&self.server)
            .await;
    }
}

/// `{"keys": [...]}` for the given keypairs.
pub fn jwks_body(keys: &[&TestRsaKeypair]) -> Value {
    json!({ "keys": keys.iter().map(|k| k.jwk_json()).collect::<Vec<_>>() })
}
