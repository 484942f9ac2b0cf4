//! Test server harness for E2E testing
//!
//! Provides `TestGatekeeperServer` for spawning real Gatekeeper instances in
//! tests, wired to a mock JWKS endpoint.

use crate::token_builders::TEST_ISSUER;
use gatekeeper::auth::{HttpKeyFetcher, KeySource, TokenVerifier};
use gatekeeper::config::Config;
use gatekeeper::observability::metrics::init_metrics_recorder;
use gatekeeper::rbac::PermissionRegistry;
use gatekeeper::routes::{self, AppState};
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::{Arc, OnceLock};
use tokio::task::JoinHandle;

/// One recorder per test process; later servers share its handle.
static METRICS_HANDLE: OnceLock<PrometheusHandle> = OnceLock::new();

fn metrics_handle() -> PrometheusHandle {
    METRICS_HANDLE
        .get_or_init(|| {
            // Another harness in this process may have installed one already
            init_metrics_recorder().unwrap_or_else(|_| PrometheusBuilder::new().build_recorder().handle())
        })
        .clone()
}

/// Test harness for spawning a Gatekeeper server in E2E tests.
///
/// # Example
/// ```rust,ignore
/// #[tokio::test]
/// async fn test_me_flow() -> Result<()> {
///     let keypair = TestRsaKeypair::new(1, "k1");
///     let jwks = MockJwksServer::start(&[&keypair]).await;
///     let server = TestGatekeeperServer::spawn(&jwks.url()).await?;
///
///     let response = reqwest::Client::new()
///         .get(format!("{}/api/v1/me", server.url()))
///         .bearer_auth(keypair.sign(&TestTokenBuilder::new().build()))
///         .send()
///         .await?;
///
///     assert_eq!(response.status(), 200);
///     Ok(())
/// }
/// ```
pub struct TestGatekeeperServer {
    addr: SocketAddr,
    config: Config,
    key_source: Arc<KeySource>,
    _handle: JoinHandle<()>,
}

impl TestGatekeeperServer {
    /// Spawn a server with the built-in permission registry.
    pub async fn spawn(jwks_url: &str) -> Result<Self, anyhow::Error> {
        let registry = PermissionRegistry::builtin()
            .map_err(|e| anyhow::anyhow!("Failed to load built-in registry: {}", e))?;
        Self::spawn_with_registry(jwks_url, registry).await
    }

    /// Spawn a server with a custom permission registry.
    ///
    /// The server will:
    /// - Fetch keys from `jwks_url` before binding (fails like production)
    /// - Bind to a random available port (127.0.0.1:0)
    /// - Start the HTTP server in the background
    pub async fn spawn_with_registry(
        jwks_url: &str,
        registry: PermissionRegistry,
    ) -> Result<Self, anyhow::Error> {
        // Install the recorder before the startup fetch records anything
        let metrics_handle = metrics_handle();

        let vars = HashMap::from([
            ("TOKEN_ISSUER".to_string(), TEST_ISSUER.to_string()),
            ("JWKS_URL".to_string(), jwks_url.to_string()),
            ("JWKS_HTTP_TIMEOUT_SECONDS".to_string(), "5".to_string()),
            ("BIND_ADDRESS".to_string(), "127.0.0.1:0".to_string()),
        ]);

        let config = Config::from_vars(&vars)
            .map_err(|e| anyhow::anyhow!("Failed to create config: {}", e))?;

        let fetcher = Arc::new(HttpKeyFetcher::new(
            config.jwks_url.clone(),
            config.jwks_http_timeout,
        ));
        let key_source = Arc::new(
            KeySource::initialize(fetcher, config.jwks_refresh_interval)
                .await
                .map_err(|e| anyhow::anyhow!("Failed to initialize key source: {}", e))?,
        );
        let verifier = Arc::new(TokenVerifier::new(
            Arc::clone(&key_source),
            config.token_issuer.clone(),
        ));

        let state = Arc::new(AppState {
            key_source: Arc::clone(&key_source),
            verifier,
            registry: Arc::new(registry),
        });

        // Build routes using gatekeeper's real route builder
        let app = routes::build_routes(state, metrics_handle);

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
            .await
            .map_err(|e| anyhow::anyhow!("Failed to bind test server: {}", e))?;

        let addr = listener
            .local_addr()
            .map_err(|e| anyhow::anyhow!("Failed to get local address: {}", e))?;

        let handle = tokio::spawn(async move {
            let make_service = app.into_make_service_with_connect_info::<SocketAddr>();
            if let Err(e) = axum::serve(listener, make_service).await {
                eprintln!("Test server error: {}", e);
            }
        });

        Ok(Self {
            addr,
            config,
            key_source,
            _handle: handle,
        })
    }

    /// Get the base URL of the test server.
    pub fn url(&self) -> String {
        format!("http://{}", self.addr)
    }

    /// Get the socket address.
    pub fn addr(&self) -> SocketAddr {
        self.addr
    }

    /// Get reference to the server configuration.
    pub fn config(&self) -> &Config {
        &self.config
    }

    /// The server's key source.
    pub fn key_source(&self) -> &Arc<KeySource> {
        &self.key_source
    }
}

impl Drop for TestGatekeeperServer {
    fn drop(&mut self) {
        self._handle.abort();
    }
}
