//! Gatekeeper
//!
//! Entry point for the token verification and authorization gate.
//! Fetches the identity provider's signing keys before listening; a process
//! that cannot verify tokens never accepts traffic.

use gatekeeper::auth::{HttpKeyFetcher, KeySource, TokenVerifier};
use gatekeeper::config::Config;
use gatekeeper::observability::metrics::init_metrics_recorder;
use gatekeeper::rbac::PermissionRegistry;
use gatekeeper::routes::{self, AppState};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::signal;
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, Layer};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    init_tracing();

    info!("Starting Gatekeeper");

    // Install metrics recorder before anything records
    let metrics_handle = init_metrics_recorder().map_err(|e| {
        error!("Failed to initialize metrics recorder: {}", e);
        e
    })?;

    // Load configuration
    let config = Config::from_env().map_err(|e| {
        error!("Failed to load configuration: {}", e);
        e
    })?;

    info!(
        token_issuer = %config.token_issuer,
        bind_address = %config.bind_address,
        jwks_refresh_interval_secs = config.jwks_refresh_interval.as_secs(),
        "Configuration loaded successfully"
    );

    // Load permission registry
    let registry = match &config.permissions_path {
        Some(path) => PermissionRegistry::from_path(path),
        None => PermissionRegistry::builtin(),
    }
    .map_err(|e| {
        error!("Failed to load permission registry: {}", e);
        e
    })?;

    info!(roles = ?registry.roles(), "Permission registry loaded");

    // Fetch signing keys; failure is fatal
    info!(jwks_url = %config.jwks_url, "Fetching signing keys...");
    let fetcher = Arc::new(HttpKeyFetcher::new(
        config.jwks_url.clone(),
        config.jwks_http_timeout,
    ));
    let key_source = Arc::new(
        KeySource::initialize(fetcher, config.jwks_refresh_interval)
            .await
            .map_err(|e| {
                error!("Failed to initialize key source: {}", e);
                e
            })?,
    );

    let verifier = Arc::new(TokenVerifier::new(
        Arc::clone(&key_source),
        config.token_issuer.clone(),
    ));

    let addr: SocketAddr = config.bind_address.parse().map_err(|e| {
        error!("Invalid bind address: {}", e);
        e
    })?;

    let state = Arc::new(AppState {
        key_source: Arc::clone(&key_source),
        verifier,
        registry: Arc::new(registry),
    });

    let app = routes::build_routes(state, metrics_handle);

    info!("Gatekeeper listening on {}", addr);

    // Start server with graceful shutdown support
    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown_signal())
    .await?;

    key_source.shutdown().await;

    info!("Gatekeeper shutdown complete");

    Ok(())
}

/// Human-readable logs by default, JSON lines with `LOG_FORMAT=json`.
fn init_tracing() {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| "gatekeeper=debug,common=debug,tower_http=debug".into());

    let json = std::env::var("LOG_FORMAT").is_ok_and(|v| v.eq_ignore_ascii_case("json"));
    let fmt_layer = if json {
        tracing_subscriber::fmt::layer().json().boxed()
    } else {
        tracing_subscriber::fmt::layer().boxed()
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt_layer)
        .init();
}

/// Listens for shutdown signals (SIGTERM, SIGINT).
/// Returns when a shutdown signal is received and drain period is complete.
async fn shutdown_signal() {
    let ctrl_c = async {
        match signal::ctrl_c().await {
            Ok(()) => info!("Received SIGINT, starting graceful shutdown..."),
            Err(e) => error!("Failed to listen for SIGINT: {}", e),
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
                info!("Received SIGTERM, starting graceful shutdown...");
            }
            Err(e) => {
                error!("Failed to listen for SIGTERM: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {}
        () = terminate => {}
    }

    let drain_secs: u64 = std::env::var("DRAIN_SECONDS")
        .ok()
        .and_then(|s| s.parse().ok())
        .unwrap_or(30);

    if drain_secs > 0 {
        warn!("Draining connections for {} seconds...", drain_secs);
        tokio::time::sleep(Duration::from_secs(drain_secs)).await;
        info!("Drain period complete");
    } else {
        info!("Skipping drain period (DRAIN_SECONDS=0)");
    }
}
