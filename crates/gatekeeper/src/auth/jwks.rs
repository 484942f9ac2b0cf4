//! Key source for fetching and caching RSA verification keys.
//!
//! The [`KeySource`] fetches the identity provider's JWKS once at startup,
//! then keeps it fresh two ways:
//!
//! - a background task re-fetches on a fixed interval (default 15 minutes)
//! - a lookup for an unknown `kid` triggers one synchronous refresh
//!
//! Every successful refresh replaces the whole key map. A key disappears as
//! soon as the publisher stops listing it.
//!
//! # Failure handling
//!
//! - The startup fetch is fatal: a process must not serve with no keys
//! - A failed periodic refresh is logged and the previous map is kept
//! - A malformed RSA entry rejects the whole document
//!
//! # Concurrency
//!
//! Fetch and parse happen outside the lock; the write lock is held only to
//! swap the map. Concurrent misses for the same `kid` each refresh on their
//! own. Every fetch takes a generation number before it starts, and a map
//! from an older generation never replaces a newer one, so a slow fetch of
//! an old document cannot undo a later rotation.

use crate::auth::signing_key::{parse_key_set, JwkSet, SigningKey};
use crate::observability::metrics;
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::{Mutex, RwLock};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::instrument;

/// Default background refresh interval (15 minutes).
pub const DEFAULT_REFRESH_INTERVAL: Duration = Duration::from_secs(15 * 60);

/// Default timeout for one JWKS HTTP request.
pub const DEFAULT_FETCH_TIMEOUT: Duration = Duration::from_secs(10);

/// Errors from fetching, parsing, or looking up verification keys.
#[derive(Debug, Error)]
pub enum KeySourceError {
    #[error("JWKS fetch failed: {0}")]
    Fetch(String),

    #[error("JWKS endpoint returned status {0}")]
    UnexpectedStatus(u16),

    #[error("Malformed JWK (kid '{kid}'): {reason}")]
    MalformedKey { kid: String, reason: String },

    #[error("No verification key for kid '{0}'")]
    KeyNotFound(String),

    #[error("Invalid refresh interval: must be greater than zero")]
    InvalidRefreshInterval,
}

/// Why a refresh ran. Used as a bounded metrics label.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RefreshTrigger {
    Startup,
    Periodic,
    Miss,
    Manual,
}

impl RefreshTrigger {
    pub fn as_str(self) -> &'static str {
        match self {
            RefreshTrigger::Startup => "startup",
            RefreshTrigger::Periodic => "periodic",
            RefreshTrigger::Miss => "miss",
            RefreshTrigger::Manual => "manual",
        }
    }
}

/// Capability for retrieving the current JWKS document.
///
/// Production code uses [`HttpKeyFetcher`]. Tests use the in-memory fetcher
/// from `auth::testing`.
#[async_trait]
pub trait KeyFetcher: Send + Sync {
    /// Fetch the JWKS document.
    async fn fetch(&self) -> Result<JwkSet, KeySourceError>;

    /// Where keys come from, for logs.
    fn endpoint(&self) -> &str;
}

/// Fetches the JWKS document over HTTP.
pub struct HttpKeyFetcher {
    /// URL to the JWKS endpoint.
    jwks_url: String,

    /// HTTP client for fetching JWKS.
    http_client: reqwest::Client,

    /// Per-request timeout.
    timeout: Duration,
}

impl HttpKeyFetcher {
    /// Create a fetcher for the given JWKS URL.
    ///
    /// # Arguments
    ///
    /// * `jwks_url` - URL to the identity provider's JWKS endpoint
    /// * `timeout` - Upper bound on one fetch, including the body read
    pub fn new(jwks_url: String, timeout: Duration) -> Self {
        let http_client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .unwrap_or_else(|e| {
                tracing::warn!(target: "gatekeeper.auth.jwks", error = %e, "Failed to build HTTP client with custom config, using defaults");
                reqwest::Client::new()
            });

        Self {
            jwks_url,
            http_client,
            timeout,
        }
    }
}

#[async_trait]
impl KeyFetcher for HttpKeyFetcher {
    async fn fetch(&self) -> Result<JwkSet, KeySourceError> {
        let response = self
            .http_client
            .get(&self.jwks_url)
            // Repeated here so the bound holds even with the fallback client
            .timeout(self.timeout)
            .send()
            .await
            .map_err(|e| KeySourceError::Fetch(e.to_string()))?;

        if !response.status().is_success() {
            return Err(KeySourceError::UnexpectedStatus(response.status().as_u16()));
        }

        response
            .json::<JwkSet>()
            .await
            .map_err(|e| KeySourceError::Fetch(format!("invalid JWKS body: {e}")))
    }

    fn endpoint(&self) -> &str {
        &self.jwks_url
    }
}

/// `kid` → key map, replaced wholesale on every refresh.
pub struct KeyCache {
    installed: RwLock<KeyMap>,
}

/// A key map and the generation of the fetch that produced it.
struct KeyMap {
    generation: u64,
    keys: Arc<HashMap<String, Arc<SigningKey>>>,
}

impl KeyCache {
    fn new() -> Self {
        Self {
            installed: RwLock::new(KeyMap {
                generation: 0,
                keys: Arc::new(HashMap::new()),
            }),
        }
    }

    async fn get(&self, kid: &str) -> Option<Arc<SigningKey>> {
        self.installed.read().await.keys.get(kid).cloned()
    }

    /// Swap in `keys` fetched under `generation`.
    ///
    /// Returns `false` and keeps the current map if it came from a newer
    /// fetch.
    async fn replace(&self, generation: u64, keys: HashMap<String, Arc<SigningKey>>) -> bool {
        let fresh = Arc::new(keys);
        let mut installed = self.installed.write().await;
        if generation < installed.generation {
            return false;
        }
        *installed = KeyMap {
            generation,
            keys: fresh,
        };
        true
    }

    async fn len(&self) -> usize {
        self.installed.read().await.keys.len()
    }
}

/// State shared between the `KeySource` handle and its refresh task.
struct Shared {
    fetcher: Arc<dyn KeyFetcher>,
    cache: KeyCache,
    /// Last generation handed to a fetch.
    generation: AtomicU64,
}

impl Shared {
    /// Fetch, parse, and install a new key map.
    ///
    /// Returns the number of keys now cached. A result overtaken by a newer
    /// refresh is dropped and reported as success with the newer map's size.
    #[instrument(skip(self), fields(trigger = trigger.as_str()))]
    async fn refresh(&self, trigger: RefreshTrigger) -> Result<usize, KeySourceError> {
        let generation = self.generation.fetch_add(1, Ordering::SeqCst) + 1;

        tracing::debug!(
            target: "gatekeeper.auth.jwks",
            url = %self.fetcher.endpoint(),
            "Fetching JWKS"
        );

        let parsed = match self.fetcher.fetch().await {
            Ok(set) => parse_key_set(&set),
            Err(e) => Err(e),
        };

        match parsed {
            Ok(keys) => {
                let key_count = keys.len();
                if !self.cache.replace(generation, keys).await {
                    metrics::record_jwks_refresh(trigger.as_str(), "superseded");
                    tracing::debug!(
                        target: "gatekeeper.auth.jwks",
                        generation,
                        trigger = trigger.as_str(),
                        "Discarding JWKS result overtaken by a newer refresh"
                    );
                    return Ok(self.cache.len().await);
                }
                metrics::record_jwks_refresh(trigger.as_str(), "success");
                metrics::set_jwks_key_count(key_count);
                tracing::info!(
                    target: "gatekeeper.auth.jwks",
                    key_count,
                    trigger = trigger.as_str(),
                    "JWKS cache refreshed"
                );
                Ok(key_count)
            }
            Err(e) => {
                metrics::record_jwks_refresh(trigger.as_str(), "error");
                Err(e)
            }
        }
    }
}

/// Supplies verification keys by `kid`, refreshed in the background.
///
/// Constructed once at startup and shared behind an `Arc`. Call
/// [`KeySource::shutdown`] to stop the refresh task; dropping the last handle
/// also stops it.
pub struct KeySource {
    shared: Arc<Shared>,
    refresh_interval: Duration,
    cancel_token: CancellationToken,
    refresh_task: Mutex<Option<JoinHandle<()>>>,
}

impl KeySource {
    /// Fetch the initial key set and start the periodic refresh task.
    ///
    /// # Errors
    ///
    /// Returns `KeySourceError::InvalidRefreshInterval` for a zero interval,
    /// and any fetch or parse error from the initial refresh. No task is
    /// started in either case.
    #[instrument(skip_all, fields(refresh_interval_secs = refresh_interval.as_secs()))]
    pub async fn initialize(
        fetcher: Arc<dyn KeyFetcher>,
        refresh_interval: Duration,
    ) -> Result<Self, KeySourceError> {
        if refresh_interval.is_zero() {
            return Err(KeySourceError::InvalidRefreshInterval);
        }

        let shared = Arc::new(Shared {
            fetcher,
            cache: KeyCache::new(),
            generation: AtomicU64::new(0),
        });

        shared
            .refresh(RefreshTrigger::Startup)
            .await
            .inspect_err(|e| {
                tracing::error!(
                    target: "gatekeeper.auth.jwks",
                    url = %shared.fetcher.endpoint(),
                    error = %e,
                    "Initial JWKS fetch failed"
                );
            })?;

        let cancel_token = CancellationToken::new();
        let refresh_task = tokio::spawn(refresh_loop(
            Arc::clone(&shared),
            refresh_interval,
            cancel_token.clone(),
        ));

        Ok(Self {
            shared,
            refresh_interval,
            cancel_token,
            refresh_task: Mutex::new(Some(refresh_task)),
        })
    }

    /// Get a key by ID.
    ///
    /// On a cache miss, performs exactly one refresh and looks again.
    ///
    /// The refresh runs on its own task: if the calling request is cancelled,
    /// the refresh still completes and later requests reuse its result.
    ///
    /// # Errors
    ///
    /// Returns `KeySourceError::KeyNotFound` if the key is still unknown after
    /// the refresh, or the refresh error if the refresh failed.
    #[instrument(skip(self))]
    pub async fn get(&self, kid: &str) -> Result<Arc<SigningKey>, KeySourceError> {
        if let Some(key) = self.shared.cache.get(kid).await {
            tracing::debug!(target: "gatekeeper.auth.jwks", kid = %kid, "JWKS cache hit");
            return Ok(key);
        }

        tracing::debug!(target: "gatekeeper.auth.jwks", kid = %kid, "Key not in JWKS cache, refreshing");

        let shared = Arc::clone(&self.shared);
        tokio::spawn(async move { shared.refresh(RefreshTrigger::Miss).await })
            .await
            .map_err(|e| KeySourceError::Fetch(format!("refresh task failed: {e}")))?
            .inspect_err(|e| {
                tracing::warn!(target: "gatekeeper.auth.jwks", kid = %kid, error = %e, "On-miss JWKS refresh failed");
            })?;

        self.shared.cache.get(kid).await.ok_or_else(|| {
            tracing::warn!(target: "gatekeeper.auth.jwks", kid = %kid, "Key not found in JWKS after refresh");
            KeySourceError::KeyNotFound(kid.to_string())
        })
    }

    /// Force a refresh now.
    ///
    /// # Errors
    ///
    /// Returns the fetch or parse error; the current map is kept in that case.
    pub async fn refresh(&self) -> Result<usize, KeySourceError> {
        self.shared.refresh(RefreshTrigger::Manual).await
    }

    /// Number of keys currently cached.
    pub async fn key_count(&self) -> usize {
        self.shared.cache.len().await
    }

    /// Interval of the background refresh task.
    pub fn refresh_interval(&self) -> Duration {
        self.refresh_interval
    }

    /// Stop the background refresh task and wait for it to exit.
    ///
    /// Safe to call more than once; later calls return immediately.
    pub async fn shutdown(&self) {
        self.cancel_token.cancel();

        let task = self.refresh_task.lock().await.take();
        if let Some(task) = task {
            if let Err(e) = task.await {
                tracing::warn!(target: "gatekeeper.auth.jwks", error = %e, "JWKS refresh task ended abnormally");
            }
            tracing::info!(target: "gatekeeper.auth.jwks", "JWKS refresh task stopped");
        }
    }

    /// Whether the refresh task is still running.
    pub async fn is_running(&self) -> bool {
        self.refresh_task
            .lock()
            .await
            .as_ref()
            .is_some_and(|task| !task.is_finished())
    }
}

impl Drop for KeySource {
    fn drop(&mut self) {
        self.cancel_token.cancel();
    }
}

/// Background refresh loop.
///
/// The first tick fires one interval after startup since `initialize` has
/// just fetched. Failures keep the previous map; the next tick retries.
#[instrument(skip_all, name = "gatekeeper.task.jwks_refresh")]
async fn refresh_loop(shared: Arc<Shared>, interval: Duration, cancel_token: CancellationToken) {
    tracing::info!(
        target: "gatekeeper.task.jwks_refresh",
        interval_secs = interval.as_secs(),
        "Starting JWKS refresh task"
    );

    let mut ticker = tokio::time::interval_at(tokio::time::Instant::now() + interval, interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            _ = ticker.tick() => {
                tokio::select! {
                    result = shared.refresh(RefreshTrigger::Periodic) => {
                        if let Err(e) = result {
                            tracing::warn!(
                                target: "gatekeeper.task.jwks_refresh",
                                error = %e,
                                "Periodic JWKS refresh failed, keeping previous keys"
                            );
                        }
                    }
                    () = cancel_token.cancelled() => break,
                }
            }
            () = cancel_token.cancelled() => break,
        }
    }

    tracing::info!(
        target: "gatekeeper.task.jwks_refresh",
        "JWKS refresh task received shutdown signal, exiting"
    );
}
