//! In-memory key fetcher for tests.
//!
//! Serves a JWKS document from memory, counts fetches, and can be switched to
//! fail. Available under `cfg(test)` and the `test-utils` feature.

use crate::auth::jwks::{KeyFetcher, KeySourceError};
use crate::auth::signing_key::JwkSet;
use async_trait::async_trait;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Mutex, MutexGuard};

enum Response {
    Keys(JwkSet),
    Fail(String),
}

/// `KeyFetcher` double backed by an in-memory document.
pub struct InMemoryKeyFetcher {
    response: Mutex<Response>,
    fetch_count: AtomicUsize,
}

impl InMemoryKeyFetcher {
    /// Create a fetcher that serves `keys`.
    pub fn new(keys: JwkSet) -> Self {
        Self {
            response: Mutex::new(Response::Keys(keys)),
            fetch_count: AtomicUsize::new(0),
        }
    }

    /// Serve `keys` on subsequent fetches.
    pub fn set_keys(&self, keys: JwkSet) {
        *self.lock() = Response::Keys(keys);
    }

    /// Fail subsequent fetches with a `Fetch` error carrying `message`.
    pub fn fail_with(&self, message: impl Into<String>) {
        *self.lock() = Response::Fail(message.into());
    }

    /// Number of fetches performed so far.
    pub fn fetch_count(&self) -> usize {
        self.fetch_count.load(Ordering::SeqCst)
    }

    fn lock(&self) -> MutexGuard<'_, Response> {
        self.response
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
    }
}

#[async_trait]
impl KeyFetcher for InMemoryKeyFetcher {
    async fn fetch(&self) -> Result<JwkSet, KeySourceError> {
        self.fetch_count.fetch_add(1, Ordering::SeqCst);
        match &*self.lock() {
            Response::Keys(keys) => Ok(keys.clone()),
            Response::Fail(message) => Err(KeySourceError::Fetch(message.clone())),
        }
    }

    fn endpoint(&self) -> &str {
        "memory://jwks"
    }
}
