//! # Gatekeeper Test Utilities
//!
//! Shared test utilities for the Gatekeeper service.
//!
//! This crate provides:
//! - Deterministic RSA fixtures (seeded keys for reproducible tests)
//! - Token claim builders (TestTokenBuilder)
//! - A mock JWKS endpoint (MockJwksServer)
//! - Server test harness (TestGatekeeperServer for E2E tests)
//! - The in-memory key fetcher, re-exported from gatekeeper
//!
//! ## Usage
//!
//! ```rust,ignore
//! use gatekeeper_test_utils::*;
//!
//! #[tokio::test]
//! async fn test_example() {
//!     let keypair = TestRsaKeypair::new(1, "k1");
//!     let jwks = MockJwksServer::start(&[&keypair]).await;
//!
//!     let token = keypair.sign(
//!         &TestTokenBuilder::new()
//!             .for_user("alice")
//!             .with_roles(&["CAREGIVER"])
//!             .build(),
//!     );
//! }
//! ```

pub mod crypto_fixtures;
pub mod jwks_server;
pub mod server_harness;
pub mod token_builders;

// Re-export commonly used items
pub use crypto_fixtures::*;
pub use gatekeeper::auth::testing::InMemoryKeyFetcher;
pub use jwks_server::*;
pub use server_harness::*;
pub use token_builders::*;
