//! Gatekeeper configuration.
//!
//! Configuration is loaded from environment variables. Credentials embedded
//! in the JWKS URL are redacted in Debug output.

use crate::auth::jwks::{DEFAULT_FETCH_TIMEOUT, DEFAULT_REFRESH_INTERVAL};
use std::collections::HashMap;
use std::env;
use std::fmt;
use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

/// Default HTTP bind address.
pub const DEFAULT_BIND_ADDRESS: &str = "0.0.0.0:8080";

/// Upper bound for `JWKS_HTTP_TIMEOUT_SECONDS`.
pub const MAX_JWKS_HTTP_TIMEOUT_SECONDS: u64 = 60;

/// Gatekeeper configuration.
#[derive(Clone)]
pub struct Config {
    /// Exact `iss` value every accepted token must carry.
    pub token_issuer: String,

    /// Identity provider's key-publication endpoint.
    pub jwks_url: String,

    /// Background key refresh interval (default: 15 minutes).
    pub jwks_refresh_interval: Duration,

    /// Timeout for one JWKS fetch (default: 10 seconds).
    pub jwks_http_timeout: Duration,

    /// Role → permission file. `None` uses the built-in map.
    pub permissions_path: Option<PathBuf>,

    /// Server bind address (default: "0.0.0.0:8080").
    pub bind_address: String,
}

/// Custom Debug implementation that redacts URL credentials.
impl fmt::Debug for Config {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Config")
            .field("token_issuer", &self.token_issuer)
            .field("jwks_url", &redact_url_credentials(&self.jwks_url))
            .field("jwks_refresh_interval", &self.jwks_refresh_interval)
            .field("jwks_http_timeout", &self.jwks_http_timeout)
            .field("permissions_path", &self.permissions_path)
            .field("bind_address", &self.bind_address)
            .finish()
    }
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Missing required environment variable: {0}")]
    MissingEnvVar(String),

    #[error("Invalid JWKS refresh interval configuration: {0}")]
    InvalidRefreshInterval(String),

    #[error("Invalid JWKS HTTP timeout configuration: {0}")]
    InvalidHttpTimeout(String),
}

impl Config {
    /// Load configuration from environment variables.
    ///
    /// # Errors
    ///
    /// See [`Config::from_vars`].
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_vars(&env::vars().collect())
    }

    /// Load configuration from a HashMap (for testing).
    ///
    /// # Errors
    ///
    /// Returns `ConfigError` when a required variable is missing or empty, or
    /// a numeric variable is out of range.
    pub fn from_vars(vars: &HashMap<String, String>) -> Result<Self, ConfigError> {
        let token_issuer = required(vars, "TOKEN_ISSUER")?;
        let jwks_url = required(vars, "JWKS_URL")?;

        let jwks_refresh_interval = match vars.get("JWKS_REFRESH_INTERVAL_SECONDS") {
            Some(value_str) => {
                let value: u64 = value_str.parse().map_err(|e| {
                    ConfigError::InvalidRefreshInterval(format!(
                        "JWKS_REFRESH_INTERVAL_SECONDS must be a valid positive integer, got '{value_str}': {e}"
                    ))
                })?;

                if value == 0 {
                    return Err(ConfigError::InvalidRefreshInterval(
                        "JWKS_REFRESH_INTERVAL_SECONDS must be greater than 0".to_string(),
                    ));
                }

                Duration::from_secs(value)
            }
            None => DEFAULT_REFRESH_INTERVAL,
        };

        let jwks_http_timeout = match vars.get("JWKS_HTTP_TIMEOUT_SECONDS") {
            Some(value_str) => {
                let value: u64 = value_str.parse().map_err(|e| {
                    ConfigError::InvalidHttpTimeout(format!(
                        "JWKS_HTTP_TIMEOUT_SECONDS must be a valid positive integer, got '{value_str}': {e}"
                    ))
                })?;

                if value == 0 {
                    return Err(ConfigError::InvalidHttpTimeout(
                        "JWKS_HTTP_TIMEOUT_SECONDS must be greater than 0".to_string(),
                    ));
                }

                if value > MAX_JWKS_HTTP_TIMEOUT_SECONDS {
                    return Err(ConfigError::InvalidHttpTimeout(format!(
                        "JWKS_HTTP_TIMEOUT_SECONDS must not exceed {MAX_JWKS_HTTP_TIMEOUT_SECONDS} seconds, got {value}"
                    )));
                }

                Duration::from_secs(value)
            }
            None => DEFAULT_FETCH_TIMEOUT,
        };

        let permissions_path = vars
            .get("PERMISSIONS_PATH")
            .filter(|p| !p.is_empty())
            .map(PathBuf::from);

        let bind_address = vars
            .get("BIND_ADDRESS")
            .cloned()
            .unwrap_or_else(|| DEFAULT_BIND_ADDRESS.to_string());

        Ok(Config {
            token_issuer,
            jwks_url,
            jwks_refresh_interval,
            jwks_http_timeout,
            permissions_path,
            bind_address,
        })
    }
}

fn required(vars: &HashMap<String, String>, name: &str) -> Result<String, ConfigError> {
    vars.get(name)
        .filter(|value| !value.trim().is_empty())
        .cloned()
        .ok_or_else(|| ConfigError::MissingEnvVar(name.to_string()))
}

/// Replace `user:pass@` in a URL with `[REDACTED]@`.
fn redact_url_credentials(url: &str) -> String {
    let Some((scheme, rest)) = url.split_once("://") else {
        return url.to_string();
    };
    let authority_end = rest.find('/').unwrap_or(rest.len());
    let authority = rest.get(..authority_end).unwrap_or(rest);

    match authority.rfind('@') {
        Some(at) => format!(
            "{scheme}://[REDACTED]@{}",
            rest.get(at + 1..).unwrap_or_default()
        ),
        None => url.to_string(),
    }
}
