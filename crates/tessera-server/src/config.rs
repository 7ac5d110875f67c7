//! Server configuration for `tessera`.
//!
//! Loads configuration from environment variables with sensible defaults.
//! The two shared secrets have no default and must be provided.

use std::net::SocketAddr;
use std::time::Duration;

use tessera_core::routes::UnmatchedRoutes;
use zeroize::Zeroizing;

/// Minimum length of the session signing secret.
const MIN_SESSION_SECRET_LEN: usize = tessera_core::session::MIN_KEY_LEN;

/// Errors loading configuration.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("required environment variable {var} is not set")]
    Missing { var: &'static str },

    #[error("invalid value for {var}: {reason}")]
    Invalid { var: &'static str, reason: String },
}

/// Server configuration.
#[derive(Clone)]
pub struct ServerConfig {
    /// Address to bind the HTTP listener to.
    pub bind_addr: SocketAddr,
    /// Storage backend type.
    pub storage_backend: StorageBackendType,
    /// Log level filter (e.g., `info`, `debug`, `warn`).
    pub log_level: String,
    /// HMAC key for session tokens.
    pub session_secret: Zeroizing<String>,
    /// Lifetime of issued session tokens.
    pub session_ttl: chrono::Duration,
    /// Shared secret for billing webhook signatures.
    pub webhook_secret: Zeroizing<String>,
    /// Maximum age of a webhook signature timestamp, in seconds.
    pub webhook_tolerance_secs: i64,
    /// Billing provider API settings.
    pub billing: BillingApiConfig,
    /// Where unauthenticated callers are redirected.
    pub login_path: String,
    /// What to do with requests no route rule covers.
    pub unmatched_routes: UnmatchedRoutes,
}

/// Billing provider API settings.
#[derive(Clone)]
pub struct BillingApiConfig {
    /// Base URL, without a trailing slash.
    pub base_url: String,
    /// Secret API key sent as a bearer token.
    pub api_key: Zeroizing<String>,
    /// Upper bound on each provider call.
    pub timeout: Duration,
}

/// Supported storage backend types.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StorageBackendType {
    /// In-memory (development only, data lost on restart).
    Memory,
    /// `PostgreSQL` persistent storage.
    Postgres { url: String },
}

impl ServerConfig {
    /// A configuration with defaults for everything but the secrets.
    #[must_use]
    pub fn new(session_secret: &str, webhook_secret: &str) -> Self {
        Self {
            bind_addr: SocketAddr::from(([127, 0, 0, 1], 8400)),
            storage_backend: StorageBackendType::Memory,
            log_level: "info".to_owned(),
            session_secret: Zeroizing::new(session_secret.to_owned()),
            session_ttl: chrono::Duration::hours(12),
            webhook_secret: Zeroizing::new(webhook_secret.to_owned()),
            webhook_tolerance_secs: tessera_core::webhook::DEFAULT_TOLERANCE_SECS,
            billing: BillingApiConfig {
                base_url: "https://api.stripe.com".to_owned(),
                api_key: Zeroizing::new(String::new()),
                timeout: Duration::from_secs(10),
            },
            login_path: "/login".to_owned(),
            unmatched_routes: UnmatchedRoutes::Deny,
        }
    }

    /// Load configuration from environment variables.
    ///
    /// Environment variables:
    /// - `PORT` — port to bind on (binds to `0.0.0.0`)
    /// - `TESSERA_BIND_ADDR` — full bind address (overrides `PORT`, default: `127.0.0.1:8400`)
    /// - `TESSERA_STORAGE` — `memory` or `postgres` (default: `memory`)
    /// - `DATABASE_URL` — `PostgreSQL` connection string (used when `TESSERA_STORAGE=postgres`)
    /// - `TESSERA_LOG_LEVEL` — log filter (default: `info`)
    /// - `TESSERA_SESSION_SECRET` — session HMAC key, at least 32 bytes (required)
    /// - `TESSERA_SESSION_TTL_SECS` — session lifetime (default: `43200`)
    /// - `TESSERA_WEBHOOK_SECRET` — webhook signing secret (required)
    /// - `TESSERA_WEBHOOK_TOLERANCE_SECS` — signature timestamp window (default: `300`)
    /// - `TESSERA_BILLING_API_URL` — billing provider base URL (default: `https://api.stripe.com`)
    /// - `TESSERA_BILLING_API_KEY` — billing provider secret key
    /// - `TESSERA_BILLING_TIMEOUT_SECS` — per-call timeout (default: `10`)
    /// - `TESSERA_LOGIN_PATH` — login redirect target (default: `/login`)
    /// - `TESSERA_UNMATCHED_ROUTES` — `deny` or `allow` (default: `deny`)
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] if a required secret is missing or a value
    /// cannot be parsed.
    pub fn from_env() -> Result<Self, ConfigError> {
        let session_secret = required("TESSERA_SESSION_SECRET")?;
        if session_secret.len() < MIN_SESSION_SECRET_LEN {
            return Err(ConfigError::Invalid {
                var: "TESSERA_SESSION_SECRET",
                reason: format!("must be at least {MIN_SESSION_SECRET_LEN} bytes"),
            });
        }
        let webhook_secret = required("TESSERA_WEBHOOK_SECRET")?;
        let mut config = Self::new(&session_secret, &webhook_secret);

        // Priority: TESSERA_BIND_ADDR > PORT > default 127.0.0.1:8400
        if let Ok(addr) = std::env::var("TESSERA_BIND_ADDR") {
            config.bind_addr = addr.parse().map_err(|e| ConfigError::Invalid {
                var: "TESSERA_BIND_ADDR",
                reason: format!("{e}"),
            })?;
        } else if let Some(port) = parsed::<u16>("PORT")? {
            config.bind_addr = SocketAddr::from(([0, 0, 0, 0], port));
        }

        config.storage_backend = match std::env::var("TESSERA_STORAGE")
            .unwrap_or_else(|_| "memory".to_owned())
            .to_lowercase()
            .as_str()
        {
            "postgres" | "postgresql" => StorageBackendType::Postgres {
                url: required("DATABASE_URL")?.to_string(),
            },
            "memory" => StorageBackendType::Memory,
            other => {
                return Err(ConfigError::Invalid {
                    var: "TESSERA_STORAGE",
                    reason: format!("unknown backend '{other}'"),
                });
            }
        };

        if let Ok(level) = std::env::var("TESSERA_LOG_LEVEL") {
            config.log_level = level;
        }
        if let Some(secs) = parsed::<i64>("TESSERA_SESSION_TTL_SECS")? {
            config.session_ttl = chrono::Duration::seconds(secs);
        }
        if let Some(secs) = parsed("TESSERA_WEBHOOK_TOLERANCE_SECS")? {
            config.webhook_tolerance_secs = secs;
        }
        if let Ok(url) = std::env::var("TESSERA_BILLING_API_URL") {
            config.billing.base_url = url.trim_end_matches('/').to_owned();
        }
        if let Ok(key) = std::env::var("TESSERA_BILLING_API_KEY") {
            config.billing.api_key = Zeroizing::new(key);
        }
        if let Some(secs) = parsed("TESSERA_BILLING_TIMEOUT_SECS")? {
            config.billing.timeout = Duration::from_secs(secs);
        }
        if let Ok(path) = std::env::var("TESSERA_LOGIN_PATH") {
            if !path.starts_with('/') {
                return Err(ConfigError::Invalid {
                    var: "TESSERA_LOGIN_PATH",
                    reason: "must be an absolute path".to_owned(),
                });
            }
            config.login_path = path;
        }
        if let Ok(policy) = std::env::var("TESSERA_UNMATCHED_ROUTES") {
            config.unmatched_routes = policy.parse().map_err(|reason| ConfigError::Invalid {
                var: "TESSERA_UNMATCHED_ROUTES",
                reason,
            })?;
        }

        Ok(config)
    }
}

fn required(var: &'static str) -> Result<Zeroizing<String>, ConfigError> {
    std::env::var(var)
        .ok()
        .filter(|v| !v.is_empty())
        .map(Zeroizing::new)
        .ok_or(ConfigError::Missing { var })
}

fn parsed<T>(var: &'static str) -> Result<Option<T>, ConfigError>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    match std::env::var(var) {
        Ok(raw) => raw.parse().map(Some).map_err(|e| ConfigError::Invalid {
            var,
            reason: format!("{e}"),
        }),
        Err(_) => Ok(None),
    }
}

impl std::fmt::Debug for ServerConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ServerConfig")
            .field("bind_addr", &self.bind_addr)
            .field("storage_backend", &self.storage_backend)
            .field("log_level", &self.log_level)
            .field("session_ttl", &self.session_ttl)
            .field("webhook_tolerance_secs", &self.webhook_tolerance_secs)
            .field("billing", &self.billing)
            .field("login_path", &self.login_path)
            .field("unmatched_routes", &self.unmatched_routes)
            .finish_non_exhaustive()
    }
}

impl std::fmt::Debug for BillingApiConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BillingApiConfig")
            .field("base_url", &self.base_url)
            .field("timeout", &self.timeout)
            .finish_non_exhaustive()
    }
}
