//! Configuration management for the Google OAuth2 server.
//!
//! This module provides a centralized configuration struct that loads settings
//! from environment variables. All configuration is loaded once at startup
//! and can be displayed for logging purposes.

use std::fmt;
use std::time::Duration;

/// Default values for the API key store
const DEFAULT_DB_PATH: &str = "data/api_keys.db";
const DEFAULT_KEY_TTL_DAYS: i64 = 30;

/// Default values for session cookies
const DEFAULT_SESSION_MAX_AGE_SECS: i64 = 86400;
const DEFAULT_COOKIE_SECURE: bool = true;

/// Default values for EDGAR fetching
const DEFAULT_EDGAR_MAX_RETRIES: u32 = 3;
const DEFAULT_EDGAR_BACKOFF_MS: u64 = 1000;
const DEFAULT_CHUNK_SIZE: usize = 8000;
const DEFAULT_FETCH_CONCURRENCY: usize = 2;

/// Default values for keystore maintenance
const DEFAULT_SWEEP_INTERVAL_SECS: u64 = 3600;

/// Google OAuth2 login configuration.
///
/// Client credentials come from the Google Cloud console. Login routes stay
/// disabled until both are present.
#[derive(Debug, Clone, Default)]
pub struct OauthConfig {
    /// OAuth2 client ID.
    /// Environment variable: `GOOGLE_CLIENT_ID`
    pub client_id: Option<String>,

    /// OAuth2 client secret.
    /// Environment variable: `GOOGLE_CLIENT_SECRET`
    pub client_secret: Option<String>,

    /// Fixed OAuth2 callback URL. When unset, the callback is derived from
    /// the Host header of each login request.
    /// Environment variable: `GOOGLE_OAUTH2_SERVER_REDIRECT_URL`
    pub redirect_url: Option<String>,
}

impl OauthConfig {
    /// Load OAuth configuration from environment variables.
    pub fn from_env() -> Self {
        Self {
            client_id: std::env::var("GOOGLE_CLIENT_ID").ok(),
            client_secret: std::env::var("GOOGLE_CLIENT_SECRET").ok(),
            redirect_url: std::env::var("GOOGLE_OAUTH2_SERVER_REDIRECT_URL").ok(),
        }
    }

    /// Returns true if Google login is configured.
    pub fn is_enabled(&self) -> bool {
        self.client_id.is_some() && self.client_secret.is_some()
    }
}

/// Session cookie configuration.
#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// Cookie signing secret. When unset a random per-process key is
    /// generated and sessions do not survive a restart.
    /// Environment variable: `SESSION_SECRET`
    pub secret: Option<String>,

    /// Session lifetime in seconds.
    /// Environment variable: `GOOGLE_OAUTH2_SERVER_SESSION_MAX_AGE_SECS`
    pub max_age_secs: i64,

    /// Whether session cookies carry the `Secure` attribute.
    /// Environment variable: `GOOGLE_OAUTH2_SERVER_COOKIE_SECURE`
    pub cookie_secure: bool,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            secret: None,
            max_age_secs: DEFAULT_SESSION_MAX_AGE_SECS,
            cookie_secure: DEFAULT_COOKIE_SECURE,
        }
    }
}

impl SessionConfig {
    /// Load session configuration from environment variables.
    pub fn from_env() -> Self {
        Self {
            secret: std::env::var("SESSION_SECRET").ok(),
            max_age_secs: std::env::var("GOOGLE_OAUTH2_SERVER_SESSION_MAX_AGE_SECS")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(DEFAULT_SESSION_MAX_AGE_SECS),
            cookie_secure: std::env::var("GOOGLE_OAUTH2_SERVER_COOKIE_SECURE")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(DEFAULT_COOKIE_SECURE),
        }
    }
}

/// API key store configuration.
#[derive(Debug, Clone)]
pub struct KeystoreConfig {
    /// Path to the SQLite database file. Parent directories are created on
    /// open.
    /// Environment variable: `GOOGLE_OAUTH2_SERVER_DB_PATH`
    pub db_path: String,

    /// HMAC secret for hashing API keys at rest. Required for any operation
    /// that touches the key store.
    /// Environment variable: `API_KEY_HASH_SECRET`
    pub hash_secret: Option<String>,

    /// Default lifetime of newly minted keys, in days.
    /// Environment variable: `GOOGLE_OAUTH2_SERVER_KEY_TTL_DAYS`
    pub default_ttl_days: i64,
}

impl Default for KeystoreConfig {
    fn default() -> Self {
        Self {
            db_path: DEFAULT_DB_PATH.to_string(),
            hash_secret: None,
            default_ttl_days: DEFAULT_KEY_TTL_DAYS,
        }
    }
}

impl KeystoreConfig {
    /// Load key store configuration from environment variables.
    pub fn from_env() -> Self {
        Self {
            db_path: std::env::var("GOOGLE_OAUTH2_SERVER_DB_PATH")
                .unwrap_or_else(|_| DEFAULT_DB_PATH.to_string()),
            hash_secret: std::env::var("API_KEY_HASH_SECRET").ok(),
            default_ttl_days: std::env::var("GOOGLE_OAUTH2_SERVER_KEY_TTL_DAYS")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(DEFAULT_KEY_TTL_DAYS),
        }
    }

    /// Get the default key lifetime as a Duration.
    pub fn default_ttl(&self) -> Duration {
        Duration::from_secs(self.default_ttl_days.max(0) as u64 * 24 * 60 * 60)
    }
}

/// EDGAR fetching configuration.
///
/// Controls how the server talks to the SEC EDGAR endpoints.
#[derive(Debug, Clone)]
pub struct EdgarConfig {
    /// Maximum number of retry attempts for failed HTTP requests.
    /// Environment variable: `GOOGLE_OAUTH2_SERVER_MAX_RETRIES`
    pub max_retries: u32,

    /// Initial backoff duration in milliseconds between retries.
    /// Environment variable: `GOOGLE_OAUTH2_SERVER_BACKOFF_MS`
    pub backoff_ms: u64,

    /// Byte budget for each filing text chunk.
    /// Environment variable: `GOOGLE_OAUTH2_SERVER_CHUNK_SIZE`
    pub chunk_size: usize,

    /// Number of filing documents to fetch simultaneously.
    /// Environment variable: `GOOGLE_OAUTH2_SERVER_FETCH_CONCURRENCY`
    pub fetch_concurrency: usize,
}

impl Default for EdgarConfig {
    fn default() -> Self {
        Self {
            max_retries: DEFAULT_EDGAR_MAX_RETRIES,
            backoff_ms: DEFAULT_EDGAR_BACKOFF_MS,
            chunk_size: DEFAULT_CHUNK_SIZE,
            fetch_concurrency: DEFAULT_FETCH_CONCURRENCY,
        }
    }
}

impl EdgarConfig {
    /// Load EDGAR configuration from environment variables.
    pub fn from_env() -> Self {
        Self {
            max_retries: std::env::var("GOOGLE_OAUTH2_SERVER_MAX_RETRIES")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(DEFAULT_EDGAR_MAX_RETRIES),
            backoff_ms: std::env::var("GOOGLE_OAUTH2_SERVER_BACKOFF_MS")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(DEFAULT_EDGAR_BACKOFF_MS),
            chunk_size: std::env::var("GOOGLE_OAUTH2_SERVER_CHUNK_SIZE")
                .ok()
                .and_then(|s| s.parse().ok())
                .filter(|size| *size > 0)
                .unwrap_or(DEFAULT_CHUNK_SIZE),
            fetch_concurrency: std::env::var("GOOGLE_OAUTH2_SERVER_FETCH_CONCURRENCY")
                .ok()
                .and_then(|s| s.parse().ok())
                .filter(|n| *n > 0)
                .unwrap_or(DEFAULT_FETCH_CONCURRENCY),
        }
    }
}

impl fmt::Display for EdgarConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "chunk_size={}, fetch_concurrency={}, max_retries={}, backoff_ms={}",
            self.chunk_size, self.fetch_concurrency, self.max_retries, self.backoff_ms
        )
    }
}

/// Expired-key sweep configuration.
#[derive(Debug, Clone)]
pub struct SweepConfig {
    /// Interval between expired-key sweeps in seconds.
    /// Environment variable: `GOOGLE_OAUTH2_SERVER_SWEEP_INTERVAL_SECS`
    pub interval_secs: u64,
}

impl Default for SweepConfig {
    fn default() -> Self {
        Self {
            interval_secs: DEFAULT_SWEEP_INTERVAL_SECS,
        }
    }
}

impl SweepConfig {
    /// Load sweep configuration from environment variables.
    pub fn from_env() -> Self {
        Self {
            interval_secs: std::env::var("GOOGLE_OAUTH2_SERVER_SWEEP_INTERVAL_SECS")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(DEFAULT_SWEEP_INTERVAL_SECS),
        }
    }

    /// Get the sweep interval as a Duration.
    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_secs)
    }
}

/// Complete server configuration.
///
/// This struct aggregates all configuration settings and provides methods
/// for loading from environment variables and displaying configuration summaries.
#[derive(Debug, Clone, Default)]
pub struct ServerConfig {
    /// Google login settings
    pub oauth: OauthConfig,

    /// Session cookie settings
    pub session: SessionConfig,

    /// API key store settings
    pub keystore: KeystoreConfig,

    /// EDGAR fetching settings
    pub edgar: EdgarConfig,

    /// Expired-key sweep settings
    pub sweep: SweepConfig,
}

impl ServerConfig {
    /// Create a new ServerConfig with default values.
    pub fn new() -> Self {
        Self::default()
    }

    /// Load all configuration from environment variables.
    pub fn from_env() -> Self {
        Self {
            oauth: OauthConfig::from_env(),
            session: SessionConfig::from_env(),
            keystore: KeystoreConfig::from_env(),
            edgar: EdgarConfig::from_env(),
            sweep: SweepConfig::from_env(),
        }
    }

    /// Display configuration summary for logging.
    ///
    /// Returns a vector of log lines suitable for info-level logging.
    /// Secrets never appear in the output.
    pub fn display_summary(
        &self,
        do_sweep: bool,
        sweep_interval: u64,
        host: &str,
        port: u16,
    ) -> Vec<String> {
        let mut lines = Vec::new();

        lines.push("=== Google OAuth2 Server Configuration ===".to_string());

        lines.push(format!("API service: {}:{}", host, port));

        if self.oauth.is_enabled() {
            match self.oauth.redirect_url {
                Some(ref url) => {
                    lines.push(format!("Google login: CONFIGURED (callback: {})", url))
                }
                None => lines
                    .push("Google login: CONFIGURED (callback derived per request)".to_string()),
            }
        } else {
            lines.push(
                "Google login: DISABLED (set GOOGLE_CLIENT_ID and GOOGLE_CLIENT_SECRET)"
                    .to_string(),
            );
        }

        if self.session.secret.is_some() {
            lines.push(format!(
                "Sessions: signing secret SET, max_age={}s, secure={}",
                self.session.max_age_secs, self.session.cookie_secure
            ));
        } else {
            lines.push(format!(
                "Sessions: signing secret GENERATED (sessions reset on restart), max_age={}s, secure={}",
                self.session.max_age_secs, self.session.cookie_secure
            ));
        }

        if self.keystore.hash_secret.is_some() {
            lines.push(format!(
                "Key store: {} (default ttl: {} days)",
                self.keystore.db_path, self.keystore.default_ttl_days
            ));
        } else {
            lines.push(format!(
                "Key store: {} - WARNING: API_KEY_HASH_SECRET not set",
                self.keystore.db_path
            ));
        }

        lines.push(format!("EDGAR config: {}", self.edgar));

        if do_sweep {
            lines.push(format!(
                "Expired-key sweep: ENABLED (interval: {} seconds)",
                sweep_interval
            ));
        } else {
            lines.push("Expired-key sweep: DISABLED".to_string());
        }

        lines.push("===========================================".to_string());

        lines
    }
}
