//! Signed cookie sessions for the login flow and the key-management pages.
//!
//! The session is a JSON payload carried in a single signed cookie. Browsers
//! hold the plaintext but cannot alter it without failing signature
//! verification, at which point the session reads as empty.

use axum_extra::extract::cookie::{Cookie, Key, SameSite, SignedCookieJar};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::config::SessionConfig;
use crate::ServerError;

/// Name of the session cookie.
pub const SESSION_COOKIE: &str = "session";

/// Minimum byte length accepted for `SESSION_SECRET`.
const MIN_SECRET_LEN: usize = 32;

/// The signed-in user, as taken from Google's userinfo claims.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionUser {
    pub sub: String,
    pub email: String,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub picture: Option<String>,
}

/// Session payload.
///
/// `oauth_state` and `oauth_nonce` only live between the redirect to Google
/// and the callback. `flash_api_key` carries a freshly minted raw key to the
/// next page view and nowhere else.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Session {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user: Option<SessionUser>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub oauth_state: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub oauth_nonce: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub flash_api_key: Option<String>,

    /// Unix seconds after which the payload is no longer accepted, refreshed
    /// on every write.
    #[serde(default)]
    pub expires_at: i64,
}

impl Session {
    /// Read the session from the jar. Missing, unverifiable, unparseable,
    /// and expired payloads all read as an empty session.
    pub fn from_jar(jar: &SignedCookieJar) -> Self {
        let Some(cookie) = jar.get(SESSION_COOKIE) else {
            return Self::default();
        };
        let Ok(session) = serde_json::from_str::<Session>(cookie.value()) else {
            return Self::default();
        };
        if session.expires_at > 0 && Utc::now().timestamp() > session.expires_at {
            return Self::default();
        }
        session
    }

    /// Returns true if a user is signed in.
    pub fn is_authenticated(&self) -> bool {
        self.user.is_some()
    }

    /// Take the one-time flash value, clearing it from the session.
    pub fn take_flash(&mut self) -> Option<String> {
        self.flash_api_key.take()
    }

    /// Write the session back to the jar with the configured cookie
    /// attributes, refreshing the payload expiry.
    pub fn store(
        &self,
        jar: SignedCookieJar,
        config: &SessionConfig,
    ) -> Result<SignedCookieJar, ServerError> {
        let mut session = self.clone();
        session.expires_at = Utc::now().timestamp() + config.max_age_secs;
        let payload = serde_json::to_string(&session)?;

        let cookie = Cookie::build((SESSION_COOKIE, payload))
            .path("/")
            .http_only(true)
            .same_site(SameSite::Lax)
            .secure(config.cookie_secure)
            .max_age(time::Duration::seconds(config.max_age_secs))
            .build();
        Ok(jar.add(cookie))
    }

    /// Drop the session cookie entirely.
    pub fn clear(jar: SignedCookieJar) -> SignedCookieJar {
        jar.remove(Cookie::build((SESSION_COOKIE, "")).path("/").build())
    }
}

/// Build the cookie signing key from the configured secret.
///
/// A missing or too-short secret falls back to a random per-process key, so
/// the server always boots but sessions then reset on restart.
pub fn signing_key(secret: Option<&str>) -> Key {
    match secret {
        Some(s) if s.len() >= MIN_SECRET_LEN => Key::derive_from(s.as_bytes()),
        Some(_) => {
            warn!(
                "SESSION_SECRET is shorter than {} bytes, using a random session key",
                MIN_SECRET_LEN
            );
            Key::generate()
        }
        None => Key::generate(),
    }
}
