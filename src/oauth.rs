//! Google OAuth2 / OpenID Connect login flow.
//!
//! The server is a confidential OAuth2 client: it sends the browser to
//! Google's authorization endpoint, exchanges the returned code for an
//! access token, and reads the user's identity from the userinfo endpoint.
//! Endpoints come from Google's discovery document, fetched once at startup.

use oauth2::basic::BasicClient;
use oauth2::reqwest::async_http_client;
use oauth2::{
    AuthUrl, AuthorizationCode, ClientId, ClientSecret, CsrfToken, RedirectUrl, Scope,
    TokenResponse, TokenUrl,
};
use serde::Deserialize;
use std::time::Duration;
use tracing::{debug, warn};

use crate::ServerError;

/// Google's OpenID Connect discovery document.
pub const GOOGLE_DISCOVERY_URL: &str =
    "https://accounts.google.com/.well-known/openid-configuration";

/// Issuer values accepted from the discovery document.
const GOOGLE_ISSUERS: [&str; 2] = ["https://accounts.google.com", "accounts.google.com"];

/// Scopes requested at login.
const OAUTH_SCOPES: [&str; 3] = ["openid", "email", "profile"];

/// The subset of the discovery document the login flow uses.
#[derive(Debug, Clone, Deserialize)]
pub struct ProviderMetadata {
    pub issuer: String,
    pub authorization_endpoint: String,
    pub token_endpoint: String,
    pub userinfo_endpoint: String,
}

/// Claims returned by the userinfo endpoint.
#[derive(Debug, Clone, Deserialize)]
pub struct UserClaims {
    pub sub: String,
    pub email: String,
    #[serde(default)]
    pub email_verified: bool,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub picture: Option<String>,
}

/// Authenticates users against Google on behalf of the server.
#[derive(Debug, Clone)]
pub struct GoogleOauth {
    client_id: String,
    client_secret: String,
    metadata: ProviderMetadata,
    http_client: reqwest::Client,
}

impl GoogleOauth {
    /// Build a login client from credentials and an already-fetched discovery
    /// document. Documents from issuers other than Google are rejected.
    pub fn new(
        client_id: &str,
        client_secret: &str,
        metadata: ProviderMetadata,
    ) -> Result<Self, ServerError> {
        if !GOOGLE_ISSUERS.contains(&metadata.issuer.as_str()) {
            return Err(ServerError::OauthError(format!(
                "unexpected issuer in discovery document: {}",
                metadata.issuer
            )));
        }
        let http_client = reqwest::ClientBuilder::new()
            .timeout(Duration::from_secs(30))
            .build()?;
        Ok(Self {
            client_id: client_id.to_string(),
            client_secret: client_secret.to_string(),
            metadata,
            http_client,
        })
    }

    /// Fetch Google's discovery document and build the login client.
    pub async fn discover(
        client_id: &str,
        client_secret: &str,
        max_retries: u32,
        backoff_ms: u64,
    ) -> Result<Self, ServerError> {
        let body = fetch_with_retry(GOOGLE_DISCOVERY_URL, max_retries, backoff_ms).await?;
        let metadata: ProviderMetadata = serde_json::from_str(&body)?;
        debug!(
            "discovered Google endpoints: authorization={}, token={}, userinfo={}",
            metadata.authorization_endpoint, metadata.token_endpoint, metadata.userinfo_endpoint
        );
        Self::new(client_id, client_secret, metadata)
    }

    fn oauth_client(&self, redirect_uri: &str) -> Result<BasicClient, ServerError> {
        let auth_url = AuthUrl::new(self.metadata.authorization_endpoint.clone())
            .map_err(|e| ServerError::OauthError(format!("bad authorization endpoint: {}", e)))?;
        let token_url = TokenUrl::new(self.metadata.token_endpoint.clone())
            .map_err(|e| ServerError::OauthError(format!("bad token endpoint: {}", e)))?;
        let redirect_url = RedirectUrl::new(redirect_uri.to_string())
            .map_err(|e| ServerError::OauthError(format!("bad redirect url: {}", e)))?;
        Ok(BasicClient::new(
            ClientId::new(self.client_id.clone()),
            Some(ClientSecret::new(self.client_secret.clone())),
            auth_url,
            Some(token_url),
        )
        .set_redirect_uri(redirect_url))
    }

    /// Build the authorization URL for a login attempt.
    ///
    /// `state` must round-trip through the caller's session and be checked
    /// on the callback. The account chooser is always shown, matching the
    /// `prompt` settings this server has always sent.
    pub fn authorize_url(
        &self,
        redirect_uri: &str,
        state: &str,
        nonce: &str,
    ) -> Result<String, ServerError> {
        let client = self.oauth_client(redirect_uri)?;
        let state = CsrfToken::new(state.to_string());
        let mut request = client.authorize_url(|| state);
        for scope in OAUTH_SCOPES {
            request = request.add_scope(Scope::new(scope.to_string()));
        }
        let (url, _state) = request
            .add_extra_param("nonce", nonce)
            .add_extra_param("prompt", "consent select_account")
            .url();
        Ok(url.to_string())
    }

    /// Exchange an authorization code for an access token.
    pub async fn exchange_code(
        &self,
        redirect_uri: &str,
        code: &str,
    ) -> Result<String, ServerError> {
        let client = self.oauth_client(redirect_uri)?;
        let token = client
            .exchange_code(AuthorizationCode::new(code.to_string()))
            .request_async(async_http_client)
            .await
            .map_err(|e| ServerError::OauthError(format!("code exchange failed: {}", e)))?;
        Ok(token.access_token().secret().to_string())
    }

    /// Fetch and verify the user's claims from the userinfo endpoint.
    pub async fn fetch_claims(&self, access_token: &str) -> Result<UserClaims, ServerError> {
        let claims: UserClaims = self
            .http_client
            .get(&self.metadata.userinfo_endpoint)
            .bearer_auth(access_token)
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;
        verify_claims(claims)
    }
}

/// Fresh random value for the state and nonce parameters.
pub fn random_token() -> String {
    CsrfToken::new_random().secret().to_string()
}

/// Enforce account-level requirements on returned claims.
fn verify_claims(claims: UserClaims) -> Result<UserClaims, ServerError> {
    if claims.email.is_empty() {
        return Err(ServerError::OauthError(
            "userinfo returned no email".to_string(),
        ));
    }
    if !claims.email_verified {
        return Err(ServerError::OauthError(format!(
            "email not verified for account {}",
            claims.email
        )));
    }
    Ok(claims)
}

/// Fetch the body of a URL with retry logic and exponential backoff.
async fn fetch_with_retry(
    url: &str,
    max_retries: u32,
    initial_backoff_ms: u64,
) -> Result<String, ServerError> {
    let client = reqwest::ClientBuilder::new()
        .user_agent("google-oauth2-server/0.2")
        .timeout(Duration::from_secs(30))
        .build()?;

    let mut last_error: Option<ServerError> = None;

    for attempt in 0..max_retries {
        match client.get(url).send().await {
            Ok(response) => match response.error_for_status() {
                Ok(response) => match response.text().await {
                    Ok(body) => return Ok(body),
                    Err(e) => last_error = Some(e.into()),
                },
                Err(e) => last_error = Some(e.into()),
            },
            Err(e) => last_error = Some(e.into()),
        }

        // If not the last attempt, wait with exponential backoff
        if attempt < max_retries - 1 {
            let backoff_ms = initial_backoff_ms * (1 << attempt);
            warn!(
                "fetch failed for {} (attempt {}/{}), retrying in {}ms: {:?}",
                url,
                attempt + 1,
                max_retries,
                backoff_ms,
                last_error
            );
            tokio::time::sleep(Duration::from_millis(backoff_ms)).await;
        }
    }

    Err(last_error.unwrap_or_else(|| {
        ServerError::OauthError(format!(
            "fetch failed for {} after {} attempts",
            url, max_retries
        ))
    }))
}

#[cfg(test)]
mod tests {
    use super::*;

    const DISCOVERY_DOC: &str = r#"{
        "issuer": "https://accounts.google.com",
        "authorization_endpoint": "https://accounts.google.com/o/oauth2/v2/auth",
        "device_authorization_endpoint": "https://oauth2.googleapis.com/device/code",
        "token_endpoint": "https://oauth2.googleapis.com/token",
        "userinfo_endpoint": "https://openidconnect.googleapis.com/v1/userinfo",
        "revocation_endpoint": "https://oauth2.googleapis.com/revoke",
        "jwks_uri": "https://www.googleapis.com/oauth2/v3/certs",
        "response_types_supported": ["code", "token", "id_token"],
        "scopes_supported": ["openid", "email", "profile"]
    }"#;

    fn test_client() -> GoogleOauth {
        let metadata: ProviderMetadata = serde_json::from_str(DISCOVERY_DOC).unwrap();
        GoogleOauth::new("test-client", "test-secret", metadata).unwrap()
    }

    #[test]
    fn test_discovery_doc_parsing() {
        let metadata: ProviderMetadata = serde_json::from_str(DISCOVERY_DOC).unwrap();
        assert_eq!(metadata.issuer, "https://accounts.google.com");
        assert_eq!(
            metadata.userinfo_endpoint,
            "https://openidconnect.googleapis.com/v1/userinfo"
        );
    }

    #[test]
    fn test_foreign_issuer_rejected() {
        let mut metadata: ProviderMetadata = serde_json::from_str(DISCOVERY_DOC).unwrap();
        metadata.issuer = "https://idp.example.com".to_string();
        let err = GoogleOauth::new("test-client", "test-secret", metadata).unwrap_err();
        assert!(matches!(err, ServerError::OauthError(_)));
    }

    #[test]
    fn test_bare_issuer_accepted() {
        let mut metadata: ProviderMetadata = serde_json::from_str(DISCOVERY_DOC).unwrap();
        metadata.issuer = "accounts.google.com".to_string();
        assert!(GoogleOauth::new("test-client", "test-secret", metadata).is_ok());
    }

    #[test]
    fn test_authorize_url() {
        let url = test_client()
            .authorize_url("https://server.example.com/auth", "state123", "nonce456")
            .unwrap();

        assert!(url.starts_with("https://accounts.google.com/o/oauth2/v2/auth?"));
        assert!(url.contains("response_type=code"));
        assert!(url.contains("client_id=test-client"));
        assert!(url.contains("state=state123"));
        assert!(url.contains("nonce=nonce456"));
        assert!(url.contains("scope=openid+email+profile"));
        assert!(url.contains("prompt=consent+select_account"));
        assert!(url.contains("redirect_uri=https%3A%2F%2Fserver.example.com%2Fauth"));
        // the secret never appears in the browser-facing URL
        assert!(!url.contains("test-secret"));
    }

    #[test]
    fn test_verify_claims() {
        let claims: UserClaims = serde_json::from_str(
            r#"{
                "sub": "1234567890",
                "email": "user@example.com",
                "email_verified": true,
                "name": "Test User",
                "picture": "https://lh3.googleusercontent.com/a/photo"
            }"#,
        )
        .unwrap();
        let verified = verify_claims(claims).unwrap();
        assert_eq!(verified.sub, "1234567890");
        assert_eq!(verified.email, "user@example.com");
        assert_eq!(verified.name.as_deref(), Some("Test User"));
    }

    #[test]
    fn test_unverified_email_rejected() {
        let claims: UserClaims = serde_json::from_str(
            r#"{"sub": "42", "email": "user@example.com", "email_verified": false}"#,
        )
        .unwrap();
        assert!(verify_claims(claims).is_err());

        // a document that omits the flag entirely is also rejected
        let claims: UserClaims =
            serde_json::from_str(r#"{"sub": "42", "email": "user@example.com"}"#).unwrap();
        assert!(verify_claims(claims).is_err());
    }

    #[test]
    fn test_random_token() {
        let a = random_token();
        let b = random_token();
        assert!(!a.is_empty());
        assert_ne!(a, b);
    }
}
