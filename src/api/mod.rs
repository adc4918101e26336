//! HTTP service: Google login, the API-key portal, and the filings
//! endpoint, assembled into one axum router.

mod auth;
mod pages;
mod routes;

pub use auth::AuthedService;

use axum::extract::FromRef;
use axum::http::{header, HeaderMap};
use axum::middleware;
use axum::routing::{get, post};
use axum::Router;
use axum_extra::extract::cookie::Key;
use axum_prometheus::metrics_exporter_prometheus::PrometheusHandle;
use axum_prometheus::PrometheusMetricLayer;
use lazy_static::lazy_static;
use std::time::Duration;
use tower_http::cors::CorsLayer;
use tracing::info;

use crate::config::{ServerConfig, SessionConfig};
use crate::edgar::EdgarClient;
use crate::error::ServerError;
use crate::keystore::KeyStore;
use crate::oauth::GoogleOauth;
use crate::session;

lazy_static! {
    /// Metrics recorder registration is process-global and only happens
    /// once; every router built afterwards shares this pair.
    static ref PROMETHEUS_PAIR: (PrometheusMetricLayer<'static>, PrometheusHandle) =
        PrometheusMetricLayer::pair();
}

/// Shared state for all request handlers.
#[derive(Clone)]
pub struct AppState {
    pub keystore: KeyStore,
    pub oauth: Option<GoogleOauth>,
    pub edgar: EdgarClient,
    pub session: SessionConfig,
    pub key_ttl: Duration,
    pub chunk_size: usize,
    pub redirect_url: Option<String>,
    signing_key: Key,
}

impl FromRef<AppState> for Key {
    fn from_ref(state: &AppState) -> Key {
        state.signing_key.clone()
    }
}

impl AppState {
    pub fn new(
        config: &ServerConfig,
        keystore: KeyStore,
        oauth: Option<GoogleOauth>,
        edgar: EdgarClient,
    ) -> Self {
        Self {
            keystore,
            oauth,
            edgar,
            session: config.session.clone(),
            key_ttl: config.keystore.default_ttl(),
            chunk_size: config.edgar.chunk_size,
            redirect_url: config.oauth.redirect_url.clone(),
            signing_key: session::signing_key(config.session.secret.as_deref()),
        }
    }

    /// Absolute URL of the OAuth callback: the configured redirect URL if
    /// set, otherwise derived from the request's Host header.
    pub(crate) fn callback_url(&self, headers: &HeaderMap) -> Option<String> {
        if let Some(url) = &self.redirect_url {
            return Some(url.clone());
        }
        let host = headers.get(header::HOST)?.to_str().ok()?;
        let proto = headers
            .get("x-forwarded-proto")
            .and_then(|value| value.to_str().ok())
            .unwrap_or("http");
        Some(format!("{}://{}/auth", proto, host))
    }
}

/// Build the service router with all routes and layers attached.
pub fn build_router(state: AppState) -> Router {
    let (prometheus_layer, metric_handle) = PROMETHEUS_PAIR.clone();

    Router::new()
        .route("/health", get(routes::health))
        .route("/", get(routes::homepage))
        .route("/login", get(routes::login))
        .route("/auth", get(routes::auth_callback))
        .route("/keys", get(routes::keys_page))
        .route("/keys/create", post(routes::keys_create))
        .route("/keys/revoke", post(routes::keys_revoke))
        .route("/api/create-key", get(routes::api_create_key))
        .route("/logout", get(routes::logout))
        .route("/filings/latest", get(routes::latest_filings))
        .route("/metrics", get(|| async move { metric_handle.render() }))
        .layer(middleware::from_fn_with_state(
            state.clone(),
            auth::require_api_key,
        ))
        .layer(prometheus_layer)
        .layer(CorsLayer::permissive())
        .with_state(state)
}

/// Start the HTTP service and block until it exits.
pub async fn start_api_service(state: AppState, host: &str, port: u16) -> Result<(), ServerError> {
    let router = build_router(state);
    let addr = format!("{}:{}", host, port);
    info!("starting HTTP service on {}", addr);
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    axum::serve(listener, router).await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::oauth::ProviderMetadata;
    use crate::session::{Session, SessionUser};
    use axum::body::Body;
    use axum::http::{Request, StatusCode};
    use axum::response::{IntoResponse, Response};
    use axum_extra::extract::SignedCookieJar;
    use http_body_util::BodyExt;
    use serde_json::{json, Value};
    use tower::ServiceExt;

    async fn test_state(oauth: Option<GoogleOauth>) -> (AppState, tempfile::TempDir) {
        let dir = tempfile::tempdir().unwrap();
        let db_path = dir.path().join("keys.db");
        let keystore = KeyStore::new(db_path.to_str().unwrap(), "test-hash-secret")
            .await
            .unwrap();

        let mut config = ServerConfig::new();
        config.session.secret = Some("an-unnecessarily-long-testing-session-secret".to_string());
        config.session.cookie_secure = false;

        let edgar = EdgarClient::new(&config.edgar).unwrap();
        (AppState::new(&config, keystore, oauth, edgar), dir)
    }

    fn test_oauth() -> GoogleOauth {
        GoogleOauth::new(
            "client-id-123",
            "client-secret-456",
            ProviderMetadata {
                issuer: "https://accounts.google.com".to_string(),
                authorization_endpoint: "https://accounts.google.com/o/oauth2/v2/auth".to_string(),
                token_endpoint: "https://oauth2.googleapis.com/token".to_string(),
                userinfo_endpoint: "https://openidconnect.googleapis.com/v1/userinfo".to_string(),
            },
        )
        .unwrap()
    }

    fn sample_user() -> SessionUser {
        SessionUser {
            sub: "10769150350006150715113082367".to_string(),
            email: "jane@example.com".to_string(),
            name: Some("Jane".to_string()),
            picture: None,
        }
    }

    /// Produce a `Cookie` header value carrying a signed session.
    fn session_cookie(state: &AppState, session: &Session) -> String {
        let jar = session
            .store(SignedCookieJar::new(Key::from_ref(state)), &state.session)
            .unwrap();
        let response = (jar, "").into_response();
        response
            .headers()
            .get(header::SET_COOKIE)
            .unwrap()
            .to_str()
            .unwrap()
            .split(';')
            .next()
            .unwrap()
            .to_string()
    }

    fn get_request(uri: &str) -> Request<Body> {
        Request::builder().uri(uri).body(Body::empty()).unwrap()
    }

    async fn body_json(response: Response) -> Value {
        let bytes = response.into_body().collect().await.unwrap().to_bytes();
        serde_json::from_slice(&bytes).unwrap()
    }

    async fn body_string(response: Response) -> String {
        let bytes = response.into_body().collect().await.unwrap().to_bytes();
        String::from_utf8(bytes.to_vec()).unwrap()
    }

    #[tokio::test]
    async fn test_health() {
        let (state, _dir) = test_state(None).await;
        let app = build_router(state);

        let response = app.oneshot(get_request("/health")).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(
            body_json(response).await,
            json!({"status": "healthy", "service": "mcp-server"})
        );
    }

    #[tokio::test]
    async fn test_homepage_shows_sign_in() {
        let (state, _dir) = test_state(None).await;
        let app = build_router(state);

        let response = app.oneshot(get_request("/")).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let body = body_string(response).await;
        assert!(body.contains("href=\"/login\""));
    }

    #[tokio::test]
    async fn test_missing_api_key_rejected() {
        let (state, _dir) = test_state(None).await;
        let app = build_router(state);

        let response = app
            .oneshot(get_request(
                "/filings/latest?ticker=MSFT&user_agent=x@example.com",
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
        assert_eq!(
            body_json(response).await,
            json!({"error": "missing access token"})
        );
    }

    #[tokio::test]
    async fn test_invalid_api_key_rejected() {
        let (state, _dir) = test_state(None).await;
        let app = build_router(state);

        let request = Request::builder()
            .uri("/filings/latest?ticker=MSFT&user_agent=x@example.com")
            .header(header::AUTHORIZATION, "Bearer sk_mcp_bogus")
            .body(Body::empty())
            .unwrap();
        let response = app.oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
        assert_eq!(
            body_json(response).await,
            json!({"error": "invalid or expired access token"})
        );
    }

    #[tokio::test]
    async fn test_user_agent_contact_guard() {
        let (state, _dir) = test_state(None).await;
        let (raw, _) = state
            .keystore
            .mint("ops", Duration::from_secs(3600))
            .await
            .unwrap();
        let app = build_router(state);

        // a User-Agent without a contact email is rejected before any
        // network traffic happens
        let request = Request::builder()
            .uri("/filings/latest?ticker=MSFT&form=10-K&cursor=0&user_agent=NoContact/1.0")
            .header("x-api-key", &raw)
            .body(Body::empty())
            .unwrap();
        let response = app.oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        let body = body_json(response).await;
        assert_eq!(
            body["error"],
            "SEC EDGAR requires a User-Agent with a contact email (e.g., 'YourApp/1.0 (you@example.com)')"
        );
    }

    #[tokio::test]
    async fn test_unknown_form_rejected() {
        let (state, _dir) = test_state(None).await;
        let (raw, _) = state
            .keystore
            .mint("ops", Duration::from_secs(3600))
            .await
            .unwrap();
        let app = build_router(state);

        let request = Request::builder()
            .uri("/filings/latest?ticker=MSFT&form=99-Z&user_agent=Ops/1.0%20(x@example.com)")
            .header("x-api-key", &raw)
            .body(Body::empty())
            .unwrap();
        let response = app.oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        let body = body_json(response).await;
        assert_eq!(body["error"], "unknown form type '99-Z'");
    }

    #[tokio::test]
    async fn test_api_create_key_requires_login() {
        let (state, _dir) = test_state(None).await;
        let app = build_router(state);

        let response = app.oneshot(get_request("/api/create-key")).await.unwrap();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
        assert_eq!(
            body_string(response).await,
            "Please <a href='/login'>login</a> first."
        );
    }

    #[tokio::test]
    async fn test_keys_page_redirects_anonymous() {
        let (state, _dir) = test_state(None).await;
        let app = build_router(state);

        let response = app.oneshot(get_request("/keys")).await.unwrap();
        assert_eq!(response.status(), StatusCode::TEMPORARY_REDIRECT);
        assert_eq!(response.headers()[header::LOCATION], "/login");
    }

    #[tokio::test]
    async fn test_login_unavailable_without_credentials() {
        let (state, _dir) = test_state(None).await;
        let app = build_router(state);

        let response = app.oneshot(get_request("/login")).await.unwrap();
        assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
    }

    #[tokio::test]
    async fn test_login_redirects_to_google() {
        let (state, _dir) = test_state(Some(test_oauth())).await;
        let app = build_router(state);

        let request = Request::builder()
            .uri("/login")
            .header(header::HOST, "localhost:8000")
            .body(Body::empty())
            .unwrap();
        let response = app.oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::SEE_OTHER);

        let location = response.headers()[header::LOCATION].to_str().unwrap();
        assert!(location.starts_with("https://accounts.google.com/o/oauth2/v2/auth"));
        assert!(location.contains("state="));
        assert!(location.contains("redirect_uri=http%3A%2F%2Flocalhost%3A8000%2Fauth"));

        // the state value must have been stashed in the session
        let set_cookie = response.headers()[header::SET_COOKIE].to_str().unwrap();
        assert!(set_cookie.starts_with("session="));
    }

    #[tokio::test]
    async fn test_auth_callback_state_mismatch() {
        let (state, _dir) = test_state(Some(test_oauth())).await;
        let session = Session {
            oauth_state: Some("expected-state".to_string()),
            ..Session::default()
        };
        let cookie = session_cookie(&state, &session);
        let app = build_router(state);

        let request = Request::builder()
            .uri("/auth?code=abc&state=wrong-state")
            .header(header::COOKIE, cookie)
            .body(Body::empty())
            .unwrap();
        let response = app.oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        assert!(body_string(response).await.contains("state mismatch"));
    }

    #[tokio::test]
    async fn test_metrics_is_public() {
        let (state, _dir) = test_state(None).await;
        let app = build_router(state);

        let response = app.oneshot(get_request("/metrics")).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn test_keys_page_renders_for_signed_in_user() {
        let (state, _dir) = test_state(None).await;
        state
            .keystore
            .mint("ci", Duration::from_secs(3600))
            .await
            .unwrap();

        let session = Session {
            user: Some(sample_user()),
            ..Session::default()
        };
        let cookie = session_cookie(&state, &session);
        let app = build_router(state);

        let request = Request::builder()
            .uri("/keys")
            .header(header::COOKIE, cookie)
            .body(Body::empty())
            .unwrap();
        let response = app.oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let body = body_string(response).await;
        assert!(body.contains("jane@example.com"));
        assert!(body.contains("<td>ci</td>"));
        assert!(body.contains("Revoke"));
    }

    #[tokio::test]
    async fn test_create_key_through_portal() {
        let (state, _dir) = test_state(None).await;
        let session = Session {
            user: Some(sample_user()),
            ..Session::default()
        };
        let cookie = session_cookie(&state, &session);
        let app = build_router(state.clone());

        let request = Request::builder()
            .method("POST")
            .uri("/keys/create")
            .header(header::CONTENT_TYPE, "application/x-www-form-urlencoded")
            .header(header::COOKIE, cookie)
            .body(Body::from("label=ci"))
            .unwrap();
        let response = app.clone().oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::SEE_OTHER);
        assert_eq!(response.headers()[header::LOCATION], "/keys");

        let fresh_cookie = response.headers()[header::SET_COOKIE]
            .to_str()
            .unwrap()
            .split(';')
            .next()
            .unwrap()
            .to_string();

        assert_eq!(state.keystore.count().await.unwrap(), 1);
        let keys = state.keystore.list().await.unwrap();
        assert_eq!(keys[0].service, "ci");

        // the raw key flashes once on the next portal render
        let request = Request::builder()
            .uri("/keys")
            .header(header::COOKIE, fresh_cookie)
            .body(Body::empty())
            .unwrap();
        let response = app.oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let body = body_string(response).await;
        assert!(body.contains("sk_mcp_"));
    }

    #[tokio::test]
    async fn test_duplicate_label_conflicts() {
        let (state, _dir) = test_state(None).await;
        let session = Session {
            user: Some(sample_user()),
            ..Session::default()
        };
        let cookie = session_cookie(&state, &session);
        let app = build_router(state);

        for expected in [StatusCode::SEE_OTHER, StatusCode::CONFLICT] {
            let request = Request::builder()
                .method("POST")
                .uri("/keys/create")
                .header(header::CONTENT_TYPE, "application/x-www-form-urlencoded")
                .header(header::COOKIE, &cookie)
                .body(Body::from("label=ci"))
                .unwrap();
            let response = app.clone().oneshot(request).await.unwrap();
            assert_eq!(response.status(), expected);
        }
    }

    #[tokio::test]
    async fn test_revoke_deletes_key() {
        let (state, _dir) = test_state(None).await;
        let (_, record) = state
            .keystore
            .mint("ci", Duration::from_secs(3600))
            .await
            .unwrap();

        let session = Session {
            user: Some(sample_user()),
            ..Session::default()
        };
        let cookie = session_cookie(&state, &session);
        let app = build_router(state.clone());

        let request = Request::builder()
            .method("POST")
            .uri("/keys/revoke")
            .header(header::CONTENT_TYPE, "application/x-www-form-urlencoded")
            .header(header::COOKIE, cookie)
            .body(Body::from(format!("hash={}", record.hash)))
            .unwrap();
        let response = app.oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::SEE_OTHER);
        assert_eq!(response.headers()[header::LOCATION], "/keys");
        assert_eq!(state.keystore.count().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_logout_clears_session() {
        let (state, _dir) = test_state(None).await;
        let session = Session {
            user: Some(sample_user()),
            ..Session::default()
        };
        let cookie = session_cookie(&state, &session);
        let app = build_router(state);

        let request = Request::builder()
            .uri("/logout")
            .header(header::COOKIE, cookie)
            .body(Body::empty())
            .unwrap();
        let response = app.oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::TEMPORARY_REDIRECT);
        assert_eq!(response.headers()[header::LOCATION], "/");

        let set_cookie = response.headers()[header::SET_COOKIE].to_str().unwrap();
        assert!(set_cookie.starts_with("session="));
    }

    #[tokio::test]
    async fn test_callback_url_prefers_configuration() {
        let (state, _dir) = test_state(None).await;

        let mut headers = HeaderMap::new();
        headers.insert(header::HOST, "example.com".parse().unwrap());
        assert_eq!(
            state.callback_url(&headers).as_deref(),
            Some("http://example.com/auth")
        );
        assert_eq!(state.callback_url(&HeaderMap::new()), None);

        let mut configured = state;
        configured.redirect_url = Some("https://svc.example.com/auth".to_string());
        assert_eq!(
            configured.callback_url(&headers).as_deref(),
            Some("https://svc.example.com/auth")
        );
    }

    #[tokio::test]
    async fn test_forwarded_proto_respected() {
        let (state, _dir) = test_state(None).await;
        let mut headers = HeaderMap::new();
        headers.insert(header::HOST, "svc.example.com".parse().unwrap());
        headers.insert("x-forwarded-proto", "https".parse().unwrap());

        assert_eq!(
            state.callback_url(&headers).as_deref(),
            Some("https://svc.example.com/auth")
        );
    }
}
