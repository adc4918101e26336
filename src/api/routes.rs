//! Request handlers for the login flow, the key portal, and the filings
//! lookup.

use axum::extract::{Query, State};
use axum::http::{HeaderMap, StatusCode};
use axum::response::{Html, IntoResponse, Redirect, Response};
use axum::{Extension, Form, Json};
use axum_extra::extract::SignedCookieJar;
use serde::Deserialize;
use serde_json::{json, Value};
use std::str::FromStr;
use tracing::{error, info, warn};

use super::auth::AuthedService;
use super::{pages, AppState};
use crate::edgar::{EdgarError, FormType};
use crate::error::ServerError;
use crate::oauth::random_token;
use crate::session::{Session, SessionUser};

/// GET /health
pub async fn health() -> Json<Value> {
    Json(json!({"status": "healthy", "service": "mcp-server"}))
}

/// GET /
///
/// Anonymous visitors get the sign-in page; signed-in users go straight to
/// the key portal.
pub async fn homepage(jar: SignedCookieJar) -> Response {
    let session = Session::from_jar(&jar);
    if session.is_authenticated() {
        return Redirect::temporary("/keys").into_response();
    }
    Html(pages::login_page()).into_response()
}

/// GET /login
///
/// Stashes fresh state and nonce values in the session, then redirects to
/// Google's consent screen.
pub async fn login(
    State(state): State<AppState>,
    headers: HeaderMap,
    jar: SignedCookieJar,
) -> Response {
    let Some(google) = state.oauth.clone() else {
        return (
            StatusCode::SERVICE_UNAVAILABLE,
            "Google sign-in is not configured on this server.",
        )
            .into_response();
    };

    let Some(redirect_uri) = state.callback_url(&headers) else {
        return (StatusCode::BAD_REQUEST, "Missing Host header.").into_response();
    };

    let state_token = random_token();
    let nonce = random_token();
    let authorize_url = match google.authorize_url(&redirect_uri, &state_token, &nonce) {
        Ok(url) => url,
        Err(e) => {
            error!("failed to build the Google authorize URL: {}", e);
            return (StatusCode::INTERNAL_SERVER_ERROR, "Login is unavailable.").into_response();
        }
    };

    let mut session = Session::from_jar(&jar);
    session.oauth_state = Some(state_token);
    session.oauth_nonce = Some(nonce);
    match session.store(jar, &state.session) {
        Ok(jar) => (jar, Redirect::to(&authorize_url)).into_response(),
        Err(e) => {
            error!("failed to store the session: {}", e);
            (StatusCode::INTERNAL_SERVER_ERROR, "Login is unavailable.").into_response()
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct AuthCallbackQuery {
    pub code: Option<String>,
    pub state: Option<String>,
    pub error: Option<String>,
}

/// GET /auth
///
/// Google redirects here after the consent screen. The state parameter must
/// match the value `/login` stashed in the session.
pub async fn auth_callback(
    State(state): State<AppState>,
    headers: HeaderMap,
    jar: SignedCookieJar,
    Query(query): Query<AuthCallbackQuery>,
) -> Response {
    let Some(google) = state.oauth.clone() else {
        return (
            StatusCode::SERVICE_UNAVAILABLE,
            "Google sign-in is not configured on this server.",
        )
            .into_response();
    };

    let mut session = Session::from_jar(&jar);
    let expected_state = session.oauth_state.take();
    session.oauth_nonce = None;

    if let Some(error) = &query.error {
        warn!("Google returned an error on the callback: {}", error);
        let jar = Session::clear(jar);
        return (
            jar,
            (StatusCode::BAD_REQUEST, "Login failed: access was denied."),
        )
            .into_response();
    }

    let state_matches = matches!(
        (&query.state, &expected_state),
        (Some(got), Some(want)) if got == want
    );
    if !state_matches {
        warn!("oauth callback state mismatch");
        let jar = Session::clear(jar);
        return (jar, (StatusCode::BAD_REQUEST, "OAuth state mismatch.")).into_response();
    }

    let Some(code) = query.code else {
        let jar = Session::clear(jar);
        return (jar, (StatusCode::BAD_REQUEST, "Missing authorization code.")).into_response();
    };

    let Some(redirect_uri) = state.callback_url(&headers) else {
        return (StatusCode::BAD_REQUEST, "Missing Host header.").into_response();
    };

    let access_token = match google.exchange_code(&redirect_uri, &code).await {
        Ok(token) => token,
        Err(e) => {
            warn!("authorization code exchange failed: {}", e);
            let jar = Session::clear(jar);
            return (
                jar,
                (
                    StatusCode::BAD_GATEWAY,
                    "Login failed: could not exchange the authorization code.",
                ),
            )
                .into_response();
        }
    };

    let claims = match google.fetch_claims(&access_token).await {
        Ok(claims) => claims,
        Err(e) => {
            warn!("userinfo fetch failed: {}", e);
            let jar = Session::clear(jar);
            return (
                jar,
                (
                    StatusCode::BAD_REQUEST,
                    Html("Login succeeded but no userinfo returned.".to_string()),
                ),
            )
                .into_response();
        }
    };

    info!("signed in {}", claims.email);
    session.user = Some(SessionUser {
        sub: claims.sub,
        email: claims.email,
        name: claims.name,
        picture: claims.picture,
    });
    match session.store(jar, &state.session) {
        Ok(jar) => (jar, Redirect::to("/keys")).into_response(),
        Err(e) => {
            error!("failed to store the session: {}", e);
            (StatusCode::INTERNAL_SERVER_ERROR, "Login is unavailable.").into_response()
        }
    }
}

/// GET /keys
pub async fn keys_page(State(state): State<AppState>, jar: SignedCookieJar) -> Response {
    let mut session = Session::from_jar(&jar);
    let Some(user) = session.user.clone() else {
        return Redirect::temporary("/login").into_response();
    };

    let keys = match state.keystore.list().await {
        Ok(keys) => keys,
        Err(e) => {
            error!("failed to list API keys: {}", e);
            return (StatusCode::INTERNAL_SERVER_ERROR, "Failed to load keys.").into_response();
        }
    };

    let flash = session.take_flash();
    let page = pages::keys_page(&user, &keys, flash.as_deref());

    // write the session back so the flash renders exactly once
    match session.store(jar, &state.session) {
        Ok(jar) => (jar, Html(page)).into_response(),
        Err(e) => {
            error!("failed to store the session: {}", e);
            Html(page).into_response()
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct CreateKeyForm {
    pub label: Option<String>,
}

/// POST /keys/create
pub async fn keys_create(
    State(state): State<AppState>,
    jar: SignedCookieJar,
    Form(form): Form<CreateKeyForm>,
) -> Response {
    let session = Session::from_jar(&jar);
    if !session.is_authenticated() {
        return Redirect::temporary("/login").into_response();
    }

    let label = form
        .label
        .as_deref()
        .map(str::trim)
        .filter(|label| !label.is_empty())
        .unwrap_or("default")
        .to_string();

    mint_with_flash(&state, jar, session, &label).await
}

/// GET /api/create-key
///
/// One-click mint under the fixed "default" label.
pub async fn api_create_key(State(state): State<AppState>, jar: SignedCookieJar) -> Response {
    let session = Session::from_jar(&jar);
    if !session.is_authenticated() {
        return (
            StatusCode::UNAUTHORIZED,
            Html("Please <a href='/login'>login</a> first.".to_string()),
        )
            .into_response();
    }

    mint_with_flash(&state, jar, session, "default").await
}

async fn mint_with_flash(
    state: &AppState,
    jar: SignedCookieJar,
    mut session: Session,
    label: &str,
) -> Response {
    match state.keystore.mint(label, state.key_ttl).await {
        Ok((raw, record)) => {
            info!("minted an API key for service '{}'", record.service);
            session.flash_api_key = Some(raw);
            match session.store(jar, &state.session) {
                Ok(jar) => (jar, Redirect::to("/keys")).into_response(),
                Err(e) => {
                    error!("failed to store the session: {}", e);
                    Redirect::to("/keys").into_response()
                }
            }
        }
        Err(ServerError::KeyStoreError(message)) => {
            (StatusCode::CONFLICT, message).into_response()
        }
        Err(e) => {
            error!("failed to mint an API key: {}", e);
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                "Failed to create the key.",
            )
                .into_response()
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct RevokeKeyForm {
    pub hash: Option<String>,
}

/// POST /keys/revoke
///
/// Deletes the key outright. Redirects back to the portal either way, as
/// the portal always has.
pub async fn keys_revoke(
    State(state): State<AppState>,
    jar: SignedCookieJar,
    Form(form): Form<RevokeKeyForm>,
) -> Response {
    let session = Session::from_jar(&jar);
    if !session.is_authenticated() {
        return Redirect::temporary("/login").into_response();
    }

    if let Some(hash) = form.hash.as_deref().filter(|hash| !hash.is_empty()) {
        match state.keystore.revoke(hash).await {
            Ok(true) => info!("revoked API key {}", hash),
            Ok(false) => warn!("revoke requested for unknown key hash"),
            Err(e) => error!("failed to revoke API key: {}", e),
        }
    }

    Redirect::to("/keys").into_response()
}

/// GET /logout
pub async fn logout(jar: SignedCookieJar) -> (SignedCookieJar, Redirect) {
    (Session::clear(jar), Redirect::temporary("/"))
}

fn default_form() -> String {
    "10-K".to_string()
}

#[derive(Debug, Deserialize)]
pub struct FilingsQuery {
    pub ticker: String,
    #[serde(default = "default_form")]
    pub form: String,
    #[serde(default)]
    pub cursor: i64,
    pub user_agent: String,
}

/// GET /filings/latest
///
/// Fetch the latest SEC filing for a company and form type, returning the
/// filing text in cursor-addressed chunks alongside company metadata.
pub async fn latest_filings(
    State(state): State<AppState>,
    Extension(service): Extension<AuthedService>,
    Query(query): Query<FilingsQuery>,
) -> Result<Json<Value>, (StatusCode, Json<Value>)> {
    let form = FormType::from_str(&query.form).map_err(edgar_error_response)?;

    info!(
        "filings lookup: ticker={} form={} cursor={} service={}",
        query.ticker, form, query.cursor, service.0
    );

    let chunks = state
        .edgar
        .latest_filing_chunks(&query.ticker, form, &query.user_agent, state.chunk_size)
        .await
        .map_err(edgar_error_response)?;

    let payload = chunks
        .to_response(query.cursor)
        .map_err(edgar_error_response)?;
    Ok(Json(payload))
}

/// Map EDGAR failures onto the statuses and payloads callers expect.
fn edgar_error_response(error: EdgarError) -> (StatusCode, Json<Value>) {
    match &error {
        EdgarError::MissingContactEmail
        | EdgarError::CursorOutOfRange { .. }
        | EdgarError::UnknownForm(_) => (
            StatusCode::BAD_REQUEST,
            Json(json!({"error": error.to_string()})),
        ),
        EdgarError::TickerNotFound { ticker } => (
            StatusCode::NOT_FOUND,
            Json(json!({"error": "Ticker not found", "ticker": ticker, "status": 404})),
        ),
        EdgarError::FormNotAvailable { .. } => (
            StatusCode::NOT_FOUND,
            Json(json!({"error": error.to_string()})),
        ),
        EdgarError::Network(_) | EdgarError::Decode(_) | EdgarError::FetchError(_) => (
            StatusCode::BAD_GATEWAY,
            Json(json!({"error": error.to_string()})),
        ),
    }
}
