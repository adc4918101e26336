//! API-key middleware for the filings endpoints.

use axum::extract::{Request, State};
use axum::http::{header, HeaderMap, StatusCode};
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};
use axum::Json;
use lazy_static::lazy_static;
use serde_json::json;
use std::collections::HashSet;
use tracing::error;

use super::AppState;

lazy_static! {
    /// Paths reachable without an API key: the browser login flow plus the
    /// operational endpoints.
    static ref PUBLIC_PATHS: HashSet<&'static str> = HashSet::from([
        "/health",
        "/",
        "/login",
        "/auth",
        "/logout",
        "/api/create-key",
        "/keys",
        "/keys/revoke",
        "/keys/create",
        "/metrics",
    ]);
}

/// Service label of the API key that authenticated the request, inserted
/// into request extensions for downstream handlers.
#[derive(Debug, Clone)]
pub struct AuthedService(pub String);

/// Require a valid API key on everything outside the public path set.
///
/// The key arrives either as `Authorization: Bearer <key>` or in an
/// `x-api-key` header. A present but unknown, revoked, or expired key is
/// distinguished from a missing one in the response body.
pub async fn require_api_key(
    State(state): State<AppState>,
    mut request: Request,
    next: Next,
) -> Response {
    if PUBLIC_PATHS.contains(request.uri().path()) {
        return next.run(request).await;
    }

    let Some(token) = bearer_token(request.headers()) else {
        return (
            StatusCode::UNAUTHORIZED,
            Json(json!({"error": "missing access token"})),
        )
            .into_response();
    };

    match state.keystore.lookup(&token).await {
        Ok(Some(record)) => {
            request
                .extensions_mut()
                .insert(AuthedService(record.service));
            next.run(request).await
        }
        Ok(None) => (
            StatusCode::UNAUTHORIZED,
            Json(json!({"error": "invalid or expired access token"})),
        )
            .into_response(),
        Err(e) => {
            error!("API key lookup failed: {}", e);
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(json!({"error": "internal server error"})),
            )
                .into_response()
        }
    }
}

/// Pull the key out of the request headers. An `Authorization` header that
/// starts with `Bearer ` always wins, even when its token is empty.
fn bearer_token(headers: &HeaderMap) -> Option<String> {
    let authorization = headers
        .get(header::AUTHORIZATION)
        .and_then(|value| value.to_str().ok())
        .unwrap_or("");
    let token = match authorization.strip_prefix("Bearer ") {
        Some(token) => Some(token),
        None => headers
            .get("x-api-key")
            .and_then(|value| value.to_str().ok()),
    };
    token
        .filter(|token| !token.is_empty())
        .map(String::from)
}
