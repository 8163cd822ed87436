//! API key authentication middleware. Bypasses `/health` and
//! `/swagger/*`; everything else requires a key matching `AppState`'s
//! configured `api_key` via `X-API-Key`, `Authorization: Bearer <key>`,
//! or `?api_key=`.

use std::sync::Arc;

use axum::body::Body;
use axum::extract::State;
use axum::http::Request;
use axum::middleware::Next;
use axum::response::Response;

use crate::error::ApiError;
use crate::state::AppState;

fn bypasses_auth(path: &str) -> bool {
    path == "/health" || path.starts_with("/swagger")
}

fn extract_key(req: &Request<Body>) -> Option<String> {
    if let Some(header) = req.headers().get("x-api-key") {
        if let Ok(s) = header.to_str() {
            return Some(s.to_string());
        }
    }
    if let Some(header) = req.headers().get(axum::http::header::AUTHORIZATION) {
        if let Ok(s) = header.to_str() {
            if let Some(token) = s.strip_prefix("Bearer ") {
                return Some(token.to_string());
            }
        }
    }
    if let Some(query) = req.uri().query() {
        return query.split('&').find_map(|pair| {
            let (k, v) = pair.split_once('=')?;
            (k == "api_key").then(|| v.to_string())
        });
    }
    None
}

pub async fn require_api_key(
    State(state): State<Arc<AppState>>,
    req: Request<Body>,
    next: Next,
) -> Result<Response, ApiError> {
    if bypasses_auth(req.uri().path()) {
        return Ok(next.run(req).await);
    }

    let Some(expected) = &state.api_key else {
        return Ok(next.run(req).await);
    };

    match extract_key(&req) {
        Some(provided) if &provided == expected => Ok(next.run(req).await),
        _ => Err(ApiError::unauthorized("missing or invalid API key")),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::header;

    #[test]
    fn health_and_swagger_bypass_auth() {
        assert!(bypasses_auth("/health"));
        assert!(bypasses_auth("/swagger/ui"));
        assert!(!bypasses_auth("/api/v1/sessions"));
    }

    #[test]
    fn extracts_key_from_x_api_key_header() {
        let req = Request::builder()
            .header("x-api-key", "secret")
            .body(Body::empty())
            .unwrap();
        assert_eq!(extract_key(&req), Some("secret".to_string()));
    }

    #[test]
    fn extracts_key_from_bearer_authorization_header() {
        let req = Request::builder()
            .header(header::AUTHORIZATION, "Bearer secret")
            .body(Body::empty())
            .unwrap();
        assert_eq!(extract_key(&req), Some("secret".to_string()));
    }

    #[test]
    fn extracts_key_from_query_param() {
        let req = Request::builder()
            .uri("/api/v1/sessions?api_key=secret&limit=10")
            .body(Body::empty())
            .unwrap();
        assert_eq!(extract_key(&req), Some("secret".to_string()));
    }
}
