// SPDX-License-Identifier: MIT OR Apache-2.0
//! Middleware stack for the daemon's HTTP API.

use axum::{
    extract::{Request, State},
    http::{HeaderValue, StatusCode},
    middleware::Next,
    response::{IntoResponse, Response},
};
use std::sync::Arc;
use std::time::Instant;
use tracing::info;
use uuid::Uuid;

/// A unique request identifier, available as an Axum extension.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct RequestId(pub Uuid);

/// Generates a [`RequestId`] for each request and sets the `X-Request-Id`
/// response header.
pub async fn request_id_middleware(mut req: Request, next: Next) -> Response {
    let id = RequestId(Uuid::new_v4());
    req.extensions_mut().insert(id);
    let mut resp = next.run(req).await;
    resp.headers_mut()
        .insert("x-request-id", HeaderValue::from_str(&id.0.to_string()).unwrap());
    resp
}

/// Logs method, path, status code, and duration for each request.
pub async fn request_logger_middleware(req: Request, next: Next) -> Response {
    let method = req.method().clone();
    let path = req.uri().path().to_owned();
    let start = Instant::now();

    let resp = next.run(req).await;

    info!(
        http.method = %method,
        http.path = %path,
        http.status = resp.status().as_u16(),
        http.duration_ms = start.elapsed().as_millis() as u64,
        "request completed"
    );

    resp
}

/// Shared state the auth middleware needs: just the configured key, if any.
#[derive(Clone)]
pub struct AuthState {
    /// The required bearer/`x-api-key` value. `None` disables auth entirely.
    pub api_key: Option<Arc<str>>,
}

/// Rejects requests lacking a matching `Authorization: Bearer <key>` or
/// `x-api-key: <key>` header, unless `auth.api_key` is `None`.
///
/// `/healthz` and `/v1/metrics` are exempt so orchestrators and scrapers
/// don't need the key.
pub async fn require_api_key(State(auth): State<AuthState>, req: Request, next: Next) -> Response {
    let Some(expected) = &auth.api_key else {
        return next.run(req).await;
    };

    let path = req.uri().path();
    if path == "/healthz" || path == "/v1/metrics" {
        return next.run(req).await;
    }

    let presented = req
        .headers()
        .get("x-api-key")
        .and_then(|v| v.to_str().ok())
        .map(str::to_string)
        .or_else(|| {
            req.headers()
                .get(axum::http::header::AUTHORIZATION)
                .and_then(|v| v.to_str().ok())
                .and_then(|v| v.strip_prefix("Bearer "))
                .map(str::to_string)
        });

    match presented {
        Some(ref key) if key == expected.as_ref() => next.run(req).await,
        _ => (StatusCode::UNAUTHORIZED, "missing or invalid api key").into_response(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;
    use axum::routing::get;
    use axum::Router;
    use tower::ServiceExt;

    fn app(api_key: Option<&str>) -> Router {
        let auth = AuthState {
            api_key: api_key.map(Into::into),
        };
        Router::new()
            .route("/v1/requests", get(|| async { "ok" }))
            .route("/healthz", get(|| async { "ok" }))
            .layer(axum::middleware::from_fn_with_state(auth, require_api_key))
    }

    #[tokio::test]
    async fn no_key_configured_allows_everything() {
        let response = app(None)
            .oneshot(axum::http::Request::builder().uri("/v1/requests").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn missing_header_is_rejected_when_key_configured() {
        let response = app(Some("secret"))
            .oneshot(axum::http::Request::builder().uri("/v1/requests").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn matching_header_is_allowed() {
        let response = app(Some("secret"))
            .oneshot(
                axum::http::Request::builder()
                    .uri("/v1/requests")
                    .header("x-api-key", "secret")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn healthz_is_always_exempt() {
        let response = app(Some("secret"))
            .oneshot(axum::http::Request::builder().uri("/healthz").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }
}
