// SPDX-License-Identifier: MIT OR Apache-2.0
#![deny(unsafe_code)]

//! HTTP control-plane: wires the engine, runner, and callback ingester
//! behind an Axum router.

pub mod middleware;

use axum::{
    Json, Router,
    extract::{Path as AxPath, Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
};
use reqlife_audit::AuditSink;
use reqlife_callback::{CallbackBody, CallbackIngester};
use reqlife_core::{AuditEvent, ReqlifeError};
use reqlife_engine::Engine;
use reqlife_telemetry::{Metrics, MetricsSnapshot};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::info;

/// Shared state handed to every Axum handler.
#[derive(Clone)]
pub struct AppState {
    /// The orchestrator: admission, translation, policy, execution.
    pub engine: Arc<Engine>,
    /// Folds inbound backend callbacks into request records.
    pub callbacks: Arc<CallbackIngester>,
    /// Metrics snapshot source for `GET /v1/metrics`.
    pub metrics: Arc<Metrics>,
}

/// Uniform error response shape: `{error: {code, message, context}}`.
pub struct ApiError(ReqlifeError);

impl From<ReqlifeError> for ApiError {
    fn from(e: ReqlifeError) -> Self {
        Self(e)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = StatusCode::from_u16(self.0.kind().http_status()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
        (status, Json(serde_json::json!({ "error": self.0.to_dto() }))).into_response()
    }
}

/// Build the Axum router with every documented route, plus the standard
/// request-id/logging/auth middleware stack.
#[must_use]
pub fn build_app(state: Arc<AppState>, api_key: Option<Arc<str>>) -> Router {
    let auth = middleware::AuthState { api_key };
    Router::new()
        .route("/healthz", get(cmd_health))
        .route("/v1/metrics", get(cmd_metrics))
        .route("/v1/requests", post(cmd_submit).get(cmd_lookup_by_key))
        .route("/v1/requests/{id}", get(cmd_get_request))
        .route("/v1/requests/{id}/audit", get(cmd_get_audit))
        .route("/v1/callbacks/{backend}", post(cmd_callback))
        .with_state(state)
        .layer(axum::middleware::from_fn_with_state(auth, middleware::require_api_key))
        .layer(axum::middleware::from_fn(middleware::request_logger_middleware))
        .layer(axum::middleware::from_fn(middleware::request_id_middleware))
}

async fn cmd_health() -> impl IntoResponse {
    Json(serde_json::json!({ "ok": true }))
}

async fn cmd_metrics(State(state): State<Arc<AppState>>) -> Json<MetricsSnapshot> {
    Json(state.metrics.snapshot())
}

#[derive(Debug, Serialize)]
struct SubmitLinks {
    #[serde(rename = "self")]
    self_: String,
}

#[derive(Debug, Serialize)]
struct SubmitResponse {
    request_id: String,
    status: reqlife_core::RequestStatus,
    links: SubmitLinks,
}

async fn cmd_submit(
    State(state): State<Arc<AppState>>,
    Json(body): Json<serde_json::Value>,
) -> Result<(StatusCode, Json<serde_json::Value>), ApiError> {
    let outcome = state.engine.admit(body, false).await?;

    if outcome.status == reqlife_core::RequestStatus::Denied {
        return Ok((
            StatusCode::FORBIDDEN,
            Json(serde_json::json!({
                "request_id": outcome.request_id,
                "status": outcome.status,
                "violations": outcome.violations,
            })),
        ));
    }

    let response = SubmitResponse {
        request_id: outcome.request_id.clone(),
        status: outcome.status,
        links: SubmitLinks {
            self_: format!("/v1/requests/{}", outcome.request_id),
        },
    };
    info!(request_id = %outcome.request_id, status = ?outcome.status, "request admitted");
    Ok((
        StatusCode::ACCEPTED,
        Json(serde_json::to_value(response).expect("response is always serializable")),
    ))
}

#[derive(Debug, Deserialize)]
struct LookupQuery {
    idempotency_key: Option<String>,
}

async fn cmd_lookup_by_key(
    State(state): State<Arc<AppState>>,
    Query(q): Query<LookupQuery>,
) -> Result<Json<reqlife_core::RequestRecord>, ApiError> {
    let key = q.idempotency_key.ok_or_else(|| {
        ReqlifeError::new(reqlife_core::ErrorKind::InvalidEnvelope, "missing idempotency_key query parameter")
    })?;
    let record = state
        .engine
        .store()
        .find_by_idempotency_key(&key)
        .await?
        .ok_or_else(|| ReqlifeError::new(reqlife_core::ErrorKind::NotFound, format!("no request for key {key}")))?;
    Ok(Json(record))
}

async fn cmd_get_request(
    State(state): State<Arc<AppState>>,
    AxPath(id): AxPath<String>,
) -> Result<Json<reqlife_core::RequestRecord>, ApiError> {
    let record = state
        .engine
        .store()
        .get(&id)
        .await?
        .ok_or_else(|| ReqlifeError::new(reqlife_core::ErrorKind::NotFound, format!("no request {id}")))?;
    Ok(Json(record))
}

#[derive(Debug, Deserialize)]
struct AuditQuery {
    limit: Option<usize>,
}

async fn cmd_get_audit(
    State(state): State<Arc<AppState>>,
    AxPath(id): AxPath<String>,
    Query(q): Query<AuditQuery>,
) -> Result<Response, ApiError> {
    if state.engine.store().get(&id).await?.is_none() {
        return Err(ReqlifeError::new(reqlife_core::ErrorKind::NotFound, format!("no request {id}")).into());
    }

    let limit = q.limit.unwrap_or(1000);
    let events: Option<Vec<AuditEvent>> = state.engine.audit().query(&id, limit).await?;
    match events {
        Some(events) => Ok(Json(serde_json::json!({ "request_id": id, "events": events })).into_response()),
        None => Ok((
            StatusCode::NOT_IMPLEMENTED,
            Json(serde_json::json!({
                "error": { "message": "this audit sink does not support querying" },
            })),
        )
            .into_response()),
    }
}

#[derive(Debug, Serialize)]
struct CallbackResponse {
    request_id: String,
    task_id: String,
    status: reqlife_core::TaskStatus,
}

async fn cmd_callback(
    State(state): State<Arc<AppState>>,
    AxPath(backend): AxPath<String>,
    Json(body): Json<CallbackBody>,
) -> Result<(StatusCode, Json<CallbackResponse>), ApiError> {
    let outcome = state.callbacks.ingest(&backend, body).await?;
    Ok((
        StatusCode::ACCEPTED,
        Json(CallbackResponse {
            request_id: outcome.request_id,
            task_id: outcome.task_id,
            status: outcome.status,
        }),
    ))
}
