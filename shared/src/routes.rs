// ============================================================================
// HTTP Ingress Routes
// ============================================================================
//
// The Axum surface of the service:
//
//   POST /send          - enqueue an email job        (auth required)
//   GET  /stats         - queue depths and counters   (auth required)
//   GET  /audit/{job_id}- audit record for one job    (auth required)
//   GET  /health        - store + worker health       (open)
//   GET  /live          - shallow liveness            (open)
//   GET  /metrics       - Prometheus text exposition  (open)
//
// ============================================================================

use crate::auth::{ServiceAuthenticator, ServiceIdentity};
use crate::service::{EmailService, EnqueueRequest};
use crate::stats::Healthiness;
use axum::extract::{Path, Request, State};
use axum::middleware::{self, Next};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Extension, Json, Router};
use courier_error::{AppError, AppResult};
use courier_metrics::HTTP_REQUESTS_TOTAL;
use serde_json::json;
use std::sync::Arc;
use tower_http::trace::TraceLayer;

#[derive(Clone)]
pub struct AppState {
    pub service: Arc<EmailService>,
    pub auth: Arc<ServiceAuthenticator>,
}

pub fn build_router(state: AppState) -> Router {
    let protected = Router::new()
        .route("/send", post(send_email))
        .route("/stats", get(get_stats))
        .route("/audit/:job_id", get(get_audit))
        .route_layer(middleware::from_fn_with_state(
            state.clone(),
            require_service_token,
        ));

    Router::new()
        .merge(protected)
        .route("/health", get(health))
        .route("/live", get(live))
        .route("/metrics", get(metrics))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Resolve the caller before any protected handler runs.
async fn require_service_token(
    State(state): State<AppState>,
    mut request: Request,
    next: Next,
) -> Result<Response, AppError> {
    let identity = state.auth.authenticate(&request)?;
    request.extensions_mut().insert(identity);
    Ok(next.run(request).await)
}

async fn send_email(
    State(state): State<AppState>,
    Extension(identity): Extension<ServiceIdentity>,
    Json(request): Json<EnqueueRequest>,
) -> AppResult<impl IntoResponse> {
    let result = state.service.enqueue(request, &identity, "/send").await;
    count_request("/send", result.is_ok());

    let receipt = result?;
    Ok(Json(json!({
        "job_id": receipt.job_id,
        "status": receipt.status,
        "queue_position": receipt.queue_position,
    })))
}

async fn get_stats(State(state): State<AppState>) -> AppResult<impl IntoResponse> {
    let result = state.service.stats().await;
    count_request("/stats", result.is_ok());
    Ok(Json(result?))
}

async fn get_audit(
    State(state): State<AppState>,
    Path(job_id): Path<String>,
) -> AppResult<impl IntoResponse> {
    let record = state.service.job_audit(&job_id).await?;
    count_request("/audit", true);
    match record {
        Some(record) => Ok(Json(record)),
        None => Err(AppError::NotFound(format!("no audit record for {job_id}"))),
    }
}

async fn health(State(state): State<AppState>) -> impl IntoResponse {
    let health = state.service.health().await;
    let status_code = match health.status {
        Healthiness::Healthy => axum::http::StatusCode::OK,
        Healthiness::Degraded => axum::http::StatusCode::SERVICE_UNAVAILABLE,
    };
    (status_code, Json(health))
}

/// Shallow liveness: the process is up and serving.
async fn live() -> impl IntoResponse {
    Json(json!({ "status": "alive" }))
}

async fn metrics() -> Response {
    match courier_metrics::gather_metrics() {
        Ok(text) => (
            [(axum::http::header::CONTENT_TYPE, "text/plain; version=0.0.4")],
            text,
        )
            .into_response(),
        Err(e) => AppError::internal(format!("metrics encoding failed: {e}")).into_response(),
    }
}

fn count_request(path: &str, ok: bool) {
    HTTP_REQUESTS_TOTAL
        .with_label_values(&[path, if ok { "ok" } else { "error" }])
        .inc();
}
