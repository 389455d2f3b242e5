use crate::audit::{spawn_audit, SourceAddr};
use crate::middleware;
use crate::service::{MetricService, ServiceError};
use crate::state::AppState;
use axum::body::Bytes;
use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::{Html, IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use metrika_common::{MetricError, MetricsDto, WireMetric};
use serde::de::DeserializeOwned;
use std::fmt::Write;
use std::sync::Arc;

/// Plain-text error reply.
#[derive(Debug)]
pub struct ApiError {
    pub status: StatusCode,
    pub message: String,
}

impl ApiError {
    pub fn new(status: StatusCode, message: impl Into<String>) -> Self {
        Self {
            status,
            message: message.into(),
        }
    }

    fn internal(message: impl Into<String>) -> Self {
        Self::new(StatusCode::INTERNAL_SERVER_ERROR, message)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        error_response(self.status, &self.message)
    }
}

pub fn error_response(status: StatusCode, msg: &str) -> Response {
    (status, format!("{msg}\n")).into_response()
}

impl From<MetricError> for ApiError {
    fn from(err: MetricError) -> Self {
        let status = match err {
            MetricError::MissingId => StatusCode::NOT_FOUND,
            MetricError::InvalidKind(_)
            | MetricError::InvalidValue(_)
            | MetricError::CounterOverflow { .. } => StatusCode::BAD_REQUEST,
        };
        ApiError::new(status, err.to_string())
    }
}

impl From<ServiceError> for ApiError {
    fn from(err: ServiceError) -> Self {
        match err {
            ServiceError::Validation(e) => e.into(),
            ServiceError::NotFound { .. } => ApiError::new(StatusCode::NOT_FOUND, err.to_string()),
            ServiceError::Storage(e) => {
                tracing::error!(error = %e, "Storage failure");
                ApiError::internal("internal storage error")
            }
        }
    }
}

/// Parses a JSON body; any decoding failure is a `422`.
fn parse_json<T: DeserializeOwned>(body: &[u8]) -> Result<T, ApiError> {
    serde_json::from_slice(body)
        .map_err(|e| ApiError::new(StatusCode::UNPROCESSABLE_ENTITY, format!("invalid JSON: {e}")))
}

/// Runs a service call on the blocking pool.
async fn run_service<T, F>(state: &AppState, f: F) -> Result<T, ApiError>
where
    T: Send + 'static,
    F: FnOnce(&MetricService) -> Result<T, ServiceError> + Send + 'static,
{
    let service = Arc::clone(&state.service);
    tokio::task::spawn_blocking(move || f(&service))
        .await
        .map_err(|e| {
            tracing::error!(error = %e, "Service task failed");
            ApiError::internal("internal error")
        })?
        .map_err(ApiError::from)
}

fn audit(state: &AppState, ids: Vec<String>, source: SourceAddr) {
    if let Some(sink) = &state.audit {
        spawn_audit(Arc::clone(sink), ids, source.0);
    }
}

async fn update_raw(
    State(state): State<AppState>,
    Path((kind, id, value)): Path<(String, String, String)>,
    source: SourceAddr,
) -> Result<impl IntoResponse, ApiError> {
    let stored =
        run_service(&state, move |svc| svc.update_metric_raw(&kind, &id, &value)).await?;
    audit(&state, vec![stored.id], source);
    Ok("OK")
}

async fn update_json(
    State(state): State<AppState>,
    source: SourceAddr,
    body: Bytes,
) -> Result<Json<MetricsDto>, ApiError> {
    let wire: WireMetric = parse_json(&body)?;
    let dto = MetricsDto::try_from(wire)?;
    let stored = run_service(&state, move |svc| svc.update_metric(&dto)).await?;
    audit(&state, vec![stored.id.clone()], source);
    Ok(Json(stored))
}

async fn update_batch(
    State(state): State<AppState>,
    source: SourceAddr,
    body: Bytes,
) -> Result<impl IntoResponse, ApiError> {
    let batch: Vec<WireMetric> = parse_json(&body)?;
    let ids: Vec<String> = batch.iter().map(|m| m.id.clone()).collect();
    let written = run_service(&state, move |svc| svc.update_metrics_batch(batch)).await?;
    tracing::debug!(count = written, "Batch stored");
    if written > 0 {
        audit(&state, ids, source);
    }
    Ok("OK")
}

async fn value_raw(
    State(state): State<AppState>,
    Path((kind, id)): Path<(String, String)>,
) -> Result<String, ApiError> {
    let dto = run_service(&state, move |svc| svc.get_metric(&kind, &id)).await?;
    Ok(dto.payload.format_raw())
}

async fn value_json(
    State(state): State<AppState>,
    body: Bytes,
) -> Result<Json<MetricsDto>, ApiError> {
    let wire: WireMetric = parse_json(&body)?;
    let dto = run_service(&state, move |svc| svc.get_metric(&wire.kind, &wire.id)).await?;
    Ok(Json(dto))
}

fn escape_html(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len());
    for c in raw.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#39;"),
            c => out.push(c),
        }
    }
    out
}

async fn index(State(state): State<AppState>) -> Result<Html<String>, ApiError> {
    let metrics = run_service(&state, |svc| svc.list_metrics()).await?;
    let mut page = String::from("<html><body><ul>\n");
    for dto in &metrics {
        let _ = writeln!(
            page,
            "<li>{}={}</li>",
            escape_html(&dto.id),
            dto.payload.format_raw()
        );
    }
    page.push_str("</ul></body></html>\n");
    Ok(Html(page))
}

async fn ping(State(state): State<AppState>) -> Result<&'static str, ApiError> {
    let health = Arc::clone(&state.health);
    let result = tokio::task::spawn_blocking(move || health.ping())
        .await
        .map_err(|e| ApiError::internal(format!("health check aborted: {e}")))?;
    match result {
        Ok(()) => Ok("OK"),
        Err(e) => {
            tracing::error!(error = %e, "Storage backend unreachable");
            Err(ApiError::internal("storage backend unavailable"))
        }
    }
}

/// Routes that change stored metrics; they trigger synchronous dumps.
pub fn write_routes(state: &AppState) -> Router<AppState> {
    Router::new()
        .route("/update/{kind}/{id}/{value}", post(update_raw))
        .route("/update/", post(update_json))
        .route("/updates/", post(update_batch))
        .route_layer(axum::middleware::from_fn_with_state(
            state.clone(),
            middleware::sync_dump,
        ))
}

pub fn read_routes() -> Router<AppState> {
    Router::new()
        .route("/", get(index))
        .route("/ping", get(ping))
        .route("/value/", post(value_json))
        .route("/value/{kind}/{id}", get(value_raw))
}
