use axum::{
    body::{to_bytes, Body, Bytes},
    extract::Request,
    http::{header, HeaderMap, HeaderValue, Method, StatusCode},
    middleware::Next,
    response::Response,
};
use std::fmt;
use std::time::Instant;

/// Per-request trace id, stored in request extensions.
#[derive(Clone)]
pub struct TraceId(pub String);

static TRACE_ID_HEADER: header::HeaderName = header::HeaderName::from_static("x-trace-id");

/// Characters of a text body kept in the log line.
const MAX_LOGGED_CHARS: usize = 200;

/// Upper bound on request bodies buffered for logging.
const MAX_LOGGED_REQUEST_BYTES: usize = 16 * 1024 * 1024;

fn new_trace_id() -> String {
    hex::encode(rand::random::<[u8; 8]>())
}

/// What a body looks like in the log.
///
/// Metric batches usually arrive gzip-compressed, so encoded bodies are
/// only reported by size.
#[derive(Debug, PartialEq)]
enum BodySummary {
    Empty,
    Text(String),
    Encoded(usize),
    Binary(usize),
}

impl BodySummary {
    fn of(headers: &HeaderMap, bytes: &[u8]) -> Self {
        if bytes.is_empty() {
            return BodySummary::Empty;
        }
        let encoded = headers
            .get(header::CONTENT_ENCODING)
            .and_then(|v| v.to_str().ok())
            .is_some_and(|v| !v.eq_ignore_ascii_case("identity"));
        if encoded {
            return BodySummary::Encoded(bytes.len());
        }
        match std::str::from_utf8(bytes) {
            Ok(text) if text.len() > MAX_LOGGED_CHARS => {
                let mut end = MAX_LOGGED_CHARS;
                while !text.is_char_boundary(end) {
                    end -= 1;
                }
                BodySummary::Text(format!("{}...", &text[..end]))
            }
            Ok(text) => BodySummary::Text(text.trim_end().to_string()),
            Err(_) => BodySummary::Binary(bytes.len()),
        }
    }
}

impl fmt::Display for BodySummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BodySummary::Empty => Ok(()),
            BodySummary::Text(text) => f.write_str(text),
            BodySummary::Encoded(len) => write!(f, "<{len} encoded bytes>"),
            BodySummary::Binary(len) => write!(f, "<{len} binary bytes>"),
        }
    }
}

async fn buffer(headers: &HeaderMap, body: Body, limit: usize) -> (Bytes, BodySummary) {
    let bytes = to_bytes(body, limit).await.unwrap_or_default();
    let summary = BodySummary::of(headers, &bytes);
    (bytes, summary)
}

fn log_response(trace_id: &str, status: StatusCode, elapsed_ms: u64, body: &BodySummary) {
    let status = status.as_u16();
    match status {
        500..=u16::MAX => tracing::error!(trace_id, status, elapsed_ms, body = %body, "<-- response"),
        400..=499 => tracing::warn!(trace_id, status, elapsed_ms, body = %body, "<-- response"),
        _ => tracing::info!(trace_id, status, elapsed_ms, "<-- response"),
    }
}

/// Logs each request and its response under one trace id, and returns the
/// id in `X-Trace-Id`.
///
/// `POST` bodies are buffered so the metric payload can be logged; response
/// bodies are only read back for error statuses.
pub async fn request_logging(req: Request, next: Next) -> Response {
    let trace_id = new_trace_id();
    let (mut parts, body) = req.into_parts();
    parts.extensions.insert(TraceId(trace_id.clone()));

    let req = if parts.method == Method::POST {
        let (bytes, summary) = buffer(&parts.headers, body, MAX_LOGGED_REQUEST_BYTES).await;
        tracing::info!(
            trace_id = %trace_id,
            method = %parts.method,
            path = %parts.uri.path(),
            body = %summary,
            "--> request"
        );
        Request::from_parts(parts, Body::from(bytes))
    } else {
        tracing::info!(
            trace_id = %trace_id,
            method = %parts.method,
            path = %parts.uri.path(),
            "--> request"
        );
        Request::from_parts(parts, body)
    };

    let start = Instant::now();
    let response = next.run(req).await;
    let elapsed_ms = start.elapsed().as_millis() as u64;

    let status = response.status();
    let mut response = if status.is_client_error() || status.is_server_error() {
        let (parts, body) = response.into_parts();
        let (bytes, summary) = buffer(&parts.headers, body, usize::MAX).await;
        log_response(&trace_id, status, elapsed_ms, &summary);
        Response::from_parts(parts, Body::from(bytes))
    } else {
        log_response(&trace_id, status, elapsed_ms, &BodySummary::Empty);
        response
    };

    if let Ok(value) = HeaderValue::from_str(&trace_id) {
        response.headers_mut().insert(TRACE_ID_HEADER.clone(), value);
    }
    response
}
