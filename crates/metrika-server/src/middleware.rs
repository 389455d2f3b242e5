use axum::body::{to_bytes, Body};
use axum::extract::{Request, State};
use axum::http::header::{CONTENT_ENCODING, CONTENT_LENGTH};
use axum::http::{HeaderName, HeaderValue, Method, StatusCode};
use axum::middleware::Next;
use axum::response::Response;
use metrika_common::codec::Compression;
use metrika_common::secure::{SignatureError, Signer};

use crate::api::error_response;
use crate::logging::TraceId;
use crate::state::AppState;

/// Body signature header, `HashSHA256` on the wire.
static SIGNATURE_HEADER: HeaderName = HeaderName::from_static("hashsha256");

/// Upper bound on buffered request bodies.
const MAX_BODY_BYTES: usize = 16 * 1024 * 1024;

fn trace_id(req: &Request) -> String {
    req.extensions()
        .get::<TraceId>()
        .map(|t| t.0.clone())
        .unwrap_or_default()
}

/// Verifies `HashSHA256` on `POST` bodies and signs every response body.
///
/// The signature covers the request body exactly as received, before any
/// decompression. Passes everything through when no key is configured.
pub async fn verify_signature(State(state): State<AppState>, req: Request, next: Next) -> Response {
    let Some(signer) = state.signer.clone() else {
        return next.run(req).await;
    };

    let req = if req.method() == Method::POST {
        let trace_id = trace_id(&req);
        let (parts, body) = req.into_parts();
        let bytes = match to_bytes(body, MAX_BODY_BYTES).await {
            Ok(bytes) => bytes,
            Err(e) => {
                tracing::warn!(trace_id = %trace_id, error = %e, "Failed to read request body");
                return error_response(StatusCode::BAD_REQUEST, "failed to read request body");
            }
        };
        let verified = match parts.headers.get(&SIGNATURE_HEADER) {
            Some(value) => value
                .to_str()
                .map_err(|_| SignatureError::Malformed)
                .and_then(|sig| signer.verify(&bytes, sig)),
            None => Err(SignatureError::Missing),
        };
        if let Err(e) = verified {
            tracing::warn!(trace_id = %trace_id, error = %e, "Request rejected: invalid signature");
            return error_response(StatusCode::BAD_REQUEST, "invalid signature");
        }
        Request::from_parts(parts, Body::from(bytes))
    } else {
        req
    };

    let response = next.run(req).await;
    sign_response(&signer, response).await
}

async fn sign_response(signer: &Signer, response: Response) -> Response {
    let (mut parts, body) = response.into_parts();
    let bytes = match to_bytes(body, usize::MAX).await {
        Ok(bytes) => bytes,
        Err(e) => {
            tracing::error!(error = %e, "Failed to buffer response for signing");
            return error_response(StatusCode::INTERNAL_SERVER_ERROR, "internal error");
        }
    };
    match signer.sign(&bytes) {
        Ok(signature) => {
            if let Ok(value) = HeaderValue::from_str(&signature) {
                parts.headers.insert(SIGNATURE_HEADER.clone(), value);
            }
        }
        Err(e) => tracing::error!(error = %e, "Failed to sign response"),
    }
    Response::from_parts(parts, Body::from(bytes))
}

/// Decodes request bodies sent with `Content-Encoding: gzip`.
pub async fn decompress_request(req: Request, next: Next) -> Response {
    let Some(encoding) = req.headers().get(CONTENT_ENCODING) else {
        return next.run(req).await;
    };
    let trace_id = trace_id(&req);
    let compression = match encoding
        .to_str()
        .map_err(|e| e.to_string())
        .and_then(|header| Compression::from_content_encoding(header).map_err(|e| e.to_string()))
    {
        Ok(compression) => compression,
        Err(e) => {
            tracing::warn!(trace_id = %trace_id, error = %e, "Unsupported request encoding");
            return error_response(StatusCode::BAD_REQUEST, "unsupported content encoding");
        }
    };

    let (mut parts, body) = req.into_parts();
    parts.headers.remove(CONTENT_ENCODING);
    if compression == Compression::None {
        return next.run(Request::from_parts(parts, body)).await;
    }

    let bytes = match to_bytes(body, MAX_BODY_BYTES).await {
        Ok(bytes) => bytes,
        Err(e) => {
            tracing::warn!(trace_id = %trace_id, error = %e, "Failed to read request body");
            return error_response(StatusCode::BAD_REQUEST, "failed to read request body");
        }
    };
    let decoded = match compression.decode(&bytes) {
        Ok(decoded) => decoded,
        Err(e) => {
            tracing::warn!(trace_id = %trace_id, error = %e, "Failed to decompress request body");
            return error_response(StatusCode::BAD_REQUEST, "failed to decompress request body");
        }
    };
    parts.headers.remove(CONTENT_LENGTH);
    next.run(Request::from_parts(parts, Body::from(decoded))).await
}

/// Dumps the in-memory repositories after each successful write when
/// synchronous dumping is configured.
pub async fn sync_dump(State(state): State<AppState>, req: Request, next: Next) -> Response {
    let response = next.run(req).await;
    let Some(sync) = state.sync_dump.clone() else {
        return response;
    };
    if !response.status().is_success() {
        return response;
    }

    let gauges = state.service.gauges();
    let counters = state.service.counters();
    let dumper = sync.dumper;
    let result =
        tokio::task::spawn_blocking(move || dumper.dump(gauges.as_ref(), counters.as_ref())).await;
    let failure = match result {
        Ok(Ok(count)) => {
            tracing::debug!(count, "Synchronous dump done");
            None
        }
        Ok(Err(e)) => Some(e.to_string()),
        Err(e) => Some(e.to_string()),
    };

    match failure {
        None => response,
        Some(e) => {
            tracing::error!(error = %e, "Synchronous dump failed");
            if sync.fail_on_error {
                error_response(StatusCode::INTERNAL_SERVER_ERROR, "failed to persist metrics")
            } else {
                response
            }
        }
    }
}
