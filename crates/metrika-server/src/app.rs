use crate::state::AppState;
use crate::{api, logging, middleware};
use axum::Router;
use tower_http::compression::CompressionLayer;

/// Builds the HTTP application.
///
/// Layers, outermost first: request logging, response compression,
/// signature check, request decompression. Write routes additionally run
/// the synchronous dump after the handler.
pub fn build_http_app(state: AppState) -> Router {
    api::write_routes(&state)
        .merge(api::read_routes())
        .layer(axum::middleware::from_fn(middleware::decompress_request))
        .layer(axum::middleware::from_fn_with_state(
            state.clone(),
            middleware::verify_signature,
        ))
        .layer(CompressionLayer::new())
        .layer(axum::middleware::from_fn(logging::request_logging))
        .with_state(state)
}
