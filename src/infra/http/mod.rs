mod compile;
mod error;
mod middleware;

use std::sync::Arc;

use axum::{
    Router,
    extract::DefaultBodyLimit,
    middleware as axum_middleware,
    routing::{get, post},
};

pub use error::ApiError;
pub use middleware::{REQUEST_ID_HEADER, RequestContext};

use crate::application::preview::PreviewService;

use self::middleware::{log_responses, set_request_context};

/// Room for the JSON envelope and string escaping on top of the raw source limit.
const BODY_HEADROOM_BYTES: usize = 64 * 1024;

#[derive(Clone)]
pub struct HttpState {
    pub preview: Arc<PreviewService>,
}

impl HttpState {
    pub fn new(preview: Arc<PreviewService>) -> Self {
        Self { preview }
    }
}

pub fn build_router(state: HttpState) -> Router {
    // Escaped backslashes can double the encoded size of a source that is within limits.
    let body_limit = state
        .preview
        .limits()
        .max_source_bytes
        .saturating_mul(2)
        .saturating_add(BODY_HEADROOM_BYTES);

    Router::new()
        .route("/compile", post(compile::compile))
        .route("/compile-latex", post(compile::compile))
        .route("/health", get(compile::health))
        .route("/", get(compile::health))
        .with_state(state)
        .layer(DefaultBodyLimit::max(body_limit))
        .layer(axum_middleware::from_fn(log_responses))
        .layer(axum_middleware::from_fn(set_request_context))
}
