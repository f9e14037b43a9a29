use axum::{
    Json,
    extract::{State, rejection::JsonRejection},
};
use base64::{Engine as _, engine::general_purpose::STANDARD};
use texpreview_api_types::{CompileRequest, CompileResponse, HEALTH_MESSAGE};
use tracing::error;

use super::{HttpState, error::ApiError};

/// `POST /compile`: run one job and return page 1 as base64 PNG.
///
/// The job runs on its own task so a client that disconnects mid-compile does not cut the
/// pipeline short before its workspace is released.
pub async fn compile(
    State(state): State<HttpState>,
    payload: Result<Json<CompileRequest>, JsonRejection>,
) -> Result<Json<CompileResponse>, ApiError> {
    let Json(request) = payload?;

    let preview = state.preview.clone();
    let outcome = tokio::spawn(async move { preview.render(request.source).await })
        .await
        .map_err(|err| {
            error!(
                target = "infra::http::compile",
                op = "http::compile",
                result = "error",
                error_code = "job_task",
                error = %err,
                "Compile task did not complete"
            );
            ApiError::unexpected(format!("compile task failed: {err}"))
        })?;

    let preview = outcome?;
    Ok(Json(CompileResponse {
        image: STANDARD.encode(&preview.image.png),
    }))
}

/// `GET /health`: static liveness answer, no dependency checks.
pub async fn health() -> &'static str {
    HEALTH_MESSAGE
}
