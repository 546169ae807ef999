//! Version descriptor endpoint.

use crate::context::RequestContext;
use crate::error::{ApiError, ApiResult};
use crate::state::AppState;
use axum::Json;
use axum::extract::State;
use serde_json::{Value, json};

/// GET /
///
/// Returns the published version file verbatim, or `{"version": null}` when
/// nothing has been published yet.
#[tracing::instrument(skip_all, fields(trace_id = %ctx.trace_id))]
pub async fn get_version(
    State(state): State<AppState>,
    ctx: RequestContext,
) -> ApiResult<Json<Value>> {
    let path = state.config.site.version_path();
    match tokio::fs::read(&path).await {
        Ok(bytes) => serde_json::from_slice(&bytes)
            .map(Json)
            .map_err(|e| ApiError::Internal(format!("invalid version file: {e}"))),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(Json(json!({ "version": null }))),
        Err(e) => Err(e.into()),
    }
}
