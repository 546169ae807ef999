//! Single-file deletion endpoint.

use super::blocking;
use crate::context::RequestContext;
use crate::error::{ApiError, ApiResult};
use crate::state::AppState;
use axum::Json;
use axum::extract::{Query, State};
use serde::Deserialize;
use sitesync_core::DeleteResponse;
use sitesync_storage::{SafeRoot, StorageError};

/// Query parameters for DELETE /.
#[derive(Debug, Deserialize)]
pub struct DeleteParams {
    pub file: Option<String>,
}

fn refused() -> Json<DeleteResponse> {
    Json(DeleteResponse {
        file_removed: None,
        removed: false,
    })
}

/// DELETE /?file=
///
/// Ignored and unsafe paths are never touched and report `removed: false`.
/// Otherwise `removed` reflects whether the path is gone afterwards.
#[tracing::instrument(skip_all, fields(trace_id = %ctx.trace_id, file = ?params.file))]
pub async fn delete_file(
    State(state): State<AppState>,
    ctx: RequestContext,
    Query(params): Query<DeleteParams>,
) -> ApiResult<Json<DeleteResponse>> {
    let file = params
        .file
        .filter(|f| !f.is_empty())
        .ok_or_else(|| ApiError::BadRequest("missing 'file' parameter".to_string()))?;
    let key = SafeRoot::normalize_key(&file).to_string();

    if state.filter.is_ignored_path(&key) {
        tracing::info!("refusing to delete ignored path");
        return Ok(refused());
    }

    let site = state.site.clone();
    let outcome = blocking(move || match site.remove_file(&key) {
        Ok(removed) => Ok(Some((key, removed))),
        Err(StorageError::InvalidKey(reason)) => {
            tracing::warn!(%reason, "refusing to delete unsafe path");
            Ok(None)
        }
        Err(e) => Err(e.into()),
    })
    .await?;

    match outcome {
        Some((key, removed)) => {
            tracing::info!(removed, "delete processed");
            Ok(Json(DeleteResponse {
                file_removed: Some(key),
                removed,
            }))
        }
        None => Ok(refused()),
    }
}
