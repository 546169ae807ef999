//! Manifest diff endpoint.

use super::blocking;
use crate::context::RequestContext;
use crate::error::{ApiError, ApiResult};
use crate::receiver::register_removals;
use crate::state::AppState;
use axum::Json;
use axum::extract::rejection::JsonRejection;
use axum::extract::{Query, State};
use axum::http::StatusCode;
use serde::Deserialize;
use sitesync_core::{DiffRequest, DiffResponse, SessionId};

/// Query parameters for POST /.
#[derive(Debug, Deserialize)]
pub struct DiffParams {
    /// Session the computed removals are registered on.
    pub id: Option<String>,
}

/// POST /
///
/// Reports the receiver's stat for every manifest path and the live files the
/// manifest does not mention.
#[tracing::instrument(skip_all, fields(trace_id = %ctx.trace_id, session_id = ?params.id))]
pub async fn resolve_diff(
    State(state): State<AppState>,
    ctx: RequestContext,
    Query(params): Query<DiffParams>,
    body: Result<Json<DiffRequest>, JsonRejection>,
) -> ApiResult<Json<DiffResponse>> {
    let Json(request) = body.map_err(|e| {
        if e.status() == StatusCode::PAYLOAD_TOO_LARGE {
            ApiError::PayloadTooLarge {
                limit: state.config.server.max_manifest_bytes as u64,
            }
        } else {
            ApiError::BadRequest(e.body_text())
        }
    })?;
    let files = request
        .files
        .ok_or_else(|| ApiError::BadRequest("missing 'files' in request body".to_string()))?;
    let id = params.id.as_deref().map(SessionId::parse).transpose()?;

    let client_address = ctx.client_address;
    let response = blocking(move || {
        let diff = crate::diff::resolve(&state.site, &state.filter, &files)?;
        if let Some(id) = id {
            register_removals(&state, &id, &client_address, diff.removal_paths())?;
        }
        Ok(diff)
    })
    .await?;

    tracing::info!(
        manifest = response.files_to_update.len(),
        to_remove = response.files_to_remove.len(),
        "manifest resolved"
    );
    Ok(Json(response))
}
