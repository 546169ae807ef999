//! Session status endpoint.

use super::blocking;
use crate::context::RequestContext;
use crate::error::{ApiError, ApiResult};
use crate::state::AppState;
use axum::Json;
use axum::extract::{Path, State};
use sitesync_core::{Session, SessionId};

/// GET /sessions/{session_id}
///
/// The in-progress record if there is one, else the completed record.
#[tracing::instrument(skip_all, fields(trace_id = %ctx.trace_id, session_id = %session_id))]
pub async fn get_session(
    State(state): State<AppState>,
    ctx: RequestContext,
    Path(session_id): Path<String>,
) -> ApiResult<Json<Session>> {
    let id = SessionId::parse(&session_id)?;
    let session = blocking(move || {
        if let Some(session) = state.sessions.load(&id)? {
            return Ok(Some(session));
        }
        Ok(state.sessions.load_completed(&id)?)
    })
    .await?;

    session
        .map(Json)
        .ok_or_else(|| ApiError::NotFound(format!("session {session_id} not found")))
}
