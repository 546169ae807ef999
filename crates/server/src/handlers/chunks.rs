//! Chunk upload endpoint.

use super::blocking;
use crate::context::RequestContext;
use crate::error::{ApiError, ApiResult};
use crate::receiver::{ChunkUpload, IncomingFile, receive_chunk};
use crate::state::AppState;
use axum::Json;
use axum::body::Body;
use axum::extract::{Query, State};
use axum::http::{HeaderMap, StatusCode, header};
use futures::StreamExt;
use serde::Deserialize;
use sitesync_core::{Session, SessionId};
use tokio::io::AsyncWriteExt;

/// Query parameters for PUT /.
#[derive(Debug, Deserialize)]
pub struct ChunkParams {
    pub id: Option<String>,
    /// Total number of chunks in the session.
    pub chunks: Option<u32>,
    /// 1-based position of this chunk, used to de-duplicate retries.
    pub index: Option<u32>,
}

/// PUT /?id=&chunks=&index=
///
/// The body is one compressed archive. It is streamed to disk first, then
/// recorded and unpacked under the session lock. Returns 201 with the final
/// record once the session completes, otherwise 200.
#[tracing::instrument(
    skip_all,
    fields(trace_id = %ctx.trace_id, session_id = ?params.id, chunks = ?params.chunks, index = ?params.index)
)]
pub async fn upload_chunk(
    State(state): State<AppState>,
    ctx: RequestContext,
    Query(params): Query<ChunkParams>,
    headers: HeaderMap,
    body: Body,
) -> ApiResult<(StatusCode, Json<Session>)> {
    let raw_id = params
        .id
        .ok_or_else(|| ApiError::BadRequest("missing 'id' parameter".to_string()))?;
    let id = SessionId::parse(&raw_id)?;

    let limit = state.config.server.max_chunk_bytes;
    if let Some(declared) = headers
        .get(header::CONTENT_LENGTH)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.parse::<u64>().ok())
        && declared > limit
    {
        return Err(ApiError::PayloadTooLarge { limit });
    }

    let incoming = IncomingFile::new(state.sessions.incoming_path());
    let mut file = tokio::fs::File::create(incoming.path()).await?;
    let mut size: u64 = 0;
    let mut stream = body.into_data_stream();
    while let Some(chunk) = stream.next().await {
        let chunk = chunk.map_err(|e| ApiError::BadRequest(format!("failed to read body: {e}")))?;
        size += chunk.len() as u64;
        if size > limit {
            return Err(ApiError::PayloadTooLarge { limit });
        }
        file.write_all(&chunk).await?;
    }
    file.sync_all().await?;
    drop(file);

    if size == 0 {
        return Err(ApiError::BadRequest("empty archive body".to_string()));
    }
    tracing::debug!(size, "chunk body received");

    let upload = ChunkUpload {
        id,
        chunks: params.chunks,
        index: params.index,
        client_address: ctx.client_address,
        body: incoming.path().to_path_buf(),
        size,
    };
    // The guard stays alive until the receiver has moved the body into place.
    let outcome = blocking(move || {
        let result = receive_chunk(&state, upload);
        drop(incoming);
        result
    })
    .await?;

    Ok((outcome.status(), Json(outcome.into_session())))
}
