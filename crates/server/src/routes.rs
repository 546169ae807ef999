//! Route configuration.

use crate::auth::auth_middleware;
use crate::handlers;
use crate::state::AppState;
use axum::Router;
use axum::extract::DefaultBodyLimit;
use axum::middleware;
use axum::routing::get;
use tower_http::trace::TraceLayer;

/// Create the application router.
///
/// Everything hangs off the root path; the method selects the operation.
/// Chunk bodies are streamed and checked against `max_chunk_bytes` by their
/// handler, so the default body limit only bounds manifests.
pub fn create_router(state: AppState) -> Router {
    let manifest_limit = state.config.server.max_manifest_bytes;

    Router::new()
        .route(
            "/",
            get(handlers::get_version)
                .post(handlers::resolve_diff)
                .put(handlers::upload_chunk)
                .delete(handlers::delete_file),
        )
        .route("/sessions/{session_id}", get(handlers::get_session))
        .layer(DefaultBodyLimit::max(manifest_limit))
        // Auth middleware (validates the bearer token and sets the Authenticated extension)
        .layer(middleware::from_fn_with_state(
            state.clone(),
            auth_middleware,
        ))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
