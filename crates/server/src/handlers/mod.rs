//! HTTP request handlers.

pub mod chunks;
pub mod delete;
pub mod diff;
pub mod sessions;
pub mod version;

pub use chunks::*;
pub use delete::*;
pub use diff::*;
pub use sessions::*;
pub use version::*;

use crate::error::{ApiError, ApiResult};

/// Run blocking filesystem work off the async runtime.
pub(crate) async fn blocking<T, F>(f: F) -> ApiResult<T>
where
    F: FnOnce() -> ApiResult<T> + Send + 'static,
    T: Send + 'static,
{
    tokio::task::spawn_blocking(f)
        .await
        .map_err(|e| ApiError::Internal(format!("spawn_blocking failed: {e}")))?
}
