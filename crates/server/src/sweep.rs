//! Background sweep of abandoned sessions.

use crate::state::AppState;
use time::OffsetDateTime;
use tokio::task::JoinHandle;

/// Spawn the periodic stale-session sweep. Returns `None` when the TTL is disabled.
pub fn spawn_sweep_task(state: AppState) -> Option<JoinHandle<()>> {
    let ttl = state.config.server.session_ttl()?;
    let interval = state.config.server.sweep_interval();

    Some(tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

        loop {
            ticker.tick().await;
            let sessions = state.sessions.clone();
            let result = tokio::task::spawn_blocking(move || {
                sessions.sweep_expired(OffsetDateTime::now_utc(), ttl)
            })
            .await;

            match result {
                Ok(Ok(0)) => {}
                Ok(Ok(swept)) => {
                    tracing::info!(swept, "Session sweep removed stale sessions");
                }
                Ok(Err(e)) => tracing::error!(error = %e, "Session sweep failed"),
                Err(e) => tracing::error!(error = %e, "Session sweep task panicked"),
            }
        }
    }))
}
