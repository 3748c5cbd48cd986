//! Periodic eviction of idle sessions.

use parley_dialog::SessionStore;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;

/// Spawns a task that evicts sessions idle for longer than `idle_for`
/// every `every`.
pub fn spawn_session_sweep(
    sessions: Arc<dyn SessionStore>,
    idle_for: Duration,
    every: Duration,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(every);
        loop {
            interval.tick().await;
            match sessions.evict_idle(idle_for).await {
                Ok(evicted) if !evicted.is_empty() => {
                    tracing::debug!(evicted_sessions = evicted.len(), "Periodic session sweep");
                }
                Ok(_) => {}
                Err(e) => {
                    tracing::warn!(error = %e, "Failed to evict idle sessions");
                }
            }
        }
    })
}
