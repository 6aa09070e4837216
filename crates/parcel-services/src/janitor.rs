//! Background sweep of idle upload sessions.

use std::time::Duration;

use tokio::sync::broadcast;

use crate::ChunkStore;

/// Run [`ChunkStore::expire_idle`] every `interval` until shutdown.
///
/// A zero `ttl` keeps open sessions forever; completed-session tombstones
/// are still dropped.
pub async fn run(
    store: ChunkStore,
    interval: Duration,
    ttl: Duration,
    mut shutdown: broadcast::Receiver<()>,
) {
    if ttl.is_zero() {
        tracing::info!("session expiry disabled, sweeping tombstones only");
    }

    let mut ticker = tokio::time::interval(interval.max(Duration::from_millis(10)));
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
    tracing::info!(
        interval_secs = interval.as_secs(),
        ttl_secs = ttl.as_secs(),
        "session janitor started"
    );

    loop {
        tokio::select! {
            _ = shutdown.recv() => {
                tracing::info!("session janitor shutting down");
                return;
            }

            _ = ticker.tick() => {
                match store.expire_idle(ttl).await {
                    Ok(report) if !report.is_empty() => tracing::info!(
                        discarded = report.discarded.len(),
                        tombstones = report.tombstones,
                        "expired idle sessions"
                    ),
                    Ok(_) => {}
                    Err(e) => tracing::warn!(error = %e, "session sweep failed"),
                }
            }
        }
    }
}
