//! Background cache sweep.

use std::time::Duration;

use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;

use super::requests::RequestCoordinator;

const MIN_SWEEP_INTERVAL: Duration = Duration::from_millis(10);

/// Periodically remove expired cache entries until `shutdown` is cancelled.
///
/// Reads never depend on this task; it only reclaims memory.
pub fn spawn_cache_sweeper(
    coordinator: RequestCoordinator,
    interval: Duration,
    shutdown: CancellationToken,
) -> JoinHandle<()> {
    let interval = interval.max(MIN_SWEEP_INTERVAL);
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        // First tick completes immediately.
        ticker.tick().await;
        loop {
            tokio::select! {
                biased;
                () = shutdown.cancelled() => {
                    tracing::debug!("cache sweeper: shutdown signal received");
                    break;
                }
                _ = ticker.tick() => {
                    let removed = coordinator.sweep_cache();
                    if removed > 0 {
                        tracing::debug!(removed, "expired cache entries swept");
                    }
                }
            }
        }
    })
}
