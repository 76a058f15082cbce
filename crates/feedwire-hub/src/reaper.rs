//! Periodic removal of idle sessions.

use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio::time::{self, Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::hub::Hub;

/// Disconnect every session idle for longer than `threshold`.
///
/// Idle sessions are picked and removed from the registry and topic index in
/// one step, then their transports are closed. Returns the number of
/// sessions removed.
pub fn reap_once(hub: &Hub, threshold: Duration) -> usize {
    let idle = hub.registry().reap_idle(threshold);
    let reaped = hub.close_removed(idle, "idle");
    if reaped > 0 {
        hub.record_reaped(reaped);
        info!(reaped, threshold_secs = threshold.as_secs(), "reaped idle sessions");
    } else {
        debug!("reaper sweep found no idle sessions");
    }
    reaped
}

/// Sweep every `interval` until `cancel` fires. The first sweep runs one
/// interval after spawn. Each sweep also purges expired cache snapshots.
pub fn spawn_reaper(
    hub: Arc<Hub>,
    interval: Duration,
    threshold: Duration,
    cancel: CancellationToken,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = time::interval_at(Instant::now() + interval, interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    let _ = reap_once(&hub, threshold);
                    let purged = hub.purge_expired_snapshots();
                    if purged > 0 {
                        debug!(purged, "purged expired snapshots");
                    }
                }
                () = cancel.cancelled() => break,
            }
        }
        debug!("reaper stopped");
    })
}
