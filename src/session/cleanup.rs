//! Background cleanup task.
//!
//! Periodically evicts expired sessions, pending AuthnRequests and replay
//! records.

use std::sync::Arc;
use std::time::Duration;
use tokio::time::interval;
use tracing::{debug, info};

use crate::service::ServiceProvider;

/// Default cleanup interval in seconds.
pub const DEFAULT_CLEANUP_INTERVAL_SECS: u64 = 300; // 5 minutes

/// Spawn a background task that periodically sweeps expired state.
///
/// Returns a `JoinHandle` that can be used to abort the task.
pub fn spawn_cleanup_task(
    provider: Arc<ServiceProvider>,
    cleanup_interval_secs: u64,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = interval(Duration::from_secs(cleanup_interval_secs.max(1)));

        // Skip the first immediate tick
        ticker.tick().await;

        loop {
            ticker.tick().await;

            let report = provider.sweep_expired();
            if report.total() > 0 {
                info!(
                    sessions = report.sessions,
                    pending_requests = report.pending_requests,
                    replay_records = report.replay_records,
                    "Expired state evicted"
                );
            } else {
                debug!("Cleanup: nothing expired");
            }
        }
    })
}
