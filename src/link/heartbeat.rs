//! Liveness watchdog thread
//!
//! Runs only when the endpoint expects inbound data (`num_inputs > 0`).
//! If no valid datagram arrives within the cleanup threshold, the watchdog
//! signals the back-channel and exits. The threshold deliberately exceeds
//! the freshness bound, so transient packet drops only make `get_latest`
//! return nothing rather than tearing the session down.

use super::cleanup::CleanupClient;
use super::Shared;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::thread;
use std::time::Duration;

/// Check cadence between age evaluations
const CHECK_INTERVAL: Duration = Duration::from_millis(100);

/// Cleanup threshold derived from the configured freshness bound
pub(super) fn cleanup_threshold_secs(max_age_seconds: f64) -> f64 {
    (max_age_seconds * 3.0).max(5.0)
}

pub(super) fn heartbeat_loop(shared: Arc<Shared>, cleanup: Arc<CleanupClient>, threshold_secs: f64) {
    while !shared.stop_requested.load(Ordering::Relaxed) {
        thread::sleep(CHECK_INTERVAL);

        let age_secs = {
            let state = shared.data.lock().unwrap_or_else(|e| e.into_inner());
            state.last_packet_time.map(|t| t.elapsed().as_secs_f64())
        };

        // `last_packet_time` is stamped at `start`, so this is only empty
        // while the session is already winding down.
        let Some(age_secs) = age_secs else { continue };

        if age_secs > threshold_secs {
            if !shared.stop_requested.load(Ordering::Relaxed) {
                log::error!(
                    "Data timeout after {:.1} s (threshold {:.1} s) - connection stale",
                    age_secs,
                    threshold_secs
                );
                cleanup.signal();
            }
            break;
        }
    }

    log::info!("Heartbeat thread exiting");
}
