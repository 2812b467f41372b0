//! Receive pipeline thread
//!
//! Reads datagrams until stop is requested, classifies each one (CRC,
//! shape), and publishes the most recent valid payload plus statistics.
//! Corrupted and malformed datagrams are counted and dropped silently; the
//! peer is never notified.
//!
//! The receive timeout doubles as the cancellation poll: every wakeup
//! re-checks `stop_requested`. Any other socket error while the session is
//! not stopping is fatal to the thread — it logs, signals the back-channel,
//! and exits; the rest of the session keeps answering API calls.

use super::cleanup::CleanupClient;
use super::frame::{decode_data, DecodeOutcome};
use super::socket::is_timeout;
use super::Shared;
use std::net::UdpSocket;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Instant;

/// Receive buffer size; comfortably above any negotiable frame
const RECV_BUFFER_SIZE: usize = 2048;

/// Everything the receive thread owns
pub(super) struct ReceiverContext {
    pub socket: UdpSocket,
    pub shared: Arc<Shared>,
    pub cleanup: Arc<CleanupClient>,
    pub num_inputs: u16,
    pub delay_tracking: bool,
    pub debug_enabled: bool,
}

pub(super) fn receive_loop(ctx: ReceiverContext) {
    let mut buf = [0u8; RECV_BUFFER_SIZE];

    while !ctx.shared.stop_requested.load(Ordering::Relaxed) {
        let (n, src) = match ctx.socket.recv_from(&mut buf) {
            Ok(received) => received,
            Err(ref e) if is_timeout(e) => continue,
            Err(e) => {
                if !ctx.shared.stop_requested.load(Ordering::Relaxed) {
                    log::error!("Receive failed: {}", e);
                    ctx.cleanup.signal();
                }
                break;
            }
        };

        if ctx.debug_enabled {
            log::debug!("Received {} byte(s) from {}", n, src);
        }

        match decode_data(&buf[..n], ctx.num_inputs) {
            DecodeOutcome::ShapeInvalid => {
                let mut state = ctx.shared.data.lock().unwrap_or_else(|e| e.into_inner());
                state.counters.shape_invalid += 1;
            }
            DecodeOutcome::Corrupted => {
                let mut state = ctx.shared.data.lock().unwrap_or_else(|e| e.into_inner());
                state.counters.corrupted += 1;
            }
            DecodeOutcome::Payload(values) => {
                let now = Instant::now();
                let interval = {
                    let mut state = ctx.shared.data.lock().unwrap_or_else(|e| e.into_inner());
                    let interval = state.last_packet_time.map(|t| now - t);
                    state.latest = values;
                    state.consumed = false;
                    state.last_packet_time = Some(now);
                    state.counters.received += 1;
                    interval
                };

                // The estimator lives outside the data lock
                if ctx.delay_tracking {
                    if let Some(interval) = interval {
                        ctx.shared
                            .delay
                            .lock()
                            .unwrap_or_else(|e| e.into_inner())
                            .record(interval.as_secs_f64());
                    }
                }
            }
        }
    }

    log::info!("Receive thread exiting");
}
