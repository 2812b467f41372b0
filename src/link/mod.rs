//! UDP teleoperation link
//!
//! A point-to-point, fixed-shape, best-effort datagram channel between the
//! excavator and the motion platform, built for live teleoperation and
//! orientation mirroring on a controlled LAN.
//!
//! # Session Lifecycle
//!
//! ```text
//! constructed ──setup──▶ socket ready ──handshake──▶ shapes frozen
//!      ▲                (back-channel                    │
//!      │                 connected)                    start
//!      │                                                 ▼
//!   closed ◀──────────────── close ◀───────────────── running
//! ```
//!
//! `setup` binds (server) or resolves (client) the datagram endpoint and
//! connects the TCP back-channel to the owning service; `handshake`
//! exchanges 7-byte descriptors and freezes the session shape; `start`
//! spawns the receive thread and, when inbound data is expected, the
//! liveness watchdog. `close` is idempotent and legal from any state.
//!
//! # Concurrency
//!
//! At most three threads touch a session while it runs: the owner (calls
//! `send`, `get_latest`, `get_status`, `close`), the receive thread, and
//! the optional heartbeat thread. One mutex guards the latest payload and
//! all packet counters; the inter-arrival estimator has its own lock; the
//! `running` / `stop_requested` atomics are the only lock-free signals.
//!
//! # Example
//!
//! ```no_run
//! use setu_link::link::{LinkOptions, UdpLink};
//!
//! # fn main() -> setu_link::Result<()> {
//! let mut link = UdpLink::new(LinkOptions::default());
//! link.setup("192.168.1.40", 9500, 3, 0, false)?;
//! link.handshake(15.0)?;
//! link.start()?;
//!
//! if let Some(orientation) = link.get_latest() {
//!     // feed the motion platform
//!     let _ = orientation;
//! }
//! link.close()?;
//! # Ok(())
//! # }
//! ```

pub mod cleanup;
pub mod crc;
pub mod frame;
mod handshake;
mod heartbeat;
mod receiver;
mod socket;
pub mod stats;

pub use cleanup::{CleanupClient, CleanupListener, CLEANUP_SIGNAL};
pub use frame::ScalarType;
pub use handshake::DEFAULT_HANDSHAKE_TIMEOUT_SECS;
pub use stats::{InterArrivalStats, LinkStatus, PacketCounters};

use crate::error::{Error, Result};
use frame::{Descriptor, CRC_LEN, VALUE_LEN};
use socket::LinkSocket;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};
use std::time::Instant;

/// Construction-time session parameters
///
/// Immutable once the session is constructed; the shape itself
/// (`num_inputs` / `num_outputs`) is passed to [`UdpLink::setup`] and
/// frozen by the handshake.
#[derive(Debug, Clone)]
pub struct LinkOptions {
    /// Upper bound on the age of a payload `get_latest` may return, seconds
    pub max_age_seconds: f64,
    /// Feed inter-arrival intervals of valid datagrams to the estimator
    pub delay_tracking: bool,
    /// Advertised scalar type of outgoing payloads
    pub send_type: ScalarType,
    /// Receive timeout; also the receive loop's cancellation poll interval
    pub socket_timeout_seconds: f64,
    /// Per-datagram debug logging
    pub debug_enabled: bool,
    /// Loopback port of the owning service's cleanup listener
    pub cleanup_port: u16,
}

impl Default for LinkOptions {
    fn default() -> Self {
        Self {
            max_age_seconds: 3.0,
            delay_tracking: false,
            send_type: ScalarType::F32,
            socket_timeout_seconds: 2.0,
            debug_enabled: false,
            cleanup_port: 7123,
        }
    }
}

/// State guarded by the data lock
pub(crate) struct RecvState {
    pub latest: Vec<f32>,
    pub consumed: bool,
    pub last_packet_time: Option<Instant>,
    pub counters: PacketCounters,
}

/// State shared with the background threads
pub(crate) struct Shared {
    pub data: Mutex<RecvState>,
    pub delay: Mutex<InterArrivalStats>,
    pub running: AtomicBool,
    pub stop_requested: AtomicBool,
}

impl Shared {
    fn new() -> Self {
        Self {
            data: Mutex::new(RecvState {
                latest: Vec::new(),
                consumed: false,
                last_packet_time: None,
                counters: PacketCounters::default(),
            }),
            delay: Mutex::new(InterArrivalStats::new()),
            running: AtomicBool::new(false),
            stop_requested: AtomicBool::new(false),
        }
    }
}

/// A bidirectional, fixed-shape, CRC-protected UDP session
///
/// See the module documentation for the lifecycle and concurrency model.
pub struct UdpLink {
    opts: LinkOptions,
    shared: Arc<Shared>,
    socket: Option<LinkSocket>,
    cleanup: Option<Arc<CleanupClient>>,
    num_inputs: u16,
    num_outputs: u16,
    is_server: bool,
    receive_type: Option<ScalarType>,
    remote_max_age: Option<u16>,
    handshake_performed: bool,
    recv_thread: Option<JoinHandle<()>>,
    heartbeat_thread: Option<JoinHandle<()>>,
}

impl UdpLink {
    /// Create a session in the *constructed* state
    pub fn new(opts: LinkOptions) -> Self {
        Self {
            opts,
            shared: Arc::new(Shared::new()),
            socket: None,
            cleanup: None,
            num_inputs: 0,
            num_outputs: 0,
            is_server: false,
            receive_type: None,
            remote_max_age: None,
            handshake_performed: false,
            recv_thread: None,
            heartbeat_thread: None,
        }
    }

    /// Prepare the datagram endpoint and connect the cleanup back-channel
    ///
    /// Server mode binds `0.0.0.0:port` (0 for an OS-assigned port);
    /// client mode resolves `host` and remembers it for `send`. Fails when
    /// the owning service's cleanup listener is unreachable — the link
    /// refuses to run without a way to report self-termination.
    pub fn setup(
        &mut self,
        host: &str,
        port: u16,
        num_inputs: u16,
        num_outputs: u16,
        is_server: bool,
    ) -> Result<()> {
        if !self.opts.socket_timeout_seconds.is_finite() || self.opts.socket_timeout_seconds <= 0.0
        {
            return Err(Error::Config(
                "socket_timeout_seconds must be positive".to_string(),
            ));
        }

        let cleanup = CleanupClient::connect(self.opts.cleanup_port)?;

        let socket_result = if is_server {
            LinkSocket::bind(port)
        } else {
            LinkSocket::client(host, port)
        }
        .and_then(|socket| {
            socket.set_read_timeout(self.opts.socket_timeout_seconds)?;
            Ok(socket)
        });

        let socket = match socket_result {
            Ok(socket) => socket,
            Err(e) => {
                cleanup.close();
                return Err(e);
            }
        };

        self.num_inputs = num_inputs;
        self.num_outputs = num_outputs;
        self.is_server = is_server;
        self.socket = Some(socket);
        self.cleanup = Some(Arc::new(cleanup));
        Ok(())
    }

    /// Exchange descriptors with the peer and freeze the session shape
    ///
    /// One round-trip with an elongated receive timeout (see
    /// [`DEFAULT_HANDSHAKE_TIMEOUT_SECS`]). A second handshake in the same
    /// session is rejected; tear the session down to renegotiate.
    pub fn handshake(&mut self, timeout_secs: f64) -> Result<()> {
        let socket = self
            .socket
            .as_mut()
            .ok_or_else(|| Error::NotReady("socket not initialized".to_string()))?;
        if self.handshake_performed {
            return Err(Error::Handshake(
                "handshake already performed for this session".to_string(),
            ));
        }
        if !timeout_secs.is_finite() || timeout_secs <= 0.0 {
            return Err(Error::Config(
                "handshake timeout must be positive".to_string(),
            ));
        }

        let ours = Descriptor::new(
            self.num_outputs,
            self.num_inputs,
            self.opts.send_type,
            self.opts.max_age_seconds,
        );

        let theirs = handshake::exchange(
            socket,
            &ours,
            self.is_server,
            timeout_secs,
            self.opts.socket_timeout_seconds,
        )?;

        self.receive_type = Some(theirs.send_type);
        self.remote_max_age = Some(theirs.max_age);
        self.handshake_performed = true;
        Ok(())
    }

    /// Spawn the receive thread and, when inbound data is expected, the
    /// liveness watchdog
    pub fn start(&mut self) -> Result<()> {
        if self.shared.running.load(Ordering::Relaxed) {
            return Ok(());
        }
        let socket = self
            .socket
            .as_ref()
            .ok_or_else(|| Error::NotReady("socket not setup".to_string()))?;
        if !self.handshake_performed {
            return Err(Error::NotReady(
                "handshake has not been performed yet".to_string(),
            ));
        }
        let cleanup = self
            .cleanup
            .as_ref()
            .ok_or_else(|| Error::NotReady("cleanup back-channel not connected".to_string()))?;

        self.shared.running.store(true, Ordering::Relaxed);
        self.shared.stop_requested.store(false, Ordering::Relaxed);
        {
            let mut state = self.shared.data.lock().unwrap_or_else(|e| e.into_inner());
            state.last_packet_time = Some(Instant::now());
        }

        let ctx = receiver::ReceiverContext {
            socket: socket.try_clone_socket()?,
            shared: Arc::clone(&self.shared),
            cleanup: Arc::clone(cleanup),
            num_inputs: self.num_inputs,
            delay_tracking: self.opts.delay_tracking,
            debug_enabled: self.opts.debug_enabled,
        };
        self.recv_thread = Some(
            thread::Builder::new()
                .name("udp-receiver".to_string())
                .spawn(move || receiver::receive_loop(ctx))?,
        );

        // A pure sender has no liveness expectation
        if self.num_inputs > 0 {
            let threshold = heartbeat::cleanup_threshold_secs(self.opts.max_age_seconds);
            let shared = Arc::clone(&self.shared);
            let cleanup = Arc::clone(cleanup);
            let spawned = thread::Builder::new()
                .name("udp-heartbeat".to_string())
                .spawn(move || heartbeat::heartbeat_loop(shared, cleanup, threshold));
            match spawned {
                Ok(handle) => {
                    self.heartbeat_thread = Some(handle);
                    log::info!("Heartbeat thread started");
                }
                Err(e) => {
                    self.shared.stop_requested.store(true, Ordering::Relaxed);
                    self.shared.running.store(false, Ordering::Relaxed);
                    if let Some(thread) = self.recv_thread.take() {
                        let _ = thread.join();
                    }
                    return Err(Error::Io(e));
                }
            }
        }

        log::info!("UDP link started");
        Ok(())
    }

    /// Transmit one data frame to the pinned peer
    ///
    /// Legal once the handshake has pinned a peer; requires exactly
    /// `num_outputs` values (and a non-zero output shape). A failed send
    /// leaves `packets_sent` untouched and affects no background thread.
    pub fn send(&self, values: &[f32]) -> Result<()> {
        let socket = self
            .socket
            .as_ref()
            .ok_or_else(|| Error::NotReady("socket not initialized".to_string()))?;
        if self.num_outputs == 0 || values.len() != self.num_outputs as usize {
            return Err(Error::Shape {
                expected: self.num_outputs as usize,
                actual: values.len(),
            });
        }

        socket.send(&frame::encode_data(values))?;

        let mut state = self.shared.data.lock().unwrap_or_else(|e| e.into_inner());
        state.counters.sent += 1;
        Ok(())
    }

    /// The most recent unconsumed payload, if it is still fresh
    ///
    /// One-shot per arrival: a payload is returned at most once. A payload
    /// older than the configured freshness bound is suppressed and counted
    /// as expired instead.
    pub fn get_latest(&self) -> Option<Vec<f32>> {
        let mut state = self.shared.data.lock().unwrap_or_else(|e| e.into_inner());
        if state.latest.is_empty() || state.consumed {
            return None;
        }
        let last = state.last_packet_time?;
        if last.elapsed().as_secs_f64() > self.opts.max_age_seconds {
            state.counters.expired += 1;
            return None;
        }
        state.consumed = true;
        Some(state.latest.clone())
    }

    /// Immutable snapshot of counters, freshness, and negotiated parameters
    pub fn get_status(&self) -> LinkStatus {
        let state = self.shared.data.lock().unwrap_or_else(|e| e.into_inner());
        LinkStatus {
            running: self.shared.running.load(Ordering::Relaxed),
            packets_received: state.counters.received,
            packets_sent: state.counters.sent,
            packets_expired: state.counters.expired,
            packets_corrupted: state.counters.corrupted,
            packets_shape_invalid: state.counters.shape_invalid,
            time_since_last_packet: state.last_packet_time.map(|t| t.elapsed()),
            has_data: !state.latest.is_empty() && !state.consumed,
            receive_type: self.receive_type,
            send_type: self.opts.send_type,
            num_inputs: self.num_inputs,
            num_outputs: self.num_outputs,
        }
    }

    /// Snapshot of the inter-arrival estimator
    pub fn delay_stats(&self) -> InterArrivalStats {
        self.shared
            .delay
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    /// Size in bytes of every datagram the peer sends us
    pub fn get_expected_recv_packet_size(&self) -> usize {
        self.num_inputs as usize * VALUE_LEN + CRC_LEN
    }

    /// Locally bound port, once the socket exists
    pub fn local_port(&self) -> Option<u16> {
        self.socket.as_ref().and_then(|s| s.local_port())
    }

    /// Peer address pinned by the handshake (or configured, client mode)
    pub fn remote_addr(&self) -> Option<SocketAddr> {
        self.socket.as_ref().and_then(|s| s.remote())
    }

    /// Peer's advertised maximum data age, seconds
    pub fn remote_max_age(&self) -> Option<u16> {
        self.remote_max_age
    }

    /// Log the packet counters at info level
    pub fn log_packet_stats(&self) {
        let status = self.get_status();
        log::info!(
            "Packets: recv={}, sent={}, expired={}, corrupt={}, invalid={}",
            status.packets_received,
            status.packets_sent,
            status.packets_expired,
            status.packets_corrupted,
            status.packets_shape_invalid
        );
    }

    /// Log the inter-arrival statistics at info level
    pub fn log_delay_stats(&self) {
        if !self.opts.delay_tracking {
            return;
        }
        let stats = self.delay_stats();
        if stats.count() == 0 {
            return;
        }
        log::info!(
            "Inter-arrival: mean={:.3} ms, stddev={:.3} ms, min={:.3} ms, max={:.3} ms ({} intervals)",
            stats.mean() * 1000.0,
            stats.stddev() * 1000.0,
            stats.min().unwrap_or(0.0) * 1000.0,
            stats.max().unwrap_or(0.0) * 1000.0,
            stats.count()
        );
    }

    /// Stop background threads, drop the socket, and close the back-channel
    ///
    /// Idempotent and legal from any state. The receive thread drains
    /// within one receive timeout, the watchdog within its check cadence.
    pub fn close(&mut self) -> Result<()> {
        let was_open =
            self.socket.is_some() || self.recv_thread.is_some() || self.cleanup.is_some();

        self.shared.stop_requested.store(true, Ordering::Relaxed);
        self.shared.running.store(false, Ordering::Relaxed);
        self.handshake_performed = false;

        // Drop our handle first; the receive thread's clone wakes on its
        // next timeout and observes the stop flag.
        self.socket = None;

        if let Some(thread) = self.recv_thread.take() {
            let _ = thread.join();
        }
        if let Some(thread) = self.heartbeat_thread.take() {
            let _ = thread.join();
        }

        if let Some(cleanup) = self.cleanup.take() {
            cleanup.close();
        }

        if was_open {
            log::info!("UDP link closed");
        }
        Ok(())
    }
}

impl Drop for UdpLink {
    fn drop(&mut self) {
        let _ = self.close();
    }
}
