//! Cleanup back-channel between the link and its owning service
//!
//! The UDP link must not embed knowledge of what tearing down an operation
//! means; it only owns the act of reporting its own death. The back-channel
//! is a loopback TCP connection established during `setup`, carrying no
//! protocol beyond a single byte:
//!
//! ```text
//! link (CleanupClient)  ── 0x01 ──▶  owning service (CleanupListener)
//! ```
//!
//! Any successful read on the listener side means "the UDP link has
//! self-terminated; tear down whatever depended on it". If the client
//! cannot connect during `setup`, setup fails — the link refuses to run
//! without a way to report self-termination.

use crate::error::{Error, Result};
use crossbeam_channel::{bounded, Receiver, Sender};
use std::io::{Read, Write};
use std::net::{TcpListener, TcpStream};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};
use std::time::Duration;

/// The one byte the back-channel ever carries
pub const CLEANUP_SIGNAL: u8 = 0x01;

/// Socket timeouts on the back-channel connection
const BACKCHANNEL_TIMEOUT: Duration = Duration::from_secs(10);

/// Poll cadence for the listener's nonblocking accept loop
const ACCEPT_POLL_INTERVAL: Duration = Duration::from_millis(50);

/// Link-side back-channel client
///
/// Connected once during `setup`. `signal` may be called from whichever
/// background thread detects a fatal condition; the internal mutex
/// serializes it against `close`.
pub struct CleanupClient {
    stream: Mutex<Option<TcpStream>>,
}

impl CleanupClient {
    /// Connect to the owning service's listener on `127.0.0.1:port`
    pub fn connect(port: u16) -> Result<Self> {
        let stream = TcpStream::connect(("127.0.0.1", port)).map_err(|e| {
            Error::Cleanup(format!(
                "failed to connect to service listener on port {}: {}",
                port, e
            ))
        })?;
        stream.set_read_timeout(Some(BACKCHANNEL_TIMEOUT)).ok();
        stream.set_write_timeout(Some(BACKCHANNEL_TIMEOUT)).ok();
        log::info!("Cleanup back-channel connected to service listener on port {}", port);
        Ok(Self {
            stream: Mutex::new(Some(stream)),
        })
    }

    /// Deliver the single-byte self-termination signal
    ///
    /// Returns whether the byte was written. A failed write marks the
    /// channel disconnected; the session continues its normal shutdown
    /// path either way.
    pub fn signal(&self) -> bool {
        let mut guard = self.stream.lock().unwrap_or_else(|e| e.into_inner());
        let Some(stream) = guard.as_mut() else {
            log::error!("Unable to invoke cleanup: back-channel already closed");
            return false;
        };
        match stream.write_all(&[CLEANUP_SIGNAL]) {
            Ok(()) => {
                let _ = stream.flush();
                true
            }
            Err(e) => {
                log::error!("Cleanup signal failed: {}", e);
                *guard = None;
                false
            }
        }
    }

    /// Drop the connection; further signals fail
    pub fn close(&self) {
        let mut guard = self.stream.lock().unwrap_or_else(|e| e.into_inner());
        if guard.take().is_some() {
            log::info!("Cleanup back-channel closed");
        }
    }
}

/// Owning-service side of the back-channel
///
/// Binds a loopback listener, accepts a single client, and reads until the
/// client disconnects or the listener is closed. Every successful non-empty
/// read delivers one notification on the crossbeam channel handed out by
/// [`CleanupListener::bind`]; the channel holds at most one pending
/// notification, which is all the teardown semantics need.
pub struct CleanupListener {
    port: u16,
    shutdown: Arc<AtomicBool>,
    thread: Option<JoinHandle<()>>,
}

impl CleanupListener {
    /// Bind on `127.0.0.1:port` (0 for an OS-assigned port) and start the
    /// listener thread
    pub fn bind(port: u16) -> Result<(Self, Receiver<()>)> {
        let listener = TcpListener::bind(("127.0.0.1", port))?;
        let port = listener.local_addr()?.port();
        listener.set_nonblocking(true)?;

        let (tx, rx) = bounded(1);
        let shutdown = Arc::new(AtomicBool::new(false));
        let shutdown_clone = Arc::clone(&shutdown);

        let thread = thread::Builder::new()
            .name("cleanup-listener".to_string())
            .spawn(move || listener_loop(listener, shutdown_clone, tx))?;

        log::info!("Service listener waiting on port {}", port);
        Ok((
            Self {
                port,
                shutdown,
                thread: Some(thread),
            },
            rx,
        ))
    }

    /// The bound port (useful when bound with port 0)
    pub fn port(&self) -> u16 {
        self.port
    }

    /// Stop the listener thread and release the port
    pub fn close(&mut self) {
        self.shutdown.store(true, Ordering::Relaxed);
        if let Some(thread) = self.thread.take() {
            let _ = thread.join();
            log::info!("Service listener closed");
        }
    }
}

impl Drop for CleanupListener {
    fn drop(&mut self) {
        self.close();
    }
}

/// Accept one client, then read until disconnect or shutdown
fn listener_loop(listener: TcpListener, shutdown: Arc<AtomicBool>, tx: Sender<()>) {
    let stream = loop {
        if shutdown.load(Ordering::Relaxed) {
            return;
        }
        match listener.accept() {
            Ok((stream, addr)) => {
                log::info!("Service listener: client connected from {}", addr);
                break stream;
            }
            Err(ref e) if e.kind() == std::io::ErrorKind::WouldBlock => {
                thread::sleep(ACCEPT_POLL_INTERVAL);
            }
            Err(e) => {
                log::error!("Service listener: accept failed: {}", e);
                return;
            }
        }
    };

    if let Err(e) = stream.set_read_timeout(Some(Duration::from_millis(500))) {
        log::warn!("Service listener: failed to set read timeout: {}", e);
    }

    let mut stream = stream;
    let mut buf = [0u8; 64];
    while !shutdown.load(Ordering::Relaxed) {
        match stream.read(&mut buf) {
            Ok(0) => {
                log::info!("Service listener: client disconnected");
                break;
            }
            Ok(n) => {
                log::warn!("Service listener: cleanup signal received ({} byte(s))", n);
                // At most one pending notification; extra signals are folded
                let _ = tx.try_send(());
            }
            Err(ref e) if crate::link::socket::is_timeout(e) => continue,
            Err(e) => {
                log::error!("Service listener: read failed: {}", e);
                break;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn test_signal_delivers_one_notification() {
        let (mut listener, rx) = CleanupListener::bind(0).unwrap();
        let client = CleanupClient::connect(listener.port()).unwrap();

        assert!(client.signal());
        rx.recv_timeout(Duration::from_secs(2))
            .expect("cleanup notification not delivered");

        client.close();
        listener.close();
    }

    #[test]
    fn test_signal_after_close_fails() {
        let (mut listener, _rx) = CleanupListener::bind(0).unwrap();
        let client = CleanupClient::connect(listener.port()).unwrap();

        client.close();
        assert!(!client.signal());
        listener.close();
    }

    #[test]
    fn test_connect_without_listener_fails() {
        // Bind-then-drop guarantees an unused port
        let port = {
            let listener = TcpListener::bind("127.0.0.1:0").unwrap();
            listener.local_addr().unwrap().port()
        };
        assert!(CleanupClient::connect(port).is_err());
    }

    #[test]
    fn test_repeated_signals_fold_into_pending_notification() {
        let (mut listener, rx) = CleanupListener::bind(0).unwrap();
        let client = CleanupClient::connect(listener.port()).unwrap();

        assert!(client.signal());
        assert!(client.signal());
        rx.recv_timeout(Duration::from_secs(2)).unwrap();

        client.close();
        listener.close();
    }
}
