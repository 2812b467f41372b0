//! setu-link - UDP teleoperation link for the excavator / motion-platform
//! integration
//!
//! This library provides the low-latency datagram channel used during live
//! teleoperation and orientation mirroring: a point-to-point, fixed-shape,
//! CRC-protected UDP session with a negotiated handshake, a liveness
//! watchdog, and a TCP back-channel that reports self-termination to the
//! owning service.

pub mod config;
pub mod error;
pub mod link;

// Re-export commonly used types
pub use config::Config;
pub use error::{Error, Result};
pub use link::{CleanupListener, LinkOptions, LinkStatus, ScalarType, UdpLink};
