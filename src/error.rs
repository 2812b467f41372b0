//! Error types for setu-link
//!
//! # Error Recovery Strategies
//!
//! Different error types require different recovery approaches:
//!
//! ## Session-Setup Failures (Retry or Close)
//!
//! - **`Cleanup`**: The back-channel to the owning service could not be
//!   reached. The link refuses to run without a way to report
//!   self-termination; fix the service listener and retry `setup`.
//!
//! - **`Io`** / **`Resolve`**: Socket creation, bind, or host resolution
//!   failed. Usually a configuration or environment problem.
//!
//! - **`Handshake`**: The descriptor exchange timed out, had the wrong
//!   size, or the two endpoints disagree on shape. The session stays
//!   closable; the caller must retry the handshake or close.
//!
//! ## Call-Site Errors (Fix the Caller)
//!
//! - **`Shape`**: `send` was given the wrong number of values. No datagram
//!   is transmitted and no counter changes.
//!
//! - **`NotReady`**: An operation was invoked out of lifecycle order
//!   (e.g. `start` before `handshake`). Nothing happened.
//!
//! ## Configuration Errors (Fix and Restart)
//!
//! - **`Config`**: The daemon configuration file is invalid.
//!
//! # Background Threads
//!
//! The receive and heartbeat threads never propagate errors across thread
//! boundaries. A fatal condition is logged, the back-channel is signalled,
//! and the detecting thread exits; the public API keeps answering.

use thiserror::Error;

/// Errors that can occur in setu-link
///
/// See module-level documentation for recovery strategies.
#[derive(Error, Debug)]
pub enum Error {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Config error: {0}")]
    Config(String),

    #[error("Failed to resolve host '{0}'")]
    Resolve(String),

    #[error("Cleanup back-channel error: {0}")]
    Cleanup(String),

    #[error("Handshake failed: {0}")]
    Handshake(String),

    #[error("Shape mismatch: expected {expected} values, got {actual}")]
    Shape { expected: usize, actual: usize },

    #[error("Link not ready: {0}")]
    NotReady(String),
}

pub type Result<T> = std::result::Result<T, Error>;
