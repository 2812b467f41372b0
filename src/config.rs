//! Configuration loading from TOML
//!
//! # Configuration File Format
//!
//! The daemon configuration is TOML-formatted:
//!
//! ```toml
//! [link]
//! role = "server"              # "server" binds, "client" resolves a peer
//! host = "0.0.0.0"             # peer host in client mode
//! port = 9500
//! num_inputs = 3               # values expected per received datagram
//! num_outputs = 0              # values sent per datagram
//! max_age_seconds = 3.0
//! socket_timeout_seconds = 2.0
//! delay_tracking = false
//! debug = false
//!
//! [cleanup]
//! port = 7123                  # loopback port for the service listener
//!
//! [monitor]
//! mirror = false               # echo received payloads back to the peer
//! status_interval_seconds = 1.0
//! handshake_timeout_seconds = 15.0
//! ```
//!
//! See `setu-link.toml` for a complete example. The library API does not
//! read configuration; these structs feed the daemon binary only.

use crate::error::{Error, Result};
use serde::Deserialize;
use std::fs;
use std::path::Path;

/// Which side of the handshake this endpoint plays
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Server,
    Client,
}

/// UDP link parameters
#[derive(Debug, Clone, Deserialize)]
pub struct LinkConfig {
    /// Endpoint role
    ///
    /// **Valid values**: "server", "client"
    /// **Required**: Yes
    pub role: Role,

    /// Peer host (client mode); ignored by the server, which binds all
    /// interfaces
    ///
    /// **Required**: For "client" role
    #[serde(default)]
    pub host: String,

    /// UDP port: bind port (server) or peer port (client)
    ///
    /// **Required**: Yes
    pub port: u16,

    /// Values expected per received datagram
    #[serde(default)]
    pub num_inputs: u16,

    /// Values sent per datagram
    #[serde(default)]
    pub num_outputs: u16,

    /// Freshness bound for `get_latest`, seconds
    #[serde(default = "default_max_age")]
    pub max_age_seconds: f64,

    /// Receive timeout / cancellation poll interval, seconds
    #[serde(default = "default_socket_timeout")]
    pub socket_timeout_seconds: f64,

    /// Track inter-arrival statistics
    #[serde(default)]
    pub delay_tracking: bool,

    /// Per-datagram debug logging
    #[serde(default)]
    pub debug: bool,
}

fn default_max_age() -> f64 {
    3.0
}

fn default_socket_timeout() -> f64 {
    2.0
}

/// Cleanup back-channel parameters
#[derive(Debug, Clone, Deserialize)]
pub struct CleanupConfig {
    /// Loopback port the service listener binds and the link connects to
    #[serde(default = "default_cleanup_port")]
    pub port: u16,
}

fn default_cleanup_port() -> u16 {
    7123
}

impl Default for CleanupConfig {
    fn default() -> Self {
        Self {
            port: default_cleanup_port(),
        }
    }
}

/// Daemon monitor behavior
#[derive(Debug, Clone, Deserialize)]
pub struct MonitorConfig {
    /// Echo received payloads back to the peer (drive+mirror combo)
    ///
    /// Requires `num_outputs == num_inputs`.
    #[serde(default)]
    pub mirror: bool,

    /// Cadence of the status log line, seconds
    #[serde(default = "default_status_interval")]
    pub status_interval_seconds: f64,

    /// Handshake receive timeout, seconds
    #[serde(default = "default_handshake_timeout")]
    pub handshake_timeout_seconds: f64,
}

fn default_status_interval() -> f64 {
    1.0
}

fn default_handshake_timeout() -> f64 {
    crate::link::DEFAULT_HANDSHAKE_TIMEOUT_SECS
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            mirror: false,
            status_interval_seconds: default_status_interval(),
            handshake_timeout_seconds: default_handshake_timeout(),
        }
    }
}

/// Root configuration
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    pub link: LinkConfig,
    #[serde(default)]
    pub cleanup: CleanupConfig,
    #[serde(default)]
    pub monitor: MonitorConfig,
}

impl Config {
    /// Load configuration from a TOML file
    ///
    /// # Validation
    ///
    /// - "client" role requires a non-empty `host`
    /// - `socket_timeout_seconds` and `max_age_seconds` must be positive
    /// - `mirror = true` requires `num_outputs == num_inputs`
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = fs::read_to_string(&path)
            .map_err(|e| Error::Config(format!("Failed to read config: {}", e)))?;

        let config: Config = basic_toml::from_str(&content)
            .map_err(|e| Error::Config(format!("Failed to parse config: {}", e)))?;

        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<()> {
        if self.link.role == Role::Client && self.link.host.is_empty() {
            return Err(Error::Config(
                "client role requires [link] host".to_string(),
            ));
        }
        if self.link.socket_timeout_seconds <= 0.0 {
            return Err(Error::Config(
                "socket_timeout_seconds must be positive".to_string(),
            ));
        }
        if self.link.max_age_seconds <= 0.0 {
            return Err(Error::Config(
                "max_age_seconds must be positive".to_string(),
            ));
        }
        if self.monitor.mirror && self.link.num_outputs != self.link.num_inputs {
            return Err(Error::Config(format!(
                "mirror mode requires num_outputs == num_inputs (got {} and {})",
                self.link.num_outputs, self.link.num_inputs
            )));
        }
        if self.monitor.status_interval_seconds <= 0.0 {
            return Err(Error::Config(
                "status_interval_seconds must be positive".to_string(),
            ));
        }
        if self.monitor.handshake_timeout_seconds <= 0.0 {
            return Err(Error::Config(
                "handshake_timeout_seconds must be positive".to_string(),
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(content: &str) -> Result<Config> {
        let config: Config = basic_toml::from_str(content)
            .map_err(|e| Error::Config(format!("Failed to parse config: {}", e)))?;
        config.validate()?;
        Ok(config)
    }

    #[test]
    fn test_minimal_server_config() {
        let config = parse(
            r#"
            [link]
            role = "server"
            port = 9500
            num_inputs = 3
            "#,
        )
        .unwrap();
        assert_eq!(config.link.role, Role::Server);
        assert_eq!(config.link.num_inputs, 3);
        assert_eq!(config.link.num_outputs, 0);
        assert_eq!(config.link.max_age_seconds, 3.0);
        assert_eq!(config.cleanup.port, 7123);
        assert!(!config.monitor.mirror);
    }

    #[test]
    fn test_client_requires_host() {
        let err = parse(
            r#"
            [link]
            role = "client"
            port = 9500
            "#,
        )
        .unwrap_err();
        assert!(matches!(err, Error::Config(_)));
    }

    #[test]
    fn test_mirror_requires_matched_shape() {
        let err = parse(
            r#"
            [link]
            role = "server"
            port = 9500
            num_inputs = 3
            num_outputs = 2

            [monitor]
            mirror = true
            "#,
        )
        .unwrap_err();
        assert!(matches!(err, Error::Config(_)));
    }

    #[test]
    fn test_nonpositive_timeout_rejected() {
        let err = parse(
            r#"
            [link]
            role = "server"
            port = 9500
            socket_timeout_seconds = 0.0
            "#,
        )
        .unwrap_err();
        assert!(matches!(err, Error::Config(_)));
    }

    #[test]
    fn test_full_client_config() {
        let config = parse(
            r#"
            [link]
            role = "client"
            host = "192.168.1.40"
            port = 9500
            num_inputs = 0
            num_outputs = 3
            max_age_seconds = 1.5
            delay_tracking = true

            [cleanup]
            port = 7200

            [monitor]
            status_interval_seconds = 0.5
            handshake_timeout_seconds = 5.0
            "#,
        )
        .unwrap();
        assert_eq!(config.link.role, Role::Client);
        assert_eq!(config.link.host, "192.168.1.40");
        assert!(config.link.delay_tracking);
        assert_eq!(config.cleanup.port, 7200);
        assert_eq!(config.monitor.handshake_timeout_seconds, 5.0);
    }
}
