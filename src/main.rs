//! setu-link - link monitor daemon for the excavator UDP transport

use setu_link::config::{Config, Role};
use setu_link::link::{CleanupListener, LinkOptions, UdpLink};
use setu_link::{Error, Result};
use std::env;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

fn main() -> Result<()> {
    // Initialize logger
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    log::info!("setu-link v0.3.0 starting...");

    // Get config path from args or default
    let config_path = env::args()
        .nth(1)
        .unwrap_or_else(|| "/etc/setu-link.toml".to_string());

    log::info!("Using config: {}", config_path);
    let config = Config::load(&config_path)?;

    log::info!(
        "Link: {:?} on port {}, shape {}in/{}out",
        config.link.role,
        config.link.port,
        config.link.num_inputs,
        config.link.num_outputs
    );

    // Set up shutdown signal handler
    let running = Arc::new(AtomicBool::new(true));
    let r = Arc::clone(&running);

    ctrlc::set_handler(move || {
        log::info!("Received shutdown signal");
        r.store(false, Ordering::Relaxed);
    })
    .map_err(|e| Error::Config(format!("Error setting Ctrl-C handler: {}", e)))?;

    // The daemon owns the cleanup listener the link reports into
    let (mut listener, cleanup_rx) = CleanupListener::bind(config.cleanup.port)?;

    let mut udp_link = UdpLink::new(LinkOptions {
        max_age_seconds: config.link.max_age_seconds,
        delay_tracking: config.link.delay_tracking,
        socket_timeout_seconds: config.link.socket_timeout_seconds,
        debug_enabled: config.link.debug,
        cleanup_port: listener.port(),
        ..LinkOptions::default()
    });

    udp_link.setup(
        &config.link.host,
        config.link.port,
        config.link.num_inputs,
        config.link.num_outputs,
        config.link.role == Role::Server,
    )?;
    udp_link.handshake(config.monitor.handshake_timeout_seconds)?;
    udp_link.start()?;

    log::info!(
        "setu-link running (peer: {:?}). Press Ctrl-C to stop.",
        udp_link.remote_addr()
    );

    // Monitor loop: mirror payloads if configured, log status periodically,
    // and stop on Ctrl-C or on a cleanup notification from the link itself.
    let status_interval = Duration::from_secs_f64(config.monitor.status_interval_seconds);
    let mut last_status = Instant::now();

    while running.load(Ordering::Relaxed) {
        if cleanup_rx.try_recv().is_ok() {
            log::warn!("Link reported self-termination, shutting down");
            break;
        }

        if let Some(values) = udp_link.get_latest() {
            if config.monitor.mirror {
                if let Err(e) = udp_link.send(&values) {
                    log::error!("Mirror send failed: {}", e);
                }
            }
        }

        if last_status.elapsed() >= status_interval {
            let status = udp_link.get_status();
            log::info!(
                "Status: recv={}, sent={}, corrupt={}, invalid={}, expired={}, last packet {:?} ago",
                status.packets_received,
                status.packets_sent,
                status.packets_corrupted,
                status.packets_shape_invalid,
                status.packets_expired,
                status.time_since_last_packet
            );
            last_status = Instant::now();
        }

        thread::sleep(Duration::from_millis(10));
    }

    udp_link.log_packet_stats();
    udp_link.log_delay_stats();
    udp_link.close()?;
    listener.close();

    log::info!("setu-link stopped");
    Ok(())
}
