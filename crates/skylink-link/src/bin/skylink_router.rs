//! # SkyLink Router
//!
//! Runs the data link of one node over UDP stand-in radios. Each configured
//! interface with `udp_bind` / `udp_peer` becomes one radio port; local
//! deliveries are logged.
//!
//! ## Usage
//!
//! ```bash
//! skylink-router --config vehicle.toml
//! RUST_LOG=skylink_link=debug skylink-router --config controller.toml --stats-secs 2
//! ```

use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use clap::Parser;
use crossbeam_channel::RecvTimeoutError;
use skylink_link::radio::udp::UdpRadioPort;
use skylink_link::radio::RadioPort;
use skylink_link::{Delivery, RouterConfig, RouterRuntime};
use skylink_wire::ipc::LocalControl;

/// SkyLink radio link router.
#[derive(Parser, Debug)]
#[command(name = "skylink-router", about = "SkyLink radio data link router")]
struct Cli {
    /// TOML configuration file.
    #[arg(long, short)]
    config: PathBuf,

    /// Seconds between stats log lines.
    #[arg(long, default_value_t = 5)]
    stats_secs: u64,

    /// Dump the full stats snapshot as JSON on exit.
    #[arg(long, default_value_t = false)]
    dump_stats: bool,
}

fn main() -> anyhow::Result<()> {
    // ── Logging ─────────────────────────────────────────────────
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_target(true)
        .compact()
        .init();

    let cli = Cli::parse();

    // ── Config ──────────────────────────────────────────────────
    let text = std::fs::read_to_string(&cli.config)
        .with_context(|| format!("reading {}", cli.config.display()))?;
    let config = RouterConfig::from_toml_str(&text)?;
    tracing::info!(
        vehicle_id = config.pairing.local_vehicle_id,
        links = config.topology.links.len(),
        interfaces = config.topology.interfaces.len(),
        "skylink-router starting"
    );

    // ── Radios ──────────────────────────────────────────────────
    let mut ports: Vec<Box<dyn RadioPort>> = Vec::new();
    for ep in &config.endpoints {
        ports.push(Box::new(UdpRadioPort::open(ep.interface, ep.bind, ep.peer)?));
    }
    if ports.is_empty() {
        anyhow::bail!("no radio interface has udp_bind/udp_peer set");
    }

    // ── Graceful shutdown ───────────────────────────────────────
    let running = Arc::new(AtomicBool::new(true));
    {
        let running = running.clone();
        ctrlc::set_handler(move || {
            tracing::info!("shutting down...");
            running.store(false, Ordering::Relaxed);
        })?;
    }

    let mut runtime = RouterRuntime::start(config, ports)?;
    runtime.local_control(LocalControl::RouterReady)?;

    // ── Main loop ───────────────────────────────────────────────
    let stats_interval = Duration::from_secs(cli.stats_secs.max(1));
    let mut last_stats_log = std::time::Instant::now();
    let mut delivered: u64 = 0;

    while running.load(Ordering::Relaxed) {
        match runtime.deliveries().recv_timeout(Duration::from_millis(100)) {
            Ok(d) => {
                delivered += 1;
                log_delivery(&d);
            }
            Err(RecvTimeoutError::Timeout) => {}
            Err(RecvTimeoutError::Disconnected) => break,
        }

        if last_stats_log.elapsed() >= stats_interval {
            let stats = runtime.stats();
            let state = runtime.overwrite_state();
            tracing::info!(
                delivered,
                frames_sent = stats.frames_sent,
                tx_errors = stats.tx_errors,
                restarts = stats.rx.restarts,
                relay_forwarded = stats.relay.forwarded_buffers,
                profile = state.profile.as_str(),
                shift = state.shift,
                bitrate_bps = state.target_bitrate_bps,
                last_active_ms = runtime.last_active_ms(),
                "router stats"
            );
            last_stats_log = std::time::Instant::now();
        }
    }

    // ── Cleanup ─────────────────────────────────────────────────
    runtime.shutdown();
    if cli.dump_stats {
        println!("{}", serde_json::to_string_pretty(&runtime.stats())?);
    }
    tracing::info!(delivered, "skylink-router stopped");
    Ok(())
}

fn log_delivery(d: &Delivery) {
    match d {
        Delivery::Packet {
            consumer,
            vehicle_id,
            packet,
        } => tracing::debug!(
            ?consumer,
            vehicle_id,
            ptype = packet.header.packet_type,
            len = packet.raw.len(),
            "packet"
        ),
        Delivery::VehicleRestarted { vehicle_id } => tracing::info!(vehicle_id, "vehicle restarted"),
        Delivery::CommandRtt { counter, rtt } => {
            tracing::debug!(counter, rtt_ms = rtt.as_millis() as u64, "command rtt")
        }
        Delivery::Local(msg) => tracing::info!(?msg, "local control"),
        Delivery::Link(cmd) => tracing::debug!(?cmd, "link command"),
    }
}
