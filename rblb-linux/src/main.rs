// RBLB Linux host: bridges a serial bus transceiver, runs discovery rounds, logs traffic.

mod config;
mod discovery;
mod link;
mod monitor;

use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use rblb_core::{BusCore, BusEvent, DropReason, MonotonicClock, Role, Uid};
use tokio::sync::{mpsc, Mutex};
use tracing::{debug, error, info, warn};
use tracing_subscriber::EnvFilter;

const VERSION: &str = env!("CARGO_PKG_VERSION");

type HostBus = BusCore<link::SerialTransport, MonotonicClock, monitor::NodeTable>;

fn main() -> anyhow::Result<()> {
    for arg in std::env::args().skip(1) {
        if arg == "--version" || arg == "-V" {
            println!("rblb-linux {} (protocol {})", VERSION, rblb_core::PROTOCOL_VERSION);
            return Ok(());
        }
    }

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let cfg = config::load();
    let port = link::open(&cfg.serial_port, cfg.baud_rate)?;
    let writer = port.try_clone().context("cloning serial port handle for writes")?;

    let bus: HostBus = BusCore::with_config(
        Uid(cfg.uid),
        cfg.bus,
        link::SerialTransport::new(writer),
        MonotonicClock::new(),
        monitor::NodeTable::new(),
    )
    .context("invalid [bus] configuration")?;
    let role = bus.role();
    info!(
        port = %cfg.serial_port,
        baud = cfg.baud_rate,
        uid = %bus.uid(),
        ?role,
        "bus attached"
    );
    let core = Arc::new(Mutex::new(bus));

    let rt = tokio::runtime::Runtime::new()?;
    rt.block_on(async {
        let (rx_tx, rx) = mpsc::unbounded_channel();
        tokio::task::spawn_blocking(move || {
            if let Err(e) = link::read_loop(port, rx_tx) {
                error!(error = %e, "serial read failed");
            }
        });
        tokio::spawn(feed_bus(core.clone(), rx));

        if role == Role::Host && cfg.discovery_interval_secs > 0 {
            tokio::spawn(discovery::run_discovery(
                core.clone(),
                Duration::from_secs(cfg.discovery_interval_secs),
            ));
        } else if role == Role::Node {
            warn!("configured uid is not the host; discovery rounds disabled");
        }

        shutdown_signal().await
    })?;

    rt.block_on(async {
        let bus = core.lock().await;
        for (uid, node) in bus.handler().iter() {
            info!(%uid, packets = node.packets, idle_secs = node.last_seen.elapsed().as_secs(), "node");
        }
        info!(nodes = bus.handler().len(), "shutting down");
    });
    rt.shutdown_timeout(Duration::from_millis(200));
    Ok(())
}

/// Push received chunks through the bus byte by byte.
async fn feed_bus(core: Arc<Mutex<HostBus>>, mut rx: mpsc::UnboundedReceiver<Vec<u8>>) {
    while let Some(chunk) = rx.recv().await {
        let mut bus = core.lock().await;
        for byte in chunk {
            match bus.handle_byte(byte) {
                BusEvent::Dropped(DropReason::ChecksumMismatch { expected, received }) => {
                    debug!(expected, received, "dropped frame: checksum mismatch")
                }
                BusEvent::Dropped(DropReason::Oversized { declared }) => {
                    debug!(declared, "dropped frame: oversized")
                }
                BusEvent::Discovery(event) => debug!(?event, "discovery"),
                _ => {}
            }
        }
    }
}

/// Wait for Ctrl+C or SIGTERM (Unix).
async fn shutdown_signal() -> anyhow::Result<()> {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};
        let mut sigterm = signal(SignalKind::terminate()).context("installing SIGTERM handler")?;
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {}
            _ = sigterm.recv() => {}
        }
    }
    #[cfg(not(unix))]
    {
        tokio::signal::ctrl_c().await?;
    }
    Ok(())
}
