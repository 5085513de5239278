//! # Meshtastic Pinger
//!
//! Send the position from a serial GPS receiver to one Meshtastic node as a
//! direct message, on a fixed interval, until interrupted.
//!
//! # Control Flow
//!
//! 1. **Initialization**
//!    - Load configuration (`MESHTASTIC_PINGER_CONFIG`, first argument, or
//!      `meshtastic_pinger.toml`) with environment overrides
//!    - Set up logging with a tracing subscriber
//!
//! 2. **Main Loop**
//!    - Each cycle waits for a fresh fix, connects the radio if needed and
//!      sends the rendered message
//!    - Device and link failures are logged and retried on the next cycle
//!
//! 3. **Graceful Shutdown**
//!    - Ctrl+C stops the loop after the cycle in progress
//!    - The GPS reader is stopped and the radio closed
//!
//! # Examples
//!
//! ```bash
//! MESHTASTIC_PINGER_TARGET_NODE='!a1b2c3d4' cargo run --release
//! ```
//!
//! Expected output:
//! ```text
//! INFO Meshtastic Pinger v0.1.0 starting (target=!a1b2c3d4)
//! INFO GPS connected on /dev/ttyACM0 at 9600 baud
//! INFO Radio connected on /dev/ttyUSB0 (mode longfast)
//! INFO Sent to !a1b2c3d4: GPS 37.123450,-122.543210 sats 8 hdop 0.9 10:15:30
//! ```

use anyhow::Result;
use std::sync::Arc;
use tokio::sync::watch;
use tracing::{error, info};

use meshtastic_pinger::config::Config;
use meshtastic_pinger::dispatch::Dispatcher;
use meshtastic_pinger::logging;
use meshtastic_pinger::radio::device::MeshtasticTransport;
use meshtastic_pinger::serial::TokioSerialTransport;

#[tokio::main]
async fn main() -> Result<()> {
    let path = Config::resolve_path(std::env::args().nth(1), |key| std::env::var(key).ok());

    let config = match Config::load(&path) {
        Ok(config) => config,
        Err(e) => {
            let _guard = logging::init(None);
            error!("{}", e);
            std::process::exit(1);
        }
    };

    let _guard = logging::init(config.log_dir.as_deref());

    match &config.source {
        Some(source) => info!("Loaded configuration from {}", source.display()),
        None => info!("No configuration file at {}, using defaults", path.display()),
    }

    info!(
        "Meshtastic Pinger v{} starting (target={})",
        env!("CARGO_PKG_VERSION"),
        config.target_node.as_deref().unwrap_or("?")
    );

    let mut dispatcher = Dispatcher::new(Arc::new(config), Arc::new(TokioSerialTransport), MeshtasticTransport)?;

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("Received Ctrl+C, stopping after the current cycle...");
            let _ = shutdown_tx.send(true);
        }
    });

    info!("Press Ctrl+C to exit");
    dispatcher.run(shutdown_rx).await;

    Ok(())
}
