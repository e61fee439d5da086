//! usb-pnp-hub Daemon
//!
//! Watches the host's USB buses, announces every attach and detach through
//! the notification pipeline, and matches device descriptors against the
//! configured rule table to register driver services.

use anyhow::{Context, Result};
use clap::Parser;
use common::setup_logging;
use pnp::{Config, LoggingDeviceManager, PnpService};
use std::path::PathBuf;
use std::sync::Arc;
use tokio::signal;
use tracing::{error, info};

#[derive(Parser, Debug)]
#[command(name = "usb-pnpd")]
#[command(
    author,
    version,
    about = "USB PnP daemon - match devices to driver services"
)]
#[command(long_about = "
Watches the USB buses for attach and detach events, announces every change
as a checksummed service frame, and matches device descriptors against the
configured rule table to register or unregister driver services.

EXAMPLES:
    # Run with default config
    usb-pnpd

    # Run with custom config
    usb-pnpd --config ~/usb-pnpd.toml

    # Announce already-attached devices at startup
    usb-pnpd --report-on-start

    # Run with debug logging
    usb-pnpd --verbose

CONFIGURATION:
    The daemon looks for configuration files in the following order:
    1. Path specified with --config
    2. ~/.config/usb-pnp-hub/usb-pnpd.toml
    3. /etc/usb-pnp-hub/usb-pnpd.toml
    4. Built-in defaults
")]
struct Args {
    /// Path to configuration file
    #[arg(short, long, value_name = "PATH")]
    config: Option<String>,

    /// Save default configuration to the default location and exit
    #[arg(long)]
    save_config: bool,

    /// Announce already-attached devices toward the loader at startup
    #[arg(long)]
    report_on_start: bool,

    /// Debug logging (overrides the configured level)
    #[arg(short, long)]
    verbose: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // Handle --save-config flag early (before loading config)
    if args.save_config {
        let config = Config::default();
        let path = Config::default_path();
        config.save(&path).context("Failed to save configuration")?;
        println!("Configuration saved to: {}", path.display());
        return Ok(());
    }

    // Load configuration first (to get log level from config if not specified)
    let config = if let Some(ref path) = args.config {
        let expanded = PathBuf::from(shellexpand::tilde(path).into_owned());
        Config::load(Some(expanded)).context("Failed to load configuration")?
    } else {
        Config::load_or_default()
    };

    // CLI verbosity wins over the configured level
    let log_level = if args.verbose {
        "debug"
    } else {
        &config.daemon.log_level
    };
    setup_logging(log_level).context("Failed to setup logging")?;

    info!("usb-pnpd v{}", env!("CARGO_PKG_VERSION"));
    info!("Log level: {}", log_level);
    info!(
        "Loader service '{}', {} match rule(s)",
        config.pnp.loader_service,
        config.pnp.match_rules.len()
    );

    let mut service = PnpService::start(&config, Arc::new(LoggingDeviceManager));
    service
        .attach_observer()
        .context("Failed to start the USB hotplug observer")?;

    if args.report_on_start || config.daemon.report_on_start {
        service
            .report()
            .await
            .context("Failed to queue the startup report")?;
    }

    info!("Press Ctrl+C to shutdown");
    match signal::ctrl_c().await {
        Ok(()) => {
            info!("Received Ctrl+C, shutting down gracefully...");
        }
        Err(e) => {
            error!("Error waiting for Ctrl+C: {}", e);
        }
    }

    service.shutdown().await;
    Ok(())
}
