//! usb-poller
//!
//! Claims one USB device by vendor/product id and polls it: every cycle it
//! reads one packet from the IN endpoint and writes a fixed payload to the
//! OUT endpoint. Ctrl+C stops the loop and hands the interface back.

use anyhow::{Context, Result, anyhow};
use clap::Parser;
use common::{DeviceSelector, create_shutdown_bridge, setup_logging};
use poller::config::{self, PollerConfig};
use poller::usb::{RusbBus, UsbBus, spawn_poll_worker};
use tokio::signal;
use tracing::{error, info, warn};

#[derive(Parser, Debug)]
#[command(name = "usb-poller")]
#[command(author, version, about = "Poll a single USB device over its bulk endpoints")]
#[command(long_about = "
Locates a USB device by vendor/product id, detaches any kernel driver bound
to its interface, claims it, and runs a periodic read-then-write cycle on
its first IN and OUT endpoints.

EXAMPLES:
    # Poll the configured device (default 0483:5711)
    usb-poller

    # Poll another device ten times
    usb-poller --device 1209:0001 --count 10

    # List attached USB devices without polling
    usb-poller --list-devices

CONFIGURATION:
    The poller looks for configuration files in the following order:
    1. Path specified with --config
    2. ~/.config/usb-poller/poller.toml
    3. /etc/usb-poller/poller.toml
    4. Built-in defaults
")]
struct Args {
    /// Path to configuration file
    #[arg(short, long, value_name = "PATH")]
    config: Option<String>,

    /// Save default configuration to default location and exit
    #[arg(long)]
    save_config: bool,

    /// List USB devices and exit
    #[arg(long)]
    list_devices: bool,

    /// Device to poll as VID:PID in hex (overrides configuration)
    #[arg(short, long, value_name = "VID:PID")]
    device: Option<DeviceSelector>,

    /// Stop after this many read/write cycles
    #[arg(short = 'n', long, value_name = "N", value_parser = clap::value_parser!(u64).range(1..))]
    count: Option<u64>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(short, long, value_name = "LEVEL")]
    log_level: Option<String>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // Handle --save-config flag early (before loading config)
    if args.save_config {
        let config = PollerConfig::default();
        let path = PollerConfig::default_path();
        config.save(&path).context("Failed to save configuration")?;
        println!("Configuration saved to: {}", path.display());
        return Ok(());
    }

    let mut config = if let Some(ref path) = args.config {
        config::load_config(path).context("Failed to load configuration")?
    } else {
        PollerConfig::load_or_default().context("Failed to load configuration")?
    };

    if let Some(selector) = args.device {
        config.device.vendor_id = selector.vendor_id;
        config.device.product_id = selector.product_id;
    }
    if args.count.is_some() {
        config.poll.max_iterations = args.count;
    }

    // Use CLI log level if specified, otherwise use config value
    let log_level = args
        .log_level
        .as_deref()
        .unwrap_or(&config.logging.log_level);

    setup_logging(log_level).context("Failed to setup logging")?;

    info!("usb-poller v{}", env!("CARGO_PKG_VERSION"));

    let bus = RusbBus::new().context("Failed to initialise libusb")?;

    if args.list_devices {
        return list_devices(&bus);
    }

    run(bus, &config).await
}

/// List USB devices and exit
fn list_devices(bus: &RusbBus) -> Result<()> {
    let devices = bus.devices().context("Failed to enumerate USB devices")?;

    if devices.is_empty() {
        println!("No USB devices found.");
    } else {
        println!("Found {} USB device(s):\n", devices.len());
        for device in devices {
            println!("  {}", device);
        }
    }

    Ok(())
}

/// Poll until the worker stops on its own or Ctrl+C is pressed
async fn run(bus: RusbBus, config: &PollerConfig) -> Result<()> {
    let options = config.poll_options();
    info!(
        "Polling {} every {:?} (interface {})",
        options.selector, options.interval, options.claim.interface
    );

    let (trigger, shutdown) = create_shutdown_bridge();
    let worker = spawn_poll_worker(bus, options, shutdown).context("Failed to spawn poll thread")?;
    let mut joined = tokio::task::spawn_blocking(move || worker.join());

    let outcome = tokio::select! {
        outcome = &mut joined => outcome,
        ctrl_c = signal::ctrl_c() => {
            match ctrl_c {
                Ok(()) => info!("Received Ctrl+C, finishing current cycle..."),
                Err(e) => error!("Error waiting for Ctrl+C: {}", e),
            }
            // Fails only if the worker already exited; its result is below
            if let Err(e) = trigger.trigger() {
                warn!("Could not signal poll thread: {}", e);
            }
            tokio::select! {
                outcome = &mut joined => outcome,
                _ = signal::ctrl_c() => {
                    warn!("Received second Ctrl+C, exiting without waiting for the poll thread");
                    std::process::exit(130);
                }
            }
        }
    };

    let summary = outcome
        .context("Failed to join poll thread")?
        .map_err(|_| anyhow!("Poll thread panicked"))?
        .context("Polling failed")?;

    info!(
        "Polled {} cycles: {} reads ok ({} bytes), {} failed; {} writes ok ({} bytes), {} failed",
        summary.iterations,
        summary.reads_ok,
        summary.bytes_read,
        summary.reads_failed,
        summary.writes_ok,
        summary.bytes_written,
        summary.writes_failed
    );

    Ok(())
}
