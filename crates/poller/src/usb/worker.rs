//! USB poll worker
//!
//! Dedicated thread running the read-then-write cycle against one device:
//!
//! 1. Open the device and claim its interface (released on every exit path)
//! 2. Resolve the IN and OUT endpoints once
//! 3. Loop: sleep, read one packet, write the payload
//!
//! Transient transfer errors on either direction are logged and the loop
//! carries on; the write is issued whatever the read's outcome. A
//! disconnected device ends the loop, as do the shutdown signal and the
//! optional iteration cap.

use crate::usb::backend::{UsbBus, UsbPeripheral};
use crate::usb::device::{ClaimOptions, ClaimedDevice, Endpoint, UsbDevice};
use crate::usb::error::{ClaimError, DescriptorError, OpenError, TransferError};
use crate::usb::transfers::DEFAULT_TIMEOUT;
use common::{DeviceSelector, Direction, ShutdownSignal};
use std::thread;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, error, info, warn};

/// Vendor id polled when nothing else is configured
pub const DEFAULT_VENDOR_ID: u16 = 0x0483;

/// Product id polled when nothing else is configured
pub const DEFAULT_PRODUCT_ID: u16 = 0x5711;

/// Placeholder payload written every cycle
pub const DEFAULT_PAYLOAD: [u8; 9] = [0, 1, 2, 3, 4, 5, 6, 7, 8];

/// Errors that end the poll loop
#[derive(Debug, Error)]
pub enum PollError {
    #[error(transparent)]
    Open(#[from] OpenError),

    #[error(transparent)]
    Claim(#[from] ClaimError),

    #[error(transparent)]
    Descriptor(#[from] DescriptorError),

    #[error("Interface has no {0} endpoint")]
    EndpointNotFound(Direction),

    #[error("Device disconnected")]
    Disconnected(#[source] TransferError),
}

/// Everything the worker needs to know about one polling session
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PollOptions {
    pub selector: DeviceSelector,
    pub claim: ClaimOptions,
    /// Sleep before every cycle
    pub interval: Duration,
    /// Per-transfer timeout; zero waits forever, which also delays shutdown
    pub timeout: Duration,
    pub payload: Vec<u8>,
    /// Stop after this many cycles; `None` runs until shutdown
    pub max_iterations: Option<u64>,
}

impl Default for PollOptions {
    fn default() -> Self {
        Self {
            selector: DeviceSelector::new(DEFAULT_VENDOR_ID, DEFAULT_PRODUCT_ID),
            claim: ClaimOptions::default(),
            interval: Duration::from_secs(1),
            timeout: DEFAULT_TIMEOUT,
            payload: DEFAULT_PAYLOAD.to_vec(),
            max_iterations: None,
        }
    }
}

/// Counters collected over a polling session
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PollSummary {
    pub iterations: u64,
    pub reads_ok: u64,
    pub reads_failed: u64,
    pub writes_ok: u64,
    pub writes_failed: u64,
    pub bytes_read: u64,
    pub bytes_written: u64,
}

/// Open, claim, resolve endpoints and poll until stopped
///
/// Returns the session counters when the loop ends through the shutdown
/// signal or the iteration cap.
pub fn run_poll_loop<B: UsbBus>(
    bus: &B,
    options: &PollOptions,
    shutdown: &ShutdownSignal,
) -> Result<PollSummary, PollError> {
    let mut device = UsbDevice::open(bus, options.selector)?;
    info!("Found device {}", device);

    let mut claimed = device.claim(options.claim)?;
    claimed.set_timeout(options.timeout);

    let result = poll_claimed(&claimed, options, shutdown);

    if let Err(e) = claimed.release() {
        warn!(error = ?e, "{}", e);
    }

    result
}

fn poll_claimed<P: UsbPeripheral>(
    claimed: &ClaimedDevice<'_, P>,
    options: &PollOptions,
    shutdown: &ShutdownSignal,
) -> Result<PollSummary, PollError> {
    let endpoint_in = claimed
        .endpoint(Direction::In)?
        .ok_or(PollError::EndpointNotFound(Direction::In))?;
    debug!("IN {}", endpoint_in);

    let endpoint_out = claimed
        .endpoint(Direction::Out)?
        .ok_or(PollError::EndpointNotFound(Direction::Out))?;
    debug!("OUT {}", endpoint_out);

    let mut summary = PollSummary::default();

    loop {
        if shutdown.should_stop() {
            info!("Shutdown requested, stopping poll loop");
            break;
        }

        if options
            .max_iterations
            .is_some_and(|max| summary.iterations >= max)
        {
            debug!("Reached {} iterations, stopping poll loop", summary.iterations);
            break;
        }

        thread::sleep(options.interval);
        poll_once(
            claimed,
            &endpoint_in,
            &endpoint_out,
            &options.payload,
            &mut summary,
        )?;
    }

    Ok(summary)
}

/// One read-then-write cycle
///
/// Only a disconnect is returned as an error; other transfer failures are
/// logged and counted.
pub fn poll_once<P: UsbPeripheral>(
    claimed: &ClaimedDevice<'_, P>,
    endpoint_in: &Endpoint<'_>,
    endpoint_out: &Endpoint<'_>,
    payload: &[u8],
    summary: &mut PollSummary,
) -> Result<(), PollError> {
    summary.iterations += 1;

    match claimed.read(endpoint_in) {
        Ok(readings) => {
            debug!("Read {} bytes: {:?}", readings.len(), readings);
            summary.reads_ok += 1;
            summary.bytes_read += readings.len() as u64;
        }
        Err(e) if e.is_disconnect() => return Err(PollError::Disconnected(e)),
        Err(e) => {
            error!(error = ?e, "{}", e);
            summary.reads_failed += 1;
        }
    }

    match claimed.write(endpoint_out, payload) {
        Ok(written) => {
            if written < payload.len() {
                warn!("Short write: {} of {} bytes", written, payload.len());
            }
            summary.writes_ok += 1;
            summary.bytes_written += written as u64;
        }
        Err(e) if e.is_disconnect() => return Err(PollError::Disconnected(e)),
        Err(e) => {
            error!(error = ?e, "{}", e);
            summary.writes_failed += 1;
        }
    }

    Ok(())
}

/// Spawn the poll worker thread
///
/// The thread owns `bus` and runs [`run_poll_loop`] until it returns.
pub fn spawn_poll_worker<B>(
    bus: B,
    options: PollOptions,
    shutdown: ShutdownSignal,
) -> std::io::Result<thread::JoinHandle<Result<PollSummary, PollError>>>
where
    B: UsbBus + Send + 'static,
{
    thread::Builder::new()
        .name("usb-poll".to_string())
        .spawn(move || {
            info!("USB poll worker started for {}", options.selector);
            let result = run_poll_loop(&bus, &options, &shutdown);
            info!("USB poll worker stopped");
            result
        })
}
