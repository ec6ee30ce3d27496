//! USB subsystem
//!
//! This module implements everything that touches the device:
//! - Backend seam over libusb (and the simulated bus used in tests)
//! - Device lookup and the scoped claim/release lifecycle
//! - Endpoint selection by direction
//! - Single blocking bulk/interrupt transfers
//! - The poll worker thread
//!
//! USB calls are blocking, so the worker runs on its own OS thread and is
//! stopped from the Tokio runtime through the shutdown bridge.

pub mod backend;
pub mod device;
pub mod error;
pub mod transfers;
pub mod worker;

// Re-export public types
pub use backend::{RusbBus, RusbPeripheral, UsbBus, UsbPeripheral};
pub use device::{ClaimOptions, ClaimedDevice, Endpoint, UsbDevice, select_endpoint};
pub use error::{ClaimError, DescriptorError, OpenError, TransferError};
pub use worker::{PollError, PollOptions, PollSummary, run_poll_loop, spawn_poll_worker};
