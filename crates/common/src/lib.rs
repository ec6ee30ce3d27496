//! Common utilities for usb-poller
//!
//! This crate provides the pieces shared between the poller library, its
//! binary and its tests: the USB vocabulary (device selectors, endpoint
//! directions and descriptors), error handling, logging setup, and the
//! shutdown bridge between the Tokio runtime and the blocking poll thread.

pub mod channel;
pub mod error;
pub mod logging;
pub mod usb_types;

pub use channel::{ShutdownSignal, ShutdownTrigger, create_shutdown_bridge};
pub use error::{Error, Result};
pub use logging::setup_logging;
pub use usb_types::{DeviceSelector, DeviceSummary, Direction, EndpointInfo, TransferKind};
