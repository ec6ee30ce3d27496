//! usb-poller
//!
//! Host-side driver for a single USB device: locate it by vendor/product
//! id, claim its interface for exclusive access, discover its IN and OUT
//! endpoints, then run a periodic read-then-write cycle.

pub mod config;
#[cfg(any(test, feature = "test-utils"))]
pub mod test_utils;
pub mod usb;
