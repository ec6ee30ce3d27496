//! Error kinds for the device lifecycle and transfers
//!
//! Each fallible operation has its own error type so callers can match on
//! what actually went wrong: a missing device at open time, a failed claim,
//! an unreadable descriptor, or a failed transfer.

use common::Direction;
use thiserror::Error;

/// Failure locating or opening a device
#[derive(Debug, Error)]
pub enum OpenError {
    #[error("No USB device {vendor_id:04x}:{product_id:04x} found on the bus")]
    DeviceNotFound { vendor_id: u16, product_id: u16 },

    #[error("Failed to enumerate or open USB devices")]
    Enumeration(#[source] rusb::Error),
}

/// Failure taking or giving back exclusive access to an interface
#[derive(Debug, Error)]
pub enum ClaimError {
    #[error("Failed to detach kernel driver from interface {interface}")]
    Detach { interface: u8, source: rusb::Error },

    #[error("Failed to claim interface {interface}")]
    Claim { interface: u8, source: rusb::Error },

    #[error("Failed to release interface {interface}")]
    Release { interface: u8, source: rusb::Error },
}

/// Failure reading the active configuration's endpoint descriptors
#[derive(Debug, Error)]
#[error("Failed to read descriptors of interface {interface} alt setting {alt_setting}")]
pub struct DescriptorError {
    pub interface: u8,
    pub alt_setting: u8,
    pub source: rusb::Error,
}

/// Failure of a single read or write
#[derive(Debug, Error)]
#[error("{direction} transfer on endpoint {endpoint:#04x} failed")]
pub struct TransferError {
    pub endpoint: u8,
    pub direction: Direction,
    pub source: rusb::Error,
}

impl TransferError {
    /// The device is gone; further transfers on this handle cannot succeed
    pub fn is_disconnect(&self) -> bool {
        matches!(self.source, rusb::Error::NoDevice)
    }
}
