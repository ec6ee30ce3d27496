//! USB type abstractions and utilities
//!
//! Backend-neutral descriptions of devices and endpoints. The poller's
//! backends translate their native descriptors into these types so the
//! endpoint selection and transfer logic never touch libusb directly.

use std::fmt;
use std::str::FromStr;

/// Bit 7 of an endpoint address: set for IN (device to host)
pub const ENDPOINT_DIR_MASK: u8 = 0x80;

/// Vendor/product pair used to locate a device on the bus
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct DeviceSelector {
    pub vendor_id: u16,
    pub product_id: u16,
}

impl DeviceSelector {
    pub const fn new(vendor_id: u16, product_id: u16) -> Self {
        Self {
            vendor_id,
            product_id,
        }
    }

    /// Check whether a device descriptor's identifiers match this selector
    pub fn matches(&self, vendor_id: u16, product_id: u16) -> bool {
        self.vendor_id == vendor_id && self.product_id == product_id
    }
}

impl fmt::Display for DeviceSelector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:04x}:{:04x}", self.vendor_id, self.product_id)
    }
}

impl FromStr for DeviceSelector {
    type Err = crate::Error;

    /// Parse `VID:PID` in hex, with or without a `0x` prefix
    /// (`0483:5711`, `0x0483:0x5711`).
    fn from_str(s: &str) -> crate::Result<Self> {
        let invalid = |reason: &str| crate::Error::InvalidSelector {
            input: s.to_string(),
            reason: reason.to_string(),
        };

        let (vid, pid) = s
            .trim()
            .split_once(':')
            .ok_or_else(|| invalid("expected VID:PID"))?;

        let vendor_id =
            parse_hex_id(vid).ok_or_else(|| invalid("vendor id is not 1-4 hex digits"))?;
        let product_id =
            parse_hex_id(pid).ok_or_else(|| invalid("product id is not 1-4 hex digits"))?;

        Ok(Self::new(vendor_id, product_id))
    }
}

fn parse_hex_id(id: &str) -> Option<u16> {
    let digits = id
        .strip_prefix("0x")
        .or_else(|| id.strip_prefix("0X"))
        .unwrap_or(id);

    if digits.is_empty() || digits.len() > 4 || !digits.bytes().all(|b| b.is_ascii_hexdigit()) {
        return None;
    }

    u16::from_str_radix(digits, 16).ok()
}

/// Endpoint direction, relative to the host
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Direction {
    /// Device to host
    In,
    /// Host to device
    Out,
}

impl Direction {
    /// Decode the direction bit of an endpoint address
    pub fn from_address(address: u8) -> Self {
        if address & ENDPOINT_DIR_MASK != 0 {
            Direction::In
        } else {
            Direction::Out
        }
    }
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Direction::In => f.write_str("IN"),
            Direction::Out => f.write_str("OUT"),
        }
    }
}

/// Endpoint transfer type (bmAttributes bits 0..1)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TransferKind {
    Control,
    Isochronous,
    Bulk,
    Interrupt,
}

/// One endpoint descriptor of an interface alternate setting
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EndpointInfo {
    /// bEndpointAddress, direction in bit 7
    pub address: u8,
    /// wMaxPacketSize
    pub max_packet_size: u16,
    pub kind: TransferKind,
}

impl EndpointInfo {
    pub fn direction(&self) -> Direction {
        Direction::from_address(self.address)
    }
}

impl fmt::Display for EndpointInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "endpoint {:#04x} ({} {:?}, max packet {})",
            self.address,
            self.direction(),
            self.kind,
            self.max_packet_size
        )
    }
}

/// Minimal description of a device seen during bus enumeration
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceSummary {
    pub vendor_id: u16,
    pub product_id: u16,
    pub bus_number: u8,
    pub address: u8,
}

impl fmt::Display for DeviceSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{:04x}:{:04x} (bus {:03} address {:03})",
            self.vendor_id, self.product_id, self.bus_number, self.address
        )
    }
}
