//! USB transfer execution
//!
//! Single blocking reads and writes on a resolved endpoint. The transfer
//! type is taken from the endpoint descriptor: bulk endpoints get bulk
//! transfers, interrupt endpoints interrupt transfers. There is no retry
//! here; the caller decides what a failure means.

use crate::usb::backend::UsbPeripheral;
use crate::usb::error::TransferError;
use common::{Direction, EndpointInfo, TransferKind};
use std::time::Duration;
use tracing::trace;

/// Default timeout for USB transfers (1 second)
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(1);

/// Read at most `max_packet_size` bytes from an IN endpoint
///
/// # Panics
///
/// Panics if `endpoint` is not an IN endpoint. No transfer is issued in
/// that case.
pub fn read_endpoint<P: UsbPeripheral>(
    peripheral: &P,
    endpoint: &EndpointInfo,
    timeout: Duration,
) -> Result<Vec<u8>, TransferError> {
    assert_eq!(
        endpoint.direction(),
        Direction::In,
        "read requires an IN endpoint, got {:#04x}",
        endpoint.address
    );

    let mut buffer = vec![0u8; usize::from(endpoint.max_packet_size)];

    let result = match endpoint.kind {
        TransferKind::Bulk => peripheral.read_bulk(endpoint.address, &mut buffer, timeout),
        TransferKind::Interrupt => {
            peripheral.read_interrupt(endpoint.address, &mut buffer, timeout)
        }
        TransferKind::Control | TransferKind::Isochronous => Err(rusb::Error::NotSupported),
    };

    let len = result.map_err(|source| TransferError {
        endpoint: endpoint.address,
        direction: Direction::In,
        source,
    })?;

    buffer.truncate(len);
    trace!("Read {} bytes from endpoint {:#04x}", len, endpoint.address);
    Ok(buffer)
}

/// Write `data` to an OUT endpoint, returning the number of bytes transferred
///
/// # Panics
///
/// Panics if `endpoint` is not an OUT endpoint. No transfer is issued in
/// that case.
pub fn write_endpoint<P: UsbPeripheral>(
    peripheral: &P,
    endpoint: &EndpointInfo,
    data: &[u8],
    timeout: Duration,
) -> Result<usize, TransferError> {
    assert_eq!(
        endpoint.direction(),
        Direction::Out,
        "write requires an OUT endpoint, got {:#04x}",
        endpoint.address
    );

    let result = match endpoint.kind {
        TransferKind::Bulk => peripheral.write_bulk(endpoint.address, data, timeout),
        TransferKind::Interrupt => peripheral.write_interrupt(endpoint.address, data, timeout),
        TransferKind::Control | TransferKind::Isochronous => Err(rusb::Error::NotSupported),
    };

    let len = result.map_err(|source| TransferError {
        endpoint: endpoint.address,
        direction: Direction::Out,
        source,
    })?;

    trace!("Wrote {} bytes to endpoint {:#04x}", len, endpoint.address);
    Ok(len)
}
