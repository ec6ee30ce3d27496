//! USB backend abstraction
//!
//! The device wrapper talks to the bus through the [`UsbBus`] and
//! [`UsbPeripheral`] traits. [`RusbBus`] is the libusb implementation used by
//! the binary; `crate::test_utils::SimulatedBus` implements the same traits in
//! memory for tests.
//!
//! Errors stay in libusb's vocabulary (`rusb::Error`) on both sides of the
//! seam so the error mapping in the layers above is backend-independent.

use common::{DeviceSelector, DeviceSummary, EndpointInfo, TransferKind};
use rusb::{Context, Device, DeviceHandle, UsbContext};
use std::time::Duration;
use tracing::{debug, trace};

/// A bus that can enumerate and open devices
pub trait UsbBus {
    type Peripheral: UsbPeripheral;

    /// List every device currently attached
    fn devices(&self) -> rusb::Result<Vec<DeviceSummary>>;

    /// Open the first device matching `selector`, or `None` if none is attached
    fn open(&self, selector: DeviceSelector) -> rusb::Result<Option<Self::Peripheral>>;
}

/// An opened device
///
/// Mirrors the subset of libusb's device handle the poller needs.
pub trait UsbPeripheral {
    fn summary(&self) -> DeviceSummary;

    fn kernel_driver_active(&self, interface: u8) -> rusb::Result<bool>;
    fn detach_kernel_driver(&mut self, interface: u8) -> rusb::Result<()>;
    fn attach_kernel_driver(&mut self, interface: u8) -> rusb::Result<()>;

    fn claim_interface(&mut self, interface: u8) -> rusb::Result<()>;
    fn release_interface(&mut self, interface: u8) -> rusb::Result<()>;

    /// Endpoint descriptors of `interface`/`alt_setting` in the active
    /// configuration, in descriptor order
    fn endpoints(&self, interface: u8, alt_setting: u8) -> rusb::Result<Vec<EndpointInfo>>;

    fn read_bulk(&self, endpoint: u8, buf: &mut [u8], timeout: Duration) -> rusb::Result<usize>;
    fn write_bulk(&self, endpoint: u8, data: &[u8], timeout: Duration) -> rusb::Result<usize>;
    fn read_interrupt(
        &self,
        endpoint: u8,
        buf: &mut [u8],
        timeout: Duration,
    ) -> rusb::Result<usize>;
    fn write_interrupt(&self, endpoint: u8, data: &[u8], timeout: Duration) -> rusb::Result<usize>;
}

/// libusb-backed bus
pub struct RusbBus {
    context: Context,
}

impl RusbBus {
    pub fn new() -> rusb::Result<Self> {
        Ok(Self {
            context: Context::new()?,
        })
    }
}

impl UsbBus for RusbBus {
    type Peripheral = RusbPeripheral;

    fn devices(&self) -> rusb::Result<Vec<DeviceSummary>> {
        let mut summaries = Vec::new();

        for device in self.context.devices()?.iter() {
            match summarize(&device) {
                Ok(summary) => summaries.push(summary),
                Err(e) => debug!(
                    "Skipping bus {:03} address {:03}: {}",
                    device.bus_number(),
                    device.address(),
                    e
                ),
            }
        }

        Ok(summaries)
    }

    fn open(&self, selector: DeviceSelector) -> rusb::Result<Option<RusbPeripheral>> {
        for device in self.context.devices()?.iter() {
            let Ok(summary) = summarize(&device) else {
                continue;
            };

            if !selector.matches(summary.vendor_id, summary.product_id) {
                continue;
            }

            trace!("Opening {}", summary);
            let handle = device.open()?;
            return Ok(Some(RusbPeripheral {
                device,
                handle,
                summary,
            }));
        }

        Ok(None)
    }
}

/// libusb-backed device handle
pub struct RusbPeripheral {
    device: Device<Context>,
    handle: DeviceHandle<Context>,
    summary: DeviceSummary,
}

impl UsbPeripheral for RusbPeripheral {
    fn summary(&self) -> DeviceSummary {
        self.summary.clone()
    }

    fn kernel_driver_active(&self, interface: u8) -> rusb::Result<bool> {
        self.handle.kernel_driver_active(interface)
    }

    fn detach_kernel_driver(&mut self, interface: u8) -> rusb::Result<()> {
        self.handle.detach_kernel_driver(interface)
    }

    fn attach_kernel_driver(&mut self, interface: u8) -> rusb::Result<()> {
        self.handle.attach_kernel_driver(interface)
    }

    fn claim_interface(&mut self, interface: u8) -> rusb::Result<()> {
        self.handle.claim_interface(interface)
    }

    fn release_interface(&mut self, interface: u8) -> rusb::Result<()> {
        self.handle.release_interface(interface)
    }

    fn endpoints(&self, interface: u8, alt_setting: u8) -> rusb::Result<Vec<EndpointInfo>> {
        let config = self.device.active_config_descriptor()?;

        let setting = config
            .interfaces()
            .filter(|i| i.number() == interface)
            .flat_map(|i| i.descriptors())
            .find(|d| d.setting_number() == alt_setting)
            .ok_or(rusb::Error::NotFound)?;

        Ok(setting
            .endpoint_descriptors()
            .map(|ep| EndpointInfo {
                address: ep.address(),
                max_packet_size: ep.max_packet_size(),
                kind: map_transfer_type(ep.transfer_type()),
            })
            .collect())
    }

    fn read_bulk(&self, endpoint: u8, buf: &mut [u8], timeout: Duration) -> rusb::Result<usize> {
        self.handle.read_bulk(endpoint, buf, timeout)
    }

    fn write_bulk(&self, endpoint: u8, data: &[u8], timeout: Duration) -> rusb::Result<usize> {
        self.handle.write_bulk(endpoint, data, timeout)
    }

    fn read_interrupt(
        &self,
        endpoint: u8,
        buf: &mut [u8],
        timeout: Duration,
    ) -> rusb::Result<usize> {
        self.handle.read_interrupt(endpoint, buf, timeout)
    }

    fn write_interrupt(&self, endpoint: u8, data: &[u8], timeout: Duration) -> rusb::Result<usize> {
        self.handle.write_interrupt(endpoint, data, timeout)
    }
}

fn summarize(device: &Device<Context>) -> rusb::Result<DeviceSummary> {
    let descriptor = device.device_descriptor()?;

    Ok(DeviceSummary {
        vendor_id: descriptor.vendor_id(),
        product_id: descriptor.product_id(),
        bus_number: device.bus_number(),
        address: device.address(),
    })
}

/// Map rusb endpoint transfer type to the shared TransferKind
fn map_transfer_type(transfer_type: rusb::TransferType) -> TransferKind {
    match transfer_type {
        rusb::TransferType::Control => TransferKind::Control,
        rusb::TransferType::Isochronous => TransferKind::Isochronous,
        rusb::TransferType::Bulk => TransferKind::Bulk,
        rusb::TransferType::Interrupt => TransferKind::Interrupt,
    }
}
