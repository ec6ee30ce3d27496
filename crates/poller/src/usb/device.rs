//! USB device abstraction
//!
//! [`UsbDevice`] owns one opened peripheral matched by vendor/product id.
//! Exclusive access is scoped: [`UsbDevice::claim`] detaches any bound
//! kernel driver, claims the interface and returns a [`ClaimedDevice`]
//! guard. The guard releases the interface when dropped, so release happens
//! on every exit path, including early returns and unwinding panics.
//! Endpoints resolved through the guard borrow it and cannot outlive the
//! claim.

use crate::usb::backend::{UsbBus, UsbPeripheral};
use crate::usb::error::{ClaimError, DescriptorError, OpenError, TransferError};
use crate::usb::transfers::{DEFAULT_TIMEOUT, read_endpoint, write_endpoint};
use common::{DeviceSelector, DeviceSummary, Direction, EndpointInfo};
use std::fmt;
use std::marker::PhantomData;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Which interface to claim and how to treat its kernel driver
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ClaimOptions {
    pub interface: u8,
    pub alt_setting: u8,
    /// Hand the interface back to the kernel driver on release, if this
    /// claim detached one
    pub reattach_kernel_driver: bool,
}

impl Default for ClaimOptions {
    fn default() -> Self {
        Self {
            interface: 0,
            alt_setting: 0,
            reattach_kernel_driver: true,
        }
    }
}

/// USB device wrapper, located by vendor/product id
pub struct UsbDevice<P: UsbPeripheral> {
    peripheral: P,
    summary: DeviceSummary,
}

impl<P: UsbPeripheral> UsbDevice<P> {
    /// Open the first device on `bus` matching `selector`
    pub fn open<B>(bus: &B, selector: DeviceSelector) -> Result<Self, OpenError>
    where
        B: UsbBus<Peripheral = P>,
    {
        let peripheral = bus
            .open(selector)
            .map_err(OpenError::Enumeration)?
            .ok_or(OpenError::DeviceNotFound {
                vendor_id: selector.vendor_id,
                product_id: selector.product_id,
            })?;

        let summary = peripheral.summary();
        debug!("Opened {}", summary);

        Ok(Self {
            peripheral,
            summary,
        })
    }

    pub fn summary(&self) -> &DeviceSummary {
        &self.summary
    }

    /// Take exclusive access to an interface
    ///
    /// If a kernel driver is bound to the interface it is detached first.
    /// Platforms without kernel driver support are treated as having none
    /// bound.
    pub fn claim(&mut self, options: ClaimOptions) -> Result<ClaimedDevice<'_, P>, ClaimError> {
        let interface = options.interface;

        let detached_driver = match self.peripheral.kernel_driver_active(interface) {
            Ok(true) => {
                info!(
                    "Interface {} of {} is claimed by a kernel driver, detaching it",
                    interface, self.summary
                );
                self.peripheral
                    .detach_kernel_driver(interface)
                    .map_err(|source| ClaimError::Detach { interface, source })?;
                true
            }
            Ok(false) => {
                debug!("No kernel driver active on interface {}", interface);
                false
            }
            Err(rusb::Error::NotSupported) => {
                debug!("Kernel driver query not supported on this platform");
                false
            }
            Err(e) => {
                debug!(
                    "Could not check kernel driver status for interface {}: {}",
                    interface, e
                );
                false
            }
        };

        if let Err(source) = self.peripheral.claim_interface(interface) {
            if detached_driver && options.reattach_kernel_driver {
                if let Err(e) = self.peripheral.attach_kernel_driver(interface) {
                    warn!(
                        "Failed to reattach kernel driver to interface {}: {}",
                        interface, e
                    );
                }
            }
            return Err(ClaimError::Claim { interface, source });
        }

        debug!("Claimed interface {} on {}", interface, self.summary);

        Ok(ClaimedDevice {
            device: self,
            options,
            detached_driver,
            timeout: DEFAULT_TIMEOUT,
            released: false,
        })
    }
}

impl<P: UsbPeripheral> fmt::Display for UsbDevice<P> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(&self.summary, f)
    }
}

/// Pick the first endpoint in descriptor order whose direction matches
pub fn select_endpoint(endpoints: &[EndpointInfo], direction: Direction) -> Option<EndpointInfo> {
    endpoints
        .iter()
        .find(|ep| ep.direction() == direction)
        .copied()
}

/// An endpoint of a claimed interface
///
/// Borrows the claim it was resolved from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Endpoint<'a> {
    info: EndpointInfo,
    _claim: PhantomData<&'a ()>,
}

impl Endpoint<'_> {
    pub fn address(&self) -> u8 {
        self.info.address
    }

    pub fn max_packet_size(&self) -> u16 {
        self.info.max_packet_size
    }

    pub fn direction(&self) -> Direction {
        self.info.direction()
    }

    pub fn info(&self) -> &EndpointInfo {
        &self.info
    }
}

impl fmt::Display for Endpoint<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(&self.info, f)
    }
}

/// Scoped exclusive access to one interface of a [`UsbDevice`]
///
/// Not reentrant: the guard holds the device mutably, so a second claim
/// cannot be taken while this one lives.
pub struct ClaimedDevice<'a, P: UsbPeripheral> {
    device: &'a mut UsbDevice<P>,
    options: ClaimOptions,
    detached_driver: bool,
    timeout: Duration,
    released: bool,
}

impl<'a, P: UsbPeripheral> ClaimedDevice<'a, P> {
    pub fn interface(&self) -> u8 {
        self.options.interface
    }

    /// Whether claiming detached a kernel driver from the interface
    pub fn detached_kernel_driver(&self) -> bool {
        self.detached_driver
    }

    /// Timeout applied to every subsequent read and write
    pub fn set_timeout(&mut self, timeout: Duration) {
        self.timeout = timeout;
    }

    /// Find the first endpoint of the claimed alternate setting in `direction`
    ///
    /// Reads the active configuration on every call.
    pub fn endpoint(&self, direction: Direction) -> Result<Option<Endpoint<'_>>, DescriptorError> {
        let ClaimOptions {
            interface,
            alt_setting,
            ..
        } = self.options;

        let endpoints = self
            .device
            .peripheral
            .endpoints(interface, alt_setting)
            .map_err(|source| DescriptorError {
                interface,
                alt_setting,
                source,
            })?;

        Ok(select_endpoint(&endpoints, direction).map(|info| Endpoint {
            info,
            _claim: PhantomData,
        }))
    }

    /// Single blocking read of at most `max_packet_size` bytes
    ///
    /// # Panics
    ///
    /// Panics if `endpoint` is not an IN endpoint.
    pub fn read(&self, endpoint: &Endpoint<'_>) -> Result<Vec<u8>, TransferError> {
        read_endpoint(&self.device.peripheral, &endpoint.info, self.timeout)
    }

    /// Single blocking write, returning the number of bytes transferred
    ///
    /// # Panics
    ///
    /// Panics if `endpoint` is not an OUT endpoint.
    pub fn write(&self, endpoint: &Endpoint<'_>, data: &[u8]) -> Result<usize, TransferError> {
        write_endpoint(&self.device.peripheral, &endpoint.info, data, self.timeout)
    }

    /// Release the interface now and report the outcome
    ///
    /// Dropping the guard does the same but can only log failures.
    pub fn release(mut self) -> Result<(), ClaimError> {
        self.release_inner()
    }

    fn release_inner(&mut self) -> Result<(), ClaimError> {
        if self.released {
            return Ok(());
        }
        self.released = true;

        let interface = self.options.interface;
        let peripheral = &mut self.device.peripheral;

        let result = peripheral
            .release_interface(interface)
            .map_err(|source| ClaimError::Release { interface, source });

        if result.is_ok() {
            debug!("Released interface {}", interface);
        }

        if self.detached_driver && self.options.reattach_kernel_driver {
            match peripheral.attach_kernel_driver(interface) {
                Ok(()) => info!("Reattached kernel driver to interface {}", interface),
                Err(e) => warn!(
                    "Could not reattach kernel driver to interface {}: {}",
                    interface, e
                ),
            }
        }

        result
    }
}

impl<P: UsbPeripheral> Drop for ClaimedDevice<'_, P> {
    fn drop(&mut self) {
        if let Err(e) = self.release_inner() {
            warn!(error = ?e, "{}", e);
        }
    }
}
