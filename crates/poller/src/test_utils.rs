//! Test utilities for usb-poller
//!
//! Provides an in-memory bus implementing the backend traits, so the device
//! lifecycle and the poll loop can be exercised without hardware. Every call
//! a peripheral receives is recorded in order.
//!
//! # Example
//!
//! ```
//! use common::DeviceSelector;
//! use poller::test_utils::{SimulatedBus, SimulatedDevice};
//! use poller::usb::UsbDevice;
//!
//! let selector = DeviceSelector::new(0x0483, 0x5711);
//! let bus = SimulatedBus::new()
//!     .with_device(SimulatedDevice::new(selector).with_bulk_pair(0x81, 0x01, 64));
//!
//! let device = UsbDevice::open(&bus, selector).unwrap();
//! assert_eq!(device.summary().vendor_id, 0x0483);
//! ```

use crate::usb::backend::{UsbBus, UsbPeripheral};
use common::{DeviceSelector, DeviceSummary, EndpointInfo, TransferKind};
use std::collections::VecDeque;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

/// One call received by a simulated peripheral
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BusCall {
    KernelDriverActive(u8),
    DetachKernelDriver(u8),
    AttachKernelDriver(u8),
    ClaimInterface(u8),
    ReleaseInterface(u8),
    Endpoints { interface: u8, alt_setting: u8 },
    Read { endpoint: u8, len: usize },
    Write { endpoint: u8, data: Vec<u8> },
    InterruptRead { endpoint: u8, len: usize },
    InterruptWrite { endpoint: u8, data: Vec<u8> },
}

/// Scripted outcome of a read: the bytes the device returns, or an error
pub type ReadOutcome = Result<Vec<u8>, rusb::Error>;

/// Scripted outcome of a write: the byte count accepted, or an error.
/// `None` accepts the whole payload.
pub type WriteOutcome = Result<Option<usize>, rusb::Error>;

/// Description of a device to place on a [`SimulatedBus`]
#[derive(Debug, Clone)]
pub struct SimulatedDevice {
    selector: DeviceSelector,
    bus_number: u8,
    address: u8,
    interface: u8,
    endpoints: Vec<EndpointInfo>,
    kernel_driver_bound: bool,
    kernel_driver_supported: bool,
    claim_error: Option<rusb::Error>,
    release_error: Option<rusb::Error>,
    reads: VecDeque<ReadOutcome>,
    writes: VecDeque<WriteOutcome>,
}

impl SimulatedDevice {
    /// A device with interface 0, no endpoints and no kernel driver bound
    pub fn new(selector: DeviceSelector) -> Self {
        Self {
            selector,
            bus_number: 1,
            address: 2,
            interface: 0,
            endpoints: Vec::new(),
            kernel_driver_bound: false,
            kernel_driver_supported: true,
            claim_error: None,
            release_error: None,
            reads: VecDeque::new(),
            writes: VecDeque::new(),
        }
    }

    pub fn at(mut self, bus_number: u8, address: u8) -> Self {
        self.bus_number = bus_number;
        self.address = address;
        self
    }

    /// Append an endpoint descriptor to alt setting 0
    pub fn with_endpoint(mut self, endpoint: EndpointInfo) -> Self {
        self.endpoints.push(endpoint);
        self
    }

    /// Append one bulk IN and one bulk OUT endpoint
    pub fn with_bulk_pair(self, in_address: u8, out_address: u8, max_packet_size: u16) -> Self {
        self.with_endpoint(EndpointInfo {
            address: in_address,
            max_packet_size,
            kind: TransferKind::Bulk,
        })
        .with_endpoint(EndpointInfo {
            address: out_address,
            max_packet_size,
            kind: TransferKind::Bulk,
        })
    }

    /// Bind a kernel driver to the interface
    pub fn with_kernel_driver(mut self) -> Self {
        self.kernel_driver_bound = true;
        self
    }

    /// Report kernel driver queries as unsupported, like non-Linux hosts
    pub fn without_kernel_driver_support(mut self) -> Self {
        self.kernel_driver_supported = false;
        self
    }

    pub fn with_claim_error(mut self, error: rusb::Error) -> Self {
        self.claim_error = Some(error);
        self
    }

    pub fn with_release_error(mut self, error: rusb::Error) -> Self {
        self.release_error = Some(error);
        self
    }

    /// Queue the outcome of the next unscripted read. Once the queue is
    /// empty reads time out.
    pub fn with_read(mut self, outcome: ReadOutcome) -> Self {
        self.reads.push_back(outcome);
        self
    }

    /// Queue the outcome of the next unscripted write. Once the queue is
    /// empty writes accept the whole payload.
    pub fn with_write(mut self, outcome: WriteOutcome) -> Self {
        self.writes.push_back(outcome);
        self
    }

    fn summary(&self) -> DeviceSummary {
        DeviceSummary {
            vendor_id: self.selector.vendor_id,
            product_id: self.selector.product_id,
            bus_number: self.bus_number,
            address: self.address,
        }
    }
}

/// In-memory bus
///
/// Opening a device hands out a fresh peripheral built from its
/// [`SimulatedDevice`] description; all peripherals share the bus call log.
#[derive(Debug, Default)]
pub struct SimulatedBus {
    devices: Vec<SimulatedDevice>,
    calls: Arc<Mutex<Vec<BusCall>>>,
}

impl SimulatedBus {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_device(mut self, device: SimulatedDevice) -> Self {
        self.devices.push(device);
        self
    }

    /// Snapshot of every call received so far
    pub fn calls(&self) -> Vec<BusCall> {
        lock(&self.calls).clone()
    }

    /// Number of recorded calls matching `predicate`
    pub fn count(&self, predicate: impl Fn(&BusCall) -> bool) -> usize {
        lock(&self.calls).iter().filter(|c| predicate(c)).count()
    }
}

impl UsbBus for SimulatedBus {
    type Peripheral = SimulatedPeripheral;

    fn devices(&self) -> rusb::Result<Vec<DeviceSummary>> {
        Ok(self.devices.iter().map(SimulatedDevice::summary).collect())
    }

    fn open(&self, selector: DeviceSelector) -> rusb::Result<Option<SimulatedPeripheral>> {
        Ok(self
            .devices
            .iter()
            .find(|d| d.selector == selector)
            .map(|d| SimulatedPeripheral {
                state: Mutex::new(d.clone()),
                calls: Arc::clone(&self.calls),
            }))
    }
}

/// Opened simulated device
pub struct SimulatedPeripheral {
    state: Mutex<SimulatedDevice>,
    calls: Arc<Mutex<Vec<BusCall>>>,
}

impl SimulatedPeripheral {
    fn record(&self, call: BusCall) {
        lock(&self.calls).push(call);
    }

    fn state(&self) -> MutexGuard<'_, SimulatedDevice> {
        lock(&self.state)
    }

    fn check_interface(&self, interface: u8) -> rusb::Result<()> {
        if self.state().interface == interface {
            Ok(())
        } else {
            Err(rusb::Error::NotFound)
        }
    }

    fn next_read(&self, len: usize) -> rusb::Result<Vec<u8>> {
        let outcome = self
            .state()
            .reads
            .pop_front()
            .unwrap_or(Err(rusb::Error::Timeout));
        let mut data = outcome?;
        data.truncate(len);
        Ok(data)
    }

    fn next_write(&self, data: &[u8]) -> rusb::Result<usize> {
        let outcome = self.state().writes.pop_front().unwrap_or(Ok(None));
        Ok(outcome?.unwrap_or(data.len()).min(data.len()))
    }
}

impl UsbPeripheral for SimulatedPeripheral {
    fn summary(&self) -> DeviceSummary {
        self.state().summary()
    }

    fn kernel_driver_active(&self, interface: u8) -> rusb::Result<bool> {
        self.record(BusCall::KernelDriverActive(interface));
        if !self.state().kernel_driver_supported {
            return Err(rusb::Error::NotSupported);
        }
        self.check_interface(interface)?;
        Ok(self.state().kernel_driver_bound)
    }

    fn detach_kernel_driver(&mut self, interface: u8) -> rusb::Result<()> {
        self.record(BusCall::DetachKernelDriver(interface));
        self.check_interface(interface)?;
        let mut state = self.state();
        if !state.kernel_driver_bound {
            return Err(rusb::Error::NotFound);
        }
        state.kernel_driver_bound = false;
        Ok(())
    }

    fn attach_kernel_driver(&mut self, interface: u8) -> rusb::Result<()> {
        self.record(BusCall::AttachKernelDriver(interface));
        self.check_interface(interface)?;
        let mut state = self.state();
        if state.kernel_driver_bound {
            return Err(rusb::Error::Busy);
        }
        state.kernel_driver_bound = true;
        Ok(())
    }

    fn claim_interface(&mut self, interface: u8) -> rusb::Result<()> {
        self.record(BusCall::ClaimInterface(interface));
        self.check_interface(interface)?;
        let state = self.state();
        if let Some(e) = state.claim_error {
            return Err(e);
        }
        if state.kernel_driver_bound {
            return Err(rusb::Error::Busy);
        }
        Ok(())
    }

    fn release_interface(&mut self, interface: u8) -> rusb::Result<()> {
        self.record(BusCall::ReleaseInterface(interface));
        self.check_interface(interface)?;
        match self.state().release_error {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }

    fn endpoints(&self, interface: u8, alt_setting: u8) -> rusb::Result<Vec<EndpointInfo>> {
        self.record(BusCall::Endpoints {
            interface,
            alt_setting,
        });
        self.check_interface(interface)?;
        if alt_setting != 0 {
            return Err(rusb::Error::NotFound);
        }
        Ok(self.state().endpoints.clone())
    }

    fn read_bulk(&self, endpoint: u8, buf: &mut [u8], _timeout: Duration) -> rusb::Result<usize> {
        self.record(BusCall::Read {
            endpoint,
            len: buf.len(),
        });
        let data = self.next_read(buf.len())?;
        buf[..data.len()].copy_from_slice(&data);
        Ok(data.len())
    }

    fn write_bulk(&self, endpoint: u8, data: &[u8], _timeout: Duration) -> rusb::Result<usize> {
        self.record(BusCall::Write {
            endpoint,
            data: data.to_vec(),
        });
        self.next_write(data)
    }

    fn read_interrupt(
        &self,
        endpoint: u8,
        buf: &mut [u8],
        _timeout: Duration,
    ) -> rusb::Result<usize> {
        self.record(BusCall::InterruptRead {
            endpoint,
            len: buf.len(),
        });
        let data = self.next_read(buf.len())?;
        buf[..data.len()].copy_from_slice(&data);
        Ok(data.len())
    }

    fn write_interrupt(
        &self,
        endpoint: u8,
        data: &[u8],
        _timeout: Duration,
    ) -> rusb::Result<usize> {
        self.record(BusCall::InterruptWrite {
            endpoint,
            data: data.to_vec(),
        });
        self.next_write(data)
    }
}

/// Lock ignoring poisoning; a panicking test must not hide the call log
fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}
